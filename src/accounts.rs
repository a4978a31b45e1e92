//! Account store client: wire types for the remote document store and the
//! credential verification seam.
//!
//! The store is an opaque keyed service with three operations: exact-match
//! credential lookup, unconditional field update, and a conditional
//! credit debit. The debit is decrement-if-positive on the store side and
//! returns the authoritative balance, which closes the concurrent-session
//! over-spend race; callers reconcile to the returned value.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{Account, AccountId, Credits, Email};

/// Decides the password representation stored by (and compared against)
/// the account store.
///
/// The store currently holds plaintext, which is a known product weakness;
/// this seam exists so a hashed scheme can replace [`PlaintextVerifier`]
/// by configuration without touching the state machine.
pub trait CredentialVerifier: Send + Sync {
    /// Derives the stored/compared representation from the user's input.
    fn derive(&self, plaintext: &SecretString) -> String;

    /// Scheme name, for logs only.
    fn scheme(&self) -> &'static str;
}

/// Exact plaintext equality, matching what the store holds today.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextVerifier;

impl CredentialVerifier for PlaintextVerifier {
    fn derive(&self, plaintext: &SecretString) -> String {
        plaintext.expose_secret().clone()
    }

    fn scheme(&self) -> &'static str {
        "plaintext"
    }
}

#[must_use]
pub fn lookup_url(base: &str) -> String {
    format!("{}/accounts:lookup", base.trim_end_matches('/'))
}

#[must_use]
pub fn update_url(base: &str, id: &AccountId) -> String {
    format!("{}/accounts/{id}:update", base.trim_end_matches('/'))
}

#[must_use]
pub fn debit_url(base: &str, id: &AccountId) -> String {
    format!("{}/accounts/{id}/credits:debit", base.trim_end_matches('/'))
}

/// Exact-match credential lookup. `password` carries the verifier-derived
/// representation, never necessarily the raw input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResponse {
    /// Zero or one record; `None` means the pair matched nothing.
    #[serde(default)]
    pub account: Option<AccountDocument>,
}

/// The account record as the store returns it. The stored password field
/// is never echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDocument {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub credits: u32,
}

impl From<AccountDocument> for Account {
    fn from(doc: AccountDocument) -> Self {
        Account {
            id: AccountId::new(doc.id),
            email: Email::new(doc.email),
            credits: Credits(doc.credits),
        }
    }
}

/// Unconditional overwrite of named fields on one record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResponse {
    #[serde(default)]
    pub ok: bool,
}

/// Conditional debit: the store decrements only while the balance is
/// positive, in one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebitRequest {
    pub amount: u32,
}

impl DebitRequest {
    #[must_use]
    pub const fn one() -> Self {
        Self { amount: 1 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebitResponse {
    /// Balance after the store applied (or refused) the debit.
    pub credits: u32,
    /// False when the balance was already zero and nothing was debited.
    #[serde(default)]
    pub debited: bool,
}
