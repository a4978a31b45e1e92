//! Shared app core for the Aletheia funnel.
//!
//! Headless Crux core: every screen transition, the scripted scan, and the
//! two remote services (report generation, account store) live here. Shells
//! render the [`ViewModel`] and execute the requested effects.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod accounts;
pub mod analysis;
pub mod capabilities;
pub mod scan;

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use app::{
    App, Config, Event, LoginForm, Model, Screen, ScreenView, Session, ShellConfig, ViewModel,
};
pub use capabilities::{Capabilities, Effect};

pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_IMAGE_DIMENSION: u32 = 4096;

pub const DEFAULT_COMPLETION_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_STORE_BASE: &str = "https://api.projetoaletheia.com/v1";
pub const DEFAULT_CHECKOUT_URL: &str = "https://pay.kiwify.com.br/RVDacih";
/// The single account identity exempt from credit balance checks.
pub const DEFAULT_RESERVED_EMAIL: &str = "fundador@projetoaletheia.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    InvalidCredentials,
    InsufficientCredits,
    AnalysisFailed,
    Validation,
    ImageTooLarge,
    ImageDimensionsTooLarge,
    ImageFormatUnsupported,
    ImageProcessing,
    Deserialization,
    InvalidState,
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::InsufficientCredits => "INSUFFICIENT_CREDITS",
            Self::AnalysisFailed => "ANALYSIS_FAILED",
            Self::Validation => "VALIDATION_ERROR",
            Self::ImageTooLarge => "IMAGE_TOO_LARGE",
            Self::ImageDimensionsTooLarge => "IMAGE_DIMENSIONS_TOO_LARGE",
            Self::ImageFormatUnsupported => "IMAGE_FORMAT_UNSUPPORTED",
            Self::ImageProcessing => "IMAGE_PROCESSING_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
            Self::InvalidState => "INVALID_STATE",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub internal_message: Option<String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            internal_message: None,
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Message shown on the product surface (pt-BR).
    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self.kind {
            ErrorKind::Network => {
                "Falha de conexão. Verifique sua internet e tente novamente.".into()
            }
            ErrorKind::InvalidCredentials => "E-mail ou senha inválidos.".into(),
            ErrorKind::InsufficientCredits => {
                "Seus créditos acabaram. Recarregue para desbloquear novas análises.".into()
            }
            ErrorKind::AnalysisFailed => "A análise falhou. Tente novamente.".into(),
            ErrorKind::Validation => self.message.clone(),
            ErrorKind::ImageTooLarge => format!(
                "A imagem excede o limite de {} MB.",
                MAX_IMAGE_BYTES / 1_000_000
            ),
            ErrorKind::ImageDimensionsTooLarge => format!(
                "A imagem é grande demais. Máximo de {MAX_IMAGE_DIMENSION}x{MAX_IMAGE_DIMENSION} pixels."
            ),
            ErrorKind::ImageFormatUnsupported => {
                "Formato de imagem não suportado. Use JPG, PNG ou WebP.".into()
            }
            ErrorKind::ImageProcessing => {
                "Não foi possível processar a imagem. Tente outra foto.".into()
            }
            ErrorKind::Deserialization => "Resposta inesperada do servidor.".into(),
            ErrorKind::InvalidState => "Ação indisponível nesta tela.".into(),
            ErrorKind::Unknown => "Erro inesperado. Tente novamente.".into(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("image payload is empty")]
    Empty,
    #[error("image size {size} bytes exceeds maximum of {max} bytes")]
    TooLarge { size: usize, max: usize },
    #[error("image dimensions {width}x{height} exceed maximum of {max}x{max}")]
    DimensionsTooLarge { width: u32, height: u32, max: u32 },
    #[error("unsupported image format")]
    UnsupportedFormat,
    #[error("failed to decode image: {0}")]
    DecodeFailed(String),
}

impl From<ImageError> for AppError {
    fn from(e: ImageError) -> Self {
        let kind = match &e {
            ImageError::Empty => ErrorKind::Validation,
            ImageError::TooLarge { .. } => ErrorKind::ImageTooLarge,
            ImageError::DimensionsTooLarge { .. } => ErrorKind::ImageDimensionsTooLarge,
            ImageError::UnsupportedFormat => ErrorKind::ImageFormatUnsupported,
            ImageError::DecodeFailed(_) => ErrorKind::ImageProcessing,
        };
        match &e {
            ImageError::Empty => AppError::new(kind, "Selecione uma imagem."),
            _ => AppError::new(kind, e.to_string()),
        }
    }
}

/// A validated image payload, held for the duration of one analysis cycle.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    data: Bytes,
    mime_type: &'static str,
}

impl ImageData {
    /// Validates a raw payload from the shell. Browser shells hand over
    /// data-URLs; the base64 envelope is stripped before decoding.
    pub fn decode(raw: &[u8]) -> Result<Self, ImageError> {
        let bytes = if raw.starts_with(b"data:") {
            let comma = raw
                .iter()
                .position(|b| *b == b',')
                .ok_or_else(|| ImageError::DecodeFailed("malformed data URL".into()))?;
            BASE64
                .decode(&raw[comma + 1..])
                .map_err(|e| ImageError::DecodeFailed(e.to_string()))?
        } else {
            raw.to_vec()
        };

        if bytes.is_empty() {
            return Err(ImageError::Empty);
        }
        if bytes.len() > MAX_IMAGE_BYTES {
            return Err(ImageError::TooLarge {
                size: bytes.len(),
                max: MAX_IMAGE_BYTES,
            });
        }

        let format = image::guess_format(&bytes).map_err(|_| ImageError::UnsupportedFormat)?;
        let mime_type = match format {
            image::ImageFormat::Jpeg => "image/jpeg",
            image::ImageFormat::Png => "image/png",
            image::ImageFormat::WebP => "image/webp",
            _ => return Err(ImageError::UnsupportedFormat),
        };

        let decoded = image::load_from_memory_with_format(&bytes, format)
            .map_err(|e| ImageError::DecodeFailed(e.to_string()))?;
        let (width, height) = (decoded.width(), decoded.height());
        if width > MAX_IMAGE_DIMENSION || height > MAX_IMAGE_DIMENSION {
            return Err(ImageError::DimensionsTooLarge {
                width,
                height,
                max: MAX_IMAGE_DIMENSION,
            });
        }

        Ok(Self {
            data: Bytes::from(bytes),
            mime_type,
        })
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub const fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// Redact debug output; the payload is user-provided biometric data.
impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("len", &self.data.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

#[cfg(test)]
impl ImageData {
    /// Small, genuinely decodable PNG for tests.
    pub(crate) fn test_fixture() -> Self {
        let img = image::DynamicImage::new_rgba8(4, 4);
        let mut cursor = std::io::Cursor::new(Vec::new());
        img.write_to(&mut cursor, image::ImageFormat::Png)
            .expect("fixture encodes");
        Self::decode(&cursor.into_inner()).expect("fixture decodes")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized (trimmed, lowercased) e-mail address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Email(String);

impl Email {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_lowercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Credits(pub u32);

impl Credits {
    #[must_use]
    pub const fn is_exhausted(self) -> bool {
        self.0 == 0
    }

    /// Balance after one analysis.
    #[must_use]
    pub const fn debited(self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An authenticated account as the core holds it. The password never
/// enters this type; it exists only in transit, verifier-derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub email: Email,
    pub credits: Credits,
}

impl Account {
    #[must_use]
    pub fn is_reserved(&self, reserved_email: &Email) -> bool {
        &self.email == reserved_email
    }
}

/// One generated dossier. Produced whole, replaced whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub title: String,
    /// Trust score, 0-100 by convention (not enforced).
    pub score: f64,
    pub red_flags: Vec<String>,
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Alert,
}

/// The single user-facing banner slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn alert(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Alert,
            message: message.into(),
        }
    }
}

pub mod app {
    use std::sync::Arc;

    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Serialize};
    use url::Url;
    use uuid::Uuid;

    use super::{
        Account, AccountId, AppError, AppResult, Credits, Email, ErrorKind, ImageData, Notice,
        Report, DEFAULT_CHECKOUT_URL, DEFAULT_COMPLETION_BASE, DEFAULT_RESERVED_EMAIL,
        DEFAULT_STORE_BASE,
    };
    use crate::accounts::{
        self, CredentialVerifier, DebitRequest, DebitResponse, LookupRequest, LookupResponse,
        PlaintextVerifier, UpdateRequest, UpdateResponse,
    };
    use crate::analysis::{self, AnalysisMode, CompletionResponse};
    use crate::capabilities::Capabilities;
    use crate::scan::{self, LogEntry, ScanScript, ScanState};

    /// Runtime configuration. Keys arrive from the shell as plain strings
    /// and live here as secrets; they are never serialized back out.
    #[derive(Clone)]
    pub struct Config {
        pub completion_base: String,
        pub completion_key: SecretString,
        pub store_base: String,
        pub store_key: SecretString,
        pub checkout_url: String,
        pub reserved_email: Email,
        pub verifier: Arc<dyn CredentialVerifier>,
    }

    impl Default for Config {
        fn default() -> Self {
            Self {
                completion_base: DEFAULT_COMPLETION_BASE.into(),
                completion_key: SecretString::new(String::new()),
                store_base: DEFAULT_STORE_BASE.into(),
                store_key: SecretString::new(String::new()),
                checkout_url: DEFAULT_CHECKOUT_URL.into(),
                reserved_email: Email::new(DEFAULT_RESERVED_EMAIL),
                verifier: Arc::new(PlaintextVerifier),
            }
        }
    }

    impl Config {
        #[must_use]
        pub fn has_completion_key(&self) -> bool {
            !self.completion_key.expose_secret().is_empty()
        }

        pub fn apply(&mut self, update: ShellConfig) {
            if let Some(v) = update.completion_base {
                Self::accept_url(&mut self.completion_base, v, "completion_base");
            }
            if let Some(v) = update.completion_key {
                self.completion_key = SecretString::new(v);
            }
            if let Some(v) = update.store_base {
                Self::accept_url(&mut self.store_base, v, "store_base");
            }
            if let Some(v) = update.store_key {
                self.store_key = SecretString::new(v);
            }
            if let Some(v) = update.checkout_url {
                Self::accept_url(&mut self.checkout_url, v, "checkout_url");
            }
            if let Some(v) = update.reserved_email {
                self.reserved_email = Email::new(v);
            }
        }

        fn accept_url(slot: &mut String, candidate: String, field: &'static str) {
            match Url::parse(&candidate) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => *slot = candidate,
                _ => tracing::warn!(field, "ignoring invalid URL in shell config"),
            }
        }
    }

    impl std::fmt::Debug for Config {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("Config")
                .field("completion_base", &self.completion_base)
                .field("completion_key", &"[REDACTED]")
                .field("store_base", &self.store_base)
                .field("store_key", &"[REDACTED]")
                .field("checkout_url", &self.checkout_url)
                .field("reserved_email", &self.reserved_email)
                .field("verifier", &self.verifier.scheme())
                .finish()
        }
    }

    /// Configuration as the shell delivers it at startup.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ShellConfig {
        #[serde(default)]
        pub completion_base: Option<String>,
        #[serde(default)]
        pub completion_key: Option<String>,
        #[serde(default)]
        pub store_base: Option<String>,
        #[serde(default)]
        pub store_key: Option<String>,
        #[serde(default)]
        pub checkout_url: Option<String>,
        #[serde(default)]
        pub reserved_email: Option<String>,
    }

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct LoginForm {
        pub error: Option<String>,
        pub in_flight: bool,
    }

    /// Everything that only exists while someone is signed in.
    #[derive(Debug, Clone)]
    pub struct Session {
        pub account: Account,
        pub report: Option<Report>,
        pub analysis_in_flight: Option<Uuid>,
    }

    impl Session {
        #[must_use]
        pub fn new(account: Account) -> Self {
            Self {
                account,
                report: None,
                analysis_in_flight: None,
            }
        }
    }

    /// The screen is the whole router. Variants own the data that only
    /// makes sense on them, so a dashboard without an account (or a locked
    /// paywall without a dossier) cannot be constructed.
    #[derive(Debug, Clone, Default)]
    pub enum Screen {
        #[default]
        Landing,
        Login {
            form: LoginForm,
        },
        Upload,
        Scanning {
            scan: ScanState,
        },
        Locked {
            report: Report,
        },
        Dashboard {
            session: Session,
        },
        /// Legacy screen from an earlier funnel revision; folds into
        /// Dashboard before any event is handled.
        Result {
            session: Session,
        },
    }

    impl Screen {
        #[must_use]
        pub const fn name(&self) -> &'static str {
            match self {
                Self::Landing => "landing",
                Self::Login { .. } => "login",
                Self::Upload => "upload",
                Self::Scanning { .. } => "scanning",
                Self::Locked { .. } => "locked",
                Self::Dashboard { .. } => "dashboard",
                Self::Result { .. } => "result",
            }
        }
    }

    #[derive(Debug, Default)]
    pub struct Model {
        pub screen: Screen,
        pub selected_image: Option<ImageData>,
        pub logs: scan::LogFeed,
        pub notice: Option<Notice>,
        pub config: Config,
    }

    impl Model {
        fn fold_legacy_result(&mut self) {
            if matches!(self.screen, Screen::Result { .. }) {
                if let Screen::Result { session } = std::mem::take(&mut self.screen) {
                    tracing::debug!("folding legacy result screen into dashboard");
                    self.screen = Screen::Dashboard { session };
                }
            }
        }

        fn clear_session_data(&mut self) {
            self.selected_image = None;
            self.logs.clear();
            self.notice = None;
        }
    }

    #[derive(Serialize, Deserialize)]
    pub enum Event {
        Configured(ShellConfig),

        // Funnel navigation
        StartPressed,
        GoToLogin,
        BackPressed,
        ResetPressed,
        OpenCheckout,
        NoticeDismissed,

        // Scan flow
        ImageSelected {
            #[serde(with = "serde_bytes")]
            data: Vec<u8>,
        },
        ScanTick,
        #[serde(skip)]
        TeaserReportArrived {
            request_id: Uuid,
            result: crux_http::Result<crux_http::Response<CompletionResponse>>,
        },

        // Authentication
        LoginSubmitted {
            email: String,
            password: String,
        },
        #[serde(skip)]
        LoginArrived(crux_http::Result<crux_http::Response<LookupResponse>>),
        LogoutPressed,

        // Dashboard
        RunRealAnalysis,
        #[serde(skip)]
        RealReportArrived {
            request_id: Uuid,
            result: crux_http::Result<crux_http::Response<CompletionResponse>>,
        },
        #[serde(skip)]
        DebitArrived(crux_http::Result<crux_http::Response<DebitResponse>>),
        ChangePasswordSubmitted {
            new_password: String,
        },
        #[serde(skip)]
        ChangePasswordArrived(crux_http::Result<crux_http::Response<UpdateResponse>>),
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ViewModel {
        pub screen: ScreenView,
        pub notice: Option<Notice>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "screen", rename_all = "snake_case")]
    pub enum ScreenView {
        Landing,
        Login {
            error: Option<String>,
            in_flight: bool,
        },
        Upload,
        Scanning {
            progress: u8,
            lines: Vec<LogEntry>,
            shake: bool,
        },
        Locked {
            flag_count: usize,
            checkout_url: String,
        },
        Dashboard {
            email: String,
            credits: String,
            has_image: bool,
            busy: bool,
            report: Option<Report>,
        },
    }

    #[derive(Default)]
    pub struct App;

    impl crux_core::App for App {
        type Event = Event;
        type Model = Model;
        type ViewModel = ViewModel;
        type Capabilities = Capabilities;

        fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
            model.fold_legacy_result();

            match event {
                Event::Configured(update) => model.config.apply(update),

                Event::StartPressed => {
                    if matches!(model.screen, Screen::Landing) {
                        model.screen = Screen::Upload;
                    } else {
                        tracing::warn!(screen = model.screen.name(), "start pressed off landing");
                    }
                }
                Event::GoToLogin => {
                    if matches!(model.screen, Screen::Landing | Screen::Locked { .. }) {
                        model.screen = Screen::Login {
                            form: LoginForm::default(),
                        };
                    } else {
                        tracing::warn!(screen = model.screen.name(), "login entry not available");
                    }
                }
                Event::BackPressed => {
                    if matches!(model.screen, Screen::Upload | Screen::Login { .. }) {
                        model.screen = Screen::Landing;
                    } else {
                        tracing::warn!(screen = model.screen.name(), "back not available");
                    }
                }
                Event::ResetPressed => {
                    if matches!(model.screen, Screen::Locked { .. }) {
                        model.clear_session_data();
                        model.screen = Screen::Landing;
                    } else {
                        tracing::warn!(screen = model.screen.name(), "reset not available");
                    }
                }
                Event::OpenCheckout => {
                    if matches!(model.screen, Screen::Locked { .. }) {
                        caps.navigate.open(model.config.checkout_url.clone());
                    } else {
                        tracing::warn!(screen = model.screen.name(), "checkout not available");
                    }
                }
                Event::NoticeDismissed => model.notice = None,

                Event::ImageSelected { data } => Self::handle_image_selected(model, caps, &data),
                Event::ScanTick => Self::handle_scan_tick(model, caps),
                Event::TeaserReportArrived { request_id, result } => {
                    Self::handle_teaser_report(model, caps, request_id, result);
                }

                Event::LoginSubmitted { email, password } => {
                    Self::handle_login_submitted(model, caps, &email, password);
                }
                Event::LoginArrived(result) => Self::handle_login_arrived(model, caps, result),
                Event::LogoutPressed => {
                    if matches!(model.screen, Screen::Dashboard { .. }) {
                        tracing::info!("logout");
                        model.clear_session_data();
                        model.screen = Screen::Landing;
                    } else {
                        tracing::warn!(screen = model.screen.name(), "logout without a session");
                    }
                }

                Event::RunRealAnalysis => Self::handle_run_real_analysis(model, caps),
                Event::RealReportArrived { request_id, result } => {
                    Self::handle_real_report(model, caps, request_id, result);
                }
                Event::DebitArrived(result) => Self::handle_debit_arrived(model, result),
                Event::ChangePasswordSubmitted { new_password } => {
                    Self::handle_change_password(model, caps, new_password);
                }
                Event::ChangePasswordArrived(result) => {
                    Self::handle_password_arrived(model, result);
                }
            }

            caps.render.render();
        }

        fn view(&self, model: &Model) -> ViewModel {
            let screen = match &model.screen {
                Screen::Landing => ScreenView::Landing,
                Screen::Upload => ScreenView::Upload,
                Screen::Login { form } => ScreenView::Login {
                    error: form.error.clone(),
                    in_flight: form.in_flight,
                },
                Screen::Scanning { scan } => ScreenView::Scanning {
                    progress: scan.progress(),
                    lines: model.logs.entries().to_vec(),
                    shake: model.logs.last_alert(),
                },
                Screen::Locked { report } => ScreenView::Locked {
                    flag_count: report.red_flags.len(),
                    checkout_url: model.config.checkout_url.clone(),
                },
                Screen::Dashboard { session } | Screen::Result { session } => {
                    let reserved = session.account.is_reserved(&model.config.reserved_email);
                    ScreenView::Dashboard {
                        email: session.account.email.to_string(),
                        credits: if reserved {
                            "ilimitado".into()
                        } else {
                            session.account.credits.to_string()
                        },
                        has_image: model.selected_image.is_some(),
                        busy: session.analysis_in_flight.is_some(),
                        report: session.report.clone(),
                    }
                }
            };

            ViewModel {
                screen,
                notice: model.notice.clone(),
            }
        }
    }

    impl App {
        fn handle_image_selected(model: &mut Model, caps: &Capabilities, data: &[u8]) {
            let image = match ImageData::decode(data) {
                Ok(image) => image,
                Err(err) => {
                    let err = AppError::from(err);
                    tracing::warn!(code = err.code(), "rejected selected image");
                    model.notice = Some(Notice::alert(err.user_facing_message()));
                    return;
                }
            };

            if let Screen::Dashboard { session } = &mut model.screen {
                // A new target invalidates the previous dossier; running the
                // analysis stays a manual trigger.
                session.report = None;
                model.selected_image = Some(image);
                return;
            }

            if matches!(model.screen, Screen::Upload) {
                Self::begin_scan(model, caps, image);
            } else {
                tracing::warn!(
                    screen = model.screen.name(),
                    "image selected on a screen that does not accept one"
                );
            }
        }

        fn begin_scan(model: &mut Model, caps: &Capabilities, image: ImageData) {
            model.logs.clear();
            model.notice = None;

            let request_id = Uuid::new_v4();
            let mut scan = ScanState::new(ScanScript::funnel(), request_id);

            if model.config.has_completion_key() {
                Self::send_completion_request(
                    &image,
                    AnalysisMode::Teaser,
                    request_id,
                    &model.config,
                    caps,
                );
            } else {
                // A missing key is one of the masked teaser failures: the
                // scan plays out and lands on the fallback dossier.
                scan.record_outcome(Ok(analysis::resolve_teaser(Err(AppError::new(
                    ErrorKind::AnalysisFailed,
                    "completion API key is not configured",
                )))));
            }

            if let Some(delay) = scan.next_delay() {
                caps.delay.after(delay, Event::ScanTick);
            }

            tracing::info!(request_id = %request_id, "scan started");
            model.selected_image = Some(image);
            model.screen = Screen::Scanning { scan };
        }

        fn handle_scan_tick(model: &mut Model, caps: &Capabilities) {
            let Screen::Scanning { scan } = &mut model.screen else {
                tracing::debug!("dropping scan tick outside scanning screen");
                return;
            };

            let Some(step) = scan.advance() else {
                return;
            };
            model.logs.append(step.message.clone(), step.is_alert());
            if let Some(signal) = step.signal {
                caps.haptics.pulse(signal.haptic_pattern);
            }

            if let Some(delay) = scan.next_delay() {
                caps.delay.after(delay, Event::ScanTick);
            } else {
                Self::try_finish_scan(model);
            }
        }

        fn handle_teaser_report(
            model: &mut Model,
            _caps: &Capabilities,
            request_id: Uuid,
            result: crux_http::Result<crux_http::Response<CompletionResponse>>,
        ) {
            let recorded = match &mut model.screen {
                Screen::Scanning { scan } if scan.request_id() == request_id => {
                    let outcome = Self::json_body(result).and_then(|body| {
                        analysis::report_from_response(&body).map_err(AppError::from)
                    });
                    // Fail-open: whatever happened, the scan receives a dossier.
                    scan.record_outcome(Ok(analysis::resolve_teaser(outcome)));
                    true
                }
                _ => false,
            };

            if recorded {
                Self::try_finish_scan(model);
            } else {
                tracing::debug!("dropping stale teaser report response");
            }
        }

        /// The join point of the scripted animation and the background call.
        fn try_finish_scan(model: &mut Model) {
            let outcome = {
                let Screen::Scanning { scan } = &mut model.screen else {
                    return;
                };
                match scan.take_outcome() {
                    Some(outcome) => outcome,
                    // Script done but the call is still pending, or the call
                    // resolved with steps left to play: keep waiting.
                    None => return,
                }
            };

            match outcome {
                Ok(report) => {
                    tracing::info!("scan complete, dossier locked");
                    model.screen = Screen::Locked { report };
                }
                Err(err) => {
                    // No automatic recovery: the terminal shows the failure
                    // and the screen stays put.
                    tracing::error!(code = err.code(), "scan join failed");
                    model.logs.append(scan::FAILURE_LINE, true);
                }
            }
        }

        fn handle_login_submitted(
            model: &mut Model,
            caps: &Capabilities,
            email: &str,
            password: String,
        ) {
            let screen_name = model.screen.name();
            let Screen::Login { form } = &mut model.screen else {
                tracing::warn!(screen = screen_name, "login submitted outside login screen");
                return;
            };

            if email.trim().is_empty() || password.is_empty() {
                form.error = Some(
                    AppError::new(ErrorKind::Validation, "Informe e-mail e senha.")
                        .user_facing_message(),
                );
                return;
            }
            form.in_flight = true;
            form.error = None;

            let email = Email::new(email);
            let derived = model.config.verifier.derive(&SecretString::new(password));
            tracing::debug!(scheme = model.config.verifier.scheme(), "credential lookup");
            Self::send_lookup_request(&email, derived, &model.config, caps);
        }

        fn handle_login_arrived(
            model: &mut Model,
            caps: &Capabilities,
            result: crux_http::Result<crux_http::Response<LookupResponse>>,
        ) {
            if !matches!(model.screen, Screen::Login { .. }) {
                tracing::debug!("dropping login response outside login screen");
                return;
            }

            match Self::json_body(result) {
                Err(err) => {
                    tracing::warn!(error = %err, "credential lookup failed");
                    Self::finish_login(model, Some(err.user_facing_message()));
                }
                Ok(LookupResponse { account: None }) => {
                    let err = AppError::new(
                        ErrorKind::InvalidCredentials,
                        "no account matched the credential pair",
                    );
                    Self::finish_login(model, Some(err.user_facing_message()));
                }
                Ok(LookupResponse {
                    account: Some(document),
                }) => {
                    let account = Account::from(document);
                    if account.credits.is_exhausted()
                        && !account.is_reserved(&model.config.reserved_email)
                    {
                        // Valid credentials, empty balance: the account never
                        // reaches the dashboard, it is sent to checkout.
                        Self::finish_login(model, None);
                        model.notice = Some(Notice::alert(
                            AppError::new(ErrorKind::InsufficientCredits, "zero balance")
                                .user_facing_message(),
                        ));
                        caps.navigate.open(model.config.checkout_url.clone());
                    } else {
                        tracing::info!(account = %account.id, "login succeeded");
                        model.screen = Screen::Dashboard {
                            session: Session::new(account),
                        };
                    }
                }
            }
        }

        fn finish_login(model: &mut Model, error: Option<String>) {
            if let Screen::Login { form } = &mut model.screen {
                form.in_flight = false;
                form.error = error;
            }
        }

        fn handle_run_real_analysis(model: &mut Model, caps: &Capabilities) {
            let screen_name = model.screen.name();
            let Screen::Dashboard { session } = &mut model.screen else {
                tracing::warn!(screen = screen_name, "real analysis requested outside dashboard");
                return;
            };
            if session.analysis_in_flight.is_some() {
                tracing::debug!("analysis already in flight");
                return;
            }

            let Some(image) = model.selected_image.clone() else {
                model.notice = Some(Notice::alert(
                    AppError::new(ErrorKind::Validation, "Selecione uma imagem para analisar.")
                        .user_facing_message(),
                ));
                return;
            };

            let reserved = session.account.is_reserved(&model.config.reserved_email);
            if !reserved && session.account.credits.is_exhausted() {
                // Rejected before the report client is ever invoked.
                model.notice = Some(Notice::alert(
                    AppError::new(ErrorKind::InsufficientCredits, "zero balance")
                        .user_facing_message(),
                ));
                caps.navigate.open(model.config.checkout_url.clone());
                return;
            }

            if !model.config.has_completion_key() {
                // Real mode fails closed; there is no masked fallback here.
                model.notice = Some(Notice::alert(
                    AppError::new(ErrorKind::AnalysisFailed, "completion API key missing")
                        .user_facing_message(),
                ));
                return;
            }

            let request_id = Uuid::new_v4();
            session.analysis_in_flight = Some(request_id);
            tracing::info!(request_id = %request_id, "real analysis started");
            Self::send_completion_request(
                &image,
                AnalysisMode::Real,
                request_id,
                &model.config,
                caps,
            );
        }

        fn handle_real_report(
            model: &mut Model,
            caps: &Capabilities,
            request_id: Uuid,
            result: crux_http::Result<crux_http::Response<CompletionResponse>>,
        ) {
            let outcome = Self::json_body(result)
                .and_then(|body| analysis::report_from_response(&body).map_err(AppError::from));

            let Screen::Dashboard { session } = &mut model.screen else {
                tracing::debug!("dropping real analysis response outside dashboard");
                return;
            };
            if session.analysis_in_flight != Some(request_id) {
                tracing::debug!("dropping stale real analysis response");
                return;
            }
            session.analysis_in_flight = None;

            match outcome {
                Ok(report) => {
                    session.report = Some(report);
                    if session.account.is_reserved(&model.config.reserved_email) {
                        tracing::debug!("reserved account, balance untouched");
                    } else {
                        session.account.credits = session.account.credits.debited();
                        Self::send_debit_request(&session.account.id, &model.config, caps);
                    }
                }
                Err(err) => {
                    // A failed analysis never consumes a credit.
                    tracing::warn!(error = %err, "real analysis failed");
                    model.notice = Some(Notice::alert(
                        AppError::new(ErrorKind::AnalysisFailed, "report generation failed")
                            .user_facing_message(),
                    ));
                }
            }
        }

        fn handle_debit_arrived(
            model: &mut Model,
            result: crux_http::Result<crux_http::Response<DebitResponse>>,
        ) {
            let Screen::Dashboard { session } = &mut model.screen else {
                tracing::debug!("dropping debit response outside dashboard");
                return;
            };

            match Self::json_body(result) {
                Ok(DebitResponse { credits, debited }) => {
                    if !debited {
                        tracing::warn!("store refused the debit (balance already zero)");
                    }
                    // The store's answer is authoritative.
                    session.account.credits = Credits(credits);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "credit debit failed, balance may be stale");
                    model.notice = Some(Notice::info("Não foi possível sincronizar seu saldo."));
                }
            }
        }

        fn handle_change_password(model: &mut Model, caps: &Capabilities, new_password: String) {
            let screen_name = model.screen.name();
            let Screen::Dashboard { session } = &mut model.screen else {
                tracing::warn!(screen = screen_name, "password change outside dashboard");
                return;
            };

            if new_password.is_empty() {
                model.notice = Some(Notice::alert(
                    AppError::new(ErrorKind::Validation, "Informe a nova senha.")
                        .user_facing_message(),
                ));
                return;
            }

            let derived = model
                .config
                .verifier
                .derive(&SecretString::new(new_password));
            Self::send_password_update(&session.account.id, derived, &model.config, caps);
        }

        fn handle_password_arrived(
            model: &mut Model,
            result: crux_http::Result<crux_http::Response<UpdateResponse>>,
        ) {
            if !matches!(model.screen, Screen::Dashboard { .. }) {
                tracing::debug!("dropping password update response outside dashboard");
                return;
            }

            match Self::json_body::<UpdateResponse>(result) {
                Ok(response) if response.ok => {
                    model.notice = Some(Notice::info("Senha atualizada."));
                }
                Ok(_) => {
                    model.notice = Some(Notice::alert(
                        AppError::new(ErrorKind::Unknown, "store refused the update")
                            .user_facing_message(),
                    ));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "password update failed");
                    model.notice = Some(Notice::alert(err.user_facing_message()));
                }
            }
        }

        fn send_completion_request(
            image: &ImageData,
            mode: AnalysisMode,
            request_id: Uuid,
            config: &Config,
            caps: &Capabilities,
        ) {
            let url = analysis::completion_url(&config.completion_base);
            let body = analysis::completion_request(image, mode).to_string();

            let request = caps
                .http
                .post(&url)
                .header("content-type", "application/json")
                .header("x-goog-api-key", config.completion_key.expose_secret().as_str())
                .body(body)
                .expect_json::<CompletionResponse>();

            match mode {
                AnalysisMode::Teaser => request.send(move |result| Event::TeaserReportArrived {
                    request_id,
                    result,
                }),
                AnalysisMode::Real => request.send(move |result| Event::RealReportArrived {
                    request_id,
                    result,
                }),
            }
        }

        fn send_lookup_request(
            email: &Email,
            derived_password: String,
            config: &Config,
            caps: &Capabilities,
        ) {
            let request = LookupRequest {
                email: email.to_string(),
                password: derived_password,
            };
            let body = match serde_json::to_string(&request) {
                Ok(body) => body,
                Err(err) => {
                    tracing::error!(error = %err, "lookup body serialization failed");
                    return;
                }
            };

            let mut builder = caps
                .http
                .post(&accounts::lookup_url(&config.store_base))
                .header("content-type", "application/json");
            if !config.store_key.expose_secret().is_empty() {
                builder = builder.header("x-api-key", config.store_key.expose_secret().as_str());
            }
            builder
                .body(body)
                .expect_json::<LookupResponse>()
                .send(Event::LoginArrived);
        }

        fn send_debit_request(account_id: &AccountId, config: &Config, caps: &Capabilities) {
            let body = match serde_json::to_string(&DebitRequest::one()) {
                Ok(body) => body,
                Err(err) => {
                    tracing::error!(error = %err, "debit body serialization failed");
                    return;
                }
            };

            let mut builder = caps
                .http
                .post(&accounts::debit_url(&config.store_base, account_id))
                .header("content-type", "application/json");
            if !config.store_key.expose_secret().is_empty() {
                builder = builder.header("x-api-key", config.store_key.expose_secret().as_str());
            }
            builder
                .body(body)
                .expect_json::<DebitResponse>()
                .send(Event::DebitArrived);
        }

        fn send_password_update(
            account_id: &AccountId,
            derived_password: String,
            config: &Config,
            caps: &Capabilities,
        ) {
            let request = UpdateRequest {
                password: Some(derived_password),
            };
            let body = match serde_json::to_string(&request) {
                Ok(body) => body,
                Err(err) => {
                    tracing::error!(error = %err, "update body serialization failed");
                    return;
                }
            };

            let mut builder = caps
                .http
                .post(&accounts::update_url(&config.store_base, account_id))
                .header("content-type", "application/json");
            if !config.store_key.expose_secret().is_empty() {
                builder = builder.header("x-api-key", config.store_key.expose_secret().as_str());
            }
            builder
                .body(body)
                .expect_json::<UpdateResponse>()
                .send(Event::ChangePasswordArrived);
        }

        /// Maps a shell HTTP result to the parsed body or an [`AppError`].
        fn json_body<T>(result: crux_http::Result<crux_http::Response<T>>) -> AppResult<T> {
            match result {
                Ok(mut response) => {
                    let status: u16 = response.status().into();
                    if (200..300).contains(&status) {
                        response.take_body().ok_or_else(|| {
                            AppError::new(ErrorKind::Deserialization, "response body missing")
                        })
                    } else {
                        Err(AppError::new(
                            ErrorKind::Network,
                            format!("unexpected status {status}"),
                        ))
                    }
                }
                Err(err) => Err(AppError::new(ErrorKind::Network, "request failed")
                    .with_internal(err.to_string())),
            }
        }
    }
}
