//! Authenticated dashboard flows: credential lookup, credit discipline,
//! real-mode analysis, password change.

use std::sync::Arc;

use aletheia_core::accounts::{
    AccountDocument, CredentialVerifier, DebitResponse, LookupResponse, UpdateResponse,
};
use aletheia_core::analysis::{Candidate, CompletionResponse, Content, Part};
use aletheia_core::{
    App, Credits, Effect, Event, Model, NoticeLevel, Screen, ScreenView, ShellConfig,
};
use assert_matches::assert_matches;
use crux_core::testing::AppTester;
use crux_core::App as _;
use crux_http::testing::ResponseBuilder;
use secrecy::{ExposeSecret, SecretString};

fn png_bytes() -> Vec<u8> {
    let img = image::DynamicImage::new_rgba8(4, 4);
    let mut cursor = std::io::Cursor::new(Vec::new());
    img.write_to(&mut cursor, image::ImageFormat::Png)
        .expect("fixture encodes");
    cursor.into_inner()
}

fn dossier_body() -> CompletionResponse {
    CompletionResponse {
        candidates: vec![Candidate {
            content: Content {
                parts: vec![Part {
                    text: Some(
                        r#"{
                            "titulo_principal": "DOSSIÊ COMPLETO",
                            "pontuacao_confiabilidade": 41,
                            "red_flags": ["Sinal um", "Sinal dois"],
                            "analise_detalhada": "Análise técnica em tópicos."
                        }"#
                        .into(),
                    ),
                }],
            },
        }],
    }
}

fn garbage_body() -> CompletionResponse {
    CompletionResponse {
        candidates: vec![Candidate {
            content: Content {
                parts: vec![Part {
                    text: Some("not a dossier".into()),
                }],
            },
        }],
    }
}

fn configure(app: &AppTester<App, Effect>, model: &mut Model, reserved: Option<&str>) {
    app.update(
        Event::Configured(ShellConfig {
            completion_key: Some("k-test".into()),
            reserved_email: reserved.map(str::to_string),
            ..Default::default()
        }),
        model,
    );
}

fn login_as(
    app: &AppTester<App, Effect>,
    model: &mut Model,
    email: &str,
    credits: u32,
) -> crux_core::testing::Update<Effect, Event> {
    app.update(Event::GoToLogin, model);
    app.update(
        Event::LoginSubmitted {
            email: email.into(),
            password: "senha123".into(),
        },
        model,
    );
    let response = ResponseBuilder::ok()
        .body(LookupResponse {
            account: Some(AccountDocument {
                id: "u_1".into(),
                email: email.into(),
                credits,
            }),
        })
        .build();
    app.update(Event::LoginArrived(Ok(response)), model)
}

fn run_analysis_and_respond(
    app: &AppTester<App, Effect>,
    model: &mut Model,
    body: CompletionResponse,
) -> crux_core::testing::Update<Effect, Event> {
    let update = app.update(Event::RunRealAnalysis, model);
    assert!(
        update.effects.iter().any(|e| matches!(e, Effect::Http(_))),
        "real analysis issues the completion request"
    );
    let request_id = match &model.screen {
        Screen::Dashboard { session } => session.analysis_in_flight.expect("in flight"),
        other => panic!("expected dashboard, got {}", other.name()),
    };
    let response = ResponseBuilder::ok().body(body).build();
    app.update(
        Event::RealReportArrived {
            request_id,
            result: Ok(response),
        },
        model,
    )
}

#[test]
fn unknown_credentials_stay_on_login_with_an_inline_error() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    app.update(Event::GoToLogin, &mut model);
    app.update(
        Event::LoginSubmitted {
            email: "quem@example.com".into(),
            password: "errada".into(),
        },
        &mut model,
    );

    let response = ResponseBuilder::ok().body(LookupResponse::default()).build();
    app.update(Event::LoginArrived(Ok(response)), &mut model);

    let Screen::Login { form } = &model.screen else {
        panic!("must remain on login");
    };
    assert_eq!(form.error.as_deref(), Some("E-mail ou senha inválidos."));
    assert!(!form.in_flight);
}

#[test]
fn zero_balance_login_is_sent_to_checkout_not_the_dashboard() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let update = login_as(&app, &mut model, "ana@example.com", 0);

    assert!(
        matches!(model.screen, Screen::Login { .. }),
        "no dashboard without balance"
    );
    assert!(update
        .effects
        .iter()
        .any(|e| matches!(e, Effect::Navigate(_))));
    let notice = model.notice.as_ref().expect("insufficient credits alert");
    assert_eq!(notice.level, NoticeLevel::Alert);
}

#[test]
fn successful_analysis_debits_exactly_one_credit() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    configure(&app, &mut model, None);

    login_as(&app, &mut model, "ana@example.com", 2);
    assert_matches!(model.screen, Screen::Dashboard { .. });

    app.update(Event::ImageSelected { data: png_bytes() }, &mut model);
    assert_matches!(model.screen, Screen::Dashboard { .. });
    assert!(model.selected_image.is_some());

    let update = run_analysis_and_respond(&app, &mut model, dossier_body());

    let Screen::Dashboard { session } = &model.screen else {
        panic!("expected dashboard");
    };
    assert_eq!(session.account.credits, Credits(1));
    assert_eq!(
        session.report.as_ref().map(|r| r.title.as_str()),
        Some("DOSSIÊ COMPLETO")
    );
    assert!(session.analysis_in_flight.is_none());
    assert!(
        update.effects.iter().any(|e| matches!(e, Effect::Http(_))),
        "the conditional debit goes to the store"
    );

    // The store's answer is authoritative for the balance.
    let response = ResponseBuilder::ok()
        .body(DebitResponse {
            credits: 1,
            debited: true,
        })
        .build();
    app.update(Event::DebitArrived(Ok(response)), &mut model);
    let Screen::Dashboard { session } = &model.screen else {
        panic!("expected dashboard");
    };
    assert_eq!(session.account.credits, Credits(1));
}

#[test]
fn failed_analysis_keeps_the_balance_untouched() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    configure(&app, &mut model, None);

    login_as(&app, &mut model, "ana@example.com", 1);
    app.update(Event::ImageSelected { data: png_bytes() }, &mut model);

    let update = run_analysis_and_respond(&app, &mut model, garbage_body());

    let Screen::Dashboard { session } = &model.screen else {
        panic!("expected dashboard");
    };
    assert_eq!(session.account.credits, Credits(1), "no debit on failure");
    assert!(session.report.is_none());
    assert!(session.analysis_in_flight.is_none());
    assert!(
        !update.effects.iter().any(|e| matches!(e, Effect::Http(_))),
        "no store debit after a failed analysis"
    );
    let notice = model.notice.as_ref().expect("analysis failure alert");
    assert_eq!(notice.message, "A análise falhou. Tente novamente.");
}

#[test]
fn second_analysis_is_rejected_before_the_client_runs() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    configure(&app, &mut model, None);

    login_as(&app, &mut model, "ana@example.com", 1);
    app.update(Event::ImageSelected { data: png_bytes() }, &mut model);
    run_analysis_and_respond(&app, &mut model, dossier_body());

    let Screen::Dashboard { session } = &model.screen else {
        panic!("expected dashboard");
    };
    assert_eq!(session.account.credits, Credits(0));

    let update = app.update(Event::RunRealAnalysis, &mut model);
    assert!(
        !update.effects.iter().any(|e| matches!(e, Effect::Http(_))),
        "zero balance is rejected before the report client is invoked"
    );
    assert!(update
        .effects
        .iter()
        .any(|e| matches!(e, Effect::Navigate(_))));
}

#[test]
fn reserved_account_never_pays() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    configure(&app, &mut model, Some("vip@example.com"));

    // Zero balance, yet the reserved account reaches the dashboard.
    login_as(&app, &mut model, "vip@example.com", 0);
    assert_matches!(model.screen, Screen::Dashboard { .. });

    let view = App.view(&model);
    let ScreenView::Dashboard { credits, .. } = view.screen else {
        panic!("expected dashboard view");
    };
    assert_eq!(credits, "ilimitado");

    app.update(Event::ImageSelected { data: png_bytes() }, &mut model);
    let update = run_analysis_and_respond(&app, &mut model, dossier_body());

    let Screen::Dashboard { session } = &model.screen else {
        panic!("expected dashboard");
    };
    assert_eq!(session.account.credits, Credits(0), "balance untouched");
    assert!(session.report.is_some());
    assert!(
        !update.effects.iter().any(|e| matches!(e, Effect::Http(_))),
        "no debit request for the reserved account"
    );
}

#[test]
fn password_change_requires_a_value_and_confirms() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    login_as(&app, &mut model, "ana@example.com", 1);

    let update = app.update(
        Event::ChangePasswordSubmitted {
            new_password: String::new(),
        },
        &mut model,
    );
    assert!(
        !update.effects.iter().any(|e| matches!(e, Effect::Http(_))),
        "empty password fails locally"
    );
    assert!(model.notice.is_some());

    app.update(Event::NoticeDismissed, &mut model);
    let update = app.update(
        Event::ChangePasswordSubmitted {
            new_password: "nova-senha".into(),
        },
        &mut model,
    );
    assert!(update.effects.iter().any(|e| matches!(e, Effect::Http(_))));

    let response = ResponseBuilder::ok().body(UpdateResponse { ok: true }).build();
    app.update(Event::ChangePasswordArrived(Ok(response)), &mut model);
    let notice = model.notice.as_ref().expect("confirmation notice");
    assert_eq!(notice.level, NoticeLevel::Info);
    assert_eq!(notice.message, "Senha atualizada.");
}

#[test]
fn logout_clears_the_whole_session() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    configure(&app, &mut model, None);

    login_as(&app, &mut model, "ana@example.com", 2);
    app.update(Event::ImageSelected { data: png_bytes() }, &mut model);
    run_analysis_and_respond(&app, &mut model, dossier_body());

    app.update(Event::LogoutPressed, &mut model);
    assert_matches!(model.screen, Screen::Landing);
    assert!(model.selected_image.is_none());
    assert!(model.notice.is_none());
}

#[test]
fn the_configured_verifier_derives_the_lookup_password() {
    #[derive(Debug)]
    struct PrefixVerifier;

    impl CredentialVerifier for PrefixVerifier {
        fn derive(&self, plaintext: &SecretString) -> String {
            format!("derived::{}", plaintext.expose_secret())
        }

        fn scheme(&self) -> &'static str {
            "prefix"
        }
    }

    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    model.config.verifier = Arc::new(PrefixVerifier);

    app.update(Event::GoToLogin, &mut model);
    let update = app.update(
        Event::LoginSubmitted {
            email: "ana@example.com".into(),
            password: "senha123".into(),
        },
        &mut model,
    );

    let request = update
        .effects
        .into_iter()
        .find_map(|e| match e {
            Effect::Http(request) => Some(request),
            _ => None,
        })
        .expect("lookup request issued");
    assert!(request.operation.url.contains("accounts:lookup"));
    let body = String::from_utf8(request.operation.body.clone()).unwrap();
    assert!(body.contains("derived::senha123"));
    assert!(!body.contains("\"senha123\""), "raw password never travels");
}
