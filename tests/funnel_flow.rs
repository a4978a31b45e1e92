//! End-to-end teaser funnel: upload, scripted scan, background report,
//! paywall. Drives the app through `AppTester`, resolving delay effects the
//! way a shell would.

use aletheia_core::analysis::{Candidate, CompletionResponse, Content, Part};
use aletheia_core::scan::{ScanScript, ScanState, ScanStep};
use aletheia_core::{App, AppError, Effect, ErrorKind, Event, Model, Screen, ScreenView, ShellConfig};
use crux_core::testing::AppTester;
use crux_core::App as _;
use crux_http::testing::ResponseBuilder;
use uuid::Uuid;

fn png_bytes() -> Vec<u8> {
    let img = image::DynamicImage::new_rgba8(4, 4);
    let mut cursor = std::io::Cursor::new(Vec::new());
    img.write_to(&mut cursor, image::ImageFormat::Png)
        .expect("fixture encodes");
    cursor.into_inner()
}

fn dossier_text() -> String {
    r#"{
        "titulo_principal": "PERFIL DE ALTO RISCO",
        "pontuacao_confiabilidade": 23,
        "red_flags": ["Olhar evasivo", "Sorriso incongruente", "Tensão mandibular"],
        "analise_detalhada": "Texto longo do dossiê."
    }"#
    .to_string()
}

fn completion_body(text: &str) -> CompletionResponse {
    CompletionResponse {
        candidates: vec![Candidate {
            content: Content {
                parts: vec![Part {
                    text: Some(text.to_string()),
                }],
            },
        }],
    }
}

fn configure_key(app: &AppTester<App, Effect>, model: &mut Model) {
    app.update(
        Event::Configured(ShellConfig {
            completion_key: Some("k-test".into()),
            ..Default::default()
        }),
        model,
    );
}

/// Resolves the pending delay effect and feeds the resulting tick back in,
/// returning the update produced by the tick.
fn play_one_step(
    app: &AppTester<App, Effect>,
    model: &mut Model,
    update: crux_core::testing::Update<Effect, Event>,
) -> crux_core::testing::Update<Effect, Event> {
    let mut delay = update
        .effects
        .into_iter()
        .find_map(|e| match e {
            Effect::Delay(request) => Some(request),
            _ => None,
        })
        .expect("a delay should be scheduled");
    let resolved = app.resolve(&mut delay, ()).expect("delay resolves");
    let tick = resolved
        .events
        .into_iter()
        .next()
        .expect("delay produces a tick");
    app.update(tick, model)
}

#[test]
fn teaser_funnel_runs_to_the_paywall_without_a_key() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    app.update(Event::StartPressed, &mut model);
    assert!(matches!(model.screen, Screen::Upload));

    // Without a completion key the teaser fails open immediately; the scan
    // still plays the full script before anything is shown.
    let mut update = app.update(Event::ImageSelected { data: png_bytes() }, &mut model);

    let mut seen_progress = Vec::new();
    for _ in 0..7 {
        update = play_one_step(&app, &mut model, update);
        if let Screen::Scanning { scan } = &model.screen {
            seen_progress.push(scan.progress());
        }
    }

    assert_eq!(seen_progress, vec![10, 30, 45, 60, 75, 90]);
    assert!(
        seen_progress.windows(2).all(|w| w[0] <= w[1]),
        "progress must never regress"
    );

    // The last step joins with the (fallback) outcome and locks the dossier.
    let Screen::Locked { report } = &model.screen else {
        panic!("expected locked paywall, got {}", model.screen.name());
    };
    assert_eq!(report.red_flags.len(), 3);

    let script = ScanScript::funnel();
    let expected: Vec<&str> = script
        .steps()
        .iter()
        .map(|s| s.message.as_str())
        .collect();
    assert_eq!(model.logs.texts(), expected);

    let view = App.view(&model);
    let ScreenView::Locked { flag_count, .. } = view.screen else {
        panic!("expected locked view");
    };
    assert_eq!(flag_count, 3);
}

#[test]
fn slow_report_joins_after_the_script_finishes() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    configure_key(&app, &mut model);

    app.update(Event::StartPressed, &mut model);
    let mut update = app.update(Event::ImageSelected { data: png_bytes() }, &mut model);
    assert!(
        update.effects.iter().any(|e| matches!(e, Effect::Http(_))),
        "the teaser call starts with the scan"
    );

    for _ in 0..7 {
        update = play_one_step(&app, &mut model, update);
    }

    // Script done, call still pending: the scan waits at the join.
    let request_id = match &model.screen {
        Screen::Scanning { scan } => {
            assert_eq!(scan.progress(), 100);
            assert!(scan.script_finished());
            scan.request_id()
        }
        other => panic!("expected scanning, got {}", other.name()),
    };

    let response = ResponseBuilder::ok()
        .body(completion_body(&dossier_text()))
        .build();
    app.update(
        Event::TeaserReportArrived {
            request_id,
            result: Ok(response),
        },
        &mut model,
    );

    let Screen::Locked { report } = &model.screen else {
        panic!("expected locked paywall after the join");
    };
    assert_eq!(report.title, "PERFIL DE ALTO RISCO");
}

#[test]
fn fast_report_still_waits_for_the_full_script() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    configure_key(&app, &mut model);

    app.update(Event::StartPressed, &mut model);
    let mut update = app.update(Event::ImageSelected { data: png_bytes() }, &mut model);

    // One step in, the report arrives early.
    update = play_one_step(&app, &mut model, update);
    let request_id = match &model.screen {
        Screen::Scanning { scan } => scan.request_id(),
        other => panic!("expected scanning, got {}", other.name()),
    };
    let response = ResponseBuilder::ok()
        .body(completion_body(&dossier_text()))
        .build();
    app.update(
        Event::TeaserReportArrived {
            request_id,
            result: Ok(response),
        },
        &mut model,
    );
    assert!(
        matches!(model.screen, Screen::Scanning { .. }),
        "the animation always finishes regardless of call speed"
    );

    for _ in 0..6 {
        update = play_one_step(&app, &mut model, update);
    }
    let _ = update;

    assert!(matches!(model.screen, Screen::Locked { .. }));
    assert_eq!(model.logs.len(), 7, "every scripted line, exactly once");
}

#[test]
fn teaser_failures_are_masked_behind_the_fallback_dossier() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    configure_key(&app, &mut model);

    app.update(Event::StartPressed, &mut model);
    let mut update = app.update(Event::ImageSelected { data: png_bytes() }, &mut model);
    for _ in 0..7 {
        update = play_one_step(&app, &mut model, update);
    }

    let request_id = match &model.screen {
        Screen::Scanning { scan } => scan.request_id(),
        other => panic!("expected scanning, got {}", other.name()),
    };

    // The service answered, but with something that is not a dossier.
    let response = ResponseBuilder::ok()
        .body(completion_body("not a dossier at all"))
        .build();
    app.update(
        Event::TeaserReportArrived {
            request_id,
            result: Ok(response),
        },
        &mut model,
    );

    // The funnel never blocks: the paywall locks over the fallback dossier.
    let Screen::Locked { report } = &model.screen else {
        panic!("teaser mode must fail open");
    };
    assert_eq!(*report, aletheia_core::analysis::fallback_report());
    assert_eq!(report.red_flags.len(), 3);
}

#[test]
fn stale_report_responses_are_dropped() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    configure_key(&app, &mut model);

    app.update(Event::StartPressed, &mut model);
    let mut update = app.update(Event::ImageSelected { data: png_bytes() }, &mut model);

    let response = ResponseBuilder::ok()
        .body(completion_body(&dossier_text()))
        .build();
    app.update(
        Event::TeaserReportArrived {
            request_id: Uuid::new_v4(),
            result: Ok(response),
        },
        &mut model,
    );

    for _ in 0..7 {
        update = play_one_step(&app, &mut model, update);
    }

    // The mismatched response never joined; the scan keeps waiting on the
    // genuine call (which is never cancelled, and never times out).
    assert!(matches!(model.screen, Screen::Scanning { .. }));
    assert_eq!(model.logs.len(), 7);
}

#[test]
fn three_step_script_plays_in_order_and_locks() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let script = ScanScript::new(vec![
        ScanStep::new(10, "A"),
        ScanStep::new(45, "B"),
        ScanStep::new(100, "C"),
    ])
    .unwrap();
    let mut scan = ScanState::new(script, Uuid::new_v4());
    scan.record_outcome(Ok(aletheia_core::analysis::fallback_report()));
    model.screen = Screen::Scanning { scan };

    app.update(Event::ScanTick, &mut model);
    app.update(Event::ScanTick, &mut model);
    if let Screen::Scanning { scan } = &model.screen {
        assert_eq!(scan.progress(), 45);
    }
    app.update(Event::ScanTick, &mut model);

    assert_eq!(model.logs.texts(), vec!["A", "B", "C"]);
    assert!(matches!(model.screen, Screen::Locked { .. }));
}

#[test]
fn propagated_join_failure_logs_and_stays_on_scanning() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();

    let script = ScanScript::new(vec![ScanStep::new(100, "único passo")]).unwrap();
    let mut scan = ScanState::new(script, Uuid::new_v4());
    scan.record_outcome(Err(AppError::new(ErrorKind::AnalysisFailed, "hard failure")));
    model.screen = Screen::Scanning { scan };

    app.update(Event::ScanTick, &mut model);

    assert!(
        matches!(model.screen, Screen::Scanning { .. }),
        "no automatic recovery from a propagated failure"
    );
    let last = model.logs.entries().last().expect("terminal line");
    assert_eq!(last.text, aletheia_core::scan::FAILURE_LINE);
    assert!(last.alert);
}
