//! The scripted scan: a fixed sequence of timed terminal lines and progress
//! marks played while the teaser analysis runs in the background.
//!
//! The script and the remote call are deliberately independent. The script
//! advances on shell-resolved delays at its own cadence; the call resolves
//! whenever it resolves; the two meet only at [`ScanState::take_outcome`]
//! once the last step has played. The animation therefore always runs to
//! completion, however fast or slow the remote service is.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{AppError, Report};

/// Pause before each step of the funnel script.
pub const STEP_CADENCE: Duration = Duration::from_millis(1500);

/// Terminal line appended when the background call propagates a failure
/// into the final join.
pub const FAILURE_LINE: &str = "ERRO CRÍTICO NO SISTEMA.";

/// Side-signals fired when a step lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSignal {
    /// Alternating vibrate/pause durations, in milliseconds.
    pub haptic_pattern: Vec<u64>,
    /// Shell hint to shake the scan viewport.
    pub shake: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStep {
    pub delay: Duration,
    /// Declared progress after this step, 0..=100.
    pub progress: u8,
    pub message: String,
    pub signal: Option<StepSignal>,
}

impl ScanStep {
    #[must_use]
    pub fn new(progress: u8, message: impl Into<String>) -> Self {
        Self {
            delay: STEP_CADENCE,
            progress,
            message: message.into(),
            signal: None,
        }
    }

    #[must_use]
    pub fn with_signal(mut self, signal: StepSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    #[must_use]
    pub fn is_alert(&self) -> bool {
        self.signal.as_ref().map_or(false, |s| s.shake)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("scan script must contain at least one step")]
    Empty,
    #[error("progress {progress} at step {index} is above 100")]
    ProgressOutOfRange { index: usize, progress: u8 },
    #[error("progress regresses at step {index}: {prev} -> {next}")]
    ProgressRegression { index: usize, prev: u8, next: u8 },
    #[error("scan script must end at 100, ends at {last}")]
    BadTerminalProgress { last: u8 },
}

/// An ordered, validated scan script.
///
/// Invariants enforced at construction: at least one step, progress is
/// monotonically non-decreasing, and the final step declares exactly 100.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanScript {
    steps: Vec<ScanStep>,
}

impl ScanScript {
    pub fn new(steps: Vec<ScanStep>) -> Result<Self, ScriptError> {
        if steps.is_empty() {
            return Err(ScriptError::Empty);
        }
        let mut prev = 0u8;
        for (index, step) in steps.iter().enumerate() {
            if step.progress > 100 {
                return Err(ScriptError::ProgressOutOfRange {
                    index,
                    progress: step.progress,
                });
            }
            if step.progress < prev {
                return Err(ScriptError::ProgressRegression {
                    index,
                    prev,
                    next: step.progress,
                });
            }
            prev = step.progress;
        }
        if prev != 100 {
            return Err(ScriptError::BadTerminalProgress { last: prev });
        }
        Ok(Self { steps })
    }

    /// The funnel's scan sequence. The 90% step carries the alert signal:
    /// a haptic burst plus the viewport shake.
    #[must_use]
    pub fn funnel() -> Self {
        // Upholds the constructor invariants by inspection; covered by a test.
        Self {
            steps: vec![
                ScanStep::new(10, "Iniciando mapeamento de nós faciais..."),
                ScanStep::new(
                    30,
                    "Convertendo imagem para escala de cinza de alto contraste...",
                ),
                ScanStep::new(45, "Acessando banco de dados de arquétipos comportamentais..."),
                ScanStep::new(60, "Analisando simetria da mandíbula e tensão ocular..."),
                ScanStep::new(75, "Cruzando dados com Gemini 3 Pro Vision..."),
                ScanStep::new(90, "ATENÇÃO: Padrão de dissimulação identificado.").with_signal(
                    StepSignal {
                        haptic_pattern: vec![40, 80, 40],
                        shake: true,
                    },
                ),
                ScanStep::new(100, "Compilando relatório final..."),
            ],
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn step(&self, index: usize) -> Option<&ScanStep> {
        self.steps.get(index)
    }

    #[must_use]
    pub fn steps(&self) -> &[ScanStep] {
        &self.steps
    }
}

/// One line of the scan terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub text: String,
    pub alert: bool,
}

/// Append-only feed of terminal lines.
///
/// Entries are never mutated or removed; the feed is emptied only when a
/// new scan begins, and ids keep increasing across clears.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFeed {
    entries: Vec<LogEntry>,
    next_id: u64,
}

impl LogFeed {
    pub fn append(&mut self, text: impl Into<String>, alert: bool) {
        self.entries.push(LogEntry {
            id: self.next_id,
            text: text.into(),
            alert,
        });
        self.next_id += 1;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn last_alert(&self) -> bool {
        self.entries.last().map_or(false, |e| e.alert)
    }

    #[must_use]
    pub fn texts(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.text.as_str()).collect()
    }
}

/// Runtime state of one scan: the script walk on one side, the pending
/// analysis outcome on the other.
#[derive(Debug, Clone)]
pub struct ScanState {
    script: ScanScript,
    cursor: usize,
    progress: u8,
    script_finished: bool,
    request_id: Uuid,
    outcome: Option<Result<Report, AppError>>,
}

impl ScanState {
    #[must_use]
    pub fn new(script: ScanScript, request_id: Uuid) -> Self {
        Self {
            script,
            cursor: 0,
            progress: 0,
            script_finished: false,
            request_id,
            outcome: None,
        }
    }

    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    #[must_use]
    pub fn progress(&self) -> u8 {
        self.progress
    }

    #[must_use]
    pub fn script_finished(&self) -> bool {
        self.script_finished
    }

    #[must_use]
    pub fn current_step(&self) -> Option<&ScanStep> {
        self.script.step(self.cursor)
    }

    /// Delay to request before the next step plays.
    #[must_use]
    pub fn next_delay(&self) -> Option<Duration> {
        self.current_step().map(|s| s.delay)
    }

    /// Plays the current step: applies its progress, moves the cursor and
    /// returns the step so the caller can log it and fire its signals.
    /// Marks the script finished after the last step.
    pub fn advance(&mut self) -> Option<ScanStep> {
        let step = self.script.step(self.cursor)?.clone();
        self.progress = step.progress;
        self.cursor += 1;
        if self.cursor == self.script.len() {
            self.script_finished = true;
        }
        Some(step)
    }

    /// Records the analysis outcome. The remote call resolves exactly once;
    /// a second delivery (stale correlation bug in a shell) keeps the first.
    pub fn record_outcome(&mut self, outcome: Result<Report, AppError>) {
        if self.outcome.is_none() {
            self.outcome = Some(outcome);
        }
    }

    #[must_use]
    pub fn has_outcome(&self) -> bool {
        self.outcome.is_some()
    }

    /// The join point: yields the outcome only once the script has fully
    /// played, consuming it.
    pub fn take_outcome(&mut self) -> Option<Result<Report, AppError>> {
        if self.script_finished {
            self.outcome.take()
        } else {
            None
        }
    }
}
