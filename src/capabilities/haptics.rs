use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};

/// Fire-and-forget haptic feedback.
///
/// Scan steps can carry a vibration pattern as a side-signal; the shell
/// plays it on platforms that support it and silently drops it elsewhere.
/// The core never waits for an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum HapticsOperation {
    /// Alternating vibrate/pause durations in milliseconds.
    Pulse { pattern: Vec<u64> },
}

impl Operation for HapticsOperation {
    type Output = ();
}

pub struct Haptics<Ev> {
    context: CapabilityContext<HapticsOperation, Ev>,
}

impl<Ev> Capability<Ev> for Haptics<Ev> {
    type Operation = HapticsOperation;
    type MappedSelf<MappedEv> = Haptics<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Haptics::new(self.context.map_event(f))
    }
}

impl<Ev> Haptics<Ev>
where
    Ev: Send + 'static,
{
    #[must_use]
    pub fn new(context: CapabilityContext<HapticsOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn pulse(&self, pattern: Vec<u64>) {
        let context = self.context.clone();
        self.context.spawn(async move {
            context.notify_shell(HapticsOperation::Pulse { pattern }).await;
        });
    }
}
