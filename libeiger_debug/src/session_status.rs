/// Coarse phase of a debug session, as shown to the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPhase {
    #[default]
    Initializing,
    Acquiring,
    Downloading,
    Finishing,
    Finished,
}

/// Progress message sent from a running session to whoever displays it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub progress: f32,
    pub triggers_completed: u64,
    pub trigger_count: u64,
}

impl SessionStatus {
    pub fn new(phase: SessionPhase, triggers_completed: u64, trigger_count: u64) -> Self {
        let progress = if trigger_count == 0 {
            0.0
        } else {
            triggers_completed as f32 / trigger_count as f32
        };
        Self {
            phase,
            progress,
            triggers_completed,
            trigger_count,
        }
    }
}
