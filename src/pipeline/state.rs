//! Pipeline state machine — the transition table from spec §4.6, shaped
//! after the teacher's transport FSM (`transport/fsm.rs`): an explicit event
//! enum, a `transition` match, and a result that tells the caller whether
//! the transition actually happened.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Initialized,
    Playing,
    Paused,
    Stopped,
    Error,
}

impl PipelineState {
    fn to_tag(self) -> u8 {
        match self {
            PipelineState::Uninitialized => 0,
            PipelineState::Initialized => 1,
            PipelineState::Playing => 2,
            PipelineState::Paused => 3,
            PipelineState::Stopped => 4,
            PipelineState::Error => 5,
        }
    }

    fn from_tag(tag: u8) -> Self {
        match tag {
            0 => PipelineState::Uninitialized,
            1 => PipelineState::Initialized,
            2 => PipelineState::Playing,
            3 => PipelineState::Paused,
            4 => PipelineState::Stopped,
            _ => PipelineState::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    Initialize,
    StartOutput,
    PauseOutput,
    ResumeOutput,
    StopOutput,
    Shutdown,
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    Moved(PipelineState),
    Rejected(PipelineState),
}

/// Atomic holder for [`PipelineState`] with Acquire/Release semantics: every
/// transition commits its side effects *before* the store (Release), and
/// readers (stats, device callback liveness checks) use Acquire.
pub struct PipelineStateCell {
    tag: AtomicU8,
}

impl PipelineStateCell {
    pub fn new(initial: PipelineState) -> Self {
        Self {
            tag: AtomicU8::new(initial.to_tag()),
        }
    }

    pub fn load(&self) -> PipelineState {
        PipelineState::from_tag(self.tag.load(Ordering::Acquire))
    }

    fn store(&self, state: PipelineState) {
        self.tag.store(state.to_tag(), Ordering::Release);
    }

    /// Applies `event` against the current state per the table in spec
    /// §4.6. Disallowed transitions leave state untouched and return
    /// `Rejected`.
    pub fn transition(&self, event: PipelineEvent) -> TransitionResult {
        use PipelineEvent::*;
        use PipelineState::*;

        let current = self.load();

        // `shutdown` and a fatal fault are valid from any state.
        match event {
            Shutdown => {
                self.store(Uninitialized);
                return TransitionResult::Moved(Uninitialized);
            }
            Fault => {
                self.store(Error);
                return TransitionResult::Moved(Error);
            }
            _ => {}
        }

        let next = match (current, event) {
            (Uninitialized, Initialize) => Some(Initialized),
            (Initialized, StartOutput) => Some(Playing),
            (Stopped, StartOutput) => Some(Playing),
            (Playing, PauseOutput) => Some(Paused),
            (Paused, ResumeOutput) => Some(Playing),
            (Playing, StopOutput) => Some(Stopped),
            (Paused, StopOutput) => Some(Stopped),
            _ => None,
        };

        match next {
            Some(state) => {
                self.store(state);
                TransitionResult::Moved(state)
            }
            None => TransitionResult::Rejected(current),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineEvent::*;
    use PipelineState::*;

    #[test]
    fn play_pause_resume_stop() {
        let cell = PipelineStateCell::new(Uninitialized);
        assert_eq!(cell.transition(Initialize), TransitionResult::Moved(Initialized));
        assert_eq!(cell.transition(StartOutput), TransitionResult::Moved(Playing));
        assert_eq!(cell.transition(PauseOutput), TransitionResult::Moved(Paused));
        assert_eq!(cell.transition(ResumeOutput), TransitionResult::Moved(Playing));
        assert_eq!(cell.transition(StopOutput), TransitionResult::Moved(Stopped));
        assert_eq!(cell.transition(StartOutput), TransitionResult::Moved(Playing));
    }

    #[test]
    fn disallowed_transition_is_rejected_and_state_unchanged() {
        let cell = PipelineStateCell::new(Uninitialized);
        assert_eq!(cell.transition(StartOutput), TransitionResult::Rejected(Uninitialized));
        assert_eq!(cell.load(), Uninitialized);
    }

    #[test]
    fn shutdown_from_any_state_returns_to_uninitialized() {
        let cell = PipelineStateCell::new(Uninitialized);
        cell.transition(Initialize);
        cell.transition(StartOutput);
        assert_eq!(cell.transition(Shutdown), TransitionResult::Moved(Uninitialized));
        assert_eq!(cell.load(), Uninitialized);
    }

    #[test]
    fn fault_is_terminal_until_shutdown() {
        let cell = PipelineStateCell::new(Playing);
        assert_eq!(cell.transition(Fault), TransitionResult::Moved(Error));
        assert_eq!(cell.transition(StartOutput), TransitionResult::Rejected(Error));
        assert_eq!(cell.transition(Shutdown), TransitionResult::Moved(Uninitialized));
    }
}
