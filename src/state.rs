//! Phase ordering for a single scan run.
//!
//! `Idle -> Discovery -> WebProbe -> TlsValidate -> Aggregating -> Complete`,
//! with `Aborted` reachable before aggregation starts and `Failed` reachable
//! from any non-terminal phase. No phase is ever entered twice.

use crate::error::ScoutError;
use crate::types::Phase;

impl Phase {
    /// Coarse progress marker emitted when the phase starts.
    pub fn milestone(self) -> Option<f32> {
        match self {
            Phase::Discovery => Some(10.0),
            Phase::WebProbe => Some(50.0),
            Phase::TlsValidate => Some(80.0),
            Phase::Aggregating => Some(90.0),
            Phase::Complete => Some(100.0),
            Phase::Idle | Phase::Aborted | Phase::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Aborted | Phase::Failed)
    }

    fn can_advance_to(self, next: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, next),
            (Idle, Discovery)
                | (Discovery, WebProbe)
                | (WebProbe, TlsValidate)
                | (TlsValidate, Aggregating)
                | (Aggregating, Complete)
                | (Idle | Discovery | WebProbe | TlsValidate, Aborted)
        ) || (next == Failed && !self.is_terminal())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStateMachine {
    phase: Phase,
}

impl Default for ScanStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanStateMachine {
    pub fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn advance(&mut self, next: Phase) -> Result<(), ScoutError> {
        if !self.phase.can_advance_to(next) {
            return Err(ScoutError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Return to `Idle` once the run has reached a terminal phase.
    pub fn reset(&mut self) -> Result<(), ScoutError> {
        if !self.phase.is_terminal() {
            return Err(ScoutError::InvalidTransition {
                from: self.phase,
                to: Phase::Idle,
            });
        }
        self.phase = Phase::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_in_order() {
        let mut m = ScanStateMachine::new();
        for p in [
            Phase::Discovery,
            Phase::WebProbe,
            Phase::TlsValidate,
            Phase::Aggregating,
            Phase::Complete,
        ] {
            m.advance(p).unwrap();
        }
        assert_eq!(m.phase(), Phase::Complete);
        m.reset().unwrap();
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn phases_cannot_be_skipped_or_reentered() {
        let mut m = ScanStateMachine::new();
        assert!(m.advance(Phase::WebProbe).is_err());
        m.advance(Phase::Discovery).unwrap();
        assert_eq!(
            m.advance(Phase::Discovery),
            Err(ScoutError::InvalidTransition {
                from: Phase::Discovery,
                to: Phase::Discovery
            })
        );
    }

    #[test]
    fn abort_only_before_aggregation() {
        let mut m = ScanStateMachine::new();
        m.advance(Phase::Discovery).unwrap();
        m.advance(Phase::WebProbe).unwrap();
        m.advance(Phase::Aborted).unwrap();
        assert!(m.advance(Phase::Failed).is_err());

        let mut m = ScanStateMachine::new();
        for p in [Phase::Discovery, Phase::WebProbe, Phase::TlsValidate, Phase::Aggregating] {
            m.advance(p).unwrap();
        }
        assert!(m.advance(Phase::Aborted).is_err());
        m.advance(Phase::Failed).unwrap();
    }

    #[test]
    fn reset_requires_terminal_phase() {
        let mut m = ScanStateMachine::new();
        m.advance(Phase::Discovery).unwrap();
        assert!(m.reset().is_err());
    }

    #[test]
    fn milestones() {
        assert_eq!(Phase::Discovery.milestone(), Some(10.0));
        assert_eq!(Phase::WebProbe.milestone(), Some(50.0));
        assert_eq!(Phase::TlsValidate.milestone(), Some(80.0));
        assert_eq!(Phase::Aggregating.milestone(), Some(90.0));
        assert_eq!(Phase::Complete.milestone(), Some(100.0));
        assert_eq!(Phase::Aborted.milestone(), None);
    }
}
