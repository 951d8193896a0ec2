use crate::TERMINAL_LEVEL;
use crate::model::StageOutcome;

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Stage(u32),
    Terminal,
}

/// Explicit pipeline state: the current phase and the highest level any rule
/// declares.
///
/// `Init -> Stage(1) -> ... -> Stage(max_level) -> Terminal`; a failure at any
/// stage jumps straight to `Terminal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineState {
    phase: Phase,
    max_level: u32,
}

impl PipelineState {
    pub fn new(max_level: u32) -> Self {
        Self { phase: Phase::Init, max_level }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    /// Current level: 0 before the first stage, `TERMINAL_LEVEL` once done.
    pub fn level(&self) -> u32 {
        match self.phase {
            Phase::Init => 0,
            Phase::Stage(level) => level,
            Phase::Terminal => TERMINAL_LEVEL,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase == Phase::Terminal
    }

    /// Leave `Init`. A rule set with no levels goes straight to `Terminal`.
    pub fn start(&mut self) -> Phase {
        if self.phase == Phase::Init {
            self.phase = if self.max_level >= 1 { Phase::Stage(1) } else { Phase::Terminal };
        }
        self.phase
    }

    /// Move to the next stage, or to `Terminal` past `max_level`.
    pub fn advance(&mut self) -> Phase {
        let current = self.phase;
        match current {
            Phase::Init => return self.start(),
            Phase::Stage(level) if level < self.max_level => self.phase = Phase::Stage(level + 1),
            Phase::Stage(_) | Phase::Terminal => self.phase = Phase::Terminal,
        }
        self.phase
    }

    /// Record a completed stage and advance.
    pub fn complete(&mut self, message: impl Into<String>) -> StageOutcome {
        let level = self.level();
        let outcome = StageOutcome::success(level, self.max_level, message);
        self.advance();
        outcome
    }

    /// Stop the run from the current level.
    pub fn fail(&mut self, message: impl Into<String>) -> StageOutcome {
        let outcome = StageOutcome::fail(self.level(), message);
        self.phase = Phase::Terminal;
        outcome
    }

    /// Stop the run without running any stage.
    pub fn abandon(&mut self, message: impl Into<String>) -> StageOutcome {
        let outcome = StageOutcome::warning(self.level(), TERMINAL_LEVEL, message);
        self.phase = Phase::Terminal;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StageStatus;

    #[test]
    fn walks_every_level_then_terminates() {
        let mut state = PipelineState::new(3);
        assert_eq!(state.phase(), Phase::Init);
        assert_eq!(state.start(), Phase::Stage(1));

        let first = state.complete("ok");
        assert_eq!((first.level, first.next_level), (1, 2));
        assert_eq!(state.phase(), Phase::Stage(2));

        state.complete("ok");
        let last = state.complete("ok");
        assert_eq!((last.level, last.next_level), (3, TERMINAL_LEVEL));
        assert!(state.is_terminal());
    }

    #[test]
    fn single_level_stops_after_stage_one() {
        let mut state = PipelineState::new(1);
        state.start();
        let outcome = state.complete("ok");
        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.next_level, TERMINAL_LEVEL);
        assert!(state.is_terminal());
    }

    #[test]
    fn failure_jumps_to_terminal() {
        let mut state = PipelineState::new(5);
        state.start();
        state.advance();
        let outcome = state.fail("no output");
        assert_eq!((outcome.level, outcome.status), (2, StageStatus::Fail));
        assert!(outcome.is_terminal());
        assert_eq!(state.advance(), Phase::Terminal);
    }

    #[test]
    fn abandon_before_start_is_a_warning() {
        let mut state = PipelineState::new(2);
        let outcome = state.abandon("empty seed");
        assert_eq!((outcome.level, outcome.status, outcome.next_level), (0, StageStatus::Warning, TERMINAL_LEVEL));
        assert!(state.is_terminal());
    }
}
