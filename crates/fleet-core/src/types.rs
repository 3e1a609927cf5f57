use serde::{Deserialize, Serialize};

/// Execution state shared by a single step (`Work`) and by the whole unit
/// (`RevisionWork`).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WorkState {
    #[default]
    NotDone,
    Executing,
    Failed,
    Success,
    Aborted,
    Timeout,
    Paused,
    Ignore,
    Issues,
}

impl WorkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkState::NotDone => "notdone",
            WorkState::Executing => "executing",
            WorkState::Failed => "failed",
            WorkState::Success => "success",
            WorkState::Aborted => "aborted",
            WorkState::Timeout => "timeout",
            WorkState::Paused => "paused",
            WorkState::Ignore => "ignore",
            WorkState::Issues => "issues",
        }
    }

    /// Unknown strings decode as `NotDone`, the column default.
    pub fn parse(s: &str) -> WorkState {
        match s {
            "executing" => WorkState::Executing,
            "failed" => WorkState::Failed,
            "success" => WorkState::Success,
            "aborted" => WorkState::Aborted,
            "timeout" => WorkState::Timeout,
            "paused" => WorkState::Paused,
            "ignore" => WorkState::Ignore,
            "issues" => WorkState::Issues,
            _ => WorkState::NotDone,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, WorkState::Failed | WorkState::Aborted | WorkState::Timeout)
    }

    /// A step in one of these states has run to an outcome.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            WorkState::Failed
                | WorkState::Success
                | WorkState::Aborted
                | WorkState::Timeout
                | WorkState::Ignore
                | WorkState::Issues
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_strings_roundtrip() {
        for s in [
            WorkState::NotDone,
            WorkState::Executing,
            WorkState::Failed,
            WorkState::Success,
            WorkState::Aborted,
            WorkState::Timeout,
            WorkState::Paused,
            WorkState::Ignore,
            WorkState::Issues,
        ] {
            assert_eq!(WorkState::parse(s.as_str()), s);
        }
        assert_eq!(WorkState::parse("bogus"), WorkState::NotDone);
    }

    #[test]
    fn failures_are_finished() {
        assert!(WorkState::Timeout.is_failure());
        assert!(WorkState::Timeout.is_finished());
        assert!(!WorkState::Executing.is_finished());
        assert!(!WorkState::Success.is_failure());
    }
}
