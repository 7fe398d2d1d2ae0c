//! Reserved channel names and task-path markers

pub use pregel_checkpoint::checkpoint::{ERROR, INTERRUPT, RESUME};

/// Channel the run input is written to
pub const START: &str = "__start__";

/// Terminal sentinel; a write to it ends the run after the current step
pub const END: &str = "__end__";

/// Recorded for a task that finished without writing anything
pub const NO_WRITES: &str = "__no_writes__";

/// Path marker of tasks scheduled by channel triggers
pub const PULL: &str = "__pregel_pull";

/// Prefix reserved for engine channels
pub const RESERVED_PREFIX: &str = "__";

/// Control channels whose writes never reach channel state
pub fn is_control_channel(name: &str) -> bool {
    matches!(name, ERROR | INTERRUPT | RESUME | NO_WRITES)
}

/// Whether `name` is reserved for the engine
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_channels() {
        assert!(is_control_channel(INTERRUPT));
        assert!(is_control_channel(NO_WRITES));
        assert!(!is_control_channel(END));
        assert!(!is_control_channel("messages"));
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved(START));
        assert!(is_reserved(END));
        assert!(!is_reserved("start"));
    }
}
