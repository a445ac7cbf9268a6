//! Deferred values
//!
//! Completion state of a placeholder: waiting, resolved to the instance that
//! replaced it, or failed with the fetch error.

/// A value that is not available yet and completes at most once.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Pending<T> {
    #[default]
    Waiting,
    Resolved(T),
    Failed(String),
}

impl<T> Pending<T> {
    #[inline]
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        matches!(self, Pending::Waiting)
    }

    /// Completes with `value`. Returns `false` if already complete.
    pub fn resolve(&mut self, value: T) -> bool {
        if !self.is_waiting() {
            return false;
        }
        *self = Pending::Resolved(value);
        true
    }

    /// Completes as failed. Returns `false` if already complete.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if !self.is_waiting() {
            return false;
        }
        *self = Pending::Failed(reason.into());
        true
    }

    #[must_use]
    pub fn resolved(&self) -> Option<&T> {
        match self {
            Pending::Resolved(value) => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_transition() {
        let mut slot: Pending<u32> = Pending::default();
        assert!(slot.resolve(7));
        assert!(!slot.fail("late"));
        assert!(!slot.resolve(8));
        assert_eq!(slot.resolved(), Some(&7));
    }

    #[test]
    fn test_failure_is_final() {
        let mut slot: Pending<u32> = Pending::Waiting;
        assert!(slot.fail("timeout"));
        assert!(!slot.resolve(1));
        assert_eq!(slot, Pending::Failed("timeout".into()));
    }
}
