//! Diagnostics Channel
//!
//! Construction errors never abort a build. They are reported here, logged
//! through the `log` facade, and kept for the surrounding application to
//! inspect or drain.

use std::collections::VecDeque;

use crate::errors::SceneError;

/// Severity of a reported problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// The graph was degraded but the affected value has a sane fallback.
    Warning,
    /// A node or subgraph is absent from the built graph.
    Error,
}

/// One reported problem.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub error: SceneError,
    /// Where it happened, e.g. the template being instantiated.
    pub context: String,
}

/// Bounded sink of [`Diagnostic`] records. The oldest records are dropped
/// once `capacity` is reached; a capacity of zero only logs and counts.
#[derive(Debug)]
pub struct Diagnostics {
    records: VecDeque<Diagnostic>,
    capacity: usize,
    dropped: usize,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Diagnostics {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    pub fn report(&mut self, severity: Severity, error: SceneError, context: &str) {
        match severity {
            Severity::Warning => log::warn!("{context}: {error}"),
            Severity::Error => log::error!("{context}: {error}"),
        }
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        if self.records.len() == self.capacity {
            self.records.pop_front();
            self.dropped += 1;
        }
        self.records.push_back(Diagnostic {
            severity,
            error,
            context: context.to_string(),
        });
    }

    #[inline]
    pub fn warn(&mut self, error: SceneError, context: &str) {
        self.report(Severity::Warning, error, context);
    }

    #[inline]
    pub fn error(&mut self, error: SceneError, context: &str) {
        self.report(Severity::Error, error, context);
    }

    /// Drains all retained records.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        self.records.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.records.iter()
    }

    /// Whether any retained record matches `pred`.
    pub fn any(&self, pred: impl Fn(&SceneError) -> bool) -> bool {
        self.records.iter().any(|d| pred(&d.error))
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records discarded because the sink was full.
    #[inline]
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}
