use log::{error, warn};
use std::cell::Cell;
use std::fmt::Display;

/// What went wrong with one calculated tag on one feature.
#[derive(Debug, Clone, Copy)]
pub struct CalculatedTagFailure<'a> {
    pub layer_id: &'a str,
    pub key: &'a str,
    pub snippet: &'a str,
    pub strict: bool,
}

/// Rate limiter for calculated-tag diagnostics.
///
/// Counters only grow. Once `limit` failures have been logged a single
/// summary is emitted and later failures are counted silently.
#[derive(Debug)]
pub struct FailureLog {
    limit: usize,
    failures: Cell<usize>,
    reported: Cell<usize>,
}

impl FailureLog {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            failures: Cell::new(0),
            reported: Cell::new(0),
        }
    }

    pub fn record(&self, failure: CalculatedTagFailure<'_>, cause: &dyn Display) {
        self.failures.set(self.failures.get() + 1);
        let reported = self.reported.get();
        if reported >= self.limit {
            return;
        }
        warn!(
            "Could not calculate a {}calculated tag for key {} defined by {} (in layer {}) due to {}. \
             Are you the theme creator? Doublecheck your code. Note that the metatags might not be stable on new features",
            if failure.strict { "strict " } else { "" },
            failure.key,
            failure.snippet,
            failure.layer_id,
            cause
        );
        self.reported.set(reported + 1);
        if reported + 1 == self.limit {
            error!(
                "Got {} errors calculating this metatagging - stopping output now",
                self.limit
            );
        }
    }

    /// Every failure seen, logged or not.
    pub fn failures(&self) -> usize {
        self.failures.get()
    }

    /// Failures that produced a warning.
    pub fn reported(&self) -> usize {
        self.reported.get()
    }

    pub fn is_silenced(&self) -> bool {
        self.reported.get() >= self.limit
    }
}
