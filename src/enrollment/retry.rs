/// Outcome of recording a failure against a [`RetryLimit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    /// Attempts still available
    Remaining(u32),
    /// The limit has been reached; the guarded flow must stop
    Exhausted,
}

/// A failed step together with what is left of the budget
#[derive(Debug, Clone, PartialEq)]
pub struct Failed<E> {
    pub error: E,
    pub retry: Retry,
}

/// Counts failures of a fallible step and reports exhaustion on the `max`-th one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryLimit {
    max: u32,
    failures: u32,
}

impl RetryLimit {
    pub fn new(max: u32) -> Self {
        Self {
            max: max.max(1),
            failures: 0,
        }
    }

    pub fn record_failure(&mut self) -> Retry {
        self.failures = self.failures.saturating_add(1);
        if self.failures >= self.max {
            Retry::Exhausted
        } else {
            Retry::Remaining(self.max - self.failures)
        }
    }

    /// Run `step`, counting an `Err` as one failure
    pub fn attempt<T, E>(&mut self, step: impl FnOnce() -> Result<T, E>) -> Result<T, Failed<E>> {
        step().map_err(|error| Failed {
            error,
            retry: self.record_failure(),
        })
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.failures)
    }

    pub fn is_exhausted(&self) -> bool {
        self.failures >= self.max
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}
