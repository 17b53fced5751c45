//! Cooperative cancellation polled between scenarios and between batches of
//! AOI features.

use serde::Serialize;
use slr_tables::error::{Error, Result};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

pub trait CancelCheck {
    fn is_canceled(&self) -> bool;
}

impl<F> CancelCheck for F
where
    F: Fn() -> bool,
{
    fn is_canceled(&self) -> bool {
        self()
    }
}

/// Never cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverCancel;

impl CancelCheck for NeverCancel {
    fn is_canceled(&self) -> bool {
        false
    }
}

/// Shared flag another thread can set to stop a run.
#[derive(Debug, Default, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

impl CancelCheck for CancelToken {
    fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Result of a run that may stop early. A canceled run still carries what was
/// computed before the flag was seen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RunOutcome<T> {
    Completed(T),
    Canceled {
        partial: T,
        processed: usize,
        total: usize,
        unit: &'static str,
    },
}

impl<T> RunOutcome<T> {
    pub fn is_canceled(&self) -> bool {
        matches!(self, RunOutcome::Canceled { .. })
    }

    pub fn value(&self) -> &T {
        match self {
            RunOutcome::Completed(v) => v,
            RunOutcome::Canceled { partial, .. } => partial,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            RunOutcome::Completed(v) => v,
            RunOutcome::Canceled { partial, .. } => partial,
        }
    }

    /// The completed value, or `Error::Canceled` for an interrupted run.
    pub fn ensure_completed(self) -> Result<T> {
        match self {
            RunOutcome::Completed(v) => Ok(v),
            RunOutcome::Canceled {
                processed, total, unit, ..
            } => Err(Error::Canceled { processed, total, unit }),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RunOutcome<U> {
        match self {
            RunOutcome::Completed(v) => RunOutcome::Completed(f(v)),
            RunOutcome::Canceled {
                partial,
                processed,
                total,
                unit,
            } => RunOutcome::Canceled {
                partial: f(partial),
                processed,
                total,
                unit,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_token_clones_share_flag() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_canceled());
        token.cancel();
        assert!(observer.is_canceled());
    }

    #[test]
    fn test_closure_check() {
        let calls = Cell::new(0);
        let check = || {
            calls.set(calls.get() + 1);
            calls.get() > 2
        };
        assert!(!check.is_canceled());
        assert!(!check.is_canceled());
        assert!(check.is_canceled());
        assert!(!NeverCancel.is_canceled());
    }

    #[test]
    fn test_outcome_ensure_completed() {
        assert_eq!(RunOutcome::Completed(3).ensure_completed().unwrap(), 3);
        let canceled = RunOutcome::Canceled {
            partial: vec![1, 2],
            processed: 2,
            total: 10,
            unit: "features",
        };
        assert_eq!(canceled.value().len(), 2);
        let err = canceled.ensure_completed().unwrap_err();
        assert_eq!(err.to_string(), "canceled after 2 of 10 features");
    }
}
