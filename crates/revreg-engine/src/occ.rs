//! Bounded optimistic-concurrency retry.
//!
//! Each attempt reads a snapshot, computes without holding locks, then
//! re-checks the snapshot inside a transaction before writing. An attempt
//! that finds the snapshot changed reports [`Attempt::Conflict`] and the
//! whole attempt runs again from the read.

use crate::error::EngineResult;

/// Result of one attempt.
#[derive(Debug)]
pub enum Attempt<T> {
    Done(T),
    /// The snapshot changed before commit; nothing was written.
    Conflict,
}

/// Result of the whole retry loop.
#[derive(Debug)]
pub enum Settled<T> {
    Done { value: T, attempts: u32 },
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct OptimisticRetry {
    max_attempts: u32,
}

impl OptimisticRetry {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `attempt` until it is done, errors, or the bound is reached.
    /// Errors end the loop immediately and are not retried.
    pub fn run<T, F>(&self, mut attempt: F) -> EngineResult<Settled<T>>
    where
        F: FnMut(u32) -> EngineResult<Attempt<T>>,
    {
        for n in 1..=self.max_attempts {
            match attempt(n)? {
                Attempt::Done(value) => {
                    return Ok(Settled::Done { value, attempts: n });
                }
                Attempt::Conflict => {
                    tracing::warn!(attempt = n, max = self.max_attempts, "optimistic write conflict");
                }
            }
        }
        Ok(Settled::Exhausted {
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn test_done_first_try() {
        let settled = OptimisticRetry::new(5)
            .run(|_| Ok(Attempt::Done(7)))
            .unwrap();
        assert!(matches!(settled, Settled::Done { value: 7, attempts: 1 }));
    }

    #[test]
    fn test_retries_until_done() {
        let settled = OptimisticRetry::new(5)
            .run(|n| Ok(if n < 3 { Attempt::Conflict } else { Attempt::Done(n) }))
            .unwrap();
        assert!(matches!(settled, Settled::Done { value: 3, attempts: 3 }));
    }

    #[test]
    fn test_exhausts_after_bound() {
        let mut calls = 0;
        let settled: Settled<()> = OptimisticRetry::new(5)
            .run(|_| {
                calls += 1;
                Ok(Attempt::Conflict)
            })
            .unwrap();
        assert!(matches!(settled, Settled::Exhausted { attempts: 5 }));
        assert_eq!(calls, 5);
    }

    #[test]
    fn test_error_is_not_retried() {
        let mut calls = 0;
        let result: EngineResult<Settled<()>> = OptimisticRetry::new(5).run(|_| {
            calls += 1;
            Err(EngineError::Store("down".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
