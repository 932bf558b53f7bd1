//! Bounded-backoff retry wrapper for transient read failures.

use std::time::Duration;

use ferroredo_error::{FerroError, Result};
use tracing::warn;

use crate::SourceHandle;

/// Retry budget for one positional read.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts before the error becomes permanent.
    pub max_attempts: u32,
    /// Sleep before the first retry; doubles per attempt.
    pub base_delay: Duration,
    /// Ceiling on any single sleep.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self
            .base_delay
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
        scaled.min(self.max_delay)
    }
}

/// A [`SourceHandle`] that retries transient failures with bounded backoff.
///
/// Only errors classified transient by [`FerroError::is_transient`] retry;
/// anything else surfaces immediately. Exhausting the budget yields
/// [`FerroError::ReadExhausted`].
pub struct RetryingHandle<H: SourceHandle> {
    inner: H,
    policy: RetryPolicy,
    path: std::path::PathBuf,
}

impl<H: SourceHandle> RetryingHandle<H> {
    pub fn new(inner: H, path: impl Into<std::path::PathBuf>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            path: path.into(),
        }
    }

    pub fn into_inner(self) -> H {
        self.inner
    }
}

impl<H: SourceHandle> SourceHandle for RetryingHandle<H> {
    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let mut last_detail = String::new();
        for attempt in 0..self.policy.max_attempts {
            match self.inner.read_at(buf, offset) {
                Ok(n) => return Ok(n),
                Err(err) if err.is_transient() => {
                    last_detail = err.to_string();
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        code = err.code(),
                        path = %self.path.display(),
                        offset,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "transient read failure, retrying"
                    );
                    std::thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
        Err(FerroError::ReadExhausted {
            path: self.path.clone(),
            attempts: self.policy.max_attempts,
            detail: last_detail,
        })
    }

    fn size(&self) -> Result<u64> {
        self.inner.size()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A handle that fails transiently a fixed number of times before
    /// serving reads.
    struct Flaky {
        failures_left: u32,
        data: Vec<u8>,
    }

    impl SourceHandle for Flaky {
        fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(std::io::Error::from(std::io::ErrorKind::Interrupted).into());
            }
            let offset = offset as usize;
            let n = buf.len().min(self.data.len().saturating_sub(offset));
            buf[..n].copy_from_slice(&self.data[offset..offset + n]);
            Ok(n)
        }

        fn size(&self) -> Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_micros(1),
            max_delay: Duration::from_micros(10),
        }
    }

    #[test]
    fn recovers_within_budget() {
        let inner = Flaky {
            failures_left: 3,
            data: b"redo".to_vec(),
        };
        let mut handle = RetryingHandle::new(inner, "/r/1.arc", fast_policy(5));
        let mut buf = [0u8; 4];
        assert_eq!(handle.read_at(&mut buf, 0).unwrap(), 4);
        assert_eq!(&buf, b"redo");
    }

    #[test]
    fn exhausted_budget_is_permanent() {
        let inner = Flaky {
            failures_left: 10,
            data: b"redo".to_vec(),
        };
        let mut handle = RetryingHandle::new(inner, "/r/1.arc", fast_policy(3));
        let mut buf = [0u8; 4];
        let err = handle.read_at(&mut buf, 0).unwrap_err();
        assert!(matches!(err, FerroError::ReadExhausted { attempts: 3, .. }));
    }

    #[test]
    fn permanent_errors_skip_retry() {
        struct Broken;
        impl SourceHandle for Broken {
            fn read_at(&mut self, _buf: &mut [u8], _offset: u64) -> Result<usize> {
                Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied).into())
            }
            fn size(&self) -> Result<u64> {
                Ok(0)
            }
            fn close(&mut self) -> Result<()> {
                Ok(())
            }
        }
        let mut handle = RetryingHandle::new(Broken, "/r/1.arc", fast_policy(5));
        let mut buf = [0u8; 1];
        let err = handle.read_at(&mut buf, 0).unwrap_err();
        assert!(matches!(err, FerroError::Io(_)));
    }

    #[test]
    fn delay_doubles_up_to_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(35),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(2), Duration::from_millis(35));
        assert_eq!(policy.delay_for(9), Duration::from_millis(35));
    }
}
