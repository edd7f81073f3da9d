// src/retry.rs

//! Fixed retry policy for flaky network and cluster operations
//!
//! Image pushes, repo pushes, pod waits, and state saves all retry the same
//! way: three attempts, five seconds apart. Anything still failing after
//! that surfaces to the caller.

use anyhow::Result;
use std::time::Duration;
use tracing::warn;

use crate::config::CancelToken;

/// Attempts made before giving up
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Pause between attempts
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// Run `operation` up to [`DEFAULT_ATTEMPTS`] times with
/// [`DEFAULT_BACKOFF`] between attempts, checking for cancellation first.
pub fn with_retry<T>(
    description: &str,
    cancel: &CancelToken,
    mut operation: impl FnMut() -> Result<T>,
) -> Result<T> {
    retry_with(description, cancel, DEFAULT_ATTEMPTS, DEFAULT_BACKOFF, &mut operation)
}

fn retry_with<T>(
    description: &str,
    cancel: &CancelToken,
    attempts: u32,
    backoff: Duration,
    operation: &mut impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut last_err = None;
    for attempt in 1..=attempts {
        cancel.check()?;
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt < attempts {
                    warn!(
                        attempt,
                        attempts, "{description} failed, retrying in {}s: {err:#}",
                        backoff.as_secs()
                    );
                    std::thread::sleep(backoff);
                }
                last_err = Some(err);
            }
        }
    }
    Err(last_err.expect("at least one attempt ran"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with(
            "flaky",
            &CancelToken::new(),
            3,
            Duration::from_millis(1),
            &mut || {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("transient");
                }
                Ok(42)
            },
        )
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exhausts_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_with(
            "doomed",
            &CancelToken::new(),
            3,
            Duration::from_millis(1),
            &mut || {
                calls.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("permanent")
            },
        );
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cancellation_stops_retries() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let result: Result<()> =
            with_retry("cancelled", &cancel, || anyhow::bail!("never runs"));
        assert!(result.unwrap_err().to_string().contains("cancelled"));
    }
}
