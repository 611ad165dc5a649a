/// Retry/backoff (spec §4.6). Wraps a fallible async operation with
/// exponential backoff, capped delay, and cooperative cancellation; fatal
/// errors are never retried.
use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::metrics::RPC_ERRORS;

/// Whether a failure is worth retrying, decided by the caller's error type
/// via `Classify` rather than by string-matching messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transport hiccups, timeouts, rate limiting, 5xx — expected to clear.
    Recoverable,
    /// Malformed responses, auth failures, logic errors — retrying won't help.
    Fatal,
}

pub trait Classify {
    fn classify(&self) -> ErrorClass;
}

/// The final failure surfaced by `with_retry` (spec §4.6: "the final
/// failure wraps the last error with attempt count"), whether that
/// happened after exhausting every attempt or on the very first one
/// because the error classified as fatal.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub source: E,
}

impl<E: fmt::Display> fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed after {} attempt(s): {}", self.attempts, self.source)
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryExhausted<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Runs `op` under exponential backoff until it succeeds, a fatal error is
/// returned, attempts are exhausted, or `cancel` fires. `config.max_attempts`
/// is the number of retries after the first try, so a classified-recoverable
/// error is attempted `max_attempts + 1` times in total (spec §8 P7).
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    op_name: &str,
    mut op: F,
) -> Result<T, RetryExhausted<E>>
where
    E: Classify + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let class = e.classify();
                let class_label = match class {
                    ErrorClass::Recoverable => "recoverable",
                    ErrorClass::Fatal => "fatal",
                };
                RPC_ERRORS.with_label_values(&[class_label]).inc();

                if class == ErrorClass::Fatal {
                    warn!(op = op_name, attempt, error = %e, "fatal error, not retrying");
                    return Err(RetryExhausted { attempts: attempt, source: e });
                }

                if !config.enabled || attempt > config.max_attempts {
                    warn!(op = op_name, attempt, error = %e, "retry attempts exhausted");
                    return Err(RetryExhausted { attempts: attempt, source: e });
                }

                debug!(op = op_name, attempt, delay_ms = delay.as_millis(), error = %e, "retrying after backoff");

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        warn!(op = op_name, attempt, "cancelled during backoff");
                        return Err(RetryExhausted { attempts: attempt, source: e });
                    }
                }

                delay = std::cmp::min(delay * 2, config.max_delay);
            }
        }
    }
}
