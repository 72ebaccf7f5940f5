use tracing::{debug, warn};

use crate::error::NcfpError;

/// Run `call` up to `max_attempts` times, retrying immediately on transient
/// failures.
///
/// Non-transient errors are returned on first sight. Once every attempt has
/// failed the result is [`NcfpError::MaxRetriesExceeded`] carrying the last
/// failure.
pub fn with_retries<T, F>(max_attempts: usize, label: &str, mut call: F) -> Result<T, NcfpError>
where
    F: FnMut() -> Result<T, NcfpError>,
{
    let mut last = None;
    for attempt in 1..=max_attempts {
        match call() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() => {
                debug!(label, attempt, error = %err, "retrying remote call");
                last = Some(err);
            }
            Err(err) => {
                warn!(label, error = %err, "remote call failed with a non-retryable error");
                return Err(err);
            }
        }
    }
    Err(NcfpError::MaxRetriesExceeded {
        attempts: max_attempts,
        last: last
            .map(|err| err.to_string())
            .unwrap_or_else(|| "no attempts made".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let value = with_retries(5, "test", || {
            calls += 1;
            if calls < 3 {
                Err(NcfpError::EntrezHttp("reset".to_string()))
            } else {
                Ok(calls)
            }
        })
        .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn non_transient_error_is_not_retried() {
        let mut calls = 0;
        let err = with_retries(5, "test", || -> Result<(), NcfpError> {
            calls += 1;
            Err(NcfpError::Storage("locked".to_string()))
        })
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, NcfpError::Storage(_)));
    }
}
