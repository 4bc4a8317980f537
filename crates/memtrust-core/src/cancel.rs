//! Cooperative cancellation around external calls.
//!
//! Every operation that reaches a collaborator takes a [`CancellationToken`].
//! A cancelled token stops new calls from being issued and abandons an
//! in-flight one; writes that already completed stay committed.

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{TrustError, TrustResult};

/// Fail with [`TrustError::Cancelled`] if the token has fired.
pub fn ensure_active(cancel: &CancellationToken) -> TrustResult<()> {
    if cancel.is_cancelled() {
        Err(TrustError::Cancelled)
    } else {
        Ok(())
    }
}

/// Await `fut` unless the token fires first.
pub async fn run_cancellable<F, T, E>(cancel: &CancellationToken, fut: F) -> TrustResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<TrustError>,
{
    ensure_active(cancel)?;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TrustError::Cancelled),
        res = fut => res.map_err(Into::into),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res: TrustResult<u32> =
            run_cancellable(&cancel, async { Ok::<_, TrustError>(1) }).await;
        assert!(matches!(res, Err(TrustError::Cancelled)));
    }

    #[tokio::test]
    async fn test_active_token_passes_result() {
        let cancel = CancellationToken::new();
        let res = run_cancellable(&cancel, async { Ok::<_, TrustError>(7) }).await;
        assert_eq!(res.unwrap(), 7);
    }
}
