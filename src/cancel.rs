//! Cancellation plumbing shared by the client and monitor workers.

use tokio_util::sync::CancellationToken;

/// A token that fires when any of `sources` fires.
///
/// Workers observe several cancellation signals at once (caller context,
/// owner shutdown, per-subscription handle); this folds them into one.
pub(crate) fn linked_token(sources: &[&CancellationToken]) -> CancellationToken {
    let merged = CancellationToken::new();
    let watchers: Vec<CancellationToken> = sources.iter().map(|t| (*t).clone()).collect();
    let guard = merged.clone();
    tokio::spawn(async move {
        let any_source = async {
            let waits = watchers.iter().map(|t| Box::pin(t.cancelled()));
            futures_util::future::select_all(waits).await;
        };
        tokio::select! {
            _ = any_source => {}
            _ = guard.cancelled() => {}
        }
        guard.cancel();
    });
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn fires_when_any_source_fires() {
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let merged = linked_token(&[&a, &b]);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!merged.is_cancelled());

        b.cancel();
        merged.cancelled().await;
        assert!(merged.is_cancelled());
        assert!(!a.is_cancelled(), "sources are not cancelled backwards");
    }
}
