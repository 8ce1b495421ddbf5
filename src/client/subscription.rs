//! Reconnecting subscription engine shared by log and new-head subscriptions.
//!
//! The engine owns one upstream subscription at a time. When opening or
//! pumping the upstream fails it forwards the error to the caller's error
//! channel without blocking, sleeps an exponentially growing backoff, and
//! reconnects from the last block it successfully delivered — so gaps across
//! reconnects stay bounded. Data sends use a short timeout and drop under
//! sustained buffer pressure; the data channel is never blocked on.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

pub(crate) const LOG_BUFFER: usize = 1000;
pub(crate) const ERR_BUFFER: usize = 10;
pub(crate) const LOOKBACK_BLOCKS: u64 = 50_000;
pub(crate) const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub(crate) const MAX_BACKOFF: Duration = Duration::from_secs(60);
pub(crate) const BACKOFF_FACTOR: f64 = 1.5;
pub(crate) const SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// One upstream subscription kind: how to open it from a block, and how to
/// turn a raw upstream item into a consumer item.
#[async_trait]
pub(crate) trait SubscriptionDriver: Send + Sync + 'static {
    type Raw: Send + 'static;
    type Item: Send + 'static;

    /// Label for log lines.
    fn describe(&self) -> String;

    /// Open the upstream subscription starting at `from_block`.
    async fn open(&self, from_block: u64) -> Result<BoxStream<'static, Result<Self::Raw>>>;

    /// Resolve a raw upstream item into a consumer item and the block number
    /// it belongs to. `Ok(None)` skips the item.
    async fn process(&self, raw: Self::Raw) -> Result<Option<(Self::Item, Option<u64>)>>;
}

/// Spawn the engine worker and hand back its data and error channels.
///
/// Both channels close when the worker exits (cancellation or consumer gone).
pub(crate) fn spawn_subscription<D: SubscriptionDriver>(
    driver: D,
    from_block: u64,
    item_capacity: usize,
    error_capacity: usize,
    cancel: CancellationToken,
) -> (mpsc::Receiver<D::Item>, mpsc::Receiver<Error>) {
    let (item_tx, item_rx) = mpsc::channel(item_capacity);
    let (err_tx, err_rx) = mpsc::channel(error_capacity);
    tokio::spawn(run_subscription(driver, from_block, item_tx, err_tx, cancel));
    (item_rx, err_rx)
}

enum StreamOutcome {
    Cancelled,
    ConsumerGone,
    Upstream(Error),
}

async fn run_subscription<D: SubscriptionDriver>(
    driver: D,
    from_block: u64,
    item_tx: mpsc::Sender<D::Item>,
    err_tx: mpsc::Sender<Error>,
    cancel: CancellationToken,
) {
    let name = driver.describe();
    let mut last_seen = from_block;
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            opened = driver.open(last_seen) => match opened {
                Ok(stream) => {
                    backoff = INITIAL_BACKOFF;
                    stream
                }
                Err(err) => {
                    tracing::warn!(
                        subscription = %name,
                        from_block = last_seen,
                        error = %err,
                        "failed to open upstream subscription"
                    );
                    forward_error(&err_tx, &name, err);
                    if !sleep_backoff(&cancel, &mut backoff).await {
                        break;
                    }
                    continue;
                }
            }
        };

        match pump_stream(&driver, stream, &item_tx, &name, &mut last_seen, &cancel).await {
            StreamOutcome::Cancelled | StreamOutcome::ConsumerGone => break,
            StreamOutcome::Upstream(err) => {
                tracing::warn!(
                    subscription = %name,
                    last_seen_block = last_seen,
                    error = %err,
                    "upstream subscription failed, reconnecting"
                );
                forward_error(&err_tx, &name, err);
                if !sleep_backoff(&cancel, &mut backoff).await {
                    break;
                }
            }
        }
    }
    tracing::debug!(subscription = %name, "subscription worker stopped");
}

/// Pump one live upstream stream. Takes the stream by value so the upstream
/// subscription is released before any backoff sleep.
async fn pump_stream<D: SubscriptionDriver>(
    driver: &D,
    mut stream: BoxStream<'static, Result<D::Raw>>,
    item_tx: &mpsc::Sender<D::Item>,
    name: &str,
    last_seen: &mut u64,
    cancel: &CancellationToken,
) -> StreamOutcome {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            next = stream.next() => match next {
                Some(Ok(raw)) => {
                    if !deliver(driver, raw, item_tx, name, last_seen).await {
                        return StreamOutcome::ConsumerGone;
                    }
                }
                Some(Err(err)) => return StreamOutcome::Upstream(err),
                None => return StreamOutcome::Upstream(Error::rpc("subscription stream ended")),
            }
        }
    }
}

/// Resolve and deliver one item. Returns `false` when the consumer is gone.
async fn deliver<D: SubscriptionDriver>(
    driver: &D,
    raw: D::Raw,
    item_tx: &mpsc::Sender<D::Item>,
    name: &str,
    last_seen: &mut u64,
) -> bool {
    let (item, block_number) = match driver.process(raw).await {
        Ok(Some(resolved)) => resolved,
        Ok(None) => return true,
        Err(err) => {
            tracing::warn!(subscription = %name, error = %err, "dropping undecodable item");
            return true;
        }
    };

    match item_tx.send_timeout(item, SEND_TIMEOUT).await {
        Ok(()) => {
            // Progress only moves on delivered items, so a reconnect replays
            // anything that was dropped under pressure.
            if let Some(number) = block_number {
                if number > *last_seen {
                    *last_seen = number;
                }
            }
            true
        }
        Err(SendTimeoutError::Timeout(_)) => {
            tracing::warn!(
                subscription = %name,
                timeout_ms = SEND_TIMEOUT.as_millis() as u64,
                "consumer buffer full, dropping item"
            );
            true
        }
        Err(SendTimeoutError::Closed(_)) => {
            tracing::debug!(subscription = %name, "consumer channel closed");
            false
        }
    }
}

/// Forward an error without ever blocking the worker; the error channel drops
/// under sustained error storms, the data channel never does.
fn forward_error(err_tx: &mpsc::Sender<Error>, name: &str, err: Error) {
    if err_tx.try_send(err).is_err() {
        tracing::debug!(subscription = %name, "error channel full or closed, dropping error");
    }
}

/// Sleep the current backoff (growing it for next time), or return `false` on
/// cancellation.
async fn sleep_backoff(cancel: &CancellationToken, backoff: &mut Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => return false,
        _ = sleep(*backoff) => {}
    }
    *backoff = backoff.mul_f64(BACKOFF_FACTOR).min(MAX_BACKOFF);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Scripted upstream: a queue of open outcomes, each either a failure or a
    /// finite (or never-ending) stream of block numbers.
    enum Open {
        Fail,
        Stream(Vec<u64>),
        StreamThenPending(Vec<u64>),
    }

    struct ScriptedDriver {
        opens: Mutex<VecDeque<Open>>,
        observed: Arc<Mutex<Vec<(u64, Instant)>>>,
    }

    impl ScriptedDriver {
        fn new(opens: Vec<Open>) -> (Self, Arc<Mutex<Vec<(u64, Instant)>>>) {
            let observed = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    opens: Mutex::new(opens.into()),
                    observed: observed.clone(),
                },
                observed,
            )
        }
    }

    #[async_trait]
    impl SubscriptionDriver for ScriptedDriver {
        type Raw = u64;
        type Item = u64;

        fn describe(&self) -> String {
            "scripted".to_owned()
        }

        async fn open(&self, from_block: u64) -> Result<BoxStream<'static, Result<u64>>> {
            self.observed
                .lock()
                .expect("observed lock")
                .push((from_block, Instant::now()));
            let next = self
                .opens
                .lock()
                .expect("opens lock")
                .pop_front()
                .unwrap_or(Open::StreamThenPending(Vec::new()));
            match next {
                Open::Fail => Err(Error::rpc("connection refused")),
                Open::Stream(items) => Ok(stream::iter(items.into_iter().map(Ok)).boxed()),
                Open::StreamThenPending(items) => Ok(stream::iter(items.into_iter().map(Ok))
                    .chain(stream::pending())
                    .boxed()),
            }
        }

        async fn process(&self, raw: u64) -> Result<Option<(u64, Option<u64>)>> {
            Ok(Some((raw, Some(raw))))
        }
    }

    fn opens_at(observed: &Arc<Mutex<Vec<(u64, Instant)>>>) -> Vec<(u64, Instant)> {
        observed.lock().expect("observed lock").clone()
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_growing_backoff_and_preserved_from_block() {
        let (driver, observed) = ScriptedDriver::new(vec![
            Open::Fail,
            Open::Fail,
            Open::Fail,
            Open::StreamThenPending(Vec::new()),
        ]);
        let cancel = CancellationToken::new();
        let (_items, mut errors) = spawn_subscription(driver, 7, 16, 10, cancel.clone());

        // 1s + 1.5s + 2.25s of backoff, then the fourth attempt succeeds.
        sleep(Duration::from_secs(6)).await;

        let opens = opens_at(&observed);
        assert_eq!(opens.len(), 4);
        assert!(opens.iter().all(|(from, _)| *from == 7));

        let start = opens[0].1;
        assert_eq!(opens[1].1 - start, Duration::from_secs(1));
        assert_eq!(opens[2].1 - start, Duration::from_millis(2500));
        assert_eq!(opens[3].1 - start, Duration::from_millis(4750));

        for _ in 0..3 {
            errors.try_recv().expect("one error per failed connect");
        }
        assert!(errors.try_recv().is_err());
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_resets_after_successful_connect() {
        let (driver, observed) = ScriptedDriver::new(vec![
            Open::Fail,
            Open::Fail,
            Open::Stream(Vec::new()), // connects, then the stream ends
            Open::Fail,
            Open::StreamThenPending(Vec::new()),
        ]);
        let cancel = CancellationToken::new();
        let (_items, _errors) = spawn_subscription(driver, 0, 16, 10, cancel.clone());

        sleep(Duration::from_secs(10)).await;

        let opens = opens_at(&observed);
        assert_eq!(opens.len(), 5);
        // Backoff after the successful third connect restarts at 1s and grows
        // again from there.
        assert_eq!(opens[3].1 - opens[2].1, Duration::from_secs(1));
        assert_eq!(opens[4].1 - opens[3].1, Duration::from_millis(1500));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn delivered_items_advance_the_reconnect_point() {
        let (driver, observed) = ScriptedDriver::new(vec![
            Open::Stream(vec![5, 9]),
            Open::StreamThenPending(Vec::new()),
        ]);
        let cancel = CancellationToken::new();
        let (mut items, mut errors) = spawn_subscription(driver, 0, 16, 10, cancel.clone());

        sleep(Duration::from_secs(2)).await;

        assert_eq!(items.try_recv().expect("first item"), 5);
        assert_eq!(items.try_recv().expect("second item"), 9);
        let opens = opens_at(&observed);
        assert_eq!(opens.len(), 2);
        assert_eq!(opens[1].0, 9, "reconnect resumes from the last delivered block");
        errors.try_recv().expect("stream end is forwarded as an error");
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn full_consumer_buffer_drops_items_without_blocking() {
        let (driver, observed) = ScriptedDriver::new(vec![
            Open::Stream(vec![1, 2, 3]),
            Open::StreamThenPending(Vec::new()),
        ]);
        let cancel = CancellationToken::new();
        // Capacity 1 and a consumer that never drains.
        let (mut items, _errors) = spawn_subscription(driver, 0, 1, 10, cancel.clone());

        sleep(Duration::from_secs(2)).await;

        let opens = opens_at(&observed);
        assert_eq!(opens.len(), 2, "engine kept running past the full buffer");
        // Items 2 and 3 were dropped after SEND_TIMEOUT each, so the reconnect
        // point is still block 1 and both drops cost exactly one timeout.
        assert_eq!(opens[1].0, 1);
        assert_eq!(
            opens[1].1 - opens[0].1,
            SEND_TIMEOUT * 2 + INITIAL_BACKOFF,
            "two send timeouts plus one backoff sleep"
        );
        assert_eq!(items.try_recv().expect("buffered item"), 1);
        assert!(items.try_recv().is_err());
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn error_channel_drops_on_overflow_but_keeps_running() {
        let mut opens: Vec<Open> = (0..5).map(|_| Open::Fail).collect();
        opens.push(Open::StreamThenPending(Vec::new()));
        let (driver, observed) = ScriptedDriver::new(opens);
        let cancel = CancellationToken::new();
        let (_items, mut errors) = spawn_subscription(driver, 0, 16, 2, cancel.clone());

        sleep(Duration::from_secs(60)).await;

        assert_eq!(opens_at(&observed).len(), 6);
        let mut received = 0;
        while errors.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 2, "overflowing errors are dropped, not queued");
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_closes_both_channels() {
        let (driver, _observed) = ScriptedDriver::new(vec![Open::StreamThenPending(vec![4])]);
        let cancel = CancellationToken::new();
        let (mut items, mut errors) = spawn_subscription(driver, 0, 16, 10, cancel.clone());

        assert_eq!(items.recv().await, Some(4));
        cancel.cancel();
        assert_eq!(items.recv().await, None);
        assert_eq!(errors.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_is_capped() {
        let mut backoff = Duration::from_secs(50);
        let cancel = CancellationToken::new();
        assert!(sleep_backoff(&cancel, &mut backoff).await);
        assert_eq!(backoff, MAX_BACKOFF);
        assert!(sleep_backoff(&cancel, &mut backoff).await);
        assert_eq!(backoff, MAX_BACKOFF);
    }
}
