//! Conversation Watcher
//!
//! Polls the platform adapter's message list and reports new messages as
//! ordered batches. Bursts are debounced on the trailing edge: N mutations
//! inside the debounce window produce exactly one callback, fired one
//! window after the last mutation.
//!
//! The watcher is mode-agnostic. Which batches matter is decided by the
//! orchestrator.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::model::{now_millis, Message};
use crate::platform::PlatformAdapter;

/// Messages delivered per batch
pub const DEFAULT_WINDOW: usize = 10;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub debounce: Duration,
    pub poll_interval: Duration,
    /// Maximum number of trailing messages per batch
    pub window: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            poll_interval: Duration::from_millis(100),
            window: DEFAULT_WINDOW,
        }
    }
}

/// Handle returned by [`observe`]
pub struct WatchHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Stop observing. Safe to call any number of times.
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            debug!("Watcher cancelled");
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for the polling task to exit
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

/// Start observing `adapter`, calling `on_batch` with each debounced batch.
///
/// Messages already rendered when observation starts are reported as the
/// first batch.
pub fn observe<F>(adapter: Arc<dyn PlatformAdapter>, on_batch: F, config: WatcherConfig) -> WatchHandle
where
    F: Fn(Vec<Message>) + Send + Sync + 'static,
{
    let token = CancellationToken::new();
    let task = tokio::spawn(watch_loop(adapter, on_batch, config, token.clone()));
    WatchHandle { token, task }
}

async fn watch_loop<F>(
    adapter: Arc<dyn PlatformAdapter>,
    on_batch: F,
    config: WatcherConfig,
    token: CancellationToken,
) where
    F: Fn(Vec<Message>) + Send + Sync + 'static,
{
    info!(
        "Watching {} (debounce {:?}, poll {:?})",
        adapter.platform_name(),
        config.debounce,
        config.poll_interval
    );

    let mut ticker = interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_count = 0usize;
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let count = adapter.message_elements().len();
                if count > last_count {
                    last_count = count;
                    deadline = Some(Instant::now() + config.debounce);
                } else if count < last_count {
                    debug!("Message count dropped {} -> {} (chat cleared)", last_count, count);
                    last_count = count;
                }
            }
            _ = wait_for(deadline) => {
                deadline = None;
                let batch = extract_messages(adapter.as_ref(), config.window);
                if batch.is_empty() {
                    debug!("New elements carried no messages, skipping batch");
                    continue;
                }
                debug!("Delivering batch of {} messages", batch.len());
                on_batch(batch);
            }
        }
    }

    debug!("Watcher stopped");
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

/// Read the trailing `window` elements as messages, oldest first.
///
/// Unattributed entries (system notices) and whitespace-only text are
/// dropped, so the result may be shorter than `window`.
pub fn extract_messages(adapter: &dyn PlatformAdapter, window: usize) -> Vec<Message> {
    let elements = adapter.message_elements();
    let start = elements.len().saturating_sub(window);

    elements[start..]
        .iter()
        .filter_map(|element| {
            let role = adapter.message_role(element)?;
            let text = adapter.message_text(element)?;
            let content = text.trim();
            if content.is_empty() {
                return None;
            }
            Some(Message {
                role,
                content: content.to_string(),
                timestamp: adapter.message_timestamp(element).unwrap_or_else(now_millis),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::transcript::TranscriptAdapter;
    use parking_lot::Mutex;
    use tokio::time::sleep;

    type Batches = Arc<Mutex<Vec<Vec<Message>>>>;

    fn start(adapter: &Arc<TranscriptAdapter>) -> (WatchHandle, Batches) {
        let batches: Batches = Arc::new(Mutex::new(vec![]));
        let sink = Arc::clone(&batches);
        let handle = observe(
            adapter.clone(),
            move |batch| sink.lock().push(batch),
            WatcherConfig::default(),
        );
        (handle, batches)
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_yields_single_batch() {
        let adapter = Arc::new(TranscriptAdapter::default());
        let (handle, batches) = start(&adapter);

        sleep(Duration::from_millis(10)).await;
        adapter.push(Role::Customer, "Hi");
        sleep(Duration::from_millis(100)).await;
        adapter.push(Role::Customer, "My order is late");
        sleep(Duration::from_millis(100)).await;
        adapter.push(Role::Customer, "It's #12345");

        sleep(Duration::from_millis(300)).await;
        assert!(batches.lock().is_empty());

        sleep(Duration::from_millis(400)).await;
        let delivered = batches.lock().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].len(), 3);
        assert_eq!(delivered[0][2].content, "It's #12345");

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_bounded() {
        let adapter = Arc::new(TranscriptAdapter::default());
        for i in 0..15 {
            adapter.push(Role::Customer, &format!("message {}", i));
        }
        let (handle, batches) = start(&adapter);

        sleep(Duration::from_millis(700)).await;
        let delivered = batches.lock().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].len(), DEFAULT_WINDOW);
        assert_eq!(delivered[0][0].content, "message 5");

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_only_batch_is_skipped() {
        let adapter = Arc::new(TranscriptAdapter::default());
        let (handle, batches) = start(&adapter);

        adapter.push_system("   ");
        sleep(Duration::from_millis(700)).await;
        assert!(batches.lock().is_empty());

        adapter.push(Role::Customer, "Hello?");
        sleep(Duration::from_millis(700)).await;
        let delivered = batches.lock().clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].len(), 1);

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_does_not_trigger() {
        let adapter = Arc::new(TranscriptAdapter::default());
        adapter.push(Role::Customer, "one");
        let (handle, batches) = start(&adapter);
        sleep(Duration::from_millis(700)).await;
        assert_eq!(batches.lock().len(), 1);

        adapter.clear();
        sleep(Duration::from_millis(700)).await;
        assert_eq!(batches.lock().len(), 1);

        // Count restarts from the cleared level
        adapter.push(Role::Customer, "two");
        sleep(Duration::from_millis(700)).await;
        assert_eq!(batches.lock().len(), 2);

        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let adapter = Arc::new(TranscriptAdapter::default());
        let (handle, batches) = start(&adapter);

        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());

        adapter.push(Role::Customer, "anyone there?");
        sleep(Duration::from_millis(700)).await;
        assert!(batches.lock().is_empty());
        handle.shutdown().await;
    }
}
