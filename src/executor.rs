//! Response Executor
//!
//! Places a reply into the host input and submits it:
//! locate controls → inject text → optional preview countdown → send.
//!
//! Every wait is cancellable. A cancelled send never reaches the send
//! control, and the preview notice is always removed on the way out.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::AdapterError;
use crate::model::now_millis;
use crate::platform::{ElementRef, InputEvent, PlatformAdapter, PreviewNotice};

/// Maximum characters of the reply shown in the preview notice
pub const PREVIEW_EXCERPT_CHARS: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    Idle,
    Locating,
    Injecting,
    Previewing,
    Sending,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub preview_delay: Duration,
    /// Poll interval while waiting for controls to render
    pub locate_interval: Duration,
    /// Give up on a control after this long
    pub locate_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            preview_delay: Duration::from_millis(3000),
            locate_interval: Duration::from_millis(200),
            locate_timeout: Duration::from_secs(5),
        }
    }
}

/// Result of a completed send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub content: String,
    pub previewed: bool,
    pub sent_at: i64,
}

pub struct ResponseExecutor {
    adapter: Arc<dyn PlatformAdapter>,
    locate_interval: Duration,
    locate_timeout: Duration,
    preview_delay: Mutex<Duration>,
    state: Mutex<ExecutorState>,
}

impl ResponseExecutor {
    pub fn new(adapter: Arc<dyn PlatformAdapter>, config: ExecutorConfig) -> Self {
        Self {
            adapter,
            locate_interval: config.locate_interval,
            locate_timeout: config.locate_timeout,
            preview_delay: Mutex::new(config.preview_delay),
            state: Mutex::new(ExecutorState::Idle),
        }
    }

    /// Zero disables the preview step entirely
    pub fn set_preview_delay(&self, delay: Duration) {
        *self.preview_delay.lock() = delay;
        info!("Preview delay set to {:?}", delay);
    }

    pub fn get_preview_delay(&self) -> Duration {
        *self.preview_delay.lock()
    }

    pub fn state(&self) -> ExecutorState {
        *self.state.lock()
    }

    /// Send `content`, previewing it first when `preview` is set
    pub async fn send_response(&self, content: &str, preview: bool) -> Result<SendReceipt, AdapterError> {
        self.send_response_with_cancel(content, preview, &CancellationToken::new())
            .await
    }

    /// Send `content`, aborting before submission if `cancel` fires
    pub async fn send_response_with_cancel(
        &self,
        content: &str,
        preview: bool,
        cancel: &CancellationToken,
    ) -> Result<SendReceipt, AdapterError> {
        let result = self.run(content, preview, cancel).await;
        match &result {
            Ok(_) => self.set_state(ExecutorState::Done),
            Err(e) => {
                warn!("Send failed: {}", e);
                self.set_state(ExecutorState::Failed);
            }
        }
        result
    }

    async fn run(
        &self,
        content: &str,
        preview: bool,
        cancel: &CancellationToken,
    ) -> Result<SendReceipt, AdapterError> {
        self.set_state(ExecutorState::Locating);
        let input = self
            .locate(|a| a.input_box(), cancel)
            .await?
            .ok_or(AdapterError::InputNotFound(self.locate_timeout))?;
        let send = self
            .locate(|a| a.send_button(), cancel)
            .await?
            .ok_or(AdapterError::SendButtonNotFound(self.locate_timeout))?;

        self.set_state(ExecutorState::Injecting);
        self.inject(&input, content)?;

        let delay = self.get_preview_delay();
        let previewed = preview && !delay.is_zero();
        if previewed {
            self.set_state(ExecutorState::Previewing);
            self.preview(content, delay, cancel).await?;
        }

        if cancel.is_cancelled() {
            return Err(AdapterError::Interrupted);
        }

        self.set_state(ExecutorState::Sending);
        self.adapter.activate(&send)?;
        self.adapter.dispatch_activation(&send)?;

        info!("Reply sent via {} ({} chars)", self.adapter.platform_name(), content.len());
        Ok(SendReceipt {
            content: content.to_string(),
            previewed,
            sent_at: now_millis(),
        })
    }

    /// Poll for a control until it renders, the timeout passes, or `cancel` fires
    async fn locate<F>(
        &self,
        find: F,
        cancel: &CancellationToken,
    ) -> Result<Option<ElementRef>, AdapterError>
    where
        F: Fn(&dyn PlatformAdapter) -> Option<ElementRef>,
    {
        let deadline = Instant::now() + self.locate_timeout;
        loop {
            if let Some(element) = find(self.adapter.as_ref()) {
                return Ok(Some(element));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(AdapterError::Interrupted),
                _ = sleep(self.locate_interval) => {}
            }
        }
    }

    fn inject(&self, input: &ElementRef, content: &str) -> Result<(), AdapterError> {
        self.adapter.set_value(input, content)?;
        self.adapter.dispatch_input_event(input, InputEvent::Input)?;
        self.adapter.dispatch_input_event(input, InputEvent::Change)?;

        // Some widgets only enable their send button on keystrokes
        if !input.is_standard_input() {
            self.adapter.dispatch_input_event(input, InputEvent::KeyDown)?;
            self.adapter.dispatch_input_event(input, InputEvent::KeyUp)?;
        }
        debug!("Injected {} chars into {}", content.len(), input.id);
        Ok(())
    }

    async fn preview(
        &self,
        content: &str,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), AdapterError> {
        self.adapter.remove_preview();
        self.adapter.show_preview(&PreviewNotice {
            excerpt: preview_excerpt(content),
            seconds_remaining: whole_seconds(delay),
        });

        let end = Instant::now() + delay;
        loop {
            let now = Instant::now();
            if now >= end {
                break;
            }
            let next = end.min(now + Duration::from_secs(1));
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.adapter.remove_preview();
                    info!("Preview cancelled before send");
                    return Err(AdapterError::Interrupted);
                }
                _ = sleep_until(next) => {}
            }
            let remaining = whole_seconds(end.saturating_duration_since(Instant::now()));
            if remaining > 0 {
                self.adapter.update_preview_countdown(remaining);
            }
        }

        self.adapter.remove_preview();
        Ok(())
    }

    fn set_state(&self, state: ExecutorState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!("Executor: {:?} -> {:?}", *current, state);
            *current = state;
        }
    }
}

/// Reply text for the preview notice, ellipsized past the limit
pub fn preview_excerpt(content: &str) -> String {
    if content.chars().count() <= PREVIEW_EXCERPT_CHARS {
        return content.to_string();
    }
    let mut excerpt: String = content.chars().take(PREVIEW_EXCERPT_CHARS).collect();
    excerpt.push_str("...");
    excerpt
}

fn whole_seconds(d: Duration) -> u64 {
    (d.as_millis() as u64 + 999) / 1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::transcript::{SurfaceAction, TranscriptAdapter};

    fn executor(adapter: &Arc<TranscriptAdapter>, preview_ms: u64) -> Arc<ResponseExecutor> {
        Arc::new(ResponseExecutor::new(
            adapter.clone(),
            ExecutorConfig {
                preview_delay: Duration::from_millis(preview_ms),
                ..ExecutorConfig::default()
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_preview_visible_only_during_window() {
        let adapter = Arc::new(TranscriptAdapter::default());
        let executor = executor(&adapter, 100);

        let task = {
            let executor = executor.clone();
            tokio::spawn(async move { executor.send_response("x", true).await })
        };

        sleep(Duration::from_millis(50)).await;
        assert!(adapter.preview().is_some());
        assert_eq!(executor.state(), ExecutorState::Previewing);
        assert!(adapter.agent_messages().is_empty());

        let receipt = task.await.unwrap().unwrap();
        assert!(receipt.previewed);
        assert!(adapter.preview().is_none());
        assert_eq!(adapter.agent_messages(), vec!["x"]);
        assert_eq!(executor.state(), ExecutorState::Done);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_delay_skips_preview() {
        let adapter = Arc::new(TranscriptAdapter::default());
        let executor = executor(&adapter, 100);
        executor.set_preview_delay(Duration::ZERO);
        assert_eq!(executor.get_preview_delay(), Duration::ZERO);

        let receipt = executor.send_response("Hello there", true).await.unwrap();
        assert!(!receipt.previewed);
        assert_eq!(adapter.previews_shown(), 0);
        assert_eq!(adapter.agent_messages(), vec!["Hello there"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inject_and_double_activation_order() {
        let adapter = Arc::new(TranscriptAdapter::default());
        let executor = executor(&adapter, 0);

        executor.send_response("Thanks!", false).await.unwrap();
        assert_eq!(
            adapter.actions(),
            vec![
                SurfaceAction::SetValue("Thanks!".into()),
                SurfaceAction::Event(InputEvent::Input),
                SurfaceAction::Event(InputEvent::Change),
                SurfaceAction::Activate,
                SurfaceAction::DispatchActivation,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_editable_surface_gets_key_events() {
        let adapter = Arc::new(TranscriptAdapter::default().with_editable_surface());
        let executor = executor(&adapter, 0);

        executor.send_response("Hi", false).await.unwrap();
        let actions = adapter.actions();
        assert!(actions.contains(&SurfaceAction::Event(InputEvent::KeyDown)));
        assert!(actions.contains(&SurfaceAction::Event(InputEvent::KeyUp)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_controls_time_out() {
        let adapter = Arc::new(TranscriptAdapter::default());
        let executor = executor(&adapter, 0);

        adapter.set_controls_visible(false, true);
        let err = executor.send_response("Hi", false).await.unwrap_err();
        assert_eq!(err, AdapterError::InputNotFound(Duration::from_secs(5)));
        assert_eq!(executor.state(), ExecutorState::Failed);

        adapter.set_controls_visible(true, false);
        let err = executor.send_response("Hi", false).await.unwrap_err();
        assert_eq!(err, AdapterError::SendButtonNotFound(Duration::from_secs(5)));
        assert!(adapter.agent_messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_rendering_controls_are_found() {
        let adapter = Arc::new(TranscriptAdapter::default());
        let executor = executor(&adapter, 0);
        adapter.set_controls_visible(false, false);

        let revealer = {
            let adapter = adapter.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(1200)).await;
                adapter.set_controls_visible(true, true);
            })
        };

        executor.send_response("Found you", false).await.unwrap();
        revealer.await.unwrap();
        assert_eq!(adapter.agent_messages(), vec!["Found you"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_preview_never_sends() {
        let adapter = Arc::new(TranscriptAdapter::default());
        adapter.push(Role::Customer, "Where is my order?");
        let executor = executor(&adapter, 3000);
        let cancel = CancellationToken::new();

        let task = {
            let executor = executor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                executor
                    .send_response_with_cancel("It ships today", true, &cancel)
                    .await
            })
        };

        sleep(Duration::from_millis(1500)).await;
        assert!(adapter.preview().is_some());
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err, AdapterError::Interrupted);
        assert!(adapter.preview().is_none());
        assert!(adapter.agent_messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_and_single_preview() {
        let adapter = Arc::new(TranscriptAdapter::default());
        let executor = executor(&adapter, 2500);

        executor.send_response("Done", true).await.unwrap();
        let actions = adapter.actions();
        let shown: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                SurfaceAction::ShowPreview(n) => Some(n.seconds_remaining),
                _ => None,
            })
            .collect();
        let countdown: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                SurfaceAction::Countdown(s) => Some(*s),
                _ => None,
            })
            .collect();

        assert_eq!(shown, vec![3]);
        assert_eq!(countdown, vec![2, 1]);
        assert_eq!(adapter.previews_shown(), 1);
    }

    #[test]
    fn test_preview_excerpt_truncation() {
        assert_eq!(preview_excerpt("short"), "short");

        let long = "a".repeat(200);
        let excerpt = preview_excerpt(&long);
        assert_eq!(excerpt.len(), PREVIEW_EXCERPT_CHARS + 3);
        assert!(excerpt.ends_with("..."));

        let exact = "b".repeat(PREVIEW_EXCERPT_CHARS);
        assert_eq!(preview_excerpt(&exact), exact);
    }
}
