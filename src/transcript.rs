//! In-memory transcript surface
//!
//! A `PlatformAdapter` backed by a plain message list. Used by the CLI
//! (stdin-driven chat) and by tests. Activating the send control submits
//! the current input value as an agent message, like a real chat widget.

use parking_lot::Mutex;
use tracing::debug;

use crate::error::AdapterError;
use crate::model::{now_millis, Message, Role};
use crate::platform::{ElementKind, ElementRef, InputEvent, PlatformAdapter, PreviewNotice};

const INPUT_ID: &str = "transcript-input";
const SEND_ID: &str = "transcript-send";

/// Something the core did to the surface, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceAction {
    SetValue(String),
    Event(InputEvent),
    Activate,
    DispatchActivation,
    ShowPreview(PreviewNotice),
    Countdown(u64),
    RemovePreview,
}

#[derive(Debug, Clone)]
struct Entry {
    /// `None` marks a system notice
    role: Option<Role>,
    text: String,
    timestamp: i64,
}

struct SurfaceState {
    entries: Vec<Entry>,
    input_value: String,
    input_kind: ElementKind,
    input_visible: bool,
    send_visible: bool,
    preview: Option<PreviewNotice>,
    previews_shown: usize,
    actions: Vec<SurfaceAction>,
}

/// In-memory conversation surface
pub struct TranscriptAdapter {
    name: String,
    state: Mutex<SurfaceState>,
}

impl TranscriptAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(SurfaceState {
                entries: vec![],
                input_value: String::new(),
                input_kind: ElementKind::TextInput,
                input_visible: true,
                send_visible: true,
                preview: None,
                previews_shown: 0,
                actions: vec![],
            }),
        }
    }

    /// Use a non-standard editable surface instead of a text input
    pub fn with_editable_surface(self) -> Self {
        self.state.lock().input_kind = ElementKind::EditableSurface;
        self
    }

    /// Append a message as if the remote party or the human typed it
    pub fn push(&self, role: Role, text: &str) {
        self.state.lock().entries.push(Entry {
            role: Some(role),
            text: text.to_string(),
            timestamp: now_millis(),
        });
    }

    /// Append an unattributed system notice
    pub fn push_system(&self, text: &str) {
        self.state.lock().entries.push(Entry {
            role: None,
            text: text.to_string(),
            timestamp: now_millis(),
        });
    }

    /// Wipe the transcript (chat cleared)
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    /// Show or hide the input and send controls
    pub fn set_controls_visible(&self, input: bool, send: bool) {
        let mut state = self.state.lock();
        state.input_visible = input;
        state.send_visible = send;
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state
            .lock()
            .entries
            .iter()
            .filter_map(|e| {
                e.role.map(|role| Message {
                    role,
                    content: e.text.clone(),
                    timestamp: e.timestamp,
                })
            })
            .collect()
    }

    /// Agent messages submitted through the send control
    pub fn agent_messages(&self) -> Vec<String> {
        self.messages()
            .into_iter()
            .filter(|m| m.role == Role::Agent)
            .map(|m| m.content)
            .collect()
    }

    pub fn input_value(&self) -> String {
        self.state.lock().input_value.clone()
    }

    pub fn preview(&self) -> Option<PreviewNotice> {
        self.state.lock().preview.clone()
    }

    pub fn previews_shown(&self) -> usize {
        self.state.lock().previews_shown
    }

    pub fn actions(&self) -> Vec<SurfaceAction> {
        self.state.lock().actions.clone()
    }

    fn element_index(element: &ElementRef) -> Option<usize> {
        element.id.strip_prefix("msg-")?.parse().ok()
    }
}

impl Default for TranscriptAdapter {
    fn default() -> Self {
        Self::new("transcript")
    }
}

impl PlatformAdapter for TranscriptAdapter {
    fn detect(&self) -> bool {
        true
    }

    fn platform_name(&self) -> &str {
        &self.name
    }

    fn chat_container(&self) -> Option<ElementRef> {
        Some(ElementRef::new("transcript", ElementKind::Container))
    }

    fn message_elements(&self) -> Vec<ElementRef> {
        let count = self.state.lock().entries.len();
        (0..count)
            .map(|i| ElementRef::new(format!("msg-{}", i), ElementKind::Message))
            .collect()
    }

    fn message_text(&self, element: &ElementRef) -> Option<String> {
        let index = Self::element_index(element)?;
        self.state.lock().entries.get(index).map(|e| e.text.clone())
    }

    fn message_role(&self, element: &ElementRef) -> Option<Role> {
        let index = Self::element_index(element)?;
        self.state.lock().entries.get(index).and_then(|e| e.role)
    }

    fn message_timestamp(&self, element: &ElementRef) -> Option<i64> {
        let index = Self::element_index(element)?;
        self.state.lock().entries.get(index).map(|e| e.timestamp)
    }

    fn input_box(&self) -> Option<ElementRef> {
        let state = self.state.lock();
        state
            .input_visible
            .then(|| ElementRef::new(INPUT_ID, state.input_kind))
    }

    fn send_button(&self) -> Option<ElementRef> {
        let state = self.state.lock();
        state
            .send_visible
            .then(|| ElementRef::new(SEND_ID, ElementKind::Button))
    }

    fn set_value(&self, element: &ElementRef, value: &str) -> Result<(), AdapterError> {
        if element.id != INPUT_ID {
            return Err(AdapterError::Dispatch(format!("{} is not editable", element.id)));
        }
        let mut state = self.state.lock();
        state.input_value = value.to_string();
        state.actions.push(SurfaceAction::SetValue(value.to_string()));
        Ok(())
    }

    fn dispatch_input_event(
        &self,
        _element: &ElementRef,
        event: InputEvent,
    ) -> Result<(), AdapterError> {
        self.state.lock().actions.push(SurfaceAction::Event(event));
        Ok(())
    }

    fn activate(&self, element: &ElementRef) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        state.actions.push(SurfaceAction::Activate);
        submit(&mut state, element)
    }

    fn dispatch_activation(&self, element: &ElementRef) -> Result<(), AdapterError> {
        let mut state = self.state.lock();
        state.actions.push(SurfaceAction::DispatchActivation);
        submit(&mut state, element)
    }

    fn show_preview(&self, notice: &PreviewNotice) {
        let mut state = self.state.lock();
        state.preview = Some(notice.clone());
        state.previews_shown += 1;
        state.actions.push(SurfaceAction::ShowPreview(notice.clone()));
    }

    fn update_preview_countdown(&self, seconds_remaining: u64) {
        let mut state = self.state.lock();
        if let Some(ref mut notice) = state.preview {
            notice.seconds_remaining = seconds_remaining;
        }
        state.actions.push(SurfaceAction::Countdown(seconds_remaining));
    }

    fn remove_preview(&self) {
        let mut state = self.state.lock();
        if state.preview.take().is_some() {
            state.actions.push(SurfaceAction::RemovePreview);
        }
    }
}

/// Submit the pending input like a chat widget would; empty input is ignored
fn submit(state: &mut SurfaceState, element: &ElementRef) -> Result<(), AdapterError> {
    if element.id != SEND_ID {
        return Err(AdapterError::Dispatch(format!("{} is not a send control", element.id)));
    }
    let text = std::mem::take(&mut state.input_value);
    if text.trim().is_empty() {
        return Ok(());
    }
    debug!("Transcript submitted agent message ({} chars)", text.len());
    state.entries.push(Entry {
        role: Some(Role::Agent),
        text,
        timestamp: now_millis(),
    });
    Ok(())
}
