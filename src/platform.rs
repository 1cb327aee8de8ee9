//! Platform Adapter contract
//!
//! The adapter owns every site-specific heuristic: where the chat lives,
//! how messages are attributed, and how input/send controls are driven.
//! Core components only ever talk to these capability methods.
//!
//! Element lookups return `Option`: "not found" is an expected state
//! (widgets render lazily), never an error.

use crate::error::AdapterError;
use crate::model::Role;

/// What kind of element a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Container,
    Message,
    /// `<input>` / `<textarea>` with a native value setter
    TextInput,
    /// Non-standard editable surface (contenteditable, rich editors)
    EditableSurface,
    Button,
}

/// Opaque handle to an element on the host surface
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef {
    pub id: String,
    pub kind: ElementKind,
}

impl ElementRef {
    pub fn new(id: impl Into<String>, kind: ElementKind) -> Self {
        Self { id: id.into(), kind }
    }

    pub fn is_standard_input(&self) -> bool {
        self.kind == ElementKind::TextInput
    }
}

/// Change-notification events fired after a value write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    /// Generic "input changed"
    Input,
    /// "Value committed"
    Change,
    KeyDown,
    KeyUp,
}

/// Transient preview notice shown before an autonomous send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewNotice {
    /// Truncated copy of the pending reply
    pub excerpt: String,
    pub seconds_remaining: u64,
}

/// Capability contract for one conversation surface
pub trait PlatformAdapter: Send + Sync {
    /// Whether this adapter recognizes the current surface
    fn detect(&self) -> bool;

    fn platform_name(&self) -> &str;

    fn chat_container(&self) -> Option<ElementRef>;

    /// All message elements currently rendered, oldest first
    fn message_elements(&self) -> Vec<ElementRef>;

    fn message_text(&self, element: &ElementRef) -> Option<String>;

    /// `None` for system notices and unattributable entries
    fn message_role(&self, element: &ElementRef) -> Option<Role>;

    /// Message timestamp in epoch millis, if the surface exposes one
    fn message_timestamp(&self, _element: &ElementRef) -> Option<i64> {
        None
    }

    fn input_box(&self) -> Option<ElementRef>;

    fn send_button(&self) -> Option<ElementRef>;

    /// Write a value through the element's native value setter
    fn set_value(&self, element: &ElementRef, value: &str) -> Result<(), AdapterError>;

    fn dispatch_input_event(&self, element: &ElementRef, event: InputEvent)
        -> Result<(), AdapterError>;

    /// Native activation (e.g. `button.click()`)
    fn activate(&self, element: &ElementRef) -> Result<(), AdapterError>;

    /// Synthesized activation event for surfaces that listen to events only
    fn dispatch_activation(&self, element: &ElementRef) -> Result<(), AdapterError>;

    /// Render or replace the preview notice
    fn show_preview(&self, notice: &PreviewNotice);

    /// Update the countdown on the visible notice
    fn update_preview_countdown(&self, seconds_remaining: u64);

    /// Remove the preview notice; no-op when none is shown
    fn remove_preview(&self);
}
