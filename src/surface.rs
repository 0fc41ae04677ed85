// src/surface.rs
// The UI collaborator the session controller renders into

use crate::citations::CitationRef;
use crate::connection::ConnectionEvent;

/// One render of an assistant message: normalized markdown and its HTML
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedMessage {
    pub markdown: String,
    pub html: String,
}

/// Mount points and state toggles exposed by the host UI.
///
/// Messages are addressed by turn sequence number, so the host keeps its own
/// handles and the core never looks anything up globally.
pub trait ChatSurface: Send {
    fn system_message(&mut self, text: &str);

    fn user_message(&mut self, text: &str);

    /// Placeholder shown until the first chunk of `turn` renders
    fn typing_started(&mut self, turn: u64);

    /// Replace the assistant message for `turn`. Called on every change and
    /// once more with the final text when the turn ends.
    fn render_assistant(&mut self, turn: u64, message: &RenderedMessage);

    /// Final HTML for `turn` with citation markers replaced. Only called
    /// after the final `render_assistant` for that turn has returned.
    fn attach_citations(&mut self, turn: u64, html: &str, citations: &[CitationRef]);

    fn set_input_enabled(&mut self, enabled: bool);

    /// Lifecycle changes (everything except inbound frames)
    fn connection_changed(&mut self, event: &ConnectionEvent);
}
