// src/session/mod.rs
// Session Controller: turn state machine, history window and the glue between
// inbound frames, reassembly, rendering and citation substitution

pub mod history;
pub mod turn;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::citations::{self, Citation};
use crate::config::{CitationConfig, WidgetConfig};
use crate::connection::{ConnectionEvent, FrameSink};
use crate::error::{Result, SendRejected, WidgetError};
use crate::protocol::{AuthPayload, DecodedChunk, InboundFrame, OutboundFrame, Role};
use crate::render::MarkdownRenderer;
use crate::surface::{ChatSurface, RenderedMessage};

pub use history::History;
pub use turn::Turn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingResponse,
}

pub struct SessionController {
    sink: Arc<dyn FrameSink>,
    surface: Box<dyn ChatSurface>,
    renderer: Arc<dyn MarkdownRenderer>,
    citation_policy: CitationConfig,
    visitor_id: String,
    kb_id: Option<String>,
    history: History,
    state: TurnState,
    turn: Option<Turn>,
    last_sequence: u64,
    turns_sent: u64,
}

impl SessionController {
    pub fn new(
        config: &WidgetConfig,
        visitor_id: impl Into<String>,
        sink: Arc<dyn FrameSink>,
        surface: Box<dyn ChatSurface>,
        renderer: Arc<dyn MarkdownRenderer>,
    ) -> Self {
        Self {
            sink,
            surface,
            renderer,
            citation_policy: config.citations.clone(),
            visitor_id: visitor_id.into(),
            kb_id: config.kb_id.clone().filter(|id| !id.trim().is_empty()),
            history: History::new(config.history_window),
            state: TurnState::Idle,
            turn: None,
            last_sequence: 0,
            turns_sent: 0,
        }
    }

    /// Identity presented to the backend on every open
    pub fn auth_payload(&self) -> AuthPayload {
        AuthPayload {
            visitor_id: self.visitor_id.clone(),
            kb_id: self.kb_id.clone(),
        }
    }

    pub fn greet(&mut self, greeting: &str) {
        if !greeting.is_empty() {
            self.surface.system_message(greeting);
        }
    }

    /// Choose the knowledge base. Fixed once the first turn has been sent;
    /// re-selecting the current one is always accepted.
    pub fn select_knowledge_base(&mut self, kb_id: impl Into<String>) -> Result<AuthPayload> {
        let kb_id = kb_id.into().trim().to_string();
        if kb_id.is_empty() {
            return Err(WidgetError::EmptyKnowledgeBase);
        }
        if let Some(current) = &self.kb_id {
            if self.turns_sent > 0 && *current != kb_id {
                return Err(WidgetError::KnowledgeBaseLocked(current.clone()));
            }
        }

        info!("Knowledge base selected: {}", kb_id);
        self.kb_id = Some(kb_id);
        Ok(self.auth_payload())
    }

    /// Submit a user message. A rejected send has no side effects.
    pub fn send(&mut self, text: &str) -> std::result::Result<(), SendRejected> {
        if self.state == TurnState::AwaitingResponse {
            return Err(SendRejected::TurnInFlight);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SendRejected::EmptyMessage);
        }
        let Some(kb_id) = self.kb_id.clone() else {
            return Err(SendRejected::NoKnowledgeBase);
        };
        if !self.sink.is_open() {
            return Err(SendRejected::NotConnected);
        }

        self.history.push(Role::User, text);
        let frame = OutboundFrame::Chat {
            kb_id,
            messages: self.history.to_vec(),
        };
        if !self.sink.send(&frame) {
            self.history.pop_latest();
            return Err(SendRejected::NotConnected);
        }

        self.turns_sent += 1;
        self.turn = None;
        self.state = TurnState::AwaitingResponse;
        self.surface.user_message(text);
        self.surface.set_input_enabled(false);
        debug!("Sent turn with {} history entries", self.history.len());
        Ok(())
    }

    pub fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Frame(frame) => self.handle_frame(frame),
            ConnectionEvent::Reconnecting { .. }
            | ConnectionEvent::Closed { .. }
            | ConnectionEvent::ReconnectExhausted { .. } => {
                self.surface.connection_changed(&event);
                self.reset_turn_state();
            }
            ConnectionEvent::Connecting { .. } | ConnectionEvent::Open => {
                self.surface.connection_changed(&event);
            }
        }
    }

    pub fn handle_frame(&mut self, frame: InboundFrame) {
        match frame {
            InboundFrame::Info { message } => self.surface.system_message(&message),
            InboundFrame::Start => self.start_turn(),
            InboundFrame::Chunk(chunk) => self.apply_chunk(chunk),
            InboundFrame::End => self.finish_turn(),
            // Answered by the connection task
            InboundFrame::Ping => {}
        }
    }

    fn start_turn(&mut self) {
        if self.turn.as_ref().is_some_and(|t| !t.is_finished()) {
            warn!("Turn start while a turn is still streaming, replacing it");
        }
        self.last_sequence += 1;
        self.turn = Some(Turn::new(self.last_sequence));
        self.surface.typing_started(self.last_sequence);
    }

    fn apply_chunk(&mut self, chunk: DecodedChunk) {
        let Some(turn) = self.turn.as_mut().filter(|t| !t.is_finished()) else {
            debug!("Chunk without an active turn, ignoring");
            return;
        };

        let sequence = turn.sequence();
        if let Some(markdown) = turn.apply(chunk) {
            let html = self.renderer.render(&markdown);
            self.surface
                .render_assistant(sequence, &RenderedMessage { markdown, html });
        }
    }

    fn finish_turn(&mut self) {
        let Some(turn) = self.turn.as_mut().filter(|t| !t.is_finished()) else {
            debug!("End frame without an active turn, ignoring");
            return;
        };
        turn.finish();

        let sequence = turn.sequence();
        let markdown = turn.text().to_string();
        let found: Vec<Citation> = if self.citation_policy.dedup {
            citations::dedup_by_id(turn.citations())
        } else {
            turn.citations().to_vec()
        };

        // Final render pass; substitution runs on its output afterwards
        let html = self.renderer.render(&markdown);
        self.surface.render_assistant(
            sequence,
            &RenderedMessage {
                markdown: markdown.clone(),
                html: html.clone(),
            },
        );

        if !found.is_empty() {
            let (html, refs) =
                citations::substitute(&html, &found, self.citation_policy.excerpt_chars);
            self.surface.attach_citations(sequence, &html, &refs);
        }

        if markdown.is_empty() {
            debug!("Turn {} ended with no text", sequence);
        } else {
            self.history.push(Role::Assistant, markdown);
        }

        self.state = TurnState::Idle;
        self.surface.set_input_enabled(true);
    }

    /// Connection dropped or closed mid-turn: give the user back the input.
    fn reset_turn_state(&mut self) {
        if self.state == TurnState::AwaitingResponse {
            info!("Connection interrupted, abandoning pending turn");
        }
        self.state = TurnState::Idle;
        self.surface.set_input_enabled(true);
    }

    pub fn turn_state(&self) -> TurnState {
        self.state
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn current_turn(&self) -> Option<&Turn> {
        self.turn.as_ref()
    }

    pub fn kb_id(&self) -> Option<&str> {
        self.kb_id.as_deref()
    }

    pub fn visitor_id(&self) -> &str {
        &self.visitor_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::render::CmarkRenderer;

    #[derive(Default)]
    struct RecordingSink {
        open: AtomicBool,
        sent: Mutex<Vec<OutboundFrame>>,
    }

    impl FrameSink for RecordingSink {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn send(&self, frame: &OutboundFrame) -> bool {
            if !self.is_open() {
                return false;
            }
            self.sent.lock().unwrap().push(frame.clone());
            true
        }
    }

    #[derive(Default)]
    struct Counters {
        input_enabled: Vec<bool>,
        renders: Vec<(u64, String)>,
    }

    struct CountingSurface(Arc<Mutex<Counters>>);

    impl ChatSurface for CountingSurface {
        fn system_message(&mut self, _text: &str) {}
        fn user_message(&mut self, _text: &str) {}
        fn typing_started(&mut self, _turn: u64) {}
        fn render_assistant(&mut self, turn: u64, message: &RenderedMessage) {
            self.0.lock().unwrap().renders.push((turn, message.markdown.clone()));
        }
        fn attach_citations(&mut self, _turn: u64, _html: &str, _citations: &[citations::CitationRef]) {}
        fn set_input_enabled(&mut self, enabled: bool) {
            self.0.lock().unwrap().input_enabled.push(enabled);
        }
        fn connection_changed(&mut self, _event: &ConnectionEvent) {}
    }

    fn controller(open: bool, kb: Option<&str>) -> (SessionController, Arc<RecordingSink>, Arc<Mutex<Counters>>) {
        let sink = Arc::new(RecordingSink::default());
        sink.open.store(open, Ordering::SeqCst);
        let counters = Arc::new(Mutex::new(Counters::default()));
        let config = WidgetConfig {
            kb_id: kb.map(str::to_string),
            ..WidgetConfig::default()
        };
        let session = SessionController::new(
            &config,
            "visitor-1",
            sink.clone(),
            Box::new(CountingSurface(counters.clone())),
            Arc::new(CmarkRenderer),
        );
        (session, sink, counters)
    }

    #[test]
    fn test_rejections_have_no_side_effects() {
        let (mut session, sink, _) = controller(true, None);
        assert_eq!(session.send("hi"), Err(SendRejected::NoKnowledgeBase));

        let (mut session, sink_closed, _) = controller(false, Some("kb"));
        assert_eq!(session.send("   "), Err(SendRejected::EmptyMessage));
        assert_eq!(session.send("hi"), Err(SendRejected::NotConnected));

        assert!(session.history().is_empty());
        assert_eq!(session.turn_state(), TurnState::Idle);
        assert!(sink.sent.lock().unwrap().is_empty());
        assert!(sink_closed.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_send_while_awaiting_is_rejected() {
        let (mut session, sink, counters) = controller(true, Some("kb"));
        session.send("first").unwrap();
        assert_eq!(session.turn_state(), TurnState::AwaitingResponse);
        assert_eq!(session.send("second"), Err(SendRejected::TurnInFlight));

        assert_eq!(sink.sent.lock().unwrap().len(), 1);
        assert_eq!(session.history().len(), 1);
        assert_eq!(counters.lock().unwrap().input_enabled, vec![false]);
    }

    #[test]
    fn test_end_returns_to_idle_and_records_answer() {
        let (mut session, _, counters) = controller(true, Some("kb"));
        session.send("hello?").unwrap();

        session.handle_frame(InboundFrame::Start);
        session.handle_frame(InboundFrame::Chunk(DecodedChunk {
            text: "Hi there".into(),
            citations: Vec::new(),
        }));
        session.handle_frame(InboundFrame::End);

        assert_eq!(session.turn_state(), TurnState::Idle);
        assert_eq!(session.history().last().map(|e| e.role), Some(Role::Assistant));
        let counters = counters.lock().unwrap();
        assert_eq!(counters.input_enabled, vec![false, true]);
        // Streaming render plus the final pass
        assert_eq!(counters.renders.len(), 2);
    }

    #[test]
    fn test_chat_frames_carry_at_most_ten_entries() {
        let (mut session, sink, _) = controller(true, Some("kb"));
        for i in 0..11 {
            session.send(&format!("q{}", i)).unwrap();
            session.handle_frame(InboundFrame::Start);
            session.handle_frame(InboundFrame::End);
        }

        assert_eq!(session.history().len(), 10);
        let sent = sink.sent.lock().unwrap();
        match sent.last() {
            Some(OutboundFrame::Chat { messages, .. }) => {
                assert_eq!(messages.len(), 10);
                assert_eq!(messages[0].content, "q1");
                assert_eq!(messages[9].content, "q10");
            }
            other => panic!("expected chat frame, got {:?}", other),
        }
    }

    #[test]
    fn test_dedup_policy_keeps_first_citation() {
        let sink = Arc::new(RecordingSink::default());
        sink.open.store(true, Ordering::SeqCst);
        let config = WidgetConfig {
            kb_id: Some("kb".into()),
            citations: CitationConfig {
                dedup: true,
                ..CitationConfig::default()
            },
            ..WidgetConfig::default()
        };
        let refs = Arc::new(Mutex::new(Vec::new()));

        struct RefSurface(Arc<Mutex<Vec<citations::CitationRef>>>);
        impl ChatSurface for RefSurface {
            fn system_message(&mut self, _text: &str) {}
            fn user_message(&mut self, _text: &str) {}
            fn typing_started(&mut self, _turn: u64) {}
            fn render_assistant(&mut self, _turn: u64, _message: &RenderedMessage) {}
            fn attach_citations(&mut self, _turn: u64, _html: &str, citations: &[citations::CitationRef]) {
                self.0.lock().unwrap().extend_from_slice(citations);
            }
            fn set_input_enabled(&mut self, _enabled: bool) {}
            fn connection_changed(&mut self, _event: &ConnectionEvent) {}
        }

        let mut session = SessionController::new(
            &config,
            "v",
            sink,
            Box::new(RefSurface(refs.clone())),
            Arc::new(CmarkRenderer),
        );
        let cite = |text: &str| Citation {
            id: 1,
            text: text.to_string(),
            metadata: Default::default(),
        };

        session.send("q").unwrap();
        session.handle_frame(InboundFrame::Start);
        session.handle_frame(InboundFrame::Chunk(DecodedChunk {
            text: "See [citation:1]".into(),
            citations: vec![cite("first"), cite("second")],
        }));
        session.handle_frame(InboundFrame::End);

        let refs = refs.lock().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].excerpt, "first...");
    }

    #[test]
    fn test_connection_loss_resets_pending_turn() {
        let (mut session, _, counters) = controller(true, Some("kb"));
        session.send("hello").unwrap();
        session.handle_event(ConnectionEvent::Reconnecting {
            attempt: 1,
            delay: std::time::Duration::from_millis(10),
        });

        assert_eq!(session.turn_state(), TurnState::Idle);
        assert_eq!(counters.lock().unwrap().input_enabled, vec![false, true]);
    }

    #[test]
    fn test_stray_frames_are_ignored() {
        let (mut session, _, counters) = controller(true, Some("kb"));
        session.handle_frame(InboundFrame::Chunk(DecodedChunk {
            text: "orphan".into(),
            citations: Vec::new(),
        }));
        session.handle_frame(InboundFrame::End);

        assert!(session.current_turn().is_none());
        assert!(session.history().is_empty());
        assert!(counters.lock().unwrap().renders.is_empty());
    }

    #[test]
    fn test_knowledge_base_locks_after_first_turn() {
        let (mut session, _, _) = controller(true, None);
        session.select_knowledge_base("a").unwrap();
        session.select_knowledge_base("b").unwrap();
        session.send("question").unwrap();

        assert!(matches!(
            session.select_knowledge_base("c"),
            Err(WidgetError::KnowledgeBaseLocked(current)) if current == "b"
        ));
        assert!(session.select_knowledge_base("b").is_ok());
        assert_eq!(session.auth_payload().kb_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_blank_knowledge_base_is_rejected() {
        let (mut session, sink, _) = controller(true, None);
        assert!(matches!(
            session.select_knowledge_base("   "),
            Err(WidgetError::EmptyKnowledgeBase)
        ));
        assert_eq!(session.kb_id(), None);
        assert_eq!(session.send("hi"), Err(SendRejected::NoKnowledgeBase));
        assert!(sink.sent.lock().unwrap().is_empty());

        session.select_knowledge_base("  docs ").unwrap();
        assert_eq!(session.kb_id(), Some("docs"));
    }

    #[test]
    fn test_failed_transmit_rolls_back_history() {
        struct DroppingSink;
        impl FrameSink for DroppingSink {
            fn is_open(&self) -> bool {
                true
            }
            fn send(&self, _frame: &OutboundFrame) -> bool {
                false
            }
        }

        let config = WidgetConfig {
            kb_id: Some("kb".into()),
            ..WidgetConfig::default()
        };
        let mut session = SessionController::new(
            &config,
            "v",
            Arc::new(DroppingSink),
            Box::new(CountingSurface(Arc::default())),
            Arc::new(CmarkRenderer),
        );

        assert_eq!(session.send("hi"), Err(SendRejected::NotConnected));
        assert!(session.history().is_empty());
        assert_eq!(session.turn_state(), TurnState::Idle);
    }
}
