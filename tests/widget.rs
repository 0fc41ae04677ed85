// tests/widget.rs
// End-to-end turns: mounted widget, recording surface, local backend

use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

use rag_chat::citations::CitationRef;
use rag_chat::config::{ReconnectConfig, WidgetConfig};
use rag_chat::connection::{ConnectionEvent, ConnectionState};
use rag_chat::protocol::{LLM_RESPONSE_SENTINEL, Role};
use rag_chat::session::TurnState;
use rag_chat::{ChatSurface, ChatWidget, CmarkRenderer, RenderedMessage, SendRejected};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Recorded {
    system: Vec<String>,
    users: Vec<String>,
    typing: Vec<u64>,
    renders: Vec<(u64, RenderedMessage)>,
    citations: Vec<(u64, String, Vec<CitationRef>)>,
    input_enabled: Vec<bool>,
    connection: Vec<ConnectionEvent>,
}

#[derive(Clone, Default)]
struct RecordingSurface(Arc<Mutex<Recorded>>);

impl RecordingSurface {
    fn with<T>(&self, f: impl FnOnce(&Recorded) -> T) -> T {
        f(&self.0.lock().unwrap())
    }
}

impl ChatSurface for RecordingSurface {
    fn system_message(&mut self, text: &str) {
        self.0.lock().unwrap().system.push(text.to_string());
    }

    fn user_message(&mut self, text: &str) {
        self.0.lock().unwrap().users.push(text.to_string());
    }

    fn typing_started(&mut self, turn: u64) {
        self.0.lock().unwrap().typing.push(turn);
    }

    fn render_assistant(&mut self, turn: u64, message: &RenderedMessage) {
        self.0.lock().unwrap().renders.push((turn, message.clone()));
    }

    fn attach_citations(&mut self, turn: u64, html: &str, citations: &[CitationRef]) {
        self.0
            .lock()
            .unwrap()
            .citations
            .push((turn, html.to_string(), citations.to_vec()));
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        self.0.lock().unwrap().input_enabled.push(enabled);
    }

    fn connection_changed(&mut self, event: &ConnectionEvent) {
        self.0.lock().unwrap().connection.push(event.clone());
    }
}

struct Harness {
    widget: ChatWidget,
    surface: RecordingSurface,
    server: WebSocketStream<TcpStream>,
    listener: TcpListener,
}

async fn mount(kb_id: Option<&str>, reconnect: ReconnectConfig) -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = WidgetConfig {
        ws_url: format!("ws://{}", listener.local_addr().unwrap()),
        kb_id: kb_id.map(str::to_string),
        reconnect,
        ..WidgetConfig::default()
    };

    let surface = RecordingSurface::default();
    let mut widget = ChatWidget::mount(
        &config,
        "visitor-1",
        Box::new(surface.clone()),
        Arc::new(CmarkRenderer),
    )
    .unwrap();

    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut server = accept_async(stream).await.unwrap();
    let auth = next_json(&mut server).await;
    assert_eq!(auth["type"], "auth");

    let seen = surface.clone();
    pump_until(&mut widget, move |_| {
        seen.with(|r| r.connection.contains(&ConnectionEvent::Open))
    })
    .await;

    Harness {
        widget,
        surface,
        server,
        listener,
    }
}

async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let message = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send_frames(ws: &mut WebSocketStream<TcpStream>, frames: &[Value]) {
    for frame in frames {
        ws.send(Message::Text(frame.to_string().into())).await.unwrap();
    }
}

fn chunk(content: &str) -> Value {
    json!({"type": "response_chunk", "content": content})
}

async fn pump_until(widget: &mut ChatWidget, done: impl Fn(&ChatWidget) -> bool) {
    timeout(WAIT, async {
        while !done(&*widget) {
            assert!(widget.pump().await, "connection ended early");
        }
    })
    .await
    .expect("condition not reached");
}

fn quick_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        max_attempts: 3,
        delay_ms: 10,
    }
}

#[tokio::test]
async fn greeting_is_shown_on_mount() {
    let harness = mount(Some("kb"), quick_reconnect()).await;
    harness.surface.with(|r| {
        assert_eq!(r.system, vec!["Hello! How can I help you today?".to_string()]);
        assert!(r.connection.contains(&ConnectionEvent::Open));
    });
}

#[tokio::test]
async fn streamed_turn_is_reassembled_and_recorded() {
    let mut h = mount(Some("kb"), quick_reconnect()).await;

    h.widget.send("hi").unwrap();
    assert_eq!(
        next_json(&mut h.server).await,
        json!({"type": "chat", "kb_id": "kb", "messages": [{"role": "user", "content": "hi"}]})
    );

    send_frames(
        &mut h.server,
        &[
            json!({"type": "start"}),
            chunk(r#"0:"Hello""#),
            chunk(r#"1:" world""#),
            json!({"type": "end"}),
        ],
    )
    .await;
    pump_until(&mut h.widget, |w| w.session().turn_state() == TurnState::Idle).await;

    let history: Vec<_> = h.widget.session().history().iter().cloned().collect();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "Hello world");

    h.surface.with(|r| {
        assert_eq!(r.users, vec!["hi".to_string()]);
        assert_eq!(r.typing, vec![1]);
        let (turn, last) = r.renders.last().unwrap();
        assert_eq!(*turn, 1);
        assert_eq!(last.markdown, "Hello world");
        assert!(last.html.contains("Hello world"));
        assert!(r.citations.is_empty());
        assert_eq!(r.input_enabled, vec![false, true]);
    });
}

#[tokio::test]
async fn citations_attach_after_final_render() {
    let mut h = mount(Some("kb"), quick_reconnect()).await;

    let context = json!({"context": [
        {"page_content": "Alpha beta", "metadata": {"source": "a.pdf", "page": 2}}
    ]});
    let payload = format!(
        "{}{}See [citation:1]",
        STANDARD.encode(context.to_string()),
        LLM_RESPONSE_SENTINEL
    );

    h.widget.send("what is alpha?").unwrap();
    let _chat = next_json(&mut h.server).await;
    send_frames(
        &mut h.server,
        &[json!({"type": "start"}), chunk(&payload), json!({"type": "end"})],
    )
    .await;
    pump_until(&mut h.widget, |w| w.session().turn_state() == TurnState::Idle).await;

    h.surface.with(|r| {
        assert_eq!(r.citations.len(), 1);
        let (turn, html, refs) = &r.citations[0];
        assert_eq!(*turn, 1);
        assert!(html.contains(r#"data-source="a.pdf""#));
        assert!(html.contains(r#"data-page="2""#));
        assert!(html.contains(r#"data-text="Alpha beta...""#));
        assert!(!html.contains("[citation:1]"));
        assert_eq!(refs[0].title, "a.pdf");

        // The final render carries the raw marker; substitution came after
        let (_, last) = r.renders.last().unwrap();
        assert!(last.html.contains("[citation:1]"));
    });
}

#[tokio::test]
async fn history_window_evicts_oldest_entries() {
    let mut h = mount(Some("kb"), quick_reconnect()).await;

    for i in 1..=6 {
        h.widget.send(&format!("question {}", i)).unwrap();
        let chat = next_json(&mut h.server).await;
        let sent = chat["messages"].as_array().unwrap().len();
        assert_eq!(sent, (2 * i - 1).min(10));

        send_frames(
            &mut h.server,
            &[
                json!({"type": "start"}),
                chunk(&format!("answer {}", i)),
                json!({"type": "end"}),
            ],
        )
        .await;
        pump_until(&mut h.widget, |w| w.session().turn_state() == TurnState::Idle).await;
    }

    let history = h.widget.session().history();
    assert_eq!(history.len(), 10);
    assert_eq!(history.iter().next().unwrap().content, "question 2");
    assert_eq!(history.last().unwrap().content, "answer 6");
}

#[tokio::test]
async fn second_send_while_streaming_is_rejected() {
    let mut h = mount(Some("kb"), quick_reconnect()).await;

    h.widget.send("first").unwrap();
    let _chat = next_json(&mut h.server).await;
    assert_eq!(h.widget.send("second"), Err(SendRejected::TurnInFlight));

    // Only the first chat frame reached the server
    send_frames(&mut h.server, &[json!({"type": "ping"})]).await;
    assert_eq!(next_json(&mut h.server).await, json!({"type": "pong"}));
    assert_eq!(h.widget.session().history().len(), 1);
}

#[tokio::test]
async fn dropped_connection_re_enables_input() {
    let mut h = mount(Some("kb"), quick_reconnect()).await;

    h.widget.send("anyone there?").unwrap();
    let _chat = next_json(&mut h.server).await;
    assert_eq!(h.widget.session().turn_state(), TurnState::AwaitingResponse);

    drop(h.server);
    pump_until(&mut h.widget, |w| {
        w.session().turn_state() == TurnState::Idle
    })
    .await;

    h.surface.with(|r| {
        assert!(
            r.connection
                .iter()
                .any(|e| matches!(e, ConnectionEvent::Reconnecting { attempt: 1, .. }))
        );
        assert_eq!(r.input_enabled.last(), Some(&true));
    });

    // The widget reconnects and authenticates again
    let (stream, _) = timeout(WAIT, h.listener.accept()).await.unwrap().unwrap();
    let mut server = accept_async(stream).await.unwrap();
    assert_eq!(next_json(&mut server).await["type"], "auth");
    pump_until(&mut h.widget, |w| w.state() == ConnectionState::Open).await;
    assert!(h.widget.send("back again").is_ok());
}

#[tokio::test]
async fn knowledge_base_switch_reauthenticates_until_first_turn() {
    let mut h = mount(None, quick_reconnect()).await;

    assert_eq!(h.widget.send("hi"), Err(SendRejected::NoKnowledgeBase));
    h.widget.select_knowledge_base("kb-2").unwrap();
    assert_eq!(
        next_json(&mut h.server).await,
        json!({"type": "auth", "visitor_id": "visitor-1", "kb_id": "kb-2"})
    );

    h.widget.send("hi").unwrap();
    assert_eq!(next_json(&mut h.server).await["kb_id"], "kb-2");
    assert!(h.widget.select_knowledge_base("kb-3").is_err());
}

#[tokio::test]
async fn close_ends_the_pump() {
    let mut h = mount(Some("kb"), quick_reconnect()).await;

    h.widget.close();
    let alive = timeout(WAIT, async {
        while h.widget.pump().await {}
    })
    .await;
    assert!(alive.is_ok());
    assert!(!h.widget.pump().await);

    h.surface.with(|r| {
        assert!(matches!(
            r.connection.last(),
            Some(ConnectionEvent::Closed { code: Some(1000), .. })
        ));
    });
}
