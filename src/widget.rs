// src/widget.rs
// Mounted widget: one connection task feeding one session controller

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::WidgetConfig;
use crate::connection::{ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionState};
use crate::error::{Result, SendRejected};
use crate::protocol::AuthPayload;
use crate::render::MarkdownRenderer;
use crate::session::SessionController;
use crate::surface::ChatSurface;

pub struct ChatWidget {
    connection: ConnectionHandle,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    session: SessionController,
    finished: bool,
}

impl ChatWidget {
    /// Validate the endpoint, start connecting and show the greeting.
    /// Must be called inside a tokio runtime.
    pub fn mount(
        config: &WidgetConfig,
        visitor_id: impl Into<String>,
        surface: Box<dyn ChatSurface>,
        renderer: Arc<dyn MarkdownRenderer>,
    ) -> Result<Self> {
        let endpoint = config.endpoint()?;
        let visitor_id = visitor_id.into();

        let auth = AuthPayload {
            visitor_id: visitor_id.clone(),
            kb_id: config.kb_id.clone().filter(|id| !id.trim().is_empty()),
        };
        let (connection, events) =
            ConnectionManager::spawn(endpoint.as_str(), auth, &config.reconnect);

        let mut session = SessionController::new(
            config,
            visitor_id,
            Arc::new(connection.clone()),
            surface,
            renderer,
        );
        session.greet(&config.greeting);
        info!("Chat widget mounted for {}", endpoint);

        Ok(Self {
            connection,
            events,
            session,
            finished: false,
        })
    }

    pub fn send(&mut self, text: &str) -> std::result::Result<(), SendRejected> {
        self.session.send(text)
    }

    /// Select the knowledge base and re-authenticate with it
    pub fn select_knowledge_base(&mut self, kb_id: impl Into<String>) -> Result<()> {
        let auth = self.session.select_knowledge_base(kb_id)?;
        self.connection.reauthenticate(auth);
        Ok(())
    }

    /// Close the connection for good; no reconnect follows
    pub fn close(&self) {
        self.connection.close();
    }

    /// Wait for the next connection event and hand it to the session.
    /// Returns `false` once the connection has ended for good.
    pub async fn pump(&mut self) -> bool {
        if self.finished {
            return false;
        }

        let Some(event) = self.events.recv().await else {
            debug!("Connection event channel closed");
            self.finished = true;
            return false;
        };

        let terminal = matches!(
            event,
            ConnectionEvent::Closed { .. } | ConnectionEvent::ReconnectExhausted { .. }
        );
        self.session.handle_event(event);
        if terminal {
            self.finished = true;
        }
        !terminal
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }
}
