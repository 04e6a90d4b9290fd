//! Viewer-facing side of a WebSocket connection

use axum::extract::ws::{CloseFrame, Message, WebSocket};

use kubesight_types::StreamEvent;

/// Application close code for rejected stream requests
pub const CLOSE_INVALID_REQUEST: u16 = 4400;

/// A WebSocket that turns writes to a gone peer into no-ops
pub(crate) struct WsTransport {
    socket: WebSocket,
    alive: bool,
}

impl WsTransport {
    pub(crate) fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            alive: true,
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive
    }

    /// Send one event; returns whether the peer is still there
    pub(crate) async fn send_event(&mut self, event: StreamEvent) -> bool {
        let text = match event {
            StreamEvent::Chunk(text) => text,
            StreamEvent::Control(control) => control.to_frame(),
        };
        self.send(Message::Text(text.into())).await
    }

    /// Liveness ping
    pub(crate) async fn ping(&mut self) -> bool {
        self.send(Message::Ping(Vec::new().into())).await
    }

    pub(crate) async fn close(&mut self, code: u16, reason: &'static str) {
        self.send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
        self.alive = false;
    }

    /// Next message from the viewer; `None` once it is gone
    pub(crate) async fn recv(&mut self) -> Option<Result<Message, axum::Error>> {
        if !self.alive {
            return None;
        }
        let message = self.socket.recv().await;
        if matches!(message, None | Some(Err(_)) | Some(Ok(Message::Close(_)))) {
            self.alive = false;
        }
        message
    }

    async fn send(&mut self, message: Message) -> bool {
        if !self.alive {
            return false;
        }
        if let Err(e) = self.socket.send(message).await {
            tracing::debug!(error = %e, "Viewer gone, dropping further writes");
            self.alive = false;
        }
        self.alive
    }
}
