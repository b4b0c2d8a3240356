//! One authenticated client attachment.
//!
//! A [`SessionHandle`] is the capability set the rest of the node sees:
//! non-blocking `send`, idempotent `close`, and a terminal-state observer.
//! The transport loops (in `ws` and `tcp`) own the actual socket; they and
//! the router communicate only through the bounded outbound queue and the
//! cancellation token, never through shared mutable state.
//!
//! The session consumes the dispatcher through the [`MessageRouter`] trait,
//! injected at construction. The concrete [`Router`](crate::router::Router)
//! is the production implementation; tests substitute stubs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use ferry_proto::constants::OUTBOUND_QUEUE_SIZE;
use ferry_proto::{Message, MessageType, Transport};

use crate::error::{RouteError, SessionError};

/// What a session needs from the dispatcher: accept an outbound chat
/// message, and fan a client `status` update out as presence.
#[async_trait]
pub trait MessageRouter: Send + Sync {
    async fn route(&self, msg: Message) -> Result<(), RouteError>;

    async fn broadcast_status(&self, msg: &Message);
}

#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    user: String,
    transport: Transport,
    session_id: String,
    outbound: mpsc::Sender<Message>,
    cancel: CancellationToken,
    router: Arc<dyn MessageRouter>,
}

impl SessionHandle {
    /// Create a session for an authenticated user, wired to the router it
    /// dispatches through. Returns the handle and the receiving end of the
    /// outbound queue, which the transport's write loop consumes.
    pub fn new(
        user: impl Into<String>,
        transport: Transport,
        router: Arc<dyn MessageRouter>,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let handle = Self {
            inner: Arc::new(SessionInner {
                user: user.into(),
                transport,
                session_id: Uuid::new_v4().to_string(),
                outbound: tx,
                cancel: CancellationToken::new(),
                router,
            }),
        };
        (handle, rx)
    }

    pub fn user(&self) -> &str {
        &self.inner.user
    }

    pub fn transport(&self) -> Transport {
        self.inner.transport
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Queue a message for the write loop. Never blocks: a saturated queue
    /// is `BufferFull` and a terminated session is `Closed`; the router
    /// picks another path in either case.
    pub fn send(&self, msg: Message) -> Result<(), SessionError> {
        if self.inner.cancel.is_cancelled() {
            return Err(SessionError::Closed);
        }
        self.inner.outbound.try_send(msg).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SessionError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => SessionError::Closed,
        })
    }

    /// Enter the terminal state. Idempotent; the transport loops observe
    /// the token and drain out.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Token observed by the transport loops (and anything else that wants
    /// to wait on the terminal state).
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// The read-loop pipeline shared by every transport: stamp the
    /// message, intercept control traffic, validate the destination, hand
    /// the rest to the router. Error replies go back on this session.
    pub async fn process_inbound(&self, mut msg: Message) {
        let now = Utc::now().timestamp();

        // The client does not get to speak for anyone else.
        msg.sender = self.user().to_string();
        msg.ensure_timestamp(now);

        match msg.kind {
            MessageType::Ping => {
                if let Err(err) = self.send(Message::pong(self.user(), now)) {
                    warn!(user = %self.user(), %err, "failed to queue pong reply");
                }
                return;
            }
            MessageType::Pong => {
                // Liveness is tracked by the read deadline; nothing else
                // to do.
                debug!(user = %self.user(), "pong received");
                return;
            }
            MessageType::Status => {
                self.inner.router.broadcast_status(&msg).await;
                return;
            }
            _ => {}
        }

        if !msg.has_destination() {
            debug!(user = %self.user(), kind = ?msg.kind, "message without destination rejected");
            let reply = Message::error_reply(
                self.user(),
                "message is missing a recipient",
                400,
                msg.request_id.clone(),
                now,
            );
            if let Err(err) = self.send(reply) {
                warn!(user = %self.user(), %err, "failed to queue error reply");
            }
            return;
        }

        msg.ensure_id();
        // Downstream storage keys on conversation_id; synthesize one for
        // bare 1:1 messages.
        if msg.conversation_id.is_empty() && !msg.is_group && !msg.recipient.is_empty() {
            msg.conversation_id = Uuid::new_v4().to_string();
        }

        let request_id = msg.request_id.clone();
        if let Err(err) = self.inner.router.route(msg).await {
            warn!(user = %self.user(), %err, "routing failed");
            let reply = Message::error_reply(
                self.user(),
                format!("message could not be delivered: {err}"),
                500,
                request_id,
                now,
            );
            if let Err(send_err) = self.send(reply) {
                warn!(user = %self.user(), %send_err, "failed to queue error reply");
            }
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("user", &self.inner.user)
            .field("transport", &self.inner.transport)
            .field("session_id", &self.inner.session_id)
            .field("closed", &self.inner.cancel.is_cancelled())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::session;
    use super::*;

    #[test]
    fn send_after_close_is_closed() {
        let (handle, _rx) = session("u1", Transport::WsJson);
        handle.close();
        assert_eq!(
            handle.send(Message::ping()).unwrap_err(),
            SessionError::Closed
        );
    }

    #[test]
    fn close_is_idempotent() {
        let (handle, _rx) = session("u1", Transport::WsJson);
        handle.close();
        handle.close();
        assert!(handle.is_closed());
    }

    #[test]
    fn queue_saturation_reports_buffer_full() {
        let (handle, _rx) = session("u1", Transport::TcpBinary);

        for i in 0..OUTBOUND_QUEUE_SIZE {
            handle
                .send(Message::text("s", "u1", format!("m{i}")))
                .unwrap_or_else(|_| panic!("queue filled early at {i}"));
        }
        assert_eq!(
            handle.send(Message::text("s", "u1", "overflow")).unwrap_err(),
            SessionError::BufferFull
        );
    }

    #[test]
    fn dropping_receiver_closes_the_session_for_senders() {
        let (handle, rx) = session("u1", Transport::WsBinary);
        drop(rx);
        assert_eq!(
            handle.send(Message::ping()).unwrap_err(),
            SessionError::Closed
        );
    }

    #[test]
    fn session_ids_are_unique() {
        let (a, _rxa) = session("u1", Transport::WsJson);
        let (b, _rxb) = session("u1", Transport::WsJson);
        assert_ne!(a.session_id(), b.session_id());
    }
}
