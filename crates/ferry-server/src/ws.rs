//! HTTP surface: health check plus the two WebSocket endpoints.
//!
//! `GET /ws?token=<t>` authenticates before the upgrade and speaks JSON
//! text frames. `GET /ws-bin` upgrades first, then requires an
//! `AUTH <token>` text frame within the auth deadline and speaks Protobuf
//! binary frames (JSON text frames are still accepted per-frame).

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::Method;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router as HttpRouter};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use ferry_proto::codec;
use ferry_proto::constants::{
    AUTH_DEADLINE_SECS, MAX_FRAME, PING_PERIOD_SECS, PONG_WAIT_SECS, WRITE_WAIT_SECS,
};
use ferry_proto::{Encoding, Message, Transport};

use crate::error::{ServerError, SessionError};
use crate::session::SessionHandle;
use crate::state::NodeContext;

pub fn build_router(ctx: NodeContext) -> HttpRouter {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    HttpRouter::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route("/ws-bin", get(ws_bin_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

pub async fn serve(ctx: NodeContext, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], ctx.config.server.port).into();
    let app = build_router(ctx);

    info!(%addr, "HTTP/WebSocket server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    node: String,
    version: &'static str,
}

async fn health_check(State(ctx): State<NodeContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        node: ctx.router.node_id().to_string(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// JSON WebSocket: the token travels in the query string and is checked
/// before the upgrade.
async fn ws_handler(
    State(ctx): State<NodeContext>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let token = query.token.ok_or(ServerError::MissingToken)?;
    let user = ctx.verifier.verify(&token)?;

    info!(user = %user, "WebSocket JSON session authenticated");
    Ok(ws.on_upgrade(move |socket| run_session(socket, user, Transport::WsJson, ctx)))
}

/// Binary WebSocket: upgrade first, then stream-style AUTH as the first
/// frame.
async fn ws_bin_handler(State(ctx): State<NodeContext>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_binary_session(socket, ctx))
}

async fn run_binary_session(mut socket: WebSocket, ctx: NodeContext) {
    let user = match authenticate_first_frame(&mut socket, &ctx).await {
        Ok(user) => user,
        Err(reason) => {
            debug!(reason, "binary WebSocket auth failed");
            let _ = socket
                .send(WsMessage::Text(format!("ERROR {reason}").into()))
                .await;
            return;
        }
    };

    if socket.send(WsMessage::Text("OK".into())).await.is_err() {
        return;
    }

    info!(user = %user, "WebSocket binary session authenticated");
    run_session(socket, user, Transport::WsBinary, ctx).await;
}

async fn authenticate_first_frame(
    socket: &mut WebSocket,
    ctx: &NodeContext,
) -> Result<String, &'static str> {
    let deadline = Duration::from_secs(AUTH_DEADLINE_SECS);
    let frame = match timeout(deadline, socket.recv()).await {
        Err(_) => return Err("authentication timed out"),
        Ok(None) => return Err("connection closed"),
        Ok(Some(Err(_))) => return Err("connection error"),
        Ok(Some(Ok(frame))) => frame,
    };

    let WsMessage::Text(line) = frame else {
        return Err("expected AUTH frame");
    };
    let token =
        crate::auth::parse_auth_command(line.as_str()).ok_or("invalid authentication format")?;

    ctx.verifier
        .verify(token)
        .map_err(|_| "authentication failed")
}

/// Shared body of both WebSocket session kinds: register, run the two
/// loops, unregister exactly once.
async fn run_session(socket: WebSocket, user: String, transport: Transport, ctx: NodeContext) {
    let (handle, outbound_rx) = SessionHandle::new(user, transport, ctx.router.clone());
    ctx.router.clone().register_session(&handle).await;

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, outbound_rx, handle.clone()));

    read_loop(stream, &handle).await;

    handle.close();
    ctx.router
        .unregister_session(handle.user(), handle.session_id())
        .await;
    let _ = writer.await;
    info!(user = %handle.user(), transport = %handle.transport(), "session closed");
}

async fn read_loop(mut stream: SplitStream<WebSocket>, handle: &SessionHandle) {
    let cancel = handle.cancel_token();
    let liveness = Duration::from_secs(PONG_WAIT_SECS);

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            next = timeout(liveness, stream.next()) => match next {
                Err(_) => {
                    info!(user = %handle.user(), "no traffic within liveness window, closing");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(err))) => {
                    debug!(user = %handle.user(), %err, "websocket read error");
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            },
        };

        // Oversize payloads are rejected per frame; unlike the stream
        // transport there is no length desync, so the session survives.
        let payload_len = match &frame {
            WsMessage::Text(text) => text.len(),
            WsMessage::Binary(data) => data.len(),
            _ => 0,
        };
        if payload_len > MAX_FRAME {
            debug!(user = %handle.user(), payload_len, "oversize frame rejected");
            let reply = Message::error_reply(
                handle.user(),
                "frame too large",
                400,
                "",
                Utc::now().timestamp(),
            );
            if handle.send(reply).is_err() {
                break;
            }
            continue;
        }

        let decoded = match frame {
            WsMessage::Text(text) => codec::decode(text.as_bytes(), Encoding::Json),
            WsMessage::Binary(data) if handle.transport() == Transport::WsBinary => {
                codec::decode(&data, Encoding::Protobuf)
            }
            WsMessage::Binary(_) => {
                debug!(user = %handle.user(), "binary frame on JSON endpoint rejected");
                let reply = Message::error_reply(
                    handle.user(),
                    "binary frames are not accepted on this endpoint",
                    400,
                    "",
                    Utc::now().timestamp(),
                );
                if handle.send(reply).is_err() {
                    break;
                }
                continue;
            }
            // Transport-level ping/pong keeps the socket alive and counts
            // as traffic; the application heartbeat is separate.
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            WsMessage::Close(_) => break,
        };

        match decoded {
            Ok(msg) => handle.process_inbound(msg).await,
            Err(err) => {
                debug!(user = %handle.user(), %err, "inbound frame decode failed");
                let reply = Message::error_reply(
                    handle.user(),
                    "malformed message",
                    400,
                    "",
                    Utc::now().timestamp(),
                );
                if handle.send(reply).is_err() {
                    break;
                }
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<Message>,
    handle: SessionHandle,
) {
    let cancel = handle.cancel_token();
    let encoding = handle.transport().encoding();
    let period = Duration::from_secs(PING_PERIOD_SECS);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if write_message(&mut sink, &Message::ping(), encoding).await.is_err() {
                    handle.close();
                    break;
                }
            }
            maybe = rx.recv() => {
                let Some(msg) = maybe else { break };
                if write_message(&mut sink, &msg, encoding).await.is_err() {
                    warn!(user = %handle.user(), "websocket write failed, closing session");
                    handle.close();
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

async fn write_message(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    msg: &Message,
    encoding: Encoding,
) -> Result<(), SessionError> {
    let payload = codec::encode(msg, encoding).map_err(|_| SessionError::Closed)?;
    let frame = match encoding {
        Encoding::Json => {
            let text = String::from_utf8(payload).map_err(|_| SessionError::Closed)?;
            WsMessage::Text(text.into())
        }
        Encoding::Protobuf => WsMessage::Binary(payload.into()),
    };

    // JSON browser clients get limited write retries; binary clients
    // reconnect cheaply and fail fast instead.
    let attempts = if encoding == Encoding::Json { 3 } else { 1 };
    let deadline = Duration::from_secs(WRITE_WAIT_SECS);

    for attempt in 1..=attempts {
        match timeout(deadline, sink.send(frame.clone())).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(err)) => debug!(attempt, %err, "websocket write failed"),
            Err(_) => debug!(attempt, "websocket write timed out"),
        }
        if attempt < attempts {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
    Err(SessionError::Closed)
}
