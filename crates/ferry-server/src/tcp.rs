//! Raw TCP surface.
//!
//! A connection starts with a line-based preamble: the client sends
//! `AUTH <token>\n` within the auth deadline and gets `OK\n` or
//! `ERROR <reason>\n` back. After that the stream switches to
//! `[tag][len][payload]` framing; a framing error desynchronizes the
//! stream and kills the session.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ferry_proto::constants::{AUTH_DEADLINE_SECS, PING_PERIOD_SECS, PONG_WAIT_SECS, WRITE_WAIT_SECS};
use ferry_proto::framing::{decode_frame, encode_frame};
use ferry_proto::{codec, Encoding, Message, Transport};

use crate::session::SessionHandle;
use crate::state::NodeContext;

pub async fn serve(ctx: NodeContext, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", ctx.config.tcp.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "TCP server listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            debug!(%peer, "TCP connection accepted");
                            handle_connection(stream, ctx).await;
                        });
                    }
                    Err(err) => warn!(%err, "failed to accept TCP connection"),
                }
            }
        }
    }

    Ok(())
}

async fn handle_connection(stream: TcpStream, ctx: NodeContext) {
    let _ = stream.set_nodelay(true);
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let user = match authenticate(&mut reader, &ctx).await {
        Ok(user) => user,
        Err(reason) => {
            debug!(reason, "TCP authentication failed");
            let _ = write_half
                .write_all(format!("ERROR {reason}\n").as_bytes())
                .await;
            return;
        }
    };
    if write_half.write_all(b"OK\n").await.is_err() {
        return;
    }

    info!(user = %user, "TCP session authenticated");

    let (handle, outbound_rx) =
        SessionHandle::new(user, Transport::TcpBinary, ctx.router.clone());
    ctx.router.clone().register_session(&handle).await;

    let writer = tokio::spawn(write_loop(write_half, outbound_rx, handle.clone()));

    read_loop(reader, &handle).await;

    handle.close();
    ctx.router
        .unregister_session(handle.user(), handle.session_id())
        .await;
    let _ = writer.await;
    info!(user = %handle.user(), "TCP session closed");
}

async fn authenticate(
    reader: &mut BufReader<OwnedReadHalf>,
    ctx: &NodeContext,
) -> Result<String, &'static str> {
    use tokio::io::AsyncBufReadExt;

    let mut line = String::new();
    let deadline = Duration::from_secs(AUTH_DEADLINE_SECS);
    match timeout(deadline, reader.read_line(&mut line)).await {
        Err(_) => return Err("authentication timed out"),
        Ok(Ok(0)) => return Err("connection closed"),
        Ok(Err(_)) => return Err("read error"),
        Ok(Ok(_)) => {}
    }

    let token = crate::auth::parse_auth_command(&line).ok_or("invalid authentication format")?;

    ctx.verifier
        .verify(token)
        .map_err(|_| "authentication failed")
}

async fn read_loop(mut reader: BufReader<OwnedReadHalf>, handle: &SessionHandle) {
    let cancel = handle.cancel_token();
    let liveness = Duration::from_secs(PONG_WAIT_SECS);
    let mut buf = BytesMut::with_capacity(8 * 1024);

    'outer: loop {
        // Drain every complete frame already buffered.
        loop {
            match decode_frame(&mut buf) {
                Ok(Some(frame)) => match codec::decode(&frame.payload, frame.encoding) {
                    Ok(msg) => handle.process_inbound(msg).await,
                    Err(err) => {
                        // The frame boundary was sound; only the payload is
                        // bad. Reply and keep the stream.
                        debug!(user = %handle.user(), %err, "TCP payload decode failed");
                        let reply = Message::error_reply(
                            handle.user(),
                            "malformed message",
                            400,
                            "",
                            chrono::Utc::now().timestamp(),
                        );
                        if handle.send(reply).is_err() {
                            break 'outer;
                        }
                    }
                },
                Ok(None) => break,
                Err(err) => {
                    // Length desync; the stream is unrecoverable.
                    warn!(user = %handle.user(), %err, "TCP framing error, closing session");
                    break 'outer;
                }
            }
        }

        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = timeout(liveness, reader.read_buf(&mut buf)) => read,
        };
        match read {
            Err(_) => {
                info!(user = %handle.user(), "no traffic within liveness window, closing");
                break;
            }
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                debug!(user = %handle.user(), %err, "TCP read error");
                break;
            }
        }
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Message>, handle: SessionHandle) {
    let cancel = handle.cancel_token();
    let period = Duration::from_secs(PING_PERIOD_SECS);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        let msg = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => Message::ping(),
            maybe = rx.recv() => {
                let Some(msg) = maybe else { break };
                msg
            }
        };

        if write_message(&mut writer, &msg).await.is_err() {
            warn!(user = %handle.user(), "TCP write failed, closing session");
            handle.close();
            break;
        }
    }

    let _ = writer.shutdown().await;
}

async fn write_message(writer: &mut OwnedWriteHalf, msg: &Message) -> std::io::Result<()> {
    let payload = codec::encode(msg, Encoding::Protobuf)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    let mut frame = BytesMut::with_capacity(payload.len() + 5);
    encode_frame(&mut frame, Encoding::Protobuf, &payload)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;

    let deadline = Duration::from_secs(WRITE_WAIT_SECS);
    match timeout(deadline, writer.write_all(&frame)).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "write deadline exceeded",
        )),
    }
}
