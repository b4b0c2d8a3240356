//! Minimal TCP test client: authenticates, sends a message, prints what
//! comes back.
//!
//! ```text
//! cargo run --example tcp_client -- <secret> <user> <recipient> [addr]
//! ```
//!
//! The secret must match the server's `auth.secret`; the client mints its
//! own token from it, which is only sensible against a dev instance.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use ferry_proto::framing::{decode_frame, encode_frame};
use ferry_proto::{codec, Encoding, Message, MessageType};
use ferry_server::auth::TokenVerifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let (Some(secret), Some(user), Some(recipient)) = (args.next(), args.next(), args.next())
    else {
        eprintln!("usage: tcp_client <secret> <user> <recipient> [addr]");
        std::process::exit(2);
    };
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:8083".to_string());

    let token = TokenVerifier::new(&secret).issue(&user, 3600);

    let stream = TcpStream::connect(&addr).await?;
    println!("connected to {addr}");
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half
        .write_all(format!("AUTH {token}\n").as_bytes())
        .await?;
    let mut response = String::new();
    reader.read_line(&mut response).await?;
    let response = response.trim();
    if response != "OK" {
        anyhow::bail!("authentication failed: {response}");
    }
    println!("authenticated as {user}");

    let msg = Message::text(&user, &recipient, "Hello from the TCP client!");
    let payload = codec::encode(&msg, Encoding::Protobuf)?;
    let mut frame = BytesMut::new();
    encode_frame(&mut frame, Encoding::Protobuf, &payload)?;
    write_half.write_all(&frame).await?;
    println!("sent message to {recipient}");

    // Print whatever the server sends for a while, answering pings.
    let mut buf = BytesMut::with_capacity(8 * 1024);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(120);
    loop {
        while let Some(frame) = decode_frame(&mut buf)? {
            let msg = codec::decode(&frame.payload, frame.encoding)?;
            println!(
                "<- {:?} from {}: {}",
                msg.kind,
                msg.sender,
                if msg.content.is_empty() { "(no content)" } else { &msg.content }
            );
            if msg.kind == MessageType::Ping {
                let pong = Message::pong(&user, msg.timestamp);
                let payload = codec::encode(&pong, Encoding::Protobuf)?;
                let mut out = BytesMut::new();
                encode_frame(&mut out, Encoding::Protobuf, &payload)?;
                write_half.write_all(&out).await?;
            }
        }

        let read = tokio::time::timeout_at(deadline, reader.read_buf(&mut buf)).await;
        match read {
            Err(_) => break,
            Ok(Ok(0)) => {
                println!("server closed the connection");
                break;
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => return Err(err.into()),
        }
    }

    Ok(())
}
