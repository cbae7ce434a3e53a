//! A diagnostic stdin/stdout REPL handler, reachable via `--handler echo`.
//! Bypasses the HTTP-style forwarding adapter entirely: every line typed
//! at the terminal becomes a control-frame exchange, and the reply is
//! printed back. No production interest — useful for poking at a tunnel
//! by hand while developing the wire format.
//!
//! Grounded on `original_source/socket/handler.go`'s `EchoHandler`.

use crate::tunnel::{FrameKind, IngressBody, PayloadStream, TunnelHandle};
use std::io::{Cursor, Write as _};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};

pub async fn run(tunnel: TunnelHandle) {
    log::info!("echo handler attached to tunnel {}", tunnel.id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!(" [x] Enter message to send (or Ctrl-C to exit) => ");
        let _ = std::io::stdout().flush();

        let message = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };

        let payload = message.into_bytes();
        let length = payload.len() as u64;
        let stream: PayloadStream = Box::pin(Cursor::new(payload));

        let rx = match tunnel.request(FrameKind::Control, length, stream).await {
            Ok(rx) => rx,
            Err(err) => {
                println!("echo handler: failed to send ({err})");
                break;
            }
        };

        let ingress = match rx.await {
            Ok(ingress) => ingress,
            Err(_) => {
                println!("echo handler: tunnel gone before a reply arrived");
                break;
            }
        };

        match ingress.body {
            IngressBody::Payload(mut reader) => {
                let mut out = Vec::new();
                let _ = reader.read_to_end(&mut out).await;
                println!(
                    "\n ######################################################################\n\
                     # Message RECV\n\
                     # Type: {:?}. Length: {}\n\
                     # Payload: {}\n\
                     ######################################################################\n",
                    ingress.kind,
                    ingress.length,
                    String::from_utf8_lossy(&out),
                );
            }
            IngressBody::Error(err) => {
                println!("echo handler got error in reply: {err}");
                break;
            }
        }
    }

    log::info!("echo handler detached from tunnel {}", tunnel.id);
}
