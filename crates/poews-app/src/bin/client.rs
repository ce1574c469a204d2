//! Minimal listener: prints every trade message the relay pushes.
//!
//! Type `quit` to close the connection.

use anyhow::Result;
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Listen to a poews relay", long_about = None)]
struct Args {
    /// Relay address
    #[arg(short, long, default_value = "localhost:8080")]
    addr: String,

    /// Push endpoint path
    #[arg(long, default_value = "/ws")]
    path: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    poews_telemetry::init_logging()?;

    let url = format!("ws://{}{}", args.addr, args.path);
    info!("Connecting to {}", url);
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    let (mut write, mut read) = ws_stream.split();
    info!("Connected. Type 'quit' to exit");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => println!("Received: {text}"),
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "Server closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Read error");
                        break;
                    }
                    None => break,
                }
            }
            line = stdin.next_line(), if stdin_open => {
                match line? {
                    Some(line) if line.trim() == "quit" => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        };
                        write.send(Message::Close(Some(frame))).await?;
                        // Wait for the server's close reply.
                        while let Some(Ok(msg)) = read.next().await {
                            if msg.is_close() {
                                break;
                            }
                        }
                        break;
                    }
                    Some(_) => {}
                    // Keep listening after stdin closes.
                    None => stdin_open = false,
                }
            }
        }
    }

    Ok(())
}
