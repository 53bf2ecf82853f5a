/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};
use ws_session::native_websocket::NativeWebSocket;
use ws_session::{CloseStatus, EchoHandler, TransportConfig, WebSocketHandler, WebSocketSession};

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    let bind_addr =
        std::env::var("WS_SESSION_BIND_ADDR").unwrap_or_else(|_| String::from(DEFAULT_BIND_ADDR));
    let handler: Arc<dyn WebSocketHandler> = Arc::new(EchoHandler);

    let mut config = TransportConfig::from_env();
    if config.subprotocols.is_empty() {
        config.subprotocols = handler.sub_protocols();
    }
    let websocket = NativeWebSocket::new(config);

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("ws_echo_server listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        let websocket = websocket.clone();
        let handler = Arc::clone(&handler);

        tokio::spawn(async move {
            let session = match websocket.accept(stream).await {
                Ok(session) => Arc::new(session),
                Err(e) => {
                    warn!("Rejected connection from {peer}: {e}");
                    return;
                }
            };
            info!("Session {} opened from {peer}", session.id());

            if let Err(e) = handler.handle(session.clone()).await {
                error!("Session {session} failed: {e}");
            }
            if let Err(e) = session.close(CloseStatus::NORMAL).await {
                debug!("Close of {session} failed: {e}");
            }
            info!("Session {} finished", session.id());
        });
    }
}
