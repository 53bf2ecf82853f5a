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

use crate::error::SessionError;
use crate::message::MessageType;
use crate::session::{WebSocketSession, WebSocketSessionExt};
use futures::future::{self, BoxFuture};
use futures::{FutureExt, StreamExt};
use std::sync::Arc;
use tracing::debug;

/// Application logic run once per session.
pub trait WebSocketHandler: Send + Sync {
    /// Sub-protocols this handler speaks, in preference order.
    fn sub_protocols(&self) -> Vec<String> {
        Vec::new()
    }

    /// Drive `session` until the handler is done with it.
    fn handle(&self, session: Arc<dyn WebSocketSession>) -> BoxFuture<'static, Result<(), SessionError>>;
}

/// Sends every text and binary message back; answers pings with pongs.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoHandler;

impl WebSocketHandler for EchoHandler {
    fn sub_protocols(&self) -> Vec<String> {
        vec!["echo".to_string()]
    }

    fn handle(&self, session: Arc<dyn WebSocketSession>) -> BoxFuture<'static, Result<(), SessionError>> {
        let responder = Arc::clone(&session);
        let replies = session
            .receive()
            .filter_map(move |item| {
                let reply = match item {
                    Ok(message) => match message.message_type() {
                        MessageType::Text | MessageType::Binary => Some(Ok(message)),
                        MessageType::Ping => Some(Ok(responder.pong_message(|_| message.into_payload()))),
                        MessageType::Pong => None,
                    },
                    Err(e) => Some(Err(e)),
                };
                future::ready(reply)
            })
            .boxed();

        async move {
            let outcome = session.send(replies).await;
            debug!("echo finished for {session}: {outcome:?}");
            outcome
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::memory;
    use crate::session::SessionState;
    use crate::CloseStatus;

    #[tokio::test]
    async fn test_echo_round_trip() {
        let (client, server) = memory::session_pair(&TransportConfig::default()).unwrap();
        let server: Arc<dyn WebSocketSession> = Arc::new(server);
        let echo = tokio::spawn(EchoHandler.handle(Arc::clone(&server)));

        let mut inbound = client.receive();
        client.send_message(client.text_message("marco")).await.unwrap();
        let reply = inbound.next().await.unwrap().unwrap();
        assert_eq!(reply.payload_as_text().unwrap(), "marco");

        client
            .send_message(client.ping_message(|f| f.wrap_vec(vec![7])))
            .await
            .unwrap();
        let reply = inbound.next().await.unwrap().unwrap();
        assert_eq!(reply.message_type(), MessageType::Pong);
        assert_eq!(reply.payload().as_bytes(), &[7]);

        drop(inbound);
        client.close(CloseStatus::NORMAL).await.unwrap();
        assert_eq!(echo.await.unwrap(), Ok(()));
        assert_eq!(server.state(), SessionState::Closed);
    }

    #[test]
    fn test_echo_advertises_protocol() {
        assert_eq!(EchoHandler.sub_protocols(), vec!["echo"]);
    }
}
