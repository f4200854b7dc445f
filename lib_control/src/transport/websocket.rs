//! # WebSocket Transport
//!
//! Connects with tokio-tungstenite and bridges the socket to the channel pair
//! of a [`TransportLink`] through one pump task. Protocol-level ping/pong
//! frames are reported upward as [`PONG`] so they count as liveness evidence.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::auth::TokenSource;
use crate::error::ControlError;
use crate::protocol::PONG;
use crate::transport::{Transport, TransportLink};

/// Opens WebSocket links, optionally presenting a bearer token.
#[derive(Default)]
pub struct WebSocketTransport {
    token_source: Option<Arc<dyn TokenSource>>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token_source(token_source: Arc<dyn TokenSource>) -> Self {
        Self {
            token_source: Some(token_source),
        }
    }
}

impl Transport for WebSocketTransport {
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<TransportLink, ControlError>> {
        Box::pin(async move {
            let mut request = endpoint
                .into_client_request()
                .map_err(|e| ControlError::Transport(format!("invalid endpoint {}: {}", endpoint, e)))?;

            if let Some(source) = &self.token_source {
                match source.authorization_header() {
                    Some(header) => {
                        let value = HeaderValue::from_str(&header)
                            .map_err(|e| ControlError::Transport(format!("invalid token: {}", e)))?;
                        request.headers_mut().insert(AUTHORIZATION, value);
                    }
                    None => log::warn!("No access token available. Connecting without authorization."),
                }
            }

            let (ws_stream, _) = connect_async(request)
                .await
                .map_err(|e| ControlError::Transport(e.to_string()))?;
            log::info!("WebSocket connected to {}", endpoint);

            let (mut write, mut read) = ws_stream.split();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
            let endpoint_name = endpoint.to_string();

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        frame = out_rx.recv() => {
                            match frame {
                                Some(text) => {
                                    if let Err(e) = write.send(Message::Text(text.into())).await {
                                        log::error!("WebSocket send failed: {}", e);
                                        break;
                                    }
                                }
                                None => {
                                    log::debug!("Closing WebSocket to {}", endpoint_name);
                                    let _ = write.close().await;
                                    break;
                                }
                            }
                        }
                        msg = read.next() => {
                            let forwarded = match msg {
                                Some(Ok(Message::Text(text))) => in_tx.send(text.to_string()),
                                Some(Ok(Message::Binary(bin))) => match String::from_utf8(bin.to_vec()) {
                                    Ok(text) => in_tx.send(text),
                                    Err(_) => {
                                        log::warn!("Dropping non UTF-8 binary frame ({} bytes)", bin.len());
                                        Ok(())
                                    }
                                },
                                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                                    in_tx.send(PONG.to_string())
                                }
                                Some(Ok(Message::Close(frame))) => {
                                    log::info!("WebSocket closed by {}: {:?}", endpoint_name, frame);
                                    break;
                                }
                                Some(Ok(_)) => Ok(()),
                                Some(Err(e)) => {
                                    log::error!("WebSocket read error: {}", e);
                                    break;
                                }
                                None => {
                                    log::warn!("WebSocket stream to {} ended", endpoint_name);
                                    break;
                                }
                            };
                            if forwarded.is_err() {
                                // The client dropped its end of the link.
                                let _ = write.close().await;
                                break;
                            }
                        }
                    }
                }
            });

            Ok(TransportLink {
                outbound: out_tx,
                inbound: in_rx,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use crate::protocol::PING;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_hdr_async;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    #[tokio::test]
    async fn test_connect_refused_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = WebSocketTransport::new();
        let endpoint = format!("ws://127.0.0.1:{}/control/websocket", port);
        let result = transport.connect(&endpoint).await;

        assert!(matches!(result, Err(ControlError::Transport(_))));
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways_with_bearer_token() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut auth_header = None;
            let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                auth_header = req
                    .headers()
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(resp)
            };
            let mut ws = accept_hdr_async(stream, callback).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    if text.as_str() == PING {
                        ws.send(Message::Text(PONG.to_string().into())).await.unwrap();
                        break;
                    }
                }
            }
            auth_header
        });

        let transport = WebSocketTransport::with_token_source(Arc::new(StaticToken::new(Some(
            "secret".into(),
        ))));
        let endpoint = format!("ws://127.0.0.1:{}/control/websocket", port);
        let mut link = transport.connect(&endpoint).await.unwrap();

        link.outbound.send(PING.to_string()).unwrap();
        assert_eq!(link.inbound.recv().await.as_deref(), Some(PONG));

        assert_eq!(server.await.unwrap().as_deref(), Some("Bearer secret"));
        // The server is gone; the link reports closure.
        assert_eq!(link.inbound.recv().await, None);
    }
}
