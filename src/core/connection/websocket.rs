//! WebSocket transport to the interview relay.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;
use zeroize::Zeroize;

use super::base::{
    ConnectionError, ConnectionResult, Connector, ConnectorFactory, TransportLink, WireFrame,
};
use crate::core::session::Session;
use crate::utils::url_validation::validate_relay_url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens authenticated WebSocket connections to one relay URL.
pub struct WebSocketConnector {
    url: Url,
    token: String,
    headers: Vec<(String, String)>,
}

impl WebSocketConnector {
    pub fn new(url: Url, token: impl Into<String>, headers: Vec<(String, String)>) -> Self {
        Self {
            url,
            token: token.into(),
            headers,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Drop for WebSocketConnector {
    fn drop(&mut self) {
        self.token.zeroize();
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> ConnectionResult<Box<dyn TransportLink>> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectionError::InvalidConfiguration(format!("Invalid relay URL: {e}")))?;

        let auth = HeaderValue::from_str(&format!("Bearer {}", self.token)).map_err(|_| {
            ConnectionError::InvalidConfiguration("token is not a valid header value".to_string())
        })?;
        request.headers_mut().insert("Authorization", auth);

        for (key, value) in &self.headers {
            if let (Ok(name), Ok(val)) = (
                key.parse::<HeaderName>(),
                value.parse::<HeaderValue>(),
            ) {
                request.headers_mut().insert(name, val);
            }
        }

        debug!(url = %self.url, "Opening relay WebSocket");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        info!(url = %self.url, "Relay WebSocket open");

        let (sink, stream) = ws_stream.split();
        Ok(Box::new(WebSocketLink { sink, stream }))
    }
}

/// An open relay WebSocket.
pub struct WebSocketLink {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl TransportLink for WebSocketLink {
    async fn send(&mut self, frame: WireFrame) -> ConnectionResult<()> {
        let message = match frame {
            WireFrame::Text(text) => Message::Text(text.into()),
            WireFrame::Binary(bytes) => Message::Binary(bytes),
        };
        self.sink
            .send(message)
            .await
            .map_err(|e| ConnectionError::WebSocketError(e.to_string()))
    }

    async fn recv(&mut self) -> Option<ConnectionResult<WireFrame>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(WireFrame::Text(text.to_string()))),
                Ok(Message::Binary(bytes)) => return Some(Ok(WireFrame::Binary(bytes))),
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.sink.send(Message::Pong(data)).await {
                        return Some(Err(ConnectionError::WebSocketError(e.to_string())));
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Relay closed the WebSocket");
                    return None;
                }
                Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                Err(e) => return Some(Err(ConnectionError::WebSocketError(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> ConnectionResult<()> {
        self.sink
            .send(Message::Close(None))
            .await
            .map_err(|e| ConnectionError::WebSocketError(e.to_string()))
    }
}

/// Builds a [`WebSocketConnector`] per session from the configured relay URL.
pub struct WebSocketConnectorFactory {
    url: Url,
    headers: Vec<(String, String)>,
}

impl WebSocketConnectorFactory {
    pub fn new(url: &str) -> ConnectionResult<Self> {
        let url = validate_relay_url(url)
            .map_err(|e| ConnectionError::InvalidConfiguration(e.to_string()))?;
        Ok(Self {
            url,
            headers: Vec::new(),
        })
    }

    /// Extra handshake headers sent on every connection.
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }
}

impl ConnectorFactory for WebSocketConnectorFactory {
    fn create(&self, session: &Session) -> ConnectionResult<Arc<dyn Connector>> {
        if session.config.connection_token.is_empty() {
            return Err(ConnectionError::InvalidConfiguration(
                "connection token is required".to_string(),
            ));
        }
        Ok(Arc::new(WebSocketConnector::new(
            self.url.clone(),
            session.config.connection_token.clone(),
            self.headers.clone(),
        )))
    }
}
