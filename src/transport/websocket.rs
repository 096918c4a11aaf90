use super::{ClientEvent, Connector, EventSink, EventStream, ServerEvent};
use crate::config::{ApiConfig, RealtimeEndpoint};
use crate::error::{EdgeError, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use http::header::{HeaderValue, AUTHORIZATION};
use secrecy::{ExposeSecret, SecretBox};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Realtime service over a websocket, one connection per session
pub struct WebSocketConnector {
    endpoint: RealtimeEndpoint,
    api_key: SecretBox<String>,
}

impl WebSocketConnector {
    pub fn new(api: ApiConfig, endpoint: RealtimeEndpoint) -> Self {
        Self {
            endpoint,
            api_key: api.openai_key,
        }
    }

    fn request_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint.url)
            .map_err(|e| EdgeError::Transport(format!("Invalid realtime URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("model", &self.endpoint.model);
        Ok(url)
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<(Box<dyn EventSink>, Box<dyn EventStream>)> {
        let url = self.request_url()?;
        let mut request = url.as_str().into_client_request()?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key.expose_secret()))
            .map_err(|_| EdgeError::Transport("API key is not a valid header value".into()))?;
        let headers = request.headers_mut();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        log::info!("Realtime: Connecting to {} (model {})", self.endpoint.url, self.endpoint.model);
        let (ws_stream, response) = connect_async(request).await?;
        log::info!("Realtime: Connected ({})", response.status());

        let (write, read) = ws_stream.split();
        Ok((
            Box::new(WebSocketSink { write }),
            Box::new(WebSocketEvents {
                read,
                message_count: 0,
            }),
        ))
    }
}

struct WebSocketSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl EventSink for WebSocketSink {
    async fn send(&mut self, event: ClientEvent) -> Result<()> {
        let json = event.to_json()?;
        self.write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        log::debug!("Realtime: Closing connection");
        self.write.close().await?;
        Ok(())
    }
}

struct WebSocketEvents {
    read: SplitStream<WsStream>,
    message_count: usize,
}

#[async_trait]
impl EventStream for WebSocketEvents {
    async fn next_event(&mut self) -> Option<Result<ServerEvent>> {
        loop {
            let message = match self.read.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };
            self.message_count += 1;

            match message {
                Message::Text(text) => {
                    log::trace!("Realtime: Message {}: {}", self.message_count, text.as_str());
                    return Some(ServerEvent::from_json(text.as_str()));
                }
                Message::Close(frame) => {
                    log::info!("Realtime: Server closed connection: {:?}", frame);
                    return None;
                }
                Message::Binary(data) => {
                    log::debug!("Realtime: Ignoring {} byte binary message", data.len());
                }
                // Pings are answered by tungstenite
                _ => {}
            }
        }
    }
}
