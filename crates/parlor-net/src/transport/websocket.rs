use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parlor_shared::types::TransportKind;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use super::{recv_pumped, Transport, INBOUND_CAPACITY};
use crate::error::{NetError, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Full-duplex socket transport.
pub struct WebSocketTransport {
    sink: WsSink,
    inbound: mpsc::Receiver<Result<String>>,
    reader: JoinHandle<()>,
}

impl WebSocketTransport {
    pub async fn connect(endpoint: &Url, token: Option<&str>) -> Result<Self> {
        let url = socket_url(endpoint, token)?;
        let (stream, _) = connect_async(url.as_str()).await?;
        let (sink, mut source) = stream.split();
        let (tx, inbound) = mpsc::channel(INBOUND_CAPACITY);

        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let item = match frame {
                    Ok(Message::Text(text)) => Ok(text),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => Ok(text),
                        Err(_) => {
                            warn!("Dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "WebSocket closed by hub");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => Err(NetError::from(e)),
                };
                let failed = item.is_err();
                if tx.send(item).await.is_err() || failed {
                    break;
                }
            }
        });

        Ok(Self {
            sink,
            inbound,
            reader,
        })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSockets
    }

    async fn send(&mut self, payload: String) -> Result<()> {
        self.sink.send(Message::Text(payload)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        recv_pumped(&mut self.inbound).await
    }

    async fn close(&mut self) {
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            debug!(error = %e, "WebSocket close frame not delivered");
        }
        let _ = self.sink.close().await;
        self.reader.abort();
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Map the hub endpoint to its socket URL. Browsers cannot set headers on
/// sockets, so hubs expect the token as a query parameter.
fn socket_url(endpoint: &Url, token: Option<&str>) -> Result<Url> {
    let mut url = endpoint.clone();
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| NetError::UnsupportedScheme(endpoint.scheme().to_string()))?;
    if let Some(token) = token {
        url.query_pairs_mut().append_pair("access_token", token);
    }
    Ok(url)
}
