//! WebSocket transport implementation using `tokio-tungstenite`.

use std::io;
use std::net::SocketAddr;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{
    close_code, Accepted, CloseReason, Connection, ConnectionId, Connector,
    Inbound, Transport, TransportError,
};

/// The byte stream under a client-side WebSocket (plain or TLS).
pub type ClientStream = MaybeTlsStream<TcpStream>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection<TcpStream>;

    async fn accept(
        &mut self,
    ) -> Result<Accepted<Self::Connection>, TransportError> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        // The request path selects the namespace, so keep it from the
        // opening handshake.
        let mut path = String::from("/");
        let ws = tokio_tungstenite::accept_hdr_async(
            stream,
            |request: &Request,
             response: Response|
             -> Result<Response, ErrorResponse> {
                let requested = request.uri().path();
                if !requested.is_empty() {
                    path = requested.to_owned();
                }
                Ok(response)
            },
        )
        .await
        .map_err(|e| {
            TransportError::AcceptFailed(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;

        let id = ConnectionId::next();
        tracing::debug!(%id, %addr, %path, "accepted WebSocket connection");

        Ok(Accepted {
            connection: WebSocketConnection::new(id, ws),
            path,
        })
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Opens client-side WebSocket connections with `connect_async`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    type Connection = WebSocketConnection<ClientStream>;

    async fn connect(
        &self,
        address: &str,
    ) -> Result<Self::Connection, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(address)
            .await
            .map_err(|e| {
                TransportError::ConnectFailed(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    e,
                ))
            })?;
        let id = ConnectionId::next();
        tracing::debug!(%id, address, "opened WebSocket connection");
        Ok(WebSocketConnection::new(id, ws))
    }
}

/// A single WebSocket connection.
///
/// The socket is split so that a task parked in `recv` never blocks a
/// concurrent `send`.
pub struct WebSocketConnection<S = TcpStream> {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
}

impl<S> WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps an established WebSocket stream.
    pub fn new(id: ConnectionId, ws: WebSocketStream<S>) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id,
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }
    }
}

fn send_failed(e: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error;
    match e {
        Error::ConnectionClosed | Error::AlreadyClosed => {
            TransportError::ConnectionClosed(e.to_string())
        }
        other => TransportError::SendFailed(io::Error::new(
            io::ErrorKind::BrokenPipe,
            other,
        )),
    }
}

impl<S> Connection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let text = std::str::from_utf8(data).map_err(|e| {
            TransportError::SendFailed(io::Error::new(
                io::ErrorKind::InvalidData,
                e,
            ))
        })?;
        self.sink
            .lock()
            .await
            .send(Message::Text(text.to_owned().into()))
            .await
            .map_err(send_failed)
    }

    async fn recv(&self) -> Result<Inbound, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Inbound::Message(text.as_bytes().to_vec()));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Inbound::Message(data.to_vec()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = match frame {
                        Some(frame) => CloseReason::new(
                            u16::from(frame.code),
                            frame.reason.as_str(),
                        ),
                        None => CloseReason::new(close_code::NO_STATUS, ""),
                    };
                    return Ok(Inbound::Closed(reason));
                }
                None => {
                    return Ok(Inbound::Closed(CloseReason::abnormal(
                        "stream ended without close frame",
                    )));
                }
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        io::Error::new(io::ErrorKind::ConnectionReset, e),
                    ));
                }
            }
        }
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        self.sink
            .lock()
            .await
            .send(Message::Close(Some(frame)))
            .await
            .map_err(send_failed)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}
