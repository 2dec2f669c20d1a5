use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::stomp::codec::StompCodec;
use crate::stomp::frame::{AckMode, Command, Frame};

const DISCONNECT_RECEIPT: &str = "railfeed-disconnect";

#[derive(Clone)]
pub struct Credentials {
    pub login: String,
    pub passcode: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("passcode", &"<redacted>")
            .finish()
    }
}

/// What a subscription delivers: feed messages and broker error notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Message(Frame),
    Error(Frame),
}

impl FeedEvent {
    pub fn frame(&self) -> &Frame {
        match self {
            FeedEvent::Message(frame) | FeedEvent::Error(frame) => frame,
        }
    }
}

/// Build the error for a broker ERROR frame, using its `message` header as summary.
pub fn broker_error(frame: &Frame) -> TransportError {
    TransportError::Broker {
        message: frame.header("message").unwrap_or_default().to_owned(),
        body: frame.body_lossy(),
    }
}

/// An established STOMP session.
///
/// Once subscribed, the connection is consumed as a stream of [`FeedEvent`]s. Receipts
/// and any other frame the broker sends are dropped.
pub struct StompConnection<T> {
    framed: Framed<T, StompCodec>,
}

impl StompConnection<TcpStream> {
    pub async fn connect(
        host: &str,
        port: u16,
        credentials: &Credentials,
        codec: StompCodec,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        debug!(host, port, "tcp connection established");

        Self::handshake(stream, host, credentials, codec).await
    }
}

impl<T> StompConnection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Send CONNECT over `io` and wait for the broker's answer.
    pub async fn handshake(
        io: T,
        host: &str,
        credentials: &Credentials,
        codec: StompCodec,
    ) -> Result<Self, TransportError> {
        let mut framed = Framed::new(io, codec);
        framed
            .send(Frame::connect(host, &credentials.login, &credentials.passcode))
            .await?;

        match framed.next().await {
            Some(Ok(frame)) if frame.command == Command::Connected => {
                info!(
                    version = frame.header("version").unwrap_or("1.0"),
                    server = frame.header("server").unwrap_or_default(),
                    "connected to broker"
                );
                Ok(Self { framed })
            }
            Some(Ok(frame)) if frame.command == Command::Error => Err(TransportError::Refused {
                message: frame.header("message").unwrap_or_default().to_owned(),
                body: frame.body_lossy(),
            }),
            Some(Ok(frame)) => Err(TransportError::UnexpectedFrame {
                expected: "CONNECTED",
                got: frame.command.to_string(),
            }),
            Some(Err(e)) => Err(e),
            None => Err(TransportError::ConnectionClosed {
                expected: "CONNECTED",
            }),
        }
    }

    pub async fn subscribe(
        &mut self,
        destination: &str,
        id: &str,
        ack: AckMode,
    ) -> Result<(), TransportError> {
        self.framed
            .send(Frame::subscribe(destination, id, ack))
            .await?;

        info!(destination, id, ack = ack.as_str(), "subscribed");
        Ok(())
    }

    /// Send DISCONNECT and wait up to `timeout` for the broker's receipt, then close
    /// the connection. A missing receipt is logged, not returned.
    pub async fn disconnect(mut self, timeout: Duration) -> Result<(), TransportError> {
        self.framed
            .send(Frame::disconnect(DISCONNECT_RECEIPT))
            .await?;

        let receipt = async {
            while let Some(frame) = self.framed.next().await {
                let frame = frame?;
                if frame.command == Command::Receipt
                    && frame.header("receipt-id") == Some(DISCONNECT_RECEIPT)
                {
                    return Ok(());
                }
            }
            Err(TransportError::ConnectionClosed {
                expected: "RECEIPT",
            })
        };

        match tokio::time::timeout(timeout, receipt).await {
            Ok(Ok(())) => debug!("broker acknowledged disconnect"),
            Ok(Err(e)) => warn!("disconnect not acknowledged: {}", e),
            Err(_) => warn!(?timeout, "timed out waiting for disconnect receipt"),
        }

        self.framed.close().await?;
        info!("disconnected from broker");
        Ok(())
    }
}

impl<T> Stream for StompConnection<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<FeedEvent, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let frame = match ready!(self.framed.poll_next_unpin(cx)) {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Poll::Ready(Some(Err(e))),
                None => return Poll::Ready(None),
            };

            match frame.command {
                Command::Message => return Poll::Ready(Some(Ok(FeedEvent::Message(frame)))),
                Command::Error => return Poll::Ready(Some(Ok(FeedEvent::Error(frame)))),
                command => debug!(%command, "ignoring frame"),
            }
        }
    }
}
