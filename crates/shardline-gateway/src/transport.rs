//! Socket transport seam
//!
//! The link only sees text frames in and out plus a close signal. The
//! production transport is `tokio-tungstenite`; tests plug in channels.

use std::borrow::Cow;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{GatewayError, GatewayResult};

/// Something the link writes to the socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketCommand {
    Text(String),
    Close(u16, String),
}

/// Something the socket reports to the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Text(String),
    /// Close frame received, or the stream ended (`code: None`)
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

pub type SocketSink = Pin<Box<dyn Sink<SocketCommand, Error = GatewayError> + Send>>;
pub type SocketStream = Pin<Box<dyn Stream<Item = SocketEvent> + Send>>;

/// Opens gateway sockets
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn connect(&self, url: &str) -> GatewayResult<(SocketSink, SocketStream)>;
}

/// WebSocket transport over `tokio-tungstenite`
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteTransport;

#[async_trait]
impl GatewayTransport for TungsteniteTransport {
    async fn connect(&self, url: &str) -> GatewayResult<(SocketSink, SocketStream)> {
        let (socket, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| GatewayError::Connect(e.to_string()))?;
        let (sink, stream) = socket.split();

        let sink = sink
            .sink_map_err(|e| GatewayError::Socket(e.to_string()))
            .with(|command: SocketCommand| future::ready(Ok::<_, GatewayError>(to_message(command))));

        let stream = stream.filter_map(|message| future::ready(from_message(message)));

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

fn to_message(command: SocketCommand) -> Message {
    match command {
        SocketCommand::Text(text) => Message::Text(text),
        SocketCommand::Close(code, reason) => Message::Close(Some(CloseFrame {
            code: WsCloseCode::from(code),
            reason: Cow::Owned(reason),
        })),
    }
}

fn from_message(
    message: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<SocketEvent> {
    match message {
        Ok(Message::Text(text)) => Some(SocketEvent::Text(text)),
        Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
            Ok(text) => Some(SocketEvent::Text(text)),
            Err(_) => {
                tracing::debug!("Dropping non-UTF-8 binary frame");
                None
            }
        },
        Ok(Message::Close(frame)) => Some(SocketEvent::Closed {
            code: frame.as_ref().map(|f| u16::from(f.code)),
            reason: frame.map(|f| f.reason.into_owned()).unwrap_or_default(),
        }),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(SocketEvent::Error(e.to_string())),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_command_becomes_close_frame() {
        match to_message(SocketCommand::Close(4000, "zombie".into())) {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 4000);
                assert_eq!(frame.reason, "zombie");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_close_frame_becomes_closed_event() {
        let event = from_message(Ok(Message::Close(Some(CloseFrame {
            code: WsCloseCode::from(4004),
            reason: Cow::Borrowed("Authentication failed"),
        }))));
        assert_eq!(
            event,
            Some(SocketEvent::Closed {
                code: Some(4004),
                reason: "Authentication failed".into(),
            })
        );
        assert_eq!(
            from_message(Ok(Message::Close(None))),
            Some(SocketEvent::Closed {
                code: None,
                reason: String::new(),
            })
        );
    }

    #[test]
    fn test_control_frames_are_skipped() {
        assert_eq!(from_message(Ok(Message::Ping(vec![1]))), None);
        assert_eq!(
            from_message(Ok(Message::Text("{}".into()))),
            Some(SocketEvent::Text("{}".into()))
        );
    }
}
