//! Length-delimited MsgPack framing over a TCP stream.
//!
//! Each frame is a 4-byte big-endian length followed by one message encoded
//! with [`opbridge_core::messages::encode`]. Shared by the bridge-side
//! transport and the registry and discovery listeners.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use opbridge_core::messages::{self, CodecError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

pub type FrameReader = FramedRead<OwnedReadHalf, LengthDelimitedCodec>;
pub type FrameWriter = FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>;

/// Failure reading or writing one frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("message of {size} bytes exceeds the {max} byte frame limit")]
    Oversized { size: usize, max: usize },
}

fn codec(max_frame_length: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(max_frame_length)
        .new_codec()
}

/// Splits `stream` into independently owned framed halves.
#[must_use]
pub fn split(stream: TcpStream, max_frame_length: usize) -> (FrameReader, FrameWriter) {
    let (read, write) = stream.into_split();
    (
        FramedRead::new(read, codec(max_frame_length)),
        FramedWrite::new(write, codec(max_frame_length)),
    )
}

/// Encodes one message, refusing it if it would not fit in a frame.
///
/// Queued writers encode up front so a message that can never be sent fails
/// its own caller instead of the socket.
///
/// # Errors
///
/// Returns [`FrameError::Codec`] if encoding fails and
/// [`FrameError::Oversized`] if the payload exceeds `max_frame_length`.
pub fn encode<T: Serialize>(message: &T, max_frame_length: usize) -> Result<Bytes, FrameError> {
    let bytes = messages::encode(message)?;
    if bytes.len() > max_frame_length {
        return Err(FrameError::Oversized {
            size: bytes.len(),
            max: max_frame_length,
        });
    }
    Ok(Bytes::from(bytes))
}

/// Writes one already-encoded message.
///
/// # Errors
///
/// Returns [`FrameError::Io`] if the socket rejects the write.
pub async fn send_encoded(writer: &mut FrameWriter, bytes: Bytes) -> Result<(), FrameError> {
    writer.send(bytes).await?;
    Ok(())
}

/// Encodes and writes one message.
///
/// # Errors
///
/// Returns [`FrameError`] if encoding fails or the socket rejects the write.
pub async fn send<T: Serialize>(writer: &mut FrameWriter, message: &T) -> Result<(), FrameError> {
    let bytes = messages::encode(message)?;
    writer.send(Bytes::from(bytes)).await?;
    Ok(())
}

/// Reads and decodes one message. `Ok(None)` means the peer closed the stream.
///
/// # Errors
///
/// Returns [`FrameError`] on socket errors, oversized frames, or undecodable
/// payloads.
pub async fn recv<T: DeserializeOwned>(reader: &mut FrameReader) -> Result<Option<T>, FrameError> {
    match reader.next().await {
        Some(frame) => Ok(Some(messages::decode(&frame?)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use opbridge_core::messages::{DiscoveryRequest, DiscoveryResponse};
    use tokio::net::TcpListener;

    use super::*;

    async fn pair(
        client_max: usize,
        server_max: usize,
    ) -> ((FrameReader, FrameWriter), (FrameReader, FrameWriter)) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (
            split(client.unwrap(), client_max),
            split(accepted.unwrap().0, server_max),
        )
    }

    #[tokio::test]
    async fn messages_cross_the_socket() {
        let ((_, mut client_tx), (mut server_rx, _)) = pair(1024, 1024).await;

        let request = DiscoveryRequest::Lookup {
            name: "registry".to_string(),
        };
        send(&mut client_tx, &request).await.unwrap();

        let received: Option<DiscoveryRequest> = recv(&mut server_rx).await.unwrap();
        assert_eq!(received, Some(request));
    }

    #[tokio::test]
    async fn closed_peer_reads_as_none() {
        let ((_, client_tx), (mut server_rx, _)) = pair(1024, 1024).await;
        drop(client_tx);

        let received: Option<DiscoveryRequest> = recv(&mut server_rx).await.unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let ((_, mut client_tx), (mut server_rx, _)) = pair(1024, 16).await;

        let response = DiscoveryResponse::NotBound {
            name: "a-name-long-enough-to-overflow".to_string(),
        };
        send(&mut client_tx, &response).await.unwrap();

        let received: Result<Option<DiscoveryResponse>, _> = recv(&mut server_rx).await;
        assert!(matches!(received, Err(FrameError::Io(_))));
    }

    #[test]
    fn encode_refuses_messages_over_the_limit() {
        let request = DiscoveryRequest::Lookup {
            name: "x".repeat(64),
        };
        assert!(matches!(
            encode(&request, 16),
            Err(FrameError::Oversized { max: 16, .. })
        ));
        let bytes = encode(&request, 1024).unwrap();
        assert!(bytes.len() <= 1024);
    }

    #[tokio::test]
    async fn encoded_messages_cross_the_socket() {
        let ((_, mut client_tx), (mut server_rx, _)) = pair(1024, 1024).await;

        let request = DiscoveryRequest::Lookup {
            name: "registry".to_string(),
        };
        send_encoded(&mut client_tx, encode(&request, 1024).unwrap())
            .await
            .unwrap();

        let received: Option<DiscoveryRequest> = recv(&mut server_rx).await.unwrap();
        assert_eq!(received, Some(request));
    }
}
