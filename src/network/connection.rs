//! Peer connection primitives: dialing and the per-connection read loop.
//!
//! Every live stream (dialed or accepted) runs one read loop that feeds
//! decoded commands into the coordinator's dispatch channel. A loop ends
//! only on end-of-input or an I/O/decode error; there is no retry and no
//! backoff — a closed peer reappears only via gossip re-announcement or
//! the discovery beacon.

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::CollectiveError;
use crate::protocol::{Command, FrameDecoder, PeerAddress};

/// Open an outbound stream to a peer's listen address.
pub async fn dial(peer: &PeerAddress) -> Result<TcpStream, CollectiveError> {
    let stream = TcpStream::connect((peer.host.as_str(), peer.port)).await?;
    Ok(stream)
}

/// Read frames until the stream closes, dispatching each decoded command.
///
/// Returns `Ok(())` on clean end-of-input (or when the dispatcher has
/// shut down), `Err` on an I/O failure or a malformed frame. Either way
/// the connection is finished once this returns.
pub async fn read_loop(
    mut read_half: OwnedReadHalf,
    commands: mpsc::Sender<Command>,
) -> Result<(), CollectiveError> {
    let mut decoder = FrameDecoder::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = read_half.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        decoder.extend(&chunk[..n]);

        while let Some(command) = decoder.next_frame()? {
            if commands.send(command).await.is_err() {
                // Dispatcher is gone; nothing left to feed.
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::encode_frame;
    use crate::protocol::Operation;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_read_loop_dispatches_and_ends_on_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));
        let (inbound, _) = accepted.unwrap();
        let mut outbound = connected.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let (read_half, _keep_write) = inbound.into_split();
        let loop_handle = tokio::spawn(read_loop(read_half, tx));

        let cmd = Command::Data {
            path: "k".to_string(),
            timestamp: 1,
            value: json!("v"),
            op: Operation::Set,
        };
        outbound.write_all(&encode_frame(&cmd)).await.unwrap();
        assert_eq!(rx.recv().await, Some(cmd));

        drop(outbound);
        assert!(loop_handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_read_loop_fails_on_malformed_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));
        let (inbound, _) = accepted.unwrap();
        let mut outbound = connected.unwrap();

        let (tx, _rx) = mpsc::channel(8);
        let (read_half, _keep_write) = inbound.into_split();
        let loop_handle = tokio::spawn(read_loop(read_half, tx));

        outbound.write_all(b"garbage\n").await.unwrap();
        assert!(loop_handle.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_dial_refused_is_transport_error() {
        // Bind then drop to get a port that refuses connections.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = dial(&PeerAddress::new("127.0.0.1", port)).await;
        assert!(matches!(result, Err(CollectiveError::Transport(_))));
    }
}
