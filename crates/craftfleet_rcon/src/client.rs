use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;
use tracing::{debug, warn};

use crate::error::RconError;
use crate::packet::{RconPacket, TYPE_AUTH_RESPONSE, TYPE_RESPONSE_VALUE};

const WRITER_QUEUE: usize = 32;

type PendingMap = Arc<Mutex<HashMap<i32, oneshot::Sender<String>>>>;

enum WriterMessage {
    Packet(RconPacket),
    Close,
}

/// An authenticated RCON connection.
///
/// Commands are multiplexed over one TCP stream by request id, so concurrent
/// `execute` calls each receive their own matching response. Loss of the
/// connection fails every pending caller and trips the `closed` watch.
pub struct RconClient {
    pending: PendingMap,
    next_id: AtomicI32,
    writer_tx: mpsc::Sender<WriterMessage>,
    closed_tx: Arc<watch::Sender<bool>>,
    closed_rx: watch::Receiver<bool>,
}

impl RconClient {
    /// Connects and authenticates. A wrong password yields `AuthFailed`; the
    /// server signals it by echoing request id -1.
    pub async fn connect(
        addr: &str,
        password: &str,
        connect_timeout: Duration,
    ) -> Result<Self, RconError> {
        let mut stream = time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RconError::Timeout("TCP connect".to_string()))??;

        let auth_id = 1;
        stream
            .write_all(&RconPacket::auth(auth_id, password).encode())
            .await?;

        loop {
            let packet = time::timeout(connect_timeout, RconPacket::read_from(&mut stream))
                .await
                .map_err(|_| RconError::Timeout("auth response".to_string()))??;

            match packet.packet_type {
                TYPE_AUTH_RESPONSE => {
                    if packet.id == -1 {
                        return Err(RconError::AuthFailed);
                    }
                    if packet.id != auth_id {
                        return Err(RconError::protocol(format!(
                            "auth response echoed unknown id {}",
                            packet.id
                        )));
                    }
                    break;
                }
                // Source servers preface the auth response with an empty
                // RESPONSE_VALUE carrying the same id.
                TYPE_RESPONSE_VALUE => continue,
                other => {
                    return Err(RconError::protocol(format!(
                        "unexpected packet type {other} during handshake"
                    )));
                }
            }
        }
        debug!("rcon authenticated against {addr}");

        let (read_half, write_half) = stream.into_split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (closed_tx, closed_rx) = watch::channel(false);
        let closed_tx = Arc::new(closed_tx);
        let (writer_tx, writer_rx) = mpsc::channel(WRITER_QUEUE);

        tokio::spawn(read_loop(read_half, pending.clone(), closed_tx.clone()));
        tokio::spawn(write_loop(write_half, writer_rx));

        Ok(Self {
            pending,
            next_id: AtomicI32::new(auth_id + 1),
            writer_tx,
            closed_tx,
            closed_rx,
        })
    }

    /// Sends one command and waits for its response. Once the connection is
    /// gone every call fails with `ConnectionLost`; recovering means dialing
    /// a fresh client.
    pub async fn execute(&self, command: &str, timeout: Duration) -> Result<String, RconError> {
        if self.is_closed() {
            return Err(RconError::ConnectionLost);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if self
            .writer_tx
            .send(WriterMessage::Packet(RconPacket::command(id, command)))
            .await
            .is_err()
        {
            self.pending.lock().remove(&id);
            return Err(RconError::ConnectionLost);
        }

        match time::timeout(timeout, rx).await {
            Ok(Ok(body)) => Ok(body),
            // The reader dropped our waiter: the connection went away.
            Ok(Err(_)) => Err(RconError::ConnectionLost),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(RconError::Timeout(format!("response to `{command}`")))
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Resolves once the connection is gone, whether the server dropped it or
    /// `shutdown` was called. Cancel-safe.
    pub async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Closes the connection and fails all pending commands.
    pub async fn shutdown(&self) {
        let _ = self.writer_tx.send(WriterMessage::Close).await;
        self.closed_tx.send_replace(true);
        self.pending.lock().clear();
    }
}

async fn read_loop(mut read_half: OwnedReadHalf, pending: PendingMap, closed: Arc<watch::Sender<bool>>) {
    loop {
        match RconPacket::read_from(&mut read_half).await {
            Ok(packet) => {
                let waiter = pending.lock().remove(&packet.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(packet.body);
                    }
                    None => warn!("dropping unmatched rcon response for id {}", packet.id),
                }
            }
            Err(e) => {
                debug!("rcon read loop finished: {e}");
                break;
            }
        }
    }
    closed.send_replace(true);
    // Dropping the senders wakes every pending caller with ConnectionLost.
    pending.lock().clear();
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<WriterMessage>) {
    while let Some(message) = rx.recv().await {
        match message {
            WriterMessage::Packet(packet) => {
                if let Err(e) = write_half.write_all(&packet.encode()).await {
                    debug!("rcon write failed: {e}");
                    break;
                }
            }
            WriterMessage::Close => break,
        }
    }
    let _ = write_half.shutdown().await;
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::net::TcpListener;

    use super::*;
    use crate::packet::{TYPE_AUTH, TYPE_EXEC_COMMAND};

    const PASSWORD: &str = "s3cret";

    /// Minimal in-process RCON server: authenticates against PASSWORD and
    /// echoes commands as `ran <body>`. `quit` drops the connection without
    /// replying; `swallow` never answers.
    async fn fake_server(reorder_pairs: bool) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut held: Option<RconPacket> = None;
            loop {
                let packet = match RconPacket::read_from(&mut stream).await {
                    Ok(p) => p,
                    Err(_) => break,
                };
                match packet.packet_type {
                    TYPE_AUTH => {
                        let id = if packet.body == PASSWORD { packet.id } else { -1 };
                        let reply = RconPacket::auth_response(id);
                        stream.write_all(&reply.encode()).await.unwrap();
                    }
                    TYPE_EXEC_COMMAND => {
                        if packet.body == "quit" {
                            break;
                        }
                        if packet.body == "swallow" {
                            continue;
                        }
                        let reply =
                            RconPacket::response(packet.id, format!("ran {}", packet.body));
                        if reorder_pairs {
                            match held.take() {
                                None => held = Some(reply),
                                Some(first) => {
                                    // Answer the second command before the first.
                                    stream.write_all(&reply.encode()).await.unwrap();
                                    stream.write_all(&first.encode()).await.unwrap();
                                }
                            }
                        } else {
                            stream.write_all(&reply.encode()).await.unwrap();
                        }
                    }
                    _ => break,
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn connects_and_executes() {
        let addr = fake_server(false).await;
        let client = RconClient::connect(&addr.to_string(), PASSWORD, Duration::from_secs(1))
            .await
            .unwrap();
        let response = client
            .execute("list", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response, "ran list");
    }

    #[tokio::test]
    async fn bad_password_fails_auth() {
        let addr = fake_server(false).await;
        let result =
            RconClient::connect(&addr.to_string(), "wrong", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(RconError::AuthFailed)));
    }

    #[tokio::test]
    async fn concurrent_commands_do_not_cross_match() {
        let addr = fake_server(true).await;
        let client = RconClient::connect(&addr.to_string(), PASSWORD, Duration::from_secs(1))
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            client.execute("alpha", Duration::from_secs(2)),
            client.execute("beta", Duration::from_secs(2)),
        );
        assert_eq!(first.unwrap(), "ran alpha");
        assert_eq!(second.unwrap(), "ran beta");
    }

    #[tokio::test]
    async fn unanswered_command_times_out() {
        let addr = fake_server(false).await;
        let client = RconClient::connect(&addr.to_string(), PASSWORD, Duration::from_secs(1))
            .await
            .unwrap();
        let result = client.execute("swallow", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(RconError::Timeout(_))));
    }

    #[tokio::test]
    async fn server_disconnect_surfaces_connection_lost() {
        let addr = fake_server(false).await;
        let client = RconClient::connect(&addr.to_string(), PASSWORD, Duration::from_secs(1))
            .await
            .unwrap();

        let result = client.execute("quit", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(RconError::ConnectionLost)));

        // The closed watch trips as well.
        time::timeout(Duration::from_secs(1), client.closed())
            .await
            .unwrap();
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn shutdown_fails_pending_commands() {
        let addr = fake_server(false).await;
        let client = Arc::new(
            RconClient::connect(&addr.to_string(), PASSWORD, Duration::from_secs(1))
                .await
                .unwrap(),
        );

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.execute("swallow", Duration::from_secs(5)).await })
        };
        time::sleep(Duration::from_millis(50)).await;
        client.shutdown().await;

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(RconError::ConnectionLost)));
    }
}
