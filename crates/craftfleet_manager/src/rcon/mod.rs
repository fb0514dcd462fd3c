pub mod stub;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use craftfleet_config::RconSettings;
use craftfleet_rcon::{RconClient, RconError};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time;
use tracing::debug;

use crate::error::Result;

pub use stub::StubConnector;

/// Backoff before the one reconnect attempt a lost command triggers.
const RETRY_BACKOFF: Duration = Duration::from_millis(150);

/// One authenticated remote-console session with a running server.
#[async_trait]
pub trait RconSession: Send + Sync {
    /// Runs a command and returns the server's textual response.
    async fn execute(&self, command: &str) -> Result<String>;

    /// Resolves once the session is no longer usable. Cancel-safe.
    async fn closed(&self);

    async fn shutdown(&self);
}

/// Dials the remote console of a server. One connect attempt per call;
/// the caller owns the retry loop while a server is still starting.
#[async_trait]
pub trait RconConnector: Send + Sync {
    async fn connect(&self, addr: &str, password: &str) -> Result<Arc<dyn RconSession>>;
}

/// Real TCP connector backed by the wire client.
pub struct TcpRconConnector {
    settings: RconSettings,
}

impl TcpRconConnector {
    pub fn new(settings: RconSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl RconConnector for TcpRconConnector {
    async fn connect(&self, addr: &str, password: &str) -> Result<Arc<dyn RconSession>> {
        let client = RconClient::connect(addr, password, self.settings.connect_timeout).await?;
        let (closed_tx, closed_rx) = watch::channel(false);
        Ok(Arc::new(TcpRconSession {
            addr: addr.to_string(),
            password: password.to_string(),
            settings: self.settings.clone(),
            client: Mutex::new(Arc::new(client)),
            closed_tx,
            closed_rx,
        }))
    }
}

/// TCP session that heals a dropped connection: a command failing with
/// `ConnectionLost` is retried once on a fresh connection after a short
/// backoff. The session only counts as closed once that redial fails or
/// `shutdown` is called, so a transient drop while idle is healed by the
/// next command instead of tearing the server down.
struct TcpRconSession {
    addr: String,
    password: String,
    settings: RconSettings,
    client: Mutex<Arc<RconClient>>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
}

impl TcpRconSession {
    async fn redial_and_retry(&self, command: &str) -> Result<String> {
        match RconClient::connect(&self.addr, &self.password, self.settings.connect_timeout).await
        {
            Ok(fresh) => {
                debug!(addr = %self.addr, "rcon connection re-established");
                let fresh = Arc::new(fresh);
                *self.client.lock() = fresh.clone();
                Ok(fresh
                    .execute(command, self.settings.command_timeout)
                    .await?)
            }
            Err(error) => {
                debug!(addr = %self.addr, %error, "rcon redial failed; closing the session");
                self.closed_tx.send_replace(true);
                Err(RconError::ConnectionLost.into())
            }
        }
    }
}

#[async_trait]
impl RconSession for TcpRconSession {
    async fn execute(&self, command: &str) -> Result<String> {
        let client = self.client.lock().clone();
        match client.execute(command, self.settings.command_timeout).await {
            Err(RconError::ConnectionLost) if !*self.closed_rx.borrow() => {
                time::sleep(RETRY_BACKOFF).await;
                self.redial_and_retry(command).await
            }
            other => Ok(other?),
        }
    }

    async fn closed(&self) {
        let mut rx = self.closed_rx.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    async fn shutdown(&self) {
        self.closed_tx.send_replace(true);
        let client = self.client.lock().clone();
        client.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use craftfleet_rcon::{RconPacket, TYPE_AUTH, TYPE_EXEC_COMMAND};
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::error::ManagerError;

    const PASSWORD: &str = "pw";

    async fn serve_connection(mut stream: TcpStream, drop_on_command: bool) {
        loop {
            let Ok(packet) = RconPacket::read_from(&mut stream).await else {
                return;
            };
            match packet.packet_type {
                TYPE_AUTH => {
                    let id = if packet.body == PASSWORD { packet.id } else { -1 };
                    let reply = RconPacket::auth_response(id);
                    let _ = stream.write_all(&reply.encode()).await;
                }
                TYPE_EXEC_COMMAND => {
                    if drop_on_command {
                        return;
                    }
                    let reply = RconPacket::response(packet.id, format!("ran {}", packet.body));
                    let _ = stream.write_all(&reply.encode()).await;
                }
                _ => return,
            }
        }
    }

    /// Accepts connections forever; the first `flaky` of them drop as soon
    /// as a command arrives, later ones answer `ran <body>`.
    async fn fake_server(flaky: usize) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let served = AtomicUsize::new(0);
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let n = served.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_connection(stream, n < flaky));
            }
        });
        addr
    }

    fn fast_settings() -> RconSettings {
        RconSettings {
            connect_timeout: Duration::from_secs(1),
            command_timeout: Duration::from_secs(1),
            ..RconSettings::default()
        }
    }

    #[tokio::test]
    async fn command_survives_one_dropped_connection() {
        let addr = fake_server(1).await;
        let connector = TcpRconConnector::new(fast_settings());
        let session = connector
            .connect(&addr.to_string(), PASSWORD)
            .await
            .unwrap();

        assert_eq!(session.execute("list").await.unwrap(), "ran list");
        // Healed, not closed: the next command rides the fresh connection.
        assert_eq!(session.execute("seed").await.unwrap(), "ran seed");
        assert!(
            time::timeout(Duration::from_millis(50), session.closed())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn failed_redial_closes_the_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // The listener drops with this task, so a redial finds nobody.
            serve_connection(stream, true).await;
        });

        let connector = TcpRconConnector::new(fast_settings());
        let session = connector
            .connect(&addr.to_string(), PASSWORD)
            .await
            .unwrap();

        let result = session.execute("list").await;
        assert!(matches!(result, Err(ManagerError::ConnectionLost(_))));
        time::timeout(Duration::from_secs(1), session.closed())
            .await
            .unwrap();
        server.await.unwrap();
    }
}
