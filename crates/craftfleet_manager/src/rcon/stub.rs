use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{ManagerError, Result};
use crate::rcon::{RconConnector, RconSession};

/// In-memory remote-console connector for tests and simulation mode.
///
/// Sessions acknowledge every command with `ack: <command>`. The hooks let a
/// test script connection refusals, hanging commands, and dropped links.
pub struct StubConnector {
    /// `None` accepts any password, for fleets that generate their own.
    password: Option<String>,
    connect_delay: Duration,
    refuse_remaining: AtomicU32,
    attempts: AtomicU32,
    hang_commands: HashSet<String>,
    sessions: Mutex<Vec<Arc<StubSession>>>,
}

impl StubConnector {
    pub fn new(password: impl Into<String>) -> Self {
        Self::with_password(Some(password.into()))
    }

    pub fn any_password() -> Self {
        Self::with_password(None)
    }

    fn with_password(password: Option<String>) -> Self {
        Self {
            password,
            connect_delay: Duration::ZERO,
            refuse_remaining: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            hang_commands: HashSet::new(),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Every connect attempt sleeps this long before succeeding. Lets a test
    /// hold a server in `starting` deterministically.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Commands in this set never get a response, as if the server stalled.
    pub fn with_hanging_commands(mut self, commands: impl IntoIterator<Item = String>) -> Self {
        self.hang_commands = commands.into_iter().collect();
        self
    }

    /// The next `n` connect attempts fail as if the port were not bound yet.
    pub fn fail_connects(&self, n: u32) {
        self.refuse_remaining.store(n, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Severs every live session, as if the server side went away.
    pub fn drop_connections(&self) {
        for session in self.sessions.lock().drain(..) {
            session.sever();
        }
    }
}

#[async_trait]
impl RconConnector for StubConnector {
    async fn connect(&self, _addr: &str, password: &str) -> Result<Arc<dyn RconSession>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if self
            .refuse_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ManagerError::Connection("connection refused".to_string()));
        }
        if self.password.as_deref().is_some_and(|p| p != password) {
            return Err(ManagerError::Auth(
                "remote console rejected the password".to_string(),
            ));
        }
        let session = Arc::new(StubSession {
            hang_commands: self.hang_commands.clone(),
            closed: watch::channel(false).0,
        });
        self.sessions.lock().push(session.clone());
        Ok(session)
    }
}

pub struct StubSession {
    hang_commands: HashSet<String>,
    closed: watch::Sender<bool>,
}

impl StubSession {
    fn sever(&self) {
        self.closed.send_replace(true);
    }
}

#[async_trait]
impl RconSession for StubSession {
    async fn execute(&self, command: &str) -> Result<String> {
        if *self.closed.borrow() {
            return Err(ManagerError::connection_lost("session closed"));
        }
        if self.hang_commands.contains(command) {
            // Resolve only when the session dies, like a stalled server.
            self.closed().await;
            return Err(ManagerError::connection_lost(
                "connection closed awaiting response",
            ));
        }
        Ok(format!("ack: {command}"))
    }

    async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // Holding the sender ourselves means the channel never errors out.
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    async fn shutdown(&self) {
        self.sever();
    }
}
