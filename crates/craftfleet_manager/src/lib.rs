pub mod console;
pub mod error;
pub mod fleet;
pub mod machine;
pub mod process;
pub mod rcon;

pub use console::{ConsoleBuffer, ConsoleLine, LineSource};
pub use error::{ManagerError, Result};
pub use fleet::{CreateServer, FleetRegistry, PlayerCount, ServerSummary};
pub use machine::{ConfigUpdate, MachineTunables, ServerHandle, ServerSnapshot, ServerStatus};
pub use process::stub::StubSupervisor;
pub use process::{LocalSupervisor, ManagedProcess, ProcessExit, ProcessSupervisor};
pub use rcon::stub::StubConnector;
pub use rcon::{RconConnector, RconSession, TcpRconConnector};
