pub mod fleet;
pub mod server;
