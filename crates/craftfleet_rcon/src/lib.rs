mod client;
mod error;
mod packet;

pub use client::RconClient;
pub use error::RconError;
pub use packet::{
    RconPacket, TYPE_AUTH, TYPE_AUTH_RESPONSE, TYPE_EXEC_COMMAND, TYPE_RESPONSE_VALUE,
};
