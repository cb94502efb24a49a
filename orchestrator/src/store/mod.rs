//! Backing store access
//!
//! - The enumerated command set and reply decoding
//! - Client connections with liveness checks and reconnects
//! - Command execution, directly or through `redis-cli` in the container

mod command;
mod connection;
mod executor;

pub use command::{bridge_command_name, CommandReply, ReplyKind, StoreCommand};
pub use connection::{
    is_transport, store_message, ConnectionHandle, ConnectionManager, Endpoint, RedisConnector,
    StoreConnector, StoreLink,
};
pub use executor::{CommandExecutor, ExecutionMode, PreparedCommand};
