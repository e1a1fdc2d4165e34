//! GT-200 wire protocol: command frames and response envelopes.

pub mod command;
pub mod response;

// Re-export common types
pub use command::{BLOCK_SIZE, Command, DeviceMode, checksum};
pub use response::{CountReply, IdentifyInfo, ModelReply, Reply};
