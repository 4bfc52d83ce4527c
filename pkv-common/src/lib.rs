// pkv-common - Wire model shared by the PipeKV client engine
//
// This crate defines frames, commands, the RESP2/RESP3 codec and the
// cluster hash-slot function. Nothing here performs I/O.

pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
pub mod slot;

// Re-export for convenience
pub use codec::*;
pub use command::*;
pub use error::*;
pub use frame::*;
pub use slot::*;
