//! Transport Layer for the Presence Channel
//!
//! Byte-level plumbing between the client and the chat peer:
//! - `ipc`: Unix domain sockets / Windows named pipes, with endpoint discovery
//! - `pipe`: overlapped Windows named-pipe channel with real read/write deadlines
//! - `memory`: a scripted in-process peer for tests
//! - `frame`: the opcode + length + JSON framing spoken on both
//!
//! # Blocking I/O
//!
//! Every channel here is blocking. The session and client layers make sure
//! connection attempts run on a worker thread and that writes on the primary
//! loop are bounded by a write timeout.

pub mod frame;
pub mod ipc;
pub mod memory;
#[cfg(windows)]
pub mod pipe;
pub mod traits;

// Re-exports for convenience
pub use frame::{decode, encode, CodecError, Frame, FrameDecoder, Opcode, MAX_PAYLOAD_SIZE};
pub use ipc::{default_candidates, IpcConnector};
pub use memory::{MemoryChannel, MemoryConnector, MemoryPeer, Refusal, WriteFailure};
pub use traits::{Channel, Connector, TransportError};
