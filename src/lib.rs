//! craftnet - Data plane of a block-game server
//!
//! Provides:
//! - `buffer`: byte queues and per-connection buffers with read backpressure
//! - `protocol`: the big-endian wire codec, string and metadata encodings,
//!   and packet definitions
//! - `map`: a concurrent `i64`-keyed map for shared state
//! - `job`: jobs and the worker pool that executes them
//! - `network`: the TCP reactor and session logic tying the above together

pub mod arith;
pub mod buffer;
pub mod config;
pub mod job;
pub mod map;
pub mod network;
pub mod protocol;

pub use buffer::{ByteBuffer, ConnectionBuffers};
pub use config::Config;
pub use job::{Dispatcher, Job, JobHandler};
pub use map::ConcurrentMap;
pub use network::{Server, SessionHandler};
pub use protocol::Packet;
