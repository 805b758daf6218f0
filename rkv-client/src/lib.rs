//! # RKV Client
//!
//! Purpose: Provide a lightweight, async RESP client core with connection
//! pooling, pooled request/response buffers and shape-directed decoding.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse sockets and buffers instead of reallocating.
//! 2. **Explicit Outcomes**: Replies are tagged (`Ok | Null | Value`), errors are typed.
//! 3. **Minimal Allocation**: Numbers are formatted on the stack; buffers are reused.
//! 4. **Protocol Clarity**: RESP is encoded and parsed explicitly, byte for byte.
//!
//! Typed command façades live outside this crate and drive it through the
//! request constructors and the `call_*` entry points of [`KVClient`].

mod client;
mod config;
mod context;
mod error;
mod pool;
mod request;
mod response;

pub use client::KVClient;
pub use config::{ClientConfig, Config, Network, DEFAULT_MAX_IDLE, DEFAULT_READ_BUFFER_SIZE};
pub use context::Context;
pub use error::{ClientError, ClientResult};
pub use pool::{ConnectionPool, PoolStats, PooledConnection, Stream};
pub use request::{encode_arg, encode_command, Arg, Request, RequestPool};
pub use response::{
    decode, decode_float, decode_int, decode_ints, decode_status, decode_string,
    decode_strings, parse_int, ReadBuffer, ReaderPool, Reply, ResponseReader, Shape, Value,
};

pub use tokio_util::sync::CancellationToken;
