//! # Client API
//!
//! Purpose: Run one request/response cycle per call over a pooled connection
//! and release every borrowed resource on every exit path.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KVClient` hides pooling and protocol details.
//! 2. **RAII Cleanup**: Request buffers, read buffers and connections are
//!    guards; dropping them is the release step, so no path can leak.
//! 3. **Fail Fast**: Encoding errors surface before any connection is used.
//! 4. **Safe Reuse**: A connection goes back to the pool only when its reply
//!    was consumed completely.
//!
//! Command façades build a [`Request`] with [`KVClient::request`],
//! [`KVClient::request_sized`] or [`KVClient::command`], then invoke exactly
//! one `call_*` entry point:
//!
//! ```no_run
//! # use rkv_client::{Context, KVClient};
//! # async fn example() -> rkv_client::ClientResult<()> {
//! let ctx = Context::background();
//! let client = KVClient::connect(&ctx, "127.0.0.1:6379").await?;
//! let req = client.request(b"*3\r\n$3\r\nSET\r\n").arg("key").arg("value");
//! client.call_status(&ctx, req).await?;
//! let req = client.request(b"*2\r\n$3\r\nGET\r\n").arg("key");
//! let value = client.call_string(&ctx, req).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use crate::config::{ClientConfig, Config};
use crate::context::Context;
use crate::error::{ClientError, ClientResult};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::request::{Arg, Request, RequestPool};
use crate::response::{
    decode, ReaderPool, Reply, ResponseReader, Shape, Value, READER_MAX, READER_MIN,
};

/// Pooled RESP client. Safe to share between tasks (wrap it in an `Arc`).
pub struct KVClient {
    pool: ConnectionPool,
    requests: Arc<RequestPool>,
    readers: Arc<ReaderPool>,
    read_buffer_size: usize,
}

impl KVClient {
    /// Connects over TCP with default tuning.
    pub async fn connect(ctx: &Context, addr: impl Into<String>) -> ClientResult<Self> {
        Self::with_config(ctx, ClientConfig::new(Config::tcp(addr)?)).await
    }

    /// Creates a client with a custom configuration, pre-dialing the pool
    /// when `prefill` is set.
    pub async fn with_config(ctx: &Context, config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let pool = ConnectionPool::new(config.endpoint, config.max_idle, config.connect_timeout);
        if config.prefill {
            if let Err(err) = pool.prefill(ctx).await {
                pool.close();
                return Err(err);
            }
        }
        Ok(KVClient {
            pool,
            requests: Arc::new(RequestPool::new()),
            readers: Arc::new(ReaderPool::new(READER_MIN, READER_MAX)),
            read_buffer_size: config.read_buffer_size,
        })
    }

    /// Starts a request from a pre-encoded header and command name.
    pub fn request(&self, prefix: &[u8]) -> Request {
        self.requests.request(prefix)
    }

    /// Starts a request of `count` arguments (command words included).
    pub fn request_sized(&self, count: usize, prefix: &[u8]) -> Request {
        self.requests.request_sized(count, prefix)
    }

    /// Builds a whole request from `args`, command words first.
    pub fn command(&self, args: &[Arg<'_>]) -> Request {
        let mut req = self.requests.request_sized(args.len(), b"");
        for arg in args {
            req.push(*arg);
        }
        req
    }

    /// Status-shaped call: succeeds on `+OK`, any other status, or null.
    pub async fn call_status(&self, ctx: &Context, req: Request) -> ClientResult<()> {
        self.call(ctx, req, Shape::Status).await.map(|_| ())
    }

    /// Integer-shaped call; null yields `0`.
    pub async fn call_int(&self, ctx: &Context, req: Request) -> ClientResult<i64> {
        match self.call(ctx, req, Shape::Int).await? {
            Reply::Value(Value::Int(value)) => Ok(value),
            // Ok and Null; decoders only produce values of the requested shape.
            _ => Ok(0),
        }
    }

    /// Integer-array call; null yields an empty vector.
    pub async fn call_ints(&self, ctx: &Context, req: Request) -> ClientResult<Vec<i64>> {
        match self.call(ctx, req, Shape::Ints).await? {
            Reply::Value(Value::Ints(values)) => Ok(values),
            _ => Ok(Default::default()),
        }
    }

    /// Float-shaped call; null yields `0.0`.
    pub async fn call_float(&self, ctx: &Context, req: Request) -> ClientResult<f64> {
        match self.call(ctx, req, Shape::Float).await? {
            Reply::Value(Value::Float(value)) => Ok(value),
            _ => Ok(Default::default()),
        }
    }

    /// String-shaped call; null and `+OK` yield empty bytes.
    pub async fn call_string(&self, ctx: &Context, req: Request) -> ClientResult<Bytes> {
        match self.call(ctx, req, Shape::Str).await? {
            Reply::Value(Value::Str(value)) => Ok(value),
            _ => Ok(Default::default()),
        }
    }

    /// String-array call; null yields an empty vector.
    pub async fn call_strings(&self, ctx: &Context, req: Request) -> ClientResult<Vec<Bytes>> {
        match self.call(ctx, req, Shape::Strs).await? {
            Reply::Value(Value::Strs(values)) => Ok(values),
            _ => Ok(Default::default()),
        }
    }

    /// Runs one call and returns the raw tagged reply.
    ///
    /// **Logic**:
    /// 1. Report any deferred marshal error (no I/O happened yet).
    /// 2. Acquire a connection; the context bounds the wait and the dial, and
    ///    a context that is already done stops the call before any write.
    /// 3. Write the frame and decode one reply of `shape`, bounded by the context.
    /// 4. Keep the connection only if the reply was consumed completely.
    ///
    /// `req`, the read buffer and the connection are released when they drop,
    /// on success and on every error path.
    #[instrument(level = "trace", skip(self, ctx, req), fields(conn = tracing::field::Empty))]
    pub async fn call(
        &self,
        ctx: &Context,
        req: Request,
        shape: Shape,
    ) -> ClientResult<Reply<Value>> {
        req.check()?;
        let mut conn = self.pool.get(ctx).await?;
        tracing::Span::current().record("conn", conn.id());
        // An idle connection may come back for a dead context; send nothing.
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let result = ctx.run(self.exchange(&mut conn, &req, shape)).await;
        match &result {
            Ok(_) | Err(ClientError::Server { .. }) => {}
            Err(err) => {
                debug!(conn = conn.id(), error = %err, "call failed");
                conn.invalidate();
            }
        }
        result
    }

    /// Closes the pool: idle connections now, checked-out ones on release.
    pub fn close(&self) {
        self.pool.close();
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn request_pool(&self) -> &RequestPool {
        &self.requests
    }

    pub fn reader_pool(&self) -> &ReaderPool {
        &self.readers
    }

    async fn exchange(
        &self,
        conn: &mut PooledConnection,
        req: &Request,
        shape: Shape,
    ) -> ClientResult<Reply<Value>> {
        let stream = conn.stream();
        stream.write_all(req.as_bytes()).await?;
        stream.flush().await?;

        let (reply, leftover) = {
            let mut reader = ResponseReader::new(stream, self.readers.get(self.read_buffer_size));
            let reply = decode(&mut reader, shape).await;
            (reply, reader.buffered())
        };
        if leftover > 0 {
            debug!(conn = conn.id(), leftover, "bytes left after reply");
            conn.invalidate();
        }
        reply
    }
}

impl Drop for KVClient {
    fn drop(&mut self) {
        self.pool.close();
    }
}
