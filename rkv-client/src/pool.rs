//! # Connection Pool
//!
//! Purpose: Reuse sockets to one endpoint so calls skip the connect handshake,
//! while never keeping more than `capacity` idle connections around.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Never Block on Release**: A full pool closes the returned connection.
//! 4. **Exclusive Ownership**: A connection is either idle in the pool or
//!    owned by exactly one `PooledConnection`.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::{debug, trace, warn};

use crate::config::{Config, Network};
use crate::context::Context;
use crate::error::{ClientError, ClientResult};

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections dialed.
    pub dials: u64,
    /// Idle connections handed out again.
    pub reuses: u64,
    /// Connections closed, for any reason.
    pub closes: u64,
}

#[derive(Default)]
struct Counters {
    dials: AtomicU64,
    reuses: AtomicU64,
    closes: AtomicU64,
}

struct PoolState {
    idle: VecDeque<Connection>,
    closed: bool,
}

struct PoolInner {
    config: Config,
    capacity: usize,
    connect_timeout: Option<Duration>,
    state: Mutex<PoolState>,
    counters: Counters,
    next_id: AtomicU64,
}

/// Connection pool handle.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates an empty pool keeping at most `capacity` idle connections.
    pub fn new(config: Config, capacity: usize, connect_timeout: Option<Duration>) -> Self {
        ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                capacity,
                connect_timeout,
                state: Mutex::new(PoolState {
                    idle: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                counters: Counters::default(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Dials connections until `capacity` are idle.
    ///
    /// The first dial failure aborts and is returned; connections dialed so
    /// far stay in the pool.
    pub async fn prefill(&self, ctx: &Context) -> ClientResult<()> {
        while self.idle_count() < self.inner.capacity {
            if self.is_closed() {
                return Err(ClientError::PoolClosed);
            }
            let conn = ctx.run(self.dial()).await?;
            self.release(conn, true);
        }
        Ok(())
    }

    /// Acquires a connection.
    ///
    /// **Logic**:
    /// 1. Hand out an idle connection if there is one.
    /// 2. Otherwise fail with the context's error if it is already done, so
    ///    a dead context never dials.
    /// 3. Otherwise dial, bounded by the context. This may transiently exceed
    ///    the capacity; release enforces it.
    pub async fn get(&self, ctx: &Context) -> ClientResult<PooledConnection> {
        {
            let mut state = self.inner.state.lock().expect("pool mutex poisoned");
            if state.closed {
                return Err(ClientError::PoolClosed);
            }
            if let Some(conn) = state.idle.pop_front() {
                self.inner.counters.reuses.fetch_add(1, Ordering::Relaxed);
                trace!(conn = conn.id, "reusing idle connection");
                return Ok(PooledConnection::new(self.inner.clone(), conn));
            }
        }

        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let conn = ctx.run(self.dial()).await?;
        Ok(PooledConnection::new(self.inner.clone(), conn))
    }

    /// Closes every idle connection; the pool refuses further use.
    pub fn close(&self) {
        let drained: Vec<Connection> = {
            let mut state = self.inner.state.lock().expect("pool mutex poisoned");
            state.closed = true;
            state.idle.drain(..).collect()
        };
        let count = drained.len();
        for conn in drained {
            self.inner.close_connection(conn, "pool closed");
        }
        debug!(closed = count, "connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().expect("pool mutex poisoned").closed
    }

    /// Number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().expect("pool mutex poisoned").idle.len()
    }

    /// Maximum number of idle connections.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn stats(&self) -> PoolStats {
        let counters = &self.inner.counters;
        PoolStats {
            dials: counters.dials.load(Ordering::Relaxed),
            reuses: counters.reuses.load(Ordering::Relaxed),
            closes: counters.closes.load(Ordering::Relaxed),
        }
    }

    async fn dial(&self) -> ClientResult<Connection> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let connect = Connection::connect(id, &self.inner.config);
        let conn = match self.inner.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect).await.map_err(|_| {
                io::Error::new(io::ErrorKind::TimedOut, "connect timed out")
            })??,
            None => connect.await?,
        };
        self.inner.counters.dials.fetch_add(1, Ordering::Relaxed);
        debug!(
            conn = id,
            network = %self.inner.config.network,
            address = %self.inner.config.address,
            "dialed connection"
        );
        Ok(conn)
    }

    fn release(&self, conn: Connection, valid: bool) {
        self.inner.release(conn, valid);
    }
}

impl PoolInner {
    /// Non-blocking return: queue when valid and below capacity, else close.
    fn release(&self, conn: Connection, valid: bool) {
        if !valid {
            self.close_connection(conn, "discarded after failed call");
            return;
        }
        let rejected = {
            let mut state = self.state.lock().expect("pool mutex poisoned");
            if !state.closed && state.idle.len() < self.capacity {
                state.idle.push_back(conn);
                None
            } else {
                Some(conn)
            }
        };
        if let Some(conn) = rejected {
            self.close_connection(conn, "pool full or closed");
        }
    }

    fn close_connection(&self, conn: Connection, reason: &'static str) {
        self.counters.closes.fetch_add(1, Ordering::Relaxed);
        debug!(conn = conn.id, reason, "closing connection");
        drop(conn);
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
}

impl PooledConnection {
    fn new(pool: Arc<PoolInner>, conn: Connection) -> Self {
        PooledConnection {
            pool,
            conn: Some(conn),
            valid: true,
        }
    }

    /// Connection id, for logs.
    pub fn id(&self) -> u64 {
        self.conn.as_ref().map_or(0, |conn| conn.id)
    }

    /// Stream of the checked-out connection.
    pub fn stream(&mut self) -> &mut Stream {
        &mut self
            .conn
            .as_mut()
            .expect("connection is present until drop")
            .stream
    }

    /// Marks the connection as unusable: it is closed instead of returned.
    pub fn invalidate(&mut self) {
        if self.valid {
            warn!(conn = self.id(), "connection state unknown, discarding");
        }
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.valid);
        }
    }
}

/// Single socket owned by the pool or by one in-flight call.
pub struct Connection {
    id: u64,
    stream: Stream,
}

impl Connection {
    async fn connect(id: u64, config: &Config) -> io::Result<Self> {
        let stream = match config.network {
            Network::Tcp => {
                let stream = TcpStream::connect(config.address.as_str()).await?;
                // Disable Nagle to keep request latency low for small payloads.
                stream.set_nodelay(true)?;
                Stream::Tcp(stream)
            }
            #[cfg(unix)]
            Network::Unix => Stream::Unix(UnixStream::connect(&config.address).await?),
            #[cfg(not(unix))]
            Network::Unix => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "unix sockets are not available on this platform",
                ))
            }
        };
        Ok(Connection { id, stream })
    }
}

/// Byte stream of a connection.
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            Stream::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            Stream::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            Stream::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Stream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            Stream::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    async fn listener() -> (TcpListener, Config) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();
        (listener, Config::tcp(addr).expect("config"))
    }

    fn accept_forever(listener: TcpListener) {
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
    }

    #[tokio::test]
    async fn cancelled_context_fails_without_dial() {
        let (listener, config) = listener().await;
        drop(listener);
        let pool = ConnectionPool::new(config, 2, None);
        let token = CancellationToken::new();
        token.cancel();
        let ctx = Context::background().with_cancellation(token);

        let err = pool.get(&ctx).await.err().expect("cancelled");
        assert!(matches!(err, ClientError::Cancelled));
        assert_eq!(pool.stats().dials, 0);
    }

    #[tokio::test]
    async fn idle_connection_served_before_context_check() {
        let (listener, config) = listener().await;
        accept_forever(listener);
        let pool = ConnectionPool::new(config, 2, None);
        drop(pool.get(&Context::background()).await.expect("get"));

        let token = CancellationToken::new();
        token.cancel();
        let ctx = Context::background().with_cancellation(token);
        let conn = pool.get(&ctx).await.expect("idle connection");
        drop(conn);
        assert_eq!(pool.stats(), PoolStats { dials: 1, reuses: 1, closes: 0 });

        // Empty store again: the dead context now refuses to dial.
        let held = pool.get(&ctx).await.expect("idle connection");
        assert!(matches!(pool.get(&ctx).await, Err(ClientError::Cancelled)));
        assert_eq!(pool.stats().dials, 1);
        drop(held);
    }

    #[tokio::test]
    async fn reuses_released_connection() {
        let (listener, config) = listener().await;
        accept_forever(listener);
        let pool = ConnectionPool::new(config, 2, None);
        let ctx = Context::background();

        let conn = pool.get(&ctx).await.expect("get");
        let first = conn.id();
        drop(conn);
        assert_eq!(pool.idle_count(), 1);

        let conn = pool.get(&ctx).await.expect("get");
        assert_eq!(conn.id(), first);
        assert_eq!(pool.stats(), PoolStats { dials: 1, reuses: 1, closes: 0 });
    }

    #[tokio::test]
    async fn release_beyond_capacity_closes() {
        let (listener, config) = listener().await;
        accept_forever(listener);
        let capacity = 3;
        let pool = ConnectionPool::new(config, capacity, None);
        let ctx = Context::background();

        let mut held = Vec::new();
        for _ in 0..=capacity {
            held.push(pool.get(&ctx).await.expect("get"));
        }
        assert_eq!(pool.stats().dials, capacity as u64 + 1);
        drop(held);

        assert_eq!(pool.idle_count(), capacity);
        assert_eq!(pool.stats().closes, 1);
    }

    #[tokio::test]
    async fn invalidated_connection_is_closed() {
        let (listener, config) = listener().await;
        accept_forever(listener);
        let pool = ConnectionPool::new(config, 2, None);

        let mut conn = pool.get(&Context::background()).await.expect("get");
        conn.invalidate();
        drop(conn);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.stats().closes, 1);
    }

    #[tokio::test]
    async fn prefill_and_close() {
        let (listener, config) = listener().await;
        accept_forever(listener);
        let pool = ConnectionPool::new(config, 4, None);
        let ctx = Context::background();

        pool.prefill(&ctx).await.expect("prefill");
        assert_eq!(pool.idle_count(), 4);

        let conn = pool.get(&ctx).await.expect("get");
        pool.close();
        assert_eq!(pool.idle_count(), 0);
        assert!(matches!(pool.get(&ctx).await, Err(ClientError::PoolClosed)));

        drop(conn);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.stats().closes, 4);
    }

    #[tokio::test]
    async fn dial_failure_surfaces_io_error() {
        let (listener, config) = listener().await;
        drop(listener);
        let pool = ConnectionPool::new(config, 1, None);
        let err = pool.get(&Context::background()).await.err().expect("refused");
        assert!(matches!(err, ClientError::Io(_)));
        assert!(err.is_connection());
    }
}
