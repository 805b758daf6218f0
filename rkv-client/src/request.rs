//! # RESP Request Encoding
//!
//! Purpose: Encode client commands as RESP arrays of bulk strings into pooled,
//! reusable buffers.
//!
//! ## Design Principles
//! 1. **Buffer Reuse**: Requests borrow a `BytesMut` from a `RequestPool` and
//!    hand it back exactly once, on drop.
//! 2. **Closed Argument Set**: `Arg` enumerates every encodable kind, so the
//!    compiler rejects unsupported types at the call site.
//! 3. **Allocation-Free Numbers**: Integers and floats are formatted on the
//!    stack before being framed.
//! 4. **Deferred Errors**: Builders stay chainable; the first marshal error is
//!    stored and reported before any I/O.
//!
//! ## Frame Layout
//!
//! ```text
//! *3\r\n $3\r\nSET\r\n $3\r\nkey\r\n $5\r\nvalue\r\n
//! ^hdr   ^bulk arg 0    ^bulk arg 1   ^bulk arg 2
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ClientError, ClientResult};

const INITIAL_CAPACITY: usize = 256;
const MAX_RETAINED_CAPACITY: usize = 64 * 1024;
const MAX_POOLED: usize = 64;

/// Free list of request buffers.
#[derive(Debug, Default)]
pub struct RequestPool {
    free: Mutex<Vec<BytesMut>>,
}

impl RequestPool {
    pub fn new() -> Self {
        RequestPool::default()
    }

    /// Starts a request whose array header and command name are already
    /// encoded in `prefix`, e.g. `b"*3\r\n$3\r\nSET\r\n"`.
    pub fn request(self: &Arc<Self>, prefix: &[u8]) -> Request {
        let mut buf = self.take();
        buf.extend_from_slice(prefix);
        Request {
            buf,
            expected: None,
            written: 0,
            error: None,
            pool: Arc::clone(self),
        }
    }

    /// Starts a request of `count` bulk strings, writing the array header and
    /// then the pre-encoded `prefix` (command words, each counted in `count`).
    pub fn request_sized(self: &Arc<Self>, count: usize, prefix: &[u8]) -> Request {
        let mut buf = self.take();
        buf.put_u8(b'*');
        push_usize(&mut buf, count);
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(prefix);
        Request {
            buf,
            expected: Some(count),
            written: count_bulks(prefix),
            error: None,
            pool: Arc::clone(self),
        }
    }

    /// Number of buffers waiting for reuse.
    pub fn idle(&self) -> usize {
        self.free.lock().expect("request pool mutex poisoned").len()
    }

    fn take(&self) -> BytesMut {
        let mut free = self.free.lock().expect("request pool mutex poisoned");
        free.pop()
            .unwrap_or_else(|| BytesMut::with_capacity(INITIAL_CAPACITY))
    }

    fn put(&self, mut buf: BytesMut) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();
        let mut free = self.free.lock().expect("request pool mutex poisoned");
        if free.len() < MAX_POOLED {
            free.push(buf);
        }
    }
}

/// One encoded command frame.
///
/// The buffer goes back to its pool when the request is dropped; the client
/// drops it after the reply has been decoded (or the call failed).
pub struct Request {
    buf: BytesMut,
    expected: Option<usize>,
    written: usize,
    /// First marshal failure as `(type_name, reason)`; the request stays
    /// unsendable once set.
    error: Option<(&'static str, &'static str)>,
    pool: Arc<RequestPool>,
}

impl Request {
    /// Appends one argument as a bulk string.
    pub fn arg<'a>(mut self, arg: impl Into<Arg<'a>>) -> Self {
        self.push(arg.into());
        self
    }

    /// Appends every argument of `args`.
    pub fn args<'a, I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Arg<'a>>,
    {
        for arg in args {
            self.push(arg.into());
        }
        self
    }

    /// Appends flattened key/value pairs.
    pub fn key_values<'a, K, V, I>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Arg<'a>>,
        V: Into<Arg<'a>>,
    {
        for (key, value) in pairs {
            self.push(key.into());
            self.push(value.into());
        }
        self
    }

    /// Appends one argument in place.
    pub fn push(&mut self, arg: Arg<'_>) {
        self.written += 1;
        if let Err(err) = encode_arg(&mut self.buf, &arg) {
            if self.error.is_none() {
                if let ClientError::Marshal { type_name, reason } = err {
                    self.error = Some((type_name, reason));
                }
            }
        }
    }

    /// Encoded frame.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Reports the first deferred encoding error, or an argument count that
    /// disagrees with the header written by [`RequestPool::request_sized`].
    ///
    /// Repeated checks keep failing: a request that failed to encode holds
    /// a partial frame and must never reach a socket.
    pub fn check(&self) -> ClientResult<()> {
        if let Some((type_name, reason)) = self.error {
            return Err(ClientError::marshal(type_name, reason));
        }
        match self.expected {
            Some(expected) if expected != self.written => {
                Err(ClientError::marshal("Request", "argument count differs from header"))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("frame", &String::from_utf8_lossy(&self.buf))
            .field("error", &self.error)
            .finish()
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        self.pool.put(std::mem::take(&mut self.buf));
    }
}

/// Every argument kind the encoder accepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg<'a> {
    /// Raw bytes or text.
    Bytes(&'a [u8]),
    Int(i64),
    Uint(u64),
    /// Shortest round-trip decimal, no exponent.
    Float(f64),
    /// `1` or `0`.
    Bool(bool),
    /// Nanoseconds.
    Duration(Duration),
    /// Unix seconds.
    Time(SystemTime),
    /// Empty bulk string.
    Null,
}

impl<'a> Arg<'a> {
    /// Whole seconds of `duration`.
    pub fn secs(duration: Duration) -> Self {
        Arg::Uint(duration.as_secs())
    }

    /// Whole milliseconds of `duration`, saturating at `u64::MAX`.
    pub fn millis(duration: Duration) -> Self {
        Arg::Uint(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}

impl<'a> From<&'a [u8]> for Arg<'a> {
    fn from(value: &'a [u8]) -> Self {
        Arg::Bytes(value)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Arg<'a> {
    fn from(value: &'a [u8; N]) -> Self {
        Arg::Bytes(value)
    }
}

impl<'a> From<&'a str> for Arg<'a> {
    fn from(value: &'a str) -> Self {
        Arg::Bytes(value.as_bytes())
    }
}

impl<'a> From<&'a String> for Arg<'a> {
    fn from(value: &'a String) -> Self {
        Arg::Bytes(value.as_bytes())
    }
}

impl<'a> From<&'a Vec<u8>> for Arg<'a> {
    fn from(value: &'a Vec<u8>) -> Self {
        Arg::Bytes(value)
    }
}

impl<'a> From<&'a Bytes> for Arg<'a> {
    fn from(value: &'a Bytes) -> Self {
        Arg::Bytes(value)
    }
}

impl<'a> From<&'a Arg<'a>> for Arg<'a> {
    fn from(value: &'a Arg<'a>) -> Self {
        *value
    }
}

macro_rules! arg_from_int {
    ($variant:ident, $target:ty, $($ty:ty),+) => {
        $(
            impl<'a> From<$ty> for Arg<'a> {
                fn from(value: $ty) -> Self {
                    Arg::$variant(<$target>::from(value))
                }
            }
        )+
    };
}

arg_from_int!(Int, i64, i8, i16, i32, i64);
arg_from_int!(Uint, u64, u8, u16, u32, u64);

impl<'a> From<isize> for Arg<'a> {
    fn from(value: isize) -> Self {
        Arg::Int(value as i64)
    }
}

impl<'a> From<usize> for Arg<'a> {
    fn from(value: usize) -> Self {
        Arg::Uint(value as u64)
    }
}

impl<'a> From<f64> for Arg<'a> {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

impl<'a> From<f32> for Arg<'a> {
    fn from(value: f32) -> Self {
        Arg::Float(f64::from(value))
    }
}

impl<'a> From<bool> for Arg<'a> {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

impl<'a> From<Duration> for Arg<'a> {
    fn from(value: Duration) -> Self {
        Arg::Duration(value)
    }
}

impl<'a> From<SystemTime> for Arg<'a> {
    fn from(value: SystemTime) -> Self {
        Arg::Time(value)
    }
}

impl<'a, T: Into<Arg<'a>>> From<Option<T>> for Arg<'a> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Arg::Null, Into::into)
    }
}

/// Appends `arg` to `out` as one bulk string.
pub fn encode_arg(out: &mut BytesMut, arg: &Arg<'_>) -> ClientResult<()> {
    let mut digits = Digits::new();
    match *arg {
        Arg::Bytes(data) => {
            push_bulk(out, data);
            return Ok(());
        }
        Arg::Null => {
            push_bulk(out, b"");
            return Ok(());
        }
        Arg::Int(value) => digits.push_i64(value),
        Arg::Uint(value) => digits.push_u64(value),
        Arg::Bool(value) => digits.push_u64(u64::from(value)),
        Arg::Float(value) => {
            if value.is_nan() {
                return Err(ClientError::marshal("f64", "NaN is not a valid argument"));
            }
            fmt::Write::write_fmt(&mut digits, format_args!("{}", value))
                .map_err(|_| ClientError::marshal("f64", "formatted value too long"))?;
        }
        Arg::Duration(value) => {
            let nanos = i64::try_from(value.as_nanos())
                .map_err(|_| ClientError::marshal("Duration", "nanoseconds overflow i64"))?;
            digits.push_i64(nanos);
        }
        Arg::Time(value) => {
            let secs = match value.duration_since(UNIX_EPOCH) {
                Ok(after) => i64::try_from(after.as_secs()),
                // Floor, so 1.5s before the epoch is -2.
                Err(before) => {
                    let before = before.duration();
                    let round = i64::from(before.subsec_nanos() > 0);
                    i64::try_from(before.as_secs()).map(|secs| -secs - round)
                }
            }
            .map_err(|_| ClientError::marshal("SystemTime", "unix seconds overflow i64"))?;
            digits.push_i64(secs);
        }
    }
    push_bulk(out, digits.as_bytes());
    Ok(())
}

/// Appends a whole command frame for `args` to `out`.
pub fn encode_command(out: &mut BytesMut, args: &[Arg<'_>]) -> ClientResult<()> {
    out.put_u8(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        encode_arg(out, arg)?;
    }
    Ok(())
}

fn push_bulk(out: &mut BytesMut, data: &[u8]) {
    out.reserve(data.len() + 16);
    out.put_u8(b'$');
    push_usize(out, data.len());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

fn push_usize(out: &mut BytesMut, value: usize) {
    let mut digits = Digits::new();
    digits.push_u64(value as u64);
    out.extend_from_slice(digits.as_bytes());
}

/// Counts the bulk strings in a pre-encoded prefix by walking its headers.
fn count_bulks(mut prefix: &[u8]) -> usize {
    let mut count = 0;
    while let Some(rest) = prefix.strip_prefix(b"$") {
        let Some(eol) = rest.iter().position(|&b| b == b'\r') else {
            break;
        };
        let Some(len) = std::str::from_utf8(&rest[..eol])
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        else {
            break;
        };
        let skip = eol + 2 + len + 2;
        if rest.len() < skip {
            break;
        }
        count += 1;
        prefix = &rest[skip..];
    }
    count
}

// Wide enough for any f64 printed without exponent (subnormals included).
const DIGITS_CAPACITY: usize = 400;

/// Stack buffer for number formatting.
struct Digits {
    buf: [u8; DIGITS_CAPACITY],
    len: usize,
}

impl Digits {
    fn new() -> Self {
        Digits {
            buf: [0u8; DIGITS_CAPACITY],
            len: 0,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    fn push_i64(&mut self, value: i64) {
        if value < 0 {
            self.buf[self.len] = b'-';
            self.len += 1;
        }
        self.push_u64(value.unsigned_abs());
    }

    fn push_u64(&mut self, mut value: u64) {
        let start = self.len;
        if value == 0 {
            self.buf[self.len] = b'0';
            self.len += 1;
            return;
        }
        while value > 0 {
            self.buf[self.len] = b'0' + (value % 10) as u8;
            value /= 10;
            self.len += 1;
        }
        self.buf[start..self.len].reverse();
    }
}

impl fmt::Write for Digits {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len + s.len();
        if end > DIGITS_CAPACITY {
            return Err(fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}
