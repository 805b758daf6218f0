//! # RESP Response Decoding
//!
//! Purpose: Decode exactly one reply of a statically expected shape from a
//! connection, leaving the stream positioned right after its terminator.
//!
//! ## Design Principles
//! 1. **Shape-Directed Parsing**: Each decode function knows the reply shape
//!    it expects and fails fast on anything else.
//! 2. **Explicit Outcomes**: `+OK` and nulls come back as `Reply::Ok` and
//!    `Reply::Null`, never as errors.
//! 3. **Bounded Buffers**: Read buffers come from a size-classed pool; bulk
//!    payloads larger than the buffer are assembled chunk by chunk.
//! 4. **Binary-Safe**: Bulk payloads are raw bytes (`Bytes`).
//!
//! ## Type Tags
//!
//! ```text
//! +  simple string     +OK\r\n
//! -  error             -ERR unknown command\r\n
//! :  integer           :42\r\n
//! $  bulk string       $5\r\nhello\r\n      ($-1\r\n is null)
//! *  array             *2\r\n:1\r\n:2\r\n    (*-1\r\n is null)
//! !  blob error        !9\r\nERR oops!\r\n
//! _  null (RESP3)      _\r\n
//! ,  double (RESP3)    ,3.25\r\n
//! ```

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{excerpt, ClientError, ClientResult};

/// Largest accepted bulk payload.
pub const SIZE_MAX: usize = 512 << 20;

/// Largest accepted array length.
pub const ELEMENT_MAX: u64 = u32::MAX as u64;

/// Smallest pooled read buffer.
pub const READER_MIN: usize = 1256;

/// Largest pooled read buffer.
pub const READER_MAX: usize = 65536;

const MAX_POOLED_PER_CLASS: usize = 64;

/// Decoded reply of one call.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    /// The server answered `+OK`.
    Ok,
    /// Null bulk string or null array.
    Null,
    /// A value of the expected shape.
    Value(T),
}

impl<T> Reply<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reply<U> {
        match self {
            Reply::Ok => Reply::Ok,
            Reply::Null => Reply::Null,
            Reply::Value(value) => Reply::Value(f(value)),
        }
    }

    /// Folds `Ok` and `Null` into `T::default()`.
    pub fn into_value(self) -> T
    where
        T: Default,
    {
        match self {
            Reply::Value(value) => value,
            Reply::Ok | Reply::Null => T::default(),
        }
    }

    pub fn value(self) -> Option<T> {
        match self {
            Reply::Value(value) => Some(value),
            Reply::Ok | Reply::Null => None,
        }
    }
}

/// Reply shape a call expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Status,
    Int,
    Ints,
    Float,
    Str,
    Strs,
}

/// Any decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Status text of a non-OK simple string reply.
    Status(Bytes),
    Int(i64),
    Ints(Vec<i64>),
    Float(f64),
    Str(Bytes),
    Strs(Vec<Bytes>),
}

/// Size-classed pool of read buffers.
///
/// Buffers come in powers of two between the rounded-up `min` and `max`.
/// Requests above `max` get an exact, unpooled allocation.
#[derive(Debug)]
pub struct ReaderPool {
    min: usize,
    max: usize,
    classes: Vec<Mutex<Vec<Box<[u8]>>>>,
}

impl ReaderPool {
    pub fn new(min: usize, max: usize) -> Self {
        let min = min.max(1).next_power_of_two();
        let max = max.max(min).next_power_of_two();
        let count = (max.trailing_zeros() - min.trailing_zeros()) as usize + 1;
        ReaderPool {
            min,
            max,
            classes: (0..count).map(|_| Mutex::new(Vec::new())).collect(),
        }
    }

    /// Returns a buffer of at least `size` bytes.
    pub fn get(self: &Arc<Self>, size: usize) -> ReadBuffer {
        let class = size.max(self.min).next_power_of_two();
        if class > self.max {
            return ReadBuffer {
                data: vec![0u8; size].into_boxed_slice(),
                pool: None,
            };
        }
        let data = self.classes[self.class_index(class)]
            .lock()
            .expect("reader pool mutex poisoned")
            .pop()
            .unwrap_or_else(|| vec![0u8; class].into_boxed_slice());
        ReadBuffer {
            data,
            pool: Some(Arc::clone(self)),
        }
    }

    /// Buffers waiting for reuse in the class serving `size`.
    pub fn idle(&self, size: usize) -> usize {
        let class = size.max(self.min).next_power_of_two();
        if class > self.max {
            return 0;
        }
        self.classes[self.class_index(class)]
            .lock()
            .expect("reader pool mutex poisoned")
            .len()
    }

    fn class_index(&self, class: usize) -> usize {
        (class.trailing_zeros() - self.min.trailing_zeros()) as usize
    }

    fn put(&self, data: Box<[u8]>) {
        let len = data.len();
        if !len.is_power_of_two() || len < self.min || len > self.max {
            return;
        }
        let mut free = self.classes[self.class_index(len)]
            .lock()
            .expect("reader pool mutex poisoned");
        if free.len() < MAX_POOLED_PER_CLASS {
            free.push(data);
        }
    }
}

impl Default for ReaderPool {
    fn default() -> Self {
        ReaderPool::new(READER_MIN, READER_MAX)
    }
}

/// Read buffer that returns to its pool on drop.
#[derive(Debug)]
pub struct ReadBuffer {
    data: Box<[u8]>,
    pool: Option<Arc<ReaderPool>>,
}

impl ReadBuffer {
    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl Drop for ReadBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.put(std::mem::take(&mut self.data));
        }
    }
}

/// Buffered reader bound to one stream for one decode.
pub struct ResponseReader<'s, S> {
    stream: &'s mut S,
    buf: ReadBuffer,
    start: usize,
    end: usize,
}

impl<'s, S: AsyncRead + Unpin> ResponseReader<'s, S> {
    pub fn new(stream: &'s mut S, buf: ReadBuffer) -> Self {
        ResponseReader {
            stream,
            buf,
            start: 0,
            end: 0,
        }
    }

    /// Bytes read from the stream but not consumed yet.
    pub fn buffered(&self) -> usize {
        self.end - self.start
    }

    /// Reads more bytes, compacting the buffer first. EOF is an error: a
    /// reply is always expected.
    async fn fill(&mut self) -> ClientResult<()> {
        if self.start > 0 {
            self.buf.data.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        let n = self.stream.read(&mut self.buf.data[self.end..]).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid-reply",
            )
            .into());
        }
        self.end += n;
        Ok(())
    }

    /// Returns the next line, CRLF included.
    async fn read_line(&mut self) -> ClientResult<&[u8]> {
        let mut scanned = 0;
        loop {
            let window = &self.buf.data[self.start + scanned..self.end];
            if let Some(pos) = window.iter().position(|&b| b == b'\n') {
                let line_start = self.start;
                self.start += scanned + pos + 1;
                return Ok(&self.buf.data[line_start..self.start]);
            }
            scanned = self.end - self.start;
            if scanned == self.buf.capacity() {
                return Err(ClientError::Protocol(format!(
                    "LF exceeds {} bytes: {}",
                    self.buf.capacity(),
                    excerpt(&self.buf.data[self.start..self.end])
                )));
            }
            self.fill().await?;
        }
    }

    /// Reads `len` payload bytes plus the trailing CRLF.
    async fn read_bulk(&mut self, len: usize) -> ClientResult<Bytes> {
        if self.buffered() >= len + 2 {
            let payload = Bytes::copy_from_slice(&self.buf.data[self.start..self.start + len]);
            self.start += len;
            self.expect_crlf().await?;
            return Ok(payload);
        }

        // Payload spans several buffer fills.
        let mut blob = BytesMut::with_capacity(len);
        while blob.len() < len {
            if self.buffered() == 0 {
                self.fill().await?;
            }
            let take = (len - blob.len()).min(self.buffered());
            blob.extend_from_slice(&self.buf.data[self.start..self.start + take]);
            self.start += take;
        }
        self.expect_crlf().await?;
        Ok(blob.freeze())
    }

    async fn expect_crlf(&mut self) -> ClientResult<()> {
        while self.buffered() < 2 {
            self.fill().await?;
        }
        let terminator = &self.buf.data[self.start..self.start + 2];
        if terminator != b"\r\n" {
            return Err(ClientError::Protocol(format!(
                "bulk terminator expected, received {}",
                excerpt(terminator)
            )));
        }
        self.start += 2;
        Ok(())
    }
}

/// Outcome of a line that is not the expected shape.
enum Unexpected {
    Ok,
    Null,
    Simple(Bytes),
    Server(String),
    Blob(usize),
    Violation(ClientError),
}

impl Unexpected {
    fn classify(line: &[u8], want: &str) -> Unexpected {
        if line == b"+OK\r\n" {
            return Unexpected::Ok;
        }
        let Some(body) = body(line) else {
            return Unexpected::Violation(ClientError::unexpected(want, line));
        };
        match line[0] {
            b'+' => Unexpected::Simple(Bytes::copy_from_slice(body)),
            b'-' if !body.is_empty() => {
                Unexpected::Server(String::from_utf8_lossy(body).into_owned())
            }
            b'$' | b'*' if body == b"-1" => Unexpected::Null,
            b'_' if body.is_empty() => Unexpected::Null,
            b'!' => match parse_int(body) {
                Some(len) if len >= 0 && (len as usize) <= SIZE_MAX => {
                    Unexpected::Blob(len as usize)
                }
                _ => Unexpected::Violation(ClientError::unexpected("blob error length", line)),
            },
            _ => Unexpected::Violation(ClientError::unexpected(want, line)),
        }
    }

    /// Resolves into a reply for a decoder that does not take simple strings.
    async fn resolve<S, T>(
        self,
        r: &mut ResponseReader<'_, S>,
        want: &str,
    ) -> ClientResult<Reply<T>>
    where
        S: AsyncRead + Unpin,
    {
        match self {
            Unexpected::Simple(text) => {
                let mut raw = Vec::with_capacity(text.len() + 3);
                raw.push(b'+');
                raw.extend_from_slice(&text);
                raw.extend_from_slice(b"\r\n");
                Err(ClientError::unexpected(want, &raw))
            }
            other => other.resolve_simple(r).await.map(|reply| match reply {
                Reply::Ok => Reply::Ok,
                Reply::Null => Reply::Null,
                Reply::Value(never) => match never {},
            }),
        }
    }

    /// Resolves every outcome except accepted simple strings.
    async fn resolve_simple<S>(
        self,
        r: &mut ResponseReader<'_, S>,
    ) -> ClientResult<Reply<std::convert::Infallible>>
    where
        S: AsyncRead + Unpin,
    {
        match self {
            Unexpected::Ok => Ok(Reply::Ok),
            Unexpected::Null => Ok(Reply::Null),
            Unexpected::Server(message) => Err(ClientError::server(message)),
            Unexpected::Blob(len) => {
                let message = r.read_bulk(len).await?;
                Err(ClientError::server(String::from_utf8_lossy(&message)))
            }
            Unexpected::Violation(err) => Err(err),
            Unexpected::Simple(_) => unreachable!("simple strings are resolved by the caller"),
        }
    }
}

/// Strips the type tag and CRLF; `None` when the line is not `tag…\r\n`.
fn body(line: &[u8]) -> Option<&[u8]> {
    if line.len() < 3 || !line.ends_with(b"\r\n") {
        return None;
    }
    Some(&line[1..line.len() - 2])
}

/// Parses a fixed-format signed decimal: optional `-`, then digits only.
pub fn parse_int(data: &[u8]) -> Option<i64> {
    let (negative, digits) = match data.split_first() {
        Some((b'-', rest)) => (true, rest),
        Some(_) => (false, data),
        None => return None,
    };
    if digits.is_empty() {
        return None;
    }

    let mut value: u64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add(u64::from(b - b'0'))?;
    }

    if negative {
        if value > i64::MIN.unsigned_abs() {
            return None;
        }
        Some((value as i64).wrapping_neg())
    } else {
        i64::try_from(value).ok()
    }
}

fn parse_float(data: &[u8]) -> Option<f64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}

/// Decodes an integer reply.
pub async fn decode_int<S>(r: &mut ResponseReader<'_, S>) -> ClientResult<Reply<i64>>
where
    S: AsyncRead + Unpin,
{
    let line = r.read_line().await?;
    if line[0] == b':' {
        if let Some(value) = body(line).and_then(parse_int) {
            return Ok(Reply::Value(value));
        }
    }
    Unexpected::classify(line, "integer").resolve(r, "integer").await
}

/// Decodes a float from an integer, bulk or double reply.
pub async fn decode_float<S>(r: &mut ResponseReader<'_, S>) -> ClientResult<Reply<f64>>
where
    S: AsyncRead + Unpin,
{
    let line = r.read_line().await?;
    match line[0] {
        b':' | b',' => {
            if let Some(value) = body(line).and_then(parse_float) {
                return Ok(Reply::Value(value));
            }
        }
        b'$' => {
            if let Some(len) = bulk_len(line) {
                let payload = r.read_bulk(len).await?;
                return parse_float(&payload).map(Reply::Value).ok_or_else(|| {
                    ClientError::Protocol(format!("float expected, received {}", excerpt(&payload)))
                });
            }
        }
        _ => {}
    }
    Unexpected::classify(line, "float").resolve(r, "float").await
}

/// Decodes a bulk string reply.
pub async fn decode_string<S>(r: &mut ResponseReader<'_, S>) -> ClientResult<Reply<Bytes>>
where
    S: AsyncRead + Unpin,
{
    let line = r.read_line().await?;
    if line[0] == b'$' {
        if let Some(len) = bulk_len(line) {
            return r.read_bulk(len).await.map(Reply::Value);
        }
    }
    match Unexpected::classify(line, "blob") {
        Unexpected::Simple(text) => Ok(Reply::Value(text)),
        other => other.resolve(r, "blob").await,
    }
}

/// Decodes a status reply: `+OK`, any simple string, a bulk string or null.
pub async fn decode_status<S>(r: &mut ResponseReader<'_, S>) -> ClientResult<Reply<Bytes>>
where
    S: AsyncRead + Unpin,
{
    decode_string(r).await
}

/// Decodes an array of integers; null elements become `0`.
pub async fn decode_ints<S>(r: &mut ResponseReader<'_, S>) -> ClientResult<Reply<Vec<i64>>>
where
    S: AsyncRead + Unpin,
{
    let len = match read_array_len(r).await? {
        Reply::Value(len) => len,
        Reply::Ok => return Ok(Reply::Ok),
        Reply::Null => return Ok(Reply::Null),
    };
    let mut items = Vec::with_capacity(len.min(1024));
    let mut server_error = None;
    for _ in 0..len {
        match decode_int(r).await {
            Ok(reply) => items.push(reply.into_value()),
            Err(err @ ClientError::Server { .. }) => {
                server_error.get_or_insert(err);
            }
            Err(err) => return Err(err),
        }
    }
    match server_error {
        Some(err) => Err(err),
        None => Ok(Reply::Value(items)),
    }
}

/// Decodes an array of bulk strings; null elements become empty.
pub async fn decode_strings<S>(r: &mut ResponseReader<'_, S>) -> ClientResult<Reply<Vec<Bytes>>>
where
    S: AsyncRead + Unpin,
{
    let len = match read_array_len(r).await? {
        Reply::Value(len) => len,
        Reply::Ok => return Ok(Reply::Ok),
        Reply::Null => return Ok(Reply::Null),
    };
    let mut items = Vec::with_capacity(len.min(1024));
    let mut server_error = None;
    for _ in 0..len {
        match decode_string(r).await {
            Ok(reply) => items.push(reply.into_value()),
            Err(err @ ClientError::Server { .. }) => {
                server_error.get_or_insert(err);
            }
            Err(err) => return Err(err),
        }
    }
    match server_error {
        Some(err) => Err(err),
        None => Ok(Reply::Value(items)),
    }
}

/// Decodes one reply of `shape`.
pub async fn decode<S>(r: &mut ResponseReader<'_, S>, shape: Shape) -> ClientResult<Reply<Value>>
where
    S: AsyncRead + Unpin,
{
    match shape {
        Shape::Status => decode_status(r).await.map(|reply| reply.map(Value::Status)),
        Shape::Int => decode_int(r).await.map(|reply| reply.map(Value::Int)),
        Shape::Ints => decode_ints(r).await.map(|reply| reply.map(Value::Ints)),
        Shape::Float => decode_float(r).await.map(|reply| reply.map(Value::Float)),
        Shape::Str => decode_string(r).await.map(|reply| reply.map(Value::Str)),
        Shape::Strs => decode_strings(r).await.map(|reply| reply.map(Value::Strs)),
    }
}

async fn read_array_len<S>(r: &mut ResponseReader<'_, S>) -> ClientResult<Reply<usize>>
where
    S: AsyncRead + Unpin,
{
    let line = r.read_line().await?;
    if line[0] == b'*' {
        match body(line).and_then(parse_int) {
            Some(len) if len >= 0 && (len as u64) <= ELEMENT_MAX => {
                return Ok(Reply::Value(len as usize));
            }
            Some(-1) => return Ok(Reply::Null),
            _ => {}
        }
    }
    Unexpected::classify(line, "array").resolve(r, "array").await
}

fn bulk_len(line: &[u8]) -> Option<usize> {
    match body(line).and_then(parse_int) {
        Some(len) if len >= 0 && (len as usize) <= SIZE_MAX => Some(len as usize),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Arc<ReaderPool> {
        Arc::new(ReaderPool::default())
    }

    #[tokio::test]
    async fn decodes_integer() {
        let mut input: &[u8] = b":-42\r\n";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        assert_eq!(decode_int(&mut r).await.unwrap(), Reply::Value(-42));
        assert_eq!(r.buffered(), 0);
    }

    #[tokio::test]
    async fn decodes_ok_status() {
        let mut input: &[u8] = b"+OK\r\n";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        assert_eq!(decode_status(&mut r).await.unwrap(), Reply::Ok);
    }

    #[tokio::test]
    async fn simple_string_is_a_string_value() {
        let mut input: &[u8] = b"+PONG\r\n";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        assert_eq!(
            decode_string(&mut r).await.unwrap(),
            Reply::Value(Bytes::from_static(b"PONG"))
        );
    }

    #[tokio::test]
    async fn null_bulk_is_not_an_error() {
        let mut input: &[u8] = b"$-1\r\n";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        assert_eq!(decode_string(&mut r).await.unwrap(), Reply::Null);
    }

    #[tokio::test]
    async fn null_array_and_resp3_null() {
        let mut input: &[u8] = b"*-1\r\n_\r\n";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        assert_eq!(decode_strings(&mut r).await.unwrap(), Reply::Null);
        assert_eq!(decode_int(&mut r).await.unwrap(), Reply::Null);
    }

    #[tokio::test]
    async fn server_error_is_verbatim() {
        let mut input: &[u8] = b"-ERR unknown command 'FOO'\r\n";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        let err = decode_int(&mut r).await.unwrap_err();
        assert_eq!(err.to_string(), "ERR unknown command 'FOO'");
    }

    #[tokio::test]
    async fn blob_error_reads_payload() {
        let mut input: &[u8] = b"!21\r\nSYNTAX invalid syntax\r\n";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        let err = decode_string(&mut r).await.unwrap_err();
        assert!(err.is_server());
        assert_eq!(err.to_string(), "SYNTAX invalid syntax");
        assert_eq!(r.buffered(), 0);
    }

    #[tokio::test]
    async fn shape_mismatch_names_expected_shape() {
        let mut input: &[u8] = b"*2\r\n:1\r\n:2\r\n";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        let err = decode_int(&mut r).await.unwrap_err();
        assert!(err.is_protocol());
        let message = err.to_string();
        assert!(message.contains("integer expected"), "{}", message);
        assert!(message.contains("\"*2\\r\\n\""), "{}", message);
    }

    #[tokio::test]
    async fn simple_string_to_integer_is_mismatch() {
        let mut input: &[u8] = b"+QUEUED\r\n";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        let err = decode_int(&mut r).await.unwrap_err();
        assert!(err.to_string().contains("+QUEUED"));
    }

    #[tokio::test]
    async fn missing_tag_is_violation() {
        let mut input: &[u8] = b"hello\r\n";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        assert!(decode_string(&mut r).await.unwrap_err().is_protocol());
    }

    #[tokio::test]
    async fn missing_length_is_violation() {
        let mut input: &[u8] = b"$\r\n";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        assert!(decode_string(&mut r).await.unwrap_err().is_protocol());
    }

    #[tokio::test]
    async fn truncated_reply_is_io_error() {
        let mut input: &[u8] = b"$10\r\nhello";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        let err = decode_string(&mut r).await.unwrap_err();
        match err {
            ClientError::Io(io) => assert_eq!(io.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn bad_bulk_terminator_is_violation() {
        let mut input: &[u8] = b"$5\r\nhelloXY";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        assert!(decode_string(&mut r).await.unwrap_err().is_protocol());
    }

    #[tokio::test]
    async fn large_bulk_spans_many_fills() {
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let mut wire = format!("${}\r\n", payload.len()).into_bytes();
        wire.extend_from_slice(&payload);
        wire.extend_from_slice(b"\r\n:7\r\n");

        let mut input: &[u8] = &wire;
        let readers = pool();
        let mut r = ResponseReader::new(&mut input, readers.get(4096));
        let value = decode_string(&mut r).await.unwrap();
        assert_eq!(value, Reply::Value(Bytes::from(payload)));
        assert_eq!(decode_int(&mut r).await.unwrap(), Reply::Value(7));
    }

    #[tokio::test]
    async fn line_longer_than_buffer_is_violation() {
        let mut wire = vec![b'+'; 5000];
        wire.extend_from_slice(b"\r\n");
        let mut input: &[u8] = &wire;
        let readers = Arc::new(ReaderPool::new(1024, 2048));
        let mut r = ResponseReader::new(&mut input, readers.get(1024));
        let err = decode_string(&mut r).await.unwrap_err();
        assert!(err.to_string().contains("LF exceeds 1024 bytes"));
    }

    #[tokio::test]
    async fn decodes_integer_array_with_nulls() {
        let mut input: &[u8] = b"*3\r\n:1\r\n$-1\r\n:-3\r\n";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        assert_eq!(decode_ints(&mut r).await.unwrap(), Reply::Value(vec![1, 0, -3]));
    }

    #[tokio::test]
    async fn decodes_string_array_with_nulls() {
        let mut input: &[u8] = b"*3\r\n$1\r\na\r\n$-1\r\n$0\r\n\r\n";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        let reply = decode_strings(&mut r).await.unwrap();
        assert_eq!(
            reply,
            Reply::Value(vec![Bytes::from_static(b"a"), Bytes::new(), Bytes::new()])
        );
    }

    #[tokio::test]
    async fn array_element_error_keeps_framing() {
        let mut input: &[u8] = b"*3\r\n:1\r\n-ERR nope\r\n:3\r\n:99\r\n";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        let err = decode_ints(&mut r).await.unwrap_err();
        assert_eq!(err.to_string(), "ERR nope");
        assert_eq!(decode_int(&mut r).await.unwrap(), Reply::Value(99));
    }

    #[tokio::test]
    async fn decodes_floats() {
        let mut input: &[u8] = b":3\r\n$4\r\n2.75\r\n,-0.5\r\n";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        assert_eq!(decode_float(&mut r).await.unwrap(), Reply::Value(3.0));
        assert_eq!(decode_float(&mut r).await.unwrap(), Reply::Value(2.75));
        assert_eq!(decode_float(&mut r).await.unwrap(), Reply::Value(-0.5));
    }

    #[tokio::test]
    async fn general_decode_dispatches_on_shape() {
        let mut input: &[u8] = b"*2\r\n$1\r\nx\r\n$1\r\ny\r\n";
        let mut r = ResponseReader::new(&mut input, pool().get(READER_MIN));
        let reply = decode(&mut r, Shape::Strs).await.unwrap();
        assert_eq!(
            reply,
            Reply::Value(Value::Strs(vec![Bytes::from_static(b"x"), Bytes::from_static(b"y")]))
        );
    }

    #[test]
    fn parses_fixed_format_integers() {
        assert_eq!(parse_int(b"0"), Some(0));
        assert_eq!(parse_int(b"-1"), Some(-1));
        assert_eq!(parse_int(b"9223372036854775807"), Some(i64::MAX));
        assert_eq!(parse_int(b"-9223372036854775808"), Some(i64::MIN));
        assert_eq!(parse_int(b"9223372036854775808"), None);
        assert_eq!(parse_int(b""), None);
        assert_eq!(parse_int(b"-"), None);
        assert_eq!(parse_int(b"+1"), None);
        assert_eq!(parse_int(b"1 2"), None);
    }

    #[test]
    fn reader_pool_rounds_to_size_classes() {
        let readers = Arc::new(ReaderPool::new(1256, 65536));
        let buf = readers.get(100);
        assert_eq!(buf.capacity(), 2048);
        drop(buf);
        assert_eq!(readers.idle(100), 1);

        let buf = readers.get(3000);
        assert_eq!(buf.capacity(), 4096);
        drop(buf);
        assert_eq!(readers.idle(4096), 1);
        assert_eq!(readers.idle(2048), 1);
    }

    #[test]
    fn reader_pool_does_not_keep_oversized_buffers() {
        let readers = Arc::new(ReaderPool::new(1256, 65536));
        let buf = readers.get(100_000);
        assert_eq!(buf.capacity(), 100_000);
        drop(buf);
        assert_eq!(readers.idle(100_000), 0);
    }
}
