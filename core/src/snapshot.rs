//! # Snapshot: Lazy Persisted State
//!
//! A [`Snapshot`] is either a byte blob or a deferred writer closure. Writing
//! is postponed until [`Snapshot::bytes`] is first called and the result is
//! memoized, so taking a snapshot that is never persisted costs nothing.
//!
//! Reading is a one-shot sequential pass over a [`SnapshotReader`]. All
//! integers are big-endian; strings and nested blobs are length-prefixed
//! with an `i32`.

use std::fmt;
use std::sync::{Arc, OnceLock};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Unexpected end of snapshot: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("Negative length prefix: {0}")]
    NegativeLength(i32),

    #[error("Invalid UTF-8 in snapshot string")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Invalid boolean value: {0}")]
    InvalidBool(i32),

    #[error("Invalid tag byte: {0}")]
    InvalidTag(u8),

    #[error("{0} trailing bytes left unread")]
    TrailingBytes(usize),

    #[error("Length {0} does not fit the i32 length prefix")]
    TooLarge(usize),

    #[error("Invalid snapshot value: {0}")]
    Invalid(String),

    #[error("Snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

type WriteFn = Box<dyn Fn(&mut SnapshotWriter) + Send + Sync>;

struct SnapshotInner {
    bytes: OnceLock<Bytes>,
    writer: Option<WriteFn>,
}

/// Immutable, lazily materialized persisted state.
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

impl Snapshot {
    /// Defer writing until the bytes are actually needed.
    pub fn write<F>(writer: F) -> Self
    where
        F: Fn(&mut SnapshotWriter) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(SnapshotInner {
                bytes: OnceLock::new(),
                writer: Some(Box::new(writer)),
            }),
        }
    }

    pub fn of_bytes(bytes: impl Into<Bytes>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(bytes.into());
        Self {
            inner: Arc::new(SnapshotInner {
                bytes: cell,
                writer: None,
            }),
        }
    }

    pub fn empty() -> Self {
        Self::of_bytes(Bytes::new())
    }

    pub fn of_str(value: &str) -> Self {
        let value = value.to_owned();
        Self::write(move |w| w.write_str(&value))
    }

    pub fn of_i32(value: i32) -> Self {
        Self::write(move |w| w.write_i32(value))
    }

    pub fn of_i64(value: i64) -> Self {
        Self::write(move |w| w.write_i64(value))
    }

    /// Serialize `value` as JSON. Unlike [`Snapshot::write`] this runs eagerly.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, SnapshotError> {
        Ok(Self::of_bytes(serde_json::to_vec(value)?))
    }

    /// Materialize the bytes, running the deferred writer on first access.
    pub fn bytes(&self) -> &Bytes {
        self.inner.bytes.get_or_init(|| {
            let mut writer = SnapshotWriter::new();
            if let Some(write) = &self.inner.writer {
                write(&mut writer);
            }
            writer.finish()
        })
    }

    pub fn is_materialized(&self) -> bool {
        self.inner.bytes.get().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    /// Read the whole snapshot. Fails if `read` leaves bytes unconsumed.
    pub fn parse<T, F>(&self, read: F) -> Result<T, SnapshotError>
    where
        F: FnOnce(&mut SnapshotReader<'_>) -> Result<T, SnapshotError>,
    {
        let mut reader = SnapshotReader::new(self.bytes());
        let value = read(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }

    /// Read a prefix of the snapshot, tolerating trailing bytes.
    pub fn parse_prefix<T, F>(&self, read: F) -> Result<T, SnapshotError>
    where
        F: FnOnce(&mut SnapshotReader<'_>) -> Result<T, SnapshotError>,
    {
        let mut reader = SnapshotReader::new(self.bytes());
        read(&mut reader)
    }

    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, SnapshotError> {
        Ok(serde_json::from_slice(self.bytes())?)
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

impl Eq for Snapshot {}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.bytes.get() {
            Some(bytes) => f.debug_struct("Snapshot").field("len", &bytes.len()).finish(),
            None => f.debug_struct("Snapshot").field("deferred", &true).finish(),
        }
    }
}

// ============== Writer ==============

/// Sequential big-endian writer backing [`Snapshot::write`].
#[derive(Default)]
pub struct SnapshotWriter {
    buf: BytesMut,
}

impl SnapshotWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Booleans are written as an `i32` of 0 or 1.
    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_i32(i32::from(value));
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_f64(value);
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.put_len(value.len());
        self.buf.put_slice(value);
    }

    pub fn write_snapshot(&mut self, snapshot: &Snapshot) {
        self.write_bytes(snapshot.bytes());
    }

    pub fn write_optional<T>(&mut self, value: Option<&T>, write: impl FnOnce(&mut Self, &T)) {
        self.write_bool(value.is_some());
        if let Some(value) = value {
            write(self, value);
        }
    }

    pub fn write_list<T>(&mut self, values: &[T], mut write: impl FnMut(&mut Self, &T)) {
        self.put_len(values.len());
        for value in values {
            write(self, value);
        }
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    /// Panics if `len` does not fit the i32 prefix.
    fn put_len(&mut self, len: usize) {
        match length_prefix(len) {
            Ok(prefix) => self.buf.put_i32(prefix),
            Err(err) => panic!("cannot write snapshot: {err}"),
        }
    }
}

fn length_prefix(len: usize) -> Result<i32, SnapshotError> {
    i32::try_from(len).map_err(|_| SnapshotError::TooLarge(len))
}

// ============== Reader ==============

/// One-shot cursor over snapshot bytes.
pub struct SnapshotReader<'a> {
    buf: &'a [u8],
}

impl<'a> SnapshotReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn read_u8(&mut self) -> Result<u8, SnapshotError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool, SnapshotError> {
        match self.read_i32()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(SnapshotError::InvalidBool(other)),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32, SnapshotError> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64, SnapshotError> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_f64(&mut self) -> Result<f64, SnapshotError> {
        self.need(8)?;
        Ok(self.buf.get_f64())
    }

    pub fn read_str(&mut self) -> Result<String, SnapshotError> {
        let raw = self.read_slice()?;
        Ok(String::from_utf8(raw.to_vec())?)
    }

    /// Borrow a length-prefixed blob without copying it.
    pub fn read_slice(&mut self) -> Result<&'a [u8], SnapshotError> {
        let len = self.read_len()?;
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_bytes(&mut self) -> Result<Bytes, SnapshotError> {
        Ok(Bytes::copy_from_slice(self.read_slice()?))
    }

    pub fn read_snapshot(&mut self) -> Result<Snapshot, SnapshotError> {
        Ok(Snapshot::of_bytes(self.read_bytes()?))
    }

    pub fn read_optional<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> Result<T, SnapshotError>,
    ) -> Result<Option<T>, SnapshotError> {
        if self.read_bool()? {
            read(self).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn read_list<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> Result<T, SnapshotError>,
    ) -> Result<Vec<T>, SnapshotError> {
        let len = self.read_len()?;
        let mut values = Vec::with_capacity(len.min(self.buf.len()));
        for _ in 0..len {
            values.push(read(self)?);
        }
        Ok(values)
    }

    /// Fail if anything is left unread.
    pub fn finish(self) -> Result<(), SnapshotError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(SnapshotError::TrailingBytes(self.buf.len()))
        }
    }

    fn read_len(&mut self) -> Result<usize, SnapshotError> {
        let len = self.read_i32()?;
        usize::try_from(len).map_err(|_| SnapshotError::NegativeLength(len))
    }

    fn need(&self, needed: usize) -> Result<(), SnapshotError> {
        if self.buf.len() < needed {
            return Err(SnapshotError::UnexpectedEof {
                needed,
                remaining: self.buf.len(),
            });
        }
        Ok(())
    }
}
