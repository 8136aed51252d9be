//! Byte-oriented stream codec with sticky error statuses.
//!
//! All on-disk formats in this crate are built from three primitives: `u8`,
//! big-endian `u16`, and LEB128 varints (7 data bits per byte, MSB set on
//! continuation bytes). Readers and writers wrap a file handle and carry a
//! sticky [`Status`]: after the first failure every further call is a no-op
//! that keeps reporting the original status, so call sites can issue a whole
//! batch of reads or writes and check the stream once at the end.

use crate::error::Status;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::error;

/// How a [`StreamWriter`] opens its destination file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the file, truncating any existing content.
    Truncate,
    /// Create the file if needed, appending to existing content.
    Append,
    /// Create the file, failing if it already exists.
    CreateNew,
}

/// Sequential reader over a file with seek support and a sticky status.
#[derive(Debug)]
pub struct StreamReader {
    inner: Option<BufReader<File>>,
    status: Status,
    position: u64,
}

impl StreamReader {
    /// Creates a reader with no underlying file; status is [`Status::Closed`].
    pub fn new() -> Self {
        StreamReader {
            inner: None,
            status: Status::Closed,
            position: 0,
        }
    }

    /// Opens `path` for reading.
    ///
    /// A missing file yields a reader with [`Status::NotFound`], which callers
    /// treat as an empty data source rather than a failure.
    pub fn open(path: &Path) -> Self {
        match File::open(path) {
            Ok(file) => StreamReader {
                inner: Some(BufReader::new(file)),
                status: Status::Ok,
                position: 0,
            },
            Err(err) if err.kind() == ErrorKind::NotFound => StreamReader {
                inner: None,
                status: Status::NotFound,
                position: 0,
            },
            Err(err) => {
                error!("failed to open {} for read: {}", path.display(), err);
                StreamReader {
                    inner: None,
                    status: Status::IoError,
                    position: 0,
                }
            }
        }
    }

    /// Returns true if the status is [`Status::Ok`].
    pub fn ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Returns the current sticky status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Returns true while an underlying file handle is held.
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Returns the byte offset of the next read.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Repositions the stream at an absolute byte offset.
    pub fn seek(&mut self, offset: u64) {
        if self.status != Status::Ok {
            return;
        }
        let Some(inner) = self.inner.as_mut() else {
            self.status = Status::Closed;
            return;
        };
        match inner.seek(SeekFrom::Start(offset)) {
            Ok(_) => self.position = offset,
            Err(err) => {
                error!("seek to {} failed: {}", offset, err);
                self.status = Status::IoError;
            }
        }
    }

    /// Releases the file handle. A healthy stream becomes [`Status::Closed`];
    /// a failed one keeps its failure status.
    pub fn close(&mut self) {
        self.inner = None;
        if self.status == Status::Ok {
            self.status = Status::Closed;
        }
    }

    fn fill(&mut self, buf: &mut [u8]) {
        if self.status != Status::Ok {
            return;
        }
        let Some(inner) = self.inner.as_mut() else {
            self.status = Status::Closed;
            return;
        };
        match inner.read_exact(buf) {
            Ok(()) => self.position += buf.len() as u64,
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                self.status = Status::EndOfStream;
            }
            Err(err) => {
                error!("read failed: {}", err);
                self.status = Status::IoError;
            }
        }
    }

    /// Reads one byte; returns 0 if the stream is not healthy.
    pub fn read_u8(&mut self) -> u8 {
        let mut buf = [0u8; 1];
        self.fill(&mut buf);
        buf[0]
    }

    /// Reads a big-endian `u16`; returns 0 if the stream is not healthy.
    pub fn read_be_u16(&mut self) -> u16 {
        let mut buf = [0u8; 2];
        self.fill(&mut buf);
        u16::from_be_bytes(buf)
    }

    /// Reads a LEB128 varint; returns 0 if the stream is not healthy.
    ///
    /// An encoding longer than ten bytes, or one whose final byte overflows
    /// 64 bits, marks the stream [`Status::IoError`].
    pub fn read_var_u64(&mut self) -> u64 {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8();
            if self.status != Status::Ok {
                return 0;
            }
            if shift == 63 && byte > 1 {
                error!("varint overflows 64 bits");
                self.status = Status::IoError;
                return 0;
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return value;
            }
            shift += 7;
            if shift > 63 {
                error!("varint continuation exceeds 64 bits");
                self.status = Status::IoError;
                return 0;
            }
        }
    }
}

impl Default for StreamReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequential writer over a file with a sticky status.
#[derive(Debug)]
pub struct StreamWriter {
    inner: Option<BufWriter<File>>,
    status: Status,
}

impl StreamWriter {
    /// Creates a writer with no underlying file; status is [`Status::Closed`].
    pub fn new() -> Self {
        StreamWriter {
            inner: None,
            status: Status::Closed,
        }
    }

    /// Opens `path` for writing with the requested mode.
    pub fn create(path: &Path, mode: OpenMode) -> Self {
        let mut options = OpenOptions::new();
        options.write(true);
        match mode {
            OpenMode::Truncate => options.create(true).truncate(true),
            OpenMode::Append => options.create(true).append(true),
            OpenMode::CreateNew => options.create_new(true),
        };
        match options.open(path) {
            Ok(file) => StreamWriter {
                inner: Some(BufWriter::new(file)),
                status: Status::Ok,
            },
            Err(err) if err.kind() == ErrorKind::NotFound => StreamWriter {
                inner: None,
                status: Status::NotFound,
            },
            Err(err) => {
                error!("failed to open {} for write: {}", path.display(), err);
                StreamWriter {
                    inner: None,
                    status: Status::IoError,
                }
            }
        }
    }

    /// Returns true if the status is [`Status::Ok`].
    pub fn ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Returns the current sticky status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Returns true while an underlying file handle is held.
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Flushes and releases the file handle.
    ///
    /// Returns [`Status::Ok`] when every buffered byte reached the file, and
    /// otherwise the sticky failure status. After the call the writer reports
    /// [`Status::Closed`] (or the failure, if any).
    pub fn close(&mut self) -> Status {
        let result = match self.inner.as_mut() {
            Some(inner) if self.status == Status::Ok => match inner.flush() {
                Ok(()) => Status::Ok,
                Err(err) => {
                    error!("flush on close failed: {}", err);
                    self.status = Status::IoError;
                    Status::IoError
                }
            },
            _ => self.status,
        };
        self.inner = None;
        if self.status == Status::Ok {
            self.status = Status::Closed;
        }
        result
    }

    /// Writes a raw byte slice.
    pub fn write_all(&mut self, data: &[u8]) {
        if self.status != Status::Ok {
            return;
        }
        let Some(inner) = self.inner.as_mut() else {
            self.status = Status::Closed;
            return;
        };
        if let Err(err) = inner.write_all(data) {
            error!("write failed: {}", err);
            self.status = Status::IoError;
        }
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, value: u8) {
        self.write_all(&[value]);
    }

    /// Writes a big-endian `u16`.
    pub fn write_be_u16(&mut self, value: u16) {
        self.write_all(&value.to_be_bytes());
    }

    /// Writes a LEB128 varint.
    pub fn write_var_u64(&mut self, mut value: u64) {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.write_u8(byte);
            if value == 0 {
                return;
            }
        }
    }
}

impl Default for StreamWriter {
    fn default() -> Self {
        Self::new()
    }
}
