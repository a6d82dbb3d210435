//! Length-prefixed framing over the blocking stdin/stdout descriptors.
//!
//! Wire format: a 16-bit big-endian length `L`, followed by `L` payload
//! bytes whose first byte is the opcode and whose remainder (up to 2047
//! bytes) is the opcode's body. `L` itself never exceeds 2048; a frame
//! that claims a larger `L` is read in full but only its first 2048
//! bytes are kept, with the rest drained and discarded so the channel
//! resynchronises on the next frame.

use std::io;
use std::os::unix::io::RawFd;

/// Cap on the payload (opcode byte + body) that is actually retained.
pub const MAX_PAYLOAD: usize = 2048;

/// Outcome of a single [`FrameIo::read_frame`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The peer closed its end of the pipe before (or while) sending a
    /// frame.
    Eof,
    /// A frame header was read successfully. `declared_len` is the raw
    /// wire length field; `payload` holds `min(declared_len, 2048)`
    /// bytes, whose first byte is the opcode. A frame is dispatchable
    /// only when `1 <= declared_len <= 2048`; anything else (including
    /// `declared_len == 0`, a header-only frame) is legal but inert.
    Frame { declared_len: usize, payload: Vec<u8> },
}

impl ReadOutcome {
    /// True when this frame's length falls outside the dispatchable
    /// range `(0, 2048]` and must be ignored by the supervision loop.
    pub fn is_junk(&self) -> bool {
        match self {
            ReadOutcome::Eof => false,
            ReadOutcome::Frame { declared_len, .. } => {
                *declared_len == 0 || *declared_len > MAX_PAYLOAD
            }
        }
    }

    /// Opcode and body of a dispatchable frame, if this is one.
    pub fn opcode_and_body(&self) -> Option<(u8, &[u8])> {
        match self {
            ReadOutcome::Frame { payload, .. } if !self.is_junk() && !payload.is_empty() => {
                Some((payload[0], &payload[1..]))
            }
            _ => None,
        }
    }
}

/// Seam the loop reads frames from and writes frames to. The real
/// implementation, [`StdioFrameIo`], operates on the two blocking
/// descriptors the VM connects; tests substitute
/// [`crate::testing::MemFrameIo`].
pub trait FrameIo {
    fn read_frame(&mut self) -> io::Result<ReadOutcome>;
    fn write_frame(&mut self, op: u8, body: &[u8]) -> io::Result<()>;
}

/// Framed channel over two raw, blocking file descriptors (normally 0
/// and 1, the pipes the VM connects at spawn time).
pub struct StdioFrameIo {
    read_fd: RawFd,
    write_fd: RawFd,
}

impl StdioFrameIo {
    /// Channel over the process's own stdin/stdout.
    pub fn stdio() -> Self {
        Self {
            read_fd: libc::STDIN_FILENO,
            write_fd: libc::STDOUT_FILENO,
        }
    }

    /// Channel over an arbitrary pair of descriptors, used by tests that
    /// want real blocking pipe semantics instead of an in-memory fake.
    pub fn new(read_fd: RawFd, write_fd: RawFd) -> Self {
        Self { read_fd, write_fd }
    }
}

impl FrameIo for StdioFrameIo {
    fn read_frame(&mut self) -> io::Result<ReadOutcome> {
        read_frame(self.read_fd)
    }

    fn write_frame(&mut self, op: u8, body: &[u8]) -> io::Result<()> {
        write_frame(self.write_fd, op, body)
    }
}

enum FillResult {
    Complete,
    Eof,
    Err(io::Error),
}

/// Reads exactly `buf.len()` bytes, tolerating partial reads. Mirrors
/// the original `read_fill`: an EOF or error at any point during the
/// fill is reported for the whole call, even if earlier bytes had
/// already arrived — a message can only be consumed as a unit.
fn read_fill(fd: RawFd, buf: &mut [u8]) -> FillResult {
    let mut got = 0usize;
    while got < buf.len() {
        match raw_read(fd, &mut buf[got..]) {
            Ok(0) => return FillResult::Eof,
            Ok(n) => got += n,
            Err(e) => return FillResult::Err(e),
        }
    }
    FillResult::Complete
}

pub fn read_frame(fd: RawFd) -> io::Result<ReadOutcome> {
    let mut hdr = [0u8; 2];
    match read_fill(fd, &mut hdr) {
        FillResult::Eof => return Ok(ReadOutcome::Eof),
        FillResult::Err(e) => return Err(e),
        FillResult::Complete => {}
    }

    let declared_len = u16::from_be_bytes(hdr) as usize;
    if declared_len == 0 {
        return Ok(ReadOutcome::Frame {
            declared_len: 0,
            payload: Vec::new(),
        });
    }

    let capped = declared_len.min(MAX_PAYLOAD);
    let mut payload = vec![0u8; capped];
    match read_fill(fd, &mut payload) {
        FillResult::Eof => return Ok(ReadOutcome::Eof),
        FillResult::Err(e) => return Err(e),
        FillResult::Complete => {}
    }

    if declared_len > MAX_PAYLOAD {
        let mut remaining = declared_len - MAX_PAYLOAD;
        let mut scratch = [0u8; 256];
        while remaining > 0 {
            let chunk = remaining.min(scratch.len());
            match read_fill(fd, &mut scratch[..chunk]) {
                FillResult::Eof => return Ok(ReadOutcome::Eof),
                FillResult::Err(e) => return Err(e),
                FillResult::Complete => {}
            }
            remaining -= chunk;
        }
    }

    Ok(ReadOutcome::Frame {
        declared_len,
        payload,
    })
}

/// Writes one length-prefixed frame. A payload (opcode + body) of
/// length 0 or greater than 2048 is silently skipped and reported as a
/// success, matching the upstream `write_message`'s "as if written"
/// contract. A short underlying `write(2)` is surfaced as an error
/// rather than retried, since a partial frame on the wire cannot be
/// repaired after the fact.
pub fn write_frame(fd: RawFd, op: u8, body: &[u8]) -> io::Result<()> {
    let total = 1 + body.len();
    if total == 0 || total > MAX_PAYLOAD {
        return Ok(());
    }

    let mut buf = Vec::with_capacity(2 + total);
    buf.extend_from_slice(&(total as u16).to_be_bytes());
    buf.push(op);
    buf.extend_from_slice(body);

    let n = raw_write(fd, &buf)?;
    if n != buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            "short write on frame channel",
        ));
    }
    Ok(())
}

fn raw_read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn raw_write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}
