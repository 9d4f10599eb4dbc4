use std::io::{self, Read, Write};

/// Read-only view of a byte window that block matchers and the output
/// writer consume
pub trait ReadableBuffer {
    /// Window contents
    fn as_slice(&self) -> &[u8];

    /// Window size
    fn length(&self) -> usize {
        self.as_slice().len()
    }

    /// Byte at `index`, or `None` outside the window
    fn get(&self, index: usize) -> Option<u8> {
        self.as_slice().get(index).copied()
    }

    /// Write `len` bytes starting at `offset` to `sink`
    ///
    /// Short writes are retried until everything is consumed or the sink
    /// fails. The window itself never moves.
    fn write_to<W: Write + ?Sized>(&self, sink: &mut W, offset: usize, len: usize) -> io::Result<()> {
        let window = self.as_slice();
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= window.len())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "range {}..{} outside of {} byte window",
                        offset,
                        offset.saturating_add(len),
                        window.len()
                    ),
                )
            })?;

        let mut pending = &window[offset..end];
        while !pending.is_empty() {
            match sink.write(pending) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "sink accepted no bytes",
                    ))
                }
                Ok(n) => pending = &pending[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl ReadableBuffer for [u8] {
    fn as_slice(&self) -> &[u8] {
        self
    }
}

impl ReadableBuffer for Vec<u8> {
    fn as_slice(&self) -> &[u8] {
        self
    }
}

/// Sliding window over a forward-only byte source
///
/// The window lives inside a larger backing buffer. Advancing only moves
/// the window start; when the window would run past the bytes read so far,
/// the live bytes are moved to the front and the buffer is refilled.
#[derive(Debug)]
pub struct RollingBuffer<R> {
    source: R,
    buf: Box<[u8]>,
    base: usize,
    limit: usize,
    window: usize,
    eof: bool,
    exhausted: bool,
    total_read: u64,
}

impl<R: Read> RollingBuffer<R> {
    /// Create a window of `window` bytes backed by `buffer_size` bytes
    ///
    /// `buffer_size` must be at least twice the window. Fails with
    /// `UnexpectedEof` if the source cannot fill the first window.
    pub fn new(source: R, window: usize, buffer_size: usize) -> io::Result<Self> {
        if window == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "window size must be positive",
            ));
        }
        if buffer_size < window.saturating_mul(2) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "buffer size {} must be at least twice the window size {}",
                    buffer_size, window
                ),
            ));
        }

        let mut rolling = Self {
            source,
            buf: vec![0u8; buffer_size].into_boxed_slice(),
            base: 0,
            limit: 0,
            window,
            eof: false,
            exhausted: false,
            total_read: 0,
        };

        rolling.fill()?;
        if rolling.limit < window {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "source has {} bytes, fewer than the {} byte window",
                    rolling.limit, window
                ),
            ));
        }
        Ok(rolling)
    }

    /// Slide the window forward by `n` bytes
    ///
    /// Returns `false` once the source cannot fill a whole window at the new
    /// position; the buffer stays exhausted from then on.
    pub fn advance(&mut self, n: usize) -> io::Result<bool> {
        if n == 0 || n > self.window {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot advance by {} (window is {})", n, self.window),
            ));
        }
        if self.exhausted {
            return Ok(false);
        }

        self.base += n;
        if self.base + self.window > self.limit {
            self.compact();
            self.fill()?;
            if self.limit - self.base < self.window {
                self.exhausted = true;
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Bytes pulled from the source so far
    pub fn total_read(&self) -> u64 {
        self.total_read
    }

    /// Give back the source
    pub fn into_inner(self) -> R {
        self.source
    }

    fn compact(&mut self) {
        let live = self.limit.saturating_sub(self.base);
        if live > 0 {
            self.buf.copy_within(self.base..self.limit, 0);
        }
        self.base = 0;
        self.limit = live;
    }

    fn fill(&mut self) -> io::Result<()> {
        while !self.eof && self.limit < self.buf.len() {
            match self.source.read(&mut self.buf[self.limit..]) {
                Ok(0) => self.eof = true,
                Ok(n) => {
                    self.limit += n;
                    self.total_read += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl<R> ReadableBuffer for RollingBuffer<R> {
    fn as_slice(&self) -> &[u8] {
        &self.buf[self.base..self.base + self.window]
    }

    fn length(&self) -> usize {
        self.window
    }
}
