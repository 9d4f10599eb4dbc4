pub mod credentials;
pub mod http;
pub mod multipart;
pub mod range;

pub use credentials::Credentials;
pub use http::HttpClient;
pub use range::{parse_content_range, ContentRange, ContentRangeError};

use crate::error::Result;
use std::io::{self, Read};
use url::Url;

/// Destination for byte ranges of the remote file
///
/// `body` yields exactly `range.length()` bytes unless the connection
/// breaks, in which case reads fail.
pub trait RangeReceiver {
    fn receive(&mut self, range: ContentRange, body: &mut dyn Read) -> Result<()>;
}

/// Callbacks over the lifetime of one HTTP transfer
///
/// `transferred` counts payload bytes only: for range requests that is the
/// range data, without multipart framing.
pub trait TransferListener {
    fn initiating(&mut self, _url: &Url) {}

    fn started(&mut self, _url: &Url, _length: Option<u64>) {}

    fn transferred(&mut self, _bytes: u64) {}

    fn closed(&mut self) {}
}

impl<T: TransferListener + ?Sized> TransferListener for &mut T {
    fn initiating(&mut self, url: &Url) {
        (**self).initiating(url)
    }

    fn started(&mut self, url: &Url, length: Option<u64>) {
        (**self).started(url, length)
    }

    fn transferred(&mut self, bytes: u64) {
        (**self).transferred(bytes)
    }

    fn closed(&mut self) {
        (**self).closed()
    }
}

/// Listener that ignores every callback
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl TransferListener for NoopListener {}

/// Response body that reports every read to its listener and signals
/// `closed` when dropped
pub struct TransferReader<R, L: TransferListener> {
    inner: R,
    listener: L,
}

impl<R: Read, L: TransferListener> TransferReader<R, L> {
    pub fn new(inner: R, listener: L) -> Self {
        Self { inner, listener }
    }
}

impl<R: Read, L: TransferListener> Read for TransferReader<R, L> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.listener.transferred(n as u64);
        }
        Ok(n)
    }
}

impl<R, L: TransferListener> Drop for TransferReader<R, L> {
    fn drop(&mut self) {
        self.listener.closed();
    }
}
