//! Streaming parser for `multipart/byteranges` response bodies
//!
//! Parts are yielded in wire order. Each part body is exposed as a reader
//! bounded to exactly the number of bytes its `Content-Range` announces;
//! whatever the caller leaves unread is skipped before the next part.

use super::range::{parse_content_range, ContentRange};
use std::io::{self, BufRead, Read};
use thiserror::Error;

const MAX_LINE: u64 = 8 * 1024;

#[derive(Error, Debug)]
pub enum MultipartError {
    #[error("{0}")]
    Malformed(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn malformed(msg: impl Into<String>) -> MultipartError {
    MultipartError::Malformed(msg.into())
}

/// Whether a `Content-Type` value names a multipart body
pub fn is_multipart(content_type: &str) -> bool {
    media_type(content_type)
        .split('/')
        .next()
        .is_some_and(|t| t.trim().eq_ignore_ascii_case("multipart"))
}

/// Boundary of a `multipart/byteranges` content type
///
/// Fails for any other multipart subtype and when the boundary parameter
/// is missing or empty.
pub fn boundary(content_type: &str) -> Result<String, MultipartError> {
    let media = media_type(content_type);
    let subtype = media.split_once('/').map(|(_, sub)| sub.trim()).unwrap_or("");
    if !subtype.eq_ignore_ascii_case("byteranges") {
        return Err(malformed(format!(
            "unsupported multipart subtype in '{}'",
            content_type
        )));
    }

    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| malformed(format!("missing boundary in '{}'", content_type)))
}

fn media_type(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or("").trim()
}

/// Pull parser over a multipart body
pub struct MultipartReader<R> {
    reader: R,
    delimiter: String,
    remaining: u64,
    started: bool,
    finished: bool,
}

impl<R: BufRead> MultipartReader<R> {
    pub fn new(reader: R, boundary: &str) -> Self {
        Self {
            reader,
            delimiter: format!("--{}", boundary),
            remaining: 0,
            started: false,
            finished: false,
        }
    }

    /// Advance to the next part
    ///
    /// Returns `None` after the closing delimiter.
    pub fn next_part(&mut self) -> Result<Option<(ContentRange, Part<'_, R>)>, MultipartError> {
        if self.finished {
            return Ok(None);
        }
        io::copy(&mut (&mut self.reader).take(self.remaining), &mut io::sink())?;
        self.remaining = 0;

        loop {
            let line = self
                .read_line()?
                .ok_or_else(|| malformed("unexpected end of multipart body"))?;
            if line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix(self.delimiter.as_str()) {
                if rest.starts_with("--") {
                    self.finished = true;
                    return Ok(None);
                }
                if rest.trim().is_empty() {
                    break;
                }
            }
            if self.started {
                return Err(malformed(format!("expected boundary, found '{}'", line)));
            }
            // Preamble before the first delimiter
        }
        self.started = true;

        let mut range = None;
        loop {
            let line = self
                .read_line()?
                .ok_or_else(|| malformed("unexpected end of part headers"))?;
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| malformed(format!("malformed part header '{}'", line)))?;
            if name.trim().eq_ignore_ascii_case("content-range") {
                let parsed = parse_content_range(value.trim())
                    .map_err(|e| malformed(e.to_string()))?;
                range = Some(parsed);
            }
        }

        let range = range.ok_or_else(|| malformed("part without Content-Range"))?;
        self.remaining = range.length();
        Ok(Some((
            range,
            Part {
                reader: &mut self.reader,
                remaining: &mut self.remaining,
            },
        )))
    }

    fn read_line(&mut self) -> Result<Option<String>, MultipartError> {
        let mut raw = Vec::new();
        let n = (&mut self.reader).take(MAX_LINE).read_until(b'\n', &mut raw)?;
        if n == 0 {
            return Ok(None);
        }
        if raw.last() != Some(&b'\n') && n as u64 == MAX_LINE {
            return Err(malformed("multipart line too long"));
        }
        let line = String::from_utf8_lossy(&raw);
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// Body of one part, bounded to its announced length
pub struct Part<'a, R> {
    reader: &'a mut R,
    remaining: &'a mut u64,
}

impl<R: Read> Read for Part<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if *self.remaining == 0 {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(*self.remaining).unwrap_or(usize::MAX));
        let n = self.reader.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("multipart body ended {} bytes early", self.remaining),
            ));
        }
        *self.remaining -= n as u64;
        Ok(n)
    }
}
