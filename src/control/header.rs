use crate::error::{IoResultExt, Phase, Result, ZsyncError};
use chrono::{DateTime, Utc};
use std::io::BufRead;

/// Hash-Lengths assumed when a control file does not carry the key
pub const DEFAULT_HASH_LENGTHS: (u8, u8, u8) = (1, 4, 16);

/// Parsed control file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: String,
    pub length: u64,
    pub block_size: usize,
    pub seq_matches: u8,
    pub rsum_bytes: u8,
    pub checksum_bytes: u8,
    pub sha1: [u8; 20],
    pub url: String,
    pub filename: String,
    pub mtime: Option<DateTime<Utc>>,
}

impl Header {
    /// Read `Key: Value` lines up to and including the blank separator line
    ///
    /// The reader is left positioned at the first byte of the block table.
    pub fn read<R: BufRead + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut version = None;
        let mut length = None;
        let mut block_size = None;
        let mut hash_lengths = DEFAULT_HASH_LENGTHS;
        let mut sha1 = None;
        let mut url: Option<String> = None;
        let mut filename = None;
        let mut mtime = None;

        let mut raw = Vec::new();
        loop {
            raw.clear();
            let n = reader
                .read_until(b'\n', &mut raw)
                .in_phase(Phase::ControlFileRead)?;
            if n == 0 {
                return Err(format_error("unexpected end of header"));
            }

            let line = std::str::from_utf8(&raw)
                .map_err(|_| format_error("header is not valid UTF-8"))?
                .trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }

            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| format_error(format!("malformed header line '{}'", line)))?;
            let value = value.trim();

            match key.trim().to_ascii_lowercase().as_str() {
                "zsync" => version = Some(value.to_string()),
                "length" => length = Some(parse_number::<u64>("Length", value)?),
                "blocksize" => {
                    let size = parse_number::<usize>("Blocksize", value)?;
                    if size == 0 {
                        return Err(format_error("Blocksize must be positive"));
                    }
                    block_size = Some(size);
                }
                "hash-lengths" => hash_lengths = parse_hash_lengths(value)?,
                "sha-1" => sha1 = Some(parse_sha1(value)?),
                "url" => url = Some(value.to_string()),
                "filename" => filename = Some(value.to_string()),
                "mtime" => {
                    let parsed = DateTime::parse_from_rfc2822(value)
                        .map_err(|e| format_error(format!("invalid MTime '{}': {}", value, e)))?;
                    mtime = Some(parsed.with_timezone(&Utc));
                }
                other => tracing::debug!("Ignoring control file header '{}'", other),
            }
        }

        let url = url.ok_or_else(|| missing("URL"))?;
        let filename = match filename {
            Some(name) if !name.is_empty() => name,
            _ => filename_from_url(&url)
                .ok_or_else(|| format_error("no Filename and none derivable from URL"))?,
        };
        let (seq_matches, rsum_bytes, checksum_bytes) = hash_lengths;
        let length = length.ok_or_else(|| missing("Length"))?;
        let block_size = block_size.ok_or_else(|| missing("Blocksize"))?;
        if usize::try_from(length.div_ceil(block_size as u64)).is_err() {
            return Err(format_error(format!(
                "Length {} with Blocksize {} has too many blocks",
                length, block_size
            )));
        }

        Ok(Self {
            version: version.ok_or_else(|| missing("zsync"))?,
            length,
            block_size,
            seq_matches,
            rsum_bytes,
            checksum_bytes,
            sha1: sha1.ok_or_else(|| missing("SHA-1"))?,
            url,
            filename,
            mtime,
        })
    }

    /// Number of blocks in the target, `ceil(length / block_size)`
    pub fn num_blocks(&self) -> usize {
        usize::try_from(self.length.div_ceil(self.block_size as u64)).unwrap_or(usize::MAX)
    }

    /// Size of the final block; 0 for an empty target
    pub fn last_block_size(&self) -> usize {
        if self.length == 0 {
            0
        } else {
            ((self.length - 1) % self.block_size as u64) as usize + 1
        }
    }

    /// Width of one block-table entry
    pub fn entry_size(&self) -> usize {
        self.rsum_bytes as usize + self.checksum_bytes as usize
    }

    pub fn sha1_hex(&self) -> String {
        hex::encode(self.sha1)
    }
}

fn format_error(msg: impl Into<String>) -> ZsyncError {
    ZsyncError::ControlFileFormat(msg.into())
}

fn missing(key: &str) -> ZsyncError {
    format_error(format!("missing required header '{}'", key))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| format_error(format!("invalid {} '{}'", key, value)))
}

fn parse_hash_lengths(value: &str) -> Result<(u8, u8, u8)> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let [seq, rsum, checksum] = parts.as_slice() else {
        return Err(format_error(format!("invalid Hash-Lengths '{}'", value)));
    };

    let seq_matches = parse_number::<u8>("Hash-Lengths", seq)?;
    let rsum_bytes = parse_number::<u8>("Hash-Lengths", rsum)?;
    let checksum_bytes = parse_number::<u8>("Hash-Lengths", checksum)?;

    if !(1..=2).contains(&seq_matches) {
        return Err(format_error(format!("seq-matches out of range: {}", seq_matches)));
    }
    if !(2..=4).contains(&rsum_bytes) {
        return Err(format_error(format!("rsum-bytes out of range: {}", rsum_bytes)));
    }
    if !(3..=16).contains(&checksum_bytes) {
        return Err(format_error(format!(
            "checksum-bytes out of range: {}",
            checksum_bytes
        )));
    }
    Ok((seq_matches, rsum_bytes, checksum_bytes))
}

fn parse_sha1(value: &str) -> Result<[u8; 20]> {
    let bytes = hex::decode(value).map_err(|e| format_error(format!("invalid SHA-1: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| format_error(format!("SHA-1 must be 40 hex digits, got '{}'", value)))
}

fn filename_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}
