use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Phase of a zsync invocation an I/O failure originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ControlFileDownload,
    ControlFileRead,
    InputFileRead,
    RemoteFileDownload,
    OutputFileWrite,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::ControlFileDownload => "downloading control file",
            Phase::ControlFileRead => "reading control file",
            Phase::InputFileRead => "reading input file",
            Phase::RemoteFileDownload => "downloading remote file",
            Phase::OutputFileWrite => "writing output file",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ZsyncError {
    #[error("Invalid control file: {0}")]
    ControlFileFormat(String),

    #[error("HTTP error {status}: {reason}")]
    Http { status: u16, reason: String },

    #[error("Received range {first}-{last} is not aligned to the {block_size} byte block size (file length {length})")]
    RangeAlignment {
        first: u64,
        last: u64,
        block_size: usize,
        length: u64,
    },

    #[error("Checksum mismatch: expected SHA-1 {expected}, got {actual}\nThe partial download was kept at {part}.")]
    ChecksumMismatch {
        expected: String,
        actual: String,
        part: PathBuf,
    },

    #[error("I/O error while {phase}: {source}")]
    Io {
        phase: Phase,
        source: std::io::Error,
    },

    #[error("Transfer incomplete: {missing_blocks} blocks still missing after download ({missing_fmt})",
        missing_fmt = format_bytes(*missing_bytes))]
    IncompleteTransfer {
        missing_blocks: usize,
        missing_bytes: u64,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ZsyncError {
    pub fn http(status: u16, reason: impl Into<String>) -> Self {
        ZsyncError::Http {
            status,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ZsyncError>;

/// Attach the originating phase to a bare I/O result
pub trait IoResultExt<T> {
    fn in_phase(self, phase: Phase) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn in_phase(self, phase: Phase) -> Result<T> {
        self.map_err(|source| ZsyncError::Io { phase, source })
    }
}

/// Format bytes for human-readable display in error messages
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.2} TB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
