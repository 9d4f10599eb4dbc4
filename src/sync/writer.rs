use super::events::{EventDispatcher, ZsyncEvent};
use crate::control::ControlFile;
use crate::delta::checksum::new_file_hasher;
use crate::delta::{BlockSink, BlockSum, ReadableBuffer};
use crate::error::{format_bytes, IoResultExt, Phase, Result, ZsyncError};
use crate::fs_util;
use crate::transport::{ContentRange, RangeReceiver};
use chrono::{DateTime, Utc};
use digest::Digest;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Target blocks grouped by the low bits of their rsum
///
/// Bucket lists keep block indexes in increasing order.
#[derive(Debug)]
struct BlockIndex {
    buckets: Vec<Vec<usize>>,
    mask: u32,
}

impl BlockIndex {
    fn new(sums: &[BlockSum]) -> Self {
        let count = sums.len().max(1).next_power_of_two().min(1 << 24);
        let mask = (count - 1) as u32;
        let mut buckets = vec![Vec::new(); count];
        for (index, sum) in sums.iter().enumerate() {
            buckets[(sum.rsum & mask) as usize].push(index);
        }
        Self { buckets, mask }
    }

    fn positions(&self, sums: &[BlockSum], sum: &BlockSum) -> Vec<usize> {
        self.buckets[(sum.rsum & self.mask) as usize]
            .iter()
            .copied()
            .filter(|&index| sums[index] == *sum)
            .collect()
    }
}

/// Sparse output file under assembly
///
/// Data goes to `<path>.part`, pre-sized to the target length. Each block is
/// written once, either from a local input or from a remote range; `close`
/// verifies the SHA-1 and moves the file into place.
pub struct OutputFileWriter {
    path: PathBuf,
    part_path: PathBuf,
    file: File,
    length: u64,
    block_size: usize,
    last_block_size: usize,
    sha1: [u8; 20],
    mtime: Option<DateTime<Utc>>,
    block_sums: Vec<BlockSum>,
    index: BlockIndex,
    completed: Vec<bool>,
    blocks_remaining: usize,
    events: EventDispatcher,
}

impl OutputFileWriter {
    pub fn new(path: &Path, control: &ControlFile, events: EventDispatcher) -> Result<Self> {
        let header = control.header();
        let part_path = fs_util::part_path(path);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).in_phase(Phase::OutputFileWrite)?;
        }
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&part_path)
            .in_phase(Phase::OutputFileWrite)?;
        file.set_len(header.length).in_phase(Phase::OutputFileWrite)?;

        tracing::debug!(
            "Assembling {} ({}) in {}",
            path.display(),
            format_bytes(header.length),
            part_path.display()
        );
        events.emit(ZsyncEvent::OutputFileWriteStarted {
            path: path.to_path_buf(),
            length: header.length,
        });

        let block_sums = control.block_sums().to_vec();
        let num_blocks = block_sums.len();
        Ok(Self {
            path: path.to_path_buf(),
            part_path,
            file,
            length: header.length,
            block_size: header.block_size,
            last_block_size: header.last_block_size(),
            sha1: header.sha1,
            mtime: header.mtime,
            index: BlockIndex::new(&block_sums),
            block_sums,
            completed: vec![false; num_blocks],
            blocks_remaining: num_blocks,
            events,
        })
    }

    /// Write block `index` from `buffer[offset..]`
    ///
    /// Returns `false` without writing if the block is already complete.
    pub fn write_block<B: ReadableBuffer + ?Sized>(
        &mut self,
        index: usize,
        buffer: &B,
        offset: usize,
    ) -> Result<bool> {
        if self.completed[index] {
            return Ok(false);
        }

        let len = self.block_len(index);
        self.file
            .seek(SeekFrom::Start(self.block_offset(index)))
            .in_phase(Phase::OutputFileWrite)?;
        buffer
            .write_to(&mut self.file, offset, len)
            .in_phase(Phase::OutputFileWrite)?;

        tracing::trace!("Block {} matched locally", index);
        self.mark_complete(index);
        self.events.emit(ZsyncEvent::BytesWritten { bytes: len as u64 });
        Ok(true)
    }

    /// Target blocks whose sums equal `sum`, in increasing order
    pub fn positions(&self, sum: &BlockSum) -> Vec<usize> {
        self.index.positions(&self.block_sums, sum)
    }

    pub fn block_sum(&self, index: usize) -> &BlockSum {
        &self.block_sums[index]
    }

    pub fn num_blocks(&self) -> usize {
        self.block_sums.len()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn blocks_remaining(&self) -> usize {
        self.blocks_remaining
    }

    pub fn is_complete(&self) -> bool {
        self.blocks_remaining == 0
    }

    pub fn is_block_complete(&self, index: usize) -> bool {
        self.completed[index]
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// Byte ranges of incomplete blocks, adjacent blocks coalesced
    pub fn missing_ranges(&self) -> Vec<ContentRange> {
        let mut ranges = Vec::new();
        let mut run_start = None;

        for index in 0..=self.completed.len() {
            let missing = index < self.completed.len() && !self.completed[index];
            match (missing, run_start) {
                (true, None) => run_start = Some(index),
                (false, Some(start)) => {
                    let first = self.block_offset(start);
                    let last = (self.block_offset(index)).min(self.length) - 1;
                    ranges.push(ContentRange::new(first, last));
                    run_start = None;
                }
                _ => {}
            }
        }
        ranges
    }

    /// Bytes still missing
    pub fn missing_bytes(&self) -> u64 {
        self.missing_ranges().iter().map(ContentRange::length).sum()
    }

    /// Write a block-aligned range of remote data
    ///
    /// Blocks that are already complete are read past, not rewritten.
    pub fn receive(&mut self, range: ContentRange, body: &mut dyn Read) -> Result<()> {
        let block_size = self.block_size as u64;
        let end = range.last + 1;
        if range.first % block_size != 0
            || (end % block_size != 0 && end != self.length)
            || range.last >= self.length
        {
            return Err(ZsyncError::RangeAlignment {
                first: range.first,
                last: range.last,
                block_size: self.block_size,
                length: self.length,
            });
        }
        self.events.emit(ZsyncEvent::RemoteFileRangeReceived { range });

        let first_block = (range.first / block_size) as usize;
        let last_block = (range.last / block_size) as usize;
        let mut block = vec![0u8; self.block_size];
        let mut written = 0u64;

        for index in first_block..=last_block {
            let len = self.block_len(index);
            read_block(body, &mut block[..len], range)?;
            if self.completed[index] {
                continue;
            }

            self.file
                .seek(SeekFrom::Start(self.block_offset(index)))
                .in_phase(Phase::OutputFileWrite)?;
            self.file
                .write_all(&block[..len])
                .in_phase(Phase::OutputFileWrite)?;
            self.mark_complete(index);
            written += len as u64;
        }

        tracing::trace!("Range {} written, {} blocks remaining", range, self.blocks_remaining);
        if written > 0 {
            self.events.emit(ZsyncEvent::BytesWritten { bytes: written });
        }
        Ok(())
    }

    /// Verify the assembled file and move it to its final path
    ///
    /// On a checksum mismatch the `.part` file is kept and the destination
    /// is left untouched.
    pub fn close(mut self) -> Result<PathBuf> {
        if !self.is_complete() {
            return Err(ZsyncError::IncompleteTransfer {
                missing_blocks: self.blocks_remaining,
                missing_bytes: self.missing_bytes(),
            });
        }

        self.file.flush().in_phase(Phase::OutputFileWrite)?;
        self.file.sync_all().in_phase(Phase::OutputFileWrite)?;
        self.file
            .seek(SeekFrom::Start(0))
            .in_phase(Phase::OutputFileWrite)?;

        let mut hasher = new_file_hasher();
        let mut reader = BufReader::with_capacity(256 * 1024, &self.file);
        io::copy(&mut reader, &mut hasher).in_phase(Phase::OutputFileWrite)?;
        let actual: [u8; 20] = hasher.finalize().into();
        drop(reader);
        drop(self.file);

        if actual != self.sha1 {
            tracing::warn!("SHA-1 mismatch, keeping {}", self.part_path.display());
            return Err(ZsyncError::ChecksumMismatch {
                expected: hex::encode(self.sha1),
                actual: hex::encode(actual),
                part: self.part_path,
            });
        }

        fs_util::promote(&self.part_path, &self.path).in_phase(Phase::OutputFileWrite)?;
        if let Some(mtime) = self.mtime {
            if let Err(e) = fs_util::set_mtime(&self.path, mtime) {
                tracing::warn!("Failed to set mtime on {}: {}", self.path.display(), e);
            }
        }

        tracing::debug!("Verified and moved into place: {}", self.path.display());
        self.events.emit(ZsyncEvent::OutputFileWriteComplete {
            path: self.path.clone(),
        });
        Ok(self.path)
    }

    fn block_offset(&self, index: usize) -> u64 {
        index as u64 * self.block_size as u64
    }

    fn block_len(&self, index: usize) -> usize {
        if index + 1 == self.block_sums.len() {
            self.last_block_size
        } else {
            self.block_size
        }
    }

    fn mark_complete(&mut self, index: usize) {
        if !self.completed[index] {
            self.completed[index] = true;
            self.blocks_remaining -= 1;
        }
    }
}

impl BlockSink for OutputFileWriter {
    fn positions(&self, sum: &BlockSum) -> Vec<usize> {
        OutputFileWriter::positions(self, sum)
    }

    fn write_block(&mut self, index: usize, window: &[u8], offset: usize) -> Result<bool> {
        OutputFileWriter::write_block(self, index, window, offset)
    }

    fn is_complete(&self) -> bool {
        OutputFileWriter::is_complete(self)
    }
}

impl RangeReceiver for OutputFileWriter {
    fn receive(&mut self, range: ContentRange, body: &mut dyn Read) -> Result<()> {
        OutputFileWriter::receive(self, range, body)
    }
}

fn read_block(body: &mut dyn Read, buf: &mut [u8], range: ContentRange) -> Result<()> {
    body.read_exact(buf).map_err(|e| {
        let source = if e.kind() == io::ErrorKind::UnexpectedEof {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("body of {} ended early", range),
            )
        } else {
            e
        };
        ZsyncError::Io {
            phase: Phase::RemoteFileDownload,
            source,
        }
    })
}
