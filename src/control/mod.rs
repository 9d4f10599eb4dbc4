pub mod header;

pub use header::Header;

use crate::delta::{BlockSum, CHECKSUM_SIZE};
use crate::error::{IoResultExt, Phase, Result, ZsyncError};
use std::collections::HashSet;
use std::io::{self, BufRead, Read};

/// Parsed control file: header plus the per-block checksum table
#[derive(Debug, Clone)]
pub struct ControlFile {
    header: Header,
    block_sums: Vec<BlockSum>,
    rsums: HashSet<u32>,
    pairs: HashSet<u64>,
}

impl ControlFile {
    /// Parse a complete control file
    pub fn read<R: BufRead>(mut reader: R) -> Result<Self> {
        let header = Header::read(&mut reader)?;
        let block_sums = read_block_sums(&mut reader, &header)?;
        tracing::debug!(
            "Control file: {} bytes in {} blocks of {}, hash lengths {},{},{}",
            header.length,
            block_sums.len(),
            header.block_size,
            header.seq_matches,
            header.rsum_bytes,
            header.checksum_bytes
        );
        Self::new(header, block_sums)
    }

    /// Assemble from a header and its block sums, in block order
    pub fn new(header: Header, block_sums: Vec<BlockSum>) -> Result<Self> {
        if block_sums.len() != header.num_blocks() {
            return Err(ZsyncError::ControlFileFormat(format!(
                "expected {} block sums for {} bytes, got {}",
                header.num_blocks(),
                header.length,
                block_sums.len()
            )));
        }

        let rsums = block_sums.iter().map(|sum| sum.rsum).collect();
        let pairs = if header.seq_matches > 1 {
            block_sums
                .windows(2)
                .map(|pair| pair_key(pair[0].rsum, pair[1].rsum))
                .collect()
        } else {
            HashSet::new()
        };

        Ok(Self {
            header,
            block_sums,
            rsums,
            pairs,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn block_sums(&self) -> &[BlockSum] {
        &self.block_sums
    }

    pub fn num_blocks(&self) -> usize {
        self.block_sums.len()
    }

    /// Whether any target block has this reduced rsum
    pub fn contains_rsum(&self, rsum: u32) -> bool {
        self.rsums.contains(&rsum)
    }

    /// Whether two adjacent target blocks carry these reduced rsums
    pub fn contains_pair(&self, current: u32, next: u32) -> bool {
        self.pairs.contains(&pair_key(current, next))
    }
}

/// Key of two adjacent reduced rsums
pub fn pair_key(current: u32, next: u32) -> u64 {
    ((current as u64) << 32) | next as u64
}

fn read_block_sums<R: Read>(reader: &mut R, header: &Header) -> Result<Vec<BlockSum>> {
    let count = header.num_blocks();
    let rsum_bytes = header.rsum_bytes as usize;
    let checksum_bytes = header.checksum_bytes as usize;

    // Length is untrusted until the table bytes arrive
    let mut sums = Vec::with_capacity(count.min(64 * 1024));
    let mut entry = vec![0u8; header.entry_size()];
    for index in 0..count {
        if let Err(e) = reader.read_exact(&mut entry) {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Err(ZsyncError::ControlFileFormat(format!(
                    "block table truncated at block {} of {}",
                    index, count
                )));
            }
            return Err(e).in_phase(Phase::ControlFileRead);
        }

        let mut rsum = [0u8; 4];
        rsum[4 - rsum_bytes..].copy_from_slice(&entry[..rsum_bytes]);

        let mut checksum = [0u8; CHECKSUM_SIZE];
        checksum[..checksum_bytes].copy_from_slice(&entry[rsum_bytes..]);

        sums.push(BlockSum::new(u32::from_be_bytes(rsum), checksum));
    }
    Ok(sums)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn control_bytes(length: u64, hash_lengths: &str, table: &[u8]) -> Vec<u8> {
        let mut bytes = format!(
            "zsync: 0.6.2\nBlocksize: 4\nLength: {}\nHash-Lengths: {}\nSHA-1: {}\nURL: t\n\n",
            length,
            hash_lengths,
            "00".repeat(20)
        )
        .into_bytes();
        bytes.extend_from_slice(table);
        bytes
    }

    #[test]
    fn test_read_block_table() {
        // Two blocks, rsum 3 bytes, checksum 3 bytes
        let table = [0x01, 0x02, 0x03, 0xA1, 0xA2, 0xA3, 0x04, 0x05, 0x06, 0xB1, 0xB2, 0xB3];
        let control = ControlFile::read(Cursor::new(control_bytes(6, "2,3,3", &table))).unwrap();

        assert_eq!(control.num_blocks(), 2);
        let sums = control.block_sums();
        assert_eq!(sums[0].rsum, 0x010203);
        assert_eq!(&sums[0].checksum[..4], &[0xA1, 0xA2, 0xA3, 0]);
        assert_eq!(sums[1].rsum, 0x040506);

        assert!(control.contains_rsum(0x040506));
        assert!(!control.contains_rsum(0x060504));
        assert!(control.contains_pair(0x010203, 0x040506));
        assert!(!control.contains_pair(0x040506, 0x010203));
    }

    #[test]
    fn test_single_match_has_no_pairs() {
        let table = [0, 1, 9, 9, 9, 0, 2, 8, 8, 8];
        let control = ControlFile::read(Cursor::new(control_bytes(8, "1,2,3", &table))).unwrap();
        assert!(control.contains_rsum(1));
        assert!(!control.contains_pair(1, 2));
    }

    #[test]
    fn test_truncated_block_table() {
        let table = [0x01, 0x02, 0x03, 0xA1, 0xA2, 0xA3, 0x04];
        let err = ControlFile::read(Cursor::new(control_bytes(6, "2,3,3", &table))).unwrap_err();
        assert!(matches!(err, ZsyncError::ControlFileFormat(_)));
        assert!(err.to_string().contains("block 1 of 2"));
    }

    #[test]
    fn test_huge_length_without_table() {
        let bytes = format!(
            "zsync: 0.6.2\nBlocksize: 1\nLength: 4611686018427387904\nHash-Lengths: 1,2,3\nSHA-1: {}\nURL: t\n\n",
            "00".repeat(20)
        );
        let err = ControlFile::read(Cursor::new(bytes.into_bytes())).unwrap_err();
        assert!(matches!(err, ZsyncError::ControlFileFormat(_)));
    }

    #[test]
    fn test_new_checks_block_count() {
        let bytes = control_bytes(6, "2,3,3", &[0u8; 12]);
        let control = ControlFile::read(Cursor::new(bytes)).unwrap();
        let header = control.header().clone();

        let err = ControlFile::new(header, vec![BlockSum::new(0, [0; CHECKSUM_SIZE])]).unwrap_err();
        assert!(matches!(err, ZsyncError::ControlFileFormat(_)));
    }
}
