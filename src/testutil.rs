//! Builders for control files over in-memory targets

use crate::control::{ControlFile, Header};
use crate::delta::checksum::{new_block_hasher, new_file_hasher};
use crate::delta::rolling::rsum_mask;
use crate::delta::{strong_checksum, BlockSum, Rsum};
use digest::Digest;

pub fn header(target: &[u8], block_size: usize, hash_lengths: (u8, u8, u8)) -> Header {
    let mut sha1 = new_file_hasher();
    sha1.update(target);

    Header {
        version: "0.6.2".to_string(),
        length: target.len() as u64,
        block_size,
        seq_matches: hash_lengths.0,
        rsum_bytes: hash_lengths.1,
        checksum_bytes: hash_lengths.2,
        sha1: sha1.finalize().into(),
        url: "target".to_string(),
        filename: "target".to_string(),
        mtime: None,
    }
}

/// Block sums with the last block zero-padded to `block_size`
pub fn block_sums(target: &[u8], block_size: usize, hash_lengths: (u8, u8, u8)) -> Vec<BlockSum> {
    let mut hasher = new_block_hasher();
    target
        .chunks(block_size)
        .map(|chunk| {
            let mut block = chunk.to_vec();
            block.resize(block_size, 0);
            BlockSum::new(
                Rsum::hash(&block) & rsum_mask(hash_lengths.1),
                strong_checksum(&mut hasher, &block, hash_lengths.2 as usize),
            )
        })
        .collect()
}

pub fn control_file(target: &[u8], block_size: usize, hash_lengths: (u8, u8, u8)) -> ControlFile {
    ControlFile::new(
        header(target, block_size, hash_lengths),
        block_sums(target, block_size, hash_lengths),
    )
    .unwrap()
}

/// Deterministic pseudo-random bytes
pub fn pseudo_random(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}
