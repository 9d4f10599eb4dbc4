use super::Rsum;
use digest::Digest;
use md4::Md4;
use sha1::Sha1;

/// Width of an untruncated MD4 digest
pub const CHECKSUM_SIZE: usize = 16;

/// Weak and strong checksum of one block, at the widths the control file uses
///
/// The rsum is already reduced to `rsum_bytes` low bytes and the strong
/// checksum is truncated to `checksum_bytes` with the remainder zeroed, so
/// plain equality compares exactly the configured widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockSum {
    pub rsum: u32,
    pub checksum: [u8; CHECKSUM_SIZE],
}

impl BlockSum {
    pub fn new(rsum: u32, checksum: [u8; CHECKSUM_SIZE]) -> Self {
        Self { rsum, checksum }
    }
}

/// New MD4 hasher for strong block checksums
pub fn new_block_hasher() -> Md4 {
    Md4::new()
}

/// New SHA-1 hasher for whole-file verification
pub fn new_file_hasher() -> Sha1 {
    Sha1::new()
}

/// MD4 of `block`, truncated to `checksum_bytes`
pub fn strong_checksum(hasher: &mut Md4, block: &[u8], checksum_bytes: usize) -> [u8; CHECKSUM_SIZE] {
    Digest::update(hasher, block);
    let mut checksum: [u8; CHECKSUM_SIZE] = hasher.finalize_reset().into();
    for byte in checksum.iter_mut().skip(checksum_bytes) {
        *byte = 0;
    }
    checksum
}

/// Lazily computed strong checksum
#[derive(Debug, Clone, Copy)]
pub struct StrongSum {
    bytes: [u8; CHECKSUM_SIZE],
    width: usize,
    set: bool,
}

impl StrongSum {
    pub fn new(checksum_bytes: usize) -> Self {
        Self {
            bytes: [0; CHECKSUM_SIZE],
            width: checksum_bytes.min(CHECKSUM_SIZE),
            set: false,
        }
    }

    pub fn is_set(&self) -> bool {
        self.set
    }

    pub fn unset(&mut self) {
        self.set = false;
    }

    /// Compute from block data
    pub fn compute(&mut self, hasher: &mut Md4, block: &[u8]) {
        self.bytes = strong_checksum(hasher, block, self.width);
        self.set = true;
    }

    /// Take over another checksum, including its set flag
    pub fn copy_from(&mut self, other: &StrongSum) {
        self.bytes = other.bytes;
        self.set = other.set;
    }

    pub fn bytes(&self) -> [u8; CHECKSUM_SIZE] {
        self.bytes
    }
}

/// Block sum under construction by a matcher: a rolling rsum plus a
/// strong checksum that is only computed when the rsum looks promising
#[derive(Debug, Clone, Copy)]
pub struct MutableBlockSum {
    pub rsum: Rsum,
    pub checksum: StrongSum,
}

impl MutableBlockSum {
    pub fn new(block_size: usize, rsum_bytes: u8, checksum_bytes: u8) -> Self {
        Self {
            rsum: Rsum::new(block_size, rsum_bytes),
            checksum: StrongSum::new(checksum_bytes as usize),
        }
    }

    /// Comparable form; only meaningful once the strong checksum is set
    pub fn block_sum(&self) -> BlockSum {
        debug_assert!(self.checksum.is_set());
        BlockSum::new(self.rsum.value(), self.checksum.bytes())
    }
}
