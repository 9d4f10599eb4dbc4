/// rsync-style rolling checksum ("rsum")
///
/// This is the weak checksum zsync uses to find candidate blocks.
/// It can be rolled forward one byte at a time as the window slides
/// through a seed file.
///
/// The checksum is made of two 16-bit sums:
/// - A: sum of all bytes
/// - B: sum of (len-i) * byte[i] for each byte
///
/// Both sums wrap modulo 2^16. The combined value is (A << 16) | B,
/// reduced to the configured number of low bytes before comparison.
#[derive(Debug, Clone, Copy)]
pub struct Rsum {
    a: u16,
    b: u16,
    block_size: usize,
    mask: u32,
}

impl Rsum {
    /// Create a rolling checksum over blocks of `block_size` bytes,
    /// compared on its `rsum_bytes` low bytes
    pub fn new(block_size: usize, rsum_bytes: u8) -> Self {
        Self {
            a: 0,
            b: 0,
            block_size,
            mask: rsum_mask(rsum_bytes),
        }
    }

    /// Full-width checksum of a block (non-rolling)
    pub fn hash(data: &[u8]) -> u32 {
        let (a, b) = sums(data);
        combine(a, b)
    }

    /// Initialize from scratch over a full block
    pub fn init(&mut self, block: &[u8]) {
        debug_assert_eq!(block.len(), self.block_size);
        let (a, b) = sums(block);
        self.a = a;
        self.b = b;
    }

    /// Take over the sums of another checksum over the same block size
    pub fn init_from(&mut self, other: &Rsum) {
        self.a = other.a;
        self.b = other.b;
    }

    /// Roll the checksum: remove `old_byte`, append `new_byte`
    ///
    /// - A_new = A_old - old + new
    /// - B_new = B_old - len * old + A_new
    pub fn update(&mut self, old_byte: u8, new_byte: u8) {
        let old = old_byte as u16;
        let new = new_byte as u16;
        // len * old mod 2^16, without overflowing for large blocks
        let weighted = (self.block_size as u32).wrapping_mul(old as u32) as u16;

        self.a = self.a.wrapping_sub(old).wrapping_add(new);
        self.b = self.b.wrapping_sub(weighted).wrapping_add(self.a);
    }

    /// Full 32-bit checksum
    pub fn digest(&self) -> u32 {
        combine(self.a, self.b)
    }

    /// Checksum reduced to the configured width, as stored in the control file
    pub fn value(&self) -> u32 {
        self.digest() & self.mask
    }
}

/// Mask that keeps the `rsum_bytes` low bytes of a combined checksum
pub fn rsum_mask(rsum_bytes: u8) -> u32 {
    match rsum_bytes {
        0 => 0,
        1..=3 => (1u32 << (8 * rsum_bytes as u32)) - 1,
        _ => u32::MAX,
    }
}

fn sums(data: &[u8]) -> (u16, u16) {
    let mut a: u16 = 0;
    let mut b: u16 = 0;
    let mut weight = data.len() as u32;

    for &byte in data {
        let value = byte as u16;
        a = a.wrapping_add(value);
        b = b.wrapping_add(weight.wrapping_mul(value as u32) as u16);
        weight -= 1;
    }

    (a, b)
}

fn combine(a: u16, b: u16) -> u32 {
    ((a as u32) << 16) | b as u32
}
