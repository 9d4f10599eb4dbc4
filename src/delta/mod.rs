pub mod buffer;
pub mod checksum;
pub mod double;
pub mod matcher;
pub mod rolling;
pub mod single;

pub use buffer::{ReadableBuffer, RollingBuffer};
pub use checksum::{strong_checksum, BlockSum, MutableBlockSum, StrongSum, CHECKSUM_SIZE};
pub use matcher::{BlockMatcher, BlockSink, Matcher};
pub use rolling::Rsum;

/// Backing buffer size for a matcher window: a multiple of the window,
/// never below 64KB
pub fn buffer_size(window: usize) -> usize {
    let min: usize = 64 * 1024;
    let windows = min.div_ceil(window).max(2);
    window.saturating_mul(windows)
}
