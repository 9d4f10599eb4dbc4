use super::checksum::{new_block_hasher, MutableBlockSum};
use super::matcher::{BlockMatcher, BlockSink};
use crate::control::ControlFile;
use crate::error::Result;
use md4::Md4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Matched,
    Missed,
}

/// Matches one block at a time
///
/// After a miss the rsum is rolled forward by one byte instead of being
/// recomputed, so a scan costs O(1) per byte until a candidate shows up.
pub struct SingleBlockMatcher<'a> {
    control: &'a ControlFile,
    block_size: usize,
    state: State,
    current: MutableBlockSum,
    first_byte: u8,
    hasher: Md4,
}

impl<'a> SingleBlockMatcher<'a> {
    pub fn new(control: &'a ControlFile) -> Self {
        let header = control.header();
        Self {
            control,
            block_size: header.block_size,
            state: State::Init,
            current: MutableBlockSum::new(header.block_size, header.rsum_bytes, header.checksum_bytes),
            first_byte: 0,
            hasher: new_block_hasher(),
        }
    }
}

impl BlockMatcher for SingleBlockMatcher<'_> {
    fn block_span(&self) -> usize {
        self.block_size
    }

    fn match_window<S: BlockSink + ?Sized>(&mut self, sink: &mut S, window: &[u8]) -> Result<usize> {
        debug_assert_eq!(window.len(), self.block_size);

        match self.state {
            State::Init | State::Matched => self.current.rsum.init(window),
            State::Missed => self
                .current
                .rsum
                .update(self.first_byte, window[self.block_size - 1]),
        }

        if self.control.contains_rsum(self.current.rsum.value()) {
            self.current.checksum.compute(&mut self.hasher, window);
            let positions = sink.positions(&self.current.block_sum());
            if !positions.is_empty() {
                for position in positions {
                    sink.write_block(position, window, 0)?;
                }
                self.state = State::Matched;
                return Ok(self.block_size);
            }
        }

        self.first_byte = window[0];
        self.state = State::Missed;
        Ok(1)
    }
}
