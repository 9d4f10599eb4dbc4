use super::checksum::{new_block_hasher, MutableBlockSum};
use super::matcher::{BlockMatcher, BlockSink};
use crate::control::ControlFile;
use crate::error::Result;
use md4::Md4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Missed,
    /// The previous window's second block matched nothing after a match
    MatchedFirst,
    /// The previous window matched two consecutive target blocks
    MatchedBoth,
}

/// Requires two consecutive blocks to match before accepting either
///
/// Used when the control file carries short rsums: the pair of rsums acts
/// as the weak filter, and each strong checksum is computed at most once per
/// window position.
pub struct DoubleBlockMatcher<'a> {
    control: &'a ControlFile,
    block_size: usize,
    num_blocks: usize,
    state: State,
    current: MutableBlockSum,
    next: MutableBlockSum,
    first_byte: u8,
    hasher: Md4,
}

impl<'a> DoubleBlockMatcher<'a> {
    pub fn new(control: &'a ControlFile) -> Self {
        let header = control.header();
        let sum = MutableBlockSum::new(header.block_size, header.rsum_bytes, header.checksum_bytes);
        Self {
            control,
            block_size: header.block_size,
            num_blocks: control.num_blocks(),
            state: State::Init,
            current: sum,
            next: sum,
            first_byte: 0,
            hasher: new_block_hasher(),
        }
    }

    fn try_match_both<S: BlockSink + ?Sized>(&mut self, sink: &S, window: &[u8]) -> Vec<usize> {
        let current = self.current.rsum.value();
        let next = self.next.rsum.value();
        if !self.control.contains_pair(current, next) {
            return Vec::new();
        }
        if !self.current.checksum.is_set() {
            self.current
                .checksum
                .compute(&mut self.hasher, &window[..self.block_size]);
        }
        self.try_match_next(sink, window)
    }

    fn try_match_next<S: BlockSink + ?Sized>(&mut self, sink: &S, window: &[u8]) -> Vec<usize> {
        let candidates = sink.positions(&self.current.block_sum());
        let mut positions = Vec::with_capacity(candidates.len());
        for position in candidates {
            if self.is_next_match(position, window) {
                positions.push(position);
            }
        }
        positions
    }

    fn is_next_match(&mut self, position: usize, window: &[u8]) -> bool {
        let next_index = position + 1;
        if next_index == self.num_blocks {
            return true;
        }

        let expected = &self.control.block_sums()[next_index];
        if expected.rsum != self.next.rsum.value() {
            return false;
        }
        if !self.next.checksum.is_set() {
            self.next
                .checksum
                .compute(&mut self.hasher, &window[self.block_size..]);
        }
        expected.checksum == self.next.checksum.bytes()
    }
}

impl BlockMatcher for DoubleBlockMatcher<'_> {
    fn block_span(&self) -> usize {
        2 * self.block_size
    }

    fn match_window<S: BlockSink + ?Sized>(&mut self, sink: &mut S, window: &[u8]) -> Result<usize> {
        let bs = self.block_size;
        debug_assert_eq!(window.len(), 2 * bs);

        let positions = {
            let sink = &*sink;
            match self.state {
                State::Init => {
                    self.current.rsum.init(&window[..bs]);
                    self.next.rsum.init(&window[bs..]);
                    self.current.checksum.unset();
                    self.next.checksum.unset();
                    self.try_match_both(sink, window)
                }
                State::Missed => {
                    let middle = window[bs - 1];
                    self.current.rsum.update(self.first_byte, middle);
                    self.next.rsum.update(middle, window[2 * bs - 1]);
                    self.current.checksum.unset();
                    self.next.checksum.unset();
                    self.try_match_both(sink, window)
                }
                State::MatchedFirst => {
                    let previous_next = self.next;
                    self.current.rsum.init_from(&previous_next.rsum);
                    self.next.rsum.init(&window[bs..]);
                    self.next.checksum.unset();
                    if previous_next.checksum.is_set() {
                        self.current.checksum.copy_from(&previous_next.checksum);
                        self.try_match_next(sink, window)
                    } else {
                        self.current.checksum.unset();
                        self.try_match_both(sink, window)
                    }
                }
                State::MatchedBoth => {
                    let previous_next = self.next;
                    self.current.rsum.init_from(&previous_next.rsum);
                    if previous_next.checksum.is_set() {
                        self.current.checksum.copy_from(&previous_next.checksum);
                    } else {
                        // Accepted as the last target block without a check
                        self.current
                            .checksum
                            .compute(&mut self.hasher, &window[..bs]);
                    }
                    self.next.rsum.init(&window[bs..]);
                    self.next.checksum.unset();
                    self.try_match_next(sink, window)
                }
            }
        };

        if positions.is_empty() {
            if self.state == State::MatchedBoth {
                // The current block was written by the previous match
                self.state = State::MatchedFirst;
                return Ok(bs);
            }
            self.first_byte = window[0];
            self.state = State::Missed;
            return Ok(1);
        }

        for position in positions {
            sink.write_block(position, window, 0)?;
            if position + 1 < self.num_blocks {
                sink.write_block(position + 1, window, bs)?;
            }
        }
        self.state = State::MatchedBoth;
        Ok(bs)
    }
}
