use super::buffer::{ReadableBuffer, RollingBuffer};
use super::double::DoubleBlockMatcher;
use super::single::SingleBlockMatcher;
use super::BlockSum;
use crate::control::ControlFile;
use crate::error::{IoResultExt, Phase, Result};
use std::io::{self, Read};

/// Where matched blocks go
pub trait BlockSink {
    /// Target blocks whose sums equal `sum`, in increasing order
    fn positions(&self, sum: &BlockSum) -> Vec<usize>;

    /// Write target block `index` from `window[offset..]`; `false` if it
    /// was already complete
    fn write_block(&mut self, index: usize, window: &[u8], offset: usize) -> Result<bool>;

    /// Whether every target block is already present
    fn is_complete(&self) -> bool;
}

/// One step of a block-matching scan over a seed
pub trait BlockMatcher {
    /// Window length the matcher expects
    fn block_span(&self) -> usize;

    /// Examine one window, write any matched blocks to `sink` and return
    /// how far the window must advance
    fn match_window<S: BlockSink + ?Sized>(&mut self, sink: &mut S, window: &[u8]) -> Result<usize>;
}

/// Matcher selected by the control file's sequential-match count
pub enum Matcher<'a> {
    Single(SingleBlockMatcher<'a>),
    Double(DoubleBlockMatcher<'a>),
}

impl<'a> Matcher<'a> {
    pub fn new(control: &'a ControlFile) -> Self {
        if control.header().seq_matches > 1 {
            Matcher::Double(DoubleBlockMatcher::new(control))
        } else {
            Matcher::Single(SingleBlockMatcher::new(control))
        }
    }

    /// Scan a whole seed, writing every matched block to `sink`
    ///
    /// The seed is followed by one window of zero bytes so its tail can
    /// match the zero-padded last target block. Scanning stops early once
    /// the sink is complete.
    pub fn scan<R: Read, S: BlockSink + ?Sized>(mut self, sink: &mut S, source: R) -> Result<()> {
        let span = self.block_span();
        let padded = source.chain(io::repeat(0).take(span as u64));
        let mut buffer = RollingBuffer::new(padded, span, super::buffer_size(span))
            .in_phase(Phase::InputFileRead)?;

        let mut matched = 0usize;
        let mut windows = 0u64;
        while !sink.is_complete() {
            windows += 1;
            let advance = self.match_window(sink, buffer.as_slice())?;
            if advance > 1 {
                matched += 1;
            }
            if !buffer.advance(advance).in_phase(Phase::InputFileRead)? {
                break;
            }
        }

        tracing::debug!(
            "Scanned {} windows over {} bytes, {} matching windows",
            windows,
            buffer.total_read().saturating_sub(span as u64),
            matched
        );
        Ok(())
    }
}

impl BlockMatcher for Matcher<'_> {
    fn block_span(&self) -> usize {
        match self {
            Matcher::Single(m) => m.block_span(),
            Matcher::Double(m) => m.block_span(),
        }
    }

    fn match_window<S: BlockSink + ?Sized>(&mut self, sink: &mut S, window: &[u8]) -> Result<usize> {
        match self {
            Matcher::Single(m) => m.match_window(sink, window),
            Matcher::Double(m) => m.match_window(sink, window),
        }
    }
}
