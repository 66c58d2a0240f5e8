//! Outbound and inbound buffers of a single exchange.

use crate::wire::{NetStringParser, PacketDecoder};

use bytes::Bytes;
use std::ops::Range;

/// Responses larger than this are treated as a read failure.
pub(crate) const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

const READ_CHUNK: usize = 16 * 1024;

/// The assembled request frame, consumed incrementally by partial writes.
#[derive(Debug, Default)]
pub(crate) struct Outbound {
    segments: [Bytes; 3],
    written: usize,
}

impl Outbound {
    pub(crate) fn set(&mut self, segments: [Bytes; 3]) {
        self.segments = segments;
        self.written = 0;
    }

    /// Restarts from the first byte without reassembling.
    pub(crate) fn rewind(&mut self) {
        self.written = 0;
    }

    pub(crate) fn clear(&mut self) {
        self.segments = Default::default();
        self.written = 0;
    }

    pub(crate) fn total(&self) -> usize {
        self.segments.iter().map(Bytes::len).sum()
    }

    pub(crate) fn residual(&self) -> usize {
        self.total() - self.written
    }

    /// The unsent tails of each non-empty segment, in order.
    pub(crate) fn unsent(&self) -> Vec<&[u8]> {
        let mut skip = self.written;
        let mut slices = Vec::with_capacity(self.segments.len());

        for segment in &self.segments {
            if skip >= segment.len() {
                skip -= segment.len();
                continue;
            }
            slices.push(&segment[skip..]);
            skip = 0;
        }

        slices
    }

    pub(crate) fn advance(&mut self, written: usize) {
        self.written = (self.written + written).min(self.total());
    }
}

/// Accumulated response bytes and the decoder state over them.
#[derive(Debug)]
pub(crate) struct Inbound {
    pub(crate) buffer: Vec<u8>,
    pub(crate) parser: NetStringParser,
    pub(crate) decoder: PacketDecoder,
}

impl Default for Inbound {
    fn default() -> Self {
        Self {
            buffer: Vec::new(),
            parser: NetStringParser::new(),
            decoder: PacketDecoder::response(),
        }
    }
}

impl Inbound {
    pub(crate) fn reset(&mut self) {
        self.buffer.clear();
        self.parser.reset();
        self.decoder.reset();
    }

    pub(crate) fn bytes_read(&self) -> usize {
        self.buffer.len()
    }

    /// How many bytes the next read may append. Zero once the response
    /// has reached [`MAX_RESPONSE_BYTES`].
    pub(crate) fn read_limit(&self) -> usize {
        MAX_RESPONSE_BYTES
            .saturating_sub(self.buffer.len())
            .min(READ_CHUNK)
    }

    pub(crate) fn data(&self, range: Range<usize>) -> &[u8] {
        self.buffer.get(range).unwrap_or_default()
    }
}
