// SPDX-License-Identifier: Apache-2.0

//! Incremental splitting of a byte stream into delimited records.

use bytes::{Buf, Bytes, BytesMut};
use memchr::memmem;

/// Splits byte chunks into complete records, carrying any trailing partial
/// record over to the next call.
///
/// The residual buffer grows without bound while no delimiter arrives.
/// Feeding the same chunk twice is not idempotent; start over with a new
/// tokenizer instead.
#[derive(Debug)]
pub struct BufferedTokenizer {
    delimiter: Vec<u8>,
    buffer: BytesMut,
}

impl BufferedTokenizer {
    /// Create a tokenizer for the given delimiter.
    ///
    /// # Panics
    ///
    /// Panics if `delimiter` is empty.
    pub fn new(delimiter: impl Into<Vec<u8>>) -> Self {
        let delimiter = delimiter.into();
        assert!(!delimiter.is_empty(), "delimiter must not be empty");

        Self {
            delimiter,
            buffer: BytesMut::new(),
        }
    }

    /// Append `data` and return every record it completes, delimiters stripped.
    pub fn extract(&mut self, data: &[u8]) -> Vec<Bytes> {
        // The residual holds no complete delimiter, but its tail may hold the
        // start of one that `data` finishes.
        let mut search_from = self
            .buffer
            .len()
            .saturating_sub(self.delimiter.len() - 1);
        self.buffer.extend_from_slice(data);

        let finder = memmem::Finder::new(&self.delimiter);
        let mut records = Vec::new();

        while let Some(pos) = finder.find(&self.buffer[search_from..]) {
            let record = self.buffer.split_to(search_from + pos).freeze();
            self.buffer.advance(self.delimiter.len());
            records.push(record);
            search_from = 0;
        }

        records
    }

    /// Take whatever partial record is buffered, leaving the tokenizer empty.
    pub fn flush(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    /// Number of buffered bytes not yet part of a complete record.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn delimiter(&self) -> &[u8] {
        &self.delimiter
    }
}

impl Default for BufferedTokenizer {
    fn default() -> Self {
        Self::new(b"\n".to_vec())
    }
}
