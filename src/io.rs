// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A reader adapter that enforces a download budget as bytes stream by, rather than buffering
//! the whole body first.

use crate::error;
use std::io::{self, Read};

/// The size bound a [`MaxSizeReader`] enforces.
#[derive(Debug, Clone, Copy)]
pub enum SizeBound {
    /// The file's length is already known exactly (e.g. pinned by a `FileInfo`).
    Exact(u64),
    /// An upper bound, with no exact length known (e.g. a caller-configured download cap).
    Upper(u64),
    /// No bound at all; the reader is a pass-through.
    Unknown,
}

impl SizeBound {
    fn limit(self) -> Option<u64> {
        match self {
            SizeBound::Exact(n) | SizeBound::Upper(n) => Some(n),
            SizeBound::Unknown => None,
        }
    }
}

/// Wraps a reader, failing with [`error::Error::FileTooLarge`] the moment the cumulative byte
/// count would exceed its bound.
pub struct MaxSizeReader<R> {
    inner: R,
    file: String,
    bound: SizeBound,
    read_so_far: u64,
}

impl<R> std::fmt::Debug for MaxSizeReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaxSizeReader")
            .field("file", &self.file)
            .field("bound", &self.bound)
            .field("read_so_far", &self.read_so_far)
            .finish()
    }
}

impl<R: Read> MaxSizeReader<R> {
    /// Wraps `inner`, attributing any `FileTooLarge` error to `file`.
    pub fn new(inner: R, file: impl Into<String>, bound: SizeBound) -> Self {
        Self {
            inner,
            file: file.into(),
            bound,
            read_so_far: 0,
        }
    }

    /// The number of bytes read so far.
    pub fn bytes_read(&self) -> u64 {
        self.read_so_far
    }
}

impl<R: Read> Read for MaxSizeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read_so_far += n as u64;
        if let Some(limit) = self.bound.limit() {
            if self.read_so_far > limit {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    error::Error::FileTooLarge {
                        file: self.file.clone(),
                        bound: limit,
                    },
                ));
            }
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn max_size_reader_passes_through_under_bound() {
        let data = b"hello world".to_vec();
        let mut reader = MaxSizeReader::new(Cursor::new(data.clone()), "f", SizeBound::Upper(100));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn max_size_reader_fails_over_bound() {
        let data = vec![0u8; 100];
        let mut reader = MaxSizeReader::new(Cursor::new(data), "f", SizeBound::Upper(10));
        let mut out = Vec::new();
        assert!(reader.read_to_end(&mut out).is_err());
    }
}
