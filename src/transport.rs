// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The `Transport` capability: fetching bytes given a URL, with no opinion on retries, mirrors,
//! or byte ranges (that belongs to [`crate::http`]). A `FilesystemTransport` is provided for
//! `file://` URLs, used directly by tests and by any purely local deployment.

use dyn_clone::DynClone;
use snafu::Snafu;
use std::fmt::Debug;
use std::fs::File;
use std::io::Read;
use url::Url;

/// Fetches the bytes at a URL.
pub trait Transport: Debug + DynClone {
    /// Opens a reader over the bytes at `url`.
    fn fetch(&self, url: Url) -> Result<Box<dyn Read + Send + '_>, TransportError>;
}

dyn_clone::clone_trait_object!(Transport);

/// The kind of failure a [`Transport`] encountered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportErrorKind {
    /// The URL scheme is not handled by this transport.
    UnsupportedUrlScheme,
    /// The requested file does not exist.
    FileNotFound,
    /// Anything else.
    Other,
}

/// An error from a [`Transport`] implementation.
#[derive(Debug, Snafu)]
#[snafu(display("transport error ({:?}) fetching '{}': {}", kind, url, source))]
pub struct TransportError {
    kind: TransportErrorKind,
    url: Url,
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl TransportError {
    /// Builds a new `TransportError`.
    pub fn new(
        kind: TransportErrorKind,
        url: Url,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            kind,
            url,
            source: source.into(),
        }
    }

    /// Builds an `UnsupportedUrlScheme` error for `url`.
    pub fn unsupported_scheme(url: Url) -> Self {
        Self {
            kind: TransportErrorKind::UnsupportedUrlScheme,
            source: format!("scheme '{}' is not supported", url.scheme()).into(),
            url,
        }
    }

    /// The kind of failure this error represents.
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }
}

/// Reads `file://` URLs directly off the local filesystem.
#[derive(Debug, Clone)]
pub struct FilesystemTransport;

impl Transport for FilesystemTransport {
    fn fetch(&self, url: Url) -> Result<Box<dyn Read + Send + '_>, TransportError> {
        if url.scheme() != "file" {
            return Err(TransportError::unsupported_scheme(url));
        }
        let path = url
            .to_file_path()
            .map_err(|_| TransportError::unsupported_scheme(url.clone()))?;
        let file = File::open(&path).map_err(|e| {
            let kind = if e.kind() == std::io::ErrorKind::NotFound {
                TransportErrorKind::FileNotFound
            } else {
                TransportErrorKind::Other
            };
            TransportError::new(kind, url.clone(), e)
        })?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn filesystem_transport_reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"hello")
            .unwrap();
        let url = Url::from_file_path(&path).unwrap();
        let mut reader = FilesystemTransport.fetch(url).unwrap();
        let mut buf = String::new();
        reader.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "hello");
    }

    #[test]
    fn filesystem_transport_reports_missing_file() {
        let url = Url::parse("file:///does/not/exist").unwrap();
        let err = FilesystemTransport.fetch(url).unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::FileNotFound);
    }

    #[test]
    fn filesystem_transport_rejects_other_schemes() {
        let url = Url::parse("http://example.com/root.json").unwrap();
        let err = FilesystemTransport.fetch(url).unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::UnsupportedUrlScheme);
    }
}
