// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Synchronous helpers that compose a [`Transport`] fetch with the size and digest checks in
//! [`crate::io`].

use crate::error::{self, Result};
use crate::io::{MaxSizeReader, SizeBound};
use crate::transport::Transport;
use snafu::ResultExt;
use url::Url;

/// Fetches `url` via `transport`, capping the download at `bound` bytes and returning the raw
/// bytes read. Used for files with no pinned `FileInfo` yet (root bootstrap, first timestamp).
pub fn fetch_max_size(
    transport: &dyn Transport,
    url: Url,
    file: &str,
    bound: SizeBound,
) -> Result<Vec<u8>> {
    let reader = transport
        .fetch(url.clone())
        .context(error::CustomTransportSnafu {
            url: url.to_string(),
        })?;
    let mut sized = MaxSizeReader::new(reader, file, bound);
    let mut buf = Vec::new();
    std::io::Read::read_to_end(&mut sized, &mut buf).map_err(|e| error::Error::FileRead {
        path: file.into(),
        source: e,
    })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FilesystemTransport;
    use std::io::Write;

    #[test]
    fn fetch_max_size_reads_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("root.json");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"{}")
            .unwrap();
        let url = Url::from_file_path(&path).unwrap();
        let bytes =
            fetch_max_size(&FilesystemTransport, url, "root.json", SizeBound::Upper(1024))
                .unwrap();
        assert_eq!(bytes, b"{}");
    }
}
