// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The HTTP adapter: a capability trait the repository layer is parameterized over, plus a
//! `reqwest`-backed implementation with retry/backoff and byte-range resume.

use crate::error::{self, Result};
use crate::io::{MaxSizeReader, SizeBound};
use log::{debug, trace};
use reqwest::blocking::{Client, ClientBuilder, Request, Response};
use reqwest::header::{self, HeaderValue, ACCEPT_RANGES};
use reqwest::{Method, StatusCode};
use snafu::ResultExt;
use std::cmp::Ordering;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Caps on the two role files no parent role pins a size for ahead of time (`root.json` signs
/// itself; `timestamp.json` has no parent). Every other fetch uses the exact length from its
/// parent's `FileInfo` instead of a cap.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// The maximum allowable size in bytes for a downloaded `root.json`.
    pub max_root_size: u64,
    /// The maximum allowable size in bytes for a downloaded `timestamp.json`.
    pub max_timestamp_size: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_root_size: 1024 * 1024,
            max_timestamp_size: 1024 * 1024,
        }
    }
}

/// Settings for the HTTP client's retry strategy and timeouts.
#[derive(Clone, Copy, Debug)]
pub struct ClientSettings {
    /// Timeout for connect, read and write operations.
    pub timeout: Duration,
    /// Timeout for only the connect phase.
    pub connect_timeout: Duration,
    /// The total number of times a request will be attempted.
    pub tries: u32,
    /// The pause between the first and second try.
    pub initial_backoff: Duration,
    /// The maximum length of a pause between retries.
    pub max_backoff: Duration,
    /// The exponential backoff factor applied after each try, up to `max_backoff`.
    pub backoff_factor: f32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            tries: 4,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            backoff_factor: 1.5,
        }
    }
}

/// Whether a response indicated `206 Partial Content` (an honored range request) or `200 OK`
/// (the server ignored the range and sent the whole body — the caller must fall back to a full
/// download).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeResult {
    /// The server honored the range request.
    Partial,
    /// The server returned the full body; the range was not honored.
    Full,
}

/// A small piece of mutable state, shared across every call made through one client, recording
/// whether the server has ever advertised `Accept-Ranges: bytes`. Per-client, not process-wide:
/// callers construct one alongside their `HttpClient` rather than reach for ambient global state.
/// Updates are monotonic (false → true), so a stale read is at worst a missed optimization, never
/// an incorrect one.
#[derive(Debug, Clone, Default)]
pub struct ServerCapabilities {
    inner: Arc<Mutex<Capabilities>>,
}

#[derive(Debug, Default)]
struct Capabilities {
    accepts_byte_ranges: bool,
}

impl ServerCapabilities {
    /// Creates a fresh, unknown capability set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the server has ever advertised `Accept-Ranges: bytes`.
    pub fn accepts_byte_ranges(&self) -> bool {
        self.inner.lock().expect("capabilities lock poisoned").accepts_byte_ranges
    }

    fn observe(&self, response: &Response) {
        if let Some(ranges) = response.headers().get(ACCEPT_RANGES) {
            if ranges.to_str().map(|v| v.contains("bytes")).unwrap_or(false) {
                self.inner.lock().expect("capabilities lock poisoned").accepts_byte_ranges = true;
            }
        }
    }
}

/// The transport capability the repository layer is built on: plain GETs, byte-range GETs, and
/// the capability tracker that makes mirror/format decisions possible.
pub trait HttpClient: std::fmt::Debug + Send + Sync {
    /// Issues a GET for `url`, retrying per this client's settings. The response body is streamed
    /// through a reader bounded by `bound`, attributing any `FileTooLarge` error to `file`.
    fn get(&self, url: &Url, file: &str, bound: SizeBound) -> Result<Vec<u8>>;

    /// Issues a GET for `url` with `Range: bytes=lo-{hi-1}`, returning the body and whether the
    /// server honored the range. `bound` caps the partial body the same way as [`HttpClient::get`].
    fn get_range(&self, url: &Url, file: &str, bound: SizeBound, lo: u64, hi: u64) -> Result<(Vec<u8>, RangeResult)>;

    /// This client's capability tracker.
    fn capabilities(&self) -> &ServerCapabilities;
}

/// A `reqwest`-backed [`HttpClient`] with exponential-backoff retries and byte-range resume on
/// a dropped connection, mirroring the retry loop used for plain fetches.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    settings: ClientSettings,
    capabilities: ServerCapabilities,
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new(ClientSettings::default())
    }
}

impl ReqwestHttpClient {
    /// Creates a new client with `settings`.
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            capabilities: ServerCapabilities::new(),
        }
    }

    fn build_client(&self, url: &Url) -> Result<Client> {
        ClientBuilder::new()
            .timeout(self.settings.timeout)
            .connect_timeout(self.settings.connect_timeout)
            .build()
            .context(error::HttpClientBuildSnafu { url: url.clone() })
    }

    fn execute_with_retries(&self, url: &Url, range: Option<(u64, u64)>) -> Result<Response> {
        trace!("beginning fetch for '{url}'");
        let client = self.build_client(url)?;
        let mut current_try = 0u32;
        let mut wait = self.settings.initial_backoff;
        loop {
            let request = build_request(&client, url, range)?;
            let outcome = client.execute(request).and_then(Response::error_for_status);
            match outcome {
                Ok(response) => {
                    self.capabilities.observe(&response);
                    return Ok(response);
                }
                Err(err) => {
                    debug!("error during fetch of '{url}': {err:?}");
                    if let Some(status) = err.status() {
                        if !status.is_server_error() {
                            return Err(err).context(error::HttpFetchSnafu { url: url.clone() });
                        }
                    }
                    if current_try >= self.settings.tries - 1 {
                        return Err(err).context(error::HttpRetriesSnafu {
                            url: url.clone(),
                            tries: self.settings.tries,
                        });
                    }
                    current_try += 1;
                    if current_try > 1 {
                        let new_wait = wait.mul_f32(self.settings.backoff_factor);
                        wait = match new_wait.cmp(&self.settings.max_backoff) {
                            Ordering::Greater => self.settings.max_backoff,
                            _ => new_wait,
                        };
                    }
                    std::thread::sleep(wait);
                }
            }
        }
    }
}

impl HttpClient for ReqwestHttpClient {
    fn get(&self, url: &Url, file: &str, bound: SizeBound) -> Result<Vec<u8>> {
        let response = self.execute_with_retries(url, None)?;
        let mut sized = MaxSizeReader::new(response, file, bound);
        let mut buf = Vec::new();
        sized
            .read_to_end(&mut buf)
            .map_err(|e| downcast_read_error(e, url, file))?;
        Ok(buf)
    }

    fn get_range(&self, url: &Url, file: &str, bound: SizeBound, lo: u64, hi: u64) -> Result<(Vec<u8>, RangeResult)> {
        let response = self.execute_with_retries(url, Some((lo, hi)))?;
        let partial = response.status() == StatusCode::PARTIAL_CONTENT;
        let mut sized = MaxSizeReader::new(response, file, bound);
        let mut buf = Vec::new();
        sized
            .read_to_end(&mut buf)
            .map_err(|e| downcast_read_error(e, url, file))?;
        let result = if partial { RangeResult::Partial } else { RangeResult::Full };
        Ok((buf, result))
    }

    fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }
}

fn downcast_read_error(e: std::io::Error, url: &Url, file: &str) -> error::Error {
    match e.into_inner() {
        Some(inner) => match inner.downcast::<error::Error>() {
            Ok(boxed) => *boxed,
            Err(other) => error::Error::HttpBody {
                url: url.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, other),
            },
        },
        None => error::Error::HttpBody {
            url: url.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, format!("error reading '{file}'")),
        },
    }
}

fn build_request(client: &Client, url: &Url, range: Option<(u64, u64)>) -> Result<Request> {
    let builder = client.request(Method::GET, url.as_str());
    let builder = match range {
        None => builder,
        Some((lo, hi)) => {
            let value = format!("bytes={lo}-{}", hi.saturating_sub(1));
            let header_value = HeaderValue::from_str(&value).context(error::HttpHeaderSnafu {
                header_value: value.clone(),
            })?;
            builder.header(header::RANGE, header_value)
        }
    };
    builder.build().context(error::HttpRequestBuildSnafu { url: url.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_documented_backoff() {
        let settings = ClientSettings::default();
        assert_eq!(settings.tries, 4);
        assert_eq!(settings.initial_backoff, Duration::from_millis(100));
    }

    #[test]
    fn capabilities_start_unknown_and_are_monotonic() {
        let caps = ServerCapabilities::new();
        assert!(!caps.accepts_byte_ranges());
        caps.inner.lock().unwrap().accepts_byte_ranges = true;
        assert!(caps.accepts_byte_ranges());
    }
}
