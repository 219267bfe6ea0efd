// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The error type returned by this crate, and the tagged kinds callers match on.

use crate::schema::RoleType;
use chrono::{DateTime, Utc};
use snafu::{Backtrace, Snafu};
use std::path::PathBuf;
use url::Url;

/// The result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for this crate.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    // ---- verification pipeline (spec tags) ----------------------------------------------
    /// A cached or fetched file's declared size/digest didn't match its actual bytes.
    #[snafu(display("file '{}' failed FileInfo check: expected {}, got {}", file, expected, actual))]
    InvalidFileInfo {
        /// The file that failed the check.
        file: String,
        /// The expected digest/length, formatted for display.
        expected: String,
        /// The actual digest/length, formatted for display.
        actual: String,
        /// Backtrace for this error.
        backtrace: Backtrace,
    },

    /// A signature named a key ID that is not in the role's key environment.
    #[snafu(display("signature references unknown key id '{}'", keyid))]
    UnknownKey {
        /// The unrecognized key ID, hex-encoded.
        keyid: String,
    },

    /// Fewer valid, distinct signatures were found than the role's threshold requires.
    #[snafu(display(
        "role '{:?}' did not meet its signature threshold: needed {}, got {}",
        role,
        need,
        got
    ))]
    SignatureThresholdNotMet {
        /// The role being verified.
        role: RoleType,
        /// The number of valid signatures required.
        need: u64,
        /// The number of valid, distinct signatures found.
        got: u64,
    },

    /// A signature did not verify against its claimed key.
    #[snafu(display("signature from key '{}' did not verify", keyid))]
    InvalidSignature {
        /// The key ID that produced the invalid signature.
        keyid: String,
    },

    /// A role's metadata has expired.
    #[snafu(display("role '{:?}' expired at {}", role, expires))]
    Expired {
        /// The role that has expired.
        role: RoleType,
        /// The role's declared expiration time.
        expires: DateTime<Utc>,
    },

    /// A newly fetched role document is older than the one already trusted.
    #[snafu(display(
        "role '{:?}' failed rollback check: have version {}, got version {}",
        role,
        have,
        got
    ))]
    VersionRollback {
        /// The role being checked.
        role: RoleType,
        /// The version currently trusted.
        have: u64,
        /// The version that was rejected.
        got: u64,
    },

    /// A document's `_type` discriminator did not match what was expected.
    #[snafu(display("expected role type '{}', got '{}'", expected, got))]
    WrongType {
        /// The expected discriminator.
        expected: String,
        /// The discriminator actually present.
        got: String,
    },

    /// A role's `FileMap` (`meta` or `targets`) is missing an entry this crate requires it to
    /// carry, distinct from a `_type` mismatch ([`Error::WrongType`]).
    #[snafu(display("role '{:?}' meta is missing required entry '{}'", role, entry))]
    MissingFileMapEntry {
        /// The role whose `FileMap` is incomplete.
        role: RoleType,
        /// The entry name that was required but absent.
        entry: String,
    },

    /// A target path was not resolved by any delegation and the chain terminated.
    #[snafu(display("no delegation resolved path '{}'", path))]
    DelegationUnresolved {
        /// The path that could not be resolved.
        path: String,
    },

    /// An incremental update cannot proceed for a non-fatal reason; the caller should fall back
    /// to a full download.
    #[snafu(display("incremental update impossible: {}", reason))]
    UpdateImpossible {
        /// Why the incremental path isn't available.
        reason: String,
    },

    /// An incremental update was attempted and failed partway through.
    #[snafu(display("incremental update failed: {}", cause))]
    UpdateFailed {
        /// The underlying cause.
        cause: String,
    },

    /// A download exceeded its declared or configured size bound.
    #[snafu(display("file '{}' exceeded its size bound of {} bytes", file, bound))]
    FileTooLarge {
        /// The file being downloaded.
        file: String,
        /// The maximum number of bytes allowed.
        bound: u64,
    },

    /// `with_remote` (or another mirror-scoped call) was invoked outside a `with_mirror` scope.
    #[snafu(display("no mirror selected; with_remote called outside with_mirror"))]
    NoMirrorSelected,

    /// A lower-layer transport error, not otherwise classified.
    #[snafu(display("transport error fetching '{}': {}", url, source))]
    CustomTransport {
        /// The URL being fetched.
        url: String,
        /// The underlying transport error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // ---- key environment / schema --------------------------------------------------------
    /// A declared key ID didn't match the hash of its own key material.
    #[snafu(display("key id '{}' does not match its computed id '{}'", keyid, calculated))]
    InvalidKeyId {
        /// The declared key ID.
        keyid: String,
        /// The key ID computed from the key material.
        calculated: String,
    },

    /// The same key ID was declared twice with different key material.
    #[snafu(display("duplicate key id '{}'", keyid))]
    DuplicateKeyId {
        /// The duplicated key ID.
        keyid: String,
    },

    /// `ring` rejected a key during parsing.
    #[snafu(display("key was rejected: {}", source))]
    KeyRejected {
        /// The underlying `ring` error.
        source: ring::error::KeyRejected,
    },

    /// A `Pattern` string could not be parsed.
    #[snafu(display("invalid path pattern '{}': {}", pattern, reason))]
    InvalidPattern {
        /// The offending pattern text.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },

    // ---- JSON / parsing --------------------------------------------------------------------
    /// Failed to serialize a role to its canonical form.
    #[snafu(display("failed to serialize {}: {}", what, source))]
    JsonSerialization {
        /// What was being serialized.
        what: String,
        /// The underlying serde_json error.
        source: serde_json::Error,
    },

    /// Failed to parse a role document.
    #[snafu(display("failed to parse {:?} metadata: {}", role, source))]
    ParseMetadata {
        /// The role being parsed.
        role: RoleType,
        /// The underlying serde_json error.
        source: serde_json::Error,
    },

    /// Failed to parse the caller-supplied trusted root.
    #[snafu(display("failed to parse trusted root metadata: {}", source))]
    ParseTrustedRoot {
        /// The underlying serde_json error.
        source: serde_json::Error,
    },

    /// Failed to parse the tar-index side-car table.
    #[snafu(display("failed to parse index side-car at '{}': {}", path.display(), source))]
    ParseIndex {
        /// Path to the side-car file.
        path: PathBuf,
        /// The underlying serde_json error.
        source: serde_json::Error,
    },

    /// A URL failed to parse.
    #[snafu(display("failed to parse url '{}': {}", url, source))]
    ParseUrl {
        /// The string that failed to parse.
        url: String,
        /// The underlying url error.
        source: url::ParseError,
    },

    /// Failed to join a relative path onto a base URL.
    #[snafu(display("failed to join path '{}' onto url '{}': {}", path, url, source))]
    JoinUrl {
        /// The relative path.
        path: String,
        /// The base URL.
        url: Url,
        /// The underlying url error.
        source: url::ParseError,
    },

    // ---- local cache -------------------------------------------------------------------------
    /// Failed to create the datastore's backing temporary directory.
    #[snafu(display("failed to initialize datastore: {}", source))]
    DatastoreInit {
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to open a file already in the datastore.
    #[snafu(display("failed to open '{}' in datastore: {}", path.display(), source))]
    DatastoreOpen {
        /// The path that failed to open.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to create a temp file in the datastore.
    #[snafu(display("failed to create temp file in '{}': {}", path.display(), source))]
    DatastoreCreate {
        /// The directory the temp file was being created in.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to rename a verified temp file over its target.
    #[snafu(display("failed to commit '{}' into datastore: {}", path.display(), source))]
    DatastoreCommit {
        /// The destination path.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to serialize a value into the datastore.
    #[snafu(display("failed to serialize {} at '{}': {}", what, path.display(), source))]
    DatastoreSerialize {
        /// What was being serialized.
        what: String,
        /// The path being written.
        path: PathBuf,
        /// The underlying serde_json error.
        source: serde_json::Error,
    },

    /// Failed to remove a file from the datastore.
    #[snafu(display("failed to remove '{}' from datastore: {}", path.display(), source))]
    DatastoreRemove {
        /// The path that failed to be removed.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// The monotonic time lock was poisoned.
    #[snafu(display("datastore time lock poisoned: {}", message))]
    DatastoreTimeLock {
        /// A description of the poisoning error.
        message: String,
    },

    /// The sampled system time was earlier than a previously observed sample.
    #[snafu(display(
        "system time stepped backward: sampled {}, but {} was previously observed",
        sys_time,
        latest_known_time
    ))]
    SystemTimeSteppedBackward {
        /// The time just sampled.
        sys_time: DateTime<Utc>,
        /// The latest time previously observed.
        latest_known_time: DateTime<Utc>,
    },

    // ---- tar index -----------------------------------------------------------------------
    /// Failed while reading the package index tarball.
    #[snafu(display("failed to read tar index at '{}': {}", path.display(), source))]
    TarRead {
        /// Path to the index file.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// An index entry's path did not follow the expected `pkg/version/file` layout.
    #[snafu(display("malformed index entry path '{}'", path))]
    MalformedIndexEntry {
        /// The offending tar entry path.
        path: String,
    },

    // ---- generic filesystem ---------------------------------------------------------------
    /// Failed to open a file.
    #[snafu(display("failed to open '{}': {}", path.display(), source))]
    FileOpen {
        /// The path that failed to open.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to read from a file.
    #[snafu(display("failed to read '{}': {}", path.display(), source))]
    FileRead {
        /// The path being read.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to write a file.
    #[snafu(display("failed to write '{}': {}", path.display(), source))]
    FileWrite {
        /// The path being written.
        path: PathBuf,
        /// The underlying IO error.
        source: std::io::Error,
    },

    // ---- HTTP adapter -----------------------------------------------------------------------
    /// Failed to build the underlying HTTP client.
    #[snafu(display("failed to build http client for '{}': {}", url, source))]
    HttpClientBuild {
        /// The URL the client was being built for.
        url: Url,
        /// The underlying reqwest error.
        source: reqwest::Error,
    },

    /// Failed to build an HTTP request.
    #[snafu(display("failed to build request for '{}': {}", url, source))]
    HttpRequestBuild {
        /// The URL being requested.
        url: Url,
        /// The underlying reqwest error.
        source: reqwest::Error,
    },

    /// Failed to build a header value.
    #[snafu(display("invalid header value '{}': {}", header_value, source))]
    HttpHeader {
        /// The header value that failed to parse.
        header_value: String,
        /// The underlying reqwest error.
        source: reqwest::header::InvalidHeaderValue,
    },

    /// An HTTP request failed with a non-retryable error.
    #[snafu(display("request to '{}' failed: {}", url, source))]
    HttpFetch {
        /// The URL being requested.
        url: Url,
        /// The underlying reqwest error.
        source: reqwest::Error,
    },

    /// An HTTP request failed after exhausting all configured retries.
    #[snafu(display("request to '{}' failed after {} tries: {}", url, tries, source))]
    HttpRetries {
        /// The URL being requested.
        url: Url,
        /// The number of tries attempted.
        tries: u32,
        /// The last underlying error.
        source: reqwest::Error,
    },

    /// The server returned a status code indicating failure.
    #[snafu(display("server returned {} for '{}'", status, url))]
    HttpStatus {
        /// The URL that was requested.
        url: Url,
        /// The HTTP status code returned.
        status: u16,
    },

    /// Failed to read a response body to completion.
    #[snafu(display("failed to read response body from '{}': {}", url, source))]
    HttpBody {
        /// The URL that was requested.
        url: Url,
        /// The underlying IO error.
        source: std::io::Error,
    },
}
