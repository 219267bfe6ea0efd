// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A secure client for Hackage-style package indexes, built on a TUF-variant trust model.
//!
//! This client adheres to the repository's wire protocol and state machine, with the following
//! extension over baseline TUF: a `mirrors` top-level role, verified the same way as `root`,
//! `timestamp` and `snapshot`, so mirror selection itself is signed rather than trusted
//! out-of-band.
//!
//! # Testing
//!
//! Unit tests are run in the usual manner: `cargo test`. Rollback, mirror-failover, and root
//! rotation are exercised against an in-crate fake [`Repository`] rather than a live HTTP server.
//! [`repository::FilesystemRepository`] gives local, directory-backed mirrors a genuine
//! (non-test) implementation of the same trait, for air-gapped installs.

#![forbid(missing_debug_implementations, missing_copy_implementations)]
#![deny(rust_2018_idioms)]
// missing_docs is on its own line to make it easy to comment out when making changes.
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc
)]

mod cache;
mod canonical;
#[cfg(feature = "http")]
mod client;
mod decoded;
pub mod error;
mod fetch;
#[cfg(feature = "http")]
pub mod http;
mod io;
mod keys;
pub mod schema;
mod tarindex;
mod transport;
mod trust;
pub mod verify;

#[cfg(feature = "http")]
pub mod repository;

#[cfg(feature = "http")]
pub use crate::client::Client;
pub use crate::decoded::{Decoded, Hex};
pub use crate::error::{Error, Result};
pub use crate::io::SizeBound;
pub use crate::keys::{Key, KeyEnv, KeyId};
#[cfg(feature = "http")]
pub use crate::repository::{
    FilesystemRepository, Formats, HttpRepository, RemoteFile, Repository, SelectedFormat,
};
pub use crate::trust::{Trusted, TrustState};
pub use crate::transport::{FilesystemTransport, Transport, TransportError, TransportErrorKind};

#[cfg(feature = "http")]
pub use crate::http::{ClientSettings, HttpClient, Limits, RangeResult, ReqwestHttpClient, ServerCapabilities};
