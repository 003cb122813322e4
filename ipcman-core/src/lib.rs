//! # ipcman core
//!
//! Core library for managing a fleet of network video devices that speak a
//! session-based JSON-RPC protocol.
//!
//! ## Overview
//!
//! - **Device sessions**: wire codec, two-phase login handshake, and the
//!   keepalive state machine ([`rpc`]).
//! - **Per-device workers**: a mailbox actor that owns each session, plus the
//!   supervised event and status sub-workers and the worker directory
//!   ([`worker`]).
//! - **File scanning**: period iteration, unique file timestamps, and the
//!   cursor-driven reconciliation of device listings into a catalog
//!   ([`scan`]).
//! - **Catalog seam**: the storage operations the core needs, with an
//!   in-memory implementation ([`catalog`]).
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ipcman_core::catalog::MemoryCatalog;
//! use ipcman_core::worker::{NotificationBus, WorkerDirectory, WorkerOptions};
//! use ipcman_core::rpc::SessionOptions;
//! use ipcman_core::scan::ScanOptions;
//!
//! async fn boot() -> Result<(), ipcman_core::WorkerError> {
//!     let catalog = Arc::new(MemoryCatalog::new());
//!     let bus = Arc::new(NotificationBus::new(256));
//!     let directory = WorkerDirectory::new(
//!         catalog,
//!         bus,
//!         SessionOptions::default(),
//!         WorkerOptions::default(),
//!         ScanOptions::default(),
//!     )?;
//!     directory.bootstrap().await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Catalog collaborator interface and the in-memory implementation
pub mod catalog;

/// CGI endpoints: digest authentication and the push event stream
pub mod cgi;

/// Error types shared by every subsystem
pub mod error;

/// Device RPC protocol: codec, login, session state machine, transports
pub mod rpc;

/// Time-windowed file scanning engine
pub mod scan;

/// Per-device actors, supervision, and the worker directory
pub mod worker;

pub use error::{
    CatalogError, CgiError, ErrorKind, LoginError, ResponseError, Result,
    RpcError, ScanError, WorkerError,
};
pub use ipcman_model as model;
