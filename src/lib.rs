//! emebridge - EME license-exchange engine.
//!
//! Pages ask for Widevine or PlayReady; emebridge answers the handshake with
//! a local device, a remote CDM API or a declaratively described API, and
//! plays the resulting keys back through ClearKey.
//!
//! This crate provides:
//! - Widevine device (.wvd) parsing, CDM sessions and license processing.
//! - PlayReady device (.prd) parsing, SOAP challenges and XMR licenses.
//! - PSSH, WRM header and ClearKey codecs.
//! - Per-site profiles, a device resolver and a pending-session registry.
//! - A message bus between the page-side EME shim and the backend, with
//!   exchange logs for persistent sessions.
//!
//! Feature flags:
//! - `cli`: enable the CLI binary.
//! - `serve`: enable the HTTP bus transport.
//! - `chrono`: use chrono for dates in the CLI.
//! - `tracing`: log through tracing (default).
//! - `log`: log through the log facade when tracing is off.
#![allow(clippy::result_large_err)]

#[macro_use]
mod macros;

/// Backend side of the bus: dispatch, accounting and logging.
pub mod backend;
/// Typed bus messages and the in-process transport.
pub mod bus;
/// Widevine CDM implementation.
pub mod cdm;
/// ClearKey init data and license formats.
pub mod clearkey;
/// YAML configuration and credential loading.
pub mod config;
/// Declarative (custom) HTTP API handlers.
pub mod declarative;
/// Widevine device (.wvd) parsing and serialization.
pub mod device;
/// Common error types and Result alias.
pub mod error;
/// The provisioning backend contract.
pub mod handler;
/// Decrypted key representation.
pub mod key;
/// Widevine license protocol messages.
pub mod license_protocol;
/// Local Widevine and PlayReady handlers.
pub mod local;
/// Exchange logs.
pub mod logs;
/// User-facing notifications.
pub mod notify;
/// PlayReady device, challenge and license support.
pub mod playready;
/// Per-site profiles and key-system policy.
pub mod profile;
/// PSSH parsing and conversion utilities.
pub mod pssh;
/// Pending exchanges keyed by correlation id.
pub mod registry;
/// Remote CDM API client.
pub mod remotecdm;
/// Profile and credential resolution.
pub mod resolver;
/// Page-side EME interception.
pub mod shim;
/// Key-value persistence.
pub mod storage;
/// Shared helper utilities.
pub mod utils;

/// HTTP bus transport (feature: `serve`).
#[cfg(feature = "serve")]
pub mod serve;
