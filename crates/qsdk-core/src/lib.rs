//! Core engine for the qsdk installer.
//!
//! This crate implements the headless install path for the Qt SDK: metadata
//! discovery against the upstream mirror network, package resolution into an
//! install plan, a bounded-concurrency download/verify/extract pipeline with
//! mirror fallback and trusted-mirror checksums, and the post-install patcher
//! that makes the installed tree relocatable. It is designed to be consumed
//! by a CLI frontend without coupling to any particular argument surface.

/// The single error sum type and exit-code classification.
pub mod error;
/// Archive expansion, abstract over in-process and external extractors.
pub mod extract;
/// Authoritative digests from trusted mirrors, cached per run.
pub mod hashstore;
/// Retrying HTTP transport with blacklist-aware redirects.
pub mod http;
/// The facade gluing resolver, pipeline, and patcher together.
pub mod installer;
/// Repository metadata: directory listings and `Updates.xml`.
pub mod meta;
/// Mirror candidate selection.
pub mod mirrors;
/// Post-install rewrites for relocatability.
pub mod patcher;
/// The concurrent download/verify/extract engine.
pub mod pipeline;
/// Progress reporting trait and the silent default.
pub mod reporter;
/// Package selection: user intent to install plan.
pub mod resolver;
/// Immutable process-wide tunables.
pub mod settings;

#[cfg(test)]
mod testutil;

pub use error::{ErrorClass, InstallError};
pub use installer::Installer;
pub use reporter::{NullReporter, Reporter};
pub use resolver::{InstallRequest, Operation, Resolver};
pub use settings::{Settings, SettingsError, UPSTREAM_BASE_URL};

/// User agent presented to mirrors.
pub const USER_AGENT: &str = concat!("qsdk/", env!("CARGO_PKG_VERSION"));
