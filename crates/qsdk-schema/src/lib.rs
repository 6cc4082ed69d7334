//! Shared domain types for the qsdk installer.
//!
//! This crate defines the canonical data structures used across all qsdk
//! components: Qt version triples and version specifiers, target keys
//! identifying a repository subtree, repository folder names, the parsed
//! `Updates.xml` document model, package-name grammar, and checksum wrappers.
//! It performs no I/O.

/// Typed wrappers for checksum algorithms and hex digests.
pub mod hash;
/// The `Updates.xml` document model, package-name grammar, and install plans.
pub mod package;
/// Host/target/arch tuples and repository folder-name derivation.
pub mod target;
/// Version triples and version range specifiers.
pub mod version;

pub use hash::{Checksum, ChecksumRecord, HashAlgorithm};
pub use package::{Archive, InstallPlan, PackageName, PackageUpdate, PatchAction, UpdatesDoc};
pub use target::{FolderName, Host, Target, TargetKey};
pub use version::{Version, VersionSpec};
