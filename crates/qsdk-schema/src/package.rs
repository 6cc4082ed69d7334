//! The `Updates.xml` document model, package-name grammar, and install plans.
//!
//! Every folder of the remote repository carries an `Updates.xml` descriptor
//! listing its packages. Package names are dotted and versioned
//! (`qt.qt5.5152.qtcharts.gcc_64`); the [`PackageName`] grammar here decodes
//! them and normalizes module short names across the historic layout variants
//! so `qtcharts` means the same thing for every release.

use std::fmt;
use std::path::PathBuf;

use chrono::NaiveDate;

use crate::version::Version;

/// The module whose archives shadow the base package's archive names.
///
/// `debug_info` packages republish every base archive with debug symbols, so
/// an archive-subset filter must also be applied to them or a single module
/// request pulls the full debug set.
pub const DEBUG_INFO_MODULE: &str = "debug_info";

/// One `<PackageUpdate>` entry from an `Updates.xml` descriptor.
///
/// Unknown XML elements are ignored by the parser; `name` and `version` are
/// required, everything else defaults to empty.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackageUpdate {
    /// Fully-qualified dotted package name.
    pub name: String,
    /// Opaque version token (e.g. `5.15.2-0-202011130607`). Prefixed onto
    /// archive filenames when building download URLs.
    pub version: String,
    /// Release date, when the descriptor carries one.
    pub release_date: Option<NaiveDate>,
    /// Human-readable name.
    pub display_name: String,
    /// Human-readable description.
    pub description: String,
    /// Archive filenames belonging to this package.
    pub downloadable_archives: Vec<String>,
    /// Compressed payload size in bytes.
    pub compressed_size: u64,
    /// Uncompressed payload size in bytes.
    pub uncompressed_size: u64,
    /// Fully-qualified names of packages this one depends on.
    pub dependencies: Vec<String>,
}

/// A parsed `Updates.xml`: package entries in document order.
#[derive(Debug, Clone, Default)]
pub struct UpdatesDoc {
    /// Entries in document order.
    pub packages: Vec<PackageUpdate>,
}

impl UpdatesDoc {
    /// Look up a package by its fully-qualified name.
    pub fn find(&self, name: &str) -> Option<&PackageUpdate> {
        self.packages.iter().find(|p| p.name == name)
    }

    /// Find the module package matching `short` for the given arch,
    /// normalized across layout variants.
    pub fn find_module(&self, short: &str, arch: &str) -> Option<&PackageUpdate> {
        self.packages.iter().find(|p| {
            PackageName::parse(&p.name)
                .module_short(arch)
                .is_some_and(|s| s == short)
        })
    }

    /// All module short names visible for the given arch, in document order.
    pub fn module_shorts(&self, arch: &str) -> Vec<String> {
        let mut seen = Vec::new();
        for pkg in &self.packages {
            if let Some(short) = PackageName::parse(&pkg.name).module_short(arch) {
                if !seen.contains(&short) {
                    seen.push(short);
                }
            }
        }
        seen
    }

    /// The base package for the given arch, if present.
    pub fn base_package(&self, arch: &str) -> Option<&PackageUpdate> {
        self.packages
            .iter()
            .find(|p| PackageName::parse(&p.name).is_base_for(arch))
    }

    /// Every arch for which a base package exists, in document order.
    pub fn arches(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for pkg in &self.packages {
            if let Some(arch) = PackageName::parse(&pkg.name).base_arch() {
                if !seen.contains(&arch) {
                    seen.push(arch);
                }
            }
        }
        seen
    }
}

/// Decoded form of a dotted repository package name.
///
/// The grammar is `qt.[qtMAJOR.]CODED.[addons.]SEGMENTS…` where `CODED` is the
/// separator-free version (`5152`). Names that do not match (tools packages,
/// malformed entries) parse with `coded == None` and answer `false`/`None`
/// to every classification query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageName {
    raw: String,
    major: Option<u64>,
    coded: Option<String>,
    /// Dotted segments after the coded version.
    tail: Vec<String>,
}

impl PackageName {
    /// Decode a fully-qualified name. Never fails; unrecognized names simply
    /// classify as nothing.
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split('.');
        let unversioned = Self {
            raw: raw.to_string(),
            major: None,
            coded: None,
            tail: Vec::new(),
        };

        if parts.next() != Some("qt") {
            return unversioned;
        }
        let Some(second) = parts.next() else {
            return unversioned;
        };

        // Either `qt.qt5.5152.…` or the historic `qt.5152.…`.
        let (major, coded) = if let Some(mjr) = second.strip_prefix("qt") {
            let Ok(major) = mjr.parse::<u64>() else {
                return unversioned;
            };
            let Some(coded) = parts.next() else {
                return unversioned;
            };
            (Some(major), coded)
        } else {
            (None, second)
        };

        if coded.is_empty() || !coded.bytes().all(|b| b.is_ascii_digit()) {
            return unversioned;
        }

        Self {
            raw: raw.to_string(),
            major,
            coded: Some(coded.to_string()),
            tail: parts.map(ToString::to_string).collect(),
        }
    }

    /// The original fully-qualified name.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Major version from the `qtN` prefix, falling back to the first coded
    /// digit for historic names.
    pub fn major(&self) -> Option<u64> {
        self.major.or_else(|| {
            self.coded
                .as_ref()
                .and_then(|c| c.chars().next())
                .and_then(|c| c.to_digit(10))
                .map(u64::from)
        })
    }

    /// The version encoded in this name, when it parses as a Qt package.
    pub fn version(&self) -> Option<Version> {
        self.coded
            .as_ref()
            .and_then(|c| Version::from_folder_code(c).ok())
    }

    /// Whether this is the base package for `arch`: a versioned name whose
    /// only trailing segment is the arch itself.
    pub fn is_base_for(&self, arch: &str) -> bool {
        self.coded.is_some() && self.tail.len() == 1 && self.tail[0] == arch
    }

    /// The arch of a base package (`qt.qt5.5152.gcc_64` -> `gcc_64`).
    pub fn base_arch(&self) -> Option<String> {
        if self.coded.is_some() && self.tail.len() == 1 {
            Some(self.tail[0].clone())
        } else {
            None
        }
    }

    /// The normalized module short name, when this is a module package for
    /// `arch`. The historic `addons.` infix is stripped so short names are
    /// uniform across releases.
    pub fn module_short(&self, arch: &str) -> Option<String> {
        if self.coded.is_none() || self.tail.len() < 2 || self.tail.last().map(String::as_str) != Some(arch)
        {
            return None;
        }
        let mut middle: &[String] = &self.tail[..self.tail.len() - 1];
        if middle.first().map(String::as_str) == Some("addons") {
            middle = &middle[1..];
        }
        if middle.is_empty() {
            return None;
        }
        Some(middle.join("."))
    }

    /// For src/doc/examples descriptors: whether this is the flavor's base
    /// package (`qt.qt5.5152.src`).
    pub fn is_flavor_base(&self, flavor: &str) -> bool {
        self.coded.is_some() && self.tail.len() == 1 && self.tail[0] == flavor
    }

    /// For src/doc/examples descriptors: the module short name scoped to a
    /// flavor (`qt.qt5.5152.doc.qtcharts` -> `qtcharts`).
    pub fn flavor_module(&self, flavor: &str) -> Option<String> {
        if self.coded.is_none() || self.tail.len() < 2 || self.tail[0] != flavor {
            return None;
        }
        Some(self.tail[1..].join("."))
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// One downloadable archive of the install plan.
///
/// Identity (and the dedup key) is `(package_name, filename)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    /// Fully-qualified name of the owning package.
    pub package_name: String,
    /// Archive filename as listed in `DownloadableArchives`.
    pub filename: String,
    /// The package's opaque version token, prefixed onto the filename in URLs.
    pub version_token: String,
    /// Absolute download URL.
    pub url: String,
    /// Subdirectory under the destination the archive expands into. Usually
    /// empty: Qt archives carry their `{version}/{arch}/` layout internally.
    pub target_subdir: String,
}

impl Archive {
    /// The dedup identity.
    pub fn key(&self) -> (&str, &str) {
        (&self.package_name, &self.filename)
    }

    /// Leading component of the filename, used for `--archives` subset
    /// filtering (`qtbase-Linux-…-X86_64.7z` -> `qtbase`).
    pub fn short_name(&self) -> &str {
        self.filename.split('-').next().unwrap_or(&self.filename)
    }
}

/// A post-install rewrite the patcher must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchAction {
    /// Make an installed Qt prefix relocatable: qmake path tokens, qt.conf,
    /// qconfig.pri, pkg-config files, and (pre-5.14) the core library.
    QtPrefix {
        /// Absolute install prefix (`{outputdir}/{version}/{arch}`).
        prefix: PathBuf,
        /// Installed version, which gates version-specific rewrites.
        version: Version,
    },
    /// Point a mobile install's `bin/target_qt.conf` at its host desktop
    /// tooling (Qt >= 6 cross targets).
    MobileHostPrefix {
        /// Absolute install prefix of the mobile tree.
        prefix: PathBuf,
        /// Directory name of the sibling desktop install (e.g. `gcc_64`).
        desktop_arch_dir: String,
    },
}

/// The concrete outcome of resolution: an ordered, deduplicated archive set
/// plus destination and post-install actions.
#[derive(Debug, Clone, Default)]
pub struct InstallPlan {
    /// Archives in emission order (base, then modules, then dependencies).
    pub archives: Vec<Archive>,
    /// Root directory installs expand under.
    pub destination: PathBuf,
    /// Patcher work attached by the resolver.
    pub patch_actions: Vec<PatchAction>,
    /// Follow-up plans (e.g. the `--autodesktop` host tooling install).
    pub sub_plans: Vec<InstallPlan>,
}

impl InstallPlan {
    /// Append an archive unless its `(package, filename)` identity is already
    /// present.
    pub fn push_archive(&mut self, archive: Archive) {
        let key = (archive.package_name.clone(), archive.filename.clone());
        if !self
            .archives
            .iter()
            .any(|a| a.key() == (key.0.as_str(), key.1.as_str()))
        {
            self.archives.push(archive);
        }
    }

    /// Whether the plan (including sub-plans) has nothing to download.
    pub fn is_empty(&self) -> bool {
        self.archives.is_empty() && self.sub_plans.iter().all(Self::is_empty)
    }

    /// Total archive count including sub-plans.
    pub fn archive_count(&self) -> usize {
        self.archives.len() + self.sub_plans.iter().map(Self::archive_count).sum::<usize>()
    }
}
