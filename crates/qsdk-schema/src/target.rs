//! Host/target/arch tuples and repository folder names.
//!
//! A [`TargetKey`] names the repository subtree an install draws from:
//! `(host, target, arch, extension)`. The upstream mirror lays folders out as
//! `online/qtsdkrepository/{host-segment}/{target}/{folder}/`, where the
//! folder name encodes the Qt version (and, for Qt 6 mobile targets, the
//! architecture).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::version::Version;

/// Errors from validating target combinations or deriving folder names.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    /// Unknown host name.
    #[error("unknown host '{0}' (expected linux, mac, or windows)")]
    UnknownHost(String),

    /// Unknown target name.
    #[error("unknown target '{0}' (expected desktop, android, ios, or winrt)")]
    UnknownTarget(String),

    /// The host/target pair is not published upstream.
    #[error("target '{target}' is not available for host '{host}'")]
    InvalidCombination {
        /// The requested host.
        host: Host,
        /// The requested target.
        target: Target,
    },

    /// The folder layout requires an architecture qualifier.
    #[error("an architecture is required to locate {target} packages for Qt {version}")]
    ArchRequired {
        /// The requested target.
        target: Target,
        /// The requested version.
        version: Version,
    },
}

/// The operating system the SDK will run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Host {
    /// Linux host.
    Linux,
    /// macOS host.
    Mac,
    /// Windows host.
    Windows,
}

impl Host {
    /// The host the current process runs on.
    pub fn current() -> Self {
        #[cfg(target_os = "macos")]
        {
            Self::Mac
        }
        #[cfg(target_os = "windows")]
        {
            Self::Windows
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            Self::Linux
        }
    }

    /// Lowercase name as used on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Mac => "mac",
            Self::Windows => "windows",
        }
    }

    /// The `{host}_{cpu}` path segment the repository uses for this host.
    pub fn repo_segment(self) -> &'static str {
        match self {
            Self::Linux => "linux_x64",
            Self::Mac => "mac_x64",
            Self::Windows => "windows_x86",
        }
    }
}

impl FromStr for Host {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linux" => Ok(Self::Linux),
            "mac" => Ok(Self::Mac),
            "windows" => Ok(Self::Windows),
            other => Err(TargetError::UnknownHost(other.to_string())),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The device family the SDK targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Desktop applications on the host OS.
    Desktop,
    /// Android devices.
    Android,
    /// iOS devices.
    Ios,
    /// Windows Runtime (legacy).
    Winrt,
}

impl Target {
    /// Lowercase name as used in repository paths and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Android => "android",
            Self::Ios => "ios",
            Self::Winrt => "winrt",
        }
    }

    /// Whether this is a cross-compilation target needing host tooling.
    pub fn is_mobile(self) -> bool {
        matches!(self, Self::Android | Self::Ios)
    }
}

impl FromStr for Target {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "desktop" => Ok(Self::Desktop),
            "android" => Ok(Self::Android),
            "ios" => Ok(Self::Ios),
            "winrt" => Ok(Self::Winrt),
            other => Err(TargetError::UnknownTarget(other.to_string())),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The tuple selecting a repository subtree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    /// Host operating system.
    pub host: Host,
    /// Device family.
    pub target: Target,
    /// Compiler/ABI architecture (e.g. `gcc_64`, `win64_mingw81`,
    /// `android_armv7`). Optional for listing operations.
    pub arch: Option<String>,
    /// Optional folder extension (e.g. `wasm_singlethread`).
    pub extension: Option<String>,
}

impl TargetKey {
    /// Build a key and validate the host/target combination.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::InvalidCombination`] for pairs the upstream
    /// repository does not publish (`ios` needs a mac host, `winrt` a windows
    /// host).
    pub fn new(
        host: Host,
        target: Target,
        arch: Option<String>,
        extension: Option<String>,
    ) -> Result<Self, TargetError> {
        match (host, target) {
            (Host::Mac, Target::Ios)
            | (Host::Windows, Target::Winrt)
            | (_, Target::Desktop | Target::Android) => Ok(Self {
                host,
                target,
                arch,
                extension,
            }),
            _ => Err(TargetError::InvalidCombination { host, target }),
        }
    }

    /// The repository path prefix for this key, without the version folder:
    /// `online/qtsdkrepository/linux_x64/desktop`.
    pub fn repo_path(&self) -> String {
        format!(
            "online/qtsdkrepository/{}/{}",
            self.host.repo_segment(),
            self.target.as_str()
        )
    }
}

/// A derived remote folder name such as `qt5_5152` or `qt6_652_armv7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FolderName(String);

impl FolderName {
    /// Derive the folder for a Qt install.
    ///
    /// Desktop targets and Qt 5 use `qt{major}_{code}`; Qt >= 6 mobile targets
    /// additionally carry an architecture suffix and fail with
    /// [`TargetError::ArchRequired`] when no arch was given. A configured
    /// extension is always appended.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::ArchRequired`] when the layout demands an arch
    /// qualifier that is missing from the key.
    pub fn derive(key: &TargetKey, version: &Version) -> Result<Self, TargetError> {
        let mut name = format!("qt{}_{}", version.major(), version.folder_code());

        if version.major() >= 6 && key.target.is_mobile() {
            let arch = key.arch.as_deref().ok_or_else(|| TargetError::ArchRequired {
                target: key.target,
                version: version.clone(),
            })?;
            let suffix = arch
                .strip_prefix("android_")
                .or_else(|| arch.strip_prefix("ios_"))
                .unwrap_or(arch);
            name.push('_');
            name.push_str(suffix);
        }

        if let Some(ext) = &key.extension {
            name.push('_');
            name.push_str(ext);
        }

        Ok(Self(name))
    }

    /// The folder holding source/documentation/example packages for a version.
    pub fn src_doc_examples(version: &Version) -> Self {
        Self(format!(
            "qt{}_{}_src_doc_examples",
            version.major(),
            version.folder_code()
        ))
    }

    /// The folder for a named tool (`tools_ifw`, `tools_ninja`, ...).
    pub fn tool(tool_name: &str) -> Self {
        if tool_name.starts_with("tools_") {
            Self(tool_name.to_string())
        } else {
            Self(format!("tools_{tool_name}"))
        }
    }

    /// Wrap a raw folder name observed in a directory listing.
    pub fn from_raw(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Extract the version encoded in a Qt folder name, accepting all known
    /// historic layouts: `qt5_5152`, `qt6_680`, `qt_5152` (no major in the
    /// prefix), and arch/extension suffixes after the code.
    pub fn parse_version(name: &str) -> Option<Version> {
        let rest = name.strip_prefix("qt")?;
        let rest = rest.trim_start_matches(|c: char| c.is_ascii_digit());
        let rest = rest.strip_prefix('_')?;
        let code: String = rest.chars().take_while(char::is_ascii_digit).collect();
        if code.is_empty() {
            return None;
        }
        // Anything after the code must be a `_suffix`, not more of the name.
        let tail = &rest[code.len()..];
        if !(tail.is_empty() || tail.starts_with('_')) {
            return None;
        }
        Version::from_folder_code(&code).ok()
    }

    /// The folder name as it appears in URLs.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn host_target_validation() {
        assert!(TargetKey::new(Host::Linux, Target::Desktop, None, None).is_ok());
        assert!(TargetKey::new(Host::Linux, Target::Android, None, None).is_ok());
        assert!(TargetKey::new(Host::Mac, Target::Ios, None, None).is_ok());
        assert!(TargetKey::new(Host::Linux, Target::Ios, None, None).is_err());
        assert!(TargetKey::new(Host::Mac, Target::Winrt, None, None).is_err());
        assert!(TargetKey::new(Host::Windows, Target::Winrt, None, None).is_ok());
    }

    #[test]
    fn repo_path_shape() {
        let key = TargetKey::new(Host::Linux, Target::Desktop, None, None).unwrap();
        assert_eq!(key.repo_path(), "online/qtsdkrepository/linux_x64/desktop");
    }

    #[test]
    fn folder_for_qt5_desktop() {
        let key = TargetKey::new(Host::Linux, Target::Desktop, Some("gcc_64".into()), None).unwrap();
        let folder = FolderName::derive(&key, &v("5.15.2")).unwrap();
        assert_eq!(folder.as_str(), "qt5_5152");
    }

    #[test]
    fn folder_for_qt6_android_requires_arch() {
        let no_arch = TargetKey::new(Host::Linux, Target::Android, None, None).unwrap();
        assert!(matches!(
            FolderName::derive(&no_arch, &v("6.2.0")),
            Err(TargetError::ArchRequired { .. })
        ));

        let with_arch = TargetKey::new(
            Host::Linux,
            Target::Android,
            Some("android_armv7".into()),
            None,
        )
        .unwrap();
        let folder = FolderName::derive(&with_arch, &v("6.2.0")).unwrap();
        assert_eq!(folder.as_str(), "qt6_620_armv7");
    }

    #[test]
    fn folder_qt5_android_needs_no_arch() {
        let key = TargetKey::new(Host::Linux, Target::Android, None, None).unwrap();
        let folder = FolderName::derive(&key, &v("5.15.2")).unwrap();
        assert_eq!(folder.as_str(), "qt5_5152");
    }

    #[test]
    fn folder_extension_appended() {
        let key = TargetKey::new(
            Host::Linux,
            Target::Desktop,
            Some("wasm_singlethread".into()),
            Some("wasm_singlethread".into()),
        )
        .unwrap();
        let folder = FolderName::derive(&key, &v("6.8.0")).unwrap();
        assert_eq!(folder.as_str(), "qt6_680_wasm_singlethread");
    }

    #[test]
    fn parse_version_accepts_variants() {
        assert_eq!(FolderName::parse_version("qt5_5152"), Some(v("5.15.2")));
        assert_eq!(FolderName::parse_version("qt6_680"), Some(v("6.8.0")));
        assert_eq!(FolderName::parse_version("qt_5152"), Some(v("5.15.2")));
        assert_eq!(FolderName::parse_version("qt6_652_armv7"), Some(v("6.5.2")));
        assert_eq!(
            FolderName::parse_version("qt6_680_wasm_singlethread"),
            Some(v("6.8.0"))
        );
        assert_eq!(FolderName::parse_version("tools_ifw"), None);
        assert_eq!(FolderName::parse_version("qt5_5152src"), None);
    }

    #[test]
    fn src_doc_examples_folder() {
        assert_eq!(
            FolderName::src_doc_examples(&v("5.15.2")).as_str(),
            "qt5_5152_src_doc_examples"
        );
    }

    #[test]
    fn tool_folder() {
        assert_eq!(FolderName::tool("ifw").as_str(), "tools_ifw");
        assert_eq!(FolderName::tool("tools_ninja").as_str(), "tools_ninja");
    }
}
