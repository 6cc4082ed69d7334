//! Post-install rewrites that make an installed tree relocatable.
//!
//! The upstream archives embed the build machine's prefix in a handful of
//! places: NUL-terminated path fields inside the qmake binary (and, before
//! 5.14, the core library), and plain-text prefixes in qt.conf, qconfig.pri,
//! pkg-config, and libtool files. Every rewrite here is idempotent: applying
//! the patcher twice yields a byte-identical tree.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use qsdk_schema::{InstallPlan, PatchAction, Version};

/// Patching failures.
#[derive(Error, Debug)]
pub enum PatchError {
    /// A qt install finished without a qmake binary to patch.
    #[error("no qmake binary found under {prefix} (expected bin/qmake or bin/qmake.exe)")]
    QmakeMissing {
        /// The install prefix that was searched.
        prefix: PathBuf,
    },

    /// The new prefix does not fit the binary's fixed-width field.
    #[error(
        "prefix too long for {token} in {path}: field holds {capacity} bytes, need {needed}"
    )]
    FieldOverflow {
        /// The token whose field overflowed.
        token: String,
        /// The file being patched.
        path: PathBuf,
        /// Width of the existing field.
        capacity: usize,
        /// Bytes the new value needs.
        needed: usize,
    },

    /// Filesystem failure while rewriting.
    #[error("io error patching {path}: {source}")]
    Io {
        /// The file being patched.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PatchError + '_ {
    move |source| PatchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// NUL-terminated path tokens embedded in the qmake binary.
const QMAKE_TOKENS: [&[u8]; 3] = [b"qt_prfxpath=", b"qt_epfxpath=", b"qt_hpfxpath="];

/// Applies the patch actions of a finished plan.
#[derive(Debug, Clone, Copy)]
pub struct Patcher;

impl Patcher {
    /// Apply every patch action of a plan and its sub-plans.
    ///
    /// # Errors
    ///
    /// Returns the first [`PatchError`]; missing optional files are logged
    /// and skipped, a missing qmake is fatal.
    pub fn apply_plan(plan: &InstallPlan) -> Result<(), PatchError> {
        for action in &plan.patch_actions {
            Self::apply(action)?;
        }
        for sub in &plan.sub_plans {
            Self::apply_plan(sub)?;
        }
        Ok(())
    }

    /// Apply one action.
    ///
    /// # Errors
    ///
    /// Returns a [`PatchError`] on fatal failures.
    pub fn apply(action: &PatchAction) -> Result<(), PatchError> {
        match action {
            PatchAction::QtPrefix { prefix, version } => patch_qt_prefix(prefix, version),
            PatchAction::MobileHostPrefix {
                prefix,
                desktop_arch_dir,
            } => patch_mobile_host_prefix(prefix, desktop_arch_dir),
        }
    }
}

fn patch_qt_prefix(prefix: &Path, version: &Version) -> Result<(), PatchError> {
    let qmake = ["bin/qmake", "bin/qmake6", "bin/qmake.exe", "bin/qmake6.exe"]
        .iter()
        .map(|rel| prefix.join(rel))
        .find(|p| p.is_file())
        .ok_or_else(|| PatchError::QmakeMissing {
            prefix: prefix.to_path_buf(),
        })?;

    let prefix_str = prefix.to_string_lossy().into_owned();
    patch_embedded_fields(&qmake, &QMAKE_TOKENS, prefix_str.as_bytes())?;
    write_qt_conf(prefix)?;
    patch_qconfig_pri(prefix);
    patch_pkgconfig(prefix, &prefix_str);
    patch_libtool(prefix, &prefix_str);

    // 5.14 moved the prefix lookup out of the core library.
    if version < &Version::new(5, 14, 0) {
        patch_core_library(prefix, prefix_str.as_bytes())?;
    }

    Ok(())
}

/// Rewrite each NUL-terminated token field in a binary, padding the new value
/// with NULs to the original field width.
fn patch_embedded_fields(
    path: &Path,
    tokens: &[&[u8]],
    new_value: &[u8],
) -> Result<(), PatchError> {
    let mut data = std::fs::read(path).map_err(io_err(path))?;
    let mut changed = false;

    for token in tokens {
        match patch_field(&mut data, token, new_value) {
            Ok(did) => changed |= did,
            Err((capacity, needed)) => {
                return Err(PatchError::FieldOverflow {
                    token: String::from_utf8_lossy(token).into_owned(),
                    path: path.to_path_buf(),
                    capacity,
                    needed,
                });
            }
        }
    }

    if changed {
        std::fs::write(path, &data).map_err(io_err(path))?;
        debug!(path = %path.display(), "embedded path fields rewritten");
    }
    Ok(())
}

/// Patch one field in place. `Ok(false)` when the token is absent or already
/// holds the value; `Err((capacity, needed))` when the value does not fit.
fn patch_field(
    data: &mut [u8],
    token: &[u8],
    new_value: &[u8],
) -> Result<bool, (usize, usize)> {
    let Some(pos) = find_subslice(data, token) else {
        return Ok(false);
    };
    let value_start = pos + token.len();
    let Some(nul_rel) = data[value_start..].iter().position(|b| *b == 0) else {
        return Ok(false);
    };
    let capacity = nul_rel;
    let current = &data[value_start..value_start + capacity];
    if current == new_value {
        return Ok(true);
    }
    if new_value.len() > capacity {
        return Err((capacity, new_value.len()));
    }

    data[value_start..value_start + new_value.len()].copy_from_slice(new_value);
    for byte in &mut data[value_start + new_value.len()..value_start + capacity] {
        *byte = 0;
    }
    Ok(true)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn write_qt_conf(prefix: &Path) -> Result<(), PatchError> {
    let path = prefix.join("bin/qt.conf");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(&path))?;
    }
    std::fs::write(&path, "[Paths]\nPrefix=..\n").map_err(io_err(&path))
}

fn patch_qconfig_pri(prefix: &Path) {
    let path = prefix.join("mkspecs/qconfig.pri");
    rewrite_text(&path, |line| {
        if line.starts_with("QT_EDITION") {
            Some("QT_EDITION = OpenSource".to_string())
        } else if line.starts_with("QT_LICHECK") {
            Some("QT_LICHECK =".to_string())
        } else {
            None
        }
    });
}

fn patch_pkgconfig(prefix: &Path, prefix_str: &str) {
    let dir = prefix.join("lib/pkgconfig");
    for path in list_files_with_extension(&dir, "pc") {
        rewrite_text(&path, |line| {
            line.strip_prefix("prefix=")
                .map(|_| format!("prefix={prefix_str}"))
        });
    }
}

fn patch_libtool(prefix: &Path, prefix_str: &str) {
    let dir = prefix.join("lib");
    for path in list_files_with_extension(&dir, "la") {
        rewrite_text(&path, |line| {
            line.strip_prefix("libdir=")
                .map(|_| format!("libdir='{prefix_str}/lib'"))
        });
    }
}

fn patch_core_library(prefix: &Path, new_value: &[u8]) -> Result<(), PatchError> {
    let mut targets: Vec<PathBuf> = Vec::new();
    if let Ok(entries) = std::fs::read_dir(prefix.join("lib")) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with("libQt5Core.so") {
                targets.push(entry.path());
            }
        }
    }
    let framework = prefix.join("lib/QtCore.framework/QtCore");
    if framework.is_file() {
        targets.push(framework);
    }

    for path in targets {
        if path.is_file() {
            patch_embedded_fields(&path, &[b"qt_prfxpath="], new_value)?;
        }
    }
    Ok(())
}

fn patch_mobile_host_prefix(prefix: &Path, desktop_arch_dir: &str) -> Result<(), PatchError> {
    let path = prefix.join("bin/target_qt.conf");
    if !path.is_file() {
        warn!(path = %path.display(), "target_qt.conf missing, skipping");
        return Ok(());
    }
    let mobile_arch_dir = prefix
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    rewrite_text(&path, |line| {
        if line.strip_prefix("HostPrefix=").is_some() {
            Some(format!("HostPrefix=../../{desktop_arch_dir}"))
        } else if line.strip_prefix("HostData=").is_some() {
            // Relative to HostPrefix, back into this target tree.
            Some(format!("HostData=../{mobile_arch_dir}"))
        } else if line.strip_prefix("HostBinaries=").is_some() {
            Some(format!("HostBinaries=../../{desktop_arch_dir}/bin"))
        } else if let Some(old) = line.strip_prefix("HostLibraryExecutables=") {
            // Keep the tail the upstream conf chose (bin on windows,
            // libexec elsewhere).
            let tail = old.rsplit('/').next().filter(|t| !t.is_empty()).unwrap_or("bin");
            Some(format!(
                "HostLibraryExecutables=../../{desktop_arch_dir}/{tail}"
            ))
        } else {
            None
        }
    });
    Ok(())
}

/// Line-oriented idempotent rewrite; missing files are logged and skipped.
fn rewrite_text(path: &Path, replace: impl Fn(&str) -> Option<String>) {
    let Ok(content) = std::fs::read_to_string(path) else {
        warn!(path = %path.display(), "patch target missing, skipping");
        return;
    };
    let mut changed = false;
    let mut lines: Vec<String> = Vec::new();
    for line in content.lines() {
        match replace(line) {
            Some(new_line) => {
                changed |= new_line != line;
                lines.push(new_line);
            }
            None => lines.push(line.to_string()),
        }
    }
    if changed {
        let mut out = lines.join("\n");
        if content.ends_with('\n') {
            out.push('\n');
        }
        if let Err(e) = std::fs::write(path, out) {
            warn!(path = %path.display(), error = %e, "failed to rewrite, skipping");
        } else {
            debug!(path = %path.display(), "rewritten");
        }
    }
}

fn list_files_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .flatten()
        .map(|entry| entry.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == ext))
        .collect();
    files.sort();
    files
}
