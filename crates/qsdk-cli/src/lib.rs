//! qsdk - headless installer for the Qt SDK
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Command-line surface over `qsdk-core`. The operation names and their
//! parameters reach the resolver verbatim; this crate only parses arguments,
//! loads the settings file, overlays CLI flags onto it, and maps errors to
//! exit codes.
//!
//! There is intentionally no flag for skipping hash verification: that
//! setting is only honored from the settings file, under its long and
//! alarming key name.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use qsdk_core::{ErrorClass, InstallError, Settings, SettingsError};
use qsdk_schema::{Host, Target, TargetKey, VersionSpec};

pub mod cmd;
pub mod reporter;

/// Exit codes by failure class: 0 success, then one code per class.
pub fn exit_code(error: &InstallError) -> i32 {
    match error.class() {
        ErrorClass::Input => 1,
        ErrorClass::Network => 2,
        ErrorClass::Checksum => 3,
        ErrorClass::Extract => 4,
        ErrorClass::Patch => 5,
        ErrorClass::Cancelled => 130,
    }
}

/// Headless, scriptable installer for the Qt SDK.
#[derive(Parser, Debug)]
#[command(name = "qsdk", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level operations.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Install a prebuilt Qt for a host/target/arch.
    InstallQt {
        /// Host operating system: linux, mac, or windows.
        host: Host,
        /// Device family: desktop, android, ios, or winrt.
        target: Target,
        /// Version or specifier ("5.15.2", "5.12", ">=6.2,<6.5", "latest").
        version: String,
        /// Compiler/ABI architecture (e.g. gcc_64, win64_mingw81).
        arch: Option<String>,
        /// Module short names to add; "all" selects every module.
        #[arg(short, long, num_args = 1.., value_name = "MODULE")]
        modules: Vec<String>,
        /// Restrict base (and debug_info) archives to these names.
        #[arg(long, num_args = 1.., value_name = "ARCHIVE")]
        archives: Option<Vec<String>>,
        /// Do not install the base package's archives, only modules.
        #[arg(long)]
        noarchives: bool,
        /// For mobile targets, also install the host desktop tooling.
        #[arg(long)]
        autodesktop: bool,
        /// Folder extension qualifier (e.g. wasm_singlethread).
        #[arg(long)]
        extension: Option<String>,
        #[command(flatten)]
        common: CommonOpts,
    },

    /// Install the source archives of a release.
    InstallSrc {
        host: Host,
        /// Version or specifier.
        version: String,
        #[arg(short, long, num_args = 1.., value_name = "MODULE")]
        modules: Vec<String>,
        #[arg(long, num_args = 1.., value_name = "ARCHIVE")]
        archives: Option<Vec<String>>,
        #[command(flatten)]
        common: CommonOpts,
    },

    /// Install the documentation archives of a release.
    InstallDoc {
        host: Host,
        version: String,
        #[arg(short, long, num_args = 1.., value_name = "MODULE")]
        modules: Vec<String>,
        #[arg(long, num_args = 1.., value_name = "ARCHIVE")]
        archives: Option<Vec<String>>,
        #[command(flatten)]
        common: CommonOpts,
    },

    /// Install the example archives of a release.
    InstallExample {
        host: Host,
        version: String,
        #[arg(short, long, num_args = 1.., value_name = "MODULE")]
        modules: Vec<String>,
        #[arg(long, num_args = 1.., value_name = "ARCHIVE")]
        archives: Option<Vec<String>>,
        #[command(flatten)]
        common: CommonOpts,
    },

    /// Install a standalone tool (installer framework, ninja, ...).
    InstallTool {
        host: Host,
        target: Target,
        /// Tool folder name (e.g. ifw, or tools_ifw).
        tool_name: String,
        /// Specific variant package; omitted installs every variant.
        variant: Option<String>,
        #[command(flatten)]
        common: CommonOpts,
    },

    /// List versions, arches, modules, or archives for a target.
    ListQt {
        host: Host,
        target: Target,
        /// Filter listed versions by a specifier.
        #[arg(long)]
        spec: Option<String>,
        /// List the arches of this version instead of versions.
        #[arg(long, value_name = "VERSION")]
        arch: Option<String>,
        /// List module short names: VERSION ARCH.
        #[arg(long, num_args = 2, value_names = ["VERSION", "ARCH"])]
        modules: Option<Vec<String>>,
        /// List archive names: VERSION ARCH [MODULE...].
        #[arg(long, num_args = 2.., value_names = ["VERSION", "ARCH"])]
        archives: Option<Vec<String>>,
        #[command(flatten)]
        common: CommonOpts,
    },

    /// List tool folders, or the variants of one tool.
    ListTool {
        host: Host,
        target: Target,
        /// Tool folder to list variants of.
        tool_name: Option<String>,
        #[command(flatten)]
        common: CommonOpts,
    },

    /// List source module names for a release.
    ListSrc {
        host: Host,
        version: String,
        #[command(flatten)]
        common: CommonOpts,
    },

    /// List documentation module names for a release.
    ListDoc {
        host: Host,
        version: String,
        #[command(flatten)]
        common: CommonOpts,
    },

    /// List example module names for a release.
    ListExample {
        host: Host,
        version: String,
        #[command(flatten)]
        common: CommonOpts,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: clap_complete::Shell,
    },
}

/// Print completions for the given shell to stdout.
pub fn completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
}

/// Flags shared by every operation.
#[derive(Args, Debug, Clone)]
pub struct CommonOpts {
    /// Output directory for installs.
    #[arg(short = 'O', long, default_value = ".")]
    pub outputdir: PathBuf,

    /// Mirror base URL to prefer over the upstream origin.
    #[arg(short = 'b', long)]
    pub base: Option<String>,

    /// Settings file path (default: the user config dir).
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Keep downloaded archives after extraction.
    #[arg(short = 'k', long)]
    pub keep: bool,

    /// Directory to download archives into (implies a stable location).
    #[arg(short = 'd', long)]
    pub archive_dest: Option<PathBuf>,

    /// External 7z command for extraction.
    #[arg(short = 'E', long)]
    pub external: Option<String>,

    /// Per-attempt connect/response timeout in seconds.
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Number of archives processed in parallel.
    #[arg(long)]
    pub concurrency: Option<usize>,
}

impl CommonOpts {
    /// Load the settings file and overlay these flags onto it.
    pub fn settings(&self) -> Result<Settings, SettingsError> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(default_settings_path);
        let mut settings = Settings::load(&path)?;

        if let Some(base) = &self.base {
            settings.base_url = base.clone();
        }
        if self.keep {
            settings.always_keep_archives = true;
        }
        if let Some(dest) = &self.archive_dest {
            settings.archive_download_location = Some(dest.clone());
            settings.always_keep_archives = true;
        }
        if let Some(command) = &self.external {
            settings.external_extractor = Some(command.clone());
        }
        if let Some(seconds) = self.timeout {
            settings.connection_timeout = std::time::Duration::from_secs_f64(seconds);
            settings.response_timeout = std::time::Duration::from_secs_f64(seconds);
        }
        if let Some(n) = self.concurrency {
            settings.concurrency = n.max(1);
        }
        Ok(settings)
    }
}

/// The default settings file location.
pub fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("qsdk")
        .join("settings.toml")
}

/// Build a validated target key from CLI arguments.
pub fn target_key(
    host: Host,
    target: Target,
    arch: Option<String>,
    extension: Option<String>,
) -> Result<TargetKey, InstallError> {
    TargetKey::new(host, target, arch, extension).map_err(InstallError::from)
}

/// Parse a version argument into a specifier.
pub fn version_spec(text: &str) -> Result<VersionSpec, InstallError> {
    VersionSpec::parse(text).map_err(InstallError::from)
}
