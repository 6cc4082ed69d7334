//! The `install-*` command family.

use tokio_util::sync::CancellationToken;
use tracing::info;

use qsdk_core::resolver::Operation;
use qsdk_core::{InstallError, InstallRequest, Installer, Settings};
use qsdk_schema::{Host, Target, TargetKey, VersionSpec};

/// Parameters shared by the install commands after flag parsing.
#[derive(Debug)]
pub struct InstallParams {
    pub settings: Settings,
    pub key: TargetKey,
    pub spec: VersionSpec,
    pub modules: Vec<String>,
    pub archives_subset: Option<Vec<String>>,
    pub no_archives: bool,
    pub auto_desktop: bool,
    pub destination: std::path::PathBuf,
}

/// Run `install-qt`.
pub async fn install_qt(
    params: InstallParams,
    cancel: &CancellationToken,
) -> Result<(), InstallError> {
    let request = InstallRequest {
        operation: Operation::Qt,
        key: params.key,
        spec: params.spec,
        modules: params.modules,
        archives_subset: params.archives_subset,
        no_archives: params.no_archives,
        auto_desktop: params.auto_desktop,
        destination: params.destination,
    };
    run(params.settings, request, cancel).await
}

/// Run `install-src`, `install-doc`, or `install-example`.
pub async fn install_flavor(
    operation: Operation,
    params: InstallParams,
    cancel: &CancellationToken,
) -> Result<(), InstallError> {
    let request = InstallRequest {
        operation,
        key: params.key,
        spec: params.spec,
        modules: params.modules,
        archives_subset: params.archives_subset,
        no_archives: params.no_archives,
        auto_desktop: false,
        destination: params.destination,
    };
    run(params.settings, request, cancel).await
}

/// Run `install-tool`.
pub async fn install_tool(
    settings: Settings,
    host: Host,
    target: Target,
    tool_name: String,
    variant: Option<String>,
    destination: std::path::PathBuf,
    cancel: &CancellationToken,
) -> Result<(), InstallError> {
    let request = InstallRequest {
        operation: Operation::Tool {
            name: tool_name,
            variant,
        },
        key: TargetKey::new(host, target, None, None)?,
        spec: VersionSpec::Latest,
        modules: Vec::new(),
        archives_subset: None,
        no_archives: false,
        auto_desktop: false,
        destination,
    };
    run(settings, request, cancel).await
}

async fn run(
    settings: Settings,
    request: InstallRequest,
    cancel: &CancellationToken,
) -> Result<(), InstallError> {
    let installer =
        Installer::with_reporter(settings, std::sync::Arc::new(crate::reporter::LogReporter))?;
    let plan = installer.install(request, cancel).await?;
    info!(
        archives = plan.archive_count(),
        destination = %plan.destination.display(),
        "install finished"
    );
    Ok(())
}
