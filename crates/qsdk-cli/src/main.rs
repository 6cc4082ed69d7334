//! qsdk - headless installer for the Qt SDK.

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use qsdk_cli::cmd;
use qsdk_cli::{exit_code, target_key, version_spec, Cli, Commands};
use qsdk_core::resolver::Operation;
use qsdk_core::InstallError;
use qsdk_schema::Target;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // One cancellation signal for the whole run; Ctrl-C trips it and the
    // pipeline drains in-flight work before exiting.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    if let Err(e) = run(cli, &cancel).await {
        tracing::error!("{e}");
        std::process::exit(exit_code(&e));
    }
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<(), InstallError> {
    match cli.command {
        Commands::InstallQt {
            host,
            target,
            version,
            arch,
            modules,
            archives,
            noarchives,
            autodesktop,
            extension,
            common,
        } => {
            let settings = common.settings().map_err(InstallError::from)?;
            cmd::install::install_qt(
                cmd::install::InstallParams {
                    settings,
                    key: target_key(host, target, arch, extension)?,
                    spec: version_spec(&version)?,
                    modules,
                    archives_subset: archives,
                    no_archives: noarchives,
                    auto_desktop: autodesktop,
                    destination: common.outputdir,
                },
                cancel,
            )
            .await
        }

        Commands::InstallSrc {
            host,
            version,
            modules,
            archives,
            common,
        } => {
            install_flavor(Operation::Src, host, version, modules, archives, common, cancel).await
        }
        Commands::InstallDoc {
            host,
            version,
            modules,
            archives,
            common,
        } => {
            install_flavor(Operation::Doc, host, version, modules, archives, common, cancel).await
        }
        Commands::InstallExample {
            host,
            version,
            modules,
            archives,
            common,
        } => {
            install_flavor(
                Operation::Example,
                host,
                version,
                modules,
                archives,
                common,
                cancel,
            )
            .await
        }

        Commands::InstallTool {
            host,
            target,
            tool_name,
            variant,
            common,
        } => {
            let settings = common.settings().map_err(InstallError::from)?;
            cmd::install::install_tool(
                settings,
                host,
                target,
                tool_name,
                variant,
                common.outputdir,
                cancel,
            )
            .await
        }

        Commands::ListQt {
            host,
            target,
            spec,
            arch,
            modules,
            archives,
            common,
        } => {
            let settings = common.settings().map_err(InstallError::from)?;
            cmd::list::list_qt(settings, host, target, spec, arch, modules, archives).await
        }

        Commands::ListTool {
            host,
            target,
            tool_name,
            common,
        } => {
            let settings = common.settings().map_err(InstallError::from)?;
            cmd::list::list_tool(settings, host, target, tool_name).await
        }

        Commands::ListSrc {
            host,
            version,
            common,
        } => {
            let settings = common.settings().map_err(InstallError::from)?;
            cmd::list::list_flavor(settings, host, version, "src").await
        }
        Commands::ListDoc {
            host,
            version,
            common,
        } => {
            let settings = common.settings().map_err(InstallError::from)?;
            cmd::list::list_flavor(settings, host, version, "doc").await
        }
        Commands::ListExample {
            host,
            version,
            common,
        } => {
            let settings = common.settings().map_err(InstallError::from)?;
            cmd::list::list_flavor(settings, host, version, "examples").await
        }

        Commands::Completions { shell } => {
            qsdk_cli::completions(shell);
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn install_flavor(
    operation: Operation,
    host: qsdk_schema::Host,
    version: String,
    modules: Vec<String>,
    archives: Option<Vec<String>>,
    common: qsdk_cli::CommonOpts,
    cancel: &CancellationToken,
) -> Result<(), InstallError> {
    let settings = common.settings().map_err(InstallError::from)?;
    cmd::install::install_flavor(
        operation,
        cmd::install::InstallParams {
            settings,
            key: target_key(host, Target::Desktop, None, None)?,
            spec: version_spec(&version)?,
            modules,
            archives_subset: archives,
            no_archives: false,
            auto_desktop: false,
            destination: common.outputdir,
        },
        cancel,
    )
    .await
}

