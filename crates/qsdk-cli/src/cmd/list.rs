//! The `list-*` command family. Output is one entry per line, scriptable.

use qsdk_core::{InstallError, Installer, Settings};
use qsdk_schema::{Host, Target, TargetKey, VersionSpec};

/// Run `list-qt` in one of its modes.
pub async fn list_qt(
    settings: Settings,
    host: Host,
    target: Target,
    spec_filter: Option<String>,
    arch_of: Option<String>,
    modules_of: Option<Vec<String>>,
    archives_of: Option<Vec<String>>,
) -> Result<(), InstallError> {
    let installer = Installer::new(settings)?;

    if let Some(args) = archives_of {
        // VERSION ARCH [MODULE...]
        let spec = VersionSpec::parse(&args[0])?;
        let key = TargetKey::new(host, target, Some(args[1].clone()), None)?;
        let names = installer.list_qt_archives(&key, &spec, &args[2..]).await?;
        print_lines(&names);
        return Ok(());
    }

    if let Some(args) = modules_of {
        // VERSION ARCH
        let spec = VersionSpec::parse(&args[0])?;
        let key = TargetKey::new(host, target, Some(args[1].clone()), None)?;
        let names = installer.list_qt_modules(&key, &spec).await?;
        print_lines(&names);
        return Ok(());
    }

    if let Some(version) = arch_of {
        let spec = VersionSpec::parse(&version)?;
        let key = TargetKey::new(host, target, None, None)?;
        let names = installer.list_qt_arches(&key, &spec).await?;
        print_lines(&names);
        return Ok(());
    }

    let key = TargetKey::new(host, target, None, None)?;
    let mut versions = installer.list_qt_versions(&key).await?;
    if let Some(filter) = spec_filter {
        let spec = VersionSpec::parse(&filter)?;
        versions.retain(|v| spec.matches(v));
    }
    for version in versions {
        println!("{version}");
    }
    Ok(())
}

/// Run `list-tool`: tool folders, or one tool's variant packages.
pub async fn list_tool(
    settings: Settings,
    host: Host,
    target: Target,
    tool_name: Option<String>,
) -> Result<(), InstallError> {
    let installer = Installer::new(settings)?;
    let key = TargetKey::new(host, target, None, None)?;
    let names = match tool_name {
        Some(tool) => installer.list_tool_variants(&key, &tool).await?,
        None => installer.list_tools(&key).await?,
    };
    print_lines(&names);
    Ok(())
}

/// Run `list-src`, `list-doc`, or `list-example`.
pub async fn list_flavor(
    settings: Settings,
    host: Host,
    version: String,
    flavor: &str,
) -> Result<(), InstallError> {
    let installer = Installer::new(settings)?;
    let spec = VersionSpec::parse(&version)?;
    let key = TargetKey::new(host, Target::Desktop, None, None)?;
    let names = installer.list_flavor_modules(&key, &spec, flavor).await?;
    print_lines(&names);
    Ok(())
}

fn print_lines(names: &[String]) {
    for name in names {
        println!("{name}");
    }
}
