//! Turns user intent into a concrete install plan.
//!
//! Resolution is two-phase: the async half talks to the [`MetaIndex`]
//! (version discovery, descriptor fetches), and the planning half is pure
//! functions over an [`UpdatesDoc`] so that, for a fixed descriptor and
//! request, the emitted plan is deterministic -- same archive set, same
//! order after dedup.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::debug;

use qsdk_schema::package::DEBUG_INFO_MODULE;
use qsdk_schema::target::TargetError;
use qsdk_schema::{
    Archive, FolderName, Host, InstallPlan, PackageName, PackageUpdate, PatchAction, Target,
    TargetKey, UpdatesDoc, Version, VersionSpec,
};

use crate::error::InstallError;
use crate::meta::MetaIndex;
use crate::mirrors::join_url;
use crate::settings::Settings;

/// The top-level operation a request maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Install a prebuilt Qt (base package plus modules).
    Qt,
    /// Install the source archives.
    Src,
    /// Install the documentation archives.
    Doc,
    /// Install the example archives.
    Example,
    /// Install a standalone tool folder.
    Tool {
        /// Tool folder name (`ifw`, `tools_ifw`, ...).
        name: String,
        /// Specific variant package; `None` installs every variant.
        variant: Option<String>,
    },
}

impl Operation {
    /// The descriptor name segment for source/doc/example operations.
    fn flavor(&self) -> Option<&'static str> {
        match self {
            Self::Src => Some("src"),
            Self::Doc => Some("doc"),
            Self::Example => Some("examples"),
            Self::Qt | Self::Tool { .. } => None,
        }
    }
}

/// Everything the resolver needs to know about one request.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    /// What to install.
    pub operation: Operation,
    /// Which repository subtree to draw from.
    pub key: TargetKey,
    /// Which version (or range) to install.
    pub spec: VersionSpec,
    /// Module short names; the literal `all` selects every module.
    pub modules: Vec<String>,
    /// Restrict emitted archives to these short names.
    pub archives_subset: Option<Vec<String>>,
    /// Suppress the base package's archives entirely.
    pub no_archives: bool,
    /// For mobile installs, also install the host desktop tooling.
    pub auto_desktop: bool,
    /// Root output directory.
    pub destination: PathBuf,
}

impl InstallRequest {
    /// A plain `install-qt` request with defaults for the optional knobs.
    pub fn qt(key: TargetKey, spec: VersionSpec, destination: PathBuf) -> Self {
        Self {
            operation: Operation::Qt,
            key,
            spec,
            modules: Vec::new(),
            archives_subset: None,
            no_archives: false,
            auto_desktop: false,
            destination,
        }
    }
}

/// Computes install plans by consulting the metadata index.
#[derive(Debug)]
pub struct Resolver<'a> {
    meta: &'a MetaIndex,
    settings: &'a Settings,
}

impl<'a> Resolver<'a> {
    /// Borrow the shared index and settings.
    pub fn new(meta: &'a MetaIndex, settings: &'a Settings) -> Self {
        Self { meta, settings }
    }

    /// Resolve a request into an install plan.
    ///
    /// # Errors
    ///
    /// Surfaces input errors (`NoVersion`, `ArchRequired`, `NoModule`,
    /// `NoToolVariant`) with suggestions, plus any metadata fetch failure.
    pub async fn resolve(&self, req: &InstallRequest) -> Result<InstallPlan, InstallError> {
        match &req.operation {
            Operation::Qt => self.resolve_qt(req).await,
            Operation::Src | Operation::Doc | Operation::Example => {
                self.resolve_flavor(req).await
            }
            Operation::Tool { name, variant } => {
                self.resolve_tool(req, name, variant.as_deref()).await
            }
        }
    }

    /// Pick the highest version satisfying the request's specifier.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::NoVersion`] when nothing matches.
    pub async fn resolve_version(
        &self,
        key: &TargetKey,
        spec: &VersionSpec,
    ) -> Result<Version, InstallError> {
        let versions = self.meta.list_qt_versions(key).await?;
        spec.select_highest(&versions)
            .cloned()
            .ok_or_else(|| InstallError::NoVersion {
                spec: spec.to_string(),
                available: versions.iter().map(ToString::to_string).collect(),
            })
    }

    /// Arches published for the version matching `spec`.
    ///
    /// For layouts where the arch is part of the folder name (Qt >= 6
    /// mobile), the answer comes from the sibling folder names; otherwise
    /// from the descriptor's base packages.
    ///
    /// # Errors
    ///
    /// Propagates `NoVersion` and metadata fetch failures.
    pub async fn list_arches(
        &self,
        key: &TargetKey,
        spec: &VersionSpec,
    ) -> Result<Vec<String>, InstallError> {
        let version = self.resolve_version(key, spec).await?;
        match FolderName::derive(key, &version) {
            Ok(folder) => {
                let doc = self.meta.fetch_updates(&key.repo_path(), &folder).await?;
                Ok(doc.arches())
            }
            Err(TargetError::ArchRequired { .. }) => {
                self.available_mobile_arches(key, &version).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Module short names for the version matching `spec`; the key must
    /// carry an arch.
    ///
    /// # Errors
    ///
    /// Returns `ArchRequired` when the key has no arch, plus `NoVersion` and
    /// fetch failures.
    pub async fn list_modules(
        &self,
        key: &TargetKey,
        spec: &VersionSpec,
    ) -> Result<Vec<String>, InstallError> {
        let (doc, arch, _, _) = self.qt_descriptor(key, spec).await?;
        Ok(doc.module_shorts(&arch))
    }

    /// Archive short names of the base package plus any named modules.
    ///
    /// # Errors
    ///
    /// Returns `NoModule` for unknown module names, plus the errors of
    /// [`Self::list_modules`].
    pub async fn list_archives(
        &self,
        key: &TargetKey,
        spec: &VersionSpec,
        modules: &[String],
    ) -> Result<Vec<String>, InstallError> {
        let (doc, arch, folder, _) = self.qt_descriptor(key, spec).await?;
        let base = doc
            .base_package(&arch)
            .ok_or_else(|| InstallError::NoPackage {
                folder: folder.as_str().to_string(),
                arch: arch.clone(),
                available: doc.arches(),
            })?;

        let mut out: Vec<String> = Vec::new();
        let mut push_shorts = |pkg: &PackageUpdate| {
            for filename in &pkg.downloadable_archives {
                let short = filename.split('-').next().unwrap_or(filename).to_string();
                if !out.contains(&short) {
                    out.push(short);
                }
            }
        };
        push_shorts(base);
        for short in modules {
            let pkg = doc.find_module(short, &arch).ok_or_else(|| {
                InstallError::NoModule {
                    requested: short.clone(),
                    available: doc.module_shorts(&arch),
                }
            })?;
            push_shorts(pkg);
        }
        Ok(out)
    }

    /// Fetch the descriptor for a qt request, insisting on an arch.
    async fn qt_descriptor(
        &self,
        key: &TargetKey,
        spec: &VersionSpec,
    ) -> Result<(std::sync::Arc<UpdatesDoc>, String, FolderName, Version), InstallError> {
        let version = self.resolve_version(key, spec).await?;
        let folder = match FolderName::derive(key, &version) {
            Ok(folder) => folder,
            Err(TargetError::ArchRequired { target, version }) => {
                let available = self.available_mobile_arches(key, &version).await?;
                return Err(InstallError::ArchRequired {
                    target,
                    version,
                    available,
                });
            }
            Err(e) => return Err(e.into()),
        };
        let doc = self.meta.fetch_updates(&key.repo_path(), &folder).await?;
        let arch = key.arch.clone().ok_or_else(|| InstallError::ArchRequired {
            target: key.target,
            version: version.clone(),
            available: doc.arches(),
        })?;
        Ok((doc, arch, folder, version))
    }

    async fn resolve_qt(&self, req: &InstallRequest) -> Result<InstallPlan, InstallError> {
        let (doc, arch, folder, version) = self.qt_descriptor(&req.key, &req.spec).await?;
        let repo = req.key.repo_path();

        let ctx = QtPlanContext {
            base_url: &self.settings.base_url,
            min_module_size: self.settings.min_module_size,
            repo: &repo,
            folder: &folder,
            doc: &*doc,
            arch: &arch,
            version: &version,
        };
        let mut plan = plan_qt(&ctx, req)?;

        if req.auto_desktop && req.key.target.is_mobile() {
            let sub = self.plan_host_desktop(req, &version, &arch).await?;
            plan.sub_plans.push(sub);
        }

        debug!(archives = plan.archive_count(), "plan resolved");
        Ok(plan)
    }

    /// The minimal desktop tooling install backing a mobile target.
    async fn plan_host_desktop(
        &self,
        req: &InstallRequest,
        version: &Version,
        mobile_arch: &str,
    ) -> Result<InstallPlan, InstallError> {
        let host = Host::current();
        let desktop_key = TargetKey::new(host, Target::Desktop, None, None)?;
        let folder = FolderName::derive(&desktop_key, version)?;
        let repo = desktop_key.repo_path();
        let doc = self.meta.fetch_updates(&repo, &folder).await?;

        let desktop_arch = match host {
            Host::Linux => "gcc_64".to_string(),
            Host::Mac => "clang_64".to_string(),
            Host::Windows => doc
                .arches()
                .into_iter()
                .filter(|a| a.contains("mingw"))
                .max()
                .ok_or_else(|| InstallError::NoPackage {
                    folder: folder.as_str().to_string(),
                    arch: "win64_mingw*".to_string(),
                    available: doc.arches(),
                })?,
        };

        let mut subset = vec!["qtbase".to_string()];
        if version.major() >= 6 {
            // Qt 6 host tooling additionally needs the declarative tools.
            subset.push("qtdeclarative".to_string());
        }

        let sub_req = InstallRequest {
            operation: Operation::Qt,
            key: TargetKey::new(host, Target::Desktop, Some(desktop_arch.clone()), None)?,
            spec: VersionSpec::Exact(version.clone()),
            modules: Vec::new(),
            archives_subset: Some(subset),
            no_archives: false,
            auto_desktop: false,
            destination: req.destination.clone(),
        };
        let ctx = QtPlanContext {
            base_url: &self.settings.base_url,
            min_module_size: self.settings.min_module_size,
            repo: &repo,
            folder: &folder,
            doc: &*doc,
            arch: &desktop_arch,
            version,
        };
        let mut sub = plan_qt(&ctx, &sub_req)?;

        // The mobile tree's target_qt.conf must point at this desktop install.
        sub.patch_actions.push(PatchAction::MobileHostPrefix {
            prefix: req
                .destination
                .join(version.to_string())
                .join(mobile_arch),
            desktop_arch_dir: desktop_arch,
        });
        Ok(sub)
    }

    async fn resolve_flavor(&self, req: &InstallRequest) -> Result<InstallPlan, InstallError> {
        let flavor = req
            .operation
            .flavor()
            .expect("resolve_flavor called for flavor operations only");
        let desktop_key = TargetKey::new(req.key.host, Target::Desktop, None, None)?;
        let version = self.resolve_version(&desktop_key, &req.spec).await?;
        let folder = FolderName::src_doc_examples(&version);
        let repo = desktop_key.repo_path();
        let doc = self.meta.fetch_updates(&repo, &folder).await?;

        let mut plan = InstallPlan {
            destination: req.destination.clone(),
            ..InstallPlan::default()
        };

        let base = doc
            .packages
            .iter()
            .find(|p| PackageName::parse(&p.name).is_flavor_base(flavor))
            .ok_or_else(|| InstallError::NoPackage {
                folder: folder.as_str().to_string(),
                arch: flavor.to_string(),
                available: doc.packages.iter().map(|p| p.name.clone()).collect(),
            })?;

        if !req.no_archives {
            emit_package(
                &mut plan,
                &self.settings.base_url,
                &repo,
                &folder,
                base,
                req.archives_subset.as_deref(),
            );
        }

        let available: Vec<String> = doc
            .packages
            .iter()
            .filter_map(|p| PackageName::parse(&p.name).flavor_module(flavor))
            .collect();

        if req.modules.iter().any(|m| m == "all") {
            for pkg in &doc.packages {
                if PackageName::parse(&pkg.name).flavor_module(flavor).is_some() {
                    emit_package(
                        &mut plan,
                        &self.settings.base_url,
                        &repo,
                        &folder,
                        pkg,
                        req.archives_subset.as_deref(),
                    );
                }
            }
        } else {
            for short in &req.modules {
                let pkg = doc
                    .packages
                    .iter()
                    .find(|p| {
                        PackageName::parse(&p.name).flavor_module(flavor).as_deref()
                            == Some(short.as_str())
                    })
                    .ok_or_else(|| InstallError::NoModule {
                        requested: short.clone(),
                        available: available.clone(),
                    })?;
                emit_package(
                    &mut plan,
                    &self.settings.base_url,
                    &repo,
                    &folder,
                    pkg,
                    req.archives_subset.as_deref(),
                );
            }
        }

        Ok(plan)
    }

    async fn resolve_tool(
        &self,
        req: &InstallRequest,
        name: &str,
        variant: Option<&str>,
    ) -> Result<InstallPlan, InstallError> {
        let folder = FolderName::tool(name);
        let repo = req.key.repo_path();
        let doc = self.meta.fetch_updates(&repo, &folder).await?;

        let mut plan = InstallPlan {
            destination: req.destination.clone(),
            ..InstallPlan::default()
        };

        let selected: Vec<&PackageUpdate> = match variant {
            Some(v) => {
                let pkg = doc
                    .find(v)
                    .or_else(|| {
                        doc.packages
                            .iter()
                            .find(|p| p.name.ends_with(&format!(".{v}")))
                    })
                    .ok_or_else(|| InstallError::NoToolVariant {
                        requested: v.to_string(),
                        available: doc.packages.iter().map(|p| p.name.clone()).collect(),
                    })?;
                vec![pkg]
            }
            None => doc.packages.iter().collect(),
        };

        for pkg in selected {
            emit_package(
                &mut plan,
                &self.settings.base_url,
                &repo,
                &folder,
                pkg,
                req.archives_subset.as_deref(),
            );
        }

        Ok(plan)
    }

    /// Arches accepted for a Qt >= 6 mobile folder, read off the sibling
    /// folder names (`qt6_620_armv7` -> `android_armv7`).
    async fn available_mobile_arches(
        &self,
        key: &TargetKey,
        version: &Version,
    ) -> Result<Vec<String>, InstallError> {
        let folders = self.meta.list_version_folders(key, version).await?;
        let prefix = format!("qt{}_{}_", version.major(), version.folder_code());
        let mut arches = Vec::new();
        for name in folders {
            if let Some(suffix) = name.strip_prefix(&prefix) {
                let arch = match key.target {
                    Target::Android => format!("android_{suffix}"),
                    _ => suffix.to_string(),
                };
                if !arches.contains(&arch) {
                    arches.push(arch);
                }
            }
        }
        Ok(arches)
    }
}

/// Inputs the pure planning half needs for one descriptor.
struct QtPlanContext<'a> {
    base_url: &'a str,
    min_module_size: u64,
    repo: &'a str,
    folder: &'a FolderName,
    doc: &'a UpdatesDoc,
    arch: &'a str,
    version: &'a Version,
}

/// The deterministic planning core for `install-qt`.
///
/// Emission order is base, then modules in user-supplied order, then
/// dependency waves in descriptor order; dedup key is
/// `(package, archive filename)`.
fn plan_qt(ctx: &QtPlanContext<'_>, req: &InstallRequest) -> Result<InstallPlan, InstallError> {
    let base = ctx
        .doc
        .base_package(ctx.arch)
        .ok_or_else(|| InstallError::NoPackage {
            folder: ctx.folder.as_str().to_string(),
            arch: ctx.arch.to_string(),
            available: ctx.doc.arches(),
        })?;

    let mut plan = InstallPlan {
        destination: req.destination.clone(),
        ..InstallPlan::default()
    };
    let mut emitted: HashSet<String> = HashSet::new();

    if !req.no_archives {
        emit_package(
            &mut plan,
            ctx.base_url,
            ctx.repo,
            ctx.folder,
            base,
            req.archives_subset.as_deref(),
        );
    }
    emitted.insert(base.name.clone());

    // Modules, in the order the user named them. `all` expands to every
    // module the descriptor offers, minus placeholder packages smaller than
    // the configured threshold.
    let mut selected: Vec<&PackageUpdate> = Vec::new();
    if req.modules.iter().any(|m| m == "all") {
        for short in ctx.doc.module_shorts(ctx.arch) {
            let pkg = ctx
                .doc
                .find_module(&short, ctx.arch)
                .expect("short name came from this descriptor");
            if pkg.uncompressed_size >= ctx.min_module_size {
                selected.push(pkg);
            } else {
                debug!(
                    module = short.as_str(),
                    size = pkg.uncompressed_size,
                    "skipping placeholder module"
                );
            }
        }
    } else {
        for short in &req.modules {
            let pkg = ctx.doc.find_module(short, ctx.arch).ok_or_else(|| {
                InstallError::NoModule {
                    requested: short.clone(),
                    available: ctx.doc.module_shorts(ctx.arch),
                }
            })?;
            selected.push(pkg);
        }
    }

    for pkg in &selected {
        emit_module(&mut plan, ctx, pkg, req.archives_subset.as_deref());
        emitted.insert(pkg.name.clone());
    }

    // Transitive dependency closure, wave by wave in descriptor order.
    // Self-references and redundant edges are tolerated via the emitted set;
    // names not present in this descriptor (cross-folder dependencies) are
    // not part of a qt plan.
    let mut frontier: Vec<String> = base
        .dependencies
        .iter()
        .chain(selected.iter().flat_map(|p| p.dependencies.iter()))
        .cloned()
        .collect();

    while !frontier.is_empty() {
        let mut wave: Vec<&PackageUpdate> = Vec::new();
        for pkg in &ctx.doc.packages {
            if frontier.contains(&pkg.name)
                && !emitted.contains(&pkg.name)
                && PackageName::parse(&pkg.name).module_short(ctx.arch).is_some()
            {
                wave.push(pkg);
            }
        }
        frontier.clear();
        for pkg in wave {
            emit_module(&mut plan, ctx, pkg, req.archives_subset.as_deref());
            emitted.insert(pkg.name.clone());
            frontier.extend(pkg.dependencies.iter().cloned());
        }
    }

    if req.operation == Operation::Qt && !req.no_archives {
        plan.patch_actions.push(PatchAction::QtPrefix {
            prefix: req
                .destination
                .join(ctx.version.to_string())
                .join(ctx.arch),
            version: ctx.version.clone(),
        });
    }

    Ok(plan)
}

/// Emit a module's archives. `debug_info` shares archive names with the base
/// package, so the archive subset filter applies to it as well.
fn emit_module(
    plan: &mut InstallPlan,
    ctx: &QtPlanContext<'_>,
    pkg: &PackageUpdate,
    subset: Option<&[String]>,
) {
    let is_debug_info = PackageName::parse(&pkg.name)
        .module_short(ctx.arch)
        .is_some_and(|s| s == DEBUG_INFO_MODULE);
    let effective = if is_debug_info { subset } else { None };
    emit_package(plan, ctx.base_url, ctx.repo, ctx.folder, pkg, effective);
}

fn emit_package(
    plan: &mut InstallPlan,
    base_url: &str,
    repo: &str,
    folder: &FolderName,
    pkg: &PackageUpdate,
    subset: Option<&[String]>,
) {
    for filename in &pkg.downloadable_archives {
        let short = filename.split('-').next().unwrap_or(filename);
        if let Some(wanted) = subset {
            if !wanted.iter().any(|w| w == short) {
                continue;
            }
        }
        let rel = format!("{repo}/{folder}/{}/{}{}", pkg.name, pkg.version, filename);
        plan.push_archive(Archive {
            package_name: pkg.name.clone(),
            filename: filename.clone(),
            version_token: pkg.version.clone(),
            url: join_url(base_url, &rel),
            target_subdir: String::new(),
        });
    }
}
