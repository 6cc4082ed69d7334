//! The facade gluing resolver -> pipeline -> patcher.
//!
//! One [`Installer`] owns the shared components for a run (client, mirror
//! selector, hash store, metadata index, pipeline) and exposes the top-level
//! operations the CLI maps onto: the `install-*` family and the `list-*`
//! queries. Request parameters reach the resolver verbatim.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use qsdk_schema::{FolderName, InstallPlan, PackageName, Target, TargetKey, Version, VersionSpec};

use crate::error::InstallError;
use crate::extract;
use crate::hashstore::HashStore;
use crate::http::HttpClient;
use crate::meta::MetaIndex;
use crate::mirrors::MirrorSelector;
use crate::patcher::Patcher;
use crate::pipeline::Pipeline;
use crate::reporter::{NullReporter, Reporter};
use crate::resolver::{InstallRequest, Resolver};
use crate::settings::Settings;

/// Entry point for every top-level operation.
#[derive(Debug)]
pub struct Installer {
    settings: Arc<Settings>,
    meta: Arc<MetaIndex>,
    pipeline: Pipeline,
    reporter: Arc<dyn Reporter>,
}

impl Installer {
    /// Wire the component graph for one run, reporting nowhere.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be constructed.
    pub fn new(settings: Settings) -> Result<Self, InstallError> {
        Self::with_reporter(settings, Arc::new(NullReporter))
    }

    /// Wire the component graph with a progress reporter.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be constructed.
    pub fn with_reporter(
        settings: Settings,
        reporter: Arc<dyn Reporter>,
    ) -> Result<Self, InstallError> {
        let settings = Arc::new(settings);
        let client = Arc::new(HttpClient::new(&settings)?);
        let selector = MirrorSelector::new(&settings);
        let hashes = Arc::new(HashStore::new(&settings, client.clone()));
        let meta = Arc::new(MetaIndex::new(
            &settings,
            client.clone(),
            selector.clone(),
            hashes.clone(),
        ));
        let extractor = extract::from_settings(&settings);
        let pipeline = Pipeline::new(
            settings.clone(),
            client,
            selector,
            hashes,
            extractor,
            reporter.clone(),
        );
        Ok(Self {
            settings,
            meta,
            pipeline,
            reporter,
        })
    }

    /// The run's immutable settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Resolve, download, extract, and patch one request.
    ///
    /// Returns the executed plan so callers can report what was installed.
    ///
    /// # Errors
    ///
    /// Surfaces the first fatal [`InstallError`]; a partial install is left
    /// on disk for inspection and re-running.
    pub async fn install(
        &self,
        req: InstallRequest,
        cancel: &CancellationToken,
    ) -> Result<InstallPlan, InstallError> {
        self.reporter.section("resolving");
        let resolver = Resolver::new(&self.meta, &self.settings);
        let plan = resolver.resolve(&req).await?;
        info!(archives = plan.archive_count(), "install plan ready");
        self.reporter.section("installing");
        self.pipeline.run(&plan, cancel).await?;
        self.reporter.section("patching");
        Patcher::apply_plan(&plan)?;
        Ok(plan)
    }

    /// Versions published for a target, ascending.
    ///
    /// # Errors
    ///
    /// Propagates metadata fetch failures.
    pub async fn list_qt_versions(&self, key: &TargetKey) -> Result<Vec<Version>, InstallError> {
        self.meta.list_qt_versions(key).await
    }

    /// Arches published for the version matching `spec`.
    ///
    /// # Errors
    ///
    /// Propagates metadata fetch failures and `NoVersion`.
    pub async fn list_qt_arches(
        &self,
        key: &TargetKey,
        spec: &VersionSpec,
    ) -> Result<Vec<String>, InstallError> {
        let resolver = Resolver::new(&self.meta, &self.settings);
        resolver.list_arches(key, spec).await
    }

    /// Module short names for the version matching `spec`. The key must
    /// carry an arch.
    ///
    /// # Errors
    ///
    /// Propagates metadata fetch failures, `NoVersion`, and `ArchRequired`.
    pub async fn list_qt_modules(
        &self,
        key: &TargetKey,
        spec: &VersionSpec,
    ) -> Result<Vec<String>, InstallError> {
        let resolver = Resolver::new(&self.meta, &self.settings);
        resolver.list_modules(key, spec).await
    }

    /// Archive short names of the base package (plus named modules).
    ///
    /// # Errors
    ///
    /// Propagates metadata fetch failures, `NoVersion`, and `NoModule`.
    pub async fn list_qt_archives(
        &self,
        key: &TargetKey,
        spec: &VersionSpec,
        modules: &[String],
    ) -> Result<Vec<String>, InstallError> {
        let resolver = Resolver::new(&self.meta, &self.settings);
        resolver.list_archives(key, spec, modules).await
    }

    /// Tool folder names for a target.
    ///
    /// # Errors
    ///
    /// Propagates metadata fetch failures.
    pub async fn list_tools(&self, key: &TargetKey) -> Result<Vec<String>, InstallError> {
        self.meta.list_tools(key).await
    }

    /// Variant package names inside one tool folder.
    ///
    /// # Errors
    ///
    /// Propagates metadata fetch failures.
    pub async fn list_tool_variants(
        &self,
        key: &TargetKey,
        tool_name: &str,
    ) -> Result<Vec<String>, InstallError> {
        let folder = FolderName::tool(tool_name);
        let doc = self.meta.fetch_updates(&key.repo_path(), &folder).await?;
        Ok(doc.packages.iter().map(|p| p.name.clone()).collect())
    }

    /// Module short names of a src/doc/examples descriptor.
    ///
    /// # Errors
    ///
    /// Propagates metadata fetch failures and `NoVersion`.
    pub async fn list_flavor_modules(
        &self,
        key: &TargetKey,
        spec: &VersionSpec,
        flavor: &str,
    ) -> Result<Vec<String>, InstallError> {
        let desktop_key = TargetKey::new(key.host, Target::Desktop, None, None)?;
        let resolver = Resolver::new(&self.meta, &self.settings);
        let version = resolver.resolve_version(&desktop_key, spec).await?;
        let folder = FolderName::src_doc_examples(&version);
        let doc = self
            .meta
            .fetch_updates(&desktop_key.repo_path(), &folder)
            .await?;
        Ok(doc
            .packages
            .iter()
            .filter_map(|p| PackageName::parse(&p.name).flavor_module(flavor))
            .collect())
    }
}
