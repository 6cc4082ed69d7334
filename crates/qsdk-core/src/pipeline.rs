//! The concurrent download -> verify -> extract engine.
//!
//! A plan's archives are processed by a bounded worker pool: each job runs
//! the full sequence for one archive before taking the next. Digests come
//! from the [`HashStore`] (trusted mirrors only), bytes from whatever mirror
//! the selector offers next. Transport failures and digest mismatches each
//! consume their own mirror budget before the archive -- and with it the plan
//! -- fails.
//!
//! There is no ordering between archives. Each one expands into a private
//! scratch directory first and is then merged into the destination file by
//! file, claiming every path in a shared map; two archives writing the same
//! path surface as [`ExtractError::ConflictingEntry`]. Cancellation stops new
//! jobs at the dequeue point, aborts in-flight downloads, lets extraction
//! finish, and removes incomplete staging files. Partially merged trees are
//! not rolled back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use qsdk_schema::{Archive, InstallPlan};

use crate::error::InstallError;
use crate::extract::{ExtractError, Extractor};
use crate::hashstore::HashStore;
use crate::http::{HttpClient, HttpError};
use crate::mirrors::MirrorSelector;
use crate::reporter::Reporter;
use crate::settings::Settings;

/// Paths already written by some archive of the running plan.
type ClaimMap = Arc<Mutex<HashMap<PathBuf, String>>>;

/// Executes install plans.
#[derive(Debug)]
pub struct Pipeline {
    settings: Arc<Settings>,
    client: Arc<HttpClient>,
    selector: MirrorSelector,
    hashes: Arc<HashStore>,
    extractor: Arc<dyn Extractor>,
    reporter: Arc<dyn Reporter>,
}

impl Pipeline {
    /// Wire a pipeline over the shared components.
    pub fn new(
        settings: Arc<Settings>,
        client: Arc<HttpClient>,
        selector: MirrorSelector,
        hashes: Arc<HashStore>,
        extractor: Arc<dyn Extractor>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            settings,
            client,
            selector,
            hashes,
            extractor,
            reporter,
        }
    }

    /// Run a plan: the parent archive set first, then each sub-plan.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error; remaining in-flight archives are
    /// cancelled and awaited before returning.
    pub async fn run(
        &self,
        plan: &InstallPlan,
        cancel: &CancellationToken,
    ) -> Result<(), InstallError> {
        let mut queue: Vec<&InstallPlan> = vec![plan];
        let mut flat: Vec<&InstallPlan> = Vec::new();
        while let Some(p) = queue.pop() {
            flat.push(p);
            queue.extend(p.sub_plans.iter());
        }
        for p in flat {
            self.run_archives(p, cancel).await?;
        }
        Ok(())
    }

    async fn run_archives(
        &self,
        plan: &InstallPlan,
        cancel: &CancellationToken,
    ) -> Result<(), InstallError> {
        if plan.archives.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(&plan.destination)?;

        // Staging directory for downloaded archives. The temp guard keeps it
        // alive for the run; a configured location persists across runs.
        let mut staging_guard: Option<tempfile::TempDir> = None;
        let staging_dir: PathBuf = match &self.settings.archive_download_location {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                dir.clone()
            }
            // Kept archives without a configured location land next to the
            // install instead of evaporating with a temp dir.
            None if self.settings.always_keep_archives => plan.destination.clone(),
            None => {
                let tmp = tempfile::tempdir()?;
                let path = tmp.path().to_path_buf();
                staging_guard = Some(tmp);
                path
            }
        };

        let claims: ClaimMap = Arc::new(Mutex::new(HashMap::new()));
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency));
        let mut set: JoinSet<Result<(), InstallError>> = JoinSet::new();

        info!(
            archives = plan.archives.len(),
            concurrency = self.settings.concurrency,
            destination = %plan.destination.display(),
            "starting pipeline"
        );

        for archive in plan.archives.clone() {
            if cancel.is_cancelled() {
                break;
            }
            let job = Job {
                settings: self.settings.clone(),
                client: self.client.clone(),
                selector: self.selector.clone(),
                hashes: self.hashes.clone(),
                extractor: self.extractor.clone(),
                reporter: self.reporter.clone(),
                destination: plan.destination.clone(),
                staging_dir: staging_dir.clone(),
                claims: claims.clone(),
                cancel: cancel.clone(),
            };
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| InstallError::Cancelled)?;
                if job.cancel.is_cancelled() {
                    return Err(InstallError::Cancelled);
                }
                job.run(&archive).await
            });
        }

        let mut first_error: Option<InstallError> = None;
        while let Some(joined) = set.join_next().await {
            let result = joined.unwrap_or_else(|e| {
                Err(InstallError::Io(std::io::Error::other(format!(
                    "worker panicked: {e}"
                ))))
            });
            if let Err(e) = result {
                if !matches!(e, InstallError::Cancelled) && first_error.is_none() {
                    warn!(error = %e, "archive failed, cancelling plan");
                    first_error = Some(e);
                }
                cancel.cancel();
            }
        }

        // Incomplete staging files (temp dir case) are removed here.
        drop(staging_guard);

        match first_error {
            Some(e) => Err(e),
            None if cancel.is_cancelled() => Err(InstallError::Cancelled),
            None => Ok(()),
        }
    }
}

/// Everything one worker needs for one archive.
struct Job {
    settings: Arc<Settings>,
    client: Arc<HttpClient>,
    selector: MirrorSelector,
    hashes: Arc<HashStore>,
    extractor: Arc<dyn Extractor>,
    reporter: Arc<dyn Reporter>,
    destination: PathBuf,
    staging_dir: PathBuf,
    claims: ClaimMap,
    cancel: CancellationToken,
}

impl Job {
    fn archive_id(archive: &Archive) -> String {
        format!("{}/{}", archive.package_name, archive.filename)
    }

    async fn run(&self, archive: &Archive) -> Result<(), InstallError> {
        let id = Self::archive_id(archive);
        let verify = !self.settings.insecure_not_for_production_ignore_hash;

        let expected = if verify {
            Some(self.hashes.digest(&archive.url).await?)
        } else {
            warn!(archive = id.as_str(), "hash verification disabled by settings");
            None
        };

        let staging = self.staging_dir.join(&archive.filename);
        self.reporter.downloading(&id, 0, None);
        let (mirror, bytes) = self
            .download_verified(archive, &staging, expected.as_ref())
            .await
            .inspect_err(|e| self.reporter.failed(&id, &e.to_string()))?;
        self.reporter.downloading(&id, bytes, Some(bytes));
        if expected.is_some() {
            self.reporter.verified(&id);
        }
        debug!(archive = id.as_str(), mirror = mirror.as_str(), "verified");

        self.reporter.extracting(&id);
        self.extract_merged(archive, &staging)
            .await
            .inspect_err(|e| self.reporter.failed(&id, &e.to_string()))?;

        if self.settings.always_keep_archives {
            debug!(archive = id.as_str(), staging = %staging.display(), "keeping archive");
        } else {
            let _ = tokio::fs::remove_file(&staging).await;
        }
        self.reporter.installed(&id);
        info!(archive = id.as_str(), "installed");
        Ok(())
    }

    /// Download into `staging`, hashing online, cycling mirrors until the
    /// digest matches or a budget is exhausted.
    async fn download_verified(
        &self,
        archive: &Archive,
        staging: &Path,
        expected: Option<&qsdk_schema::Checksum>,
    ) -> Result<(String, u64), InstallError> {
        let candidates = self.selector.candidates_for_url(&archive.url);
        if candidates.is_empty() {
            return Err(HttpError::AllMirrorsFailed {
                path: archive.url.clone(),
                message: "every mirror is blacklisted".to_string(),
            }
            .into());
        }

        let algorithm = expected.map(|sum| sum.algorithm());
        let mut transport_failures: u32 = 0;
        let mut checksum_failures: u32 = 0;
        let mut index = 0usize;

        loop {
            let candidate = &candidates[index % candidates.len()];
            index += 1;

            let outcome = tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = tokio::fs::remove_file(staging).await;
                    return Err(InstallError::Cancelled);
                }
                res = self.client.download_to(candidate, staging, algorithm) => res,
            };

            match outcome {
                Err(e) => {
                    transport_failures += 1;
                    let _ = tokio::fs::remove_file(staging).await;
                    if transport_failures > self.settings.max_retries_on_connection_error {
                        return Err(e.into());
                    }
                    warn!(mirror = candidate.as_str(), error = %e, "transport failure, next mirror");
                }
                Ok((bytes, actual)) => match (expected, actual) {
                    (Some(want), Some(got)) if got != want.as_str() => {
                        checksum_failures += 1;
                        let _ = tokio::fs::remove_file(staging).await;
                        if checksum_failures > self.settings.max_retries_on_checksum_error {
                            return Err(InstallError::Checksum {
                                archive: Self::archive_id(archive),
                                mirror: candidate.clone(),
                            });
                        }
                        warn!(
                            mirror = candidate.as_str(),
                            "digest mismatch, discarding and trying next mirror"
                        );
                    }
                    _ => return Ok((candidate.clone(), bytes)),
                },
            }
        }
    }

    /// Expand into a private scratch dir, then merge into the destination,
    /// claiming every written path.
    async fn extract_merged(&self, archive: &Archive, staging: &Path) -> Result<(), InstallError> {
        let dest_dir = if archive.target_subdir.is_empty() {
            self.destination.clone()
        } else {
            self.destination.join(&archive.target_subdir)
        };
        std::fs::create_dir_all(&dest_dir)?;

        let extractor = self.extractor.clone();
        let claims = self.claims.clone();
        let id = Self::archive_id(archive);
        let staging = staging.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<(), InstallError> {
            // Scratch lives inside the destination so the merge is a rename,
            // not a copy across filesystems.
            let scratch = tempfile::tempdir_in(&dest_dir)?;
            extractor.extract(&staging, scratch.path())?;
            merge_tree(scratch.path(), &dest_dir, &claims, &id)?;
            Ok(())
        })
        .await
        .map_err(|e| InstallError::Io(std::io::Error::other(format!("extractor panicked: {e}"))))?
    }
}

/// Move every file of `src` under `dst`, registering each target path in the
/// claim map. Directory creation is idempotent; a path claimed by a different
/// archive is a conflict.
fn merge_tree(
    src: &Path,
    dst: &Path,
    claims: &ClaimMap,
    archive_id: &str,
) -> Result<(), ExtractError> {
    for entry in walkdir::WalkDir::new(src).into_iter().flatten() {
        let rel = entry
            .path()
            .strip_prefix(src)
            .expect("walkdir yields children of src");
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|source| ExtractError::Io {
                path: target.clone(),
                source,
            })?;
            continue;
        }

        {
            let mut map = claims.lock().expect("claim map lock");
            if let Some(first) = map.get(&target) {
                if first != archive_id {
                    return Err(ExtractError::ConflictingEntry {
                        path: target,
                        first: first.clone(),
                        second: archive_id.to_string(),
                    });
                }
            }
            map.insert(target.clone(), archive_id.to_string());
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ExtractError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::rename(entry.path(), &target).map_err(|source| ExtractError::Io {
            path: target.clone(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract;
    use crate::hashstore::digest_bytes;
    use crate::testutil::archive_bytes;
    use mockito::{Server, ServerGuard};
    use qsdk_schema::HashAlgorithm;

    fn archive(url: &str) -> Archive {
        Archive {
            package_name: "qt.qt5.5152.gcc_64".into(),
            filename: "qtbase-Linux-X86_64.7z".into(),
            version_token: "5.15.2-0".into(),
            url: url.to_string(),
            target_subdir: String::new(),
        }
    }

    fn settings_for(server: &ServerGuard) -> Settings {
        Settings {
            base_url: server.url(),
            trusted_mirrors: vec![server.url()],
            retry_backoff: 0.01,
            max_retries_on_connection_error: 2,
            ..Settings::default()
        }
    }

    fn pipeline_for(settings: Settings) -> Pipeline {
        let settings = Arc::new(settings);
        let client = Arc::new(HttpClient::new(&settings).unwrap());
        let selector = MirrorSelector::new(&settings);
        let hashes = Arc::new(HashStore::new(&settings, client.clone()));
        let extractor = extract::from_settings(&settings);
        Pipeline::new(
            settings,
            client,
            selector,
            hashes,
            extractor,
            Arc::new(crate::reporter::NullReporter),
        )
    }

    fn plan_with(dest: &Path, archives: Vec<Archive>) -> InstallPlan {
        InstallPlan {
            archives,
            destination: dest.to_path_buf(),
            ..InstallPlan::default()
        }
    }

    #[tokio::test]
    async fn downloads_verifies_and_extracts() {
        let mut server = Server::new_async().await;
        let payload = archive_bytes(&[("5.15.2/gcc_64/bin/qmake", b"qmake-bin" as &[u8])]);
        let digest = digest_bytes(HashAlgorithm::Sha256, &payload);

        let _a = server
            .mock("GET", "/repo/qtbase-Linux-X86_64.7z")
            .with_status(200)
            .with_body(payload.clone())
            .create_async()
            .await;
        let _s = server
            .mock("GET", "/repo/qtbase-Linux-X86_64.7z.sha256")
            .with_status(200)
            .with_body(digest)
            .create_async()
            .await;

        let dest = tempfile::tempdir().unwrap();
        let pipeline = pipeline_for(settings_for(&server));
        let plan = plan_with(
            dest.path(),
            vec![archive(&format!("{}/repo/qtbase-Linux-X86_64.7z", server.url()))],
        );

        pipeline.run(&plan, &CancellationToken::new()).await.unwrap();
        assert_eq!(
            std::fs::read(dest.path().join("5.15.2/gcc_64/bin/qmake")).unwrap(),
            b"qmake-bin"
        );
        // Staging archive was not kept.
        assert!(!dest.path().join("qtbase-Linux-X86_64.7z").exists());
    }

    #[tokio::test]
    async fn tampered_primary_falls_back_to_good_mirror() {
        let mut hostile = Server::new_async().await;
        let mut good = Server::new_async().await;

        let payload = archive_bytes(&[("bin/file", b"real" as &[u8])]);
        let digest = digest_bytes(HashAlgorithm::Sha256, &payload);

        let _bad = hostile
            .mock("GET", "/repo/qtbase-Linux-X86_64.7z")
            .with_status(200)
            .with_body(b"tampered bytes".to_vec())
            .create_async()
            .await;
        // The trusted digest still comes from the hostile base's trusted list
        // -- configured below to the good server.
        let _sum = good
            .mock("GET", "/repo/qtbase-Linux-X86_64.7z.sha256")
            .with_status(200)
            .with_body(digest)
            .create_async()
            .await;
        let _good = good
            .mock("GET", "/repo/qtbase-Linux-X86_64.7z")
            .with_status(200)
            .with_body(payload)
            .create_async()
            .await;

        let settings = Settings {
            base_url: hostile.url(),
            fallback_mirrors: vec![good.url()],
            trusted_mirrors: vec![good.url()],
            retry_backoff: 0.01,
            ..Settings::default()
        };
        let dest = tempfile::tempdir().unwrap();
        let pipeline = pipeline_for(settings);
        let plan = plan_with(
            dest.path(),
            vec![archive(&format!("{}/repo/qtbase-Linux-X86_64.7z", hostile.url()))],
        );

        pipeline.run(&plan, &CancellationToken::new()).await.unwrap();
        assert_eq!(std::fs::read(dest.path().join("bin/file")).unwrap(), b"real");
    }

    #[tokio::test]
    async fn persistent_tampering_fails_without_extracting() {
        let mut server = Server::new_async().await;
        let real = archive_bytes(&[("bin/file", b"real" as &[u8])]);
        let digest = digest_bytes(HashAlgorithm::Sha256, &real);

        let _bad = server
            .mock("GET", "/repo/qtbase-Linux-X86_64.7z")
            .with_status(200)
            .with_body(b"tampered".to_vec())
            .create_async()
            .await;
        let _sum = server
            .mock("GET", "/repo/qtbase-Linux-X86_64.7z.sha256")
            .with_status(200)
            .with_body(digest)
            .create_async()
            .await;

        let dest = tempfile::tempdir().unwrap();
        let pipeline = pipeline_for(settings_for(&server));
        let plan = plan_with(
            dest.path(),
            vec![archive(&format!("{}/repo/qtbase-Linux-X86_64.7z", server.url()))],
        );

        let err = pipeline
            .run(&plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Checksum { .. }));
        assert!(!dest.path().join("bin/file").exists());
    }

    #[tokio::test]
    async fn mirror_503_falls_back() {
        let mut dead = Server::new_async().await;
        let mut live = Server::new_async().await;

        let payload = archive_bytes(&[("bin/tool", b"tool" as &[u8])]);
        let digest = digest_bytes(HashAlgorithm::Sha256, &payload);

        let _d = dead
            .mock("GET", "/repo/qtbase-Linux-X86_64.7z")
            .with_status(503)
            .create_async()
            .await;
        let _l = live
            .mock("GET", "/repo/qtbase-Linux-X86_64.7z")
            .with_status(200)
            .with_body(payload)
            .create_async()
            .await;
        let _s = live
            .mock("GET", "/repo/qtbase-Linux-X86_64.7z.sha256")
            .with_status(200)
            .with_body(digest)
            .create_async()
            .await;

        let settings = Settings {
            base_url: dead.url(),
            fallback_mirrors: vec![live.url()],
            trusted_mirrors: vec![live.url()],
            retry_backoff: 0.01,
            max_retries_on_connection_error: 2,
            ..Settings::default()
        };
        let dest = tempfile::tempdir().unwrap();
        let pipeline = pipeline_for(settings);
        let plan = plan_with(
            dest.path(),
            vec![archive(&format!("{}/repo/qtbase-Linux-X86_64.7z", dead.url()))],
        );

        pipeline.run(&plan, &CancellationToken::new()).await.unwrap();
        assert_eq!(std::fs::read(dest.path().join("bin/tool")).unwrap(), b"tool");
    }

    #[tokio::test]
    async fn conflicting_archives_surface() {
        let mut server = Server::new_async().await;
        let a = archive_bytes(&[("shared/path.txt", b"from-a" as &[u8])]);
        let b = archive_bytes(&[("shared/path.txt", b"from-b" as &[u8])]);

        let mut mocks = Vec::new();
        for (name, payload) in [("a", a), ("b", b)] {
            let digest = digest_bytes(HashAlgorithm::Sha256, &payload);
            mocks.push(
                server
                    .mock("GET", format!("/repo/{name}.7z").as_str())
                    .with_status(200)
                    .with_body(payload)
                    .create_async()
                    .await,
            );
            mocks.push(
                server
                    .mock("GET", format!("/repo/{name}.7z.sha256").as_str())
                    .with_status(200)
                    .with_body(digest)
                    .create_async()
                    .await,
            );
        }

        let dest = tempfile::tempdir().unwrap();
        let mut settings = settings_for(&server);
        settings.concurrency = 1; // deterministic: a then b
        let pipeline = pipeline_for(settings);

        let mk = |name: &str| Archive {
            package_name: format!("pkg.{name}"),
            filename: format!("{name}.7z"),
            version_token: "1-0".into(),
            url: format!("{}/repo/{name}.7z", server.url()),
            target_subdir: String::new(),
        };
        let plan = plan_with(dest.path(), vec![mk("a"), mk("b")]);

        let err = pipeline
            .run(&plan, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            InstallError::Extract(ExtractError::ConflictingEntry { .. })
        ));
    }

    #[tokio::test]
    async fn keep_archives_retains_staging_file() {
        let mut server = Server::new_async().await;
        let payload = archive_bytes(&[("bin/x", b"x" as &[u8])]);
        let digest = digest_bytes(HashAlgorithm::Sha256, &payload);

        let _a = server
            .mock("GET", "/repo/qtbase-Linux-X86_64.7z")
            .with_status(200)
            .with_body(payload)
            .create_async()
            .await;
        let _s = server
            .mock("GET", "/repo/qtbase-Linux-X86_64.7z.sha256")
            .with_status(200)
            .with_body(digest)
            .create_async()
            .await;

        let dest = tempfile::tempdir().unwrap();
        let keep_dir = tempfile::tempdir().unwrap();
        let mut settings = settings_for(&server);
        settings.always_keep_archives = true;
        settings.archive_download_location = Some(keep_dir.path().to_path_buf());
        let pipeline = pipeline_for(settings);

        let plan = plan_with(
            dest.path(),
            vec![archive(&format!("{}/repo/qtbase-Linux-X86_64.7z", server.url()))],
        );
        pipeline.run(&plan, &CancellationToken::new()).await.unwrap();
        assert!(keep_dir.path().join("qtbase-Linux-X86_64.7z").is_file());
    }

    #[tokio::test]
    async fn ignore_hash_skips_sidecar_entirely() {
        let mut server = Server::new_async().await;
        let payload = archive_bytes(&[("bin/x", b"x" as &[u8])]);

        let _a = server
            .mock("GET", "/repo/qtbase-Linux-X86_64.7z")
            .with_status(200)
            .with_body(payload)
            .create_async()
            .await;
        let sidecar = server
            .mock("GET", "/repo/qtbase-Linux-X86_64.7z.sha256")
            .expect(0)
            .create_async()
            .await;

        let mut settings = settings_for(&server);
        settings.insecure_not_for_production_ignore_hash = true;
        let dest = tempfile::tempdir().unwrap();
        let pipeline = pipeline_for(settings);

        let plan = plan_with(
            dest.path(),
            vec![archive(&format!("{}/repo/qtbase-Linux-X86_64.7z", server.url()))],
        );
        pipeline.run(&plan, &CancellationToken::new()).await.unwrap();
        sidecar.assert_async().await;
    }

    #[tokio::test]
    async fn reports_lifecycle_events_in_order() {
        let mut server = Server::new_async().await;
        let payload = archive_bytes(&[("bin/x", b"x" as &[u8])]);
        let digest = digest_bytes(HashAlgorithm::Sha256, &payload);

        let _a = server
            .mock("GET", "/repo/qtbase-Linux-X86_64.7z")
            .with_status(200)
            .with_body(payload)
            .create_async()
            .await;
        let _s = server
            .mock("GET", "/repo/qtbase-Linux-X86_64.7z.sha256")
            .with_status(200)
            .with_body(digest)
            .create_async()
            .await;

        let recorder = Arc::new(crate::reporter::recording::RecordingReporter::default());
        let settings = Arc::new(settings_for(&server));
        let client = Arc::new(HttpClient::new(&settings).unwrap());
        let selector = MirrorSelector::new(&settings);
        let hashes = Arc::new(HashStore::new(&settings, client.clone()));
        let extractor = extract::from_settings(&settings);
        let pipeline = Pipeline::new(
            settings,
            client,
            selector,
            hashes,
            extractor,
            recorder.clone(),
        );

        let dest = tempfile::tempdir().unwrap();
        let plan = plan_with(
            dest.path(),
            vec![archive(&format!("{}/repo/qtbase-Linux-X86_64.7z", server.url()))],
        );
        pipeline.run(&plan, &CancellationToken::new()).await.unwrap();

        let id = "qt.qt5.5152.gcc_64/qtbase-Linux-X86_64.7z";
        assert_eq!(
            recorder.snapshot(),
            vec![
                format!("downloading:{id}"),
                format!("verified:{id}"),
                format!("extracting:{id}"),
                format!("installed:{id}"),
            ]
        );
    }

    /// Counts concurrent extractions so the pool bound is observable.
    #[derive(Debug)]
    struct CountingExtractor {
        current: std::sync::atomic::AtomicUsize,
        peak: std::sync::atomic::AtomicUsize,
    }

    impl Extractor for CountingExtractor {
        fn extract(&self, _archive: &Path, out_dir: &Path) -> Result<(), ExtractError> {
            use std::sync::atomic::Ordering;
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(30));
            std::fs::create_dir_all(out_dir.join("x")).map_err(|source| ExtractError::Io {
                path: out_dir.to_path_buf(),
                source,
            })?;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn no_more_archives_in_flight_than_concurrency() {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", mockito::Matcher::Regex(r"^/repo/.*\.7z$".to_string()))
            .with_status(200)
            .with_body(b"irrelevant".to_vec())
            .create_async()
            .await;

        let mut settings = settings_for(&server);
        settings.concurrency = 2;
        settings.insecure_not_for_production_ignore_hash = true;

        let extractor = Arc::new(CountingExtractor {
            current: std::sync::atomic::AtomicUsize::new(0),
            peak: std::sync::atomic::AtomicUsize::new(0),
        });
        let shared = Arc::new(settings);
        let client = Arc::new(HttpClient::new(&shared).unwrap());
        let selector = MirrorSelector::new(&shared);
        let hashes = Arc::new(HashStore::new(&shared, client.clone()));
        let dyn_extractor: Arc<dyn Extractor> = extractor.clone();
        let pipeline = Pipeline::new(
            shared,
            client,
            selector,
            hashes,
            dyn_extractor,
            Arc::new(crate::reporter::NullReporter),
        );

        let dest = tempfile::tempdir().unwrap();
        let archives = (0..6)
            .map(|i| Archive {
                package_name: format!("pkg.{i}"),
                filename: format!("{i}.7z"),
                version_token: "1-0".into(),
                url: format!("{}/repo/{i}.7z", server.url()),
                target_subdir: format!("sub{i}"),
            })
            .collect();
        let plan = plan_with(dest.path(), archives);

        pipeline.run(&plan, &CancellationToken::new()).await.unwrap();
        assert!(extractor.peak.load(std::sync::atomic::Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_downloading() {
        let mut server = Server::new_async().await;
        let never = server
            .mock("GET", "/repo/qtbase-Linux-X86_64.7z")
            .expect(0)
            .create_async()
            .await;

        let dest = tempfile::tempdir().unwrap();
        let mut settings = settings_for(&server);
        settings.insecure_not_for_production_ignore_hash = true;
        let pipeline = pipeline_for(settings);
        let plan = plan_with(
            dest.path(),
            vec![archive(&format!("{}/repo/qtbase-Linux-X86_64.7z", server.url()))],
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pipeline.run(&plan, &cancel).await.unwrap_err();
        assert!(matches!(err, InstallError::Cancelled));
        never.assert_async().await;
    }
}
