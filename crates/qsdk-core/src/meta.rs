//! Remote repository metadata: directory listings and `Updates.xml`.
//!
//! Directory indexes are public-mirror HTML and vary subtly between mirrors,
//! so link extraction lives in one small, fixture-tested function. The XML
//! descriptor is parsed with a pull parser that resolves no DTDs and no
//! external entities, and every descriptor is verified against a digest from
//! a trusted mirror before parsing (unless verification is disabled in the
//! settings file).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use quick_xml::events::Event;
use quick_xml::Reader;
use scraper::{Html, Selector};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use qsdk_schema::{FolderName, PackageUpdate, TargetKey, UpdatesDoc, Version};

use crate::error::InstallError;
use crate::hashstore::{digest_bytes, HashStore};
use crate::http::HttpClient;
use crate::mirrors::{join_url, MirrorSelector};
use crate::settings::Settings;

/// Fetches and parses repository metadata, memoized per run.
#[derive(Debug)]
pub struct MetaIndex {
    client: Arc<HttpClient>,
    selector: MirrorSelector,
    hashes: Arc<HashStore>,
    ignore_hash: bool,
    cache: Mutex<HashMap<String, Arc<UpdatesDoc>>>,
}

impl MetaIndex {
    /// Wire an index over the shared client, selector, and hash store.
    pub fn new(
        settings: &Settings,
        client: Arc<HttpClient>,
        selector: MirrorSelector,
        hashes: Arc<HashStore>,
    ) -> Self {
        Self {
            client,
            selector,
            hashes,
            ignore_hash: settings.insecure_not_for_production_ignore_hash,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// List the entries of a remote directory.
    ///
    /// # Errors
    ///
    /// Returns a network error when no mirror serves the listing.
    pub async fn list_folder(&self, path: &str) -> Result<Vec<String>, InstallError> {
        let listing_path = format!("{}/", path.trim_end_matches('/'));
        let (_, bytes) = self.selector.fetch(&self.client, &listing_path).await?;
        let html = String::from_utf8_lossy(&bytes);
        Ok(parse_directory_index(&html))
    }

    /// Discover the Qt versions published for a target, sorted ascending.
    ///
    /// # Errors
    ///
    /// Returns a network error when no mirror serves the listing.
    pub async fn list_qt_versions(&self, key: &TargetKey) -> Result<Vec<Version>, InstallError> {
        let entries = self.list_folder(&key.repo_path()).await?;
        let mut versions: Vec<Version> = entries
            .iter()
            .filter_map(|name| FolderName::parse_version(name))
            .collect();
        versions.sort();
        versions.dedup();
        Ok(versions)
    }

    /// Folder names (`qt6_620_armv7`, ...) published for a coded version,
    /// used to enumerate accepted arches when one is required.
    ///
    /// # Errors
    ///
    /// Returns a network error when no mirror serves the listing.
    pub async fn list_version_folders(
        &self,
        key: &TargetKey,
        version: &Version,
    ) -> Result<Vec<String>, InstallError> {
        let entries = self.list_folder(&key.repo_path()).await?;
        let code = version.folder_code();
        Ok(entries
            .into_iter()
            .filter(|name| {
                FolderName::parse_version(name).as_ref() == Some(version)
                    || name.contains(&format!("_{code}_"))
            })
            .collect())
    }

    /// Tool folder names (`tools_ifw`, ...) published for a target.
    ///
    /// # Errors
    ///
    /// Returns a network error when no mirror serves the listing.
    pub async fn list_tools(&self, key: &TargetKey) -> Result<Vec<String>, InstallError> {
        let entries = self.list_folder(&key.repo_path()).await?;
        Ok(entries
            .into_iter()
            .filter(|name| name.starts_with("tools_"))
            .collect())
    }

    /// Fetch, verify, and parse a folder's `Updates.xml`.
    ///
    /// Documents are cached for the run. Packages with no downloadable
    /// archives are dropped here.
    ///
    /// # Errors
    ///
    /// Returns a network error, a checksum failure against the trusted
    /// digest, or [`InstallError::UpdatesParse`] with the failure position.
    pub async fn fetch_updates(
        &self,
        repo_path: &str,
        folder: &FolderName,
    ) -> Result<Arc<UpdatesDoc>, InstallError> {
        let rel = format!("{repo_path}/{folder}/Updates.xml");
        if let Some(doc) = self.cache.lock().await.get(&rel) {
            return Ok(doc.clone());
        }

        let (base, bytes) = self.selector.fetch(&self.client, &rel).await?;

        if self.ignore_hash {
            warn!(path = rel.as_str(), "hash verification disabled by settings");
        } else {
            let canonical = join_url(self.selector.base_url(), &rel);
            let expected = self.hashes.digest(&canonical).await?;
            let actual = digest_bytes(expected.algorithm(), &bytes);
            if actual != expected.as_str() {
                return Err(InstallError::Checksum {
                    archive: rel,
                    mirror: base,
                });
            }
        }

        let xml = String::from_utf8_lossy(&bytes);
        let doc = Arc::new(parse_updates(folder.as_str(), &xml)?);
        debug!(path = rel.as_str(), packages = doc.packages.len(), "descriptor parsed");
        self.cache.lock().await.insert(rel, doc.clone());
        Ok(doc)
    }
}

/// Extract sibling entry names from a directory-index page.
///
/// Keeps hyperlinks that point to a plain child entry; parent navigation,
/// anchors, query links, and absolute URLs are dropped. Duplicates collapse
/// in order-preserving fashion.
pub fn parse_directory_index(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let anchors = Selector::parse("a[href]").expect("static selector");

    let mut seen = Vec::new();
    for element in document.select(&anchors) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        if href.starts_with('?')
            || href.starts_with('#')
            || href.starts_with('/')
            || href.contains("://")
        {
            continue;
        }
        let name = href.trim_end_matches('/');
        if name.is_empty() || name == ".." || name == "." || name.contains('/') {
            continue;
        }
        if !seen.iter().any(|s| s == name) {
            seen.push(name.to_string());
        }
    }
    seen
}

/// Parse an `Updates.xml` document, preserving package order.
///
/// Unknown elements are ignored; a package without `Name` or `Version` is a
/// hard error carrying the line/column; packages listing no archives are
/// skipped.
///
/// # Errors
///
/// Returns [`InstallError::UpdatesParse`] on malformed XML or missing
/// required fields.
pub fn parse_updates(folder: &str, xml: &str) -> Result<UpdatesDoc, InstallError> {
    let mut reader = Reader::from_str(xml);
    let mut doc = UpdatesDoc::default();
    let mut current: Option<PackageUpdate> = None;
    let mut field: Option<String> = None;

    let parse_err = |xml: &str, pos: usize, message: String| {
        let (line, column) = line_col(xml, pos);
        InstallError::UpdatesParse {
            folder: folder.to_string(),
            line,
            column,
            message,
        }
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"PackageUpdate" => {
                    current = Some(PackageUpdate::default());
                    field = None;
                }
                b"UpdateFile" => {
                    if let Some(pkg) = current.as_mut() {
                        read_update_file_attrs(&e, pkg);
                    }
                }
                other => {
                    if current.is_some() {
                        field = Some(String::from_utf8_lossy(other).into_owned());
                    }
                }
            },
            Ok(Event::Empty(e)) => {
                if e.name().as_ref() == b"UpdateFile" {
                    if let Some(pkg) = current.as_mut() {
                        read_update_file_attrs(&e, pkg);
                    }
                }
                // An empty field element (e.g. <DownloadableArchives/>)
                // simply contributes nothing.
            }
            Ok(Event::Text(t)) => {
                if let (Some(pkg), Some(name)) = (current.as_mut(), field.as_deref()) {
                    let text = t
                        .unescape()
                        .map_err(|e| {
                            parse_err(xml, reader.buffer_position(), e.to_string())
                        })?;
                    assign_field(pkg, name, text.trim());
                }
            }
            Ok(Event::CData(t)) => {
                if let (Some(pkg), Some(name)) = (current.as_mut(), field.as_deref()) {
                    let text = String::from_utf8_lossy(&t.into_inner()).into_owned();
                    assign_field(pkg, name, text.trim());
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"PackageUpdate" => {
                    let pkg = current.take().unwrap_or_default();
                    if pkg.name.is_empty() || pkg.version.is_empty() {
                        return Err(parse_err(
                            xml,
                            reader.buffer_position(),
                            "PackageUpdate missing Name or Version".to_string(),
                        ));
                    }
                    if pkg.downloadable_archives.is_empty() {
                        debug!(package = pkg.name.as_str(), "skipping package with no archives");
                    } else {
                        doc.packages.push(pkg);
                    }
                }
                _ => field = None,
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(parse_err(xml, reader.buffer_position(), e.to_string()));
            }
        }
    }

    Ok(doc)
}

fn read_update_file_attrs(e: &quick_xml::events::BytesStart<'_>, pkg: &mut PackageUpdate) {
    for attr in e.attributes().flatten() {
        let value = attr.unescape_value().unwrap_or_default();
        match attr.key.as_ref() {
            b"CompressedSize" => pkg.compressed_size = value.parse().unwrap_or(0),
            b"UncompressedSize" => pkg.uncompressed_size = value.parse().unwrap_or(0),
            _ => {}
        }
    }
}

fn assign_field(pkg: &mut PackageUpdate, field: &str, text: &str) {
    if text.is_empty() {
        return;
    }
    match field {
        "Name" => pkg.name = text.to_string(),
        "Version" => pkg.version = text.to_string(),
        "ReleaseDate" => pkg.release_date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok(),
        "DisplayName" => pkg.display_name = text.to_string(),
        "Description" => pkg.description = text.to_string(),
        "DownloadableArchives" => {
            pkg.downloadable_archives = split_list(text);
        }
        "Dependencies" => {
            pkg.dependencies = split_list(text);
        }
        _ => {}
    }
}

fn split_list(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn line_col(xml: &str, pos: usize) -> (usize, usize) {
    let pos = pos.min(xml.len());
    let prefix = &xml[..pos];
    let line = prefix.bytes().filter(|b| *b == b'\n').count() + 1;
    let column = prefix
        .rfind('\n')
        .map_or(pos + 1, |nl| pos - nl);
    (line, column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use qsdk_schema::{Host, Target};

    const UPDATES_XML: &str = r#"<Updates>
 <ApplicationName>{AnyApplication}</ApplicationName>
 <ApplicationVersion>1.0.0</ApplicationVersion>
 <PackageUpdate>
  <Name>qt.qt5.5152.gcc_64</Name>
  <DisplayName>Desktop gcc 64-bit</DisplayName>
  <Description>Qt 5.15.2 Prebuilt Components for gcc 64-bit</Description>
  <ReleaseDate>2020-11-13</ReleaseDate>
  <Version>5.15.2-0-202011130607</Version>
  <DownloadableArchives>qtbase-Linux-RHEL_7_6-GCC-Linux-RHEL_7_6-X86_64.7z, qtsvg-Linux-RHEL_7_6-GCC-Linux-RHEL_7_6-X86_64.7z</DownloadableArchives>
  <Dependencies>qt.qt5.5152.doc</Dependencies>
  <UpdateFile CompressedSize="200000" UncompressedSize="600000"/>
 </PackageUpdate>
 <PackageUpdate>
  <Name>qt.qt5.5152.qtcharts.gcc_64</Name>
  <DisplayName>Qt Charts</DisplayName>
  <Version>5.15.2-0-202011130607</Version>
  <DownloadableArchives>qtcharts-Linux-RHEL_7_6-GCC-Linux-RHEL_7_6-X86_64.7z</DownloadableArchives>
  <UpdateFile CompressedSize="4000" UncompressedSize="12000"/>
 </PackageUpdate>
 <PackageUpdate>
  <Name>qt.qt5.5152.empty_meta</Name>
  <Version>5.15.2-0-202011130607</Version>
  <DownloadableArchives></DownloadableArchives>
 </PackageUpdate>
</Updates>"#;

    #[test]
    fn parse_updates_preserves_order_and_fields() {
        let doc = parse_updates("qt5_5152", UPDATES_XML).unwrap();
        assert_eq!(doc.packages.len(), 2);

        let base = &doc.packages[0];
        assert_eq!(base.name, "qt.qt5.5152.gcc_64");
        assert_eq!(base.version, "5.15.2-0-202011130607");
        assert_eq!(base.downloadable_archives.len(), 2);
        assert_eq!(base.dependencies, vec!["qt.qt5.5152.doc".to_string()]);
        assert_eq!(base.compressed_size, 200_000);
        assert_eq!(base.uncompressed_size, 600_000);
        assert_eq!(
            base.release_date,
            NaiveDate::from_ymd_opt(2020, 11, 13)
        );

        assert_eq!(doc.packages[1].name, "qt.qt5.5152.qtcharts.gcc_64");
    }

    #[test]
    fn parse_updates_skips_archiveless_packages() {
        let doc = parse_updates("qt5_5152", UPDATES_XML).unwrap();
        assert!(doc.find("qt.qt5.5152.empty_meta").is_none());
    }

    #[test]
    fn parse_updates_requires_name_and_version() {
        let xml = "<Updates><PackageUpdate><Name>x</Name></PackageUpdate></Updates>";
        let err = parse_updates("f", xml).unwrap_err();
        match err {
            InstallError::UpdatesParse { line, column, .. } => {
                assert_eq!(line, 1);
                assert!(column > 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parse_updates_rejects_malformed_xml() {
        let err = parse_updates("f", "<Updates><PackageUpdate>").unwrap_err();
        assert!(matches!(err, InstallError::UpdatesParse { .. }));
    }

    #[test]
    fn directory_index_extracts_sibling_links() {
        // Layout seen on the upstream origin.
        let html = r#"<html><body><table>
            <tr><td><a href="../">Parent Directory</a></td></tr>
            <tr><td><a href="qt5_5152/">qt5_5152/</a></td></tr>
            <tr><td><a href="qt5_5152_src_doc_examples/">qt5_5152_src_doc_examples/</a></td></tr>
            <tr><td><a href="tools_ifw/">tools_ifw/</a></td></tr>
            <tr><td><a href="?C=N;O=D">Name</a></td></tr>
            <tr><td><a href="https://other.example.com/abs">abs</a></td></tr>
            <tr><td><a href="qt5_5152/">qt5_5152/</a></td></tr>
        </table></body></html>"#;
        assert_eq!(
            parse_directory_index(html),
            vec![
                "qt5_5152".to_string(),
                "qt5_5152_src_doc_examples".to_string(),
                "tools_ifw".to_string(),
            ]
        );
    }

    #[test]
    fn directory_index_tolerates_minimal_mirror_layout() {
        // Some mirrors render a bare <pre> list.
        let html = r#"<pre><a href="..">..</a>
<a href="qt6_620">qt6_620</a>
<a href="qt6_620_armv7">qt6_620_armv7</a></pre>"#;
        assert_eq!(
            parse_directory_index(html),
            vec!["qt6_620".to_string(), "qt6_620_armv7".to_string()]
        );
    }

    fn test_settings(base: &str) -> Settings {
        Settings {
            base_url: base.to_string(),
            trusted_mirrors: vec![base.to_string()],
            retry_backoff: 0.01,
            max_retries_on_connection_error: 0,
            ..Settings::default()
        }
    }

    fn index_for(settings: &Settings) -> MetaIndex {
        let client = Arc::new(HttpClient::new(settings).unwrap());
        let selector = MirrorSelector::new(settings);
        let hashes = Arc::new(HashStore::new(settings, client.clone()));
        MetaIndex::new(settings, client, selector, hashes)
    }

    #[tokio::test]
    async fn list_qt_versions_sorted_and_stable() {
        let mut server = Server::new_async().await;
        let html = r#"<a href="qt5_5152/">x</a><a href="qt5_5129/">x</a><a href="qt6_620/">x</a><a href="tools_ifw/">x</a>"#;
        let _m = server
            .mock("GET", "/online/qtsdkrepository/linux_x64/desktop/")
            .with_status(200)
            .with_body(html)
            .expect(2)
            .create_async()
            .await;

        let settings = test_settings(&server.url());
        let index = index_for(&settings);
        let key = TargetKey::new(Host::Linux, Target::Desktop, None, None).unwrap();

        let first = index.list_qt_versions(&key).await.unwrap();
        let second = index.list_qt_versions(&key).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first,
            vec![
                "5.12.9".parse().unwrap(),
                "5.15.2".parse().unwrap(),
                "6.2.0".parse().unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn fetch_updates_verifies_against_trusted_digest() {
        let mut server = Server::new_async().await;
        let digest = digest_bytes(qsdk_schema::HashAlgorithm::Sha256, UPDATES_XML.as_bytes());
        let _xml = server
            .mock("GET", "/online/qtsdkrepository/linux_x64/desktop/qt5_5152/Updates.xml")
            .with_status(200)
            .with_body(UPDATES_XML)
            .expect(1)
            .create_async()
            .await;
        let _sum = server
            .mock(
                "GET",
                "/online/qtsdkrepository/linux_x64/desktop/qt5_5152/Updates.xml.sha256",
            )
            .with_status(200)
            .with_body(digest)
            .create_async()
            .await;

        let settings = test_settings(&server.url());
        let index = index_for(&settings);

        let doc = index
            .fetch_updates(
                "online/qtsdkrepository/linux_x64/desktop",
                &FolderName::from_raw("qt5_5152"),
            )
            .await
            .unwrap();
        assert_eq!(doc.packages.len(), 2);

        // Second call is served from the cache (expect(1) above).
        let again = index
            .fetch_updates(
                "online/qtsdkrepository/linux_x64/desktop",
                &FolderName::from_raw("qt5_5152"),
            )
            .await
            .unwrap();
        assert_eq!(again.packages.len(), 2);
    }

    #[tokio::test]
    async fn fetch_updates_rejects_tampered_descriptor() {
        let mut server = Server::new_async().await;
        let _xml = server
            .mock("GET", "/online/qtsdkrepository/linux_x64/desktop/qt5_5152/Updates.xml")
            .with_status(200)
            .with_body("<Updates>tampered</Updates>")
            .create_async()
            .await;
        let _sum = server
            .mock(
                "GET",
                "/online/qtsdkrepository/linux_x64/desktop/qt5_5152/Updates.xml.sha256",
            )
            .with_status(200)
            .with_body("d".repeat(64))
            .create_async()
            .await;

        let settings = test_settings(&server.url());
        let index = index_for(&settings);
        let err = index
            .fetch_updates(
                "online/qtsdkrepository/linux_x64/desktop",
                &FolderName::from_raw("qt5_5152"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Checksum { .. }));
    }

    #[test]
    fn line_col_math() {
        assert_eq!(line_col("abc", 1), (1, 2));
        assert_eq!(line_col("a\nbc", 2), (2, 1));
        assert_eq!(line_col("a\nbc", 3), (2, 2));
    }
}
