//! Fixture helpers shared by unit tests.

use std::path::Path;

/// Build a small 7z archive containing the given `(relative path, content)`
/// entries.
pub(crate) fn write_7z(dest: &Path, files: &[(&str, &[u8])]) {
    let staging = tempfile::tempdir().unwrap();
    for (name, content) in files {
        let path = staging.path().join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
    }
    sevenz_rust::compress_to_path(staging.path(), dest).unwrap();
}

/// Render a 7z archive's bytes in memory.
pub(crate) fn archive_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.7z");
    write_7z(&path, files);
    std::fs::read(&path).unwrap()
}
