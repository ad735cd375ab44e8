use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Iterates the `<uuid>.json` snapshot files in a stats directory, yielding
/// the file stem and full path. Id parsing is left to the caller so invalid
/// filenames can be counted as skips instead of aborting the scan.
pub fn stats_files(dir: &Path) -> io::Result<impl Iterator<Item = (String, PathBuf)>> {
    let entries = fs::read_dir(dir)?;
    Ok(entries.filter_map(|entry| {
        let path = entry.ok()?.path();
        if !path.is_file() || path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            return None;
        }
        let stem = path.file_stem()?.to_str()?.to_string();
        Some((stem, path))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn touch(dir: &Path, name: &str) {
        let mut file = File::create(dir.join(name)).unwrap();
        file.write_all(b"{}").unwrap();
    }

    #[test]
    fn yields_only_json_files_with_stems() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "11111111-2222-3333-4444-555555555555.json");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "session.lock");

        let mut files: Vec<(String, PathBuf)> = stats_files(dir.path()).unwrap().collect();
        files.sort();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "11111111-2222-3333-4444-555555555555");
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("nope");
        assert!(stats_files(&gone).is_err());
    }

    #[test]
    fn empty_directory_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(stats_files(dir.path()).unwrap().count(), 0);
    }
}
