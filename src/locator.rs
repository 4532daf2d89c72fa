//! Dataset locator — recursive capture file discovery.
//!
//! Walks a root directory and returns candidate capture workbooks,
//! filtered by extension, excluded stem suffixes (already-processed
//! artifacts), and temp/lock filename prefixes. Results are sorted so
//! batch runs are deterministic.

use std::path::{Path, PathBuf};

use crate::config::LocatorConfig;

#[derive(Debug, Clone)]
pub struct DatasetLocator {
    extension: String,
    exclude_suffixes: Vec<String>,
    exclude_prefixes: Vec<String>,
}

impl DatasetLocator {
    #[must_use]
    pub fn new(config: &LocatorConfig) -> Self {
        Self {
            extension: config.extension.clone(),
            exclude_suffixes: config.exclude_suffixes.clone(),
            exclude_prefixes: config.exclude_prefixes.clone(),
        }
    }

    /// Enumerate candidate capture files under `root`, recursively.
    pub fn discover(&self, root: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        self.walk(root, &mut files)?;
        files.sort();
        tracing::debug!(
            root = %root.display(),
            count = files.len(),
            "dataset discovery complete"
        );
        Ok(files)
    }

    fn walk(&self, dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.walk(&path, out)?;
            } else if file_type.is_file() && self.accepts(&path) {
                out.push(path);
            }
        }
        Ok(())
    }

    fn accepts(&self, path: &Path) -> bool {
        let extension_ok = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(&self.extension));
        if !extension_ok {
            return false;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        if self.exclude_prefixes.iter().any(|p| name.starts_with(p)) {
            return false;
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        !self.exclude_suffixes.iter().any(|s| stem.ends_with(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocatorConfig;

    fn touch(path: &Path) {
        std::fs::write(path, b"{}").unwrap();
    }

    #[test]
    fn discovers_recursively_with_filters() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("rig_a");
        std::fs::create_dir(&nested).unwrap();

        touch(&dir.path().join("capture1.json"));
        touch(&nested.join("capture2.json"));
        touch(&nested.join("capture2_denoised.json")); // processed artifact
        touch(&nested.join("~$capture3.json")); // lock file
        touch(&dir.path().join("notes.txt")); // wrong extension

        let config = LocatorConfig {
            extension: "json".into(),
            exclude_suffixes: vec!["_denoised".into()],
            exclude_prefixes: vec!["~$".into(), ".".into()],
        };
        let locator = DatasetLocator::new(&config);
        let files = locator.discover(dir.path()).unwrap();

        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["capture1.json", "capture2.json"]);
    }
}
