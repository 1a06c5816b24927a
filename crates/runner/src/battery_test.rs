//! The on-disk test registry.
//!
//! A test is a `<id>.batterytest` JSON metadata file next to a `<id>.loop`
//! event log and optional `<id>.prologue` / `<id>.epilogue` siblings. Tests
//! are looked up in the system directory and the per-user directory.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use battbench_common::error::{BattbenchError, BattbenchResult};

const METADATA_EXTENSION: &str = "batterytest";

#[derive(Debug, Deserialize)]
struct TestMetadata {
    name: Option<String>,
    description: Option<String>,
}

/// One loadable benchmark script set.
#[derive(Debug, Clone)]
pub struct BatteryTest {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub loop_file: PathBuf,
    pub prologue_file: Option<PathBuf>,
    pub epilogue_file: Option<PathBuf>,
}

/// All tests found at startup, sorted by display name.
///
/// Built once and passed by reference; there is no global registry.
pub struct TestRegistry {
    tests: Vec<BatteryTest>,
}

impl TestRegistry {
    /// Scan `dirs` in order. Missing directories are skipped; a metadata
    /// file without its `.loop` sibling is skipped with a warning; two
    /// tests with the same id are an error.
    pub fn load(dirs: &[PathBuf]) -> BattbenchResult<Self> {
        let mut tests: Vec<BatteryTest> = Vec::new();

        for dir in dirs {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            for entry in entries {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(METADATA_EXTENSION) {
                    continue;
                }
                match load_test(&path)? {
                    Some(test) => {
                        if tests.iter().any(|t| t.id == test.id) {
                            return Err(BattbenchError::config(format!(
                                "Duplicate test id '{}' in {}",
                                test.id,
                                dir.display()
                            )));
                        }
                        tests.push(test);
                    }
                    None => {
                        tracing::warn!(path = %path.display(), "Test has no .loop file; skipping");
                    }
                }
            }
        }

        tests.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self { tests })
    }

    pub fn all(&self) -> &[BatteryTest] {
        &self.tests
    }

    pub fn find(&self, id: &str) -> Option<&BatteryTest> {
        self.tests.iter().find(|t| t.id == id)
    }
}

fn load_test(metadata_path: &Path) -> BattbenchResult<Option<BatteryTest>> {
    let id = metadata_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            BattbenchError::config(format!("Bad test file name: {}", metadata_path.display()))
        })?
        .to_string();

    let file = File::open(metadata_path)?;
    let metadata: TestMetadata = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
        BattbenchError::config(format!("Malformed {}: {e}", metadata_path.display()))
    })?;

    let loop_file = metadata_path.with_extension("loop");
    if !loop_file.exists() {
        return Ok(None);
    }

    let optional = |ext: &str| {
        let path = metadata_path.with_extension(ext);
        path.exists().then_some(path)
    };

    Ok(Some(BatteryTest {
        name: metadata.name.unwrap_or_else(|| id.clone()),
        description: metadata.description,
        id,
        loop_file,
        prologue_file: optional("prologue"),
        epilogue_file: optional("epilogue"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test(dir: &Path, id: &str, json: &str, with_loop: bool) {
        std::fs::write(dir.join(format!("{id}.batterytest")), json).unwrap();
        if with_loop {
            std::fs::write(dir.join(format!("{id}.loop")), "KeyPress,0,0,0,30\n").unwrap();
        }
    }

    #[test]
    fn test_loads_and_sorts_by_name() {
        let dir = tempfile::tempdir().unwrap();
        write_test(dir.path(), "zz", r#"{"name": "Alpha"}"#, true);
        write_test(dir.path(), "aa", r#"{"name": "Beta"}"#, true);

        let registry = TestRegistry::load(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<&str> = registry.all().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["Alpha", "Beta"]);
        assert!(registry.find("zz").is_some());
        assert!(registry.find("missing").is_none());
    }

    #[test]
    fn test_skips_test_without_loop() {
        let dir = tempfile::tempdir().unwrap();
        write_test(dir.path(), "broken", r#"{"name": "Broken"}"#, false);

        let registry = TestRegistry::load(&[dir.path().to_path_buf()]).unwrap();
        assert!(registry.all().is_empty());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let system = tempfile::tempdir().unwrap();
        let user = tempfile::tempdir().unwrap();
        write_test(system.path(), "idle", r#"{"name": "Idle"}"#, true);
        write_test(user.path(), "idle", r#"{"name": "Idle 2"}"#, true);

        let result = TestRegistry::load(&[
            system.path().to_path_buf(),
            user.path().to_path_buf(),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_prologue_and_epilogue_detected() {
        let dir = tempfile::tempdir().unwrap();
        write_test(dir.path(), "web", r#"{"name": "Web", "description": "Browse"}"#, true);
        std::fs::write(dir.path().join("web.prologue"), "").unwrap();

        let registry = TestRegistry::load(&[dir.path().to_path_buf()]).unwrap();
        let test = registry.find("web").unwrap();
        assert!(test.prologue_file.is_some());
        assert!(test.epilogue_file.is_none());
        assert_eq!(test.description.as_deref(), Some("Browse"));
    }
}
