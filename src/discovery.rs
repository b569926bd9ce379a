//! Suite discovery: scan roots, parse files, normalize into [`Suite`]s.

use crate::model::{infer_priority, Suite};
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_INCLUDE_PATTERNS: &[&str] = &["**/*.test.yml", "**/*.test.yaml"];
pub const DEFAULT_EXCLUDE_SEGMENTS: &[&str] = &["node_modules", "draft", "drafts"];

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub roots: Vec<PathBuf>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            roots: vec![PathBuf::from("./tests")],
            include_patterns: DEFAULT_INCLUDE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            exclude_patterns: Vec::new(),
        }
    }
}

fn is_excluded(path: &Path, exclude_patterns: &[String]) -> bool {
    let path_str = path.to_string_lossy();
    for segment in DEFAULT_EXCLUDE_SEGMENTS {
        if path.components().any(|c| c.as_os_str() == *segment) {
            return true;
        }
    }
    for pattern in exclude_patterns {
        if let Ok(glob) = Pattern::new(pattern) {
            if glob.matches(&path_str) {
                return true;
            }
        }
    }
    false
}

fn matches_include(path: &Path, include_patterns: &[String]) -> bool {
    let path_str = path.to_string_lossy();
    include_patterns.iter().any(|pattern| {
        Pattern::new(pattern)
            .map(|glob| glob.matches(&path_str))
            .unwrap_or(false)
    })
}

/// Recursively walk `root`, returning candidate file paths matching
/// the include patterns and not matching any exclude pattern.
fn walk_root(root: &Path, config: &DiscoveryConfig) -> std::io::Result<Vec<PathBuf>> {
    let mut matches = Vec::new();
    if !root.exists() {
        return Ok(matches);
    }

    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "failed to read directory during discovery");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if is_excluded(&path, &config.exclude_patterns) {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
            } else if matches_include(&path, &config.include_patterns) {
                matches.push(path);
            }
        }
    }
    Ok(matches)
}

fn parse_suite_file(path: &Path) -> anyhow::Result<Suite> {
    let raw = std::fs::read_to_string(path)?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let mut suite: Suite = match ext {
        "json" => serde_json::from_str(&raw)?,
        _ => serde_yaml::from_str(&raw)?,
    };

    if suite.node_id.trim().is_empty() || suite.suite_name.trim().is_empty() {
        anyhow::bail!("suite file must declare non-empty node_id and suite_name");
    }

    normalize_suite(&mut suite, path);
    Ok(suite)
}

fn normalize_suite(suite: &mut Suite, path: &Path) {
    suite.file_path = path.to_path_buf();
    suite.priority = suite
        .metadata
        .priority
        .unwrap_or_else(|| infer_priority(&suite.suite_name));
    suite.estimated_duration_ms = suite
        .metadata
        .estimated_duration_ms
        .unwrap_or_else(|| 500 * suite.steps.len().max(1) as u64);

    let mut seen_node_ids = std::collections::HashSet::new();
    let mut seen_paths = std::collections::HashSet::new();
    suite.depends.retain_mut(|dep| {
        if let Some(node_id) = &mut dep.node_id {
            *node_id = node_id.trim().to_string();
        }
        if let Some(path) = &mut dep.path {
            *path = path.trim().to_string();
        }
        if !dep.is_valid() {
            warn!(node_id = %suite.node_id, "dropping dependency entry with neither node_id nor path");
            return false;
        }
        if let Some(node_id) = &dep.node_id {
            if !seen_node_ids.insert(node_id.clone()) {
                return false;
            }
        } else if let Some(path) = &dep.path {
            if !seen_paths.insert(path.clone()) {
                return false;
            }
        }
        true
    });
}

/// Scan all configured roots and return the normalized suites found.
/// Parse failures are logged and skipped; the scan never aborts.
pub fn discover(config: &DiscoveryConfig) -> Vec<Suite> {
    let mut suites: Vec<Suite> = Vec::new();
    let mut seen_file_paths = std::collections::HashSet::new();

    for root in &config.roots {
        info!(root = %root.display(), "scanning discovery root");
        let files = match walk_root(root, config) {
            Ok(files) => files,
            Err(err) => {
                warn!(root = %root.display(), error = %err, "failed to scan discovery root");
                continue;
            }
        };

        for file in files {
            if !seen_file_paths.insert(file.clone()) {
                continue;
            }
            match parse_suite_file(&file) {
                Ok(suite) => suites.push(suite),
                Err(err) => {
                    warn!(path = %file.display(), error = %err, "skipping malformed suite file");
                }
            }
        }
    }

    suites
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_suite(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn discovers_and_normalizes_valid_suite() {
        let dir = tempfile::tempdir().unwrap();
        write_suite(
            &dir,
            "smoke.test.yaml",
            "node_id: smoke\nsuite_name: \"Smoke: Health Check\"\nsteps: []\n",
        );

        let config = DiscoveryConfig {
            roots: vec![dir.path().to_path_buf()],
            ..Default::default()
        };
        let suites = discover(&config);

        assert_eq!(suites.len(), 1);
        assert_eq!(suites[0].node_id, "smoke");
        assert_eq!(suites[0].priority, crate::model::Priority::Critical);
        assert_eq!(suites[0].estimated_duration_ms, 500);
    }

    #[test]
    fn malformed_suite_is_skipped_without_aborting() {
        let dir = tempfile::tempdir().unwrap();
        write_suite(&dir, "broken.test.yaml", "not: valid: yaml: [");
        write_suite(
            &dir,
            "ok.test.yaml",
            "node_id: ok\nsuite_name: OK\nsteps: []\n",
        );

        let config = DiscoveryConfig {
            roots: vec![dir.path().to_path_buf()],
            ..Default::default()
        };
        let suites = discover(&config);

        assert_eq!(suites.len(), 1);
        assert_eq!(suites[0].node_id, "ok");
    }

    #[test]
    fn missing_node_id_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        write_suite(&dir, "no_id.test.yaml", "node_id: \"\"\nsuite_name: X\nsteps: []\n");

        let config = DiscoveryConfig {
            roots: vec![dir.path().to_path_buf()],
            ..Default::default()
        };
        let suites = discover(&config);
        assert!(suites.is_empty());
    }

    #[test]
    fn excluded_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        write_suite(
            &dir,
            "node_modules/dep.test.yaml",
            "node_id: dep\nsuite_name: Dep\nsteps: []\n",
        );

        let config = DiscoveryConfig {
            roots: vec![dir.path().to_path_buf()],
            ..Default::default()
        };
        let suites = discover(&config);
        assert!(suites.is_empty());
    }
}
