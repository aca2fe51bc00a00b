//! Reading merge inputs from disk.
//!
//! A `.json` file holds a serialized [`AstNode`]; any other file is source
//! code parsed with the grammar its extension selects.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use treemerge_engine::parser::{language_for_path, parse_to_tree};
use treemerge_engine::{AstNode, MergeScenario};

pub fn load_tree(path: &Path) -> anyhow::Result<AstNode> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;

    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        let tree: AstNode = serde_json::from_str(&content)
            .with_context(|| format!("parsing tree in {}", path.display()))?;
        return Ok(tree);
    }

    let language = language_for_path(path)?;
    let tree = parse_to_tree(&content, language)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(tree)
}

/// Scenarios to merge in one `batch` run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchManifest {
    #[serde(default)]
    pub scenarios: Vec<ScenarioEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioEntry {
    #[serde(default)]
    pub name: Option<String>,
    pub left: PathBuf,
    /// Omitted for two-way merges.
    #[serde(default)]
    pub base: Option<PathBuf>,
    pub right: PathBuf,
}

impl BatchManifest {
    /// Loads a manifest. Relative input paths are resolved against the
    /// manifest's directory.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading manifest {}", path.display()))?;
        let mut manifest: BatchManifest = serde_json::from_str(&content)
            .with_context(|| format!("parsing manifest {}", path.display()))?;

        let root = path.parent().unwrap_or_else(|| Path::new("."));
        for entry in &mut manifest.scenarios {
            entry.left = root.join(&entry.left);
            entry.right = root.join(&entry.right);
            if let Some(base) = entry.base.as_mut() {
                *base = root.join(&*base);
            }
        }
        Ok(manifest)
    }
}

impl ScenarioEntry {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.left.display().to_string())
    }

    pub fn load_scenario(&self) -> anyhow::Result<MergeScenario> {
        let left = load_tree(&self.left)?;
        let right = load_tree(&self.right)?;
        Ok(match &self.base {
            Some(base) => MergeScenario::three_way(left, load_tree(base)?, right),
            None => MergeScenario::two_way(left, right),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treemerge_engine::{ListOrdering, MergeType};

    #[test]
    fn test_load_json_tree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.json");
        let tree = AstNode::internal(
            "class",
            "Foo",
            ListOrdering::Unordered,
            vec![AstNode::leaf("method", "bar")],
        );
        std::fs::write(&path, serde_json::to_string(&tree).unwrap()).unwrap();

        let loaded = load_tree(&path).unwrap();
        assert_eq!(loaded.label(), "Foo");
        assert_eq!(loaded.child_count(), 1);
    }

    #[test]
    fn test_load_source_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.rs");
        std::fs::write(&path, "fn main() {}").unwrap();

        let loaded = load_tree(&path).unwrap();
        assert_eq!(loaded.kind(), "source_file");
    }

    #[test]
    fn test_unsupported_extension_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "hello").unwrap();
        assert!(load_tree(&path).is_err());
    }

    #[test]
    fn test_manifest_paths_are_relative_to_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("l.rs"), "fn a() {}").unwrap();
        std::fs::write(dir.path().join("r.rs"), "fn a() {}").unwrap();
        let manifest_path = dir.path().join("batch.json");
        std::fs::write(
            &manifest_path,
            r#"{"scenarios": [{"name": "s1", "left": "l.rs", "right": "r.rs"}]}"#,
        )
        .unwrap();

        let manifest = BatchManifest::load(&manifest_path).unwrap();
        let entry = &manifest.scenarios[0];
        assert_eq!(entry.left, dir.path().join("l.rs"));
        assert_eq!(entry.display_name(), "s1");

        let scenario = entry.load_scenario().unwrap();
        assert_eq!(scenario.merge_type, MergeType::TwoWay);
    }
}
