//! Persistence sink of the distributed build.
//!
//! A two-level STR run produces `P * local_parts` subtree files keyed by
//! global id, plus one top-level bounding-box tree written by the root rank.
//! The directory is not a valid index until the top-level file exists.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::entry::{IndexedSubtreeBox, TreeEntry};
use crate::error::Result;
use crate::rtree::IndexTree;

/// Where a distributed build persists its subtrees and top-level tree.
pub trait SubtreeStorage<T> {
    fn save_subtree(&self, subtree: &IndexTree<T>, k: usize) -> Result<()>;
    fn save_top_tree(&self, top: &IndexTree<IndexedSubtreeBox>) -> Result<()>;
}

/// Directory-backed storage: one dump file per subtree plus the top tree.
#[derive(Debug, Clone)]
pub struct DirStorage {
    dir: PathBuf,
}

impl DirStorage {
    /// Create (or reuse) the directory.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn subtree_path(&self, k: usize) -> PathBuf {
        self.dir.join(format!("subtree_{k:06}.bin"))
    }

    pub fn top_tree_path(&self) -> PathBuf {
        self.dir.join("top_tree.bin")
    }

    /// A directory is only valid once the top-level tree has been written.
    pub fn is_complete(&self) -> bool {
        self.top_tree_path().is_file()
    }

    /// Load one subtree; any rank's subtree can be queried standalone.
    pub fn load_subtree<T: TreeEntry + DeserializeOwned>(&self, k: usize) -> Result<IndexTree<T>> {
        IndexTree::load(self.subtree_path(k))
    }

    pub fn load_top_tree(&self) -> Result<IndexTree<IndexedSubtreeBox>> {
        IndexTree::load(self.top_tree_path())
    }
}

impl<T: TreeEntry + Serialize> SubtreeStorage<T> for DirStorage {
    fn save_subtree(&self, subtree: &IndexTree<T>, k: usize) -> Result<()> {
        subtree.dump(self.subtree_path(k))
    }

    fn save_top_tree(&self, top: &IndexTree<IndexedSubtreeBox>) -> Result<()> {
        top.dump(self.top_tree_path())
    }
}
