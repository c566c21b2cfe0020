//! Versioned binary dump/load of an in-memory tree.
//!
//! Layout: 8-byte magic, little-endian `u16` structure version, then the
//! bincode-encoded tree (entry stream plus node arena). Readers accept any
//! version up to [`STRUCT_VERSION`] and reject newer files.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::entry::TreeEntry;
use crate::error::{IndexError, Result};
use crate::rtree::IndexTree;

/// Bump when serialized data structures change.
pub const STRUCT_VERSION: u16 = 2;

const MAGIC: &[u8; 8] = b"NEUROSPC";

impl<T: TreeEntry + Serialize> IndexTree<T> {
    /// Write the tree to a single binary file.
    pub fn dump<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(MAGIC)?;
        file.write_all(&STRUCT_VERSION.to_le_bytes())?;
        bincode::serialize_into(&mut file, self)
            .map_err(|e| IndexError::Serialization(e.to_string()))?;
        file.flush()?;
        debug!(path = %path.display(), n_entries = self.len(), "dumped index");
        Ok(())
    }
}

impl<T: TreeEntry + DeserializeOwned> IndexTree<T> {
    /// Rebuild a tree from a file written by [`IndexTree::dump`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = BufReader::new(File::open(path)?);

        let mut magic = [0u8; 8];
        file.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(IndexError::BadMagic);
        }

        let mut version = [0u8; 2];
        file.read_exact(&mut version)?;
        let version = u16::from_le_bytes(version);
        if version > STRUCT_VERSION {
            return Err(IndexError::FutureFormat {
                file_version: version,
                supported: STRUCT_VERSION,
            });
        }

        let tree: Self = bincode::deserialize_from(&mut file)
            .map_err(|e| IndexError::Deserialization(e.to_string()))?;
        debug!(path = %path.display(), n_entries = tree.len(), "loaded index");
        Ok(tree)
    }
}
