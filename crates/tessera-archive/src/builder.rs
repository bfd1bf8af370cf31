//! Builds archives from files and directory trees on disk.

use crate::archive::Archive;
use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tessera_types::{
    ContentAddresser, ContentId, DagNode, DatasetId, DirEntry, EmptyPolicy, Link, TypesError,
    DEFAULT_CHUNK_SIZE, DEFAULT_FANOUT,
};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub chunk_size: usize,
    pub fanout: usize,
    /// Minimum padded piece size; 0 picks the smallest sector that fits.
    pub sector_size_hint: u64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            fanout: DEFAULT_FANOUT,
            sector_size_hint: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveBuilder {
    addresser: ContentAddresser,
}

impl ArchiveBuilder {
    pub fn new(fanout: usize) -> Result<Self> {
        Ok(Self {
            addresser: ContentAddresser::new(EmptyPolicy::WellKnown, fanout)?,
        })
    }

    pub fn from_config(config: &ArchiveConfig) -> Result<Self> {
        Self::new(config.fanout)
    }

    pub fn addresser(&self) -> &ContentAddresser {
        &self.addresser
    }

    /// Archive every path as an entry of one synthetic top directory, which
    /// becomes the single root. Nothing is returned on error.
    pub fn build<P: AsRef<Path>>(&self, root_paths: &[P], chunk_size: usize) -> Result<Archive> {
        if chunk_size == 0 {
            return Err(ArchiveError::MalformedInput("chunk size must be non-zero".to_string()));
        }
        if root_paths.is_empty() {
            return Err(ArchiveError::MalformedInput("no input paths".to_string()));
        }

        let mut blocks = BTreeMap::new();
        let mut entries = Vec::with_capacity(root_paths.len());
        let mut names = HashSet::new();

        for path in root_paths {
            let path = path.as_ref();
            let name = entry_name(path)?;
            if !names.insert(name.clone()) {
                return Err(ArchiveError::MalformedInput(format!(
                    "duplicate root name '{}' ({})",
                    name,
                    path.display()
                )));
            }
            let link = self.add_path(path, chunk_size, &mut blocks)?;
            entries.push(DirEntry {
                name,
                cid: link.cid,
                size: link.size,
            });
        }

        let root = insert_node(&DagNode::directory(entries), &mut blocks)?;
        let archive = Archive::new(vec![root.cid], blocks)?;
        debug!(
            root = %root.cid,
            blocks = archive.len(),
            bytes = root.size,
            "Archive built"
        );
        Ok(archive)
    }

    fn add_path(&self, path: &Path, chunk_size: usize, blocks: &mut BTreeMap<ContentId, Vec<u8>>) -> Result<Link> {
        let meta = fs::symlink_metadata(path).map_err(|e| unreadable(path, e))?;
        let file_type = meta.file_type();
        if file_type.is_symlink() {
            return Err(ArchiveError::MalformedInput(format!(
                "symbolic links are not archived: {}",
                path.display()
            )));
        }
        if file_type.is_dir() {
            self.add_directory(path, chunk_size, blocks)
        } else if file_type.is_file() {
            self.add_file(path, chunk_size, blocks)
        } else {
            Err(ArchiveError::MalformedInput(format!(
                "unsupported file type: {}",
                path.display()
            )))
        }
    }

    fn add_directory(
        &self,
        path: &Path,
        chunk_size: usize,
        blocks: &mut BTreeMap<ContentId, Vec<u8>>,
    ) -> Result<Link> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| unreadable(path, e))? {
            let entry = entry.map_err(|e| unreadable(path, e))?;
            let child = entry.path();
            let name = entry
                .file_name()
                .into_string()
                .map_err(|_| ArchiveError::MalformedInput(format!("non UTF-8 name: {}", child.display())))?;
            let link = self.add_path(&child, chunk_size, blocks)?;
            entries.push(DirEntry {
                name,
                cid: link.cid,
                size: link.size,
            });
        }
        insert_node(&DagNode::directory(entries), blocks)
    }

    fn add_file(&self, path: &Path, chunk_size: usize, blocks: &mut BTreeMap<ContentId, Vec<u8>>) -> Result<Link> {
        let file = File::open(path).map_err(|e| unreadable(path, e))?;
        let root = self
            .addresser
            .layout_stream(file, chunk_size, |cid, bytes| {
                blocks.entry(cid).or_insert_with(|| bytes.to_vec());
            })
            .map_err(|e| match e {
                TypesError::Io(io) => unreadable(path, io),
                other => other.into(),
            })?;

        match root {
            Some(link) => Ok(link),
            None => insert_node(&DagNode::empty_file(), blocks),
        }
    }
}

fn insert_node(node: &DagNode, blocks: &mut BTreeMap<ContentId, Vec<u8>>) -> Result<Link> {
    let bytes = node.encode()?;
    let cid = DagNode::cid_of(&bytes);
    blocks.entry(cid).or_insert(bytes);
    Ok(Link::new(cid, node.size()))
}

fn unreadable(path: &Path, e: io::Error) -> ArchiveError {
    ArchiveError::MalformedInput(format!("unreadable path {}: {}", path.display(), e))
}

fn entry_name(path: &Path) -> Result<String> {
    let name = match path.file_name() {
        Some(name) => name.to_os_string(),
        None => fs::canonicalize(path)
            .map_err(|e| unreadable(path, e))?
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| ArchiveError::MalformedInput(format!("path has no name: {}", path.display())))?,
    };
    name.into_string()
        .map_err(|_| ArchiveError::MalformedInput(format!("non UTF-8 name: {}", path.display())))
}

/// BLAKE3 fingerprint over relative paths and file contents. Identical trees
/// fingerprint identically regardless of the order the roots are given in.
pub fn dataset_fingerprint<P: AsRef<Path>>(paths: &[P]) -> Result<DatasetId> {
    if paths.is_empty() {
        return Err(ArchiveError::MalformedInput("no input paths".to_string()));
    }

    let mut roots: Vec<(String, PathBuf)> = paths
        .iter()
        .map(|p| Ok((entry_name(p.as_ref())?, p.as_ref().to_path_buf())))
        .collect::<Result<_>>()?;
    roots.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = blake3::Hasher::new();
    for (name, path) in roots {
        hash_path(&mut hasher, &name, &path)?;
    }
    Ok(DatasetId::from_bytes(hasher.finalize().into()))
}

fn hash_path(hasher: &mut blake3::Hasher, relative: &str, path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path).map_err(|e| unreadable(path, e))?;
    if meta.file_type().is_symlink() {
        return Err(ArchiveError::MalformedInput(format!(
            "symbolic links are not archived: {}",
            path.display()
        )));
    }

    if meta.is_dir() {
        hasher.update(b"D");
        hasher.update(relative.as_bytes());
        hasher.update(&[0]);

        let mut children = Vec::new();
        for entry in fs::read_dir(path).map_err(|e| unreadable(path, e))? {
            let entry = entry.map_err(|e| unreadable(path, e))?;
            let name = entry
                .file_name()
                .into_string()
                .map_err(|_| ArchiveError::MalformedInput(format!("non UTF-8 name in {}", path.display())))?;
            children.push((name, entry.path()));
        }
        children.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, child) in children {
            hash_path(hasher, &format!("{}/{}", relative, name), &child)?;
        }
    } else {
        hasher.update(b"F");
        hasher.update(relative.as_bytes());
        hasher.update(&[0]);
        hasher.update(&meta.len().to_le_bytes());
        let mut file = File::open(path).map_err(|e| unreadable(path, e))?;
        io::copy(&mut file, hasher).map_err(|e| unreadable(path, e))?;
    }
    Ok(())
}

/// Total bytes of regular files under `paths`.
pub fn dataset_size<P: AsRef<Path>>(paths: &[P]) -> Result<u64> {
    let mut total = 0u64;
    let mut stack: Vec<PathBuf> = paths.iter().map(|p| p.as_ref().to_path_buf()).collect();
    while let Some(path) = stack.pop() {
        let meta = fs::symlink_metadata(&path).map_err(|e| unreadable(&path, e))?;
        if meta.file_type().is_symlink() {
            return Err(ArchiveError::MalformedInput(format!(
                "symbolic links are not archived: {}",
                path.display()
            )));
        }
        if meta.is_dir() {
            for entry in fs::read_dir(&path).map_err(|e| unreadable(&path, e))? {
                stack.push(entry.map_err(|e| unreadable(&path, e))?.path());
            }
        } else {
            total = total.saturating_add(meta.len());
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_size_sums_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("tree/sub")).unwrap();
        fs::write(dir.path().join("tree/a"), vec![0u8; 100]).unwrap();
        fs::write(dir.path().join("tree/sub/b"), vec![0u8; 23]).unwrap();
        assert_eq!(dataset_size(&[dir.path().join("tree")]).unwrap(), 123);
        assert!(dataset_size(&[dir.path().join("missing")]).is_err());
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        fs::write(&file, b"data").unwrap();
        let builder = ArchiveBuilder::new(4).unwrap();
        assert!(matches!(builder.build(&[&file], 0), Err(ArchiveError::MalformedInput(_))));
    }

    #[test]
    fn test_rejects_unreadable_path() {
        let builder = ArchiveBuilder::new(4).unwrap();
        let err = builder.build(&["/definitely/not/here.bin"], 16).unwrap_err();
        assert!(matches!(err, ArchiveError::MalformedInput(_)));
    }

    #[test]
    fn test_empty_file_is_archived() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("empty");
        fs::write(&file, b"").unwrap();
        let archive = ArchiveBuilder::new(4).unwrap().build(&[&file], 16).unwrap();
        assert_eq!(archive.extract_file("empty").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_fingerprint_order_independent_and_content_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"one").unwrap();
        fs::write(&b, b"two").unwrap();

        let ab = dataset_fingerprint(&[&a, &b]).unwrap();
        let ba = dataset_fingerprint(&[&b, &a]).unwrap();
        assert_eq!(ab, ba);

        fs::write(&b, b"tw0").unwrap();
        assert_ne!(dataset_fingerprint(&[&a, &b]).unwrap(), ab);
    }
}
