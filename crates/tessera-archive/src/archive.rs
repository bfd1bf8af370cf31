//! In-memory archive: a deduplicated CID → block map plus declared roots.

use crate::error::{ArchiveError, Result};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tessera_types::{ContentId, DagNode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    roots: Vec<ContentId>,
    blocks: BTreeMap<ContentId, Vec<u8>>,
}

/// A file found while walking an archive's directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedFile {
    pub path: String,
    pub cid: ContentId,
    pub size: u64,
}

impl Archive {
    /// Assemble an archive, rejecting missing roots, dangling links and
    /// unreachable blocks.
    pub fn new(roots: Vec<ContentId>, blocks: BTreeMap<ContentId, Vec<u8>>) -> Result<Self> {
        let archive = Self { roots, blocks };
        archive.validate_closed()?;
        Ok(archive)
    }

    /// Assemble without the closure check. Used by the parser, which accepts
    /// archives that only carry part of a DAG.
    pub(crate) fn from_parts(roots: Vec<ContentId>, blocks: BTreeMap<ContentId, Vec<u8>>) -> Self {
        Self { roots, blocks }
    }

    pub fn roots(&self) -> &[ContentId] {
        &self.roots
    }

    /// The primary root: the synthetic top directory for built archives.
    pub fn root(&self) -> Option<&ContentId> {
        self.roots.first()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, cid: &ContentId) -> Option<&[u8]> {
        self.blocks.get(cid).map(Vec::as_slice)
    }

    pub fn contains(&self, cid: &ContentId) -> bool {
        self.blocks.contains_key(cid)
    }

    pub fn blocks(&self) -> impl Iterator<Item = (&ContentId, &[u8])> {
        self.blocks.iter().map(|(cid, bytes)| (cid, bytes.as_slice()))
    }

    pub fn block_bytes(&self) -> u64 {
        self.blocks.values().map(|b| b.len() as u64).sum()
    }

    pub fn remove_block(&mut self, cid: &ContentId) -> Option<Vec<u8>> {
        self.blocks.remove(cid)
    }

    /// Children of a block. Raw blocks and unknown codecs are leaves.
    pub fn child_links(cid: &ContentId, bytes: &[u8]) -> Result<Vec<ContentId>> {
        if !cid.is_dag_node() {
            return Ok(Vec::new());
        }
        let node = DagNode::decode(bytes)
            .map_err(|e| ArchiveError::CorruptArchive(format!("undecodable node {}: {}", cid, e)))?;
        Ok(node.child_cids())
    }

    /// Check every root is present, every link resolves and every block is
    /// reachable from a root.
    pub fn validate_closed(&self) -> Result<()> {
        if self.roots.is_empty() {
            return Err(ArchiveError::MalformedInput("archive declares no roots".to_string()));
        }

        let mut reachable = HashSet::new();
        let mut stack: Vec<ContentId> = Vec::new();
        for root in &self.roots {
            if !self.contains(root) {
                return Err(ArchiveError::CorruptArchive(format!("root {} missing", root)));
            }
            stack.push(*root);
        }

        while let Some(cid) = stack.pop() {
            if !reachable.insert(cid) {
                continue;
            }
            let bytes = self
                .get(&cid)
                .ok_or_else(|| ArchiveError::CorruptArchive(format!("linked block {} missing", cid)))?;
            stack.extend(Self::child_links(&cid, bytes)?);
        }

        if let Some(orphan) = self.blocks.keys().find(|cid| !reachable.contains(*cid)) {
            return Err(ArchiveError::MalformedInput(format!(
                "dangling block {} is not reachable from any root",
                orphan
            )));
        }
        Ok(())
    }

    /// Serialization order: depth-first pre-order from the roots, then any
    /// remaining blocks in CID order.
    pub fn stream_order(&self) -> Result<Vec<ContentId>> {
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut visited = HashSet::new();
        let mut stack: Vec<ContentId> = self.roots.iter().rev().copied().collect();

        while let Some(cid) = stack.pop() {
            if !visited.insert(cid) {
                continue;
            }
            let Some(bytes) = self.get(&cid) else {
                continue;
            };
            order.push(cid);
            let children = Self::child_links(&cid, bytes)?;
            stack.extend(children.into_iter().rev());
        }

        order.extend(self.blocks.keys().filter(|cid| !visited.contains(*cid)).copied());
        Ok(order)
    }

    /// Same roots (as a set) and the same CID → bytes mapping.
    pub fn same_content(&self, other: &Archive) -> bool {
        let ours: BTreeSet<_> = self.roots.iter().collect();
        let theirs: BTreeSet<_> = other.roots.iter().collect();
        ours == theirs && self.blocks == other.blocks
    }

    fn node(&self, cid: &ContentId) -> Result<DagNode> {
        let bytes = self
            .get(cid)
            .ok_or_else(|| ArchiveError::CorruptArchive(format!("block {} missing", cid)))?;
        DagNode::decode(bytes).map_err(|e| ArchiveError::CorruptArchive(format!("undecodable node {}: {}", cid, e)))
    }

    fn root_directory(&self) -> Result<(ContentId, DagNode)> {
        let root = *self
            .root()
            .ok_or_else(|| ArchiveError::CorruptArchive("archive has no root".to_string()))?;
        let node = self.node(&root)?;
        match node {
            DagNode::Directory { .. } => Ok((root, node)),
            DagNode::File { .. } => Err(ArchiveError::NotFound("archive root is not a directory".to_string())),
        }
    }

    /// Every file under the root directory, in path order.
    pub fn list_files(&self) -> Result<Vec<ArchivedFile>> {
        let (_, root) = self.root_directory()?;
        let mut files = Vec::new();
        let mut stack = vec![(String::new(), root)];

        while let Some((prefix, node)) = stack.pop() {
            let DagNode::Directory { entries } = node else {
                continue;
            };
            for entry in entries {
                let path = if prefix.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", prefix, entry.name)
                };
                if !entry.cid.is_dag_node() {
                    files.push(ArchivedFile { path, cid: entry.cid, size: entry.size });
                    continue;
                }
                match self.node(&entry.cid)? {
                    dir @ DagNode::Directory { .. } => stack.push((path, dir)),
                    DagNode::File { .. } => files.push(ArchivedFile { path, cid: entry.cid, size: entry.size }),
                }
            }
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// Reassemble one file addressed by a `/`-separated path below the root
    /// directory.
    pub fn extract_file(&self, path: &str) -> Result<Vec<u8>> {
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
        if components.is_empty() {
            return Err(ArchiveError::NotFound(format!("'{}' does not name a file", path)));
        }

        let (_, mut dir) = self.root_directory()?;
        let last = components.len() - 1;
        for (i, component) in components.iter().enumerate() {
            let entry = dir
                .entry(component)
                .cloned()
                .ok_or_else(|| ArchiveError::NotFound(format!("'{}' not in archive", path)))?;

            if i == last {
                return self.read_file(&entry.cid, entry.size, path);
            }

            if !entry.cid.is_dag_node() {
                return Err(ArchiveError::NotFound(format!("'{}' is not a directory", component)));
            }
            dir = self.node(&entry.cid)?;
            if !matches!(dir, DagNode::Directory { .. }) {
                return Err(ArchiveError::NotFound(format!("'{}' is not a directory", component)));
            }
        }
        Err(ArchiveError::NotFound(format!("'{}' not in archive", path)))
    }

    fn read_file(&self, cid: &ContentId, expected_size: u64, path: &str) -> Result<Vec<u8>> {
        if cid.is_dag_node() {
            if let DagNode::Directory { .. } = self.node(cid)? {
                return Err(ArchiveError::NotFound(format!("'{}' is a directory", path)));
            }
        }
        // Declared sizes are untrusted; deduplicated chunks may still make a file
        // larger than the archive, so only the reservation is capped.
        let mut out = Vec::with_capacity(expected_size.min(self.block_bytes()) as usize);
        self.append_file_bytes(cid, expected_size, &mut out)?;
        Ok(out)
    }

    fn append_file_bytes(&self, cid: &ContentId, expected_size: u64, out: &mut Vec<u8>) -> Result<()> {
        let start = out.len() as u64;

        if !cid.is_dag_node() {
            let bytes = self
                .get(cid)
                .ok_or_else(|| ArchiveError::CorruptArchive(format!("chunk {} missing", cid)))?;
            if bytes.len() as u64 != expected_size {
                return Err(ArchiveError::CorruptArchive(format!(
                    "chunk {} holds {} bytes, expected {}",
                    cid,
                    bytes.len(),
                    expected_size
                )));
            }
            out.extend_from_slice(bytes);
        } else {
            match self.node(cid)? {
                DagNode::File { size, links } => {
                    if size != expected_size {
                        return Err(ArchiveError::CorruptArchive(format!(
                            "node {} declares {} bytes, parent expects {}",
                            cid, size, expected_size
                        )));
                    }
                    let linked = links
                        .iter()
                        .try_fold(0u64, |acc, link| acc.checked_add(link.size))
                        .ok_or_else(|| ArchiveError::CorruptArchive(format!("node {} link sizes overflow", cid)))?;
                    if linked != size {
                        return Err(ArchiveError::CorruptArchive(format!(
                            "node {} declares {} bytes, links hold {}",
                            cid, size, linked
                        )));
                    }
                    for link in links {
                        self.append_file_bytes(&link.cid, link.size, out)?;
                    }
                }
                DagNode::Directory { .. } => {
                    return Err(ArchiveError::CorruptArchive(format!(
                        "directory {} linked from file data",
                        cid
                    )));
                }
            }
        }

        let written = out.len() as u64 - start;
        if written != expected_size {
            return Err(ArchiveError::CorruptArchive(format!(
                "block {} yielded {} bytes, expected {}",
                cid, written, expected_size
            )));
        }
        Ok(())
    }
}

/// See [`Archive::extract_file`].
pub fn extract_file(archive: &Archive, path: &str) -> Result<Vec<u8>> {
    archive.extract_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::{DirEntry, Link, RAW_CODEC};

    fn put(blocks: &mut BTreeMap<ContentId, Vec<u8>>, node: &DagNode) -> ContentId {
        let bytes = node.encode().unwrap();
        let cid = DagNode::cid_of(&bytes);
        blocks.insert(cid, bytes);
        cid
    }

    fn sample() -> (Archive, ContentId) {
        let mut blocks = BTreeMap::new();
        let chunk = b"hello".to_vec();
        let chunk_cid = ContentId::for_block(RAW_CODEC, &chunk);
        blocks.insert(chunk_cid, chunk);
        let file = put(
            &mut blocks,
            &DagNode::File { size: 5, links: vec![Link::new(chunk_cid, 5)] },
        );
        let root = put(
            &mut blocks,
            &DagNode::directory(vec![DirEntry { name: "a.txt".into(), cid: file, size: 5 }]),
        );
        (Archive::new(vec![root], blocks).unwrap(), chunk_cid)
    }

    #[test]
    fn test_extract_and_list() {
        let (archive, _) = sample();
        assert_eq!(archive.extract_file("a.txt").unwrap(), b"hello");
        assert_eq!(archive.extract_file("/a.txt").unwrap(), b"hello");
        assert!(matches!(archive.extract_file("b.txt"), Err(ArchiveError::NotFound(_))));
        assert!(matches!(archive.extract_file(""), Err(ArchiveError::NotFound(_))));
        let files = archive.list_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "a.txt");
    }

    #[test]
    fn test_dangling_block_rejected() {
        let (archive, _) = sample();
        let mut blocks: BTreeMap<_, _> = archive.blocks().map(|(c, b)| (*c, b.to_vec())).collect();
        let stray = b"stray".to_vec();
        blocks.insert(ContentId::for_block(RAW_CODEC, &stray), stray);
        let err = Archive::new(archive.roots().to_vec(), blocks).unwrap_err();
        assert!(matches!(err, ArchiveError::MalformedInput(_)));
    }

    #[test]
    fn test_missing_chunk_is_corrupt() {
        let (mut archive, chunk) = sample();
        archive.remove_block(&chunk);
        assert!(matches!(archive.extract_file("a.txt"), Err(ArchiveError::CorruptArchive(_))));
        assert!(matches!(archive.validate_closed(), Err(ArchiveError::CorruptArchive(_))));
    }

    #[test]
    fn test_stream_order_parents_first() {
        let (archive, chunk) = sample();
        let order = archive.stream_order().unwrap();
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], *archive.root().unwrap());
        assert_eq!(order[2], chunk);
    }

    #[test]
    fn test_oversized_declared_file_is_corrupt() {
        let mut blocks = BTreeMap::new();
        let chunk = b"tiny".to_vec();
        let chunk_cid = ContentId::for_block(RAW_CODEC, &chunk);
        blocks.insert(chunk_cid, chunk);
        let file = put(
            &mut blocks,
            &DagNode::File { size: u64::MAX, links: vec![Link::new(chunk_cid, 4)] },
        );
        let root = put(
            &mut blocks,
            &DagNode::directory(vec![DirEntry { name: "f".into(), cid: file, size: u64::MAX }]),
        );
        let archive = Archive::new(vec![root], blocks).unwrap();
        let bytes = archive.to_bytes().unwrap();
        let parsed = Archive::from_bytes(&bytes).unwrap();

        assert!(matches!(parsed.extract_file("f"), Err(ArchiveError::CorruptArchive(_))));
    }

    #[test]
    fn test_raw_entry_with_wrong_size_is_corrupt() {
        let mut blocks = BTreeMap::new();
        let chunk = b"tiny".to_vec();
        let chunk_cid = ContentId::for_block(RAW_CODEC, &chunk);
        blocks.insert(chunk_cid, chunk);
        let root = put(
            &mut blocks,
            &DagNode::directory(vec![DirEntry { name: "f".into(), cid: chunk_cid, size: u64::MAX }]),
        );
        let archive = Archive::new(vec![root], blocks).unwrap();
        assert!(matches!(archive.extract_file("f"), Err(ArchiveError::CorruptArchive(_))));
    }
}
