//! DAG node format and the balanced chunk layout.

use crate::content::{ContentId, DAG_NODE_CODEC};
use crate::error::{Result, TypesError};
use bincode::Options;
use serde::{Deserialize, Serialize};

/// Upper bound on an encoded node; decoding larger input fails instead of
/// allocating.
pub const MAX_NODE_SIZE: u64 = 16 << 20;

fn node_codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_NODE_SIZE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub cid: ContentId,
    pub size: u64,
}

impl Link {
    pub fn new(cid: ContentId, size: u64) -> Self {
        Self { cid, size }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub cid: ContentId,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DagNode {
    /// Interior node of a file's chunk tree. `size` counts file bytes below it.
    File { size: u64, links: Vec<Link> },
    /// Entries are kept sorted by name.
    Directory { entries: Vec<DirEntry> },
}

impl DagNode {
    pub fn empty_file() -> Self {
        DagNode::File {
            size: 0,
            links: Vec::new(),
        }
    }

    pub fn directory(mut entries: Vec<DirEntry>) -> Self {
        entries.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        DagNode::Directory { entries }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(node_codec().serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(node_codec().deserialize(bytes)?)
    }

    pub fn cid_of(encoded: &[u8]) -> ContentId {
        ContentId::for_block(DAG_NODE_CODEC, encoded)
    }

    pub fn size(&self) -> u64 {
        match self {
            DagNode::File { size, .. } => *size,
            DagNode::Directory { entries } => entries.iter().map(|e| e.size).sum(),
        }
    }

    pub fn child_cids(&self) -> Vec<ContentId> {
        match self {
            DagNode::File { links, .. } => links.iter().map(|l| l.cid).collect(),
            DagNode::Directory { entries } => entries.iter().map(|e| e.cid).collect(),
        }
    }

    pub fn links_to(&self, cid: &ContentId) -> bool {
        match self {
            DagNode::File { links, .. } => links.iter().any(|l| l.cid == *cid),
            DagNode::Directory { entries } => entries.iter().any(|e| e.cid == *cid),
        }
    }

    pub fn entry(&self, name: &str) -> Option<&DirEntry> {
        match self {
            DagNode::Directory { entries } => entries.iter().find(|e| e.name == name),
            DagNode::File { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
struct Level {
    pending: Vec<Link>,
    received: u64,
}

/// Streaming builder for the balanced chunk tree of fan-out `F`.
///
/// Each level buffers at most `F` links, so memory stays at `F × depth`
/// links no matter how long the stream is.
#[derive(Debug)]
pub struct BalancedLayout {
    fanout: usize,
    levels: Vec<Level>,
}

impl BalancedLayout {
    pub fn new(fanout: usize) -> Self {
        Self {
            fanout: fanout.max(2),
            levels: Vec::new(),
        }
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    pub fn push_leaf<F>(&mut self, link: Link, sink: &mut F) -> Result<()>
    where
        F: FnMut(ContentId, &[u8]),
    {
        self.push_at(0, link, sink)
    }

    fn push_at<F>(&mut self, level: usize, link: Link, sink: &mut F) -> Result<()>
    where
        F: FnMut(ContentId, &[u8]),
    {
        if self.levels.len() <= level {
            self.levels.resize_with(level + 1, Level::default);
        }
        let state = &mut self.levels[level];
        state.pending.push(link);
        state.received += 1;
        if state.pending.len() == self.fanout {
            let links = std::mem::take(&mut state.pending);
            let parent = emit_node(links, sink)?;
            self.push_at(level + 1, parent, sink)?;
        }
        Ok(())
    }

    /// Flush partially filled levels bottom-up and return the root link.
    /// `None` if no leaf was ever pushed.
    pub fn finish<F>(mut self, sink: &mut F) -> Result<Option<Link>>
    where
        F: FnMut(ContentId, &[u8]),
    {
        if self.levels.first().map_or(true, |l| l.received == 0) {
            return Ok(None);
        }

        let mut level = 0;
        loop {
            if !self.levels[level].pending.is_empty() {
                let links = std::mem::take(&mut self.levels[level].pending);
                let parent = emit_node(links, sink)?;
                self.push_at(level + 1, parent, sink)?;
            }

            let above = self
                .levels
                .get(level + 1)
                .ok_or_else(|| TypesError::InvalidParameter("layout lost its upper level".to_string()))?;
            if above.received == 1 {
                return above
                    .pending
                    .first()
                    .copied()
                    .map(Some)
                    .ok_or_else(|| TypesError::InvalidParameter("layout root missing".to_string()));
            }
            level += 1;
        }
    }
}

fn emit_node<F>(links: Vec<Link>, sink: &mut F) -> Result<Link>
where
    F: FnMut(ContentId, &[u8]),
{
    let size = links.iter().map(|l| l.size).sum();
    let node = DagNode::File { size, links };
    let bytes = node.encode()?;
    let cid = DagNode::cid_of(&bytes);
    sink(cid, &bytes);
    Ok(Link::new(cid, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::RAW_CODEC;

    fn leaf(i: u64) -> Link {
        Link::new(ContentId::for_block(RAW_CODEC, &i.to_le_bytes()), 10)
    }

    fn build(fanout: usize, leaves: u64) -> (Option<Link>, Vec<(ContentId, Vec<u8>)>) {
        let mut nodes = Vec::new();
        let mut sink = |cid: ContentId, bytes: &[u8]| nodes.push((cid, bytes.to_vec()));
        let mut layout = BalancedLayout::new(fanout);
        for i in 0..leaves {
            layout.push_leaf(leaf(i), &mut sink).unwrap();
        }
        let root = layout.finish(&mut sink).unwrap();
        (root, nodes)
    }

    #[test]
    fn test_node_roundtrip_and_sorting() {
        let a = ContentId::for_block(RAW_CODEC, b"a");
        let node = DagNode::directory(vec![
            DirEntry { name: "zeta".into(), cid: a, size: 1 },
            DirEntry { name: "alpha".into(), cid: a, size: 2 },
        ]);
        let bytes = node.encode().unwrap();
        let decoded = DagNode::decode(&bytes).unwrap();
        assert_eq!(decoded, node);
        assert_eq!(decoded.size(), 3);
        match decoded {
            DagNode::Directory { entries } => assert_eq!(entries[0].name, "alpha"),
            _ => panic!("expected directory"),
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(DagNode::decode(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_empty_layout() {
        let (root, nodes) = build(4, 0);
        assert!(root.is_none());
        assert!(nodes.is_empty());
    }

    #[test]
    fn test_single_leaf_is_wrapped() {
        let (root, nodes) = build(4, 1);
        let root = root.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(root.cid, nodes[0].0);
        assert_eq!(root.size, 10);
        match DagNode::decode(&nodes[0].1).unwrap() {
            DagNode::File { links, .. } => assert_eq!(links, vec![leaf(0)]),
            _ => panic!("expected file node"),
        }
    }

    #[test]
    fn test_exact_fanout_has_single_node() {
        let (root, nodes) = build(4, 4);
        assert_eq!(nodes.len(), 1);
        assert_eq!(root.unwrap().size, 40);
    }

    #[test]
    fn test_partial_levels_flush() {
        // 4 full nodes + 1 partial at level 0; 5 links at level 1 -> 1 full + 1 partial; root at level 2
        let (root, nodes) = build(4, 17);
        let root = root.unwrap();
        assert_eq!(root.size, 170);
        assert_eq!(nodes.len(), 5 + 2 + 1);
        assert_eq!(nodes.last().unwrap().0, root.cid);
    }

    #[test]
    fn test_root_size_sums_leaves() {
        for n in [2u64, 3, 9, 64, 65, 100] {
            let (root, _) = build(3, n);
            assert_eq!(root.unwrap().size, n * 10);
        }
    }
}
