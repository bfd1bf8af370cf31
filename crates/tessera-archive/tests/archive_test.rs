use proptest::prelude::*;
use std::fs;
use std::path::Path;
use tessera_archive::{
    dataset_fingerprint, extract_file, piece_commitment, Archive, ArchiveBuilder, ArchiveError,
};
use tessera_types::{ContentAddresser, DagNode, EmptyPolicy};

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn write_tree(root: &Path) {
    fs::create_dir_all(root.join("docs/nested")).unwrap();
    fs::write(root.join("docs/readme.md"), b"# dataset\n").unwrap();
    fs::write(root.join("docs/nested/table.csv"), pattern(70_000, 3)).unwrap();
    fs::write(root.join("docs/empty.txt"), b"").unwrap();
}

#[test]
fn test_directory_tree_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(dir.path());
    let builder = ArchiveBuilder::new(4).unwrap();
    let archive = builder.build(&[dir.path().join("docs")], 4096).unwrap();

    let bytes = archive.to_bytes().unwrap();
    let parsed = Archive::from_bytes(&bytes).unwrap();
    assert!(parsed.same_content(&archive));
    parsed.validate_closed().unwrap();

    assert_eq!(extract_file(&parsed, "docs/readme.md").unwrap(), b"# dataset\n");
    assert_eq!(extract_file(&parsed, "docs/nested/table.csv").unwrap(), pattern(70_000, 3));
    assert!(extract_file(&parsed, "docs/empty.txt").unwrap().is_empty());
    assert!(matches!(extract_file(&parsed, "docs/nested"), Err(ArchiveError::NotFound(_))));
    assert!(matches!(extract_file(&parsed, "docs/missing"), Err(ArchiveError::NotFound(_))));

    let paths: Vec<_> = parsed.list_files().unwrap().into_iter().map(|f| f.path).collect();
    assert_eq!(paths, vec!["docs/empty.txt", "docs/nested/table.csv", "docs/readme.md"]);
}

#[test]
fn test_build_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(dir.path());
    let builder = ArchiveBuilder::new(8).unwrap();
    let a = builder.build(&[dir.path().join("docs")], 1024).unwrap();
    let b = builder.build(&[dir.path().join("docs")], 1024).unwrap();
    assert_eq!(a.roots(), b.roots());
    assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
}

#[test]
fn test_stream_address_matches_archived_file_root() {
    let dir = tempfile::tempdir().unwrap();
    let data = pattern(100_000, 9);
    let file = dir.path().join("blob.bin");
    fs::write(&file, &data).unwrap();

    let builder = ArchiveBuilder::new(5).unwrap();
    let archive = builder.build(&[&file], 1000).unwrap();
    let root = DagNode::decode(archive.get(archive.root().unwrap()).unwrap()).unwrap();
    let entry = root.entry("blob.bin").unwrap();

    let addresser = ContentAddresser::new(EmptyPolicy::Reject, 5).unwrap();
    let streamed = addresser.address_of_stream(data.as_slice(), 1000).unwrap();
    assert_eq!(streamed, entry.cid);
    assert_eq!(entry.size, 100_000);
}

#[test]
fn test_removed_block_makes_extract_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("data.bin");
    fs::write(&file, pattern(10_000, 1)).unwrap();
    let mut archive = ArchiveBuilder::new(4).unwrap().build(&[&file], 512).unwrap();

    let victim = *archive
        .blocks()
        .map(|(cid, _)| cid)
        .find(|cid| cid.is_raw())
        .unwrap();
    assert!(archive.remove_block(&victim).is_some());
    assert!(matches!(extract_file(&archive, "data.bin"), Err(ArchiveError::CorruptArchive(_))));
}

#[test]
fn test_duplicate_root_names_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("a")).unwrap();
    fs::create_dir_all(dir.path().join("b")).unwrap();
    fs::write(dir.path().join("a/same.txt"), b"1").unwrap();
    fs::write(dir.path().join("b/same.txt"), b"2").unwrap();

    let builder = ArchiveBuilder::new(4).unwrap();
    let err = builder
        .build(&[dir.path().join("a/same.txt"), dir.path().join("b/same.txt")], 64)
        .unwrap_err();
    assert!(matches!(err, ArchiveError::MalformedInput(_)));
}

#[cfg(unix)]
#[test]
fn test_symlinks_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("tree")).unwrap();
    fs::write(dir.path().join("target.txt"), b"x").unwrap();
    std::os::unix::fs::symlink(dir.path().join("target.txt"), dir.path().join("tree/link")).unwrap();

    let builder = ArchiveBuilder::new(4).unwrap();
    let err = builder.build(&[dir.path().join("tree")], 64).unwrap_err();
    assert!(matches!(err, ArchiveError::MalformedInput(_)));
    assert!(dataset_fingerprint(&[dir.path().join("tree")]).is_err());
}

#[test]
fn test_piece_commitment_stable_and_sensitive() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("payload");
    fs::write(&file, pattern(50_000, 4)).unwrap();
    let archive = ArchiveBuilder::new(4).unwrap().build(&[&file], 4096).unwrap();
    let bytes = archive.to_bytes().unwrap();

    let first = piece_commitment(&bytes, 0).unwrap();
    let reparsed = Archive::from_bytes(&bytes).unwrap().to_bytes().unwrap();
    assert_eq!(piece_commitment(&reparsed, 0).unwrap(), first);
    assert_eq!(first.padded_size, 65_536);

    let mut altered = bytes.clone();
    altered[bytes.len() / 2] ^= 0x80;
    assert_ne!(piece_commitment(&altered, 0).unwrap().digest, first.digest);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_archive_roundtrip(
        data in proptest::collection::vec(any::<u8>(), 0..20_000),
        chunk in 16usize..2048,
        fanout in 2usize..8,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.bin");
        fs::write(&file, &data).unwrap();

        let archive = ArchiveBuilder::new(fanout).unwrap().build(&[&file], chunk).unwrap();
        let parsed = Archive::from_bytes(&archive.to_bytes().unwrap()).unwrap();
        prop_assert!(parsed.same_content(&archive));
        prop_assert_eq!(extract_file(&parsed, "f.bin").unwrap(), data);
    }
}
