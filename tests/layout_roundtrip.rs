// tests/layout_roundtrip.rs

//! Archive, checksum, signature, and split-archive round trips.

mod common;

use zarf::hash::sha256_of_file;
use zarf::layout::archive::{
    archive_package, extract_archive, reassemble_split, split_file, SplitPackageData,
};
use zarf::layout::signing::{sign_package, verify_package, SigningKeyPair};
use zarf::layout::PackagePaths;

fn build_layout(dir: &std::path::Path) -> PackagePaths {
    let paths = PackagePaths::new(dir);
    common::write_manifest(dir, &common::minimal_manifest("roundtrip"));
    std::fs::create_dir_all(paths.components_dir()).unwrap();
    std::fs::write(paths.component_tarball("c"), vec![42u8; 4096]).unwrap();
    std::fs::create_dir_all(paths.images_dir().join("blobs/sha256")).unwrap();
    std::fs::write(paths.images_dir().join("oci-layout"), "{\"imageLayoutVersion\":\"1.0.0\"}")
        .unwrap();
    std::fs::write(
        paths.images_dir().join("blobs/sha256/abc123"),
        vec![7u8; 2048],
    )
    .unwrap();
    paths.generate_checksums().unwrap();
    paths
}

#[test]
fn archive_roundtrip_preserves_manifest_and_verifies() {
    let source = tempfile::tempdir().unwrap();
    let paths = build_layout(source.path());
    let original = paths.read_package().unwrap();

    let out = tempfile::tempdir().unwrap();
    let tarball = out.path().join("roundtrip.tar.zst");
    archive_package(&paths, &tarball, 0).unwrap();

    let extracted_dir = tempfile::tempdir().unwrap();
    extract_archive(&tarball, extracted_dir.path()).unwrap();
    let extracted = PackagePaths::new(extracted_dir.path());

    // integrity survives the trip and the manifest is unchanged
    extracted.verify(None).unwrap();
    let reloaded = extracted.read_package().unwrap();
    assert_eq!(reloaded.metadata.name, original.metadata.name);
    assert_eq!(reloaded.components.len(), original.components.len());
}

#[test]
fn signed_package_survives_archive_and_rejects_tamper() {
    let source = tempfile::tempdir().unwrap();
    let paths = build_layout(source.path());

    let private = source.path().join("cosign.key");
    let public = source.path().join("cosign.pub");
    SigningKeyPair::generate()
        .save_to_files(&private, &public)
        .unwrap();
    sign_package(&paths, &private).unwrap();
    paths.generate_checksums().unwrap();

    paths.verify(Some(&public)).unwrap();

    // verification without a key must refuse a signed package
    let err = paths.verify(None).unwrap_err();
    assert!(err.to_string().contains("signed but no public key"));

    // a doctored manifest breaks the signature
    std::fs::write(paths.zarf_yaml(), "kind: ZarfInitConfig\nmetadata:\n  name: evil\n").unwrap();
    assert!(verify_package(&paths, &public).is_err());
}

#[test]
fn split_archive_concatenation_matches_header_sha() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("big.tar.zst");
    let payload: Vec<u8> = (0..3_200_000u32).map(|i| (i * 31 % 251) as u8).collect();
    std::fs::write(&archive, &payload).unwrap();
    let original_sha = sha256_of_file(&archive).unwrap();

    let parts = split_file(&archive, 1_000_000).unwrap();
    let header_bytes = std::fs::read(&parts[0]).unwrap();
    let trimmed: Vec<u8> = {
        let end = header_bytes
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map(|i| i + 1)
            .unwrap_or(0);
        header_bytes[..end].to_vec()
    };
    let header: SplitPackageData = serde_json::from_slice(&trimmed).unwrap();
    assert_eq!(header.sha256_sum, original_sha);
    assert_eq!(header.count, parts.len() - 1);

    // manual concatenation of part001.. equals the header SHA
    let mut joined = Vec::new();
    for part in &parts[1..] {
        joined.extend(std::fs::read(part).unwrap());
    }
    assert_eq!(zarf::hash::sha256_hex(&joined), header.sha256_sum);

    // and the reassembler agrees
    let rebuilt_dir = tempfile::tempdir().unwrap();
    let rebuilt = reassemble_split(&parts[0], rebuilt_dir.path()).unwrap();
    assert_eq!(std::fs::read(&rebuilt).unwrap(), payload);
}

#[test]
fn checksums_are_total_over_the_archive() {
    let source = tempfile::tempdir().unwrap();
    let paths = build_layout(source.path());

    let content = std::fs::read_to_string(paths.checksums()).unwrap();
    let listed: Vec<&str> = content
        .lines()
        .filter_map(|line| line.split_once(' ').map(|(_, rel)| rel))
        .collect();

    for (rel, _) in paths.files().unwrap() {
        if rel == "zarf.yaml" || rel == "checksums.txt" {
            assert!(!listed.contains(&rel.as_str()));
        } else {
            assert_eq!(
                listed.iter().filter(|l| **l == rel).count(),
                1,
                "{rel} must appear exactly once"
            );
        }
    }
}
