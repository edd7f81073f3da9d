// src/layout/archive.rs

//! Package archiving: tar + optional zstd, with large-archive splitting
//!
//! Split archives are a header chunk plus raw data chunks:
//! `<name>.part000` holds a JSON header `{count, bytes, sha256Sum}` padded
//! to 512 bytes, and `part001..partNNN` hold the tarball bytes in order.
//! Concatenating the data chunks and checking their SHA-256 against the
//! header reconstructs the archive.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Error;
use crate::hash::{sha256_of_file, Sha256Writer};
use crate::layout::PackagePaths;

/// Hard cap on the number of data chunks.
pub const MAX_SPLIT_CHUNKS: usize = 999;

/// Size the JSON header chunk is padded to.
const HEADER_SIZE: usize = 512;

/// Header prepended as chunk zero of a split archive
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SplitPackageData {
    /// Number of data chunks (excluding this header)
    pub count: usize,
    /// Total size of the reassembled archive
    pub bytes: u64,
    /// SHA-256 of the reassembled archive
    pub sha256_sum: String,
}

/// Tar the layout into `destination`, compressing with zstd unless the
/// destination ends in plain `.tar`, then split when the result exceeds
/// `max_package_size_mb`.
pub fn archive_package(
    paths: &PackagePaths,
    destination: &Path,
    max_package_size_mb: u64,
) -> Result<()> {
    info!(dest = %destination.display(), "writing package archive");

    let file = File::create(destination)
        .with_context(|| format!("Failed to create archive: {}", destination.display()))?;
    let writer = BufWriter::new(file);

    let compress = destination
        .extension()
        .map(|ext| ext == "zst")
        .unwrap_or(false);

    if compress {
        let encoder = zstd::stream::write::Encoder::new(writer, 0)
            .context("Failed to create zstd encoder")?
            .auto_finish();
        write_tar(paths, encoder)?;
    } else {
        write_tar(paths, writer)?;
    }

    let size = destination.metadata()?.len();
    let chunk_size = max_package_size_mb * 1000 * 1000;
    if max_package_size_mb > 0 && size > chunk_size {
        split_file(destination, chunk_size)?;
    }
    Ok(())
}

fn write_tar<W: Write>(paths: &PackagePaths, writer: W) -> Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    for (rel, abs) in paths.files()? {
        let mut file = File::open(&abs)
            .with_context(|| format!("Failed to open {} for archiving", abs.display()))?;
        builder
            .append_file(&rel, &mut file)
            .with_context(|| format!("Failed to archive {rel}"))?;
    }
    builder.into_inner().context("Failed to finish archive")
}

/// Split `source` into `<source>.part000..partNNN`, deleting the original.
pub fn split_file(source: &Path, chunk_size: u64) -> Result<Vec<PathBuf>> {
    let size = source.metadata()?.len();
    let count = size.div_ceil(chunk_size) as usize;
    if count > MAX_SPLIT_CHUNKS {
        return Err(Error::validation(format!(
            "splitting would produce {count} chunks, the maximum is {MAX_SPLIT_CHUNKS}; \
             raise the chunk size"
        ))
        .into());
    }

    let sha256_sum = sha256_of_file(source)?;
    let header = SplitPackageData {
        count,
        bytes: size,
        sha256_sum,
    };

    let part_path = |idx: usize| -> PathBuf {
        let name = format!(
            "{}.part{idx:03}",
            source.file_name().unwrap_or_default().to_string_lossy()
        );
        source.with_file_name(name)
    };

    let mut written = vec![part_path(0)];
    let mut header_bytes = serde_json::to_vec(&header).context("Failed to encode split header")?;
    header_bytes.resize(HEADER_SIZE.max(header_bytes.len()), b' ');
    std::fs::write(&written[0], &header_bytes)?;

    let mut reader = BufReader::new(File::open(source)?);
    for idx in 1..=count {
        let path = part_path(idx);
        let mut writer = BufWriter::new(File::create(&path)?);
        let mut taken = (&mut reader).take(chunk_size);
        std::io::copy(&mut taken, &mut writer)
            .with_context(|| format!("Failed to write chunk {}", path.display()))?;
        writer.flush()?;
        written.push(path);
    }

    std::fs::remove_file(source)?;
    info!(chunks = count, "package split into {} files", count + 1);
    Ok(written)
}

/// Rebuild a split archive from its `part000` header file, verifying the
/// SHA-256 recorded in the header. Returns the reassembled tarball path.
pub fn reassemble_split(part000: &Path, destination: &Path) -> Result<PathBuf> {
    let header_bytes = std::fs::read(part000)
        .with_context(|| format!("Failed to read split header: {}", part000.display()))?;
    let header: SplitPackageData = serde_json::from_slice(trim_header(&header_bytes))
        .context("Failed to parse split header")?;

    let base_name = part000
        .file_name()
        .and_then(|n| n.to_string_lossy().strip_suffix(".part000").map(String::from))
        .ok_or_else(|| Error::validation("split archives must end in .part000"))?;

    let out_path = destination.join(&base_name);
    let out = File::create(&out_path)
        .with_context(|| format!("Failed to create {}", out_path.display()))?;
    let mut writer = Sha256Writer::new(BufWriter::new(out));

    for idx in 1..=header.count {
        let part = part000.with_file_name(format!("{base_name}.part{idx:03}"));
        let mut reader = BufReader::new(
            File::open(&part)
                .with_context(|| format!("Split archive is missing {}", part.display()))?,
        );
        std::io::copy(&mut reader, &mut writer)?;
    }

    let (mut inner, sum, bytes) = writer.finish();
    inner.flush()?;
    if sum != header.sha256_sum {
        return Err(Error::integrity(format!(
            "reassembled archive checksum mismatch: expected {}, got {sum}",
            header.sha256_sum
        ))
        .into());
    }
    if bytes != header.bytes {
        return Err(Error::integrity(format!(
            "reassembled archive is {bytes} bytes, header says {}",
            header.bytes
        ))
        .into());
    }

    debug!(archive = %out_path.display(), "reassembled split package");
    Ok(out_path)
}

fn trim_header(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|idx| idx + 1)
        .unwrap_or(0);
    &bytes[..end]
}

/// Extract a package tarball (optionally zstd-compressed) into `destination`.
pub fn extract_archive(source: &Path, destination: &Path) -> Result<()> {
    std::fs::create_dir_all(destination)?;
    let file = File::open(source)
        .with_context(|| format!("Failed to open archive: {}", source.display()))?;
    let reader = BufReader::new(file);

    let compressed = source
        .extension()
        .map(|ext| ext == "zst")
        .unwrap_or(false);

    if compressed {
        let decoder =
            zstd::stream::read::Decoder::new(reader).context("Failed to create zstd decoder")?;
        unpack_tar(decoder, destination)
    } else {
        unpack_tar(reader, destination)
    }
}

fn unpack_tar<R: Read>(reader: R, destination: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_overwrite(true);
    archive
        .unpack(destination)
        .with_context(|| format!("Failed to extract archive into {}", destination.display()))
}

/// Extract a single component tarball into the components directory.
pub fn extract_component(tarball: &Path, components_dir: &Path) -> Result<()> {
    let file = File::open(tarball)
        .with_context(|| format!("Failed to open component tar: {}", tarball.display()))?;
    let mut archive = tar::Archive::new(BufReader::new(file));
    archive.set_overwrite(true);
    archive
        .unpack(components_dir)
        .with_context(|| format!("Failed to extract {}", tarball.display()))
}

/// Tar one assembled component directory into `components/<name>.tar` and
/// delete the source tree.
pub fn archive_component(component_dir: &Path) -> Result<PathBuf> {
    let name = component_dir
        .file_name()
        .ok_or_else(|| Error::validation("component directory has no name"))?
        .to_string_lossy()
        .to_string();
    let tarball = component_dir.with_extension("tar");

    let file = File::create(&tarball)
        .with_context(|| format!("Failed to create {}", tarball.display()))?;
    let mut builder = tar::Builder::new(BufWriter::new(file));
    builder.follow_symlinks(false);
    builder
        .append_dir_all(&name, component_dir)
        .with_context(|| format!("Failed to archive component {name}"))?;
    builder.into_inner()?.flush()?;

    std::fs::remove_dir_all(component_dir)?;
    Ok(tarball)
}
