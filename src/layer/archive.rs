//! Deterministic layer archiving
//!
//! A layer is a gzip-compressed tar of the regular files under one source
//! directory. Entries are written in file-name order with their paths
//! rewritten under a fixed in-image prefix, so the same tree always
//! produces the same layer regardless of where it sits on the host.

use crate::error::{LifecycleError, LifecycleResult};
use crate::image::Digest as ContentDigest;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Builder, Header, HeaderMode};
use tracing::debug;
use walkdir::WalkDir;

/// A packaged layer on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerArchive {
    /// Compressed tarball
    pub path: PathBuf,
    /// Digest of the compressed blob
    pub digest: ContentDigest,
    /// Digest of the uncompressed tar stream
    pub diff_id: ContentDigest,
    /// Compressed size in bytes
    pub size: u64,
}

struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    bytes_written: u64,
}

impl<W> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_written: 0,
        }
    }

    fn finish(self) -> (W, ContentDigest, u64) {
        let digest = ContentDigest::from_sha256_hash(self.hasher.finalize().as_slice());
        (self.inner, digest, self.bytes_written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.bytes_written = self
            .bytes_written
            .saturating_add(written.try_into().unwrap_or(u64::MAX));
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

type LayerWriter = HashingWriter<GzEncoder<HashingWriter<File>>>;

/// Archive the regular files under `source` into `dest`, storing each at
/// `prefix/<path relative to source>`. A leading `/` on `prefix` is dropped.
///
/// Any I/O failure aborts the whole layer.
pub fn archive_dir(source: &Path, prefix: &Path, dest: &Path) -> LifecycleResult<LayerArchive> {
    let wrap = |e: io::Error| LifecycleError::LayerArchive {
        path: source.to_path_buf(),
        source: e,
    };

    let prefix: PathBuf = prefix
        .components()
        .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
        .collect();

    let file = File::create(dest).map_err(wrap)?;
    let gz = GzEncoder::new(HashingWriter::new(file), Compression::default());
    let mut builder = Builder::new(HashingWriter::new(gz));

    let count = append_tree(&mut builder, source, &prefix).map_err(wrap)?;

    let (gz, diff_id, _) = builder.into_inner().map_err(wrap)?.finish();
    let (mut file, digest, size) = gz.finish().map_err(wrap)?.finish();
    file.flush().map_err(wrap)?;

    debug!(
        "Archived {} files from {} as {} ({} bytes)",
        count,
        source.display(),
        diff_id,
        size
    );

    Ok(LayerArchive {
        path: dest.to_path_buf(),
        digest,
        diff_id,
        size,
    })
}

fn append_tree(builder: &mut Builder<LayerWriter>, source: &Path, prefix: &Path) -> io::Result<usize> {
    let mut count = 0;
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let meta = fs::metadata(entry.path())?;

        let mut header = Header::new_gnu();
        header.set_metadata_in_mode(&meta, HeaderMode::Complete);
        // access and change times move on every read
        if let Some(gnu) = header.as_gnu_mut() {
            gnu.set_atime(0);
            gnu.set_ctime(0);
        }
        let file = File::open(entry.path())?;
        builder.append_data(&mut header, prefix.join(rel), file)?;
        count += 1;
    }
    builder.finish()?;
    Ok(count)
}
