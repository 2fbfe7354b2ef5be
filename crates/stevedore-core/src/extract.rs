//! Decompression and unpacking of archive streams.

use crate::LoadError;
use flate2::read::GzDecoder;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Component, Path};
use tracing::{debug, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

impl Compression {
    pub fn from_magic_bytes(data: &[u8]) -> Self {
        if data.starts_with(&GZIP_MAGIC) {
            Self::Gzip
        } else if data.starts_with(&ZSTD_MAGIC) {
            Self::Zstd
        } else {
            Self::None
        }
    }
}

/// Wrap `reader` in the decoder its leading bytes call for.
pub fn decompress<'a, R: Read + 'a>(reader: R) -> io::Result<Box<dyn Read + 'a>> {
    let mut buffered = BufReader::new(reader);
    let compression = Compression::from_magic_bytes(buffered.fill_buf()?);
    debug!("detected {compression:?} stream");
    Ok(match compression {
        Compression::None => Box::new(buffered),
        Compression::Gzip => Box::new(GzDecoder::new(buffered)),
        Compression::Zstd => Box::new(zstd::stream::read::Decoder::with_buffer(buffered)?),
    })
}

/// Unpack a (possibly compressed) tar stream into `dest`.
///
/// Entries whose path would land outside `dest` are skipped.
pub fn unpack(reader: impl Read, dest: &Path) -> Result<(), LoadError> {
    let stream = decompress(reader).map_err(|e| LoadError::io(dest, e))?;
    let mut archive = tar::Archive::new(stream);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(false);
    archive.set_unpack_xattrs(false);

    let entries = archive.entries().map_err(|e| LoadError::io(dest, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| LoadError::io(dest, e))?;
        let path = entry
            .path()
            .map_err(|e| LoadError::io(dest, e))?
            .into_owned();

        if !is_safe_path(&path) {
            warn!(path = %path.display(), "skipping archive entry outside the workspace");
            continue;
        }
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| LoadError::io(dest.join(&path), e))?;
        if !unpacked {
            warn!(path = %path.display(), "skipping archive entry outside the workspace");
        }
    }
    Ok(())
}

fn is_safe_path(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
