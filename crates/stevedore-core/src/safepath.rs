//! Access to untrusted archive paths under an extraction root.
//!
//! Paths come from manifests inside the archive. Every read goes through a
//! [`cap_std::fs::Dir`] handle on the root, so neither a `..` sequence nor a
//! planted symlink can reach a file outside it. Escapes that are visible from
//! the path text alone are rejected before touching the filesystem.

use crate::LoadError;
use cap_std::ambient_authority;
use cap_std::fs::Dir;
use std::fs::File;
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};

/// An extracted archive tree, opened as a capability.
#[derive(Debug)]
pub struct ArchiveRoot {
    dir: Dir,
    path: PathBuf,
}

/// cap-std reports a resolution that leaves the directory as a bare
/// `PermissionDenied` carrying its own message rather than an OS error code.
fn is_escape(e: &io::Error) -> bool {
    e.kind() == ErrorKind::PermissionDenied && e.raw_os_error().is_none() && e.get_ref().is_some()
}

impl ArchiveRoot {
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let dir = Dir::open_ambient_dir(path, ambient_authority())
            .map_err(|e| LoadError::io(path, e))?;
        Ok(Self {
            dir,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn escape(&self, relative: &Path) -> LoadError {
        LoadError::PathEscape {
            root: self.path.clone(),
            path: relative.display().to_string(),
        }
    }

    fn error(&self, relative: &Path, e: io::Error) -> LoadError {
        if is_escape(&e) {
            self.escape(relative)
        } else {
            LoadError::io(self.path.join(relative), e)
        }
    }

    /// Reject absolute paths and `..` components that climb above the root.
    fn lexical(&self, relative: &Path) -> Result<(), LoadError> {
        let mut depth = 0usize;
        for component in relative.components() {
            match component {
                Component::Prefix(_) | Component::RootDir => return Err(self.escape(relative)),
                Component::CurDir => {}
                Component::ParentDir => {
                    depth = depth.checked_sub(1).ok_or_else(|| self.escape(relative))?;
                }
                Component::Normal(_) => depth += 1,
            }
        }
        Ok(())
    }

    /// Fail if `relative` leads outside the root. A missing target is fine.
    pub fn check(&self, relative: impl AsRef<Path>) -> Result<(), LoadError> {
        let relative = relative.as_ref();
        self.lexical(relative)?;
        match self.dir.metadata(relative) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.error(relative, e)),
        }
    }

    pub fn open_file(&self, relative: impl AsRef<Path>) -> Result<File, LoadError> {
        let relative = relative.as_ref();
        self.lexical(relative)?;
        self.dir
            .open(relative)
            .map(cap_std::fs::File::into_std)
            .map_err(|e| self.error(relative, e))
    }

    /// Like [`open_file`](Self::open_file), but a missing file is `None`.
    pub fn open_optional(&self, relative: impl AsRef<Path>) -> Result<Option<File>, LoadError> {
        match self.open_file(relative) {
            Ok(file) => Ok(Some(file)),
            Err(LoadError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn read(&self, relative: impl AsRef<Path>) -> Result<Vec<u8>, LoadError> {
        let relative = relative.as_ref();
        self.lexical(relative)?;
        self.dir.read(relative).map_err(|e| self.error(relative, e))
    }

    /// Like [`read`](Self::read), but a missing file is `None`.
    pub fn read_optional(&self, relative: impl AsRef<Path>) -> Result<Option<Vec<u8>>, LoadError> {
        match self.read(relative) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(LoadError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Names of the directories directly under the root, unsorted.
    ///
    /// Names that are not valid UTF-8 are returned as `Err` so the caller can
    /// report them.
    pub fn subdirectories(&self) -> Result<Vec<Result<String, String>>, LoadError> {
        let mut names = Vec::new();
        for entry in self.dir.entries().map_err(|e| LoadError::io(&self.path, e))? {
            let entry = entry.map_err(|e| LoadError::io(&self.path, e))?;
            let is_dir = entry
                .file_type()
                .map_err(|e| LoadError::io(&self.path, e))?
                .is_dir();
            if is_dir {
                names.push(
                    entry
                        .file_name()
                        .into_string()
                        .map_err(|name| name.to_string_lossy().into_owned()),
                );
            }
        }
        Ok(names)
    }
}
