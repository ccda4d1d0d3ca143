use std::io::{Read as _, Seek as _, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub(crate) enum ScratchError {
    CreateDirError {
        path: std::path::PathBuf,
        error: std::io::Error,
    },
    CreateFileError {
        path: std::path::PathBuf,
        error: std::io::Error,
    },
    WriteFileError {
        path: std::path::PathBuf,
        error: std::io::Error,
    },
    ReadFileError {
        path: std::path::PathBuf,
        error: std::io::Error,
    },
}

impl std::fmt::Display for ScratchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateDirError { path, error } => {
                write!(f, "failed to create directory {path:?}: {error}")
            }
            Self::CreateFileError { path, error } => {
                write!(f, "failed to create file {path:?}: {error}")
            }
            Self::WriteFileError { path, error } => {
                write!(f, "failed to write to file {path:?}: {error}")
            }
            Self::ReadFileError { path, error } => {
                write!(f, "failed to read from file {path:?}: {error}")
            }
        }
    }
}

/// Handle to one stored content version. Identifies a record in the scratch
/// file and is never invalidated while the store lives.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ContentId {
    offset: u64,
    len: u64,
}

static STORE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Append-only on-disk store for file content versions. Contents are written
/// once and addressed by the returned [`ContentId`]; nothing is ever
/// overwritten, so every historical version stays reachable until the store
/// is dropped.
pub(crate) struct ContentStore {
    dir_path: std::path::PathBuf,
    file_path: std::path::PathBuf,
    file: std::fs::File,
    end: u64,
    keep: bool,
}

impl ContentStore {
    pub(crate) fn create(keep: bool) -> Result<Self, ScratchError> {
        // the counter keeps concurrent stores within one process apart
        let dir_path = std::env::temp_dir().join(format!(
            "darcs2git-{}-{}",
            std::process::id(),
            STORE_COUNTER.fetch_add(1, Ordering::Relaxed),
        ));
        std::fs::create_dir(&dir_path).map_err(|e| ScratchError::CreateDirError {
            path: dir_path.clone(),
            error: e,
        })?;

        let file_path = dir_path.join("contents");
        let file = std::fs::OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&file_path)
            .map_err(|e| ScratchError::CreateFileError {
                path: file_path.clone(),
                error: e,
            })?;

        Ok(Self {
            dir_path,
            file_path,
            file,
            end: 0,
            keep,
        })
    }

    pub(crate) fn dir_path(&self) -> &std::path::Path {
        &self.dir_path
    }

    pub(crate) fn store(&mut self, content: &[u8]) -> Result<ContentId, ScratchError> {
        let offset = self.end;
        self.file
            .write_all(content)
            .map_err(|e| ScratchError::WriteFileError {
                path: self.file_path.clone(),
                error: e,
            })?;
        self.end += content.len() as u64;
        Ok(ContentId {
            offset,
            len: content.len() as u64,
        })
    }

    pub(crate) fn load(&mut self, id: ContentId) -> Result<Vec<u8>, ScratchError> {
        self.file
            .seek(std::io::SeekFrom::Start(id.offset))
            .map_err(|e| ScratchError::ReadFileError {
                path: self.file_path.clone(),
                error: e,
            })?;

        let mut data = vec![0; usize::try_from(id.len).unwrap_or(usize::MAX)];
        self.file
            .read_exact(&mut data)
            .map_err(|e| ScratchError::ReadFileError {
                path: self.file_path.clone(),
                error: e,
            })?;

        self.file
            .seek(std::io::SeekFrom::Start(self.end))
            .map_err(|e| ScratchError::WriteFileError {
                path: self.file_path.clone(),
                error: e,
            })?;

        Ok(data)
    }
}

impl Drop for ContentStore {
    fn drop(&mut self) {
        if !self.keep {
            let _ = std::fs::remove_file(&self.file_path);
            let _ = std::fs::remove_dir(&self.dir_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ContentStore;

    #[test]
    fn store_and_load() {
        let mut store = ContentStore::create(false).unwrap();

        let id_a = store.store(b"hello\n").unwrap();
        let id_b = store.store(b"").unwrap();
        let id_c = store.store(b"hello\nworld\n").unwrap();

        assert_eq!(store.load(id_b).unwrap(), b"");
        assert_eq!(store.load(id_c).unwrap(), b"hello\nworld\n");
        assert_eq!(store.load(id_a).unwrap(), b"hello\n");

        // loads in the middle must not clobber later appends
        let id_d = store.store(b"bye\n").unwrap();
        assert_eq!(store.load(id_d).unwrap(), b"bye\n");
        assert_eq!(store.load(id_a).unwrap(), b"hello\n");
    }

    #[test]
    fn scratch_dir_is_removed_on_drop() {
        let store = ContentStore::create(false).unwrap();
        let dir = store.dir_path().to_path_buf();
        assert!(dir.is_dir());
        drop(store);
        assert!(!dir.exists());
    }
}
