use std::io::Read as _;
use std::path::{Path, PathBuf};

/// One file under `_darcs/patches`, identified by the 14-digit sequence id
/// embedded at the start of its name.
pub(crate) struct PatchFile {
    pub(crate) seq: u64,
    pub(crate) path: PathBuf,
}

#[derive(Debug)]
pub(crate) enum SourceError {
    NotADarcsRepo {
        path: PathBuf,
    },
    ReadDirError {
        path: PathBuf,
        error: std::io::Error,
    },
    FileReadError {
        path: PathBuf,
        error: std::io::Error,
    },
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotADarcsRepo { path } => {
                write!(f, "{path:?} is not a darcs repository (no _darcs/patches)")
            }
            Self::ReadDirError { path, error } => {
                write!(f, "failed to read directory {path:?}: {error}")
            }
            Self::FileReadError { path, error } => {
                write!(f, "failed to read file {path:?}: {error}")
            }
        }
    }
}

/// Enumerates patch files in application order. Files whose names do not
/// start with a sequence id (e.g. `pending`) are skipped.
pub(crate) fn enumerate_patches(repo_path: &Path) -> Result<Vec<PatchFile>, SourceError> {
    let patches_dir = repo_path.join("_darcs").join("patches");
    if !patches_dir.is_dir() {
        return Err(SourceError::NotADarcsRepo {
            path: repo_path.to_path_buf(),
        });
    }

    let entries = std::fs::read_dir(&patches_dir).map_err(|e| SourceError::ReadDirError {
        path: patches_dir.clone(),
        error: e,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| SourceError::ReadDirError {
            path: patches_dir.clone(),
            error: e,
        })?;
        let name = entry.file_name();
        let Some(seq) = leading_seq(name.as_encoded_bytes()) else {
            continue;
        };
        files.push(PatchFile {
            seq,
            path: entry.path(),
        });
    }

    // all entries share the same parent, so path order is file-name order
    files.sort_by(|a, b| a.path.cmp(&b.path));

    Ok(files)
}

fn leading_seq(name: &[u8]) -> Option<u64> {
    let digits = name.get(..14)?;
    if !digits.iter().all(|b| b.is_ascii_digit()) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}

const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];

/// Reads a patch file, transparently decompressing gzip.
pub(crate) fn read_patch(path: &Path) -> Result<Vec<u8>, SourceError> {
    let raw = std::fs::read(path).map_err(|e| SourceError::FileReadError {
        path: path.to_path_buf(),
        error: e,
    })?;

    if raw.starts_with(GZIP_MAGIC) {
        let mut decoder = flate2::read::GzDecoder::new(raw.as_slice());
        let mut data = Vec::new();
        decoder
            .read_to_end(&mut data)
            .map_err(|e| SourceError::FileReadError {
                path: path.to_path_buf(),
                error: e,
            })?;
        Ok(data)
    } else {
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::leading_seq;

    #[test]
    fn sequence_id_extraction() {
        assert_eq!(
            leading_seq(b"20040403154931-abc12-0123456789abcdef.gz"),
            Some(20040403154931),
        );
        assert_eq!(leading_seq(b"pending"), None);
        assert_eq!(leading_seq(b"2004040315493x-foo"), None);
        assert_eq!(leading_seq(b"2004"), None);
    }
}
