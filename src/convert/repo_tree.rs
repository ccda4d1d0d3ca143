use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::FHashMap;
use crate::convert::scratch::ContentId;

/// Ordered tuple of the patch sequence ids applied along one line of history.
/// The empty key denotes the state before any patch (no parent commit).
pub(crate) type CommitKey = SmallVec<[u64; 8]>;

#[derive(Debug)]
pub(crate) enum TreeError {
    EmptyPath,
    ParentNotFound { path: Vec<u8> },
    NotADirectory { path: Vec<u8> },
    NameOccupied { path: Vec<u8> },
    FileNotFound { path: Vec<u8> },
    DirNotFound { path: Vec<u8> },
    DirNotEmpty { path: Vec<u8> },
    UnknownCommit { key: CommitKey },
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPath => write!(f, "empty path"),
            Self::ParentNotFound { path } => write!(
                f,
                "parent directory of \"{}\" does not exist",
                path.escape_ascii(),
            ),
            Self::NotADirectory { path } => {
                write!(f, "\"{}\" is not a directory", path.escape_ascii())
            }
            Self::NameOccupied { path } => {
                write!(f, "\"{}\" already exists", path.escape_ascii())
            }
            Self::FileNotFound { path } => {
                write!(f, "file \"{}\" does not exist", path.escape_ascii())
            }
            Self::DirNotFound { path } => {
                write!(f, "directory \"{}\" does not exist", path.escape_ascii())
            }
            Self::DirNotEmpty { path } => {
                write!(f, "directory \"{}\" is not empty", path.escape_ascii())
            }
            Self::UnknownCommit { key } => {
                write!(f, "no saved tree state for commit path [")?;
                for (i, seq) in key.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{seq}")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Entry {
    Dir(Dir),
    File(FileRecord),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Dir {
    entries: BTreeMap<Vec<u8>, Entry>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct FileRecord {
    /// Current content version; `None` before any content exists.
    pub(crate) content: Option<ContentId>,
    pub(crate) executable: bool,
}

/// The live directory/file namespace. Paths are `/`-separated byte strings
/// without a leading `./`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RepoTree {
    root: Dir,
}

impl RepoTree {
    pub(crate) fn new() -> Self {
        Self {
            root: Dir::default(),
        }
    }

    fn walk_parent(&self, path: &[u8]) -> Result<(&Dir, Vec<u8>), TreeError> {
        let mut comps: Vec<&[u8]> = path.split(|&b| b == b'/').filter(|c| !c.is_empty()).collect();
        let leaf = comps.pop().ok_or(TreeError::EmptyPath)?;

        let mut dir = &self.root;
        for comp in comps {
            dir = match dir.entries.get(comp) {
                Some(Entry::Dir(sub)) => sub,
                Some(Entry::File(_)) => {
                    return Err(TreeError::NotADirectory {
                        path: path.to_vec(),
                    });
                }
                None => {
                    return Err(TreeError::ParentNotFound {
                        path: path.to_vec(),
                    });
                }
            };
        }

        Ok((dir, leaf.to_vec()))
    }

    fn walk_parent_mut(&mut self, path: &[u8]) -> Result<(&mut Dir, Vec<u8>), TreeError> {
        let mut comps: Vec<&[u8]> = path.split(|&b| b == b'/').filter(|c| !c.is_empty()).collect();
        let leaf = comps.pop().ok_or(TreeError::EmptyPath)?;

        let mut dir = &mut self.root;
        for comp in comps {
            dir = match dir.entries.get_mut(comp) {
                Some(Entry::Dir(sub)) => sub,
                Some(Entry::File(_)) => {
                    return Err(TreeError::NotADirectory {
                        path: path.to_vec(),
                    });
                }
                None => {
                    return Err(TreeError::ParentNotFound {
                        path: path.to_vec(),
                    });
                }
            };
        }

        Ok((dir, leaf.to_vec()))
    }

    pub(crate) fn add_dir(&mut self, path: &[u8]) -> Result<(), TreeError> {
        let (dir, leaf) = self.walk_parent_mut(path)?;
        if dir.entries.contains_key(&leaf) {
            return Err(TreeError::NameOccupied {
                path: path.to_vec(),
            });
        }
        dir.entries.insert(leaf, Entry::Dir(Dir::default()));
        Ok(())
    }

    pub(crate) fn add_file(&mut self, path: &[u8]) -> Result<(), TreeError> {
        let (dir, leaf) = self.walk_parent_mut(path)?;
        if dir.entries.contains_key(&leaf) {
            return Err(TreeError::NameOccupied {
                path: path.to_vec(),
            });
        }
        dir.entries.insert(
            leaf,
            Entry::File(FileRecord {
                content: None,
                executable: false,
            }),
        );
        Ok(())
    }

    pub(crate) fn file(&self, path: &[u8]) -> Result<&FileRecord, TreeError> {
        let (dir, leaf) = self.walk_parent(path)?;
        match dir.entries.get(&leaf) {
            Some(Entry::File(record)) => Ok(record),
            _ => Err(TreeError::FileNotFound {
                path: path.to_vec(),
            }),
        }
    }

    pub(crate) fn file_mut(&mut self, path: &[u8]) -> Result<&mut FileRecord, TreeError> {
        let (dir, leaf) = self.walk_parent_mut(path)?;
        match dir.entries.get_mut(&leaf) {
            Some(Entry::File(record)) => Ok(record),
            _ => Err(TreeError::FileNotFound {
                path: path.to_vec(),
            }),
        }
    }

    pub(crate) fn rm_file(&mut self, path: &[u8]) -> Result<(), TreeError> {
        let (dir, leaf) = self.walk_parent_mut(path)?;
        match dir.entries.get(&leaf) {
            Some(Entry::File(_)) => {
                dir.entries.remove(&leaf);
                Ok(())
            }
            _ => Err(TreeError::FileNotFound {
                path: path.to_vec(),
            }),
        }
    }

    pub(crate) fn rm_dir(&mut self, path: &[u8]) -> Result<(), TreeError> {
        let (dir, leaf) = self.walk_parent_mut(path)?;
        match dir.entries.get(&leaf) {
            Some(Entry::Dir(sub)) => {
                if !sub.entries.is_empty() {
                    return Err(TreeError::DirNotEmpty {
                        path: path.to_vec(),
                    });
                }
                dir.entries.remove(&leaf);
                Ok(())
            }
            _ => Err(TreeError::DirNotFound {
                path: path.to_vec(),
            }),
        }
    }
}

/// Deep-copy snapshots of the tree, keyed by commit path. Saving is
/// idempotent and restoring copies out, so stored states are never aliased
/// by later edits.
pub(crate) struct SnapshotStore {
    snapshots: FHashMap<CommitKey, RepoTree>,
}

impl SnapshotStore {
    pub(crate) fn new() -> Self {
        Self {
            snapshots: FHashMap::default(),
        }
    }

    pub(crate) fn save(&mut self, key: &CommitKey, tree: &RepoTree) {
        self.snapshots
            .entry(key.clone())
            .or_insert_with(|| tree.clone());
    }

    pub(crate) fn restore(&self, key: &CommitKey) -> Result<RepoTree, TreeError> {
        self.snapshots
            .get(key)
            .cloned()
            .ok_or_else(|| TreeError::UnknownCommit { key: key.clone() })
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.snapshots.len()
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::{CommitKey, RepoTree, SnapshotStore, TreeError};

    #[test]
    fn add_and_remove_entries() {
        let mut tree = RepoTree::new();
        tree.add_dir(b"src").unwrap();
        tree.add_file(b"src/main.c").unwrap();

        assert!(matches!(
            tree.add_file(b"src/main.c"),
            Err(TreeError::NameOccupied { .. }),
        ));
        assert!(matches!(
            tree.add_dir(b"src"),
            Err(TreeError::NameOccupied { .. }),
        ));
        assert!(matches!(
            tree.add_file(b"no/such/dir.c"),
            Err(TreeError::ParentNotFound { .. }),
        ));

        assert!(matches!(
            tree.rm_dir(b"src"),
            Err(TreeError::DirNotEmpty { .. }),
        ));
        tree.rm_file(b"src/main.c").unwrap();
        tree.rm_dir(b"src").unwrap();
        assert!(matches!(
            tree.rm_file(b"src/main.c"),
            Err(TreeError::ParentNotFound { .. }),
        ));
    }

    #[test]
    fn file_through_file_path_fails() {
        let mut tree = RepoTree::new();
        tree.add_file(b"a").unwrap();
        assert!(matches!(
            tree.add_file(b"a/b"),
            Err(TreeError::NotADirectory { .. }),
        ));
    }

    #[test]
    fn save_is_idempotent() {
        let mut tree = RepoTree::new();
        tree.add_file(b"a").unwrap();

        let mut snapshots = SnapshotStore::new();
        let key: CommitKey = smallvec![1];
        snapshots.save(&key, &tree);
        assert_eq!(snapshots.len(), 1);

        // re-saving the same key must not observe later edits
        tree.add_file(b"b").unwrap();
        snapshots.save(&key, &tree);
        assert_eq!(snapshots.len(), 1);

        let restored = snapshots.restore(&key).unwrap();
        assert!(restored.file(b"a").is_ok());
        assert!(restored.file(b"b").is_err());
    }

    #[test]
    fn snapshot_isolation() {
        let mut tree = RepoTree::new();
        tree.add_file(b"a").unwrap();

        let mut snapshots = SnapshotStore::new();
        let key: CommitKey = smallvec![1];
        snapshots.save(&key, &tree);

        let mut restored = snapshots.restore(&key).unwrap();
        let pristine = restored.clone();
        restored.add_file(b"b").unwrap();
        restored.rm_file(b"a").unwrap();

        // edits to a restored copy never leak into the store
        let again = snapshots.restore(&key).unwrap();
        assert_eq!(again, pristine);
    }

    #[test]
    fn restore_of_unsaved_key_fails() {
        let snapshots = SnapshotStore::new();
        let key: CommitKey = smallvec![1, 2];
        assert!(matches!(
            snapshots.restore(&key),
            Err(TreeError::UnknownCommit { .. }),
        ));
    }
}
