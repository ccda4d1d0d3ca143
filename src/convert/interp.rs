use crate::FHashMap;
use crate::convert::file_tracker::{FileTracker, TrackError};
use crate::convert::repo_tree::{RepoTree, TreeError};
use crate::convert::scratch::{ContentStore, ScratchError};
use crate::darcs::patch::{HunkEdit, Op};
use crate::git::fast_export::PathChange;

#[derive(Debug)]
pub(crate) enum InterpError {
    Tree(TreeError),
    Track(TrackError),
    Scratch(ScratchError),
}

impl std::fmt::Display for InterpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tree(e) => e.fmt(f),
            Self::Track(e) => e.fmt(f),
            Self::Scratch(e) => e.fmt(f),
        }
    }
}

impl From<TreeError> for InterpError {
    fn from(e: TreeError) -> Self {
        Self::Tree(e)
    }
}

impl From<TrackError> for InterpError {
    fn from(e: TrackError) -> Self {
        Self::Track(e)
    }
}

impl From<ScratchError> for InterpError {
    fn from(e: ScratchError) -> Self {
        Self::Scratch(e)
    }
}

/// Applies the operations of one patch to the live tree and assembles the
/// per-path changes of the resulting revision.
///
/// Changes keep first-touch order; a later hunk on an already-written path
/// overwrites the pending content in place, so hunks of the same patch see
/// each other's edits without a round trip through the content store.
pub(crate) fn apply_ops(
    tree: &mut RepoTree,
    store: &mut ContentStore,
    ops: &[Op],
) -> Result<Vec<PathChange>, InterpError> {
    let mut changes: Vec<PathChange> = Vec::new();
    let mut write_index: FHashMap<Vec<u8>, usize> = FHashMap::default();

    for op in ops {
        match op {
            Op::AddDir(path) => {
                // git does not track empty directories
                tree.add_dir(path)?;
            }
            Op::AddFile(path) => {
                tree.add_file(path)?;
                write_index.insert(path.clone(), changes.len());
                changes.push(PathChange::Write {
                    path: path.clone(),
                    content: Vec::new(),
                    executable: false,
                });
            }
            Op::RmFile(path) => {
                tree.rm_file(path)?;
                write_index.remove(path);
                changes.push(PathChange::Delete { path: path.clone() });
            }
            Op::RmDir(path) => {
                tree.rm_dir(path)?;
            }
            Op::Hunk { path, line, edits } => {
                let old_content = match write_index.get(path) {
                    Some(&index) => match &changes[index] {
                        PathChange::Write { content, .. } => content.clone(),
                        PathChange::Delete { .. } => unreachable!(),
                    },
                    None => match tree.file(path)?.content {
                        Some(id) => store.load(id)?,
                        None => Vec::new(),
                    },
                };

                let mut tracker = FileTracker::open(path.clone(), &old_content, *line)?;
                for edit in edits {
                    match edit {
                        HunkEdit::Delete(text) => tracker.delete_line(text)?,
                        HunkEdit::Insert(text) => tracker.add_line(text),
                    }
                }
                let new_content = tracker.close();

                tree.file_mut(path)?.content = Some(store.store(&new_content)?);

                match write_index.get(path) {
                    Some(&index) => match &mut changes[index] {
                        PathChange::Write { content, .. } => *content = new_content,
                        PathChange::Delete { .. } => unreachable!(),
                    },
                    None => {
                        write_index.insert(path.clone(), changes.len());
                        changes.push(PathChange::Write {
                            path: path.clone(),
                            content: new_content,
                            executable: tree.file(path)?.executable,
                        });
                    }
                }
            }
        }
    }

    Ok(changes)
}
