use crate::FHashMap;
use crate::convert::repo_tree::CommitKey;
use crate::darcs::patch::TagPatch;
use crate::git::fast_export::Mark;

#[derive(Debug)]
pub(crate) enum ResolveError {
    TagNotApplied { tag: Vec<u8>, seq: u64 },
    UnknownIncludedTag { tag: Vec<u8>, name: Vec<u8> },
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TagNotApplied { tag, seq } => write!(
                f,
                "tag \"{}\" covers patch {seq}, which has not been applied",
                tag.escape_ascii(),
            ),
            Self::UnknownIncludedTag { tag, name } => write!(
                f,
                "tag \"{}\" references unknown tag \"{}\"",
                tag.escape_ascii(),
                name.escape_ascii(),
            ),
        }
    }
}

/// Where a tag record should point.
#[derive(Debug)]
pub(crate) enum TagTarget {
    /// Some prefix of the main line already matches the tag's covered set.
    Commit(Mark),
    /// The covered set stops short of the main line mid-prefix; the patches
    /// in `missing` must be replayed on a side branch forked off `base_key`.
    Replay {
        base_key: CommitKey,
        base_mark: Option<Mark>,
        missing: Vec<u64>,
    },
}

/// Maps each commit-path key (the tuple of patch ids applied along a line of
/// history) to the mark of the commit that resulted, and remembers every
/// processed tag's expanded membership for transitive references.
pub(crate) struct CommitGraph {
    commits: FHashMap<CommitKey, Option<Mark>>,
    tag_members: FHashMap<Vec<u8>, Vec<u64>>,
}

impl CommitGraph {
    pub(crate) fn new() -> Self {
        let mut commits = FHashMap::default();
        // before any patch there is no commit to point at
        commits.insert(CommitKey::new(), None);
        Self {
            commits,
            tag_members: FHashMap::default(),
        }
    }

    /// Records the commit for `key`. A key already recorded keeps its first
    /// mark.
    pub(crate) fn record(&mut self, key: &CommitKey, mark: Mark) {
        self.commits.entry(key.clone()).or_insert(Some(mark));
    }

    pub(crate) fn get(&self, key: &CommitKey) -> Option<Option<Mark>> {
        self.commits.get(key).copied()
    }

    /// Expands a tag's included-patch list into a sorted set of patch ids.
    /// Entries naming an earlier tag contribute that tag's members instead of
    /// their own sequence id.
    pub(crate) fn expand_tag(&self, tag: &TagPatch) -> Result<Vec<u64>, ResolveError> {
        let mut members = Vec::new();
        for entry in &tag.included {
            if let Some(ref_name) = entry.name.strip_prefix(b"TAG ") {
                let covered = self.tag_members.get(ref_name).ok_or_else(|| {
                    ResolveError::UnknownIncludedTag {
                        tag: tag.name.clone(),
                        name: ref_name.to_vec(),
                    }
                })?;
                members.extend_from_slice(covered);
            } else {
                members.push(entry.seq);
            }
        }
        members.sort_unstable();
        members.dedup();
        Ok(members)
    }

    pub(crate) fn register_tag(&mut self, name: &[u8], members: Vec<u64>) {
        self.tag_members.insert(name.to_vec(), members);
    }

    /// Resolves where a tag should point given the main line's applied-patch
    /// tuple. `members` must be sorted.
    pub(crate) fn resolve_tag(
        &self,
        tag_name: &[u8],
        members: &[u64],
        applied: &CommitKey,
    ) -> Result<TagTarget, ResolveError> {
        for &seq in members {
            if !applied.contains(&seq) {
                return Err(ResolveError::TagNotApplied {
                    tag: tag_name.to_vec(),
                    seq,
                });
            }
        }

        // longest prefix of the main line made up entirely of covered ids
        let prefix_len = applied
            .iter()
            .position(|seq| members.binary_search(seq).is_err())
            .unwrap_or(applied.len());

        let base_key: CommitKey = applied[..prefix_len].iter().copied().collect();
        let missing: Vec<u64> = members
            .iter()
            .copied()
            .filter(|seq| !base_key.contains(seq))
            .collect();
        // seeded with the empty key, and every applied prefix gets recorded,
        // so the lookup cannot miss
        let base_mark = self.get(&base_key).unwrap_or(None);

        if missing.is_empty() {
            match base_mark {
                Some(mark) => Ok(TagTarget::Commit(mark)),
                // only reachable for an empty covered set, which the driver
                // rejects before resolving
                None => Ok(TagTarget::Replay {
                    base_key,
                    base_mark: None,
                    missing,
                }),
            }
        } else {
            Ok(TagTarget::Replay {
                base_key,
                base_mark,
                missing,
            })
        }
    }
}
