use crate::FHashMap;
use crate::darcs::patch::{Patch, PatchBody, PatchHeader, parse_patch};
use crate::darcs::source;
use crate::git::fast_export::{DumpWriter, Mark, PathChange, RevMeta, sanitize_ref};
use crate::term_out::ProgressPrint;

mod file_tracker;
mod interp;
mod repo_tree;
mod resolver;
mod scratch;

use repo_tree::{CommitKey, RepoTree, SnapshotStore};
use resolver::{CommitGraph, TagTarget};
use scratch::ContentStore;

pub(crate) struct ConvertError;

pub(crate) struct Options {
    pub(crate) keep_scratch: bool,
    pub(crate) main_branch: Vec<u8>,
}

struct State<W> {
    dump: DumpWriter<W>,
    tree: RepoTree,
    snapshots: SnapshotStore,
    graph: CommitGraph,
    store: ContentStore,
    /// Patches applied on the main line, kept for tag replay.
    patches: FHashMap<u64, Patch>,
    main_key: CommitKey,
    main_mark: Option<Mark>,
    num_commits: u64,
    num_tags: u64,
}

pub(crate) fn convert<W: std::io::Write>(
    progress_print: &ProgressPrint,
    options: &Options,
    src_path: &std::path::Path,
    out: W,
) -> Result<(), ConvertError> {
    progress_print.set_progress("enumerating patches".into());

    let patch_files = match source::enumerate_patches(src_path) {
        Ok(patch_files) => patch_files,
        Err(e) => {
            tracing::error!("failed to enumerate patches: {e}");
            return Err(ConvertError);
        }
    };
    tracing::info!("found {} patch files", patch_files.len());

    let store = match ContentStore::create(options.keep_scratch) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("failed to create scratch area: {e}");
            return Err(ConvertError);
        }
    };
    if options.keep_scratch {
        tracing::info!("keeping scratch directory {:?}", store.dir_path());
    }

    let mut state = State {
        dump: DumpWriter::new(out),
        tree: RepoTree::new(),
        snapshots: SnapshotStore::new(),
        graph: CommitGraph::new(),
        store,
        patches: FHashMap::default(),
        main_key: CommitKey::new(),
        main_mark: None,
        num_commits: 0,
        num_tags: 0,
    };
    // the pre-history state is a valid replay base
    state.snapshots.save(&state.main_key, &state.tree);

    let num_patches = patch_files.len();
    for (i, patch_file) in patch_files.iter().enumerate() {
        progress_print.set_progress(format!("converting patch {}/{num_patches}", i + 1));
        tracing::debug!("processing {:?}", patch_file.path);

        let raw = match source::read_patch(&patch_file.path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!("{e}");
                return Err(ConvertError);
            }
        };
        let patch = match parse_patch(&raw) {
            Ok(patch) => patch,
            Err(e) => {
                tracing::error!("failed to parse {:?}: {e}", patch_file.path);
                return Err(ConvertError);
            }
        };

        if patch.header.seq != patch_file.seq {
            tracing::warn!(
                "sequence id {} in {:?} does not match its file name",
                patch.header.seq,
                patch_file.path,
            );
        }

        if matches!(patch.body, PatchBody::Tag(_)) {
            process_tag(&mut state, patch)?;
        } else {
            apply_main_patch(&mut state, options, patch)?;
        }
    }

    tracing::info!(
        "emitted {} commits and {} tags",
        state.num_commits,
        state.num_tags,
    );

    Ok(())
}

fn emit_commit<W: std::io::Write>(
    state: &mut State<W>,
    branch: &[u8],
    header: &PatchHeader,
    parent: Option<Mark>,
    changes: &[PathChange],
) -> Result<Mark, ConvertError> {
    let mut message = header.log.clone();
    message.push(b'\n');
    let meta = RevMeta {
        timestamp: header.timestamp,
        author: &header.author,
        message: &message,
    };

    match state.dump.emit_revision(branch, &meta, parent, changes) {
        Ok(mark) => {
            state.num_commits += 1;
            Ok(mark)
        }
        Err(e) => {
            tracing::error!("{e}");
            Err(ConvertError)
        }
    }
}

fn apply_main_patch<W: std::io::Write>(
    state: &mut State<W>,
    options: &Options,
    patch: Patch,
) -> Result<(), ConvertError> {
    let PatchBody::Changes(ref ops) = patch.body else {
        unreachable!();
    };

    let seq = patch.header.seq;
    if state.patches.contains_key(&seq) {
        tracing::error!("duplicate patch sequence id {seq}");
        return Err(ConvertError);
    }

    let changes = match interp::apply_ops(&mut state.tree, &mut state.store, ops) {
        Ok(changes) => changes,
        Err(e) => {
            tracing::error!("failed to apply patch {seq}: {e}");
            return Err(ConvertError);
        }
    };

    let mut key = state.main_key.clone();
    key.push(seq);

    let parent = state.main_mark;
    let mark = emit_commit(state, &options.main_branch, &patch.header, parent, &changes)?;

    state.graph.record(&key, mark);
    state.snapshots.save(&key, &state.tree);
    state.main_key = key;
    state.main_mark = Some(mark);
    state.patches.insert(seq, patch);

    Ok(())
}

fn process_tag<W: std::io::Write>(
    state: &mut State<W>,
    patch: Patch,
) -> Result<(), ConvertError> {
    let PatchBody::Tag(ref tag) = patch.body else {
        unreachable!();
    };

    let members = match state.graph.expand_tag(tag) {
        Ok(members) => members,
        Err(e) => {
            tracing::error!("{e}");
            return Err(ConvertError);
        }
    };
    state.graph.register_tag(&tag.name, members.clone());

    if members.is_empty() {
        tracing::warn!(
            "tag \"{}\" covers no patches, skipping",
            tag.name.escape_ascii(),
        );
        return Ok(());
    }

    let target = match state.graph.resolve_tag(&tag.name, &members, &state.main_key) {
        Ok(target) => target,
        Err(e) => {
            tracing::error!("{e}");
            return Err(ConvertError);
        }
    };

    let from_mark = match target {
        TagTarget::Commit(mark) => mark,
        TagTarget::Replay {
            base_key,
            base_mark,
            missing,
        } => replay_for_tag(state, tag.name.clone(), base_key, base_mark, missing)?,
    };

    let mut message = patch.header.log.clone();
    message.push(b'\n');
    let meta = RevMeta {
        timestamp: patch.header.timestamp,
        author: &patch.header.author,
        message: &message,
    };
    if let Err(e) = state.dump.emit_tag(&tag.name, &meta, from_mark) {
        tracing::error!("{e}");
        return Err(ConvertError);
    }
    state.num_tags += 1;

    Ok(())
}

/// Replays the patches in `missing` on a side branch forked off `base_key`
/// and returns the mark of the branch head. The main-line tree is restored
/// before returning.
fn replay_for_tag<W: std::io::Write>(
    state: &mut State<W>,
    tag_name: Vec<u8>,
    base_key: CommitKey,
    base_mark: Option<Mark>,
    missing: Vec<u64>,
) -> Result<Mark, ConvertError> {
    tracing::info!(
        "tag \"{}\" does not match a main line commit, replaying {} patches on a side branch",
        tag_name.escape_ascii(),
        missing.len(),
    );

    let mut branch = b"tag-replay/".to_vec();
    branch.extend_from_slice(&sanitize_ref(&tag_name));

    state.tree = match state.snapshots.restore(&base_key) {
        Ok(tree) => tree,
        Err(e) => {
            tracing::error!("{e}");
            return Err(ConvertError);
        }
    };

    let mut key = base_key;
    let mut cur_mark = base_mark;
    for seq in missing {
        key.push(seq);

        // an earlier tag may have replayed this very sequence already
        if let Some(Some(mark)) = state.graph.get(&key) {
            cur_mark = Some(mark);
            state.tree = match state.snapshots.restore(&key) {
                Ok(tree) => tree,
                Err(e) => {
                    tracing::error!("{e}");
                    return Err(ConvertError);
                }
            };
            continue;
        }

        // subset verification guarantees the patch was applied and retained
        let Some(patch) = state.patches.remove(&seq) else {
            tracing::error!("no retained patch for sequence id {seq}");
            return Err(ConvertError);
        };
        let PatchBody::Changes(ref ops) = patch.body else {
            unreachable!();
        };

        let changes = match interp::apply_ops(&mut state.tree, &mut state.store, ops) {
            Ok(changes) => changes,
            Err(e) => {
                tracing::error!("failed to replay patch {seq}: {e}");
                return Err(ConvertError);
            }
        };

        let mark = emit_commit(state, &branch, &patch.header, cur_mark, &changes)?;
        state.graph.record(&key, mark);
        state.snapshots.save(&key, &state.tree);
        cur_mark = Some(mark);

        state.patches.insert(seq, patch);
    }

    state.tree = match state.snapshots.restore(&state.main_key) {
        Ok(tree) => tree,
        Err(e) => {
            tracing::error!("{e}");
            return Err(ConvertError);
        }
    };

    // a non-empty covered set always yields at least one commit to point at
    match cur_mark {
        Some(mark) => Ok(mark),
        None => {
            tracing::error!(
                "tag \"{}\" resolved to no commit",
                tag_name.escape_ascii(),
            );
            Err(ConvertError)
        }
    }
}
