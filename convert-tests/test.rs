use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::defs;

pub(crate) fn run_test(test_path: &Path) -> Result<(), String> {
    let temp_dir = get_tmp_dir()?;
    let darcs2git_bin = Path::new(env!("CARGO_BIN_EXE_darcs2git"));

    let test_def_raw =
        std::fs::read(test_path).map_err(|e| format!("failed to read {test_path:?}: {e}"))?;

    let test_def: defs::Test = serde_yaml::from_slice(&test_def_raw)
        .map_err(|e| format!("failed to parse {test_path:?}: {e}"))?;

    let repo_path = temp_dir.join("repo");
    make_darcs_repo(&repo_path, &test_def)?;

    let cmd_out = std::process::Command::new(darcs2git_bin)
        .arg("--no-progress")
        .arg(&repo_path)
        .output()
        .map_err(|e| format!("failed to run {darcs2git_bin:?}: {e}"))?;

    let expect_exit_code = i32::from(test_def.failed);
    if cmd_out.status.code() != Some(expect_exit_code) {
        return Err(format!(
            "converter finished with exit code {}\ndarcs2git stdout:\n{}darcs2git stderr:\n{}",
            cmd_out.status,
            String::from_utf8_lossy(&cmd_out.stdout),
            String::from_utf8_lossy(&cmd_out.stderr),
        ));
    }

    if let Some(ref expected) = test_def.stderr_contains {
        let stderr = String::from_utf8_lossy(&cmd_out.stderr);
        if !stderr.contains(expected) {
            return Err(format!(
                "expected {expected:?} on stderr, got:\n{stderr}",
            ));
        }
    }

    if !test_def.failed {
        let dump = parse_dump(&cmd_out.stdout)?;
        check_dump(&test_def, &dump)?;
    }

    std::fs::remove_dir_all(&temp_dir)
        .map_err(|e| format!("failed to remove {temp_dir:?}: {e}"))?;

    Ok(())
}

fn get_tmp_dir() -> Result<PathBuf, String> {
    use rand::{Rng as _, SeedableRng as _};

    let mut rng = rand::rngs::StdRng::from_os_rng();

    loop {
        let mut path = PathBuf::from(env!("CARGO_TARGET_TMPDIR"));
        path.push(format!("convert-test-{:08x}", rng.random::<u32>()));

        match std::fs::create_dir(&path) {
            Ok(()) => {
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                continue;
            }
            Err(e) => {
                return Err(format!("failed to create directory {path:?}: {e}"));
            }
        }
    }
}

fn make_darcs_repo(repo_path: &Path, test_def: &defs::Test) -> Result<(), String> {
    use std::io::Write as _;

    let patches_path = repo_path.join("_darcs").join("patches");
    std::fs::create_dir_all(&patches_path)
        .map_err(|e| format!("failed to create {patches_path:?}: {e}"))?;

    for patch in test_def.patches.iter() {
        let mut data = patch.text.clone().into_bytes();
        let mut name = format!("{}-test", patch.seq);
        if test_def.gzip {
            let mut compressed = Vec::new();
            let mut encoder =
                flate2::write::GzEncoder::new(&mut compressed, flate2::Compression::default());
            encoder.write_all(&data).unwrap();
            encoder.finish().unwrap();
            data = compressed;
            name.push_str(".gz");
        }

        let patch_path = patches_path.join(name);
        std::fs::write(&patch_path, data)
            .map_err(|e| format!("failed to write {patch_path:?}: {e}"))?;
    }

    Ok(())
}

// Structural model of the emitted fast-import stream.

struct Dump {
    blobs: BTreeMap<u64, Vec<u8>>,
    commits: Vec<DumpCommit>,
    tags: Vec<DumpTag>,
}

struct DumpCommit {
    branch: String,
    mark: u64,
    author: Ident,
    committer: Ident,
    message: Vec<u8>,
    from: Option<u64>,
    changes: Vec<DumpChange>,
}

enum DumpChange {
    Write {
        path: String,
        exec: bool,
        blob: u64,
    },
    Delete {
        path: String,
    },
}

struct DumpTag {
    name: String,
    from: u64,
    tagger: Ident,
    message: Vec<u8>,
}

struct Ident {
    who: String,
    timestamp: i64,
}

struct DumpReader<'a> {
    data: &'a [u8],
    pos: usize,
    last_mark: u64,
}

impl<'a> DumpReader<'a> {
    fn next_line(&mut self) -> Result<&'a str, String> {
        let rest = &self.data[self.pos..];
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or("unterminated line in dump")?;
        self.pos += end + 1;
        std::str::from_utf8(&rest[..end]).map_err(|e| format!("non-UTF-8 dump line: {e}"))
    }

    fn expect_mark(&mut self) -> Result<u64, String> {
        let line = self.next_line()?;
        let mark = line
            .strip_prefix("mark :")
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| format!("expected mark line, got {line:?}"))?;
        // marks must be allocated strictly increasing
        if mark <= self.last_mark {
            return Err(format!(
                "mark :{mark} allocated after mark :{}",
                self.last_mark,
            ));
        }
        self.last_mark = mark;
        Ok(mark)
    }

    fn expect_data(&mut self) -> Result<Vec<u8>, String> {
        let line = self.next_line()?;
        let len = line
            .strip_prefix("data ")
            .and_then(|n| n.parse::<usize>().ok())
            .ok_or_else(|| format!("expected data line, got {line:?}"))?;

        let payload = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or("truncated data payload")?
            .to_vec();
        self.pos += len;
        if self.data.get(self.pos) != Some(&b'\n') {
            return Err("missing newline after data payload".into());
        }
        self.pos += 1;
        Ok(payload)
    }

    fn expect_ident(&mut self, role: &str) -> Result<Ident, String> {
        let line = self.next_line()?;
        let rest = line
            .strip_prefix(role)
            .and_then(|r| r.strip_prefix(' '))
            .ok_or_else(|| format!("expected {role} line, got {line:?}"))?;
        let rest = rest
            .strip_suffix(" +0000")
            .ok_or_else(|| format!("expected +0000 offset in {line:?}"))?;
        let (who, timestamp) = rest
            .rsplit_once(' ')
            .ok_or_else(|| format!("malformed {role} line {line:?}"))?;
        let timestamp = timestamp
            .parse::<i64>()
            .map_err(|e| format!("bad timestamp in {line:?}: {e}"))?;
        Ok(Ident {
            who: who.to_owned(),
            timestamp,
        })
    }
}

fn parse_dump(data: &[u8]) -> Result<Dump, String> {
    let mut reader = DumpReader {
        data,
        pos: 0,
        last_mark: 0,
    };
    let mut dump = Dump {
        blobs: BTreeMap::new(),
        commits: Vec::new(),
        tags: Vec::new(),
    };

    while reader.pos < data.len() {
        let line = reader.next_line()?;
        if line.is_empty() {
            continue;
        }

        if line == "blob" {
            let mark = reader.expect_mark()?;
            let content = reader.expect_data()?;
            dump.blobs.insert(mark, content);
        } else if let Some(branch) = line.strip_prefix("commit refs/heads/") {
            let branch = branch.to_owned();
            let mark = reader.expect_mark()?;
            let author = reader.expect_ident("author")?;
            let committer = reader.expect_ident("committer")?;
            let message = reader.expect_data()?;

            let mut from = None;
            let mut changes = Vec::new();
            loop {
                let line = reader.next_line()?;
                if line.is_empty() {
                    break;
                }
                if let Some(f) = line.strip_prefix("from :") {
                    from = Some(
                        f.parse::<u64>()
                            .map_err(|e| format!("bad from mark {line:?}: {e}"))?,
                    );
                } else if let Some(rest) = line.strip_prefix("M ") {
                    let (mode, rest) = rest
                        .split_once(" :")
                        .ok_or_else(|| format!("malformed modify line {line:?}"))?;
                    let (blob, path) = rest
                        .split_once(' ')
                        .ok_or_else(|| format!("malformed modify line {line:?}"))?;
                    let exec = match mode {
                        "100644" => false,
                        "100755" => true,
                        _ => return Err(format!("unexpected file mode in {line:?}")),
                    };
                    changes.push(DumpChange::Write {
                        path: path.to_owned(),
                        exec,
                        blob: blob
                            .parse::<u64>()
                            .map_err(|e| format!("bad blob mark {line:?}: {e}"))?,
                    });
                } else if let Some(path) = line.strip_prefix("D ") {
                    changes.push(DumpChange::Delete {
                        path: path.to_owned(),
                    });
                } else {
                    return Err(format!("unexpected line in commit record: {line:?}"));
                }
            }

            dump.commits.push(DumpCommit {
                branch,
                mark,
                author,
                committer,
                message,
                from,
                changes,
            });
        } else if let Some(name) = line.strip_prefix("tag ") {
            let name = name.to_owned();
            let from_line = reader.next_line()?;
            let from = from_line
                .strip_prefix("from :")
                .and_then(|n| n.parse::<u64>().ok())
                .ok_or_else(|| format!("expected from line, got {from_line:?}"))?;
            let tagger = reader.expect_ident("tagger")?;
            let message = reader.expect_data()?;

            dump.tags.push(DumpTag {
                name,
                from,
                tagger,
                message,
            });
        } else {
            return Err(format!("unexpected dump line: {line:?}"));
        }
    }

    Ok(dump)
}

fn check_dump(test_def: &defs::Test, dump: &Dump) -> Result<(), String> {
    if !test_def.commits.is_empty() && test_def.commits.len() != dump.commits.len() {
        return Err(format!(
            "expected {} commits, dump has {}",
            test_def.commits.len(),
            dump.commits.len(),
        ));
    }
    if test_def.tags.len() != dump.tags.len() {
        return Err(format!(
            "expected {} tags, dump has {}",
            test_def.tags.len(),
            dump.tags.len(),
        ));
    }

    for (i, expected) in test_def.commits.iter().enumerate() {
        check_commit(dump, i, expected).map_err(|e| format!("commit {}: {e}", i + 1))?;
    }

    for (expected, tag) in test_def.tags.iter().zip(&dump.tags) {
        check_tag(dump, test_def, tag, expected)
            .map_err(|e| format!("tag {:?}: {e}", expected.tag))?;
    }

    Ok(())
}

fn check_commit(dump: &Dump, index: usize, expected: &defs::CommitDef) -> Result<(), String> {
    let commit = &dump.commits[index];

    if commit.branch != expected.branch {
        return Err(format!(
            "on branch {:?}, expected {:?}",
            commit.branch, expected.branch,
        ));
    }

    if let Some(ref author) = expected.author {
        if commit.author.who != *author {
            return Err(format!(
                "author {:?}, expected {author:?}",
                commit.author.who,
            ));
        }
        if commit.committer.who != *author {
            return Err(format!(
                "committer {:?}, expected {author:?}",
                commit.committer.who,
            ));
        }
    }

    if let Some(timestamp) = expected.timestamp {
        if commit.author.timestamp != timestamp || commit.committer.timestamp != timestamp {
            return Err(format!(
                "timestamp {}, expected {timestamp}",
                commit.author.timestamp,
            ));
        }
    }

    if let Some(ref message) = expected.message {
        if commit.message != message.as_bytes() {
            return Err(format!(
                "message {:?}, expected {message:?}",
                String::from_utf8_lossy(&commit.message),
            ));
        }
    }

    let expected_from = match expected.parent {
        Some(parent) => Some(
            dump.commits
                .get(parent - 1)
                .ok_or_else(|| format!("parent index {parent} out of range"))?
                .mark,
        ),
        None => None,
    };
    if commit.from != expected_from {
        return Err(format!(
            "parent mark {:?}, expected {expected_from:?}",
            commit.from,
        ));
    }

    if let Some(ref tree) = expected.tree {
        let files = resolve_files(dump, index)?;
        let mut expected_files = BTreeMap::new();
        for (path, file) in tree {
            expected_files.insert(
                path.clone(),
                (file.data().as_bytes().to_vec(), file.exec()),
            );
        }
        if files != expected_files {
            return Err(format!(
                "tree mismatch:\n  got      {:?}\n  expected {expected_files:?}",
                files,
            ));
        }
    }

    Ok(())
}

/// Materializes the file listing at a commit by replaying the change lists
/// along its parent chain.
fn resolve_files(
    dump: &Dump,
    index: usize,
) -> Result<BTreeMap<String, (Vec<u8>, bool)>, String> {
    let commit = &dump.commits[index];

    let mut files = match commit.from {
        Some(from) => {
            let parent_index = dump
                .commits
                .iter()
                .position(|c| c.mark == from)
                .ok_or_else(|| format!("from mark :{from} is not a commit"))?;
            resolve_files(dump, parent_index)?
        }
        None => BTreeMap::new(),
    };

    for change in &commit.changes {
        match change {
            DumpChange::Write { path, exec, blob } => {
                let content = dump
                    .blobs
                    .get(blob)
                    .ok_or_else(|| format!("blob :{blob} not in dump"))?;
                files.insert(path.clone(), (content.clone(), *exec));
            }
            DumpChange::Delete { path } => {
                if files.remove(path).is_none() {
                    return Err(format!("delete of unknown path {path:?}"));
                }
            }
        }
    }

    Ok(files)
}

fn check_tag(
    dump: &Dump,
    test_def: &defs::Test,
    tag: &DumpTag,
    expected: &defs::TagDef,
) -> Result<(), String> {
    if tag.name != expected.tag {
        return Err(format!("named {:?}, expected {:?}", tag.name, expected.tag));
    }

    let target = dump
        .commits
        .get(expected.commit - 1)
        .ok_or_else(|| format!("commit index {} out of range", expected.commit))?;
    // the expected commit list is checked to match the dump one-to-one, so
    // indexing it is indexing the dump
    if test_def.commits.is_empty() {
        return Err("tag checks need an explicit commit list".into());
    }
    if tag.from != target.mark {
        return Err(format!(
            "points at mark :{}, expected :{}",
            tag.from, target.mark,
        ));
    }

    if let Some(ref tagger) = expected.tagger {
        if tag.tagger.who != *tagger {
            return Err(format!(
                "tagger {:?}, expected {tagger:?}",
                tag.tagger.who,
            ));
        }
    }

    if let Some(timestamp) = expected.timestamp {
        if tag.tagger.timestamp != timestamp {
            return Err(format!(
                "tagger timestamp {}, expected {timestamp}",
                tag.tagger.timestamp,
            ));
        }
    }

    if let Some(ref message) = expected.message {
        if tag.message != message.as_bytes() {
            return Err(format!(
                "message {:?}, expected {message:?}",
                String::from_utf8_lossy(&tag.message),
            ));
        }
    }

    Ok(())
}
