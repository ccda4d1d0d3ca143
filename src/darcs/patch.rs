// darcs "old format" (version 1) patch files, as stored under _darcs/patches.
//
// A content patch looks like
//
//   [<log, possibly multi-line>
//   <author>**<14-digit timestamp>] {
//   <operations>
//   }
//
// and a tag patch like
//
//   [TAG <name>
//   <author>**<14-digit timestamp>] <
//   <included patch list>
//   > {
//   }

#[derive(Debug)]
pub(crate) struct Patch {
    pub(crate) header: PatchHeader,
    pub(crate) body: PatchBody,
}

#[derive(Debug)]
pub(crate) struct PatchHeader {
    /// First log line.
    pub(crate) name: Vec<u8>,
    /// Full log message, continuation lines joined with `\n`.
    pub(crate) log: Vec<u8>,
    pub(crate) author: Vec<u8>,
    /// 14-digit sequence id (`YYYYMMDDHHMMSS`).
    pub(crate) seq: u64,
    /// The sequence id interpreted as a UTC date, as a Unix timestamp.
    pub(crate) timestamp: i64,
}

#[derive(Debug)]
pub(crate) enum PatchBody {
    Changes(Vec<Op>),
    Tag(TagPatch),
}

#[derive(Debug)]
pub(crate) struct TagPatch {
    pub(crate) name: Vec<u8>,
    pub(crate) included: Vec<IncludedRef>,
}

/// One entry of a tag's included-patch list. An entry whose name starts with
/// `TAG ` references an earlier tag and is expanded transitively by the
/// resolver.
#[derive(Debug)]
pub(crate) struct IncludedRef {
    pub(crate) name: Vec<u8>,
    pub(crate) seq: u64,
}

#[derive(Debug)]
pub(crate) enum Op {
    AddDir(Vec<u8>),
    AddFile(Vec<u8>),
    RmFile(Vec<u8>),
    RmDir(Vec<u8>),
    Hunk {
        path: Vec<u8>,
        line: u64,
        edits: Vec<HunkEdit>,
    },
}

/// Line texts are newline-terminated, matching the content model.
#[derive(Debug)]
pub(crate) enum HunkEdit {
    Delete(Vec<u8>),
    Insert(Vec<u8>),
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ParseError {
    EmptyPatch,
    BrokenHeader,
    InvalidSequenceId { raw: Vec<u8> },
    UnknownOperation { op: Vec<u8> },
    InvalidHunkHeader { line: Vec<u8> },
    UnterminatedBody,
    UnterminatedTagList,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::EmptyPatch => write!(f, "empty patch file"),
            Self::BrokenHeader => write!(f, "broken patch header"),
            Self::InvalidSequenceId { ref raw } => {
                write!(f, "invalid sequence id: \"{}\"", raw.escape_ascii())
            }
            Self::UnknownOperation { ref op } => {
                write!(f, "unknown operation: \"{}\"", op.escape_ascii())
            }
            Self::InvalidHunkHeader { ref line } => {
                write!(f, "invalid hunk header: \"{}\"", line.escape_ascii())
            }
            Self::UnterminatedBody => write!(f, "unterminated patch body"),
            Self::UnterminatedTagList => write!(f, "unterminated tag patch list"),
        }
    }
}

pub(crate) fn parse_patch(src: &[u8]) -> Result<Patch, ParseError> {
    if src.is_empty() {
        return Err(ParseError::EmptyPatch);
    }
    let lines: Vec<&[u8]> = src.split(|&b| b == b'\n').collect();

    let name = lines[0]
        .strip_prefix(b"[")
        .ok_or(ParseError::BrokenHeader)?;
    let tag_name = name.strip_prefix(b"TAG ");

    let mut log = name.to_vec();
    let mut idx = 1;
    let (author, seq_digits, tail) = loop {
        let line = *lines.get(idx).ok_or(ParseError::BrokenHeader)?;
        idx += 1;
        if let Some(parts) = split_author_line(line) {
            break parts;
        }
        // long-comment lines are stored with a leading space
        let line = line.strip_prefix(b" ").unwrap_or(line);
        log.push(b'\n');
        log.extend_from_slice(line);
    };

    let seq = parse_seq(seq_digits)?;
    let timestamp = seq_to_timestamp(seq_digits)
        .ok_or_else(|| ParseError::InvalidSequenceId {
            raw: seq_digits.to_vec(),
        })?;

    let header = PatchHeader {
        name: name.to_vec(),
        log,
        author: author.to_vec(),
        seq,
        timestamp,
    };

    let body = if let Some(tag_name) = tag_name {
        if !tail.contains(&b'<') {
            return Err(ParseError::BrokenHeader);
        }
        let included = parse_tag_list(&lines, idx)?;
        PatchBody::Tag(TagPatch {
            name: tag_name.to_vec(),
            included,
        })
    } else {
        if !tail.contains(&b'{') {
            return Err(ParseError::BrokenHeader);
        }
        PatchBody::Changes(parse_ops(&lines, idx)?)
    };

    Ok(Patch { header, body })
}

/// Splits an `<author>**<14-digit seq>]<tail>` line.
fn split_author_line(line: &[u8]) -> Option<(&[u8], &[u8], &[u8])> {
    if line.len() < 17 {
        return None;
    }
    for i in 0..=(line.len() - 17) {
        if line[i..i + 2] == *b"**"
            && line[i + 2..i + 16].iter().all(|b| b.is_ascii_digit())
            && line[i + 16] == b']'
        {
            return Some((&line[..i], &line[i + 2..i + 16], &line[i + 17..]));
        }
    }
    None
}

fn parse_seq(digits: &[u8]) -> Result<u64, ParseError> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| ParseError::InvalidSequenceId {
            raw: digits.to_vec(),
        })
}

fn seq_to_timestamp(digits: &[u8]) -> Option<i64> {
    let s = std::str::from_utf8(digits).ok()?;
    let dt = chrono::NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M%S").ok()?;
    Some(dt.and_utc().timestamp())
}

fn parse_ops(lines: &[&[u8]], mut idx: usize) -> Result<Vec<Op>, ParseError> {
    let mut ops = Vec::new();
    loop {
        let line = *lines.get(idx).ok_or(ParseError::UnterminatedBody)?;
        idx += 1;

        if line == b"}".as_slice() {
            return Ok(ops);
        }

        if let Some(path) = line.strip_prefix(b"adddir ") {
            ops.push(Op::AddDir(normalize_path(path)));
        } else if let Some(path) = line.strip_prefix(b"addfile ") {
            ops.push(Op::AddFile(normalize_path(path)));
        } else if let Some(path) = line.strip_prefix(b"rmfile ") {
            ops.push(Op::RmFile(normalize_path(path)));
        } else if let Some(path) = line.strip_prefix(b"rmdir ") {
            ops.push(Op::RmDir(normalize_path(path)));
        } else if let Some(rest) = line.strip_prefix(b"hunk ") {
            let sp = rest
                .iter()
                .rposition(|&b| b == b' ')
                .ok_or_else(|| ParseError::InvalidHunkHeader {
                    line: line.to_vec(),
                })?;
            let hunk_line = std::str::from_utf8(&rest[sp + 1..])
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| ParseError::InvalidHunkHeader {
                    line: line.to_vec(),
                })?;
            let path = normalize_path(&rest[..sp]);

            let mut edits = Vec::new();
            while let Some(&next) = lines.get(idx) {
                if let Some(text) = next.strip_prefix(b"-") {
                    edits.push(HunkEdit::Delete(with_newline(text)));
                } else if let Some(text) = next.strip_prefix(b"+") {
                    edits.push(HunkEdit::Insert(with_newline(text)));
                } else {
                    break;
                }
                idx += 1;
            }

            ops.push(Op::Hunk {
                path,
                line: hunk_line,
                edits,
            });
        } else {
            let op = line.split(|&b| b == b' ').next().unwrap_or(line);
            return Err(ParseError::UnknownOperation { op: op.to_vec() });
        }
    }
}

fn parse_tag_list(lines: &[&[u8]], mut idx: usize) -> Result<Vec<IncludedRef>, ParseError> {
    let mut included = Vec::new();
    loop {
        let line = *lines.get(idx).ok_or(ParseError::UnterminatedTagList)?;
        idx += 1;

        if line.starts_with(b">") {
            break;
        }

        let name = line.strip_prefix(b"[").unwrap_or(line).to_vec();
        loop {
            let line = *lines.get(idx).ok_or(ParseError::UnterminatedTagList)?;
            idx += 1;
            if let Some((_, seq_digits, _)) = split_author_line(line) {
                let seq = parse_seq(seq_digits)?;
                included.push(IncludedRef { name, seq });
                break;
            }
        }
    }

    // the list is followed by an empty `{ }` body
    loop {
        let Some(&line) = lines.get(idx) else {
            return Err(ParseError::UnterminatedBody);
        };
        idx += 1;
        if line == b"}".as_slice() {
            return Ok(included);
        }
    }
}

fn normalize_path(path: &[u8]) -> Vec<u8> {
    path.strip_prefix(b"./").unwrap_or(path).to_vec()
}

fn with_newline(text: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(text.len() + 1);
    line.extend_from_slice(text);
    line.push(b'\n');
    line
}
