#[derive(Debug)]
pub(crate) enum EmitError {
    WriteError { error: std::io::Error },
}

impl std::fmt::Display for EmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WriteError { error } => {
                write!(f, "failed to write to output stream: {error}")
            }
        }
    }
}

impl From<std::io::Error> for EmitError {
    fn from(error: std::io::Error) -> Self {
        Self::WriteError { error }
    }
}

/// Stream-local identifier of an emitted blob or commit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Mark(u64);

#[cfg(test)]
impl Mark {
    pub(crate) fn test_new(n: u64) -> Self {
        Self(n)
    }
}

impl std::fmt::Display for Mark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, ":{}", self.0)
    }
}

/// One per-path effect of a revision, already materialized to full content.
pub(crate) enum PathChange {
    Write {
        path: Vec<u8>,
        content: Vec<u8>,
        executable: bool,
    },
    Delete {
        path: Vec<u8>,
    },
}

/// Authorship shared by revisions and tags.
pub(crate) struct RevMeta<'a> {
    pub(crate) timestamp: i64,
    pub(crate) author: &'a [u8],
    pub(crate) message: &'a [u8],
}

/// Serializes revisions and tags as a `git fast-import` stream.
///
/// Marks are allocated strictly increasing across blobs and commits, so a
/// commit mark always compares greater than the marks of the blobs it
/// references.
pub(crate) struct DumpWriter<W> {
    out: W,
    next_mark: u64,
}

impl<W: std::io::Write> DumpWriter<W> {
    pub(crate) fn new(out: W) -> Self {
        Self { out, next_mark: 1 }
    }

    fn alloc_mark(&mut self) -> Mark {
        let mark = Mark(self.next_mark);
        self.next_mark += 1;
        mark
    }

    fn write_data(&mut self, data: &[u8]) -> Result<(), EmitError> {
        writeln!(self.out, "data {}", data.len())?;
        self.out.write_all(data)?;
        writeln!(self.out)?;
        Ok(())
    }

    fn write_ident(&mut self, role: &str, meta: &RevMeta<'_>) -> Result<(), EmitError> {
        write!(self.out, "{role} ")?;
        self.out.write_all(&normalize_author(meta.author))?;
        writeln!(self.out, " {} +0000", meta.timestamp)?;
        Ok(())
    }

    pub(crate) fn emit_revision(
        &mut self,
        branch: &[u8],
        meta: &RevMeta<'_>,
        parent: Option<Mark>,
        changes: &[PathChange],
    ) -> Result<Mark, EmitError> {
        let mut blob_marks = Vec::with_capacity(changes.len());
        for change in changes {
            match change {
                PathChange::Write { content, .. } => {
                    let mark = self.alloc_mark();
                    writeln!(self.out, "blob")?;
                    writeln!(self.out, "mark {mark}")?;
                    self.write_data(content)?;
                    blob_marks.push(Some(mark));
                }
                PathChange::Delete { .. } => blob_marks.push(None),
            }
        }

        let commit_mark = self.alloc_mark();
        write!(self.out, "commit refs/heads/")?;
        self.out.write_all(branch)?;
        writeln!(self.out)?;
        writeln!(self.out, "mark {commit_mark}")?;
        self.write_ident("author", meta)?;
        self.write_ident("committer", meta)?;
        self.write_data(meta.message)?;
        if let Some(parent) = parent {
            writeln!(self.out, "from {parent}")?;
        }

        for (change, blob_mark) in changes.iter().zip(&blob_marks) {
            match change {
                PathChange::Write {
                    path, executable, ..
                } => {
                    let mode = if *executable { "100755" } else { "100644" };
                    let blob_mark = blob_mark.as_ref().unwrap();
                    write!(self.out, "M {mode} {blob_mark} ")?;
                    self.out.write_all(path)?;
                    writeln!(self.out)?;
                }
                PathChange::Delete { path } => {
                    write!(self.out, "D ")?;
                    self.out.write_all(path)?;
                    writeln!(self.out)?;
                }
            }
        }
        writeln!(self.out)?;

        Ok(commit_mark)
    }

    pub(crate) fn emit_tag(
        &mut self,
        name: &[u8],
        meta: &RevMeta<'_>,
        from: Mark,
    ) -> Result<(), EmitError> {
        write!(self.out, "tag ")?;
        self.out.write_all(&sanitize_ref(name))?;
        writeln!(self.out)?;
        writeln!(self.out, "from {from}")?;
        self.write_ident("tagger", meta)?;
        self.write_data(meta.message)?;
        writeln!(self.out)?;
        Ok(())
    }
}

/// `git fast-import` requires an angle-bracketed e-mail token in every
/// identity; sources record authors as free text, so an author without one
/// is wrapped whole.
pub(crate) fn normalize_author(author: &[u8]) -> Vec<u8> {
    let mut author: Vec<u8> = author
        .iter()
        .map(|&b| if b == b'\n' || b == b'\r' { b' ' } else { b })
        .collect();
    if !author.contains(&b'<') {
        author.insert(0, b'<');
        author.push(b'>');
    }
    author
}

/// Maps bytes that are unsafe in a git ref name to `_`.
pub(crate) fn sanitize_ref(name: &[u8]) -> Vec<u8> {
    name.iter()
        .map(|&b| {
            if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'/' | b'-') {
                b
            } else {
                b'_'
            }
        })
        .collect()
}
