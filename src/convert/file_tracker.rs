#[derive(Debug)]
pub(crate) enum TrackError {
    SeekBackwards {
        path: Vec<u8>,
        line: u64,
        flushed: u64,
    },
    ContentMismatch {
        path: Vec<u8>,
        line: u64,
        expected: Vec<u8>,
    },
}

impl std::fmt::Display for TrackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::SeekBackwards {
                ref path,
                line,
                flushed,
            } => write!(
                f,
                "seek to line {line} of \"{}\" behind already flushed line {flushed}",
                path.escape_ascii(),
            ),
            Self::ContentMismatch {
                ref path,
                line,
                ref expected,
            } => write!(
                f,
                "content mismatch in \"{}\" at line {line}: expected \"{}\"",
                path.escape_ascii(),
                expected.escape_ascii(),
            ),
        }
    }
}

/// Replays the line edits of one hunk against the previous content of a file.
///
/// The old content is consumed front to back: `seek` copies untouched lines
/// to the output, `delete_line` consumes a line without copying it and
/// `add_line` inserts a new one. `close` flushes the remaining tail and
/// yields the new content.
///
/// Hunk line numbers are recorded against the file as the source saw it, so
/// they can be off once earlier patches have shifted lines. A delete whose
/// text does not match at the cursor gets exactly one recovery attempt at
/// cursor +/- 1; the first successful delete anchors the session and turns
/// further recovery off (drift after that point is presumed to be a real
/// structural edit).
pub(crate) struct FileTracker {
    path: Vec<u8>,
    old: Vec<Vec<u8>>,
    new: Vec<Vec<u8>>,
    /// 0-based index into `old` of the line currently addressed; everything
    /// before it has been copied to `new` or deleted.
    cursor: usize,
    anchored: bool,
}

impl FileTracker {
    pub(crate) fn open(path: Vec<u8>, old_content: &[u8], line: u64) -> Result<Self, TrackError> {
        let old = old_content
            .split_inclusive(|&b| b == b'\n')
            .map(<[u8]>::to_vec)
            .collect();
        let mut tracker = Self {
            path,
            old,
            new: Vec::new(),
            cursor: 0,
            anchored: false,
        };
        tracker.seek(line)?;
        Ok(tracker)
    }

    pub(crate) fn seek(&mut self, line: u64) -> Result<(), TrackError> {
        let flushed = self.cursor as u64;
        if line <= flushed {
            return Err(TrackError::SeekBackwards {
                path: self.path.clone(),
                line,
                flushed,
            });
        }

        let mut target = usize::try_from(line).unwrap_or(usize::MAX);
        if target > self.old.len() + 1 {
            // the source format sometimes implies a trailing blank line
            // instead of recording it; tolerate the overshoot by exactly one
            // synthetic line
            self.old.push(b"\n".to_vec());
            target = self.old.len() + 1;
        }

        while self.cursor + 1 < target {
            self.new.push(self.old[self.cursor].clone());
            self.cursor += 1;
        }

        Ok(())
    }

    pub(crate) fn delete_line(&mut self, text: &[u8]) -> Result<(), TrackError> {
        if self.old.get(self.cursor).is_some_and(|l| l == text) {
            self.old.remove(self.cursor);
            self.anchored = true;
            return Ok(());
        }

        if !self.anchored {
            // one recovery attempt: one line earlier, then one line later
            if self.cursor > 0
                && self.old[self.cursor - 1] == text
                && self.new.last().is_some_and(|l| l == text)
            {
                self.new.pop();
                self.cursor -= 1;
                self.old.remove(self.cursor);
                self.anchored = true;
                return Ok(());
            }
            if self.old.get(self.cursor + 1).is_some_and(|l| l == text) {
                self.old.remove(self.cursor + 1);
                let carried = self.old[self.cursor].clone();
                self.new.push(carried);
                self.cursor += 1;
                self.anchored = true;
                return Ok(());
            }
        }

        Err(TrackError::ContentMismatch {
            path: self.path.clone(),
            line: self.cursor as u64 + 1,
            expected: text.to_vec(),
        })
    }

    pub(crate) fn add_line(&mut self, text: &[u8]) {
        self.new.push(text.to_vec());
    }

    #[cfg(test)]
    fn line_nr(&self) -> u64 {
        self.cursor as u64 + 1
    }

    pub(crate) fn close(mut self) -> Vec<u8> {
        let tail = self.old.split_off(self.cursor);
        self.new.extend(tail);

        let mut content = Vec::new();
        for line in &self.new {
            content.extend_from_slice(line);
        }
        content
    }
}
