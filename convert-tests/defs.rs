use std::collections::BTreeMap;

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Test {
    /// Store patch files gzip-compressed.
    #[serde(default = "false_")]
    pub(crate) gzip: bool,
    /// Raw patch texts, written under `_darcs/patches` named by their
    /// sequence id.
    pub(crate) patches: Vec<PatchDef>,
    #[serde(default = "false_")]
    pub(crate) failed: bool,
    /// Substring that must appear on the converter's stderr.
    #[serde(rename = "stderr-contains")]
    pub(crate) stderr_contains: Option<String>,
    /// Expected commits in dump order. When present, the count must match
    /// exactly.
    #[serde(default = "Vec::new")]
    pub(crate) commits: Vec<CommitDef>,
    /// Expected tags in dump order. When present, the count must match
    /// exactly.
    #[serde(default = "Vec::new")]
    pub(crate) tags: Vec<TagDef>,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PatchDef {
    pub(crate) seq: u64,
    pub(crate) text: String,
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct CommitDef {
    pub(crate) branch: String,
    pub(crate) author: Option<String>,
    pub(crate) timestamp: Option<i64>,
    pub(crate) message: Option<String>,
    /// 1-based index of the parent in the expected commit list; absent means
    /// the commit must have no parent.
    pub(crate) parent: Option<usize>,
    /// Full file listing after this commit, resolved through the parent
    /// chain.
    pub(crate) tree: Option<BTreeMap<String, FileDef>>,
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
pub(crate) enum FileDef {
    Plain(String),
    Full {
        data: String,
        #[serde(default = "false_")]
        exec: bool,
    },
}

impl FileDef {
    pub(crate) fn data(&self) -> &str {
        match self {
            Self::Plain(data) => data,
            Self::Full { data, .. } => data,
        }
    }

    pub(crate) fn exec(&self) -> bool {
        match self {
            Self::Plain(_) => false,
            Self::Full { exec, .. } => *exec,
        }
    }
}

#[derive(serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TagDef {
    pub(crate) tag: String,
    /// 1-based index of the tagged commit in the expected commit list.
    pub(crate) commit: usize,
    pub(crate) tagger: Option<String>,
    pub(crate) timestamp: Option<i64>,
    pub(crate) message: Option<String>,
}

#[inline(always)]
fn false_() -> bool {
    false
}
