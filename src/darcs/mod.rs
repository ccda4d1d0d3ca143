pub(crate) mod patch;
pub(crate) mod source;
