pub(crate) mod fast_export;
