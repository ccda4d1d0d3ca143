#![warn(
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unused_qualifications
)]
#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod defs;
mod test;

fn main() -> ExitCode {
    let root_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .canonicalize()
        .unwrap();

    let mut test_paths = BTreeSet::new();
    gather_tests(
        &root_path,
        Path::new("convert-tests").join("tests"),
        &mut test_paths,
    );

    let args = libtest_mimic::Arguments::from_args();

    let mut tests = Vec::new();
    for test_path in test_paths {
        let full_test_path = root_path.join(&test_path);
        tests.push(libtest_mimic::Trial::test(
            test_path.to_string_lossy(),
            move || test::run_test(&full_test_path).map_err(|e| e.into()),
        ));
    }

    let conclusion = libtest_mimic::run(&args, tests);
    if conclusion.has_failed() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn gather_tests(root_path: &Path, sub_dir: PathBuf, tests: &mut BTreeSet<PathBuf>) {
    for entry in root_path.join(&sub_dir).read_dir().unwrap() {
        let entry = entry.unwrap();
        let entry_name = entry.file_name();

        if entry.file_type().unwrap().is_dir() {
            gather_tests(root_path, sub_dir.join(entry_name), tests);
            continue;
        }

        let extension = Path::new(&entry_name).extension();
        if extension == Some(OsStr::new("yaml")) || extension == Some(OsStr::new("yml")) {
            let inserted = tests.insert(sub_dir.join(entry_name));
            assert!(inserted);
        }
    }
}
