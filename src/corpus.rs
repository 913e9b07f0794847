//! Loading of training examples from disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Load training examples from the given paths. A file contributes its
/// contents as one example; a directory contributes one example per
/// contained file, in file-name order. Subdirectories are not descended
/// into.
pub fn load_examples<P: AsRef<Path>>(paths: &[P]) -> io::Result<Vec<String>> {
    let mut examples = Vec::new();

    for path in paths {
        let path = path.as_ref();

        if path.is_dir() {
            let mut entries = Vec::<PathBuf>::new();
            for entry in fs::read_dir(path)? {
                entries.push(entry?.path());
            }
            entries.sort();

            for entry in entries {
                if entry.is_file() {
                    examples.push(read_example(&entry)?);
                }
            }
        } else {
            examples.push(read_example(path)?);
        }
    }

    Ok(examples)
}

fn read_example(path: &Path) -> io::Result<String> {
    debug!(path = %path.display(), "loading example");
    fs::read_to_string(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_in_file_name_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), "second").unwrap();
        fs::write(dir.path().join("a.txt"), "first").unwrap();

        let examples = load_examples(&[dir.path()]).unwrap();
        assert_eq!(examples, vec!["first", "second"]);
    }

    #[test]
    fn test_mixed_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("extra.txt");
        fs::write(&file, "extra").unwrap();

        let sub = dir.path().join("corpus");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("one.txt"), "one").unwrap();

        let examples = load_examples(&[file, sub]).unwrap();
        assert_eq!(examples, vec!["extra", "one"]);
    }

    #[test]
    fn test_missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.txt");
        assert!(load_examples(&[missing]).is_err());
    }
}
