//! Iterators over a group's subtree, its `tasks` file, and a
//! controller's `.stat` file.
//!
//! Each is a plain `Iterator<Item = Result<T>>` rather than an opaque
//! begin/next/end handle: the underlying file closes on `Drop`, so
//! there is no explicit `end()` to call.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use error::{Error, ErrorKind, Result};

/// What kind of filesystem entry a `TreeNode` names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Other,
}

/// One entry produced by a `TreeIterator`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub name: String,
    pub parent: Option<String>,
    pub full_path: PathBuf,
    pub depth: usize,
    pub kind: EntryKind,
}

/// Walks a group's directory subtree under one controller.
///
/// `max_depth == 0` means unbounded; otherwise entries strictly beyond
/// `max_depth` levels below `root` are suppressed.
pub struct TreeIterator {
    inner: walkdir::IntoIter,
}

impl TreeIterator {
    pub fn new(root: &Path, max_depth: usize) -> Result<Self> {
        if !root.is_dir() {
            return Err(Error::new(ErrorKind::NotExists));
        }

        let mut walker = walkdir::WalkDir::new(root).min_depth(0);
        if max_depth > 0 {
            walker = walker.max_depth(max_depth);
        }

        Ok(TreeIterator {
            inner: walker.into_iter(),
        })
    }
}

impl Iterator for TreeIterator {
    type Item = Result<TreeNode>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.inner.next()?;
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let io_err = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "walk failed"));
                return Some(Err(Error::from_io(io_err)));
            }
        };

        let full_path = entry.path().to_path_buf();
        let name = entry.file_name().to_string_lossy().into_owned();
        let parent = full_path
            .parent()
            .map(|p| p.to_string_lossy().into_owned());

        let kind = if entry.file_type().is_dir() {
            EntryKind::Dir
        } else if entry.file_type().is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        };

        let depth = entry.depth();

        Some(Ok(TreeNode {
            name,
            parent,
            full_path,
            depth,
            kind,
        }))
    }
}

/// Iterates the decimal task ids in a group's `tasks` pseudo-file, one
/// per line.
pub struct TaskIterator {
    lines: std::io::Lines<BufReader<File>>,
}

impl TaskIterator {
    pub fn new(tasks_path: &Path) -> Result<Self> {
        let file = File::open(tasks_path).map_err(Error::from_io)?;
        Ok(TaskIterator {
            lines: BufReader::new(file).lines(),
        })
    }
}

impl Iterator for TaskIterator {
    type Item = Result<i32>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(e) => return Some(Err(Error::from_io(e))),
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return Some(
                line.parse::<i32>()
                    .map_err(|_| Error::new(ErrorKind::ParseFailed)),
            );
        }
    }
}

/// One `key value` pair from a controller's `.stat` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatEntry {
    pub name: String,
    pub value: String,
}

/// Iterates the `key SP value` lines of a controller's `.stat` file.
pub struct StatIterator {
    lines: std::io::Lines<BufReader<File>>,
}

impl StatIterator {
    pub fn new(stat_path: &Path) -> Result<Self> {
        let file = File::open(stat_path).map_err(Error::from_io)?;
        Ok(StatIterator {
            lines: BufReader::new(file).lines(),
        })
    }
}

impl Iterator for StatIterator {
    type Item = Result<StatEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(l) => l,
                Err(e) => return Some(Err(Error::from_io(e))),
            };
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let name = fields.next();
            let value = fields.next();
            return match (name, value) {
                (Some(n), Some(v)) => Some(Ok(StatEntry {
                    name: n.to_string(),
                    value: v.to_string(),
                })),
                _ => Some(Err(Error::new(ErrorKind::InvalidOp))),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn task_iterator_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks");
        fs::write(&path, "100\n\n200\n").unwrap();

        let pids: Vec<i32> = TaskIterator::new(&path)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(pids, vec![100, 200]);
    }

    #[test]
    fn stat_iterator_parses_key_value_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.stat");
        fs::write(&path, "cache 1024\nrss 2048\n").unwrap();

        let entries: Vec<StatEntry> = StatIterator::new(&path)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(
            entries,
            vec![
                StatEntry { name: "cache".to_string(), value: "1024".to_string() },
                StatEntry { name: "rss".to_string(), value: "2048".to_string() },
            ]
        );
    }

    #[test]
    fn stat_iterator_rejects_missing_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.stat");
        fs::write(&path, "onlykey\n").unwrap();

        let mut it = StatIterator::new(&path).unwrap();
        let err = it.next().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOp);
    }

    #[test]
    fn tree_iterator_walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("child")).unwrap();
        fs::write(dir.path().join("child").join("leaf"), b"x").unwrap();

        let nodes: Vec<TreeNode> = TreeIterator::new(dir.path(), 0)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();

        let root = nodes.iter().find(|n| n.depth == 0).expect("root at depth 0");
        assert_eq!(root.kind, EntryKind::Dir);

        let child = nodes
            .iter()
            .find(|n| n.name == "child")
            .expect("child directory present");
        assert_eq!(child.depth, 1);
        assert_eq!(child.kind, EntryKind::Dir);

        let leaf = nodes
            .iter()
            .find(|n| n.name == "leaf")
            .expect("leaf file present");
        assert_eq!(leaf.depth, 2);
        assert_eq!(leaf.kind, EntryKind::File);
    }
}
