//! Process-wide discovered mapping of controller name to mount path.
//!
//! Scans `/proc/cgroups` for the compiled-in, enabled controllers, then
//! `/proc/mounts` for the actual `cgroup`-type mount points that expose
//! them, recording one entry per match under a single writer-locked
//! pass.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use error::{Error, ErrorKind, Result};

/// Maximum number of controllers this table can hold at once.
pub const MAX_CONTROLLERS: usize = 16;

const PROC_CGROUPS: &str = "/proc/cgroups";
const PROC_MOUNTS: &str = "/proc/mounts";

/// A single resolved `controller -> mount path` mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub controller: String,
    pub mount_path: PathBuf,
}

#[derive(Debug, Default)]
struct Table {
    entries: Vec<MountEntry>,
}

/// The process-wide mount table.
pub struct MountTable {
    inner: RwLock<Table>,
}

impl MountTable {
    const fn new() -> Self {
        MountTable {
            inner: RwLock::new(Table { entries: Vec::new() }),
        }
    }

    /// Re-scans `/proc/cgroups` and `/proc/mounts`, replacing the
    /// table's contents under the writer lock.
    ///
    /// Returns `Err(NotMounted)` if no controller could be matched to
    /// a mount point, and empties the table in that case too, matching
    /// spec: "Failure not-mounted if no controller matched (Mount
    /// Table is emptied)".
    pub fn init(&self) -> Result<()> {
        let enabled = read_enabled_controllers(Path::new(PROC_CGROUPS))?;
        let found = scan_mounts(Path::new(PROC_MOUNTS), &enabled)?;

        let mut table = self.inner.write().unwrap();
        table.entries.clear();
        table.entries.extend(found.into_iter().take(MAX_CONTROLLERS));

        if table.entries.is_empty() {
            Err(Error::new(ErrorKind::NotMounted))
        } else {
            Ok(())
        }
    }

    /// True if `name` is mounted at the time of the call.
    pub fn is_mounted(&self, name: &str) -> bool {
        let table = self.inner.read().unwrap();
        table.entries.iter().any(|e| e.controller == name)
    }

    /// The mount path for `name`, if mounted.
    pub fn path_of(&self, name: &str) -> Option<PathBuf> {
        let table = self.inner.read().unwrap();
        table
            .entries
            .iter()
            .find(|e| e.controller == name)
            .map(|e| e.mount_path.clone())
    }

    /// Every currently mounted controller name, in discovery order.
    /// Used by the rule engine's `*` controller-list expansion.
    pub fn all_controllers(&self) -> Vec<String> {
        let table = self.inner.read().unwrap();
        table.entries.iter().map(|e| e.controller.clone()).collect()
    }

    /// A snapshot of the whole table, in discovery order.
    pub fn entries(&self) -> Vec<MountEntry> {
        let table = self.inner.read().unwrap();
        table.entries.clone()
    }

    /// The full path `<mount>/<group_name>/`, or `SubsysNotMounted`.
    pub fn resolve(&self, controller: &str, group_name: &str) -> Result<PathBuf> {
        match self.path_of(controller) {
            Some(mut p) => {
                if !group_name.is_empty() {
                    p.push(group_name);
                }
                Ok(p)
            }
            None => Err(Error::new(ErrorKind::SubsysNotMounted)),
        }
    }
}

/// The single process-wide mount table instance.
pub static MOUNT_TABLE: MountTable = MountTable::new();

fn read_enabled_controllers(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).map_err(Error::from_io)?;
    let reader = BufReader::new(file);
    let mut names = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(Error::from_io)?;
        // First line is the "#subsys_name hierarchy num_cgroups enabled" header.
        if i == 0 {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let enabled = fields[3] == "1";
        if enabled {
            names.push(fields[0].to_string());
        }
    }

    Ok(names)
}

fn scan_mounts(path: &Path, enabled: &[String]) -> Result<Vec<MountEntry>> {
    let file = File::open(path).map_err(Error::from_io)?;
    let reader = BufReader::new(file);

    let mut found = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for line in reader.lines() {
        let line: String = line.map_err(Error::from_io)?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        // device mount_point fs_type options ...
        let mount_point = fields[1];
        let fs_type = fields[2];
        let options = fields[3];

        if fs_type != "cgroup" {
            continue;
        }

        for opt in options.split(',') {
            if enabled.iter().any(|c| c == opt) && seen.insert(opt.to_string()) {
                found.push(MountEntry {
                    controller: opt.to_string(),
                    mount_path: PathBuf::from(mount_point),
                });
            }
        }
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_tmp(contents: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_enabled_controllers() {
        let f = write_tmp(
            "#subsys_name\thierarchy\tnum_cgroups\tenabled\n\
             cpu\t2\t1\t1\n\
             memory\t3\t1\t0\n\
             pids\t4\t1\t1\n",
        );
        let names = read_enabled_controllers(f.path()).unwrap();
        assert_eq!(names, vec!["cpu".to_string(), "pids".to_string()]);
    }

    #[test]
    fn scans_cgroup_mounts_only() {
        let f = write_tmp(
            "cgroup /sys/fs/cgroup/cpu cgroup rw,cpu,cpuacct 0 0\n\
             tmpfs /sys/fs/cgroup tmpfs rw 0 0\n\
             cgroup /sys/fs/cgroup/pids cgroup rw,pids 0 0\n",
        );
        let enabled = vec!["cpu".to_string(), "pids".to_string()];
        let found = scan_mounts(f.path(), &enabled).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].controller, "cpu");
        assert_eq!(found[0].mount_path, PathBuf::from("/sys/fs/cgroup/cpu"));
        assert_eq!(found[1].controller, "pids");
    }
}
