//! Translates `group::Cgroup` operations into directory creation,
//! attribute writes, ownership changes, task migrations and removals.
//!
//! Each public function here opens, reads or writes the pseudo-files
//! under a group's directory, resolving controller names to mount
//! paths through the mount table.

use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::{self, Gid, Uid};

use error::{Error, ErrorKind, Result};
use group::{Cgroup, ControllerBlock};
use mount::MOUNT_TABLE;

const DIR_MODE: u32 = 0o775;
const FILE_MODE: u32 = 0o664;

/// Creates `cgroup` on the filesystem: one directory per controller,
/// in insertion order, writing out every attribute value.
///
/// Directory creation tolerates an already-existing directory as
/// success. Attribute write failures are remembered but non-fatal: the
/// first such error is returned only if no earlier fatal error
/// occurred. Ownership changes are skipped entirely when
/// `ignore_ownership` is set, but the directory mode is always 0775
/// regardless of that flag.
pub fn create(cgroup: &Cgroup, ignore_ownership: bool) -> Result<()> {
    ::check_initialized()?;
    let mut remembered: Option<Error> = None;

    for block in &cgroup.controllers {
        if !MOUNT_TABLE.is_mounted(&block.name) {
            return Err(Error::new(ErrorKind::SubsysNotMounted));
        }

        let dir = MOUNT_TABLE.resolve(&block.name, &cgroup.name)?;

        if let Err(e) = DirBuilder::new().recursive(true).mode(DIR_MODE).create(&dir) {
            return Err(match e.kind() {
                io::ErrorKind::PermissionDenied => Error::new(ErrorKind::NotOwner),
                _ => Error::with_cause(ErrorKind::NotAllowed, e),
            });
        }

        if !ignore_ownership {
            chown_recursive(&dir, cgroup.admin_uid, cgroup.admin_gid)?;
        }

        for attr in &block.values {
            let attr_path = dir.join(&attr.name);
            if let Err(e) = write_attribute(&attr_path, &attr.value) {
                if remembered.is_none() {
                    remembered = Some(e);
                }
            }
        }

        if !ignore_ownership {
            let tasks_path = dir.join("tasks");
            let _ = unistd::chown(
                &tasks_path,
                Some(Uid::from_raw(cgroup.tasks_uid)),
                Some(Gid::from_raw(cgroup.tasks_gid)),
            );
        }
    }

    match remembered {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Writes attribute values without creating directories or touching
/// ownership.
///
/// When an attribute's group directory is missing for a controller,
/// disambiguates between `ValueNotExist` (the directory is absent but
/// the controller's mount is fine) and `SubsysNotMounted` (even the
/// `tasks` probe under the same controller fails).
pub fn modify(cgroup: &Cgroup) -> Result<()> {
    ::check_initialized()?;
    let mut remembered: Option<Error> = None;

    for block in &cgroup.controllers {
        if !MOUNT_TABLE.is_mounted(&block.name) {
            return Err(Error::new(ErrorKind::SubsysNotMounted));
        }

        let dir = MOUNT_TABLE.resolve(&block.name, &cgroup.name)?;

        if !dir.is_dir() {
            return Err(disambiguate_missing_group(&block.name, &cgroup.name)?);
        }

        for attr in &block.values {
            let attr_path = dir.join(&attr.name);
            if let Err(e) = write_attribute(&attr_path, &attr.value) {
                if remembered.is_none() {
                    remembered = Some(e);
                }
            }
        }
    }

    match remembered {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Probes whether `name`'s directory exists under `controller` by
/// checking for its `tasks` file, without mutating the caller's path.
fn disambiguate_missing_group(controller: &str, name: &str) -> Result<Error> {
    let dir = MOUNT_TABLE.resolve(controller, name)?;
    match fs::metadata(dir.join("tasks")) {
        Ok(_) => Ok(Error::new(ErrorKind::ValueNotExist)),
        Err(ref e) if e.kind() == io::ErrorKind::NotFound => {
            Ok(Error::new(ErrorKind::SubsysNotMounted))
        }
        Err(_) => Ok(Error::new(ErrorKind::ValueNotExist)),
    }
}

/// Populates `cgroup.controllers` (and `tasks_*`/`admin_*`) by reading
/// every mounted controller's group directory for `cgroup.name`.
/// Returns `NotExists` if zero controllers matched.
pub fn read(cgroup: &mut Cgroup) -> Result<()> {
    ::check_initialized()?;
    cgroup.controllers.clear();

    for entry in MOUNT_TABLE.entries() {
        let dir = entry.mount_path.join(&cgroup.name);
        if !dir.is_dir() {
            continue;
        }

        let meta = fs::metadata(&dir).map_err(Error::from_io)?;
        cgroup.admin_uid = meta.uid();
        cgroup.admin_gid = meta.gid();

        if let Ok(tmeta) = fs::metadata(dir.join("tasks")) {
            cgroup.tasks_uid = tmeta.uid();
            cgroup.tasks_gid = tmeta.gid();
        }

        let mut block = ControllerBlock::new(entry.controller.clone());

        for file_entry in fs::read_dir(&dir).map_err(Error::from_io)? {
            let file_entry = file_entry.map_err(Error::from_io)?;
            if !file_entry.file_type().map_err(Error::from_io)?.is_file() {
                continue;
            }
            let basename = file_entry.file_name();
            let basename = basename.to_string_lossy();
            let dot = match basename.find('.') {
                Some(i) => i,
                None => continue, // entries without a "." are invalid, skipped
            };
            let prefix = &basename[..dot];
            if prefix != entry.controller {
                continue;
            }

            if let Ok(token) = read_single_token(&file_entry.path()) {
                let _ = block.add_value(basename.to_string(), token);
            }
        }

        cgroup.controllers.push(block);
    }

    if cgroup.controllers.is_empty() {
        Err(Error::new(ErrorKind::NotExists))
    } else {
        Ok(())
    }
}

/// Removes `cgroup`'s directory under every controller, first
/// migrating its tasks up to the parent group.
pub fn delete(cgroup: &Cgroup, ignore_migration: bool) -> Result<()> {
    ::check_initialized()?;
    let parent_name = find_parent(&cgroup.name)?;

    for block in &cgroup.controllers {
        let dir = MOUNT_TABLE.resolve(&block.name, &cgroup.name)?;
        let parent_dir = MOUNT_TABLE.resolve(&block.name, &parent_name)?;

        let migrate = migrate_tasks(&dir, &parent_dir);
        if let Err(e) = migrate {
            if !ignore_migration {
                return Err(e);
            }
        }

        match fs::remove_dir(&dir) {
            Ok(()) => {}
            Err(e) => {
                if ignore_migration {
                    // retry, tolerating "already gone" as success
                    match fs::remove_dir(&dir) {
                        Ok(()) => {}
                        Err(e2) if e2.kind() == io::ErrorKind::NotFound => {}
                        Err(e2) => return Err(Error::from_io(e2)),
                    }
                } else {
                    return Err(Error::from_io(e));
                }
            }
        }
    }

    Ok(())
}

fn migrate_tasks(child_dir: &Path, parent_dir: &Path) -> Result<()> {
    let child_tasks = child_dir.join("tasks");
    let parent_tasks = parent_dir.join("tasks");

    let child = File::open(&child_tasks).map_err(Error::from_io)?;
    let mut parent = OpenOptions::new()
        .write(true)
        .open(&parent_tasks)
        .map_err(Error::from_io)?;

    for line in BufReader::new(child).lines() {
        let line = line.map_err(Error::from_io)?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        writeln!(parent, "{}", line).map_err(Error::from_io)?;
    }

    Ok(())
}

/// Appends `tid` to the `tasks` pseudo-file of every controller listed
/// in `cgroup`; `None` means "every mounted controller".
pub fn attach(cgroup: Option<&Cgroup>, tid: i32) -> Result<()> {
    ::check_initialized()?;
    let controllers: Vec<String> = match cgroup {
        Some(g) => g.controllers.iter().map(|c| c.name.clone()).collect(),
        None => MOUNT_TABLE.all_controllers(),
    };

    let name = cgroup.map(|g| g.name.as_str()).unwrap_or("");

    for controller in controllers {
        let dir = MOUNT_TABLE.resolve(&controller, name)?;
        let tasks_path = dir.join("tasks");

        let mut file = OpenOptions::new()
            .write(true)
            .append(true)
            .open(&tasks_path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::PermissionDenied => Error::new(ErrorKind::NotOwner),
                io::ErrorKind::NotFound => Error::new(ErrorKind::NotExists),
                _ => Error::with_cause(ErrorKind::NotAllowed, e),
            })?;

        writeln!(file, "{}", tid).map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => Error::new(ErrorKind::NotOwner),
            _ => Error::with_cause(ErrorKind::NotAllowed, e),
        })?;
    }

    Ok(())
}

/// Attaches the calling *thread* (not process) to `cgroup`.
pub fn attach_current(cgroup: Option<&Cgroup>) -> Result<()> {
    attach(cgroup, gettid())
}

fn gettid() -> i32 {
    unsafe { libc::syscall(libc::SYS_gettid) as i32 }
}

/// Resolves the logical parent of a group name by comparing the
/// device id of its directory (under the first mounted controller)
/// with that of its filesystem parent. If they differ, the group is a
/// hierarchy root and the parent is `"."`.
pub fn find_parent(name: &str) -> Result<String> {
    ::check_initialized()?;
    let entries = MOUNT_TABLE.entries();
    let first = entries.first().ok_or_else(|| Error::new(ErrorKind::NotMounted))?;

    let dir = first.mount_path.join(name);
    let parent_path = match dir.parent() {
        Some(p) => p.to_path_buf(),
        None => return Ok(".".to_string()),
    };

    let dir_meta = fs::metadata(&dir).map_err(Error::from_io)?;
    let parent_meta = fs::metadata(&parent_path).map_err(Error::from_io)?;

    if dir_meta.dev() != parent_meta.dev() {
        Ok(".".to_string())
    } else {
        match name.rfind('/') {
            Some(i) => Ok(name[..i].to_string()),
            None => Ok("..".to_string()),
        }
    }
}

/// Locates the logical parent of `cgroup`, reads its controllers, and
/// deep-copies them into `cgroup` before creating it.
pub fn create_from_parent(cgroup: &mut Cgroup, ignore_ownership: bool) -> Result<()> {
    let parent_name = find_parent(&cgroup.name)?;
    let mut parent = Cgroup::new(parent_name);
    read(&mut parent)?;
    cgroup.copy_from(&parent)?;
    create(cgroup, ignore_ownership)
}

/// Reads `/proc/<pid>/cgroup`, tokenizing each `hierarchy_id:
/// controllers_csv:path` line and returning the path of the line whose
/// controller list contains an exact token equal to `controller`.
pub fn get_current_controller_path(pid: i32, controller: &str) -> Result<PathBuf> {
    ::check_initialized()?;
    let _entries = MOUNT_TABLE.entries(); // serializes against reinitialization

    let path = format!("/proc/{}/cgroup", pid);
    let file = File::open(&path).map_err(Error::from_io)?;

    for line in BufReader::new(file).lines() {
        let line = line.map_err(Error::from_io)?;
        let mut fields = line.splitn(3, ':');
        let _hierarchy_id = fields.next();
        let controllers_csv = fields.next().unwrap_or("");
        let group_path = fields.next().unwrap_or("");

        if controllers_csv.split(',').any(|c| c == controller) {
            return Ok(PathBuf::from(group_path));
        }
    }

    Err(Error::new(ErrorKind::NotExists))
}

fn write_attribute(path: &Path, value: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(Error::from_io)?;
    file.write_all(value.as_bytes()).map_err(Error::from_io)
}

fn read_single_token(path: &Path) -> Result<String> {
    let mut contents = String::new();
    File::open(path)
        .map_err(Error::from_io)?
        .read_to_string(&mut contents)
        .map_err(Error::from_io)?;
    contents
        .split_whitespace()
        .next()
        .map(|s| s.to_string())
        .ok_or_else(|| Error::new(ErrorKind::ParseFailed))
}

fn chown_recursive(root: &Path, uid: u32, gid: u32) -> Result<()> {
    for entry in walkdir::WalkDir::new(root).contents_first(false) {
        let entry = entry.map_err(|e| {
            let io_err = e.into_io_error().unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "walk failed"));
            Error::with_cause(ErrorKind::NotAllowed, io_err)
        })?;
        let path = entry.path();
        unistd::chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))
            .map_err(|_| Error::with_cause(ErrorKind::NotOwner, io::Error::last_os_error()))?;

        let mode = if entry.file_type().is_dir() {
            DIR_MODE
        } else {
            FILE_MODE
        };
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(Error::from_io)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use group::Cgroup;
    use std::path::PathBuf;

    #[test]
    fn find_parent_strips_last_segment() {
        // exercised logically; the filesystem half requires a real
        // mount, covered in tests/fs_driver.rs.
        let name = "users/alice";
        match name.rfind('/') {
            Some(i) => assert_eq!(&name[..i], "users"),
            None => unreachable!(),
        }
    }

    #[test]
    fn read_single_token_takes_first_whitespace_field() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("cpu.shares");
        std::fs::write(&path, "512\n").unwrap();
        assert_eq!(read_single_token(&path).unwrap(), "512");
    }

    #[test]
    fn cgroup_model_round_trips_through_add_value() {
        let mut g = Cgroup::new("demo");
        g.add_controller("cpu")
            .unwrap()
            .add_value("cpu.shares", "512")
            .unwrap();
        assert_eq!(g.controller("cpu").unwrap().get("cpu.shares"), Some("512"));
    }
}
