//! A host-resident library for managing Linux control groups (v1):
//! mount-table discovery, an in-memory group/controller/attribute
//! model, a filesystem driver that reconciles that model with the
//! kernel's cgroup virtual filesystem, a rule engine that classifies
//! tasks into groups from a declarative rules file, and iterators over
//! a group's subtree, task list and stats.

#[macro_use]
extern crate log;

pub mod error;
pub mod fs;
pub mod group;
pub mod iter;
pub mod mount;
pub mod rules;

pub use error::{Error, ErrorKind, Result};
pub use group::{Attribute, Cgroup, ControllerBlock};
pub use mount::{MountEntry, MountTable, MAX_CONTROLLERS, MOUNT_TABLE};

use std::sync::atomic::{AtomicBool, Ordering};

/// Whether `init()` has completed at least once. Every public entry
/// point that touches the mount table or the filesystem checks this
/// first and returns `NotInitialized` if it is clear.
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Discovers the mounted cgroup hierarchies and populates the process-wide
/// mount table. Must be called once before any other entry point in this
/// crate.
pub fn init() -> Result<()> {
    mount::MOUNT_TABLE.init()?;
    INITIALIZED.store(true, Ordering::SeqCst);
    Ok(())
}

/// True once `init()` has completed successfully at least once.
pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}

#[doc(hidden)]
pub(crate) fn check_initialized() -> Result<()> {
    if is_initialized() {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::NotInitialized))
    }
}
