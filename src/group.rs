//! The in-memory group/controller/attribute aggregate.
//!
//! Mutating operations here never touch the filesystem; only the
//! functions in `fs` do.

use error::{Error, ErrorKind, Result};

/// A single named attribute value: the basename of a pseudo-file under
/// the group directory, and the opaque text to be written there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Attribute {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A controller attached to a group, with its ordered attribute list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerBlock {
    pub name: String,
    pub values: Vec<Attribute>,
}

impl ControllerBlock {
    pub fn new<N: Into<String>>(name: N) -> Self {
        ControllerBlock {
            name: name.into(),
            values: Vec::new(),
        }
    }

    /// Appends an attribute. Fails with `ValueExists` if `attr_name`
    /// is already present.
    pub fn add_value<N: Into<String>, V: Into<String>>(
        &mut self,
        attr_name: N,
        text: V,
    ) -> Result<()> {
        let attr_name = attr_name.into();
        if self.values.iter().any(|a| a.name == attr_name) {
            return Err(Error::new(ErrorKind::ValueExists));
        }
        self.values.push(Attribute::new(attr_name, text.into()));
        Ok(())
    }

    pub fn get(&self, attr_name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|a| a.name == attr_name)
            .map(|a| a.value.as_str())
    }
}

/// The aggregate this crate manipulates: a group's relative name, its
/// tasks/admin ownership, and its ordered controller list. Ownership
/// is in-memory only; a `Cgroup` never holds an open file handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cgroup {
    pub name: String,
    pub tasks_uid: u32,
    pub tasks_gid: u32,
    pub admin_uid: u32,
    pub admin_gid: u32,
    pub controllers: Vec<ControllerBlock>,
}

impl Cgroup {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Cgroup {
            name: name.into(),
            tasks_uid: 0,
            tasks_gid: 0,
            admin_uid: 0,
            admin_gid: 0,
            controllers: Vec::new(),
        }
    }

    /// Appends a `ControllerBlock`. Fails with `ControllerCreateFailed`
    /// if the table is already at `mount::MAX_CONTROLLERS`, or
    /// `ControllerExists` if the controller is already attached.
    pub fn add_controller<N: Into<String>>(&mut self, controller_name: N) -> Result<&mut ControllerBlock> {
        let controller_name = controller_name.into();
        if self.controllers.len() >= ::mount::MAX_CONTROLLERS {
            return Err(Error::new(ErrorKind::ControllerCreateFailed));
        }
        if self.controllers.iter().any(|c| c.name == controller_name) {
            return Err(Error::new(ErrorKind::ControllerExists));
        }
        self.controllers.push(ControllerBlock::new(controller_name));
        Ok(self.controllers.last_mut().unwrap())
    }

    pub fn controller(&self, name: &str) -> Option<&ControllerBlock> {
        self.controllers.iter().find(|c| c.name == name)
    }

    pub fn controller_mut(&mut self, name: &str) -> Option<&mut ControllerBlock> {
        self.controllers.iter_mut().find(|c| c.name == name)
    }

    /// Deep-copies `src`'s name and attribute values into `dst`.
    pub fn copy_controller_values(dst: &mut ControllerBlock, src: &ControllerBlock) {
        dst.name = src.name.clone();
        dst.values = src.values.clone();
    }

    /// Releases `self`'s controllers and deep-copies every controller
    /// block from `src`. Rejects `dst` and `src` being the same group
    /// with `Fail`.
    pub fn copy_from(&mut self, src: &Cgroup) -> Result<()> {
        if std::ptr::eq(self, src) {
            return Err(Error::new(ErrorKind::Fail));
        }
        self.controllers.clear();
        self.controllers.extend(src.controllers.iter().cloned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_value_rejects_duplicates() {
        let mut block = ControllerBlock::new("cpu");
        block.add_value("cpu.shares", "512").unwrap();
        let err = block.add_value("cpu.shares", "1024").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueExists);
    }

    #[test]
    fn add_controller_rejects_duplicates() {
        let mut group = Cgroup::new("demo");
        group.add_controller("cpu").unwrap();
        let err = group.add_controller("cpu").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ControllerExists);
    }

    #[test]
    fn copy_from_deep_copies_controllers() {
        let mut src = Cgroup::new("src");
        src.add_controller("memory")
            .unwrap()
            .add_value("memory.limit_in_bytes", "1048576")
            .unwrap();

        let mut dst = Cgroup::new("dst");
        dst.copy_from(&src).unwrap();

        assert_eq!(dst.controllers.len(), 1);
        assert_eq!(
            dst.controller("memory").unwrap().get("memory.limit_in_bytes"),
            Some("1048576")
        );
    }
}
