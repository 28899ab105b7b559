//! Change flags accumulated during one update pass

/// Which change classes an update applied
///
/// Flags are only ever set within a pass; `merge` is a bitwise OR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools, reason = "one flag per independent change class")]
pub struct ChangeFlags {
    pub blade_spec: bool,
    pub power_state: bool,
    pub snapshot_create: bool,
    pub snapshot_delete: bool,
    pub snapshot_restore: bool,
    pub os_image: bool,
    pub seed_template: bool,
    pub boot_disk_size: bool,
    pub data_disk_size: bool,
    pub data_disk: bool,
}

impl ChangeFlags {
    /// OR `other` into `self`
    pub fn merge(&mut self, other: ChangeFlags) {
        self.blade_spec |= other.blade_spec;
        self.power_state |= other.power_state;
        self.snapshot_create |= other.snapshot_create;
        self.snapshot_delete |= other.snapshot_delete;
        self.snapshot_restore |= other.snapshot_restore;
        self.os_image |= other.os_image;
        self.seed_template |= other.seed_template;
        self.boot_disk_size |= other.boot_disk_size;
        self.data_disk_size |= other.data_disk_size;
        self.data_disk |= other.data_disk;
    }

    #[must_use]
    pub fn any(&self) -> bool {
        *self != ChangeFlags::default()
    }

    /// Compute-side changes that require a power cycle
    #[must_use]
    pub fn needs_power_cycle(&self) -> bool {
        self.blade_spec || self.power_state
    }

    /// Storage-side changes that require re-imaging
    #[must_use]
    pub fn needs_reimage(&self) -> bool {
        self.os_image || self.seed_template
    }

    /// Cluster annotations must be re-published after these changes
    #[must_use]
    pub fn needs_reannounce(&self) -> bool {
        self.blade_spec || self.os_image || self.seed_template || self.snapshot_restore
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_is_additive() {
        let mut flags = ChangeFlags { power_state: true, ..Default::default() };
        flags.merge(ChangeFlags { os_image: true, ..Default::default() });
        flags.merge(ChangeFlags::default());
        assert!(flags.power_state && flags.os_image);
        assert!(flags.any());
    }

    #[test]
    fn test_needs_reannounce() {
        assert!(!ChangeFlags { power_state: true, ..Default::default() }.needs_reannounce());
        assert!(ChangeFlags { snapshot_restore: true, ..Default::default() }.needs_reannounce());
        assert!(!ChangeFlags::default().any());
    }
}
