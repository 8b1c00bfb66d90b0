// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use crate::kernel_api::{ApiClasses, KernelLock, ModuleApi, classify};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Suffix of the entry point that models a callback running while the
/// network interface is down.
pub const CLONE_SUFFIX: &str = "#net";

/// One kernel-visible driver callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPoint {
    /// The name of the driver function (with [`CLONE_SUFFIX`] for clones)
    pub name: String,
    /// The callback slot, e.g. `ndo_start_xmit`
    pub api: String,
    /// The API of the interface table that registers this callback
    pub module: String,
    /// The kernel function the table was registered through, if recorded
    pub kernel_func: String,
    pub classes: ApiClasses,
    pub is_init: bool,
    pub is_exit: bool,
    pub is_clone: bool,
    /// Whether the driver has a `net_device_ops` table and this callback takes
    /// the network down
    pub is_going_to_disable_network: bool,
    /// Kernel locks the entry point acquires itself, set by the analysis
    pub calls_locks: Vec<KernelLock>,
    /// Resources read on some path of the entry point, set by the analysis
    pub read_accesses: BTreeSet<String>,
    /// Resources written on some path of the entry point, set by the analysis
    pub write_accesses: BTreeSet<String>,
}

impl EntryPoint {
    pub(crate) fn new(name: &str, api: &str, module: &Module, is_init: bool, driver_has_network: bool) -> Self {
        let classes = classify(api);
        EntryPoint {
            name: name.to_string(),
            api: api.to_string(),
            module: module.api.clone(),
            kernel_func: module.kernel_func.clone(),
            classes,
            is_init,
            is_exit: api == "remove" || api == "disconnect",
            is_clone: false,
            is_going_to_disable_network: driver_has_network && classes.contains(ApiClasses::DISABLES_NETWORK),
            calls_locks: Vec::new(),
            read_accesses: BTreeSet::new(),
            write_accesses: BTreeSet::new(),
        }
    }

    /// The network-disabled twin of this entry point.
    pub(crate) fn network_clone(&self) -> Self {
        EntryPoint {
            name: format!("{}{CLONE_SUFFIX}", self.name),
            is_clone: true,
            is_init: false,
            ..self.clone()
        }
    }

    /// Whether a network-disabled clone exists for this callback.
    pub fn needs_network_clone(&self) -> bool {
        self.is_called_with_network_disabled() || self.is_going_to_disable_network
    }

    pub fn is_called_with_network_disabled(&self) -> bool {
        self.classes.contains(ApiClasses::CALLED_WITH_NETWORK_DISABLED)
    }

    /// The name of the driver function this entry point runs. Clones run the
    /// function of the entry point they were cloned from.
    pub fn function_name(&self) -> &str {
        if self.is_clone { self.name.strip_suffix(CLONE_SUFFIX).unwrap_or(&self.name) } else { &self.name }
    }

    /// Whether the kernel calls this entry point with `lock` held.
    pub fn is_locked_by(&self, lock: KernelLock) -> bool {
        self.classes.contains(lock.held_by())
    }

    pub fn is_calling(&self, lock: KernelLock) -> bool {
        self.calls_locks.contains(&lock)
    }

    pub fn is_power_locked(&self) -> bool {
        self.is_locked_by(KernelLock::Power)
    }

    pub fn is_rtnl_locked(&self) -> bool {
        self.is_locked_by(KernelLock::Rtnl)
    }

    pub fn is_tx_locked(&self) -> bool {
        self.is_locked_by(KernelLock::Tx)
    }

    /// Whether `lock` is relevant to this entry point: either the kernel holds
    /// it around the callback or the callback acquires it.
    pub fn uses_kernel_lock(&self, lock: KernelLock) -> bool {
        self.is_locked_by(lock) || self.is_calling(lock)
    }

    pub fn has_read_access(&self, resource: &str) -> bool {
        self.read_accesses.contains(resource)
    }

    pub fn has_write_access(&self, resource: &str) -> bool {
        self.write_accesses.contains(resource)
    }

    /// Every resource the entry point touches.
    pub fn resources(&self) -> BTreeSet<&str> {
        self.read_accesses.iter().chain(self.write_accesses.iter()).map(String::as_str).collect()
    }
}

/// A kernel interface table, e.g. one `file_operations` instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub api: String,
    pub kernel_func: String,
    /// The table kind, when it is one with known rules
    pub kind: Option<ModuleApi>,
    /// Names of the entry points registered in this table
    pub entry_points: Vec<String>,
}

impl Module {
    pub fn new(api: &str, kernel_func: &str) -> Self {
        Module {
            api: api.to_string(),
            kernel_func: kernel_func.to_string(),
            kind: api.parse().ok(),
            entry_points: Vec::new(),
        }
    }
}

/// Two entry points the kernel may run concurrently. `ep1 == ep2` models
/// re-entrancy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryPointPair {
    pub ep1: String,
    pub ep2: String,
}

impl EntryPointPair {
    pub fn new(ep1: &str, ep2: &str) -> Self {
        EntryPointPair { ep1: ep1.to_string(), ep2: ep2.to_string() }
    }

    pub fn is_self_pair(&self) -> bool {
        self.ep1 == self.ep2
    }

    /// Whether this pair relates `a` and `b`, in either order.
    pub fn relates(&self, a: &str, b: &str) -> bool {
        (self.ep1 == a && self.ep2 == b) || (self.ep1 == b && self.ep2 == a)
    }

    /// The other side of the pair, if `name` is one side.
    pub fn partner_of(&self, name: &str) -> Option<&str> {
        if self.ep1 == name {
            Some(&self.ep2)
        } else if self.ep2 == name {
            Some(&self.ep1)
        } else {
            None
        }
    }

    /// Name of the checking unit for this pair.
    pub fn checker_name(&self) -> String {
        format!("check${}${}", self.ep1, self.ep2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_keeps_api_flags() {
        let pm = Module::new("dev_pm_ops", "");
        let ep = EntryPoint::new("foo_suspend", "suspend", &pm, false, true);
        assert!(ep.is_going_to_disable_network);
        assert!(ep.needs_network_clone());
        let clone = ep.network_clone();
        assert_eq!(clone.name, "foo_suspend#net");
        assert_eq!(clone.function_name(), "foo_suspend");
        assert!(clone.is_clone && clone.is_going_to_disable_network);
        assert_eq!(ep.function_name(), "foo_suspend");
    }

    #[test]
    fn suspend_without_network_is_not_cloned() {
        let pm = Module::new("dev_pm_ops", "");
        let ep = EntryPoint::new("foo_suspend", "suspend", &pm, false, false);
        assert!(!ep.needs_network_clone());
    }

    #[test]
    fn kernel_lock_usage() {
        let ops = Module::new("net_device_ops", "register_netdev");
        assert_eq!(ops.kind, Some(ModuleApi::NetDeviceOps));
        let mut ep = EntryPoint::new("xmit", "ndo_start_xmit", &ops, false, true);
        assert!(ep.is_tx_locked() && ep.is_rtnl_locked() && !ep.is_power_locked());
        assert!(!ep.uses_kernel_lock(KernelLock::Power));
        ep.calls_locks.push(KernelLock::Power);
        assert!(ep.uses_kernel_lock(KernelLock::Power));
        assert!(!ep.is_exit && ep.kernel_func == "register_netdev");
    }

    #[test]
    fn pair_helpers() {
        let pair = EntryPointPair::new("open", "ioctl");
        assert!(pair.relates("ioctl", "open"));
        assert_eq!(pair.partner_of("open"), Some("ioctl"));
        assert_eq!(pair.partner_of("read"), None);
        assert_eq!(pair.checker_name(), "check$open$ioctl");
        assert!(EntryPointPair::new("a", "a").is_self_pair());
    }
}
