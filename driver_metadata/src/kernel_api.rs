// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Kernel locking conventions for driver callbacks.
//!
//! Every table here is closed and hard-coded: each entry encodes a locking
//! guarantee the Linux kernel documents for a callback slot. Pairs of entry
//! points excluded by these rules are never checked, so an entry that is not
//! backed by a real kernel guarantee hides races.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumIter, EnumString, VariantNames};

bitflags! {
    /// Serialization classes of a callback slot (the `api` of an entry point).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ApiClasses: u16 {
        /// Called with `device_lock(dev)` held
        const DEVICE_LOCK = 1 << 0;
        /// Called with `dev->power.lock` held
        const POWER_LOCK = 1 << 1;
        /// Called with the RTNL lock held
        const RTNL = 1 << 2;
        /// Called with `HARD_TX_LOCK` held
        const TX_LOCK = 1 << 3;
        /// Power-management callback
        const POWER_MANAGEMENT = 1 << 4;
        /// Called with netpoll disabled
        const NETPOLL_DISABLED = 1 << 5;
        /// Network-management callback
        const NETWORK = 1 << 6;
        /// Called while the network interface is down
        const CALLED_WITH_NETWORK_DISABLED = 1 << 7;
        /// Takes the network interface down when the driver is a network driver
        const DISABLES_NETWORK = 1 << 8;
    }
}

/// Locks the kernel takes around callbacks and that drivers may take
/// themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum KernelLock {
    Power,
    Rtnl,
    Tx,
}

impl KernelLock {
    /// Name of the ghost variable modelling this lock.
    pub fn ghost_name(self) -> &'static str {
        match self {
            KernelLock::Power => "lock$power",
            KernelLock::Rtnl => "lock$rtnl",
            KernelLock::Tx => "lock$tx",
        }
    }

    pub fn from_ghost_name(name: &str) -> Option<KernelLock> {
        match name {
            "lock$power" => Some(KernelLock::Power),
            "lock$rtnl" => Some(KernelLock::Rtnl),
            "lock$tx" => Some(KernelLock::Tx),
            _ => None,
        }
    }

    /// Kernel functions through which a driver acquires this lock.
    pub fn acquisition_functions(self) -> &'static [&'static str] {
        match self {
            KernelLock::Power => &["pm_runtime_get_sync", "pm_runtime_get_noresume"],
            KernelLock::Rtnl => &["rtnl_lock"],
            KernelLock::Tx => &["netif_tx_lock", "netif_tx_lock_bh", "__netif_tx_lock"],
        }
    }

    /// The lock acquired by calling `function`, if any.
    pub fn acquired_by(function: &str) -> Option<KernelLock> {
        use strum::IntoEnumIterator;
        KernelLock::iter().find(|lock| lock.acquisition_functions().contains(&function))
    }

    /// Class of the callbacks the kernel calls with this lock held.
    pub fn held_by(self) -> ApiClasses {
        match self {
            KernelLock::Power => ApiClasses::POWER_LOCK,
            KernelLock::Rtnl => ApiClasses::RTNL,
            KernelLock::Tx => ApiClasses::TX_LOCK,
        }
    }
}

/// Kernel interface tables that carry module-specific rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, EnumString, VariantNames, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum ModuleApi {
    FileOperations,
    BlockDeviceOperations,
    UsbSerialDriver,
    NfcOps,
    NetDeviceOps,
    TestDriver,
    PciDriver,
    UsbDriver,
    PlatformDriver,
    #[strum(serialize = "ps3_system_bus_driver")]
    Ps3SystemBusDriver,
    CxDrv,
}

impl ModuleApi {
    /// Tables through which the driver registers itself with a bus. When
    /// none is present, the driver initialization is synthesized.
    pub fn is_driver_registration(self) -> bool {
        matches!(
            self,
            ModuleApi::TestDriver
                | ModuleApi::PciDriver
                | ModuleApi::UsbDriver
                | ModuleApi::UsbSerialDriver
                | ModuleApi::PlatformDriver
                | ModuleApi::Ps3SystemBusDriver
                | ModuleApi::CxDrv
        )
    }

    /// Whether the kernel never runs `api1` and `api2` of this table
    /// concurrently.
    pub fn serialises(self, api1: &str, api2: &str) -> bool {
        let either = |api: &str| api1 == api || api2 == api;
        let both_in = |set: &[&str]| set.contains(&api1) && set.contains(&api2);
        match self {
            ModuleApi::FileOperations => either("release") || (api1 == "mmap" && api2 == "mmap"),
            // `open` against `release` is covered by the `release` rule.
            ModuleApi::BlockDeviceOperations => either("release") || either("revalidate_disk"),
            ModuleApi::UsbSerialDriver => {
                USB_SERIAL_LIFECYCLE.iter().any(|api| either(api))
                    || both_in(USB_SERIAL_MODEM_CONTROL)
                    || (api1 == "set_termios" && api2 == "set_termios")
                    || (api1 == "dtr_rts" && api2 == "dtr_rts")
            }
            ModuleApi::NfcOps => both_in(NFC_EXCLUSIVE),
            _ => false,
        }
    }
}

const POWER_MANAGEMENT_APIS: &[&str] = &[
    "prepare",
    "complete",
    "resume",
    "suspend",
    "freeze",
    "poweroff",
    "restore",
    "thaw",
    "runtime_resume",
    "runtime_suspend",
    "runtime_idle",
];

const DEVICE_LIFECYCLE_APIS: &[&str] = &["probe", "remove", "shutdown"];

const RUNTIME_PM_APIS: &[&str] = &["runtime_resume", "runtime_suspend", "runtime_idle"];

const NET_DEVICE_RTNL_APIS: &[&str] = &[
    "ndo_init",
    "ndo_uninit",
    "ndo_open",
    "ndo_stop",
    "ndo_start_xmit",
    "ndo_validate_addr",
    "ndo_change_mtu",
    "ndo_get_stats64",
    "ndo_get_stats",
    "ndo_poll_controller",
    "ndo_netpoll_setup",
    "ndo_netpoll_cleanup",
    "ndo_fix_features",
    "ndo_set_features",
    "ndo_set_mac_address",
    "ndo_do_ioctl",
    "ndo_set_rx_mode",
];

const ETHTOOL_RTNL_APIS: &[&str] = &[
    "get_settings",
    "set_settings",
    "get_drvinfo",
    "get_regs_len",
    "get_regs",
    "get_wol",
    "set_wol",
    "get_msglevel",
    "set_msglevel",
    "nway_reset",
    "get_link",
    "get_eeprom_len",
    "get_eeprom",
    "set_eeprom",
    "get_coalesce",
    "set_coalesce",
    "get_ringparam",
    "set_ringparam",
    "get_pauseparam",
    "set_pauseparam",
    "self_test",
    "get_strings",
    "set_phys_id",
    "get_ethtool_stats",
    "begin",
    "complete",
    "get_priv_flags",
    "set_priv_flags",
    "get_sset_count",
    "get_rxnfc",
    "set_rxnfc",
    "flash_device",
    "reset",
    "get_rxfh_indir_size",
    "get_rxfh_indir",
    "set_rxfh_indir",
    "get_channels",
    "set_channels",
    "get_dump_flag",
    "get_dump_data",
    "set_dump",
    "get_ts_info",
    "get_module_info",
    "get_module_eeprom",
    "get_eee",
    "set_eee",
];

const TX_LOCKED_APIS: &[&str] = &["ndo_start_xmit"];

const NETPOLL_DISABLED_APIS: &[&str] = &["ndo_poll_controller", "ndo_open", "ndo_stop", "ndo_validate_addr"];

const NETWORK_ONLY_APIS: &[&str] = &["ndo_tx_timeout"];

const NETWORK_DISABLED_APIS: &[&str] = &["resume", "restore", "thaw", "runtime_resume"];

const NETWORK_DISABLING_APIS: &[&str] = &["suspend", "freeze", "poweroff", "runtime_suspend", "shutdown"];

const USB_SERIAL_LIFECYCLE: &[&str] = &["port_probe", "attach", "port_remove", "open", "process_read_urb"];

const USB_SERIAL_MODEM_CONTROL: &[&str] = &["tiocmget", "tiocmset", "tiocmiwait", "get_icount", "ioctl"];

const NFC_EXCLUSIVE: &[&str] = &[
    "dev_up",
    "dev_down",
    "dep_link_up",
    "dep_link_down",
    "activate_target",
    "deactivate_target",
    "im_transceive",
    "tm_send",
    "start_poll",
    "stop_poll",
];

/// API name to serialization class. An API belongs to every class whose
/// list names it.
const API_RULES: &[(ApiClasses, &[&str])] = &[
    (ApiClasses::DEVICE_LOCK, DEVICE_LIFECYCLE_APIS),
    (ApiClasses::DEVICE_LOCK, POWER_MANAGEMENT_APIS),
    (ApiClasses::POWER_LOCK, RUNTIME_PM_APIS),
    (ApiClasses::RTNL, NET_DEVICE_RTNL_APIS),
    (ApiClasses::RTNL, ETHTOOL_RTNL_APIS),
    (ApiClasses::TX_LOCK, TX_LOCKED_APIS),
    (ApiClasses::POWER_MANAGEMENT, POWER_MANAGEMENT_APIS),
    (ApiClasses::NETPOLL_DISABLED, NETPOLL_DISABLED_APIS),
    (ApiClasses::NETWORK, NET_DEVICE_RTNL_APIS),
    (ApiClasses::NETWORK, ETHTOOL_RTNL_APIS),
    (ApiClasses::NETWORK, NETWORK_ONLY_APIS),
    (ApiClasses::CALLED_WITH_NETWORK_DISABLED, NETWORK_DISABLED_APIS),
    (ApiClasses::DISABLES_NETWORK, NETWORK_DISABLING_APIS),
];

/// All serialization classes of a callback slot.
pub fn classify(api: &str) -> ApiClasses {
    API_RULES
        .iter()
        .filter(|(_, apis)| apis.contains(&api))
        .fold(ApiClasses::empty(), |classes, (class, _)| classes | *class)
}

/// Classes that make two callbacks mutually exclusive when both have them.
pub const EXCLUSIVE_CLASSES: ApiClasses = ApiClasses::DEVICE_LOCK
    .union(ApiClasses::POWER_LOCK)
    .union(ApiClasses::RTNL)
    .union(ApiClasses::TX_LOCK)
    .union(ApiClasses::POWER_MANAGEMENT)
    .union(ApiClasses::NETPOLL_DISABLED);
