// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The catalog of a driver's entry points and the pairs of them the kernel
//! may run concurrently.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub use entry_point::{CLONE_SUFFIX, EntryPoint, EntryPointPair, Module};
pub use info::{InfoEntry, InfoSection};
pub use kernel_api::{ApiClasses, KernelLock, ModuleApi};
pub use xml::{PairOutcome, write_pairs};

mod entry_point;
pub mod info;
pub mod kernel_api;
mod pairing;
mod xml;

pub use pairing::{can_be_paired, can_run_concurrently};

#[derive(Debug, Error)]
pub enum ModelError {
    /// Two callbacks claim to initialize the driver.
    #[error("cannot have more than one init entry point (found `{first}` and `{second}`)")]
    DuplicateInitEntryPoint { first: String, second: String },
    #[error("malformed driver info at line {line}: {reason}")]
    MalformedInfo { line: usize, reason: String },
    #[error("failed to read driver info `{}`", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything the analysis knows about the driver before looking at its code.
/// The pair set is computed when the model is built and never changes.
#[derive(Debug, Clone)]
pub struct DriverModel {
    entry_points: Vec<EntryPoint>,
    modules: Vec<Module>,
    pairs: Vec<EntryPointPair>,
    init_entry_point: Option<String>,
    shared_struct_initializer: Option<String>,
    synthesized_init: bool,
}

impl DriverModel {
    pub fn from_info_file(path: &Path) -> Result<DriverModel, ModelError> {
        let text =
            std::fs::read_to_string(path).map_err(|source| ModelError::Io { path: path.to_path_buf(), source })?;
        DriverModel::from_info_str(&text)
    }

    pub fn from_info_str(text: &str) -> Result<DriverModel, ModelError> {
        DriverModel::new(&info::parse(text)?)
    }

    /// Build the catalog from metadata sections and compute the pairs.
    pub fn new(sections: &[InfoSection]) -> Result<DriverModel, ModelError> {
        let kinds: Vec<ModuleApi> = sections.iter().filter_map(|s| s.api.parse().ok()).collect();
        let synthesized_init = !kinds.iter().any(|kind| kind.is_driver_registration());
        let has_network = kinds.contains(&ModuleApi::NetDeviceOps);

        let mut modules: Vec<Module> = Vec::new();
        let mut entry_points: Vec<EntryPoint> = Vec::new();
        let mut init_entry_point: Option<String> = None;
        let mut shared_struct_initializer = None;
        for section in sections {
            if section.is_shared_struct() {
                shared_struct_initializer = section.entries.first().map(|e| e.function.clone());
                continue;
            }
            let module_idx = match modules.iter().position(|m| m.api == section.api) {
                Some(idx) => idx,
                None => {
                    modules.push(Module::new(&section.api, &section.kernel_func));
                    modules.len() - 1
                }
            };
            for entry in &section.entries {
                modules[module_idx].entry_points.push(entry.function.clone());
                if entry_points.iter().any(|ep| ep.name == entry.function) {
                    continue;
                }
                let module = &modules[module_idx];
                let is_init = entry.api == "probe" && module.kind.is_some_and(ModuleApi::is_driver_registration);
                if is_init {
                    if let Some(first) = &init_entry_point {
                        return Err(ModelError::DuplicateInitEntryPoint {
                            first: first.clone(),
                            second: entry.function.clone(),
                        });
                    }
                    init_entry_point = Some(entry.function.clone());
                }
                let ep = EntryPoint::new(&entry.function, &entry.api, module, is_init, has_network);
                if ep.needs_network_clone() {
                    let clone = ep.network_clone();
                    modules[module_idx].entry_points.push(clone.name.clone());
                    entry_points.push(ep);
                    entry_points.push(clone);
                } else {
                    entry_points.push(ep);
                }
            }
        }

        let pairs = pairing::compute_pairs(&entry_points);
        debug!(entry_points = entry_points.len(), pairs = pairs.len(), synthesized_init, "driver model");
        Ok(DriverModel {
            entry_points,
            modules,
            pairs,
            init_entry_point,
            shared_struct_initializer,
            synthesized_init,
        })
    }

    pub fn entry_points(&self) -> &[EntryPoint] {
        &self.entry_points
    }

    pub fn entry_point(&self, name: &str) -> Option<&EntryPoint> {
        self.entry_points.iter().find(|ep| ep.name == name)
    }

    pub fn entry_point_mut(&mut self, name: &str) -> Option<&mut EntryPoint> {
        self.entry_points.iter_mut().find(|ep| ep.name == name)
    }

    pub fn is_entry_point(&self, name: &str) -> bool {
        self.entry_point(name).is_some()
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn module(&self, api: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.api == api)
    }

    pub fn pairs(&self) -> &[EntryPointPair] {
        &self.pairs
    }

    /// Every entry point that may run concurrently with `name`.
    pub fn pairs_of(&self, name: &str) -> BTreeSet<&str> {
        self.pairs.iter().filter_map(|pair| pair.partner_of(name)).collect()
    }

    pub fn init_entry_point(&self) -> Option<&EntryPoint> {
        self.init_entry_point.as_deref().and_then(|name| self.entry_point(name))
    }

    /// The function that sets up the driver's shared network struct, if the
    /// metadata names one.
    pub fn shared_struct_initializer(&self) -> Option<&str> {
        self.shared_struct_initializer.as_deref()
    }

    /// Whether the driver registers through none of the known bus tables, in
    /// which case its initialization is synthesized by the front end.
    pub fn has_synthesized_init(&self) -> bool {
        self.synthesized_init
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET_DRIVER: &str = "\
<pci_driver$__pci_register_driver>
probe::foo_probe
remove::foo_remove
</>
<net_device_ops$register_netdev>
ndo_open::foo_open
ndo_stop::foo_stop
ndo_start_xmit::foo_xmit
ndo_tx_timeout::foo_timeout
</>
<dev_pm_ops>
suspend::foo_suspend
resume::foo_resume
</>
<whoop_network_shared_struct>
::foo_init_shared
</>
";

    #[test]
    fn catalog_from_info() {
        let model = DriverModel::from_info_str(NET_DRIVER).unwrap();
        let names: Vec<_> = model.entry_points().iter().map(|ep| ep.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "foo_probe",
                "foo_remove",
                "foo_open",
                "foo_stop",
                "foo_xmit",
                "foo_timeout",
                "foo_suspend",
                "foo_suspend#net",
                "foo_resume",
                "foo_resume#net"
            ]
        );
        assert_eq!(model.init_entry_point().map(|ep| ep.name.as_str()), Some("foo_probe"));
        assert!(model.entry_point("foo_remove").unwrap().is_exit);
        assert_eq!(model.shared_struct_initializer(), Some("foo_init_shared"));
        assert!(!model.has_synthesized_init());
        assert_eq!(model.module("net_device_ops").unwrap().kernel_func, "register_netdev");
        assert_eq!(model.module("dev_pm_ops").unwrap().entry_points.len(), 4);
    }

    #[test]
    fn pairs_respect_kernel_rules() {
        let model = DriverModel::from_info_str(NET_DRIVER).unwrap();
        let xmit_partners = model.pairs_of("foo_xmit");
        assert!(xmit_partners.contains("foo_timeout"));
        assert!(xmit_partners.contains("foo_probe"));
        assert!(!xmit_partners.contains("foo_open"));
        assert!(!xmit_partners.contains("foo_xmit"));
        assert!(!xmit_partners.contains("foo_remove"));
        // Only the clones meet network callbacks.
        assert!(xmit_partners.contains("foo_suspend#net"));
        assert!(!xmit_partners.contains("foo_suspend"));
        // Power management callbacks are serialised with each other and with probe.
        assert!(model.pairs_of("foo_suspend").is_empty());
    }

    #[test]
    fn second_init_is_fatal() {
        let text = "<pci_driver>\nprobe::a_probe\n</>\n<usb_driver>\nprobe::b_probe\n</>\n";
        match DriverModel::from_info_str(text) {
            Err(ModelError::DuplicateInitEntryPoint { first, second }) => {
                assert_eq!(first, "a_probe");
                assert_eq!(second, "b_probe");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn duplicates_join_the_module_only() {
        let text = "<file_operations>\nopen::foo_open\nread::foo_read\n</>\n<miscdevice>\nopen::foo_open\n</>\n";
        let model = DriverModel::from_info_str(text).unwrap();
        assert_eq!(model.entry_points().len(), 2);
        assert_eq!(model.module("miscdevice").unwrap().entry_points, vec!["foo_open".to_string()]);
        assert!(model.has_synthesized_init());
        assert!(model.init_entry_point().is_none());
    }

    #[test]
    fn reads_info_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo.info");
        std::fs::write(&path, NET_DRIVER).unwrap();
        assert_eq!(DriverModel::from_info_file(&path).unwrap().entry_points().len(), 10);
        let missing = DriverModel::from_info_file(&dir.path().join("bar.info")).unwrap_err();
        assert!(matches!(missing, ModelError::Io { .. }));
    }
}
