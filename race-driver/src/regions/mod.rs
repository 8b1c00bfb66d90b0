// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Analysis records attached to the program: one instrumentation region per
//! analysed function body and one pair checking region per entry point pair.

mod instrumentation;
mod pair_checking;

pub use instrumentation::{ArgumentBinding, CallSite, InstrumentationRegion};
pub use pair_checking::{PairCheckingRegion, ResourceCheck};

use driver_metadata::{DriverModel, EntryPoint};
use std::collections::BTreeSet;

/// Answers which shared memory regions entry points touch.
pub trait MemoryRegionOracle {
    /// Resources `ep` reads or writes.
    fn regions_of(&self, ep: &EntryPoint) -> BTreeSet<String>;

    /// Resources touched by both entry points.
    fn pair_regions(&self, ep1: &EntryPoint, ep2: &EntryPoint) -> BTreeSet<String> {
        let first = self.regions_of(ep1);
        self.regions_of(ep2).into_iter().filter(|r| first.contains(r)).collect()
    }
}

/// Uses the access sets the resource analysis recorded on each entry point.
impl MemoryRegionOracle for DriverModel {
    fn regions_of(&self, ep: &EntryPoint) -> BTreeSet<String> {
        ep.resources().into_iter().map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_regions_intersect() {
        let mut model = DriverModel::from_info_str("<file_operations>\nopen::foo_open\nread::foo_read\n</>\n").unwrap();
        let open = model.entry_point_mut("foo_open").unwrap();
        open.write_accesses.insert("$M.0".into());
        open.read_accesses.insert("$M.1".into());
        let read = model.entry_point_mut("foo_read").unwrap();
        read.read_accesses.insert("$M.0".into());
        read.write_accesses.insert("$M.2".into());

        let open = model.entry_point("foo_open").unwrap();
        let read = model.entry_point("foo_read").unwrap();
        assert_eq!(model.regions_of(open), BTreeSet::from(["$M.0".to_string(), "$M.1".to_string()]));
        assert_eq!(model.pair_regions(open, read), BTreeSet::from(["$M.0".to_string()]));
        assert_eq!(model.pair_regions(read, read).len(), 2);
    }
}
