// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! State shared by every analysis pass: the program being rewritten, the
//! driver model and the regions built over the program.

use crate::ghost::GhostRegistry;
use crate::regions::{InstrumentationRegion, PairCheckingRegion};
use boogie_ast::boogie_program::{BoogieProgram, Implementation};
use driver_metadata::{DriverModel, PairOutcome};
use std::collections::BTreeSet;

/// Prefix of the calls that change whether the device is registered.
pub const REGISTER_DEVICE_PREFIX: &str = "_REGISTER_DEVICE_";

/// Prefix of the placeholder calls sliced code is replaced with.
pub const NO_OP_PREFIX: &str = "_NO_OP_$";

/// Prefixes of the access markers.
pub const ACCESS_MARKER_PREFIXES: [&str; 2] = ["_WRITE_LS_", "_READ_LS_"];

/// Helpers declared by the instrumentation. They have no region.
const HELPER_PREFIXES: &[&str] =
    &["_WRITE_LS_", "_READ_LS_", REGISTER_DEVICE_PREFIX, "_NO_OP_", "_UPDATE_CLS_", "_CHECK_"];

/// Functions that are modelled rather than analysed.
const MODELLED_FUNCTIONS: &[&str] = &["mutex_lock", "mutex_unlock"];

const MEMCPY_FRAGMENTS: &[&str] = &["$memcpy", "memcpy_fromio"];

/// Attribute on the implementation that calls every entry point.
pub const HARNESS_ATTRIBUTE: &str = "harness";

pub fn is_instrumentation_helper(name: &str) -> bool {
    HELPER_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// Whether `name` is a marker call recording a shared-state access.
pub fn is_access_marker(name: &str) -> bool {
    ACCESS_MARKER_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// Whether `imp` is a function body the resource analysis looks at.
pub fn needs_region(imp: &Implementation) -> bool {
    let name = imp.name.as_str();
    !(is_instrumentation_helper(name)
        || name.starts_with("check$")
        || imp.attributes.has("checker")
        || imp.attributes.has(HARNESS_ATTRIBUTE)
        || MODELLED_FUNCTIONS.contains(&name)
        || MEMCPY_FRAGMENTS.iter().any(|fragment| name.contains(fragment)))
}

pub struct AnalysisContext {
    pub program: BoogieProgram,
    pub model: DriverModel,
    pub ghosts: GhostRegistry,
    pub regions: Vec<InstrumentationRegion>,
    pub pair_regions: Vec<PairCheckingRegion>,
}

impl AnalysisContext {
    pub fn new(program: BoogieProgram, model: DriverModel) -> Self {
        let ghosts = GhostRegistry::new(&program);
        AnalysisContext { program, model, ghosts, regions: vec![], pair_regions: vec![] }
    }

    /// The implementation that sets up the driver and calls its entry points.
    pub fn harness(&self) -> Option<&Implementation> {
        self.program.implementations.iter().find(|imp| imp.attributes.has(HARNESS_ATTRIBUTE))
    }

    pub fn region(&self, name: &str) -> Option<&InstrumentationRegion> {
        self.regions.iter().find(|r| r.name() == name)
    }

    pub fn region_mut(&mut self, name: &str) -> Option<&mut InstrumentationRegion> {
        self.regions.iter_mut().find(|r| r.name() == name)
    }

    pub fn region_index(&self, name: &str) -> Option<usize> {
        self.regions.iter().position(|r| r.name() == name)
    }

    pub fn pair_region(&self, name: &str) -> Option<&PairCheckingRegion> {
        self.pair_regions.iter().find(|r| r.name() == name)
    }

    /// Functions the analysis starts from: entry points, the shared struct
    /// initializer and the harness.
    pub fn analysis_roots(&self) -> Vec<String> {
        let mut roots: Vec<String> = Vec::new();
        let candidates = self
            .model
            .entry_points()
            .iter()
            .map(|ep| ep.function_name())
            .chain(self.model.shared_struct_initializer())
            .chain(self.harness().map(|h| h.name.as_str()));
        for root in candidates {
            if !roots.iter().any(|r| r == root) {
                roots.push(root.to_string());
            }
        }
        roots
    }

    /// `root` and every function it transitively calls.
    pub fn reachable_from(&self, root: &str) -> BTreeSet<String> {
        let mut reachable = self.program.call_graph().nested_successors(root);
        reachable.insert(root.to_string());
        reachable
    }

    /// Every function reachable from any analysis root.
    pub fn reachable_from_roots(&self) -> BTreeSet<String> {
        let graph = self.program.call_graph();
        let mut reachable = BTreeSet::new();
        for root in self.analysis_roots() {
            reachable.extend(graph.nested_successors(&root));
            reachable.insert(root);
        }
        reachable
    }

    /// One report entry per pair, none of them flagged yet.
    pub fn pair_outcomes(&self) -> Vec<PairOutcome> {
        self.model
            .pairs()
            .iter()
            .map(|pair| PairOutcome { ep1: pair.ep1.clone(), ep2: pair.ep2.clone(), bug: false })
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use boogie_ast::boogie_program::{Attribute, Attributes, Block, Cmd, Expr, Parameter, TransferCmd, Type};

    /// An implementation with one parameter `p` whose single block runs `cmds`.
    pub(crate) fn function(name: &str, cmds: Vec<Cmd>) -> Implementation {
        Implementation::new(name, vec![Parameter::new("p", Type::Int)], vec![Block::new("$bb0", cmds, TransferCmd::Return)])
    }

    pub(crate) fn call(callee: &str) -> Cmd {
        Cmd::call(callee, vec![Expr::symbol("p")])
    }

    #[test]
    fn helpers_have_no_region() {
        for name in ["_WRITE_LS_$M.0", "_READ_LS_$M.1", "_REGISTER_DEVICE_$foo", "_NO_OP_$foo_probe", "_UPDATE_CLS_x", "_CHECK_y"] {
            assert!(!needs_region(&function(name, vec![])), "{name}");
        }
        for name in ["check$a$b", "mutex_lock", "mutex_unlock", "$memcpy.i8", "memcpy_fromio"] {
            assert!(!needs_region(&function(name, vec![])), "{name}");
        }
        let mut harness = function("main", vec![]);
        harness.attributes = Attributes::new().with(Attribute::flag(HARNESS_ATTRIBUTE));
        assert!(!needs_region(&harness));
        assert!(needs_region(&function("foo_open", vec![])));
        assert!(is_access_marker("_READ_LS_$M.1"));
        assert!(!is_access_marker("_UPDATE_CLS_x"));
    }

    #[test]
    fn roots_and_reachability() {
        let model = DriverModel::from_info_str(
            "<file_operations>\nopen::foo_open\nread::foo_read\n</>\n<whoop_network_shared_struct>\n::foo_init\n</>\n",
        )
        .unwrap();
        let mut program = BoogieProgram::new();
        program.add_implementation(function("foo_open", vec![call("helper")]));
        program.add_implementation(function("helper", vec![call("leaf")]));
        program.add_implementation(function("leaf", vec![]));
        program.add_implementation(function("foo_read", vec![]));
        program.add_implementation(function("unused", vec![call("leaf")]));
        let mut harness = function("main", vec![call("foo_open"), call("foo_read")]);
        harness.attributes = Attributes::new().with(Attribute::flag(HARNESS_ATTRIBUTE));
        program.add_implementation(harness);

        let ctx = AnalysisContext::new(program, model);
        assert_eq!(ctx.harness().unwrap().name, "main");
        assert_eq!(ctx.analysis_roots(), ["foo_open", "foo_read", "foo_init", "main"]);
        assert_eq!(ctx.reachable_from("foo_open"), BTreeSet::from(["foo_open", "helper", "leaf"].map(String::from)));
        let reachable = ctx.reachable_from_roots();
        assert!(reachable.contains("leaf") && reachable.contains("main"));
        assert!(!reachable.contains("unused"));
        assert!(ctx.pair_outcomes().iter().all(|outcome| !outcome.bug));
    }
}
