// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Synthesis of the procedure that checks one pair of entry points.
//!
//! The generated implementation has three blocks:
//! ```ignore
//! $header:  goto $logger;
//! $logger:  call ep1(...); call ep2(...); goto $checker;
//! $checker: assume {:resource "R"} {:captureState "check_state_0"} {:checker} true;
//!           assert {:resource "R"} {:race_checking} access ==> lock;
//!           return;
//! ```

use crate::ghost::{AccessKind, GhostRegistry, Lockset};
use crate::pointer::root_pointer;
use anyhow::{Context, Result};
use boogie_ast::boogie_program::{
    AttrValue, Attribute, Attributes, Block, BoogieProgram, CallCmd, Cmd, Expr, Implementation, Parameter, Procedure,
    TransferCmd,
};
use driver_metadata::{EntryPoint, EntryPointPair, KernelLock};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// The assertion guarding one shared resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceCheck {
    pub resource: String,
    /// Label of the program state captured right before the assertion
    pub capture_state: String,
}

#[derive(Debug, Clone)]
pub struct PairCheckingRegion {
    name: String,
    pair: EntryPointPair,
    checks: Vec<ResourceCheck>,
    callees: Vec<String>,
    involves_init: bool,
}

/// Where a formal parameter of the checker comes from.
enum Binding {
    /// A formal of the first entry point
    First(usize),
    /// A formal of the second entry point that has no counterpart in the first
    Second(usize),
}

impl PairCheckingRegion {
    /// Build the checker for `ep1` and `ep2` over the shared `resources`.
    /// Fails if either entry point function has no implementation.
    pub fn synthesize(
        program: &BoogieProgram,
        ghosts: &GhostRegistry,
        harness: Option<&Implementation>,
        ep1: &EntryPoint,
        ep2: &EntryPoint,
        resources: &BTreeSet<String>,
    ) -> Result<(PairCheckingRegion, Procedure, Implementation)> {
        let pair = EntryPointPair::new(&ep1.name, &ep2.name);
        let name = pair.checker_name();
        let imp1 = program
            .implementation(ep1.function_name())
            .with_context(|| format!("No implementation for entry point `{}`", ep1.name))?;
        let imp2 = program
            .implementation(ep2.function_name())
            .with_context(|| format!("No implementation for entry point `{}`", ep2.name))?;
        let is_self = pair.is_self_pair();

        let mut first = imp1.parameters.clone();
        let mut second: Vec<Parameter> = Vec::new();
        let mut bindings = Vec::new();
        if !is_self {
            let matches = match_parameters(program, harness, imp1, imp2);
            for (i, param) in imp2.parameters.iter().enumerate() {
                match matches.get(&i) {
                    Some(j) => bindings.push(Binding::First(*j)),
                    None => {
                        bindings.push(Binding::Second(second.len()));
                        second.push(param.clone());
                    }
                }
            }
        }
        for param in second.iter_mut() {
            if let Some(clash) = first.iter_mut().find(|p| p.name() == param.name()) {
                let base = param.name().to_string();
                clash.rename(format!("{base}$1"));
                param.rename(format!("{base}$2"));
            }
        }

        let mut locals = Vec::new();
        let first_args = first.iter().map(|p| Expr::symbol(p.name())).collect();
        let mut logger = vec![entry_point_call(imp1, first_args, "$1", &mut locals)];
        if !is_self {
            let second_args = bindings
                .iter()
                .map(|binding| match binding {
                    Binding::First(j) => Expr::symbol(first[*j].name()),
                    Binding::Second(k) => Expr::symbol(second[*k].name()),
                })
                .collect();
            logger.push(entry_point_call(imp2, second_args, "$2", &mut locals));
        }

        let mut checks = Vec::new();
        let mut checker = Vec::new();
        for resource in resources {
            let Some(assertion) = race_assertion(ghosts, ep1, ep2, resource, is_self) else {
                trace!(%name, %resource, "no access checking state");
                continue;
            };
            let capture_state = format!("check_state_{}", checks.len());
            let assume_attrs = Attributes::new()
                .with(resource_attribute(resource))
                .with(Attribute::new("captureState", vec![AttrValue::from(capture_state.as_str())]))
                .with(Attribute::flag("checker"));
            checker.push(Cmd::assume(Expr::bool(true), assume_attrs));
            let assert_attrs = Attributes::new().with(resource_attribute(resource)).with(Attribute::flag("race_checking"));
            checker.push(Cmd::assert(assertion, assert_attrs));
            checks.push(ResourceCheck { resource: resource.clone(), capture_state });
        }

        let parameters: Vec<Parameter> = first.into_iter().chain(second).collect();
        let mut callees = vec![imp1.name.clone()];
        if !is_self {
            callees.push(imp2.name.clone());
        }

        let mut procedure = Procedure::new(&name, parameters.clone());
        procedure.attributes = Attributes::new().with(Attribute::flag("checker"));
        procedure.contract.requires = preconditions(ghosts, ep1, ep2, is_self);
        for callee in &callees {
            for var in program.procedure(callee).iter().flat_map(|p| p.contract.modifies.iter()) {
                if !procedure.contract.modifies.contains(var) {
                    procedure.contract.modifies.push(var.clone());
                }
            }
        }

        let mut implementation = Implementation::new(
            &name,
            parameters,
            vec![
                Block::new("$header", vec![], TransferCmd::Goto { labels: vec!["$logger".into()] }),
                Block::new("$logger", logger, TransferCmd::Goto { labels: vec!["$checker".into()] }),
                Block::new("$checker", checker, TransferCmd::Return),
            ],
        );
        implementation.locals = locals;
        implementation.attributes = Attributes::new().with(Attribute::flag("checker"));

        let region = PairCheckingRegion { name, pair, checks, callees, involves_init: ep1.is_init || ep2.is_init };
        Ok((region, procedure, implementation))
    }

    /// Name of the checker procedure.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pair(&self) -> &EntryPointPair {
        &self.pair
    }

    pub fn checks(&self) -> &[ResourceCheck] {
        &self.checks
    }

    /// The entry point functions the checker calls.
    pub fn callees(&self) -> &[String] {
        &self.callees
    }

    pub fn involves_init(&self) -> bool {
        self.involves_init
    }

    pub fn check_of(&self, resource: &str) -> Option<&ResourceCheck> {
        self.checks.iter().find(|c| c.resource == resource)
    }

    #[cfg(test)]
    pub(crate) fn with_checks(pair: EntryPointPair, checks: Vec<ResourceCheck>) -> Self {
        let callees = vec![pair.ep1.clone(), pair.ep2.clone()];
        PairCheckingRegion { name: pair.checker_name(), pair, checks, callees, involves_init: false }
    }
}

fn resource_attribute(resource: &str) -> Attribute {
    Attribute::new("resource", vec![AttrValue::from(resource)])
}

/// A call to an entry point function. Its results go to fresh locals.
fn entry_point_call(imp: &Implementation, arguments: Vec<Expr>, suffix: &str, locals: &mut Vec<Parameter>) -> Cmd {
    let mut call = CallCmd::new(&imp.name, arguments);
    for ret in &imp.return_type {
        let local = Parameter::new(format!("{}{suffix}", ret.name()), ret.typ().clone());
        call.outputs.push(local.name().to_string());
        locals.push(local);
    }
    Cmd::Call(call)
}

/// Map formals of `imp2` to formals of `imp1` that the harness feeds the same
/// value, judged by the first call to each function.
fn match_parameters(
    program: &BoogieProgram,
    harness: Option<&Implementation>,
    imp1: &Implementation,
    imp2: &Implementation,
) -> BTreeMap<usize, usize> {
    let Some(harness) = harness else {
        return BTreeMap::new();
    };
    let normalized_args = |callee: &str| -> Option<Vec<String>> {
        let (_, _, call) = harness.calls().find(|(_, _, call)| call.callee == callee)?;
        Some(
            call.arguments
                .iter()
                .map(|arg| root_pointer(program, harness, arg).map_or_else(|| arg.to_string(), |p| p.to_string()))
                .collect(),
        )
    };
    let (Some(args1), Some(args2)) = (normalized_args(&imp1.name), normalized_args(&imp2.name)) else {
        return BTreeMap::new();
    };
    args2
        .iter()
        .enumerate()
        .filter_map(|(i, arg)| {
            let j = args1.iter().take(imp1.parameters.len()).position(|a| a == arg)?;
            (i < imp2.parameters.len()).then_some((i, j))
        })
        .collect()
}

/// Whether `lock` protects anything `ep` does.
fn lock_applies(ghosts: &GhostRegistry, ep: &EntryPoint, lock: &str) -> bool {
    ghosts.uses_lock(&ep.name, lock) && KernelLock::from_ghost_name(lock).is_none_or(|k| ep.uses_kernel_lock(k))
}

/// `access ==> lock` where `access` says the two entry points conflict on
/// `resource` and `lock` says some lock was held through every access of both.
fn race_assertion(
    ghosts: &GhostRegistry,
    ep1: &EntryPoint,
    ep2: &EntryPoint,
    resource: &str,
    is_self: bool,
) -> Option<Expr> {
    let var = |ep: &EntryPoint, kind| ghosts.access_variable(&ep.name, resource, kind).map(|v| Expr::symbol(&v.name));
    let w1 = var(ep1, AccessKind::Write)?;
    let r1 = var(ep1, AccessKind::Read)?;
    let w2 = var(ep2, AccessKind::Write)?;
    let r2 = var(ep2, AccessKind::Read)?;
    let access = if is_self {
        w1
    } else {
        w1.clone().and(w2.clone()).or(w1.and(r2)).or(r1.and(w2))
    };

    let mut protection: Option<Expr> = None;
    for lock in ghosts.locks() {
        if !lock_applies(ghosts, ep1, lock) && (is_self || !lock_applies(ghosts, ep2, lock)) {
            continue;
        }
        if KernelLock::from_ghost_name(lock) == Some(KernelLock::Tx) && !ep1.is_tx_locked() && !ep2.is_tx_locked() {
            continue;
        }
        let ls = |ep: &EntryPoint| ghosts.memory_lockset(&ep.name, resource, lock).map(|ls| Expr::symbol(&ls.name));
        let held = match (ls(ep1), ls(ep2)) {
            (Some(ls1), _) if is_self => ls1,
            (Some(ls1), Some(ls2)) => ls1.and(ls2),
            _ => continue,
        };
        protection = Some(match protection {
            None => held,
            Some(other) => other.or(held),
        });
    }
    Some(access.implies(protection.unwrap_or(Expr::bool(false))))
}

/// Whether a memory lockset can be held on entry: a kernel lock only counts
/// for entry points that use it.
fn is_lock_used(ls: &Lockset, ep: &EntryPoint) -> bool {
    KernelLock::from_ghost_name(&ls.lock).is_none_or(|k| ep.uses_kernel_lock(k))
}

fn preconditions(ghosts: &GhostRegistry, ep1: &EntryPoint, ep2: &EntryPoint, is_self: bool) -> Vec<Expr> {
    let eps: &[&EntryPoint] = if is_self { &[ep1] } else { &[ep1, ep2] };
    let mut requires = Vec::new();
    for ep in eps {
        requires.extend(ghosts.current_locksets_of(&ep.name).map(|ls| !Expr::symbol(&ls.name)));
    }
    for ep in eps {
        for ls in ghosts.memory_locksets_of(&ep.name) {
            let var = Expr::symbol(&ls.name);
            requires.push(if is_lock_used(ls, ep) { var } else { !var });
        }
    }
    for ep in eps {
        requires.extend(ghosts.access_variables_of(&ep.name).map(|v| !Expr::symbol(&v.name)));
    }
    requires
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ghost::tests::declare_ghosts;
    use boogie_ast::boogie_program::Type;
    use driver_metadata::DriverModel;

    const NET_OPS: &str = "<net_device_ops$register_netdev>\nndo_open::foo_open\nndo_start_xmit::foo_xmit\n</>\n";

    fn function(name: &str, params: &[&str]) -> Implementation {
        let params = params.iter().map(|p| Parameter::new(*p, Type::Int)).collect();
        Implementation::new(name, params, vec![Block::new("$bb0", vec![], TransferCmd::Return)])
    }

    fn program(with_harness: bool) -> BoogieProgram {
        let mut program = BoogieProgram::new();
        declare_ghosts(&mut program, &["foo_open", "foo_xmit"], &["$M.0", "$M.1"], &["lock$tx", "mtx"]);
        let mut open = Procedure::new("foo_open", vec![Parameter::new("dev", Type::Int)]);
        open.contract.modifies = vec!["WRITTEN_$M.0_foo_open".into(), "$M.0".into()];
        let mut xmit = Procedure::new("foo_xmit", vec![]);
        xmit.contract.modifies = vec!["$M.0".into(), "READ_$M.0_foo_xmit".into()];
        program.add_procedure(open);
        program.add_procedure(xmit);
        program.add_implementation(function("foo_open", &["dev"]));
        let mut xmit = function("foo_xmit", &["skb", "dev"]);
        xmit.return_type = vec![Parameter::new("$r", Type::Int)];
        program.add_implementation(xmit);
        if with_harness {
            let mut harness = Implementation::new(
                "$harness",
                vec![],
                vec![Block::new(
                    "$bb0",
                    vec![
                        Cmd::call("foo_open", vec![Expr::symbol("$pdev")]),
                        Cmd::call("foo_xmit", vec![Expr::symbol("$pskb"), Expr::symbol("$pdev")]),
                    ],
                    TransferCmd::Return,
                )],
            );
            harness.locals = vec![Parameter::new("$pdev", Type::Int), Parameter::new("$pskb", Type::Int)];
            program.add_implementation(harness);
        }
        program
    }

    fn resources() -> BTreeSet<String> {
        BTreeSet::from(["$M.0".to_string(), "$M.1".to_string()])
    }

    #[test]
    fn checker_shape() {
        let model = DriverModel::from_info_str(NET_OPS).unwrap();
        let program = program(true);
        let ghosts = GhostRegistry::new(&program);
        let (open, xmit) = (model.entry_point("foo_open").unwrap(), model.entry_point("foo_xmit").unwrap());
        let harness = program.implementation("$harness");
        let (region, procedure, imp) =
            PairCheckingRegion::synthesize(&program, &ghosts, harness, open, xmit, &resources()).unwrap();

        assert_eq!(region.name(), "check$foo_open$foo_xmit");
        assert_eq!(region.callees(), ["foo_open", "foo_xmit"]);
        assert_eq!(region.checks().len(), 2);
        assert_eq!(region.check_of("$M.1").unwrap().capture_state, "check_state_1");
        assert!(!region.involves_init());

        // `dev` is shared through the harness, `skb` is added.
        let names: Vec<&str> = imp.parameters.iter().map(Parameter::name).collect();
        assert_eq!(names, ["dev", "skb"]);
        let labels: Vec<&str> = imp.blocks.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, ["$header", "$logger", "$checker"]);
        let calls: Vec<String> = imp.blocks[1].cmds.iter().map(|c| c.as_call().unwrap().arguments.len().to_string()).collect();
        assert_eq!(calls, ["1", "2"]);
        let xmit_call = imp.blocks[1].cmds[1].as_call().unwrap();
        assert_eq!(xmit_call.arguments[0].to_string(), "skb");
        assert_eq!(xmit_call.arguments[1].to_string(), "dev");
        assert_eq!(xmit_call.outputs, ["$r$2"]);
        assert_eq!(imp.locals.len(), 1);

        assert!(procedure.attributes.has("checker") && imp.attributes.has("checker"));
        assert_eq!(procedure.contract.modifies, ["WRITTEN_$M.0_foo_open", "$M.0", "READ_$M.0_foo_xmit"]);
        let requires: Vec<String> = procedure.contract.requires.iter().map(Expr::to_string).collect();
        assert!(requires.contains(&"!(CLS_mtx_foo_open)".to_string()));
        assert!(requires.contains(&"!(CLS_mtx_foo_xmit)".to_string()));
        assert!(requires.contains(&"LS_$M.0_mtx_foo_xmit".to_string()));
        assert!(requires.contains(&"LS_$M.0_lock$tx_foo_xmit".to_string()));
        assert!(requires.contains(&"!(WRITTEN_$M.1_foo_open)".to_string()));
    }

    #[test]
    fn assertion_covers_all_conflicts() {
        let model = DriverModel::from_info_str(NET_OPS).unwrap();
        let program = program(true);
        let ghosts = GhostRegistry::new(&program);
        let (open, xmit) = (model.entry_point("foo_open").unwrap(), model.entry_point("foo_xmit").unwrap());
        let assertion = race_assertion(&ghosts, open, xmit, "$M.0", false).unwrap().to_string();
        assert!(assertion.contains("(WRITTEN_$M.0_foo_open && WRITTEN_$M.0_foo_xmit)"));
        assert!(assertion.contains("(WRITTEN_$M.0_foo_open && READ_$M.0_foo_xmit)"));
        assert!(assertion.contains("(READ_$M.0_foo_open && WRITTEN_$M.0_foo_xmit)"));
        assert!(assertion.contains("(LS_$M.0_lock$tx_foo_open && LS_$M.0_lock$tx_foo_xmit)"));
        assert!(assertion.contains("(LS_$M.0_mtx_foo_open && LS_$M.0_mtx_foo_xmit)"));

        let selfish = race_assertion(&ghosts, xmit, xmit, "$M.0", true).unwrap().to_string();
        assert!(selfish.starts_with("(WRITTEN_$M.0_foo_xmit ==>"));
        assert!(!selfish.contains("foo_open"));

        assert!(race_assertion(&ghosts, open, xmit, "$M.7", false).is_none());
    }

    #[test]
    fn unlocked_pair_asserts_false() {
        let model = DriverModel::from_info_str(NET_OPS).unwrap();
        let mut program = BoogieProgram::new();
        declare_ghosts(&mut program, &["foo_open", "foo_xmit"], &["$M.0"], &[]);
        let ghosts = GhostRegistry::new(&program);
        let (open, xmit) = (model.entry_point("foo_open").unwrap(), model.entry_point("foo_xmit").unwrap());
        let assertion = race_assertion(&ghosts, open, xmit, "$M.0", false).unwrap();
        assert!(assertion.to_string().ends_with("==> false)"));
    }

    #[test]
    fn clashing_formals_are_renamed() {
        let model = DriverModel::from_info_str(NET_OPS).unwrap();
        let program = program(false);
        let ghosts = GhostRegistry::new(&program);
        let (open, xmit) = (model.entry_point("foo_open").unwrap(), model.entry_point("foo_xmit").unwrap());
        let (_, _, imp) = PairCheckingRegion::synthesize(&program, &ghosts, None, open, xmit, &resources()).unwrap();
        let names: Vec<&str> = imp.parameters.iter().map(Parameter::name).collect();
        assert_eq!(names, ["dev$1", "skb", "dev$2"]);
        let xmit_call = imp.blocks[1].cmds[1].as_call().unwrap();
        assert_eq!(xmit_call.arguments[1].to_string(), "dev$2");
        assert_eq!(imp.blocks[1].cmds[0].as_call().unwrap().arguments[0].to_string(), "dev$1");
    }

    #[test]
    fn self_pair_calls_once() {
        let model = DriverModel::from_info_str(NET_OPS).unwrap();
        let program = program(false);
        let ghosts = GhostRegistry::new(&program);
        let xmit = model.entry_point("foo_xmit").unwrap();
        let (region, procedure, imp) =
            PairCheckingRegion::synthesize(&program, &ghosts, None, xmit, xmit, &resources()).unwrap();
        assert_eq!(region.name(), "check$foo_xmit$foo_xmit");
        assert_eq!(imp.blocks[1].cmds.len(), 1);
        assert_eq!(imp.parameters.len(), 2);
        assert!(procedure.contract.requires.iter().all(|r| !r.to_string().contains("foo_open")));
    }

    #[test]
    fn missing_implementation_is_an_error() {
        let model = DriverModel::from_info_str(NET_OPS).unwrap();
        let mut program = program(false);
        program.remove_procedure("foo_open");
        let ghosts = GhostRegistry::new(&program);
        let (open, xmit) = (model.entry_point("foo_open").unwrap(), model.entry_point("foo_xmit").unwrap());
        let err = PairCheckingRegion::synthesize(&program, &ghosts, None, open, xmit, &resources()).unwrap_err();
        assert!(err.to_string().contains("foo_open"));
    }
}
