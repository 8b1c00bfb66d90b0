// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Remove the parts of the init entry point that run before the device is
//! registered. No other entry point can run concurrently with them, so their
//! accesses cannot race.

use super::device_registration::InitGraph;
use super::{AnalysisPass, PassKind};
use crate::args::AnalysisArgs;
use crate::context::{AnalysisContext, NO_OP_PREFIX, is_access_marker};
use crate::regions::CallSite;
use anyhow::Result;
use boogie_ast::boogie_program::{CallCmd, Cmd, Graph, Implementation, Procedure};
use std::collections::BTreeSet;
use tracing::{debug, trace};

#[derive(Debug)]
pub struct DeviceEnableSlicing;

impl AnalysisPass for DeviceEnableSlicing {
    fn kind(&self) -> PassKind {
        PassKind::Slicing
    }

    fn is_enabled(&self, args: &AnalysisArgs) -> bool {
        !args.no_slicing
    }

    fn run(&mut self, ctx: &mut AnalysisContext) -> Result<()> {
        let Some(graph) = InitGraph::new(ctx) else {
            debug!("nothing to slice");
            return Ok(());
        };
        let no_op = format!("{NO_OP_PREFIX}{}", graph.init_ep);

        let sliceable: BTreeSet<String> = graph
            .regions
            .iter()
            .filter(|name| {
                ctx.region(name).is_some_and(|r| !r.is_device_registered && !r.is_changing_device_registration)
                    && !graph.predecessors.contains(*name)
            })
            .cloned()
            .collect();
        let mut sliced = BTreeSet::new();
        let mut rewritten = 0;
        for name in &graph.regions {
            let Some(imp) = ctx.program.implementation_mut(name) else { continue };
            for cmd in imp.blocks.iter_mut().flat_map(|b| b.cmds.iter_mut()) {
                let Some(call) = cmd.as_call_mut() else { continue };
                if sliceable.contains(&call.callee) {
                    trace!(caller = %name, callee = %call.callee, "sliced call");
                    sliced.insert(std::mem::take(&mut call.callee));
                    *cmd = no_op_call(&no_op);
                    rewritten += 1;
                }
            }
        }

        let changing = std::iter::once(&graph.changing).chain(graph.predecessors.iter());
        for name in changing {
            let Some(imp) = ctx.program.implementation_mut(name) else { continue };
            let Some(site) = graph.registration_site(imp) else { continue };
            rewritten += disable_markers_before(imp, site, &no_op);
        }

        if rewritten > 0 && ctx.program.procedure(&no_op).is_none() {
            ctx.program.add_procedure(Procedure::new(&no_op, vec![]));
        }
        let removed = remove_dead_regions(ctx, &sliced);
        let orphaned = remove_orphaned_checkers(ctx);
        debug!(rewritten, removed, orphaned, "sliced");
        Ok(())
    }
}

fn no_op_call(no_op: &str) -> Cmd {
    Cmd::Call(CallCmd::new(no_op, vec![]))
}

/// Replace the access markers that run before `site`: those in blocks that
/// only come before it and, unless its block loops, those earlier in its
/// block. Returns the number of markers replaced.
fn disable_markers_before(imp: &mut Implementation, site: CallSite, no_op: &str) -> usize {
    let graph = Graph::block_graph(imp);
    let dev_label = imp.blocks[site.block].label.clone();
    let predecessors = graph.nested_predecessors(&dev_label);
    let successors = graph.nested_successors(&dev_label);
    let dev_block_loops = successors.contains(&dev_label);

    let mut replaced = 0;
    for (b, block) in imp.blocks.iter_mut().enumerate() {
        let strictly_before = predecessors.contains(&block.label) && !successors.contains(&block.label) && b != site.block;
        let limit = if strictly_before {
            block.cmds.len()
        } else if b == site.block && !dev_block_loops {
            site.index
        } else {
            continue;
        };
        for cmd in block.cmds.iter_mut().take(limit) {
            if cmd.as_call().is_some_and(|call| is_access_marker(&call.callee)) {
                *cmd = no_op_call(no_op);
                replaced += 1;
            }
        }
    }
    replaced
}

/// Delete the sliced functions nothing calls anymore.
fn remove_dead_regions(ctx: &mut AnalysisContext, sliced: &BTreeSet<String>) -> usize {
    let live: BTreeSet<String> =
        ctx.program.implementations.iter().flat_map(|imp| imp.callees()).map(str::to_string).collect();
    let dead: Vec<&String> = sliced.iter().filter(|name| !live.contains(*name)).collect();
    for name in &dead {
        trace!(function = %name, "removed");
        ctx.program.remove_procedure(name);
        ctx.regions.retain(|r| r.name() != name.as_str());
    }
    dead.len()
}

/// Delete the checkers that call a function that no longer exists.
fn remove_orphaned_checkers(ctx: &mut AnalysisContext) -> usize {
    let orphaned: Vec<String> = ctx
        .pair_regions
        .iter()
        .filter(|r| r.callees().iter().any(|callee| ctx.program.implementation(callee).is_none()))
        .map(|r| r.name().to_string())
        .collect();
    for name in &orphaned {
        debug!(checker = %name, "removed orphaned checker");
        ctx.program.remove_procedure(name);
        ctx.pair_regions.retain(|r| r.name() != name);
    }
    orphaned.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::call;
    use crate::passes::device_registration::tests::analysed_context;
    use crate::regions::PairCheckingRegion;
    use boogie_ast::boogie_program::{Block, Parameter, TransferCmd, Type};
    use std::collections::BTreeSet;

    fn callees(ctx: &AnalysisContext, name: &str) -> Vec<String> {
        let imp = ctx.program.implementation(name).unwrap();
        imp.calls().map(|(_, _, call)| call.callee.clone()).collect()
    }

    #[test]
    fn pre_registration_code_is_sliced() {
        let mut ctx = analysed_context();
        DeviceEnableSlicing.run(&mut ctx).unwrap();

        assert_eq!(
            callees(&ctx, "foo_probe"),
            ["_NO_OP_$foo_probe", "_NO_OP_$foo_probe", "shared", "do_register", "after", "_WRITE_LS_$M.1"]
        );
        assert_eq!(callees(&ctx, "do_register"), ["_NO_OP_$foo_probe", "_REGISTER_DEVICE_foo", "_WRITE_LS_$M.3"]);
        let no_op = ctx.program.procedure("_NO_OP_$foo_probe").unwrap();
        assert!(no_op.parameters.is_empty());
        assert!(ctx.program.implementation("_NO_OP_$foo_probe").is_none());
    }

    #[test]
    fn sliced_functions_are_removed_when_dead() {
        let mut ctx = analysed_context();
        DeviceEnableSlicing.run(&mut ctx).unwrap();
        assert!(ctx.program.implementation("setup").is_none());
        assert!(ctx.region("setup").is_none());
        assert!(ctx.program.implementation("leaf").is_none());
        assert!(ctx.program.procedure("leaf").is_none());
        for name in ["shared", "after", "late", "do_register", "foo_read"] {
            assert!(ctx.program.implementation(name).is_some(), "{name}");
        }
    }

    #[test]
    fn looping_registration_block_keeps_its_markers() {
        let mut cmds: Vec<Cmd> = crate::passes::resource_analysis::tests::marker(
            crate::ghost::AccessKind::Read,
            "$M.0",
            boogie_ast::boogie_program::Expr::symbol("p"),
        )
        .to_vec();
        cmds.push(call("_REGISTER_DEVICE_x"));
        let mut entry = crate::passes::resource_analysis::tests::marker(
            crate::ghost::AccessKind::Write,
            "$M.1",
            boogie_ast::boogie_program::Expr::symbol("p"),
        )
        .to_vec();
        entry.push(call("other"));
        let mut imp = Implementation::new(
            "f",
            vec![Parameter::new("p", Type::Int)],
            vec![
                Block::new("entry", entry, TransferCmd::Goto { labels: vec!["loop".into()] }),
                Block::new("loop", cmds, TransferCmd::Goto { labels: vec!["loop".into(), "exit".into()] }),
                Block::new("exit", vec![], TransferCmd::Return),
            ],
        );
        let replaced = disable_markers_before(&mut imp, CallSite { block: 1, index: 2 }, "_NO_OP_$x");
        assert_eq!(replaced, 1);
        assert_eq!(imp.blocks[0].cmds[0], no_op_call("_NO_OP_$x"));
        assert!(imp.blocks[0].cmds[2].is_call_with_prefix("other"));
        assert!(imp.blocks[1].cmds[0].is_call_with_prefix("_READ_LS_"));
    }

    #[test]
    fn checkers_of_removed_functions_go_away() {
        let mut ctx = analysed_context();
        crate::ghost::tests::declare_ghosts(&mut ctx.program, &["foo_read"], &[], &[]);
        let ghosts = crate::ghost::GhostRegistry::new(&ctx.program);
        let read = ctx.model.entry_point("foo_read").unwrap().clone();
        let (region, procedure, imp) =
            PairCheckingRegion::synthesize(&ctx.program, &ghosts, None, &read, &read, &BTreeSet::new()).unwrap();
        ctx.program.add_procedure(procedure);
        ctx.program.add_implementation(imp);
        ctx.pair_regions.push(region);

        assert_eq!(remove_orphaned_checkers(&mut ctx), 0);
        ctx.program.remove_procedure("foo_read");
        assert_eq!(remove_orphaned_checkers(&mut ctx), 1);
        assert!(ctx.pair_regions.is_empty());
        assert!(ctx.program.procedure("check$foo_read$foo_read").is_none());
    }
}
