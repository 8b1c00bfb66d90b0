// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Interprocedural analysis of the shared resources each function accesses.
//!
//! Every region first records the accesses its own body performs, i.e. the
//! marker calls the instrumentation placed after each shared-memory access.
//! Accesses are then pushed from callees to callers through a worklist until
//! nothing changes. An access recorded relative to a formal of the callee is
//! rewritten relative to the root pointer of the matching actual.
//!
//! Once the fixpoint is reached, the entry points learn which resources they
//! read and write and which kernel locks they take.

use super::{AnalysisPass, PassKind};
use crate::context::AnalysisContext;
use crate::ghost::AccessKind;
use crate::pointer::{access_base, compose, root_pointer};
use crate::regions::{ArgumentBinding, CallSite};
use anyhow::Result;
use boogie_ast::boogie_program::{BoogieProgram, CallCmd, Cmd, Expr, Implementation};
use driver_metadata::KernelLock;
use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, trace};

/// How often a single region may be revisited. Calls that keep shifting a
/// pointer around a recursive cycle would otherwise grow the access sets
/// forever.
const MAX_VISITS: usize = 64;

#[derive(Debug, Default)]
pub struct ResourceAnalysis {
    /// Number of region visits of the last run
    visits: usize,
}

/// The resource and access kind of the marker at `index`, if the command
/// there is a call immediately followed by a marker annotation.
pub fn access_marker(cmds: &[Cmd], index: usize) -> Option<(&str, AccessKind)> {
    cmds.get(index)?.as_call()?;
    let Cmd::Assume { attributes, .. } = cmds.get(index + 1)? else {
        return None;
    };
    if !attributes.has("captureState") {
        return None;
    }
    let resource = attributes.string("resource")?;
    let kind = attributes.string("access")?.parse().ok()?;
    Some((resource, kind))
}

impl AnalysisPass for ResourceAnalysis {
    fn kind(&self) -> PassKind {
        PassKind::ResourceAnalysis
    }

    fn run(&mut self, ctx: &mut AnalysisContext) -> Result<()> {
        for idx in 0..ctx.regions.len() {
            local_analysis(ctx, idx);
        }
        self.fixpoint(ctx);
        summarize_entry_points(ctx);
        debug!(visits = self.visits, "resource analysis");
        Ok(())
    }
}

impl ResourceAnalysis {
    fn fixpoint(&mut self, ctx: &mut AnalysisContext) {
        let n = ctx.regions.len();
        let mut callers: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (idx, region) in ctx.regions.iter().enumerate() {
            let Some(imp) = ctx.program.implementation(region.name()) else { continue };
            for callee in imp.callees() {
                if let Some(callee_idx) = ctx.region_index(callee) {
                    callers[callee_idx].push(idx);
                }
            }
        }

        let mut worklist: VecDeque<usize> = (0..n).collect();
        let mut queued = vec![true; n];
        let mut visits = vec![0; n];
        while let Some(idx) = worklist.pop_front() {
            queued[idx] = false;
            if ctx.regions[idx].is_resource_analysis_done {
                continue;
            }
            visits[idx] += 1;
            self.visits += 1;
            let before = ctx.regions[idx].access_count();
            let only_unchecked_calls = propagate(ctx, idx);
            let region = &mut ctx.regions[idx];
            let grew = region.access_count() > before;
            let done = visits[idx] >= MAX_VISITS
                || (region.access_count() == 0
                    && region.resources_with_unidentified_accesses().is_empty()
                    && only_unchecked_calls);
            if visits[idx] >= MAX_VISITS {
                debug!(region = region.name(), "visit bound reached");
            }
            if done {
                finish(ctx, idx);
            }
            if grew || done {
                for &caller in &callers[idx] {
                    if !queued[caller] && !ctx.regions[caller].is_resource_analysis_done {
                        queued[caller] = true;
                        worklist.push_back(caller);
                    }
                }
            }
        }
        for idx in 0..n {
            if !ctx.regions[idx].is_resource_analysis_done {
                finish(ctx, idx);
            }
        }
    }
}

/// Record what the body of region `idx` accesses and locks by itself.
fn local_analysis(ctx: &mut AnalysisContext, idx: usize) {
    let region = &mut ctx.regions[idx];
    if region.is_local_resource_analysis_done {
        return;
    }
    region.is_local_resource_analysis_done = true;
    let Some(imp) = ctx.program.implementation(region.name()) else { return };
    for block in &imp.blocks {
        for (index, cmd) in block.cmds.iter().enumerate() {
            let Some(call) = cmd.as_call() else { continue };
            if let Some(lock) = KernelLock::acquired_by(&call.callee) {
                region.record_acquired_lock(lock);
            }
            let Some((resource, kind)) = access_marker(&block.cmds, index) else { continue };
            let access = call.arguments.first().and_then(|arg| root_pointer(&ctx.program, imp, arg));
            if access.is_none() {
                trace!(function = %imp.name, %resource, "unidentified access");
            }
            region.try_add_resource_access(resource, access.map(|p| p.to_expr()));
            region.record_local_access(resource, kind);
        }
    }
}

/// Bind every formal of `callee` to the root pointer of the matching actual.
fn bind_arguments(
    program: &BoogieProgram,
    caller: &Implementation,
    callee: &Implementation,
    call: &CallCmd,
) -> Vec<ArgumentBinding> {
    callee
        .parameters
        .iter()
        .enumerate()
        .map(|(i, formal)| ArgumentBinding {
            actual: call.arguments.get(i).and_then(|arg| root_pointer(program, caller, arg)),
            formal: formal.name().to_string(),
        })
        .collect()
}

/// Pull the accesses of every callee of region `idx` into it. Returns whether
/// every call targets a function that can never contribute an access.
fn propagate(ctx: &mut AnalysisContext, idx: usize) -> bool {
    let program = &ctx.program;
    let region = &ctx.regions[idx];
    let Some(imp) = program.implementation(region.name()) else { return true };

    let mut only_unchecked_calls = true;
    let mut additions: Vec<(String, Option<Expr>)> = Vec::new();
    let mut new_bindings = Vec::new();
    for (block, index, call) in imp.calls() {
        if access_marker(&imp.blocks[block].cmds, index).is_some() {
            continue;
        }
        let Some(callee) = ctx.regions.iter().find(|r| r.name() == call.callee) else { continue };
        if callee.is_done_and_empty() {
            continue;
        }
        only_unchecked_calls = false;
        let Some(callee_imp) = program.implementation(&call.callee) else { continue };

        let site = CallSite { block, index };
        let bindings = match region.call_information(site) {
            Some(bindings) => bindings.to_vec(),
            None => {
                let bindings = bind_arguments(program, imp, callee_imp, call);
                new_bindings.push((site, bindings.clone()));
                bindings
            }
        };
        for (resource, accesses) in callee.resource_accesses() {
            for access in accesses {
                let Some(position) = access_base(access).and_then(|base| callee_imp.parameter_index(&base)) else {
                    continue;
                };
                let Some(binding) = bindings.get(position) else { continue };
                additions.push((resource.clone(), compose(access, &binding.formal, binding.actual.as_ref())));
            }
        }
    }

    let region = &mut ctx.regions[idx];
    for (site, bindings) in new_bindings {
        region.cache_call_information(site, bindings);
    }
    for (resource, access) in additions {
        region.try_add_resource_access(&resource, access);
    }
    only_unchecked_calls
}

/// Mark region `idx` done and drop the ghost modifies entries of resources it
/// can no longer touch.
fn finish(ctx: &mut AnalysisContext, idx: usize) {
    let region = &mut ctx.regions[idx];
    region.is_resource_analysis_done = true;
    let region = &ctx.regions[idx];
    let name = region.name().to_string();
    let resources = region.resources();

    let callee_modifies: BTreeSet<&str> = ctx
        .program
        .implementation(&name)
        .map(|imp| imp.callees())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|callee| ctx.program.procedure(callee))
        .flat_map(|proc| proc.contract.modifies.iter().map(String::as_str))
        .collect();
    let removable: Vec<String> = ctx
        .program
        .procedure(&name)
        .map(|proc| proc.contract.modifies.as_slice())
        .unwrap_or_default()
        .iter()
        .filter(|var| {
            ctx.ghosts
                .resource_of(var)
                .is_some_and(|res| !resources.contains(res) && !callee_modifies.contains(var.as_str()))
        })
        .cloned()
        .collect();
    if removable.is_empty() {
        return;
    }
    trace!(function = %name, ?removable, "strip modifies");
    if let Some(proc) = ctx.program.procedure_mut(&name) {
        proc.contract.modifies.retain(|var| !removable.contains(var));
    }
}

/// Fill the access sets and lock flags of every entry point from the regions
/// its function reaches.
fn summarize_entry_points(ctx: &mut AnalysisContext) {
    let functions: Vec<(String, String)> =
        ctx.model.entry_points().iter().map(|ep| (ep.name.clone(), ep.function_name().to_string())).collect();
    for (ep_name, function) in functions {
        let reachable = ctx.reachable_from(&function);
        let mut reads = BTreeSet::new();
        let mut writes = BTreeSet::new();
        let mut locks = BTreeSet::new();
        for region in ctx.regions.iter().filter(|r| reachable.contains(r.name())) {
            for (resource, kinds) in region.local_access_kinds() {
                if kinds.contains(&AccessKind::Read) {
                    reads.insert(resource.clone());
                }
                if kinds.contains(&AccessKind::Write) {
                    writes.insert(resource.clone());
                }
            }
            locks.extend(region.acquired_locks().iter().copied());
        }
        let Some(ep) = ctx.model.entry_point_mut(&ep_name) else { continue };
        debug!(ep = %ep.name, reads = reads.len(), writes = writes.len(), ?locks, "entry point summary");
        ep.read_accesses.extend(reads);
        ep.write_accesses.extend(writes);
        for lock in locks {
            if !ep.calls_locks.contains(&lock) {
                ep.calls_locks.push(lock);
            }
        }
    }
}
