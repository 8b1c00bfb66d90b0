// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Find where the init entry point makes the device visible to the kernel.
//!
//! The region that directly calls a `_REGISTER_DEVICE_` helper changes the
//! registration state. Code that runs after that point, or that any other
//! entry point can run, executes while the device is registered. Everything
//! else in the init call graph runs before any other entry point can start.

use super::{AnalysisPass, PassKind};
use crate::args::AnalysisArgs;
use crate::context::{AnalysisContext, REGISTER_DEVICE_PREFIX};
use crate::regions::CallSite;
use anyhow::Result;
use boogie_ast::boogie_program::{Graph, Implementation};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// The part of the call graph the init entry point runs, arranged around the
/// region that registers the device.
#[derive(Debug, Clone)]
pub(crate) struct InitGraph {
    pub init_ep: String,
    /// Regions reachable from the init entry point function
    pub regions: BTreeSet<String>,
    pub changing: String,
    /// Regions that reach the changing region but are not reached from it
    pub predecessors: BTreeSet<String>,
}

impl InitGraph {
    /// Build the layout around the region flagged as changing the device
    /// registration. `None` if there is no init entry point or no such region.
    pub fn new(ctx: &AnalysisContext) -> Option<InitGraph> {
        let changing = ctx.regions.iter().find(|r| r.is_changing_device_registration)?.name().to_string();
        let init = ctx.model.init_entry_point()?;
        let regions: BTreeSet<String> = ctx
            .reachable_from(init.function_name())
            .into_iter()
            .filter(|name| ctx.region(name).is_some())
            .collect();
        let call_graph = ctx.program.call_graph();
        let successors = call_graph.nested_successors(&changing);
        let predecessors = call_graph
            .nested_predecessors(&changing)
            .into_iter()
            .filter(|name| regions.contains(name) && !successors.contains(name) && *name != changing)
            .collect();
        Some(InitGraph { init_ep: init.name.clone(), regions, changing, predecessors })
    }

    /// The call in `imp` through which the device gets registered: the
    /// registration helper itself in the changing region, otherwise the first
    /// call towards the changing region.
    pub fn registration_site(&self, imp: &Implementation) -> Option<CallSite> {
        let is_dev_call = |callee: &str| {
            if imp.name == self.changing {
                callee.starts_with(REGISTER_DEVICE_PREFIX)
            } else {
                callee == self.changing || self.predecessors.contains(callee)
            }
        };
        imp.calls().find(|(_, _, call)| is_dev_call(&call.callee)).map(|(block, index, _)| CallSite { block, index })
    }
}

/// Functions `imp` calls after `site`, in the same block or in a block that
/// can follow it.
pub(crate) fn callees_after(imp: &Implementation, site: CallSite) -> BTreeSet<String> {
    let graph = Graph::block_graph(imp);
    let later_blocks = graph.nested_successors(&imp.blocks[site.block].label);
    imp.calls()
        .filter(|(block, index, _)| {
            (*block == site.block && *index > site.index) || later_blocks.contains(&imp.blocks[*block].label)
        })
        .map(|(_, _, call)| call.callee.clone())
        .collect()
}

#[derive(Debug)]
pub struct DeviceRegistrationAnalysis;

impl AnalysisPass for DeviceRegistrationAnalysis {
    fn kind(&self) -> PassKind {
        PassKind::DeviceRegistration
    }

    fn is_enabled(&self, args: &AnalysisArgs) -> bool {
        !args.no_slicing
    }

    fn run(&mut self, ctx: &mut AnalysisContext) -> Result<()> {
        let Some(init) = ctx.model.init_entry_point() else {
            debug!("no init entry point");
            return Ok(());
        };
        let init_reachable = ctx.reachable_from(init.function_name());
        let candidates: Vec<String> = ctx
            .regions
            .iter()
            .map(|r| r.name())
            .filter(|name| init_reachable.contains(*name))
            .filter(|name| {
                ctx.program
                    .implementation(name)
                    .is_some_and(|imp| imp.callees().iter().any(|c| c.starts_with(REGISTER_DEVICE_PREFIX)))
            })
            .map(str::to_string)
            .collect();
        let Some(changing) = candidates.first() else {
            debug!("device is never registered");
            return Ok(());
        };
        if candidates.len() > 1 {
            warn!(?candidates, "several functions register the device, using `{changing}`");
        }
        if let Some(region) = ctx.region_mut(changing) {
            region.is_changing_device_registration = true;
        }
        let Some(graph) = InitGraph::new(ctx) else { return Ok(()) };

        let mut registered = BTreeSet::new();
        for ep in ctx.model.entry_points().iter().filter(|ep| !ep.is_init) {
            registered.extend(ctx.reachable_from(ep.function_name()));
        }
        let layout_regions = std::iter::once(&graph.changing).chain(graph.predecessors.iter());
        for name in layout_regions {
            let Some(imp) = ctx.program.implementation(name) else { continue };
            let Some(site) = graph.registration_site(imp) else { continue };
            for callee in callees_after(imp, site) {
                registered.extend(ctx.reachable_from(&callee));
            }
        }

        let mut count = 0;
        for region in ctx.regions.iter_mut().filter(|r| registered.contains(r.name())) {
            region.is_device_registered = true;
            count += 1;
        }
        debug!(changing = %graph.changing, predecessors = graph.predecessors.len(), registered = count, "device registration");
        Ok(())
    }
}
