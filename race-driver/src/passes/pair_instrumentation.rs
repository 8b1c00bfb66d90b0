// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use super::{AnalysisPass, PassKind};
use crate::context::AnalysisContext;
use crate::regions::{MemoryRegionOracle, PairCheckingRegion};
use anyhow::Result;
use boogie_ast::boogie_program::{Attributes, Constant, Type};
use tracing::{debug, warn};

/// Constant standing for the device structure once an init entry point takes
/// part in a checker.
const DEVICE_STRUCT: &str = "device$struct";

/// Add one checker procedure per entry point pair.
#[derive(Debug)]
pub struct PairInstrumentation;

impl AnalysisPass for PairInstrumentation {
    fn kind(&self) -> PassKind {
        PassKind::PairInstrumentation
    }

    fn run(&mut self, ctx: &mut AnalysisContext) -> Result<()> {
        let harness = ctx.harness();
        let mut synthesized = Vec::new();
        for pair in ctx.model.pairs() {
            let (Some(ep1), Some(ep2)) = (ctx.model.entry_point(&pair.ep1), ctx.model.entry_point(&pair.ep2)) else {
                continue;
            };
            let resources = ctx.model.pair_regions(ep1, ep2);
            match PairCheckingRegion::synthesize(&ctx.program, &ctx.ghosts, harness, ep1, ep2, &resources) {
                Ok(checker) => synthesized.push(checker),
                Err(error) => warn!(ep1 = %pair.ep1, ep2 = %pair.ep2, "skipping pair: {error:#}"),
            }
        }

        for (region, procedure, implementation) in synthesized {
            debug!(checker = region.name(), checks = region.checks().len(), "synthesized");
            if region.involves_init() && !ctx.program.constants.iter().any(|c| c.name == DEVICE_STRUCT) {
                ctx.program.constants.push(Constant {
                    name: DEVICE_STRUCT.to_string(),
                    typ: Type::Int,
                    unique: true,
                    attributes: Attributes::new(),
                });
            }
            ctx.program.add_procedure(procedure);
            ctx.program.add_implementation(implementation);
            ctx.pair_regions.push(region);
        }
        Ok(())
    }
}
