// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use super::{AnalysisPass, PassKind};
use crate::context::{AnalysisContext, needs_region};
use crate::regions::InstrumentationRegion;
use anyhow::Result;
use tracing::debug;

/// Build one region per analysed function body.
#[derive(Debug)]
pub struct RegionConstructor;

impl AnalysisPass for RegionConstructor {
    fn kind(&self) -> PassKind {
        PassKind::RegionConstruction
    }

    fn run(&mut self, ctx: &mut AnalysisContext) -> Result<()> {
        ctx.regions = ctx
            .program
            .implementations
            .iter()
            .filter(|imp| needs_region(imp))
            .map(|imp| InstrumentationRegion::new(&imp.name))
            .collect();
        debug!(regions = ctx.regions.len(), "constructed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::function;
    use boogie_ast::boogie_program::BoogieProgram;
    use driver_metadata::DriverModel;

    #[test]
    fn skips_helpers() {
        let mut program = BoogieProgram::new();
        for name in ["foo_open", "_WRITE_LS_$M.0", "helper", "check$foo_open$foo_open", "mutex_lock"] {
            program.add_implementation(function(name, vec![]));
        }
        let mut ctx = AnalysisContext::new(program, DriverModel::from_info_str("").unwrap());
        RegionConstructor.run(&mut ctx).unwrap();
        let names: Vec<&str> = ctx.regions.iter().map(InstrumentationRegion::name).collect();
        assert_eq!(names, ["foo_open", "helper"]);
    }
}
