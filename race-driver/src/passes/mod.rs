// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The analysis passes, run in order over one [`AnalysisContext`].

use crate::args::AnalysisArgs;
use crate::context::AnalysisContext;
use anyhow::Result;
use std::fmt::Debug;
use strum_macros::AsRefStr;
use tracing::{debug, debug_span};

mod device_registration;
mod pair_instrumentation;
mod region_constructor;
mod resource_analysis;
mod shared_state;
mod slicing;

pub use device_registration::DeviceRegistrationAnalysis;
pub use pair_instrumentation::PairInstrumentation;
pub use region_constructor::RegionConstructor;
pub use resource_analysis::ResourceAnalysis;
pub use shared_state::SharedStateAbstraction;
pub use slicing::DeviceEnableSlicing;

/// The kind of work a pass does. Used to name the pass in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum PassKind {
    RegionConstruction,
    SharedStateAbstraction,
    ResourceAnalysis,
    PairInstrumentation,
    DeviceRegistration,
    Slicing,
}

pub trait AnalysisPass: Debug {
    fn kind(&self) -> PassKind;

    fn is_enabled(&self, _args: &AnalysisArgs) -> bool {
        true
    }

    fn run(&mut self, ctx: &mut AnalysisContext) -> Result<()>;
}

/// The passes that turn an instrumented program into checking units.
pub fn default_pipeline() -> Vec<Box<dyn AnalysisPass>> {
    vec![
        Box::new(RegionConstructor),
        Box::new(SharedStateAbstraction),
        Box::new(ResourceAnalysis::default()),
        Box::new(PairInstrumentation),
        Box::new(DeviceRegistrationAnalysis),
        Box::new(DeviceEnableSlicing),
    ]
}

/// Run every enabled pass in order.
pub fn run_passes(passes: &mut [Box<dyn AnalysisPass>], ctx: &mut AnalysisContext, args: &AnalysisArgs) -> Result<()> {
    for pass in passes.iter_mut() {
        let kind = pass.kind();
        if !pass.is_enabled(args) {
            debug!(pass = kind.as_ref(), "skipped");
            continue;
        }
        let _guard = debug_span!("pass", name = kind.as_ref()).entered();
        pass.run(ctx)?;
        debug!(regions = ctx.regions.len(), pairs = ctx.pair_regions.len(), "done");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use boogie_ast::boogie_program::BoogieProgram;
    use driver_metadata::DriverModel;

    #[derive(Debug)]
    struct Counting(usize);

    impl AnalysisPass for Counting {
        fn kind(&self) -> PassKind {
            PassKind::Slicing
        }

        fn is_enabled(&self, args: &AnalysisArgs) -> bool {
            !args.no_slicing
        }

        fn run(&mut self, _ctx: &mut AnalysisContext) -> Result<()> {
            self.0 += 1;
            Ok(())
        }
    }

    #[test]
    fn disabled_passes_are_skipped() {
        let model = DriverModel::from_info_str("").unwrap();
        let mut ctx = AnalysisContext::new(BoogieProgram::new(), model);
        let mut passes: Vec<Box<dyn AnalysisPass>> = vec![Box::new(Counting(0))];
        run_passes(&mut passes, &mut ctx, &AnalysisArgs::default()).unwrap();
        run_passes(&mut passes, &mut ctx, &AnalysisArgs { no_slicing: true, ..Default::default() }).unwrap();
        assert_eq!(format!("{:?}", passes[0]), "Counting(1)");
    }

    #[test]
    fn pass_names() {
        assert_eq!(PassKind::SharedStateAbstraction.as_ref(), "shared_state_abstraction");
        assert_eq!(default_pipeline().len(), 6);
    }
}
