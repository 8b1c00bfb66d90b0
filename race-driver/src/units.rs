// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Split the analysed program into one self-contained Boogie file per
//! checker.

use crate::context::AnalysisContext;
use crate::regions::PairCheckingRegion;
use crate::session::RaceSession;
use crate::util::unit_file_name;
use anyhow::{Context, Result};
use boogie_ast::boogie_program::{AssertionSite, BoogieProgram};
use driver_metadata::EntryPointPair;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A Boogie file that checks one pair of entry points.
#[derive(Debug, Clone)]
pub struct CheckingUnit {
    pub checker: String,
    pub pair: EntryPointPair,
    pub path: PathBuf,
    /// Every assertion in the file, with the line it is on
    pub assertions: Vec<AssertionSite>,
}

/// The program seen by `checker`: all global declarations, every procedure
/// except the other checkers, and the bodies the checker can reach.
pub fn unit_program(ctx: &AnalysisContext, checker: &PairCheckingRegion) -> BoogieProgram {
    let others: BTreeSet<&str> =
        ctx.pair_regions.iter().map(|r| r.name()).filter(|name| *name != checker.name()).collect();
    let reachable = ctx.reachable_from(checker.name());
    let program = &ctx.program;
    BoogieProgram {
        type_declarations: program.type_declarations.clone(),
        constants: program.constants.clone(),
        variables: program.variables.clone(),
        axioms: program.axioms.clone(),
        functions: program.functions.clone(),
        procedures: program.procedures.iter().filter(|p| !others.contains(p.name.as_str())).cloned().collect(),
        implementations: program
            .implementations
            .iter()
            .filter(|imp| reachable.contains(&imp.name) && !others.contains(imp.name.as_str()))
            .cloned()
            .collect(),
    }
}

/// Write the unit for `checker` into `dir`.
pub fn write_unit(dir: &Path, driver: &str, ctx: &AnalysisContext, checker: &PairCheckingRegion) -> Result<CheckingUnit> {
    let path = dir.join(unit_file_name(driver, checker.name()));
    let program = unit_program(ctx, checker);
    let file = File::create(&path).with_context(|| format!("Failed to create `{}`", path.display()))?;
    let mut writer = BufWriter::new(file);
    let assertions = program.write_to(&mut writer).and_then(|assertions| {
        writer.flush()?;
        Ok(assertions)
    });
    let assertions = assertions.with_context(|| format!("Failed to write `{}`", path.display()))?;
    debug!(unit = %path.display(), implementations = program.implementations.len(), "wrote checking unit");
    Ok(CheckingUnit { checker: checker.name().to_string(), pair: checker.pair().clone(), path, assertions })
}

impl RaceSession {
    /// Write every checking unit to the output directory. The units are
    /// temporaries when they are only produced for the verifier.
    pub fn write_units(&self, ctx: &AnalysisContext) -> Result<Vec<CheckingUnit>> {
        let dir = self.output_dir();
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create `{}`", dir.display()))?;
        }
        let driver = self.driver_name();
        let mut units = Vec::with_capacity(ctx.pair_regions.len());
        for checker in &ctx.pair_regions {
            let unit = write_unit(&dir, &driver, ctx, checker)?;
            if self.args.verify {
                self.record_temporary(&unit.path);
            }
            units.push(unit);
        }
        self.info_operation("Wrote", &format!("{} checking units to {}", units.len(), dir.display()));
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::{call, function};
    use crate::ghost::tests::declare_ghosts;
    use crate::passes::{PairInstrumentation, RegionConstructor, ResourceAnalysis};
    use crate::passes::AnalysisPass;
    use boogie_ast::boogie_program::{BoogieProgram, Procedure};
    use driver_metadata::DriverModel;

    const DRIVER: &str = "<file_operations>\nread::foo_read\nwrite::foo_write\n</>\n";

    fn context() -> AnalysisContext {
        let mut program = BoogieProgram::new();
        declare_ghosts(&mut program, &["foo_read", "foo_write"], &["$M.0"], &[]);
        program.add_procedure(Procedure::new("helper", vec![]));
        program.add_implementation(function("foo_read", vec![call("helper")]));
        program.add_implementation(function("foo_write", vec![]));
        program.add_implementation(function("helper", vec![]));
        program.add_implementation(function("unused", vec![]));
        let mut ctx = AnalysisContext::new(program, DriverModel::from_info_str(DRIVER).unwrap());
        RegionConstructor.run(&mut ctx).unwrap();
        ResourceAnalysis::default().run(&mut ctx).unwrap();
        PairInstrumentation.run(&mut ctx).unwrap();
        ctx
    }

    #[test]
    fn unit_contains_what_the_checker_reaches() {
        let ctx = context();
        let checker = ctx.pair_region("check$foo_read$foo_write").unwrap();
        let unit = unit_program(&ctx, checker);
        let bodies: Vec<&str> = unit.implementations.iter().map(|imp| imp.name.as_str()).collect();
        assert_eq!(bodies, ["foo_read", "foo_write", "helper", "check$foo_read$foo_write"]);
        assert!(unit.procedure("helper").is_some());
        assert!(unit.procedure("check$foo_read$foo_write").is_some());
        assert!(unit.procedure("check$foo_read$foo_read").is_none());
        assert_eq!(unit.variables, ctx.program.variables);
    }

    #[test]
    fn units_are_written_per_checker() {
        let ctx = context();
        let dir = tempfile::tempdir().unwrap();
        for checker in &ctx.pair_regions {
            let unit = write_unit(dir.path(), "foo", &ctx, checker).unwrap();
            assert_eq!(unit.path, dir.path().join(format!("foo.{}.bpl", checker.name())));
            let text = std::fs::read_to_string(&unit.path).unwrap();
            assert!(text.contains(&format!("implementation {{:checker}} {}", checker.name())), "{text}");
            assert!(!text.contains("unused"));
        }
    }
}
