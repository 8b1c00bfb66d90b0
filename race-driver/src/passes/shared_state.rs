// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Erase the values flowing through shared memory. Reads of a shared map cell
//! become `havoc`; writes to one are dropped. Accesses stay visible through
//! the access markers.

use super::{AnalysisPass, PassKind};
use crate::context::AnalysisContext;
use anyhow::Result;
use boogie_ast::boogie_program::{AssignTarget, Cmd, Expr, Implementation};
use tracing::{debug, trace};

/// Fragment that identifies the maps modelling shared memory.
const SHARED_MAP_FRAGMENT: &str = "$M.";

#[derive(Debug)]
pub struct SharedStateAbstraction;

impl AnalysisPass for SharedStateAbstraction {
    fn kind(&self) -> PassKind {
        PassKind::SharedStateAbstraction
    }

    fn run(&mut self, ctx: &mut AnalysisContext) -> Result<()> {
        let reachable = ctx.reachable_from_roots();
        let targets: Vec<String> =
            ctx.regions.iter().map(|r| r.name().to_string()).filter(|name| reachable.contains(name)).collect();
        let mut abstracted = 0;
        for name in &targets {
            if let Some(imp) = ctx.program.implementation_mut(name) {
                abstracted += abstract_implementation(imp);
            }
        }
        debug!(functions = targets.len(), abstracted, "abstracted shared state");
        Ok(())
    }
}

fn is_shared_map(name: &str) -> bool {
    name.contains(SHARED_MAP_FRAGMENT)
}

/// `x := $M.n[i]`
fn is_shared_read(cmd: &Cmd) -> Option<&str> {
    let Cmd::Assignment { target: AssignTarget::Variable { name }, value: Expr::Select { map, indexes } } = cmd else {
        return None;
    };
    let map = map.as_symbol()?;
    (is_shared_map(map) && indexes.len() == 1).then_some(name.as_str())
}

/// `$M.n[i] := e`
fn is_shared_write(cmd: &Cmd) -> bool {
    matches!(
        cmd,
        Cmd::Assignment { target: AssignTarget::MapCell { map, indexes }, .. }
            if is_shared_map(map) && indexes.len() == 1
    )
}

/// Rewrite one body. Returns the number of commands changed.
fn abstract_implementation(imp: &mut Implementation) -> usize {
    let mut changed = 0;
    for block in imp.blocks.iter_mut() {
        for cmd in block.cmds.iter_mut() {
            if let Some(target) = is_shared_read(cmd).map(str::to_string) {
                trace!(function = %imp.name, %target, "havoc shared read");
                *cmd = Cmd::havoc(vec![target]);
                changed += 1;
            }
        }
        let before = block.cmds.len();
        block.cmds.retain(|cmd| !is_shared_write(cmd));
        changed += before - block.cmds.len();
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::{call, function};
    use crate::passes::RegionConstructor;
    use boogie_ast::boogie_program::BoogieProgram;
    use driver_metadata::DriverModel;

    fn read(target: &str, map: &str) -> Cmd {
        Cmd::assign(target, Expr::select(Expr::symbol(map), vec![Expr::symbol("p")]))
    }

    fn write(map: &str) -> Cmd {
        Cmd::Assignment {
            target: AssignTarget::MapCell { map: map.into(), indexes: vec![Expr::symbol("p")] },
            value: Expr::int(1),
        }
    }

    #[test]
    fn shared_cells_are_erased() {
        let mut imp = function("foo_open", vec![read("x", "$M.0"), read("y", "local_map"), write("$M.1"), write("other")]);
        assert_eq!(abstract_implementation(&mut imp), 2);
        let cmds = &imp.blocks[0].cmds;
        assert_eq!(cmds.len(), 3);
        assert_eq!(cmds[0], Cmd::havoc(vec!["x".into()]));
        assert_eq!(cmds[1], read("y", "local_map"));
        assert_eq!(cmds[2], write("other"));
    }

    #[test]
    fn multi_index_cells_are_kept() {
        let two = Cmd::assign("x", Expr::select(Expr::symbol("$M.0"), vec![Expr::symbol("p"), Expr::int(0)]));
        let nested = Cmd::assign("x", Expr::select(Expr::symbol("$M.0"), vec![Expr::symbol("p")]).plus(Expr::int(1)));
        let mut imp = function("f", vec![two.clone(), nested.clone()]);
        assert_eq!(abstract_implementation(&mut imp), 0);
        assert_eq!(imp.blocks[0].cmds, [two, nested]);
    }

    #[test]
    fn only_reachable_bodies_are_rewritten() {
        let model = DriverModel::from_info_str("<file_operations>\nopen::foo_open\n</>\n").unwrap();
        let mut program = BoogieProgram::new();
        program.add_implementation(function("foo_open", vec![call("helper"), read("x", "$M.0")]));
        program.add_implementation(function("helper", vec![write("$M.0")]));
        program.add_implementation(function("dead", vec![write("$M.0")]));
        let mut ctx = AnalysisContext::new(program, model);
        RegionConstructor.run(&mut ctx).unwrap();
        SharedStateAbstraction.run(&mut ctx).unwrap();

        let shared_access = |name: &str| {
            ctx.program.implementation(name).unwrap().blocks[0].cmds.iter().any(|c| is_shared_read(c).is_some() || is_shared_write(c))
        };
        assert!(!shared_access("foo_open"));
        assert!(!shared_access("helper"));
        assert!(shared_access("dead"));
    }
}
