// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Symbolic pointers of the form `base + offset`.
//!
//! Only linear arithmetic over literal offsets is understood. The base must
//! be something both sides of a call agree on: a formal parameter, a global,
//! or nothing at all (an absolute address). Locals are followed back to their
//! unique definition. Anything else has no root pointer.

use boogie_ast::boogie_program::{AssignTarget, BinaryOp, BoogieProgram, Cmd, Expr, Implementation};
use num_bigint::BigInt;
use std::fmt;

/// Bound on how many local definitions are followed.
const MAX_DEPTH: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PointerExpr {
    /// `None` for an absolute address
    pub base: Option<String>,
    pub offset: BigInt,
}

impl PointerExpr {
    pub fn symbol(name: impl Into<String>) -> Self {
        PointerExpr { base: Some(name.into()), offset: BigInt::from(0) }
    }

    pub fn constant(value: BigInt) -> Self {
        PointerExpr { base: None, offset: value }
    }

    pub fn offset_by(mut self, delta: &BigInt) -> Self {
        self.offset += delta;
        self
    }

    pub fn is_constant(&self) -> bool {
        self.base.is_none()
    }

    /// The canonical expression: `b`, `(b + n)` or `n`.
    pub fn to_expr(&self) -> Expr {
        match &self.base {
            None => Expr::int(self.offset.clone()),
            Some(base) if self.offset == BigInt::from(0) => Expr::symbol(base),
            Some(base) => Expr::symbol(base).plus(Expr::int(self.offset.clone())),
        }
    }

    /// Read back an expression in the canonical form.
    pub fn from_expr(expr: &Expr) -> Option<Self> {
        match expr {
            Expr::Symbol { name } => Some(PointerExpr::symbol(name)),
            Expr::Literal(_) => expr.as_int().map(|v| PointerExpr::constant(v.clone())),
            Expr::BinaryOp { op: BinaryOp::Add, left, right } => {
                let base = left.as_symbol()?;
                let offset = right.as_int()?;
                Some(PointerExpr { base: Some(base.to_string()), offset: offset.clone() })
            }
            _ => None,
        }
    }

    fn add(self, other: PointerExpr) -> Option<PointerExpr> {
        match (&self.base, &other.base) {
            (Some(_), Some(_)) => None,
            (_, None) => Some(self.offset_by(&other.offset)),
            (None, Some(_)) => Some(other.offset_by(&self.offset)),
        }
    }

    fn sub(self, other: PointerExpr) -> Option<PointerExpr> {
        if !other.is_constant() {
            return None;
        }
        let delta = -other.offset;
        Some(self.offset_by(&delta))
    }

    fn mul(self, other: PointerExpr) -> Option<PointerExpr> {
        if !self.is_constant() || !other.is_constant() {
            return None;
        }
        Some(PointerExpr::constant(self.offset * other.offset))
    }
}

impl fmt::Display for PointerExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_expr())
    }
}

/// Arithmetic the front end spells as function applications, e.g.
/// `$add.ref(p, 4)` or `$bitcast.ref.ref(p)`.
enum Arithmetic {
    Add,
    Sub,
    Mul,
    Cast,
}

fn arithmetic(symbol: &str) -> Option<Arithmetic> {
    let op = symbol.split('.').next()?;
    match op {
        "$add" => Some(Arithmetic::Add),
        "$sub" => Some(Arithmetic::Sub),
        "$mul" => Some(Arithmetic::Mul),
        "$bitcast" | "$p2i" | "$i2p" | "$zext" | "$sext" => Some(Arithmetic::Cast),
        _ => None,
    }
}

/// Whether `name` denotes the same location in every procedure.
fn is_global(program: &BoogieProgram, name: &str) -> bool {
    program.variable(name).is_some() || program.constants.iter().any(|c| c.name == name)
}

/// The right-hand side of the only assignment to local `name`, if it is
/// assigned exactly once and never havocked or used as a call output.
fn unique_definition<'a>(imp: &'a Implementation, name: &str) -> Option<&'a Expr> {
    let mut definition = None;
    for cmd in imp.blocks.iter().flat_map(|b| b.cmds.iter()) {
        match cmd {
            Cmd::Assignment { target: AssignTarget::Variable { name: target }, value } if target == name => {
                if definition.is_some() {
                    return None;
                }
                definition = Some(value);
            }
            Cmd::Havoc { variables } if variables.iter().any(|v| v == name) => return None,
            Cmd::Call(call) if call.outputs.iter().any(|o| o == name) => return None,
            _ => {}
        }
    }
    definition
}

/// Compute the root pointer of `expr` as it appears in `imp`.
pub fn root_pointer(program: &BoogieProgram, imp: &Implementation, expr: &Expr) -> Option<PointerExpr> {
    resolve(program, imp, expr, 0)
}

fn resolve(program: &BoogieProgram, imp: &Implementation, expr: &Expr, depth: usize) -> Option<PointerExpr> {
    if depth > MAX_DEPTH {
        return None;
    }
    let operand = |e: &Expr| resolve(program, imp, e, depth + 1);
    match expr {
        Expr::Literal(_) => expr.as_int().map(|v| PointerExpr::constant(v.clone())),
        Expr::Symbol { name } => {
            if imp.parameter_index(name).is_some() || is_global(program, name) {
                Some(PointerExpr::symbol(name))
            } else if imp.is_local(name) {
                operand(unique_definition(imp, name)?)
            } else {
                None
            }
        }
        Expr::BinaryOp { op: BinaryOp::Add, left, right } => operand(left)?.add(operand(right)?),
        Expr::BinaryOp { op: BinaryOp::Sub, left, right } => operand(left)?.sub(operand(right)?),
        Expr::BinaryOp { op: BinaryOp::Mul, left, right } => operand(left)?.mul(operand(right)?),
        Expr::FunctionCall { symbol, arguments } => match (arithmetic(symbol)?, arguments.as_slice()) {
            (Arithmetic::Add, [l, r]) => operand(l)?.add(operand(r)?),
            (Arithmetic::Sub, [l, r]) => operand(l)?.sub(operand(r)?),
            (Arithmetic::Mul, [l, r]) => operand(l)?.mul(operand(r)?),
            (Arithmetic::Cast, [e]) => operand(e),
            _ => None,
        },
        _ => None,
    }
}

/// The symbol an access expression is relative to.
pub fn access_base(access: &Expr) -> Option<String> {
    PointerExpr::from_expr(access).and_then(|p| p.base)
}

/// Translate `access`, recorded in a callee relative to its formal `formal`,
/// into the frame of a caller that binds the formal to `actual`.
///
/// A callee access `f + r` through an actual `x + l` becomes `x + (l + r)`.
/// No result is produced for any other shape, including an actual with no
/// root pointer.
pub fn compose(access: &Expr, formal: &str, actual: Option<&PointerExpr>) -> Option<Expr> {
    let access = PointerExpr::from_expr(access)?;
    if access.base.as_deref() != Some(formal) {
        return None;
    }
    Some(actual?.clone().offset_by(&access.offset).to_expr())
}

#[cfg(test)]
mod tests {
    use super::*;
    use boogie_ast::boogie_program::{Block, GlobalVariable, Parameter, TransferCmd, Type};

    fn imp(cmds: Vec<Cmd>) -> Implementation {
        let mut imp = Implementation::new(
            "foo",
            vec![Parameter::new("dev", Type::Int), Parameter::new("n", Type::Int)],
            vec![Block::new("$bb0", cmds, TransferCmd::Return)],
        );
        imp.locals = ["$p0", "$p1", "$p2", "$i3"].iter().map(|l| Parameter::new(*l, Type::Int)).collect();
        imp
    }

    fn program() -> BoogieProgram {
        let mut program = BoogieProgram::new();
        program.add_variable(GlobalVariable::new("global_dev", Type::Int, Default::default()));
        program
    }

    fn add_ref(l: Expr, r: Expr) -> Expr {
        Expr::function_call("$add.ref", vec![l, r])
    }

    #[test]
    fn follows_unique_definitions() {
        let imp = imp(vec![
            Cmd::assign("$p0", add_ref(Expr::symbol("dev"), Expr::int(4))),
            Cmd::assign("$p1", add_ref(Expr::symbol("$p0"), Expr::function_call("$mul.ref", vec![Expr::int(2), Expr::int(4)]))),
            Cmd::assign("$p2", Expr::function_call("$bitcast.ref.ref", vec![Expr::symbol("$p1")])),
        ]);
        let root = root_pointer(&program(), &imp, &Expr::symbol("$p2")).unwrap();
        assert_eq!(root, PointerExpr::symbol("dev").offset_by(&BigInt::from(12)));
        assert_eq!(root.to_expr().to_string(), "(dev + 12)");
    }

    #[test]
    fn globals_and_constants() {
        let imp = imp(vec![]);
        let program = program();
        assert_eq!(root_pointer(&program, &imp, &Expr::symbol("global_dev")), Some(PointerExpr::symbol("global_dev")));
        let absolute = Expr::int(16).plus(Expr::int(4));
        assert_eq!(root_pointer(&program, &imp, &absolute), Some(PointerExpr::constant(BigInt::from(20))));
        assert_eq!(PointerExpr::constant(BigInt::from(20)).to_expr().to_string(), "20");
    }

    #[test]
    fn opaque_pointers() {
        let imp = imp(vec![
            Cmd::assign("$p0", Expr::symbol("dev")),
            Cmd::assign("$p0", Expr::symbol("n")),
            Cmd::havoc(vec!["$p1".into()]),
            Cmd::assign("$p1", Expr::symbol("dev")),
            Cmd::assign("$i3", Expr::symbol("$i3").plus(Expr::int(1))),
        ]);
        let program = program();
        // Two definitions
        assert_eq!(root_pointer(&program, &imp, &Expr::symbol("$p0")), None);
        // Havocked
        assert_eq!(root_pointer(&program, &imp, &Expr::symbol("$p1")), None);
        // Self-referential
        assert_eq!(root_pointer(&program, &imp, &Expr::symbol("$i3")), None);
        // Two symbolic bases
        assert_eq!(root_pointer(&program, &imp, &add_ref(Expr::symbol("dev"), Expr::symbol("n"))), None);
        // Unknown symbol
        assert_eq!(root_pointer(&program, &imp, &Expr::symbol("elsewhere")), None);
        // Not linear
        let select = Expr::select(Expr::symbol("$M.0"), vec![Expr::symbol("dev")]);
        assert_eq!(root_pointer(&program, &imp, &select), None);
    }

    #[test]
    fn affine_composition() {
        let access = Expr::symbol("f").plus(Expr::int(3));
        let actual = PointerExpr::symbol("x").offset_by(&BigInt::from(5));
        assert_eq!(compose(&access, "f", Some(&actual)).unwrap().to_string(), "(x + 8)");

        let bare = Expr::symbol("f");
        assert_eq!(compose(&bare, "f", Some(&actual)).unwrap().to_string(), "(x + 5)");
        assert_eq!(compose(&access, "f", Some(&PointerExpr::symbol("devptr"))).unwrap().to_string(), "(devptr + 3)");

        // Unresolved actual, other formal, non-affine access
        assert_eq!(compose(&access, "f", None), None);
        assert_eq!(compose(&access, "g", Some(&actual)), None);
        let scaled = Expr::binary_op(BinaryOp::Mul, Expr::symbol("f"), Expr::int(3));
        assert_eq!(compose(&scaled, "f", Some(&actual)), None);
    }

    #[test]
    fn access_bases() {
        assert_eq!(access_base(&Expr::symbol("f").plus(Expr::int(3))), Some("f".to_string()));
        assert_eq!(access_base(&Expr::symbol("f")), Some("f".to_string()));
        assert_eq!(access_base(&Expr::int(3)), None);
    }
}
