// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A module that defines the AST of an unstructured Boogie program and
//! provides methods for creating, querying and rewriting nodes of the AST.
//!
//! Implementations are lists of labelled basic blocks. Every block holds a
//! sequence of simple commands and ends with a transfer command (`goto` or
//! `return`), which matches what the SMACK front-end emits for device drivers.

mod attributes;
mod graph;
mod writer;

pub use attributes::{AttrValue, Attribute, Attributes};
pub use graph::Graph;
pub use writer::AssertionSite;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Not;

/// Boogie types
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// Boolean
    Bool,

    /// Bit-vector of a given width, e.g. `bv32`
    Bv(usize),

    /// Unbounded integer
    Int,

    /// Map type, e.g. `[int]bool`
    Map { key: Box<Type>, value: Box<Type> },

    /// A user-defined type, e.g. `ref`
    UserDefined { name: String },
}

impl Type {
    pub fn bv(width: usize) -> Self {
        Self::Bv(width)
    }

    pub fn map(key: Type, value: Type) -> Self {
        Self::Map { key: Box::new(key), value: Box::new(value) }
    }

    pub fn user_defined(name: impl Into<String>) -> Self {
        Self::UserDefined { name: name.into() }
    }
}

/// Function and procedure parameters, local variables and globals
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameter {
    name: String,
    typ: Type,
}

impl Parameter {
    pub fn new(name: impl Into<String>, typ: Type) -> Self {
        Self { name: name.into(), typ }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn typ(&self) -> &Type {
        &self.typ
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }
}

/// Literal types
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Literal {
    /// Boolean values: `true`/`false`
    Bool(bool),

    /// Bit-vector values, e.g. `5bv8`
    Bv { width: usize, value: BigInt },

    /// Unbounded integer values, e.g. `1000`
    Int(BigInt),
}

impl Literal {
    pub fn bv(width: usize, value: BigInt) -> Self {
        Self::Bv { width, value }
    }
}

/// Unary operators
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Logical negation
    Not,

    /// Arithmetic negative
    Neg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// Logical AND
    And,

    /// Logical OR
    Or,

    /// Logical implication
    Imp,

    /// Logical equivalence
    Iff,

    /// Equality
    Eq,

    /// Inequality
    Neq,

    /// Less than
    Lt,

    /// Less than or equal
    Lte,

    /// Greater than
    Gt,

    /// Greater than or equal
    Gte,

    // Arithmetic binary operators
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Expr types
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    /// Literal (constant)
    Literal(Literal),

    /// Variable, constant or formal parameter
    Symbol { name: String },

    /// Unary operation
    UnaryOp { op: UnaryOp, operand: Box<Expr> },

    /// Binary operation
    BinaryOp { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },

    /// Application of an uninterpreted or defined function, e.g. `$add.ref(p, 4)`
    FunctionCall { symbol: String, arguments: Vec<Expr> },

    /// Map select, e.g. `$M.0[p]`
    Select { map: Box<Expr>, indexes: Vec<Expr> },
}

impl Expr {
    pub fn literal(l: Literal) -> Self {
        Expr::Literal(l)
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        Expr::Symbol { name: name.into() }
    }

    pub fn int(value: impl Into<BigInt>) -> Self {
        Expr::Literal(Literal::Int(value.into()))
    }

    pub fn bool(value: bool) -> Self {
        Expr::Literal(Literal::Bool(value))
    }

    pub fn unary_op(op: UnaryOp, operand: Expr) -> Self {
        Expr::UnaryOp { op, operand: Box::new(operand) }
    }

    pub fn binary_op(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::BinaryOp { op, left: Box::new(left), right: Box::new(right) }
    }

    pub fn function_call(symbol: impl Into<String>, arguments: Vec<Expr>) -> Self {
        Expr::FunctionCall { symbol: symbol.into(), arguments }
    }

    pub fn select(map: Expr, indexes: Vec<Expr>) -> Self {
        Expr::Select { map: Box::new(map), indexes }
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::binary_op(BinaryOp::And, self, other)
    }

    pub fn or(self, other: Expr) -> Self {
        Expr::binary_op(BinaryOp::Or, self, other)
    }

    pub fn implies(self, other: Expr) -> Self {
        Expr::binary_op(BinaryOp::Imp, self, other)
    }

    pub fn plus(self, other: Expr) -> Self {
        Expr::binary_op(BinaryOp::Add, self, other)
    }

    pub fn equals(self, other: Expr) -> Self {
        Expr::binary_op(BinaryOp::Eq, self, other)
    }

    /// Name of the symbol if this expression is a bare identifier.
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Expr::Symbol { name } => Some(name),
            _ => None,
        }
    }

    /// Value of the integer or bit-vector literal, if this is one.
    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            Expr::Literal(Literal::Int(v)) | Expr::Literal(Literal::Bv { value: v, .. }) => Some(v),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Expr::Literal(_))
    }

    /// Collect every identifier this expression mentions, including map names
    /// and function symbols.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        self.collect_identifiers(&mut ids);
        ids
    }

    fn collect_identifiers<'a>(&'a self, ids: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Symbol { name } => ids.push(name),
            Expr::UnaryOp { operand, .. } => operand.collect_identifiers(ids),
            Expr::BinaryOp { left, right, .. } => {
                left.collect_identifiers(ids);
                right.collect_identifiers(ids);
            }
            Expr::FunctionCall { symbol, arguments } => {
                ids.push(symbol);
                arguments.iter().for_each(|a| a.collect_identifiers(ids));
            }
            Expr::Select { map, indexes } => {
                map.collect_identifiers(ids);
                indexes.iter().for_each(|i| i.collect_identifiers(ids));
            }
        }
    }

    /// Rename every occurrence of symbol `from` to `to`.
    pub fn rename_symbol(&mut self, from: &str, to: &str) {
        match self {
            Expr::Literal(_) => {}
            Expr::Symbol { name } => {
                if name == from {
                    *name = to.to_string();
                }
            }
            Expr::UnaryOp { operand, .. } => operand.rename_symbol(from, to),
            Expr::BinaryOp { left, right, .. } => {
                left.rename_symbol(from, to);
                right.rename_symbol(from, to);
            }
            Expr::FunctionCall { arguments, .. } => {
                arguments.iter_mut().for_each(|a| a.rename_symbol(from, to))
            }
            Expr::Select { map, indexes } => {
                map.rename_symbol(from, to);
                indexes.iter_mut().for_each(|i| i.rename_symbol(from, to));
            }
        }
    }
}

impl Not for Expr {
    type Output = Self;

    fn not(self) -> Self::Output {
        Expr::unary_op(UnaryOp::Not, self)
    }
}

/// Left-hand side of an assignment
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignTarget {
    /// `x := ...`
    Variable { name: String },

    /// `$M.0[p] := ...`
    MapCell { map: String, indexes: Vec<Expr> },
}

impl AssignTarget {
    /// Name of the assigned variable or map.
    pub fn name(&self) -> &str {
        match self {
            AssignTarget::Variable { name } => name,
            AssignTarget::MapCell { map, .. } => map,
        }
    }
}

/// A procedure call command, e.g. `call {:attr} r := f(a, b);`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallCmd {
    pub callee: String,
    pub arguments: Vec<Expr>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl CallCmd {
    pub fn new(callee: impl Into<String>, arguments: Vec<Expr>) -> Self {
        CallCmd { callee: callee.into(), arguments, outputs: Vec::new(), attributes: Attributes::new() }
    }
}

/// Simple (non-transfer) commands
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cmd {
    /// Assignment statement: `target := value;`
    Assignment { target: AssignTarget, value: Expr },

    /// Procedure call
    Call(CallCmd),

    /// Assume statement: `assume {:attr} condition;`
    Assume {
        condition: Expr,
        #[serde(default)]
        attributes: Attributes,
    },

    /// Assert statement: `assert {:attr} condition;`
    Assert {
        condition: Expr,
        #[serde(default)]
        attributes: Attributes,
    },

    /// Havoc statement: `havoc x, y;`
    Havoc { variables: Vec<String> },
}

impl Cmd {
    pub fn call(callee: impl Into<String>, arguments: Vec<Expr>) -> Self {
        Cmd::Call(CallCmd::new(callee, arguments))
    }

    pub fn assume(condition: Expr, attributes: Attributes) -> Self {
        Cmd::Assume { condition, attributes }
    }

    pub fn assert(condition: Expr, attributes: Attributes) -> Self {
        Cmd::Assert { condition, attributes }
    }

    pub fn assign(name: impl Into<String>, value: Expr) -> Self {
        Cmd::Assignment { target: AssignTarget::Variable { name: name.into() }, value }
    }

    pub fn havoc(variables: Vec<String>) -> Self {
        Cmd::Havoc { variables }
    }

    pub fn as_call(&self) -> Option<&CallCmd> {
        match self {
            Cmd::Call(call) => Some(call),
            _ => None,
        }
    }

    pub fn as_call_mut(&mut self) -> Option<&mut CallCmd> {
        match self {
            Cmd::Call(call) => Some(call),
            _ => None,
        }
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            Cmd::Call(call) => Some(&call.attributes),
            Cmd::Assume { attributes, .. } | Cmd::Assert { attributes, .. } => Some(attributes),
            Cmd::Assignment { .. } | Cmd::Havoc { .. } => None,
        }
    }

    /// Whether this is a call whose callee name starts with `prefix`.
    pub fn is_call_with_prefix(&self, prefix: &str) -> bool {
        self.as_call().is_some_and(|call| call.callee.starts_with(prefix))
    }
}

/// Block terminators
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferCmd {
    /// Non-deterministic jump to one of the labels
    Goto { labels: Vec<String> },

    Return,
}

/// A labelled basic block
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Block {
    pub label: String,
    pub cmds: Vec<Cmd>,
    pub transfer: TransferCmd,
}

impl Block {
    pub fn new(label: impl Into<String>, cmds: Vec<Cmd>, transfer: TransferCmd) -> Self {
        Block { label: label.into(), cmds, transfer }
    }

    pub fn successors(&self) -> &[String] {
        match &self.transfer {
            TransferCmd::Goto { labels } => labels,
            TransferCmd::Return => &[],
        }
    }
}

/// Procedure contract
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contract {
    /// Pre-conditions
    #[serde(default)]
    pub requires: Vec<Expr>,

    /// Post-conditions
    #[serde(default)]
    pub ensures: Vec<Expr>,

    /// Global variables that the procedure may update
    #[serde(default)]
    pub modifies: Vec<String>,
}

/// Procedure declaration (signature and contract)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Procedure {
    pub name: String,
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub return_type: Vec<Parameter>,
    #[serde(default)]
    pub contract: Contract,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Procedure {
    pub fn new(name: impl Into<String>, parameters: Vec<Parameter>) -> Self {
        Procedure {
            name: name.into(),
            parameters,
            return_type: Vec::new(),
            contract: Contract::default(),
            attributes: Attributes::new(),
        }
    }
}

/// Procedure body
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub return_type: Vec<Parameter>,
    #[serde(default)]
    pub locals: Vec<Parameter>,
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Implementation {
    pub fn new(name: impl Into<String>, parameters: Vec<Parameter>, blocks: Vec<Block>) -> Self {
        Implementation {
            name: name.into(),
            parameters,
            return_type: Vec::new(),
            locals: Vec::new(),
            blocks,
            attributes: Attributes::new(),
        }
    }

    pub fn block(&self, label: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.label == label)
    }

    pub fn block_index(&self, label: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }

    /// Index of the formal parameter called `name`.
    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name() == name)
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.locals.iter().chain(self.return_type.iter()).any(|p| p.name() == name)
    }

    /// All call commands, with the index of their block and their position
    /// inside that block.
    pub fn calls(&self) -> impl Iterator<Item = (usize, usize, &CallCmd)> {
        self.blocks.iter().enumerate().flat_map(|(b, block)| {
            block.cmds.iter().enumerate().filter_map(move |(c, cmd)| cmd.as_call().map(|call| (b, c, call)))
        })
    }

    /// Names of every procedure this implementation calls.
    pub fn callees(&self) -> Vec<&str> {
        let mut callees: Vec<&str> = self.calls().map(|(_, _, call)| call.callee.as_str()).collect();
        callees.sort_unstable();
        callees.dedup();
        callees
    }
}

/// Global variable declaration: `var {:attr} name: type;`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub name: String,
    pub typ: Type,
    #[serde(default)]
    pub attributes: Attributes,
}

impl GlobalVariable {
    pub fn new(name: impl Into<String>, typ: Type, attributes: Attributes) -> Self {
        GlobalVariable { name: name.into(), typ, attributes }
    }
}

/// Constant declaration: `const {:attr} unique name: type;`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constant {
    pub name: String,
    pub typ: Type,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub attributes: Attributes,
}

/// Axiom declaration: `axiom expr;`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Axiom {
    pub expr: Expr,
}

/// Type declaration: `type name;`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDeclaration {
    pub name: String,
}

/// Function definition
/// A function in Boogie is a mathematical function (deterministic, has no side
/// effects, and whose body is an expression)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub return_type: Type,
    #[serde(default)]
    pub body: Option<Expr>,
    #[serde(default)]
    pub attributes: Attributes,
}

/// A boogie program
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoogieProgram {
    #[serde(default)]
    pub type_declarations: Vec<TypeDeclaration>,
    #[serde(default)]
    pub constants: Vec<Constant>,
    #[serde(default)]
    pub variables: Vec<GlobalVariable>,
    #[serde(default)]
    pub axioms: Vec<Axiom>,
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default)]
    pub procedures: Vec<Procedure>,
    #[serde(default)]
    pub implementations: Vec<Implementation>,
}

impl BoogieProgram {
    pub fn new() -> BoogieProgram {
        BoogieProgram::default()
    }

    /// Parse a program from its JSON representation.
    pub fn from_json(json: &str) -> serde_json::Result<BoogieProgram> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn add_procedure(&mut self, procedure: Procedure) {
        self.procedures.push(procedure);
    }

    pub fn add_implementation(&mut self, implementation: Implementation) {
        self.implementations.push(implementation);
    }

    pub fn add_variable(&mut self, variable: GlobalVariable) {
        self.variables.push(variable);
    }

    pub fn procedure(&self, name: &str) -> Option<&Procedure> {
        self.procedures.iter().find(|p| p.name == name)
    }

    pub fn procedure_mut(&mut self, name: &str) -> Option<&mut Procedure> {
        self.procedures.iter_mut().find(|p| p.name == name)
    }

    pub fn implementation(&self, name: &str) -> Option<&Implementation> {
        self.implementations.iter().find(|i| i.name == name)
    }

    pub fn implementation_mut(&mut self, name: &str) -> Option<&mut Implementation> {
        self.implementations.iter_mut().find(|i| i.name == name)
    }

    pub fn variable(&self, name: &str) -> Option<&GlobalVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Remove the procedure, implementation and any function-pointer constant
    /// named `name`.
    pub fn remove_procedure(&mut self, name: &str) {
        self.procedures.retain(|p| p.name != name);
        self.implementations.retain(|i| i.name != name);
        self.constants.retain(|c| c.name != name);
    }

    /// The call graph over implementations. Calls to bodiless procedures are
    /// kept as edges so that callers of external functions can be found.
    pub fn call_graph(&self) -> Graph {
        let mut graph = Graph::new();
        for imp in &self.implementations {
            graph.add_node(&imp.name);
            for callee in imp.callees() {
                graph.add_edge(&imp.name, callee);
            }
        }
        graph
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Bv(size) => write!(f, "bv{size}"),
            Type::Int => write!(f, "int"),
            Type::Map { key, value } => write!(f, "[{key}]{value}"),
            Type::UserDefined { name } => write!(f, "{name}"),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(value) => write!(f, "{value}"),
            Literal::Bv { width, value } => write!(f, "{value}bv{width}"),
            Literal::Int(value) => write!(f, "{value}"),
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Not => write!(f, "!"),
            UnaryOp::Neg => write!(f, "-"),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Imp => "==>",
            BinaryOp::Iff => "<==>",
            BinaryOp::Eq => "==",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Lte => "<=",
            BinaryOp::Gte => ">=",
        };
        write!(f, "{op}")
    }
}

/// The textual form of an expression is also its identity when accesses are
/// compared, so it must be stable.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Symbol { name } => write!(f, "{name}"),
            Expr::UnaryOp { op, operand } => write!(f, "{op}({operand})"),
            Expr::BinaryOp { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::FunctionCall { symbol, arguments } => {
                write!(f, "{symbol}(")?;
                write_comma_separated(f, arguments)?;
                write!(f, ")")
            }
            Expr::Select { map, indexes } => {
                write!(f, "{map}[")?;
                write_comma_separated(f, indexes)?;
                write!(f, "]")
            }
        }
    }
}

impl fmt::Display for AssignTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignTarget::Variable { name } => write!(f, "{name}"),
            AssignTarget::MapCell { map, indexes } => {
                write!(f, "{map}[")?;
                write_comma_separated(f, indexes)?;
                write!(f, "]")
            }
        }
    }
}

fn write_comma_separated<D: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[D]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}
