// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A writer for Boogie programs.
//! Generates a text Boogie program with the following format:
//! ```ignore
//! // Type declarations:
//! type <name>;
//! ...
//!
//! // Constant declarations:
//! const {:attr} unique <name>: <type>;
//! ...
//!
//! // Variable declarations:
//! var {:attr} <var-name>: <type>;
//! ...
//!
//! // Axioms:
//! axiom <expr>;
//! ...
//!
//! // Functions:
//! function {:attr} <name>(<arg1>: <type1>, ...) returns (<return-type>);
//! ...
//!
//! // Procedures:
//! procedure {:attr} <name>(<arg1>: <type1>, ...) returns (<ret>: <type>);
//!   requires <pre-condition>;
//!   ensures <post-condition>;
//!   modifies <var1>, <var2>, ...;
//! ...
//!
//! // Implementations:
//! implementation {:attr} <name>(<arg1>: <type1>, ...)
//! {
//!   var <local>: <type>;
//!
//! <label>:
//!   <cmd>;
//!   goto <label1>, <label2>;
//! }
//! ```
//!
//! While writing, the line of every `assert` is recorded together with its
//! attributes so that a verifier's error report can be traced back to the
//! resource being checked.
use crate::boogie_program::*;

use std::io::Write;

/// An assertion as it appears in the written text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssertionSite {
    /// 1-based line number
    pub line: usize,
    pub attributes: Attributes,
}

/// Forwards to the inner writer and counts the newlines that went through.
struct LineCounter<'a, T: Write> {
    inner: &'a mut T,
    lines: usize,
}

impl<T: Write> Write for LineCounter<'_, T> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.lines += buf[..n].iter().filter(|b| **b == b'\n').count();
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// A writer for Boogie programs.
struct Writer<'a, T: Write> {
    writer: LineCounter<'a, T>,
    indentation: usize,
    assertions: Vec<AssertionSite>,
}

impl<'a, T: Write> Writer<'a, T> {
    fn new(writer: &'a mut T) -> Self {
        Self { writer: LineCounter { inner: writer, lines: 0 }, indentation: 0, assertions: Vec::new() }
    }

    fn newline(&mut self) -> std::io::Result<()> {
        writeln!(self.writer)
    }

    fn increase_indent(&mut self) {
        self.indentation += 2;
    }

    fn decrease_indent(&mut self) {
        self.indentation -= 2;
    }

    fn indent(&mut self) -> std::io::Result<()> {
        write!(self.writer, "{:width$}", "", width = self.indentation)
    }

    fn current_line(&self) -> usize {
        self.writer.lines + 1
    }
}

impl BoogieProgram {
    /// Write the program text and return the table of written assertions.
    pub fn write_to<T: Write>(&self, writer: &mut T) -> std::io::Result<Vec<AssertionSite>> {
        let mut writer = Writer::new(writer);

        if !self.type_declarations.is_empty() {
            writeln!(writer.writer, "// Type declarations:")?;
            for td in &self.type_declarations {
                writeln!(writer.writer, "type {};", td.name)?;
            }
            writer.newline()?;
        }
        if !self.constants.is_empty() {
            writeln!(writer.writer, "// Constant declarations:")?;
            for c in &self.constants {
                let unique = if c.unique { "unique " } else { "" };
                writeln!(writer.writer, "const {}{unique}{}: {};", c.attributes, c.name, c.typ)?;
            }
            writer.newline()?;
        }
        if !self.variables.is_empty() {
            writeln!(writer.writer, "// Variable declarations:")?;
            for v in &self.variables {
                writeln!(writer.writer, "var {}{}: {};", v.attributes, v.name, v.typ)?;
            }
            writer.newline()?;
        }
        if !self.axioms.is_empty() {
            writeln!(writer.writer, "// Axioms:")?;
            for a in &self.axioms {
                writeln!(writer.writer, "axiom {};", a.expr)?;
            }
            writer.newline()?;
        }
        if !self.functions.is_empty() {
            writeln!(writer.writer, "// Functions:")?;
            for f in &self.functions {
                f.write_to(&mut writer)?;
            }
            writer.newline()?;
        }
        if !self.procedures.is_empty() {
            writeln!(writer.writer, "// Procedures:")?;
            for p in &self.procedures {
                p.write_to(&mut writer)?;
            }
            writer.newline()?;
        }
        if !self.implementations.is_empty() {
            writeln!(writer.writer, "// Implementations:")?;
            for (i, imp) in self.implementations.iter().enumerate() {
                if i > 0 {
                    writer.newline()?;
                }
                imp.write_to(&mut writer)?;
            }
        }
        Ok(writer.assertions)
    }
}

fn write_parameters<T: Write>(writer: &mut Writer<T>, parameters: &[Parameter]) -> std::io::Result<()> {
    for (i, param) in parameters.iter().enumerate() {
        if i > 0 {
            write!(writer.writer, ", ")?;
        }
        write!(writer.writer, "{}: {}", param.name(), param.typ())?;
    }
    Ok(())
}

fn write_signature<T: Write>(
    writer: &mut Writer<T>,
    keyword: &str,
    attributes: &Attributes,
    name: &str,
    parameters: &[Parameter],
    return_type: &[Parameter],
) -> std::io::Result<()> {
    write!(writer.writer, "{keyword} {attributes}{name}(")?;
    write_parameters(writer, parameters)?;
    write!(writer.writer, ")")?;
    if !return_type.is_empty() {
        write!(writer.writer, " returns (")?;
        write_parameters(writer, return_type)?;
        write!(writer.writer, ")")?;
    }
    Ok(())
}

impl Function {
    fn write_to<T: Write>(&self, writer: &mut Writer<T>) -> std::io::Result<()> {
        write!(writer.writer, "function {}{}(", self.attributes, self.name)?;
        write_parameters(writer, &self.parameters)?;
        write!(writer.writer, ") returns ({})", self.return_type)?;
        match &self.body {
            Some(body) => {
                writer.newline()?;
                writeln!(writer.writer, "{{")?;
                writer.increase_indent();
                writer.indent()?;
                writeln!(writer.writer, "{body}")?;
                writer.decrease_indent();
                writeln!(writer.writer, "}}")?;
            }
            None => writeln!(writer.writer, ";")?,
        }
        Ok(())
    }
}

impl Procedure {
    fn write_to<T: Write>(&self, writer: &mut Writer<T>) -> std::io::Result<()> {
        write_signature(writer, "procedure", &self.attributes, &self.name, &self.parameters, &self.return_type)?;
        writeln!(writer.writer, ";")?;
        writer.increase_indent();
        self.contract.write_to(writer)?;
        writer.decrease_indent();
        Ok(())
    }
}

impl Implementation {
    fn write_to<T: Write>(&self, writer: &mut Writer<T>) -> std::io::Result<()> {
        write_signature(writer, "implementation", &self.attributes, &self.name, &self.parameters, &self.return_type)?;
        writer.newline()?;
        writeln!(writer.writer, "{{")?;
        writer.increase_indent();
        for local in &self.locals {
            writer.indent()?;
            writeln!(writer.writer, "var {}: {};", local.name(), local.typ())?;
        }
        for block in &self.blocks {
            writer.newline()?;
            block.write_to(writer)?;
        }
        writer.decrease_indent();
        writeln!(writer.writer, "}}")?;
        Ok(())
    }
}

impl Block {
    fn write_to<T: Write>(&self, writer: &mut Writer<T>) -> std::io::Result<()> {
        writeln!(writer.writer, "{}:", self.label)?;
        for cmd in &self.cmds {
            cmd.write_to(writer)?;
        }
        writer.indent()?;
        match &self.transfer {
            TransferCmd::Goto { labels } => writeln!(writer.writer, "goto {};", labels.join(", "))?,
            TransferCmd::Return => writeln!(writer.writer, "return;")?,
        }
        Ok(())
    }
}

impl Cmd {
    fn write_to<T: Write>(&self, writer: &mut Writer<T>) -> std::io::Result<()> {
        writer.indent()?;
        match self {
            Cmd::Assignment { target, value } => {
                writeln!(writer.writer, "{target} := {value};")?;
            }
            Cmd::Call(call) => {
                write!(writer.writer, "call {}", call.attributes)?;
                if !call.outputs.is_empty() {
                    write!(writer.writer, "{} := ", call.outputs.join(", "))?;
                }
                write!(writer.writer, "{}(", call.callee)?;
                for (i, a) in call.arguments.iter().enumerate() {
                    if i > 0 {
                        write!(writer.writer, ", ")?;
                    }
                    write!(writer.writer, "{a}")?;
                }
                writeln!(writer.writer, ");")?;
            }
            Cmd::Assume { condition, attributes } => {
                writeln!(writer.writer, "assume {attributes}{condition};")?;
            }
            Cmd::Assert { condition, attributes } => {
                let line = writer.current_line();
                writer.assertions.push(AssertionSite { line, attributes: attributes.clone() });
                writeln!(writer.writer, "assert {attributes}{condition};")?;
            }
            Cmd::Havoc { variables } => {
                writeln!(writer.writer, "havoc {};", variables.join(", "))?;
            }
        }
        Ok(())
    }
}

impl Contract {
    fn write_to<T: Write>(&self, writer: &mut Writer<T>) -> std::io::Result<()> {
        for r in &self.requires {
            writer.indent()?;
            writeln!(writer.writer, "requires {r};")?;
        }
        for e in &self.ensures {
            writer.indent()?;
            writeln!(writer.writer, "ensures {e};")?;
        }
        if !self.modifies.is_empty() {
            writer.indent()?;
            writeln!(writer.writer, "modifies {};", self.modifies.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_program() {
        let mut program = BoogieProgram::new();
        program.add_variable(GlobalVariable::new("lock$rtnl", Type::Bool, Attributes::new().with(Attribute::flag("lock"))));
        let mut procedure = Procedure::new("main", vec![Parameter::new("x", Type::Int)]);
        procedure.return_type = vec![Parameter::new("z", Type::Bool)];
        procedure.contract.requires.push(!Expr::symbol("lock$rtnl"));
        procedure.contract.modifies = vec!["lock$rtnl".to_string()];
        program.add_procedure(procedure);

        let mut imp = Implementation::new(
            "main",
            vec![Parameter::new("x", Type::Int)],
            vec![
                Block::new(
                    "$bb0",
                    vec![
                        Cmd::assign("y", Expr::symbol("x").plus(Expr::int(1))),
                        Cmd::call("g", vec![Expr::symbol("y")]),
                    ],
                    TransferCmd::Goto { labels: vec!["$bb1".to_string()] },
                ),
                Block::new(
                    "$bb1",
                    vec![
                        Cmd::havoc(vec!["y".to_string()]),
                        Cmd::assert(
                            Expr::symbol("y").implies(Expr::bool(false)),
                            Attributes::new().with(Attribute::new("resource", vec!["$M.0".into()])),
                        ),
                    ],
                    TransferCmd::Return,
                ),
            ],
        );
        imp.return_type = vec![Parameter::new("z", Type::Bool)];
        imp.locals = vec![Parameter::new("y", Type::Int)];
        program.add_implementation(imp);

        let mut v = Vec::new();
        let assertions = program.write_to(&mut v).unwrap();
        let program_text = String::from_utf8(v).unwrap().to_string();

        let expected = String::from(
            "\
// Variable declarations:
var {:lock} lock$rtnl: bool;

// Procedures:
procedure main(x: int) returns (z: bool);
  requires !(lock$rtnl);
  modifies lock$rtnl;

// Implementations:
implementation main(x: int) returns (z: bool)
{
  var y: int;

$bb0:
  y := (x + 1);
  call g(y);
  goto $bb1;

$bb1:
  havoc y;
  assert {:resource \"$M.0\"} (y ==> false);
  return;
}
",
        );
        assert_eq!(program_text, expected);
        assert_eq!(assertions.len(), 1);
        assert_eq!(assertions[0].line, 21);
        assert_eq!(assertions[0].attributes.string("resource"), Some("$M.0"));
    }

    #[test]
    fn call_with_outputs_and_attributes() {
        let mut call = CallCmd::new("_WRITE_LS_$M.0", vec![Expr::symbol("p")]);
        call.outputs = vec!["r".to_string()];
        call.attributes.push(Attribute::flag("tag"));
        let mut program = BoogieProgram::new();
        program.add_implementation(Implementation::new(
            "f",
            vec![],
            vec![Block::new("$bb0", vec![Cmd::Call(call)], TransferCmd::Return)],
        ));
        let mut v = Vec::new();
        program.write_to(&mut v).unwrap();
        assert!(String::from_utf8(v).unwrap().contains("  call {:tag} r := _WRITE_LS_$M.0(p);\n"));
    }
}
