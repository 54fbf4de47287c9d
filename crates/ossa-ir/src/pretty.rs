//! Pretty-printing for IR
//!
//! Provides human-readable output for debugging IR structures.

use super::function::{FunctionBody, IrFunction};
use super::instr::{Instruction, IrInstr};
use super::module::IrModule;
use super::value::ValueId;
use std::fmt::Write;

/// Trait for pretty-printing IR constructs
pub trait PrettyPrint {
    fn pretty_print(&self) -> String;
}

impl PrettyPrint for IrModule {
    fn pretty_print(&self) -> String {
        let mut output = String::new();
        writeln!(output, "; module {}", self.name).unwrap();
        writeln!(output).unwrap();

        for (_, func) in self.functions() {
            output.push_str(&func.pretty_print());
            writeln!(output).unwrap();
        }

        output
    }
}

impl PrettyPrint for IrFunction {
    fn pretty_print(&self) -> String {
        let mut output = String::new();

        let mut attrs = Vec::new();
        if self.attrs.must_inline {
            attrs.push("[transparent]");
        }
        if self.attrs.is_thunk {
            attrs.push("[thunk]");
        }
        if self.attrs.serialized {
            attrs.push("[serialized]");
        }
        let prefix = if attrs.is_empty() {
            String::new()
        } else {
            format!("{} ", attrs.join(" "))
        };

        match self.body() {
            Some(body) => {
                writeln!(output, "fn {}@{} : {} {{", prefix, self.name, self.ty).unwrap();
                output.push_str(&print_body(body));
                writeln!(output, "}}").unwrap();
            }
            None if self.is_checked_out() => {
                writeln!(output, "fn {}@{} : {} {{ <in use> }}", prefix, self.name, self.ty).unwrap();
            }
            None => {
                writeln!(output, "fn {}@{} : {}", prefix, self.name, self.ty).unwrap();
            }
        }
        output
    }
}

impl PrettyPrint for FunctionBody {
    fn pretty_print(&self) -> String {
        print_body(self)
    }
}

fn print_body(body: &FunctionBody) -> String {
    let mut output = String::new();
    for block in body.blocks() {
        let params: Vec<String> = block
            .params
            .iter()
            .map(|p| format!("{} : {}", p, body.value_type(*p)))
            .collect();
        let header = if params.is_empty() {
            format!("{}", block.id)
        } else {
            format!("{}({})", block.id, params.join(", "))
        };
        match &block.label {
            Some(label) => writeln!(output, "{}: ; {}", header, label).unwrap(),
            None => writeln!(output, "{}:", header).unwrap(),
        }

        for &id in &block.instructions {
            if let Some(node) = body.instr(id) {
                writeln!(output, "  {}", format_instr(body, node)).unwrap();
            }
        }
        writeln!(output, "  {}", block.terminator).unwrap();
    }
    output
}

fn format_instr(body: &FunctionBody, node: &Instruction) -> String {
    let list = |values: &[ValueId]| -> String {
        let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        parts.join(", ")
    };

    let rhs = match &node.op {
        IrInstr::FunctionRef { func } => format!("function_ref {}", func),
        IrInstr::PartialApply { callee, args } | IrInstr::Apply { callee, args } => {
            format!("{} {}({})", node.op.mnemonic(), callee, list(args))
        }
        IrInstr::ThinToThick { operand }
        | IrInstr::ConvertFunction { operand }
        | IrInstr::ConvertEscapeToNoEscape { operand }
        | IrInstr::StrongRetain { operand }
        | IrInstr::StrongRelease { operand } => format!("{} {}", node.op.mnemonic(), operand),
        IrInstr::MarkDependence { value, base } => format!("mark_dependence {} on {}", value, base),
        IrInstr::AllocBox => "alloc_box".to_string(),
        IrInstr::ProjectBox { boxed } => format!("project_box {}", boxed),
        IrInstr::Load { addr } => format!("load {}", addr),
        IrInstr::Store { src, dest } => format!("store {} to {}", src, dest),
        IrInstr::AllocRef { class } => format!("alloc_ref ${}", class),
        IrInstr::ClassMethod { object, method } => format!("class_method {}, #{}", object, method),
        IrInstr::IntLiteral { value } => format!("integer_literal {}", value),
        IrInstr::Builtin { name, args } => format!("builtin \"{}\"({})", name, list(args)),
    };

    match node.result {
        Some(result) => format!("{} = {} : {}", result, rhs, body.value_type(result)),
        None => rhs,
    }
}
