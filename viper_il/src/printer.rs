//! Textual IL serializer
//!
//! The output round-trips: parsing a printed module yields a structurally
//! equal module, and printing that module yields identical text.

use crate::function::Function;
use crate::instr::{Block, BranchTarget, Instr};
use crate::module::Module;
use crate::opcode::Opcode;
use crate::trap::TrapKind;
use crate::value::{Const, Operand};
use std::fmt::Write;

/// Serialize a whole module to textual IL
pub fn print_module(module: &Module) -> String {
    let mut out = String::new();
    write!(out, "il {}\n", module.version).unwrap();
    if !module.triple.is_empty() {
        write!(out, "target \"{}\"\n", escape(&module.triple)).unwrap();
    }

    if !module.externs.is_empty() {
        out.push('\n');
        for (name, sig) in &module.externs {
            write!(out, "extern @{}(", name).unwrap();
            for (i, ty) in sig.params.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(ty.name());
            }
            write!(out, ") -> {}\n", sig.ret).unwrap();
        }
    }

    if !module.globals.is_empty() {
        out.push('\n');
        for (name, global) in &module.globals {
            out.push_str("global ");
            if global.mutable {
                out.push_str("mut ");
            }
            write!(out, "@{}: {}", name, global.ty).unwrap();
            if let Some(init) = &global.init {
                out.push_str(" = ");
                print_const(&mut out, module, init);
            }
            out.push('\n');
        }
    }

    for function in module.functions.values() {
        out.push('\n');
        print_function(&mut out, module, function);
    }
    out
}

/// Serialize one function
pub fn function_to_string(module: &Module, function: &Function) -> String {
    let mut out = String::new();
    print_function(&mut out, module, function);
    out
}

fn print_function(out: &mut String, module: &Module, function: &Function) {
    write!(out, "func @{}(", function.name).unwrap();
    for (i, param) in function.params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write!(out, "%{}: {}", function.temp_name(param.temp), param.ty).unwrap();
    }
    write!(out, ") -> {}", function.ret).unwrap();
    if function.attrs.noreturn {
        out.push_str(" noreturn");
    }
    out.push_str(" {\n");

    for (index, block) in function.blocks.iter().enumerate() {
        print_block(out, module, function, block, index == 0);
    }
    out.push_str("}\n");
}

fn print_block(out: &mut String, module: &Module, function: &Function, block: &Block, is_entry: bool) {
    out.push_str(&block.label);
    // Entry parameters are the function parameters; they are printed on the
    // signature line, not on the block header.
    if !is_entry && !block.params.is_empty() {
        out.push('(');
        for (i, param) in block.params.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write!(out, "%{}: {}", function.temp_name(param.temp), param.ty).unwrap();
        }
        out.push(')');
    }
    out.push_str(":\n");

    for instr in &block.instrs {
        out.push_str("  ");
        print_instr(out, module, function, instr);
        out.push('\n');
    }
}

fn print_instr(out: &mut String, module: &Module, function: &Function, instr: &Instr) {
    if let Some(result) = instr.result {
        write!(out, "%{} = ", function.temp_name(result)).unwrap();
    }
    out.push_str(instr.op.mnemonic());

    match instr.op {
        Opcode::Trunc
        | Opcode::Sext
        | Opcode::Zext
        | Opcode::Fptosi
        | Opcode::Sitofp
        | Opcode::Fptrunc
        | Opcode::Fpext
        | Opcode::Bitcast
        | Opcode::CastFpToSiRteChk
        | Opcode::CastFpToUiRteChk
        | Opcode::CastSiNarrowChk
        | Opcode::CastUiNarrowChk => {
            out.push(' ');
            print_operand(out, module, function, &instr.operands[0]);
            write!(out, " to {}", instr.ty.expect("cast without target type")).unwrap();
        }
        Opcode::Load => {
            write!(out, " {}, ", instr.ty.expect("load without type")).unwrap();
            print_operand(out, module, function, &instr.operands[0]);
        }
        Opcode::Call => {
            out.push(' ');
            print_operand(out, module, function, &instr.operands[0]);
            print_call_args(out, module, function, &instr.operands[1..]);
        }
        Opcode::CallIndirect => {
            out.push(' ');
            print_operand(out, module, function, &instr.operands[0]);
            print_call_args(out, module, function, &instr.operands[1..]);
            write!(out, " -> {}", instr.ty.expect("call.indirect without return type")).unwrap();
        }
        Opcode::Br => {
            out.push(' ');
            print_target(out, module, function, &instr.targets[0]);
        }
        Opcode::Cbr => {
            out.push(' ');
            print_operand(out, module, function, &instr.operands[0]);
            out.push_str(", ");
            print_target(out, module, function, &instr.targets[0]);
            out.push_str(", ");
            print_target(out, module, function, &instr.targets[1]);
        }
        Opcode::Switch => {
            out.push(' ');
            print_operand(out, module, function, &instr.operands[0]);
            out.push_str(", ");
            print_target(out, module, function, &instr.targets[0]);
            out.push_str(" [");
            for (i, (case, target)) in instr.operands[1..].iter().zip(&instr.targets[1..]).enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push(' ');
                print_operand(out, module, function, case);
                out.push_str(" -> ");
                print_target(out, module, function, target);
            }
            out.push_str(" ]");
        }
        Opcode::TrapFromErr => {
            // The kind operand prints as its name when it is a known kind code
            out.push(' ');
            match instr.operands[0].as_const() {
                Some(Const::Int { bits, .. }) if TrapKind::from_code(*bits as i32).is_some() => {
                    out.push_str(TrapKind::from_code(*bits as i32).unwrap().name());
                }
                _ => print_operand(out, module, function, &instr.operands[0]),
            }
            out.push_str(", ");
            print_operand(out, module, function, &instr.operands[1]);
        }
        Opcode::EhPush => {
            write!(out, " ^{}", target_label(function, &instr.targets[0])).unwrap();
        }
        Opcode::ResumeLabel => {
            out.push(' ');
            print_operand(out, module, function, &instr.operands[0]);
            write!(out, ", ^{}", target_label(function, &instr.targets[0])).unwrap();
        }
        _ => {
            for (i, operand) in instr.operands.iter().enumerate() {
                out.push_str(if i == 0 { " " } else { ", " });
                print_operand(out, module, function, operand);
            }
        }
    }

    if let Some(line) = instr.line {
        write!(out, " !line {}", line).unwrap();
    }
}

fn print_call_args(out: &mut String, module: &Module, function: &Function, args: &[Operand]) {
    out.push('(');
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        print_operand(out, module, function, arg);
    }
    out.push(')');
}

fn print_target(out: &mut String, module: &Module, function: &Function, target: &BranchTarget) {
    write!(out, "^{}", target_label(function, target)).unwrap();
    if !target.args.is_empty() {
        out.push('(');
        for (i, arg) in target.args.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            print_operand(out, module, function, arg);
        }
        out.push(')');
    }
}

fn target_label<'f>(function: &'f Function, target: &BranchTarget) -> &'f str {
    function
        .block(target.block)
        .map(|b| b.label.as_str())
        .unwrap_or("<invalid>")
}

fn print_operand(out: &mut String, module: &Module, function: &Function, operand: &Operand) {
    match operand {
        Operand::Const(c) => print_const(out, module, c),
        Operand::Temp(id) => write!(out, "%{}", function.temp_name(*id)).unwrap(),
        Operand::Func(id) => {
            let name = module.function(*id).map(|f| f.name.as_str()).unwrap_or("<invalid>");
            write!(out, "@{}", name).unwrap();
        }
        Operand::Extern(id) => {
            let name = module.extern_sig(*id).map(|(n, _)| n).unwrap_or("<invalid>");
            write!(out, "@{}", name).unwrap();
        }
        Operand::Global(id) => {
            let name = module.global(*id).map(|(n, _)| n).unwrap_or("<invalid>");
            write!(out, "@{}", name).unwrap();
        }
    }
}

fn print_const(out: &mut String, module: &Module, c: &Const) {
    match c {
        Const::Int { ty, bits } => {
            if ty.is_unsigned_int() {
                write!(out, "{}:{}", *bits as u64, ty).unwrap();
            } else {
                write!(out, "{}:{}", bits, ty).unwrap();
            }
        }
        Const::Float { ty, value } => write!(out, "{:?}:{}", value, ty).unwrap(),
        Const::Str(id) => {
            let s = module.str_value(*id).unwrap_or("<invalid>");
            write!(out, "\"{}\":str", escape(s)).unwrap();
        }
        Const::Null => out.push_str("null:ptr"),
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{{{:x}}}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Param;
    use crate::instr::{Block, BlockParam};
    use crate::types::Type;
    use crate::value::{BlockId, TempId};
    use pretty_assertions::assert_eq;

    fn divide_module() -> Module {
        let mut module = Module::new();
        let mut func = Function::new("main", Type::I32);
        let q = func.new_temp("q");
        let err = func.new_temp("err");
        let tok = func.new_temp("tok");

        let mut entry = Block::new("entry");
        entry.push(Instr::new(Opcode::EhPush).with_target(BranchTarget::new(BlockId(1))));
        entry.push(
            Instr::new(Opcode::SdivChk0)
                .with_result(q)
                .with_operands([Const::i32(10).into(), Const::i32(0).into()]),
        );
        entry.push(Instr::new(Opcode::EhPop));
        entry.push(Instr::new(Opcode::Ret).with_operands([Const::i32(0).into()]));
        func.add_block(entry);

        let mut handler = Block::new("h");
        handler.params.push(BlockParam { temp: err, ty: Type::Error });
        handler.params.push(BlockParam { temp: tok, ty: Type::ResumeTok });
        handler.push(Instr::new(Opcode::Ret).with_operands([Const::i32(1).into()]));
        func.add_block(handler);

        module.add_function(func).unwrap();
        module
    }

    #[test]
    fn test_print_divide_module() {
        let text = print_module(&divide_module());
        let expected = "\
il 0.1.0

func @main() -> i32 {
entry:
  eh.push ^h
  %q = sdiv.chk0 10:i32, 0:i32
  eh.pop
  ret 0:i32
h(%err: error, %tok: resume_tok):
  ret 1:i32
}
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_print_function_signature() {
        let mut module = Module::new();
        let mut func = Function::new("add", Type::I64);
        let x = func.new_temp("x");
        let y = func.new_temp("y");
        func.params.push(Param { temp: x, ty: Type::I64 });
        func.params.push(Param { temp: y, ty: Type::I64 });

        let r = func.new_temp("r");
        let mut entry = Block::new("entry");
        entry.params = func.entry_params();
        entry.push(
            Instr::new(Opcode::Iadd)
                .with_result(r)
                .with_operands([Operand::Temp(x), Operand::Temp(y)]),
        );
        entry.push(Instr::new(Opcode::Ret).with_operands([Operand::Temp(r)]));
        func.add_block(entry);
        module.add_function(func).unwrap();

        let text = print_module(&module);
        assert!(text.contains("func @add(%x: i64, %y: i64) -> i64 {"));
        assert!(text.contains("  %r = iadd %x, %y\n"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
        assert_eq!(escape("\u{1}"), "\\u{1}");
    }
}
