//! Parser for textual IL
//!
//! Errors are reported with (line, column) positions and a stable diagnostic
//! code; on an error inside a function body the parser recovers to the next
//! top-level declaration so that one bad function does not hide the rest.
//! Externs and globals are normalized (sorted by name) while parsing.

use crate::function::{Function, Param};
use crate::instr::{Block, BlockParam, BranchTarget, Instr};
use crate::lexer::{Lexer, Tok};
use crate::module::{ExternSig, Global, Module, Version, CURRENT_VERSION};
use crate::opcode::Opcode;
use crate::trap::TrapKind;
use crate::types::Type;
use crate::value::{Const, Operand, TempId};
use std::collections::HashMap;
use viper_common::{Diagnostic, Diagnostics, SrcLoc};

/// Parse a textual IL module.
///
/// All diagnostics are accumulated; the module is returned only when no
/// errors were produced.
pub fn parse_module(input: &str) -> Result<Module, Diagnostics> {
    let tokens = match Lexer::tokenize(input) {
        Ok(tokens) => tokens,
        Err(err) => {
            let mut diags = Diagnostics::new();
            diags.add(Diagnostic::error("PAR0001", err.message).at(err.position));
            return Err(diags);
        }
    };

    let mut parser = Parser::new(&tokens);
    parser.parse();
    if parser.diags.has_errors() {
        Err(parser.diags)
    } else {
        Ok(parser.module)
    }
}

struct Parser<'a> {
    toks: &'a [(Tok, SrcLoc)],
    index: usize,
    diags: Diagnostics,
    module: Module,
    /// Function names whose bodies have been parsed (slots are pre-created
    /// for every declared function so forward calls resolve)
    filled_funcs: std::collections::HashSet<String>,
}

/// Per-function parsing state
struct FnCtx {
    func: Function,
    temps: HashMap<String, TempId>,
    /// (block index, instr index, target index, label, position) fixed up
    /// once all block headers are known
    label_fixups: Vec<(usize, usize, usize, String, SrcLoc)>,
}

impl FnCtx {
    fn temp(&mut self, name: &str) -> TempId {
        if let Some(id) = self.temps.get(name) {
            return *id;
        }
        let id = self.func.new_temp(name);
        self.temps.insert(name.to_string(), id);
        id
    }
}

impl<'a> Parser<'a> {
    fn new(toks: &'a [(Tok, SrcLoc)]) -> Self {
        let mut parser = Self {
            toks,
            index: 0,
            diags: Diagnostics::new(),
            module: Module::new(),
            filled_funcs: std::collections::HashSet::new(),
        };
        parser.scan_declarations();
        parser
    }

    // ---- token helpers -------------------------------------------------

    fn current(&self) -> &Tok {
        &self.toks[self.index.min(self.toks.len() - 1)].0
    }

    fn position(&self) -> SrcLoc {
        self.toks[self.index.min(self.toks.len() - 1)].1
    }

    fn bump(&mut self) -> &Tok {
        let tok = &self.toks[self.index.min(self.toks.len() - 1)].0;
        if self.index < self.toks.len() - 1 {
            self.index += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Tok) -> bool {
        if self.current() == expected {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Tok) -> Result<(), ()> {
        if self.eat(expected) {
            Ok(())
        } else {
            self.error_here(
                "PAR0002",
                format!("expected {}, found {}", expected.describe(), self.current().describe()),
            );
            Err(())
        }
    }

    fn error_here(&mut self, code: &str, message: impl Into<String>) {
        let pos = self.position();
        self.diags.add(Diagnostic::error(code, message).at(pos));
    }

    // ---- declaration pre-scan ------------------------------------------

    /// Collect the names of all top-level declarations so that forward
    /// references resolve to stable ids. Externs and globals get their final
    /// (sorted) slots here; functions get placeholder slots in declaration
    /// order, filled in when their bodies are parsed.
    fn scan_declarations(&mut self) {
        let mut externs: Vec<String> = Vec::new();
        let mut globals: Vec<String> = Vec::new();
        let mut funcs: Vec<String> = Vec::new();
        let mut depth = 0usize;
        let mut i = 0;
        while i < self.toks.len() {
            match &self.toks[i].0 {
                Tok::LBrace => depth += 1,
                Tok::RBrace => depth = depth.saturating_sub(1),
                Tok::Ident(kw) if depth == 0 => {
                    let name_at = match kw.as_str() {
                        "extern" | "func" => i + 1,
                        "global" => {
                            if matches!(self.toks.get(i + 1), Some((Tok::Ident(m), _)) if m == "mut") {
                                i + 2
                            } else {
                                i + 1
                            }
                        }
                        _ => {
                            i += 1;
                            continue;
                        }
                    };
                    if let Some((Tok::AtName(name), _)) = self.toks.get(name_at) {
                        match kw.as_str() {
                            "extern" => externs.push(name.clone()),
                            "global" => globals.push(name.clone()),
                            _ => funcs.push(name.clone()),
                        }
                    }
                }
                _ => {}
            }
            i += 1;
        }

        externs.sort();
        externs.dedup();
        for name in externs {
            let _ = self.module.add_extern(name, ExternSig::new([], Type::Void));
        }
        globals.sort();
        globals.dedup();
        for name in globals {
            let _ = self.module.add_global(name, Global { ty: Type::Void, init: None, mutable: false });
        }
        funcs.dedup();
        for name in funcs {
            if let Err(err) = self.module.add_function(Function::new(name, Type::Void)) {
                self.diags.add(Diagnostic::error("PAR0007", err.to_string()));
            }
        }
    }

    // ---- top level ------------------------------------------------------

    fn parse(&mut self) {
        self.parse_version_line();
        if matches!(self.current(), Tok::Ident(kw) if kw == "target") {
            self.bump();
            match self.bump().clone() {
                Tok::Str(triple) => self.module.triple = triple,
                other => {
                    self.error_here("PAR0002", format!("expected target triple string, found {}", other.describe()))
                }
            }
        }

        loop {
            match self.current().clone() {
                Tok::Eof => break,
                Tok::Ident(kw) if kw == "extern" => {
                    self.bump();
                    if self.parse_extern().is_err() {
                        self.recover_to_top_level();
                    }
                }
                Tok::Ident(kw) if kw == "global" => {
                    self.bump();
                    if self.parse_global().is_err() {
                        self.recover_to_top_level();
                    }
                }
                Tok::Ident(kw) if kw == "func" => {
                    self.bump();
                    if self.parse_function().is_err() {
                        self.recover_to_top_level();
                    }
                }
                other => {
                    self.error_here("PAR0002", format!("expected top-level declaration, found {}", other.describe()));
                    self.recover_to_top_level();
                    if matches!(self.current(), Tok::Eof) {
                        break;
                    }
                }
            }
        }
    }

    fn parse_version_line(&mut self) {
        if !matches!(self.current(), Tok::Ident(kw) if kw == "il") {
            self.error_here("PAR0006", "module must start with a version line: il <major>.<minor>.<patch>");
            return;
        }
        self.bump();
        let pos = self.position();
        let version = match self.bump().clone() {
            Tok::Version(text) => Version::parse(&text),
            _ => None,
        };
        match version {
            Some(version) if CURRENT_VERSION.is_compatible_with(&version) => {
                if version.minor > CURRENT_VERSION.minor {
                    self.diags.add(
                        Diagnostic::warning(
                            "PAR0006",
                            format!("module schema version {} is newer than supported {}", version, CURRENT_VERSION),
                        )
                        .at(pos),
                    );
                }
                self.module.version = version;
            }
            Some(version) => {
                self.diags.add(
                    Diagnostic::error(
                        "PAR0006",
                        format!("unsupported schema major version {} (supported: {})", version, CURRENT_VERSION),
                    )
                    .at(pos),
                );
            }
            None => self.error_here("PAR0006", "malformed version number"),
        }
    }

    /// Skip forward to the next top-level declaration keyword
    fn recover_to_top_level(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.current() {
                Tok::Eof => return,
                Tok::LBrace => {
                    depth += 1;
                    self.bump();
                }
                Tok::RBrace => {
                    depth = depth.saturating_sub(1);
                    self.bump();
                }
                Tok::Ident(kw) if depth == 0 && matches!(kw.as_str(), "func" | "extern" | "global") => return,
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn parse_extern(&mut self) -> Result<(), ()> {
        let name = self.expect_at_name()?;
        self.expect(&Tok::LParen)?;
        let mut params = Vec::new();
        if !self.eat(&Tok::RParen) {
            loop {
                params.push(self.expect_type()?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect(&Tok::RParen)?;
        }
        self.expect(&Tok::Arrow)?;
        let ret = self.expect_type()?;

        // Slot was reserved (and sorted) by the pre-scan
        match self.module.externs.get_mut(&name) {
            Some(slot) => *slot = ExternSig { params, ret },
            None => self.error_here("PAR0008", format!("extern @{} missing from declaration scan", name)),
        }
        Ok(())
    }

    fn parse_global(&mut self) -> Result<(), ()> {
        let mutable = if matches!(self.current(), Tok::Ident(kw) if kw == "mut") {
            self.bump();
            true
        } else {
            false
        };
        let name = self.expect_at_name()?;
        self.expect(&Tok::Colon)?;
        let ty = self.expect_type()?;
        let init = if self.eat(&Tok::Assign) { Some(self.parse_const()?) } else { None };

        match self.module.globals.get_mut(&name) {
            Some(slot) => *slot = Global { ty, init, mutable },
            None => self.error_here("PAR0008", format!("global @{} missing from declaration scan", name)),
        }
        Ok(())
    }

    // ---- functions ------------------------------------------------------

    fn parse_function(&mut self) -> Result<(), ()> {
        let name = self.expect_at_name()?;
        let mut ctx = FnCtx {
            func: Function::new(name.clone(), Type::Void),
            temps: HashMap::new(),
            label_fixups: Vec::new(),
        };

        self.expect(&Tok::LParen)?;
        if !self.eat(&Tok::RParen) {
            loop {
                let pname = self.expect_percent_name()?;
                self.expect(&Tok::Colon)?;
                let ty = self.expect_type()?;
                let temp = ctx.temp(&pname);
                ctx.func.params.push(Param { temp, ty });
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect(&Tok::RParen)?;
        }
        self.expect(&Tok::Arrow)?;
        ctx.func.ret = self.expect_type()?;

        while let Tok::Ident(attr) = self.current().clone() {
            match attr.as_str() {
                "noreturn" => {
                    ctx.func.attrs.noreturn = true;
                    self.bump();
                }
                other => {
                    self.error_here("PAR0008", format!("unknown function attribute '{}'", other));
                    return Err(());
                }
            }
        }

        self.expect(&Tok::LBrace)?;
        while !self.eat(&Tok::RBrace) {
            if matches!(self.current(), Tok::Eof) {
                self.error_here("PAR0002", "unexpected end of file inside function body");
                return Err(());
            }
            self.parse_block(&mut ctx)?;
        }

        self.fixup_labels(&mut ctx)?;
        if !self.filled_funcs.insert(name.clone()) {
            self.error_here("PAR0007", format!("duplicate function name: @{}", name));
            return Err(());
        }
        match self.module.functions.get_mut(&name) {
            Some(slot) => *slot = ctx.func,
            None => self.error_here("PAR0008", format!("function @{} missing from declaration scan", name)),
        }
        Ok(())
    }

    fn parse_block(&mut self, ctx: &mut FnCtx) -> Result<(), ()> {
        let label = match self.bump().clone() {
            Tok::Ident(label) => label,
            other => {
                self.error_here("PAR0002", format!("expected block label, found {}", other.describe()));
                return Err(());
            }
        };
        if ctx.func.block_id(&label).is_some() {
            self.error_here("PAR0007", format!("duplicate block label '{}'", label));
            return Err(());
        }

        let mut block = Block::new(label);
        let is_entry = ctx.func.blocks.is_empty();
        if self.eat(&Tok::LParen) {
            if is_entry {
                self.error_here("PAR0008", "entry block parameters are declared on the function signature");
                return Err(());
            }
            if !self.eat(&Tok::RParen) {
                loop {
                    let pname = self.expect_percent_name()?;
                    self.expect(&Tok::Colon)?;
                    let ty = self.expect_type()?;
                    let temp = ctx.temp(&pname);
                    block.params.push(BlockParam { temp, ty });
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(&Tok::RParen)?;
            }
        }
        self.expect(&Tok::Colon)?;
        if is_entry {
            block.params = ctx.func.entry_params();
        }

        let block_idx = ctx.func.blocks.len();
        ctx.func.blocks.push(block);

        // Instructions until the next block header or the closing brace
        while !matches!(self.current(), Tok::RBrace | Tok::Eof) && !self.at_block_header() {
            let instr = self.parse_instr(ctx, block_idx)?;
            ctx.func.blocks[block_idx].instrs.push(instr);
        }
        Ok(())
    }

    fn at_block_header(&self) -> bool {
        matches!(self.current(), Tok::Ident(_))
            && matches!(
                self.toks.get(self.index + 1).map(|(t, _)| t),
                Some(Tok::Colon) | Some(Tok::LParen)
            )
    }

    // ---- instructions ---------------------------------------------------

    fn parse_instr(&mut self, ctx: &mut FnCtx, block_idx: usize) -> Result<Instr, ()> {
        let result = if let Tok::Percent(name) = self.current().clone() {
            self.bump();
            self.expect(&Tok::Assign)?;
            Some(ctx.temp(&name))
        } else {
            None
        };

        let mnemonic_pos = self.position();
        let mnemonic = match self.bump().clone() {
            Tok::Ident(m) => m,
            other => {
                self.error_here("PAR0002", format!("expected opcode, found {}", other.describe()));
                return Err(());
            }
        };
        let op = match Opcode::from_mnemonic(&mnemonic) {
            Some(op) => op,
            None => {
                self.diags
                    .add(Diagnostic::error("PAR0003", format!("unknown opcode '{}'", mnemonic)).at(mnemonic_pos));
                return Err(());
            }
        };

        let mut instr = Instr::new(op);
        instr.result = result;
        let instr_idx = ctx.func.blocks[block_idx].instrs.len();

        match op {
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
                instr.operands.push(self.parse_operand(ctx)?);
                match self.bump().clone() {
                    Tok::Ident(kw) if kw == "to" => {}
                    other => {
                        self.error_here("PAR0002", format!("expected 'to', found {}", other.describe()));
                        return Err(());
                    }
                }
                instr.ty = Some(self.expect_type()?);
            }
            Opcode::Load => {
                instr.ty = Some(self.expect_type()?);
                self.expect(&Tok::Comma)?;
                instr.operands.push(self.parse_operand(ctx)?);
            }
            Opcode::Call => {
                let callee_pos = self.position();
                let callee = self.parse_operand(ctx)?;
                if !matches!(callee, Operand::Func(_) | Operand::Extern(_)) {
                    self.diags.add(
                        Diagnostic::error("PAR0004", "call target must be a function or extern").at(callee_pos),
                    );
                    return Err(());
                }
                instr.operands.push(callee);
                self.parse_call_args(ctx, &mut instr)?;
            }
            Opcode::CallIndirect => {
                instr.operands.push(self.parse_operand(ctx)?);
                self.parse_call_args(ctx, &mut instr)?;
                self.expect(&Tok::Arrow)?;
                instr.ty = Some(self.expect_type()?);
            }
            Opcode::Br => {
                self.parse_target(ctx, &mut instr, block_idx, instr_idx)?;
            }
            Opcode::Cbr => {
                instr.operands.push(self.parse_operand(ctx)?);
                self.expect(&Tok::Comma)?;
                self.parse_target(ctx, &mut instr, block_idx, instr_idx)?;
                self.expect(&Tok::Comma)?;
                self.parse_target(ctx, &mut instr, block_idx, instr_idx)?;
            }
            Opcode::Switch => {
                instr.operands.push(self.parse_operand(ctx)?);
                self.expect(&Tok::Comma)?;
                self.parse_target(ctx, &mut instr, block_idx, instr_idx)?;
                self.expect(&Tok::LBracket)?;
                if !self.eat(&Tok::RBracket) {
                    loop {
                        instr.operands.push(self.parse_operand(ctx)?);
                        match self.bump().clone() {
                            Tok::Arrow => {}
                            other => {
                                self.error_here("PAR0002", format!("expected '->', found {}", other.describe()));
                                return Err(());
                            }
                        }
                        self.parse_target(ctx, &mut instr, block_idx, instr_idx)?;
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                    self.expect(&Tok::RBracket)?;
                }
            }
            Opcode::Ret => {
                if self.at_operand_start() {
                    instr.operands.push(self.parse_operand(ctx)?);
                }
            }
            Opcode::TrapFromErr => {
                // kind: either a TrapKind name or an i32 constant
                match self.current().clone() {
                    Tok::Ident(name) if TrapKind::from_name(&name).is_some() => {
                        self.bump();
                        let kind = TrapKind::from_name(&name).unwrap();
                        instr.operands.push(Const::i32(kind.code()).into());
                    }
                    _ => instr.operands.push(self.parse_operand(ctx)?),
                }
                self.expect(&Tok::Comma)?;
                instr.operands.push(self.parse_operand(ctx)?);
            }
            Opcode::EhPush => {
                self.parse_bare_target(ctx, &mut instr, block_idx, instr_idx)?;
            }
            Opcode::ResumeLabel => {
                instr.operands.push(self.parse_operand(ctx)?);
                self.expect(&Tok::Comma)?;
                self.parse_bare_target(ctx, &mut instr, block_idx, instr_idx)?;
            }
            _ => {
                // Fixed-arity ops: the schema row gives the operand count
                let arity = op.info().operands.len();
                for i in 0..arity {
                    if i > 0 {
                        self.expect(&Tok::Comma)?;
                    }
                    instr.operands.push(self.parse_operand(ctx)?);
                }
            }
        }

        if self.eat(&Tok::Bang) {
            match self.bump().clone() {
                Tok::Ident(kw) if kw == "line" => {}
                other => {
                    self.error_here("PAR0002", format!("expected 'line', found {}", other.describe()));
                    return Err(());
                }
            }
            match self.bump().clone() {
                Tok::Int(text) => match text.parse::<u32>() {
                    Ok(line) => instr.line = Some(line),
                    Err(_) => {
                        self.error_here("PAR0005", format!("malformed line number '{}'", text));
                        return Err(());
                    }
                },
                other => {
                    self.error_here("PAR0002", format!("expected line number, found {}", other.describe()));
                    return Err(());
                }
            }
        }

        Ok(instr)
    }

    fn parse_call_args(&mut self, ctx: &mut FnCtx, instr: &mut Instr) -> Result<(), ()> {
        self.expect(&Tok::LParen)?;
        if !self.eat(&Tok::RParen) {
            loop {
                instr.operands.push(self.parse_operand(ctx)?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect(&Tok::RParen)?;
        }
        Ok(())
    }

    fn parse_target(
        &mut self,
        ctx: &mut FnCtx,
        instr: &mut Instr,
        block_idx: usize,
        instr_idx: usize,
    ) -> Result<(), ()> {
        let pos = self.position();
        let label = match self.bump().clone() {
            Tok::Caret(label) => label,
            other => {
                self.error_here("PAR0002", format!("expected block target, found {}", other.describe()));
                return Err(());
            }
        };
        let mut target = BranchTarget::new(crate::value::BlockId(u32::MAX));
        if self.eat(&Tok::LParen) && !self.eat(&Tok::RParen) {
            loop {
                target.args.push(self.parse_operand(ctx)?);
                if !self.eat(&Tok::Comma) {
                    break;
                }
            }
            self.expect(&Tok::RParen)?;
        }
        let target_idx = instr.targets.len();
        instr.targets.push(target);
        ctx.label_fixups.push((block_idx, instr_idx, target_idx, label, pos));
        Ok(())
    }

    fn parse_bare_target(
        &mut self,
        ctx: &mut FnCtx,
        instr: &mut Instr,
        block_idx: usize,
        instr_idx: usize,
    ) -> Result<(), ()> {
        let pos = self.position();
        let label = match self.bump().clone() {
            Tok::Caret(label) => label,
            other => {
                self.error_here("PAR0002", format!("expected block target, found {}", other.describe()));
                return Err(());
            }
        };
        let target_idx = instr.targets.len();
        instr.targets.push(BranchTarget::new(crate::value::BlockId(u32::MAX)));
        ctx.label_fixups.push((block_idx, instr_idx, target_idx, label, pos));
        Ok(())
    }

    fn fixup_labels(&mut self, ctx: &mut FnCtx) -> Result<(), ()> {
        let mut failed = false;
        for (block_idx, instr_idx, target_idx, label, pos) in std::mem::take(&mut ctx.label_fixups) {
            match ctx.func.block_id(&label) {
                Some(id) => {
                    ctx.func.blocks[block_idx].instrs[instr_idx].targets[target_idx].block = id;
                }
                None => {
                    self.diags.add(
                        Diagnostic::error("PAR0004", format!("branch to unknown block '^{}'", label)).at(pos),
                    );
                    failed = true;
                }
            }
        }
        if failed {
            Err(())
        } else {
            Ok(())
        }
    }

    // ---- operands -------------------------------------------------------

    fn at_operand_start(&self) -> bool {
        match self.current() {
            Tok::Percent(_) | Tok::Int(_) | Tok::Float(_) | Tok::Str(_) | Tok::AtName(_) => true,
            Tok::Ident(name) => matches!(name.as_str(), "null" | "inf" | "nan"),
            _ => false,
        }
    }

    fn parse_operand(&mut self, ctx: &mut FnCtx) -> Result<Operand, ()> {
        match self.current().clone() {
            Tok::Percent(name) => {
                self.bump();
                Ok(Operand::Temp(ctx.temp(&name)))
            }
            Tok::AtName(name) => {
                let pos = self.position();
                self.bump();
                // Every declared function already has a slot, so forward
                // references resolve here.
                if let Some(id) = self.module.func_id(&name) {
                    Ok(Operand::Func(id))
                } else if let Some(id) = self.module.extern_id(&name) {
                    Ok(Operand::Extern(id))
                } else if let Some(id) = self.module.global_id(&name) {
                    Ok(Operand::Global(id))
                } else {
                    self.diags
                        .add(Diagnostic::error("PAR0004", format!("unknown symbol '@{}'", name)).at(pos));
                    Err(())
                }
            }
            Tok::Int(text) => {
                self.bump();
                if self.eat(&Tok::Colon) {
                    let ty = self.expect_type()?;
                    self.int_const(&text, ty)
                } else {
                    // Bare integers default to i64
                    self.int_const(&text, Type::I64)
                }
            }
            Tok::Float(text) => {
                self.bump();
                self.expect(&Tok::Colon)?;
                let ty = self.expect_type()?;
                self.float_const(&text, ty)
            }
            Tok::Str(value) => {
                self.bump();
                self.expect(&Tok::Colon)?;
                let ty = self.expect_type()?;
                if ty != Type::Str {
                    self.error_here("PAR0005", format!("string literal typed as {}", ty));
                    return Err(());
                }
                let id = self.module.intern_str(value);
                Ok(Operand::Const(Const::Str(id)))
            }
            Tok::Ident(name) if name == "null" => {
                self.bump();
                self.expect(&Tok::Colon)?;
                let ty = self.expect_type()?;
                if ty != Type::Ptr {
                    self.error_here("PAR0005", format!("null typed as {}", ty));
                    return Err(());
                }
                Ok(Operand::Const(Const::Null))
            }
            Tok::Ident(name) if name == "inf" || name == "nan" => {
                self.bump();
                self.expect(&Tok::Colon)?;
                let ty = self.expect_type()?;
                self.float_const(&name, ty)
            }
            other => {
                self.error_here("PAR0002", format!("expected operand, found {}", other.describe()));
                Err(())
            }
        }
    }

    fn int_const(&mut self, text: &str, ty: Type) -> Result<Operand, ()> {
        if !ty.is_int() {
            self.error_here("PAR0005", format!("integer literal typed as {}", ty));
            return Err(());
        }
        let width = ty.bit_width().unwrap();
        let bits = if ty.is_unsigned_int() {
            match text.parse::<u64>() {
                Ok(v) if width == 64 || v < (1u64 << width) => v as i64,
                _ => {
                    self.error_here("PAR0005", format!("'{}' out of range for {}", text, ty));
                    return Err(());
                }
            }
        } else {
            match text.parse::<i64>() {
                Ok(v) if in_signed_range(v, width) => v,
                _ => {
                    self.error_here("PAR0005", format!("'{}' out of range for {}", text, ty));
                    return Err(());
                }
            }
        };
        Ok(Operand::Const(Const::Int { ty, bits }))
    }

    fn float_const(&mut self, text: &str, ty: Type) -> Result<Operand, ()> {
        if !ty.is_float() {
            self.error_here("PAR0005", format!("float literal typed as {}", ty));
            return Err(());
        }
        match text.parse::<f64>() {
            Ok(value) => Ok(Operand::Const(Const::Float { ty, value })),
            Err(_) => {
                self.error_here("PAR0005", format!("malformed float literal '{}'", text));
                Err(())
            }
        }
    }

    /// A constant in global-initializer position (no temps or symbols)
    fn parse_const(&mut self) -> Result<Const, ()> {
        let operand = match self.current().clone() {
            Tok::Int(text) => {
                self.bump();
                if self.eat(&Tok::Colon) {
                    let ty = self.expect_type()?;
                    self.int_const(&text, ty)?
                } else {
                    self.int_const(&text, Type::I64)?
                }
            }
            Tok::Float(text) => {
                self.bump();
                self.expect(&Tok::Colon)?;
                let ty = self.expect_type()?;
                self.float_const(&text, ty)?
            }
            Tok::Str(value) => {
                self.bump();
                self.expect(&Tok::Colon)?;
                let ty = self.expect_type()?;
                if ty != Type::Str {
                    self.error_here("PAR0005", format!("string literal typed as {}", ty));
                    return Err(());
                }
                Operand::Const(Const::Str(self.module.intern_str(value)))
            }
            Tok::Ident(name) if name == "null" => {
                self.bump();
                self.expect(&Tok::Colon)?;
                let ty = self.expect_type()?;
                if ty != Type::Ptr {
                    self.error_here("PAR0005", format!("null typed as {}", ty));
                    return Err(());
                }
                Operand::Const(Const::Null)
            }
            Tok::Ident(name) if name == "inf" || name == "nan" => {
                self.bump();
                self.expect(&Tok::Colon)?;
                let ty = self.expect_type()?;
                self.float_const(&name, ty)?
            }
            other => {
                self.error_here("PAR0005", format!("expected constant, found {}", other.describe()));
                return Err(());
            }
        };
        match operand {
            Operand::Const(c) => Ok(c),
            _ => Err(()),
        }
    }

    // ---- small expectation helpers --------------------------------------

    fn expect_at_name(&mut self) -> Result<String, ()> {
        match self.bump().clone() {
            Tok::AtName(name) => Ok(name),
            other => {
                self.error_here("PAR0002", format!("expected @name, found {}", other.describe()));
                Err(())
            }
        }
    }

    fn expect_percent_name(&mut self) -> Result<String, ()> {
        match self.bump().clone() {
            Tok::Percent(name) => Ok(name),
            other => {
                self.error_here("PAR0002", format!("expected %name, found {}", other.describe()));
                Err(())
            }
        }
    }

    fn expect_type(&mut self) -> Result<Type, ()> {
        match self.bump().clone() {
            Tok::Ident(name) => match Type::from_name(&name) {
                Some(ty) => Ok(ty),
                None => {
                    self.error_here("PAR0005", format!("unknown type '{}'", name));
                    Err(())
                }
            },
            other => {
                self.error_here("PAR0002", format!("expected type, found {}", other.describe()));
                Err(())
            }
        }
    }
}

fn in_signed_range(v: i64, width: u32) -> bool {
    match width {
        1 => v == 0 || v == 1,
        64 => true,
        w => {
            let min = -(1i64 << (w - 1));
            let max = (1i64 << (w - 1)) - 1;
            v >= min && v <= max
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::print_module;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_minimal_module() {
        let module = parse_module("il 0.1.0\nfunc @main() -> i32 {\nentry:\n  ret 0:i32\n}\n").unwrap();
        assert_eq!(module.functions.len(), 1);
        let func = module.function_by_name("main").unwrap();
        assert_eq!(func.ret, Type::I32);
        assert_eq!(func.blocks.len(), 1);
        assert_eq!(func.blocks[0].instrs.len(), 1);
        assert_eq!(func.blocks[0].instrs[0].op, Opcode::Ret);
    }

    #[test]
    fn test_parse_params_and_temps() {
        let text = "\
il 0.1.0

func @add(%x: i64, %y: i64) -> i64 {
entry:
  %r = iadd %x, %y
  ret %r
}
";
        let module = parse_module(text).unwrap();
        let func = module.function_by_name("add").unwrap();
        assert_eq!(func.params.len(), 2);
        assert_eq!(func.temp_count(), 3);
        // entry params mirror the signature
        assert_eq!(func.blocks[0].params.len(), 2);
        assert_eq!(print_module(&module), text);
    }

    #[test]
    fn test_parse_branches_with_args() {
        let text = "\
il 0.1.0

func @main() -> i64 {
entry:
  %c = icmp.eq 1:i64, 2:i64
  cbr %c, ^yes(1:i64), ^no(0:i64)
yes(%a: i64):
  ret %a
no(%b: i64):
  ret %b
}
";
        let module = parse_module(text).unwrap();
        assert_eq!(print_module(&module), text);
    }

    #[test]
    fn test_parse_forward_call() {
        let text = "\
il 0.1.0

func @main() -> i64 {
entry:
  %r = call @helper(3:i64)
  ret %r
}

func @helper(%n: i64) -> i64 {
entry:
  ret %n
}
";
        let module = parse_module(text).unwrap();
        let main = module.function_by_name("main").unwrap();
        let callee = main.blocks[0].instrs[0].operands[0];
        assert_eq!(callee, Operand::Func(crate::value::FuncId(1)));
        assert_eq!(print_module(&module), text);
    }

    #[test]
    fn test_externs_sorted_on_parse() {
        let text = "\
il 0.1.0

extern @rt_z(str) -> void
extern @rt_a(str) -> void

func @main() -> void {
entry:
  ret
}
";
        let module = parse_module(text).unwrap();
        let names: Vec<&String> = module.externs.keys().collect();
        assert_eq!(names, vec!["rt_a", "rt_z"]);
    }

    #[test]
    fn test_parse_switch_and_line_attrs() {
        let text = "\
il 0.1.0

func @main(%x: i32) -> i32 {
entry:
  switch %x, ^other [ 0:i32 -> ^zero, 1:i32 -> ^one ] !line 12
zero:
  ret 100:i32
one:
  ret 200:i32
other:
  ret -1:i32
}
";
        let module = parse_module(text).unwrap();
        let func = module.function_by_name("main").unwrap();
        let switch = &func.blocks[0].instrs[0];
        assert_eq!(switch.op, Opcode::Switch);
        assert_eq!(switch.targets.len(), 3);
        assert_eq!(switch.line, Some(12));
        assert_eq!(print_module(&module), text);
    }

    #[test]
    fn test_parse_eh_and_trap_kinds() {
        let text = "\
il 0.1.0

func @main() -> i32 {
entry:
  eh.push ^h
  %q = sdiv.chk0 10:i32, 0:i32
  eh.pop
  ret 0:i32
h(%err: error, %tok: resume_tok):
  trap.from_err DivideByZero, 0:i32
}
";
        let module = parse_module(text).unwrap();
        let func = module.function_by_name("main").unwrap();
        let from_err = &func.blocks[1].instrs[0];
        assert_eq!(
            from_err.operands[0],
            Operand::Const(Const::i32(TrapKind::DivideByZero.code()))
        );
        assert_eq!(print_module(&module), text);
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let err = parse_module("il 1.0.0\n").unwrap_err();
        assert!(err.has_errors());
        assert_eq!(err.messages[0].code, "PAR0006");
    }

    #[test]
    fn test_recovery_reports_multiple_functions() {
        let text = "\
il 0.1.0

func @bad1() -> i32 {
entry:
  %q = frobnicate 1:i32
}

func @bad2() -> i32 {
entry:
  ret @missing
}
";
        let err = parse_module(text).unwrap_err();
        let codes: Vec<&str> = err.messages.iter().map(|d| d.code.as_str()).collect();
        assert!(codes.contains(&"PAR0003"), "unknown opcode reported: {:?}", codes);
        assert!(codes.contains(&"PAR0004"), "unknown symbol reported: {:?}", codes);
    }

    #[test]
    fn test_out_of_range_constant() {
        let err = parse_module("il 0.1.0\nfunc @f() -> i8 {\nentry:\n  ret 300:i8\n}\n").unwrap_err();
        assert_eq!(err.messages[0].code, "PAR0005");
    }

    #[test]
    fn test_string_literal_interning() {
        let text = "\
il 0.1.0

extern @rt_print_str(str) -> void

func @main() -> void {
entry:
  call @rt_print_str(\"hi\\n\":str)
  call @rt_print_str(\"hi\\n\":str)
  ret
}
";
        let module = parse_module(text).unwrap();
        assert_eq!(module.strings.len(), 1);
        assert_eq!(print_module(&module), text);
    }
}
