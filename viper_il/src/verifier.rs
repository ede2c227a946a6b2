//! Module verifier
//!
//! Runs the fixed checklist every module must pass before execution or
//! lowering: structure, schema typing, SSA single-assignment and dominance,
//! control flow, exception-handling scope, and runtime-call signatures.
//! Downstream components may assume a verified module.

use crate::cfg::Cfg;
use crate::dom::DomTree;
use crate::function::Function;
use crate::instr::Instr;
use crate::module::Module;
use crate::opcode::{Opcode, OperandRule, ResultRule};
use crate::registry::Registry;
use crate::trap::TrapKind;
use crate::types::Type;
use crate::value::{BlockId, Operand, TempId};
use std::collections::{HashMap, HashSet, VecDeque};
use viper_common::{Diagnostic, Diagnostics};

/// Verify a module against the registry; returns all diagnostics produced.
///
/// The module passes verification iff the result has no errors (warnings,
/// e.g. unreachable blocks, do not gate).
pub fn verify_module(module: &Module, registry: &Registry) -> Diagnostics {
    let mut diags = Diagnostics::new();

    check_externs(module, registry, &mut diags);
    check_globals(module, &mut diags);
    for function in module.functions.values() {
        FnVerifier::new(module, function, &mut diags).verify();
    }

    if diags.has_errors() {
        log::debug!(
            "verification failed with {} error(s) for module with {} function(s)",
            diags.error_count(),
            module.functions.len()
        );
    }
    diags
}

/// Convenience wrapper returning `Err` when verification fails
pub fn verify_ok(module: &Module, registry: &Registry) -> Result<(), Diagnostics> {
    let diags = verify_module(module, registry);
    if diags.has_errors() {
        Err(diags)
    } else {
        Ok(())
    }
}

fn check_externs(module: &Module, registry: &Registry, diags: &mut Diagnostics) {
    for (name, sig) in &module.externs {
        match registry.get(name) {
            None => diags.add(Diagnostic::error(
                "VER0601",
                format!("extern @{} is not in the runtime signature registry", name),
            )),
            Some(entry) if !entry.matches(sig) => diags.add(Diagnostic::error(
                "VER0602",
                format!("extern @{} signature disagrees with the registry", name),
            )),
            Some(_) => {}
        }
    }
}

fn check_globals(module: &Module, diags: &mut Diagnostics) {
    for (name, global) in &module.globals {
        if !(global.ty.is_scalar() || matches!(global.ty, Type::Ptr | Type::Str)) {
            diags.add(Diagnostic::error(
                "VER0702",
                format!("global @{} has non-storable type {}", name, global.ty),
            ));
        }
        if let Some(init) = &global.init {
            if init.ty() != global.ty {
                diags.add(Diagnostic::error(
                    "VER0701",
                    format!("global @{} initializer has type {}, expected {}", name, init.ty(), global.ty),
                ));
            }
        }
    }
}

/// Definition site of an SSA temp: the block plus the instruction index, or
/// `None` for block parameters (defined at block entry)
type DefSite = (BlockId, Option<usize>);

struct FnVerifier<'a> {
    module: &'a Module,
    func: &'a Function,
    diags: &'a mut Diagnostics,
    def_site: Vec<Option<DefSite>>,
    temp_ty: Vec<Option<Type>>,
}

impl<'a> FnVerifier<'a> {
    fn new(module: &'a Module, func: &'a Function, diags: &'a mut Diagnostics) -> Self {
        let temps = func.temp_count();
        Self { module, func, diags, def_site: vec![None; temps], temp_ty: vec![None; temps] }
    }

    fn error(&mut self, code: &str, block: Option<BlockId>, instr: Option<usize>, message: String) {
        let mut diag = Diagnostic::error(code, message).in_function(&self.func.name);
        if let Some(block) = block.and_then(|b| self.func.block(b)) {
            diag = diag.in_block(&block.label);
        }
        if let Some(index) = instr {
            diag = diag.at_instruction(index);
        }
        self.diags.add(diag);
    }

    fn verify(&mut self) {
        if !self.check_structure() {
            return;
        }

        let cfg = Cfg::build(self.func);
        let dom = DomTree::build(&cfg);

        for (index, block) in self.func.blocks.iter().enumerate() {
            if !cfg.is_reachable(BlockId(index as u32)) {
                log::warn!("@{}: block '{}' is unreachable", self.func.name, block.label);
                self.diags.add(
                    Diagnostic::warning("VER0900", format!("block '{}' is unreachable", block.label))
                        .in_function(&self.func.name)
                        .in_block(&block.label),
                );
            }
        }

        self.check_types(&cfg);
        self.check_dominance(&cfg, &dom);
        self.check_eh(&cfg);
    }

    // ---- structure ------------------------------------------------------

    fn check_structure(&mut self) -> bool {
        if self.func.blocks.is_empty() {
            self.error("VER0101", None, None, "function has no blocks".to_string());
            return false;
        }

        let mut ok = true;
        let mut labels = HashSet::new();
        for block in &self.func.blocks {
            if !labels.insert(block.label.as_str()) {
                self.error("VER0106", None, None, format!("duplicate block label '{}'", block.label));
                ok = false;
            }
        }

        // Entry parameters are the function parameters
        let entry = &self.func.blocks[0];
        let matches_params = entry.params.len() == self.func.params.len()
            && entry
                .params
                .iter()
                .zip(&self.func.params)
                .all(|(bp, fp)| bp.temp == fp.temp && bp.ty == fp.ty);
        if !matches_params {
            self.error(
                "VER0104",
                Some(BlockId(0)),
                None,
                "entry block parameters do not match the function parameters".to_string(),
            );
            ok = false;
        }

        for (block_index, block) in self.func.blocks.iter().enumerate() {
            let block_id = BlockId(block_index as u32);
            if block.instrs.is_empty() {
                self.error("VER0105", Some(block_id), None, "block has no terminator".to_string());
                ok = false;
                continue;
            }
            for (index, instr) in block.instrs.iter().enumerate() {
                let is_last = index + 1 == block.instrs.len();
                if instr.is_terminator() != is_last {
                    let code = if is_last { "VER0105" } else { "VER0107" };
                    let message = if is_last {
                        format!("block must end with a terminator, found '{}'", instr.op)
                    } else {
                        format!("terminator '{}' in the middle of a block", instr.op)
                    };
                    self.error(code, Some(block_id), Some(index), message);
                    ok = false;
                }
                if !self.check_shape(block_id, index, instr) {
                    ok = false;
                }
                if !self.check_ids(block_id, index, instr) {
                    ok = false;
                }
            }

            // Register definitions: block params then instruction results
            for param in &block.params {
                self.define(param.temp, (block_id, None), param.ty, &mut ok);
            }
            for (index, instr) in block.instrs.iter().enumerate() {
                if let Some(result) = instr.result {
                    if result.index() >= self.def_site.len() {
                        continue; // reported by check_ids
                    }
                    // Result type is filled in during the typing pass
                    if self.def_site[result.index()].is_some() {
                        self.error(
                            "VER0301",
                            Some(block_id),
                            Some(index),
                            format!("temp %{} defined more than once", self.func.temp_name(result)),
                        );
                        ok = false;
                    } else {
                        self.def_site[result.index()] = Some((block_id, Some(index)));
                    }
                }
            }
        }
        ok
    }

    fn define(&mut self, temp: TempId, site: DefSite, ty: Type, ok: &mut bool) {
        if temp.index() >= self.def_site.len() {
            self.error("VER0109", Some(site.0), site.1, format!("temp id {} out of range", temp.0));
            *ok = false;
            return;
        }
        if self.def_site[temp.index()].is_some() {
            self.error(
                "VER0301",
                Some(site.0),
                site.1,
                format!("temp %{} defined more than once", self.func.temp_name(temp)),
            );
            *ok = false;
            return;
        }
        self.def_site[temp.index()] = Some(site);
        self.temp_ty[temp.index()] = Some(ty);
    }

    /// Every id an instruction carries must be in range before the deeper
    /// passes index with it. Textual input cannot violate this; hand-built
    /// modules can.
    fn check_ids(&mut self, block_id: BlockId, index: usize, instr: &Instr) -> bool {
        let mut ok = true;
        let temp_count = self.func.temp_count() as u32;
        let mut check_temp = |this: &mut Self, temp: TempId, ok: &mut bool| {
            if temp.0 >= temp_count {
                this.error(
                    "VER0109",
                    Some(block_id),
                    Some(index),
                    format!("temp id {} out of range", temp.0),
                );
                *ok = false;
            }
        };

        if let Some(result) = instr.result {
            check_temp(self, result, &mut ok);
        }
        let operands = instr.operands.iter().chain(instr.targets.iter().flat_map(|t| t.args.iter()));
        for operand in operands {
            match operand {
                Operand::Temp(temp) => check_temp(self, *temp, &mut ok),
                Operand::Func(id) if self.module.function(*id).is_none() => {
                    self.error("VER0110", Some(block_id), Some(index), "function reference out of range".to_string());
                    ok = false;
                }
                Operand::Extern(id) if self.module.extern_sig(*id).is_none() => {
                    self.error("VER0110", Some(block_id), Some(index), "extern reference out of range".to_string());
                    ok = false;
                }
                Operand::Global(id) if self.module.global(*id).is_none() => {
                    self.error("VER0110", Some(block_id), Some(index), "global reference out of range".to_string());
                    ok = false;
                }
                Operand::Const(crate::value::Const::Str(id))
                    if self.module.str_value(*id).is_none() =>
                {
                    self.error("VER0110", Some(block_id), Some(index), "string literal out of range".to_string());
                    ok = false;
                }
                _ => {}
            }
        }
        for target in &instr.targets {
            if target.block.index() >= self.func.blocks.len() {
                self.error(
                    "VER0108",
                    Some(block_id),
                    Some(index),
                    format!("branch target block id {} out of range", target.block.0),
                );
                ok = false;
            }
        }
        ok
    }

    /// Shape checks derivable from the schema row alone: operand and target
    /// counts, presence of the result and of the type attribute.
    fn check_shape(&mut self, block_id: BlockId, index: usize, instr: &Instr) -> bool {
        let info = instr.op.info();
        let mut ok = true;

        if !info.is_variadic() && instr.operands.len() != info.operands.len() {
            self.error(
                "VER0201",
                Some(block_id),
                Some(index),
                format!("'{}' expects {} operand(s), found {}", instr.op, info.operands.len(), instr.operands.len()),
            );
            ok = false;
        }

        let expected_targets = match instr.op {
            Opcode::Br | Opcode::EhPush | Opcode::ResumeLabel => 1,
            Opcode::Cbr => 2,
            Opcode::Switch => instr.targets.len().max(1), // default + cases
            _ => 0,
        };
        if instr.targets.len() != expected_targets {
            self.error(
                "VER0102",
                Some(block_id),
                Some(index),
                format!("'{}' expects {} target(s), found {}", instr.op, expected_targets, instr.targets.len()),
            );
            ok = false;
        }

        if instr.op.has_type_attr() && instr.ty.is_none() {
            self.error(
                "VER0103",
                Some(block_id),
                Some(index),
                format!("'{}' requires an explicit type attribute", instr.op),
            );
            ok = false;
        }

        let wants_result = match info.result {
            ResultRule::None => false,
            // Calls returning void carry no result
            ResultRule::FromTypeAttr if matches!(instr.op, Opcode::CallIndirect) => instr.ty != Some(Type::Void),
            _ => true,
        };
        // `call` result presence depends on the callee and is checked during
        // typing; everything else is schema-determined.
        if instr.op != Opcode::Call {
            if wants_result && instr.result.is_none() {
                self.error(
                    "VER0204",
                    Some(block_id),
                    Some(index),
                    format!("'{}' produces a value but has no result", instr.op),
                );
                ok = false;
            }
            if !wants_result && instr.result.is_some() {
                self.error(
                    "VER0203",
                    Some(block_id),
                    Some(index),
                    format!("'{}' produces no value but has a result", instr.op),
                );
                ok = false;
            }
        }
        ok
    }

    // ---- typing ---------------------------------------------------------

    fn operand_ty(&self, operand: &Operand) -> Option<Type> {
        match operand {
            Operand::Const(c) => Some(c.ty()),
            Operand::Temp(t) => self.temp_ty.get(t.index()).copied().flatten(),
            Operand::Func(_) | Operand::Extern(_) => Some(Type::Ptr),
            Operand::Global(g) => self.module.global(*g).map(|(_, g)| g.ty),
        }
    }

    fn check_types(&mut self, cfg: &Cfg) {
        // Reverse post-order sees definitions before dominated uses, so one
        // pass suffices once dominance holds; broken dominance surfaces as
        // unknown operand types here and precisely in check_dominance.
        for &block_id in &cfg.rpo {
            let block = &self.func.blocks[block_id.index()];
            for (index, instr) in block.instrs.iter().enumerate() {
                self.check_instr_types(block_id, index, instr);
            }
        }
    }

    fn check_instr_types(&mut self, block_id: BlockId, index: usize, instr: &Instr) {
        let info = instr.op.info();

        // Schema rules over the fixed operand prefix
        for (position, rule) in info.operands.iter().enumerate() {
            let operand = match instr.operands.get(position) {
                Some(op) => op,
                None => return, // arity error already reported
            };
            let ty = match self.operand_ty(operand) {
                Some(ty) => ty,
                None => {
                    self.use_of_unknown(block_id, index, operand);
                    continue;
                }
            };
            let fine = match rule {
                OperandRule::Exact(expected) => ty == *expected,
                OperandRule::SameAsFirst => {
                    self.operand_ty(&instr.operands[0]).map(|t| t == ty).unwrap_or(true)
                }
                OperandRule::SameAsSecond => {
                    self.operand_ty(&instr.operands[1]).map(|t| t == ty).unwrap_or(true)
                }
                OperandRule::AnyInt => ty.is_int(),
                OperandRule::AnySignedInt => ty.is_signed_int(),
                OperandRule::AnyUnsignedInt => ty.is_unsigned_int(),
                OperandRule::AnyFloat => ty.is_float(),
                OperandRule::AnyScalar => ty.is_scalar(),
                OperandRule::AnyValue => ty != Type::Void,
            };
            if !fine {
                self.error(
                    "VER0202",
                    Some(block_id),
                    Some(index),
                    format!("operand {} of '{}' has type {}, violating {:?}", position, instr.op, ty, rule),
                );
            }
        }

        // Result type per schema
        let result_ty = match info.result {
            ResultRule::None => None,
            ResultRule::Exact(ty) => Some(ty),
            ResultRule::SameAsFirst => self.operand_ty(&instr.operands[0]),
            ResultRule::SameAsSecond => instr.operands.get(1).and_then(|op| self.operand_ty(op)),
            ResultRule::Bool => Some(Type::I1),
            ResultRule::FromTypeAttr => instr.ty,
        };

        // Opcode-specific rules
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
                if let (Some(from), Some(to)) = (self.operand_ty(&instr.operands[0]), instr.ty) {
                    if !instr.op.cast_target_ok(from, to) {
                        self.error(
                            "VER0206",
                            Some(block_id),
                            Some(index),
                            format!("'{}' cannot cast {} to {}", instr.op, from, to),
                        );
                    }
                }
            }
            Opcode::Load => {
                if let Some(ty) = instr.ty {
                    if !ty.is_scalar() {
                        self.error(
                            "VER0218",
                            Some(block_id),
                            Some(index),
                            format!("load of non-scalar type {}", ty),
                        );
                    }
                }
            }
            Opcode::Call => self.check_call(block_id, index, instr),
            Opcode::Switch => self.check_switch(block_id, index, instr),
            Opcode::Ret => self.check_ret(block_id, index, instr),
            Opcode::TrapFromErr => {
                let valid = matches!(
                    instr.operands.first().and_then(|op| op.as_const()),
                    Some(crate::value::Const::Int { bits, .. }) if TrapKind::from_code(*bits as i32).is_some()
                );
                if !valid {
                    self.error(
                        "VER0217",
                        Some(block_id),
                        Some(index),
                        "trap.from_err kind must be a constant trap-kind code".to_string(),
                    );
                }
            }
            _ => {}
        }

        // Branch arguments against target parameters; `eh.push` and
        // `resume.label` targets take none (handler parameters are bound by
        // trap dispatch).
        match instr.op {
            Opcode::Br | Opcode::Cbr | Opcode::Switch => {
                for target in &instr.targets {
                    self.check_branch_args(block_id, index, target);
                }
            }
            Opcode::EhPush | Opcode::ResumeLabel => {
                for target in &instr.targets {
                    if !target.args.is_empty() {
                        self.error(
                            "VER0212",
                            Some(block_id),
                            Some(index),
                            format!("'{}' target takes no arguments", instr.op),
                        );
                    }
                    if instr.op == Opcode::ResumeLabel {
                        if let Some(target_block) = self.func.block(target.block) {
                            if !target_block.params.is_empty() {
                                self.error(
                                    "VER0213",
                                    Some(block_id),
                                    Some(index),
                                    format!("resume.label target '{}' must have no parameters", target_block.label),
                                );
                            }
                        }
                    }
                }
            }
            _ => {}
        }

        // Record the result type
        if let (Some(result), Some(ty)) = (instr.result, result_ty) {
            self.temp_ty[result.index()] = Some(ty);
        }
    }

    fn check_call(&mut self, block_id: BlockId, index: usize, instr: &Instr) {
        let (param_tys, ret): (Vec<Type>, Type) = match instr.operands.first() {
            Some(Operand::Func(id)) => match self.module.function(*id) {
                Some(callee) => (callee.params.iter().map(|p| p.ty).collect(), callee.ret),
                None => return,
            },
            Some(Operand::Extern(id)) => match self.module.extern_sig(*id) {
                Some((_, sig)) => (sig.params.clone(), sig.ret),
                None => return,
            },
            _ => {
                self.error(
                    "VER0220",
                    Some(block_id),
                    Some(index),
                    "call target must be a function or extern".to_string(),
                );
                return;
            }
        };

        let args = &instr.operands[1..];
        if args.len() != param_tys.len() {
            self.error(
                "VER0207",
                Some(block_id),
                Some(index),
                format!("call expects {} argument(s), found {}", param_tys.len(), args.len()),
            );
            return;
        }
        for (position, (arg, expected)) in args.iter().zip(&param_tys).enumerate() {
            match self.operand_ty(arg) {
                Some(ty) if ty == *expected => {}
                Some(ty) => self.error(
                    "VER0207",
                    Some(block_id),
                    Some(index),
                    format!("call argument {} has type {}, expected {}", position, ty, expected),
                ),
                None => self.use_of_unknown(block_id, index, arg),
            }
        }

        if ret == Type::Void {
            if instr.result.is_some() {
                self.error("VER0203", Some(block_id), Some(index), "void call has a result".to_string());
            }
        } else if instr.result.is_none() {
            self.error(
                "VER0204",
                Some(block_id),
                Some(index),
                format!("call returning {} must bind a result", ret),
            );
        } else if let Some(result) = instr.result {
            self.temp_ty[result.index()] = Some(ret);
        }
    }

    fn check_switch(&mut self, block_id: BlockId, index: usize, instr: &Instr) {
        let scrutinee_ty = match self.operand_ty(&instr.operands[0]) {
            Some(ty) => ty,
            None => return,
        };
        // cases: operands[1..] parallel to targets[1..]
        if instr.operands.len() != instr.targets.len() {
            self.error(
                "VER0214",
                Some(block_id),
                Some(index),
                "switch case count does not match target count".to_string(),
            );
            return;
        }
        let mut seen = HashSet::new();
        for case in &instr.operands[1..] {
            match case.as_const() {
                Some(crate::value::Const::Int { ty, bits }) if *ty == scrutinee_ty => {
                    if !seen.insert(*bits) {
                        self.error(
                            "VER0215",
                            Some(block_id),
                            Some(index),
                            format!("duplicate switch case value {}", bits),
                        );
                    }
                }
                _ => self.error(
                    "VER0214",
                    Some(block_id),
                    Some(index),
                    format!("switch case must be a {} constant", scrutinee_ty),
                ),
            }
        }
    }

    fn check_ret(&mut self, block_id: BlockId, index: usize, instr: &Instr) {
        if self.func.ret == Type::Void {
            if !instr.operands.is_empty() {
                self.error(
                    "VER0216",
                    Some(block_id),
                    Some(index),
                    "void function returns a value".to_string(),
                );
            }
            return;
        }
        match instr.operands.as_slice() {
            [value] => match self.operand_ty(value) {
                Some(ty) if ty == self.func.ret => {}
                Some(ty) => self.error(
                    "VER0216",
                    Some(block_id),
                    Some(index),
                    format!("return value has type {}, function returns {}", ty, self.func.ret),
                ),
                None => self.use_of_unknown(block_id, index, value),
            },
            _ => self.error(
                "VER0216",
                Some(block_id),
                Some(index),
                format!("function returning {} must return exactly one value", self.func.ret),
            ),
        }
    }

    fn check_branch_args(&mut self, block_id: BlockId, index: usize, target: &crate::instr::BranchTarget) {
        let target_block = match self.func.block(target.block) {
            Some(block) => block,
            None => return,
        };
        if target.args.len() != target_block.params.len() {
            self.error(
                "VER0210",
                Some(block_id),
                Some(index),
                format!(
                    "branch to '{}' carries {} argument(s), block takes {}",
                    target_block.label,
                    target.args.len(),
                    target_block.params.len()
                ),
            );
            return;
        }
        for (position, (arg, param)) in target.args.iter().zip(&target_block.params).enumerate() {
            match self.operand_ty(arg) {
                Some(ty) if ty == param.ty => {}
                Some(ty) => self.error(
                    "VER0211",
                    Some(block_id),
                    Some(index),
                    format!(
                        "argument {} to '{}' has type {}, expected {}",
                        position, target_block.label, ty, param.ty
                    ),
                ),
                None => self.use_of_unknown(block_id, index, arg),
            }
        }
    }

    fn use_of_unknown(&mut self, block_id: BlockId, index: usize, operand: &Operand) {
        if let Operand::Temp(temp) = operand {
            if self.def_site[temp.index()].is_none() {
                self.error(
                    "VER0302",
                    Some(block_id),
                    Some(index),
                    format!("use of undefined temp %{}", self.func.temp_name(*temp)),
                );
            }
            // Defined but untyped: a dominance violation reported separately
        }
    }

    // ---- SSA dominance --------------------------------------------------

    fn check_dominance(&mut self, cfg: &Cfg, dom: &DomTree) {
        let mut violations: Vec<(BlockId, usize, TempId)> = Vec::new();
        for &block_id in &cfg.rpo {
            let block = &self.func.blocks[block_id.index()];
            for (index, instr) in block.instrs.iter().enumerate() {
                let uses = instr
                    .operands
                    .iter()
                    .chain(instr.targets.iter().flat_map(|t| t.args.iter()))
                    .filter_map(|op| op.as_temp());
                for temp in uses {
                    match self.def_site[temp.index()] {
                        None => {} // undefined; reported by the typing pass
                        Some((def_block, def_index)) => {
                            let dominates = if def_block == block_id {
                                match def_index {
                                    None => true, // block parameter
                                    Some(def_index) => def_index < index,
                                }
                            } else {
                                dom.dominates(def_block, block_id)
                            };
                            if !dominates {
                                violations.push((block_id, index, temp));
                            }
                        }
                    }
                }
            }
        }
        for (block_id, index, temp) in violations {
            self.error(
                "VER0303",
                Some(block_id),
                Some(index),
                format!("use of %{} is not dominated by its definition", self.func.temp_name(temp)),
            );
        }
    }

    // ---- exception handling ---------------------------------------------

    fn check_eh(&mut self, cfg: &Cfg) {
        let handler_blocks: HashSet<BlockId> = cfg.handler_edges.iter().map(|(_, _, h)| *h).collect();

        for &handler in &handler_blocks {
            let block = &self.func.blocks[handler.index()];
            let shape_ok = block.params.len() == 2
                && block.params[0].ty == Type::Error
                && block.params[1].ty == Type::ResumeTok;
            if !shape_ok {
                self.error(
                    "VER0501",
                    Some(handler),
                    None,
                    format!("handler block '{}' must have parameters (error, resume_tok)", block.label),
                );
            }
            if handler == BlockId(0) {
                self.error("VER0509", Some(handler), None, "entry block cannot be a handler".to_string());
            }
        }

        // Handlers are entered by trap dispatch only, never by a branch
        for (block_index, block) in self.func.blocks.iter().enumerate() {
            for (index, instr) in block.instrs.iter().enumerate() {
                if matches!(instr.op, Opcode::Br | Opcode::Cbr | Opcode::Switch | Opcode::ResumeLabel) {
                    for target in &instr.targets {
                        if handler_blocks.contains(&target.block) {
                            self.error(
                                "VER0502",
                                Some(BlockId(block_index as u32)),
                                Some(index),
                                format!(
                                    "branch to handler block '{}'",
                                    self.func.blocks[target.block.index()].label
                                ),
                            );
                        }
                    }
                }
            }
        }

        self.check_eh_balance(cfg, &handler_blocks);
        self.check_handler_regions(cfg, &handler_blocks);
    }

    /// Static `eh.push`/`eh.pop` balance along all normal paths from entry.
    /// Handler-region blocks are exempt: unwinding releases their entries on
    /// frame pop.
    fn check_eh_balance(&mut self, cfg: &Cfg, handler_blocks: &HashSet<BlockId>) {
        let mut depth_in: HashMap<BlockId, i32> = HashMap::new();
        let mut queue = VecDeque::new();
        depth_in.insert(BlockId(0), 0);
        queue.push_back(BlockId(0));

        while let Some(block_id) = queue.pop_front() {
            let mut depth = depth_in[&block_id];
            let block = &self.func.blocks[block_id.index()];
            for (index, instr) in block.instrs.iter().enumerate() {
                match instr.op {
                    Opcode::EhPush => depth += 1,
                    Opcode::EhPop => {
                        if depth == 0 {
                            self.error(
                                "VER0503",
                                Some(block_id),
                                Some(index),
                                "eh.pop without a matching eh.push".to_string(),
                            );
                            return;
                        }
                        depth -= 1;
                    }
                    Opcode::Ret => {
                        if depth != 0 {
                            self.error(
                                "VER0504",
                                Some(block_id),
                                Some(index),
                                format!("return with {} unpopped handler(s)", depth),
                            );
                        }
                    }
                    _ => {}
                }
            }

            let Some(term) = block.instrs.last() else { continue };
            if !matches!(term.op, Opcode::Br | Opcode::Cbr | Opcode::Switch) {
                continue;
            }
            for target in &term.targets {
                if handler_blocks.contains(&target.block) {
                    continue;
                }
                match depth_in.get(&target.block) {
                    Some(existing) if *existing != depth => {
                        self.error(
                            "VER0505",
                            Some(target.block),
                            None,
                            format!(
                                "block '{}' is reached with handler depths {} and {}",
                                self.func.blocks[target.block.index()].label,
                                existing,
                                depth
                            ),
                        );
                    }
                    Some(_) => {}
                    None => {
                        depth_in.insert(target.block, depth);
                        queue.push_back(target.block);
                    }
                }
            }
        }
    }

    /// Blocks reachable from each handler via normal edges form that
    /// handler's region; EH-only ops live there, and every `resume.*` must
    /// consume exactly the region's own token parameter.
    fn check_handler_regions(&mut self, cfg: &Cfg, handler_blocks: &HashSet<BlockId>) {
        let mut region: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for &handler in handler_blocks {
            let mut queue = VecDeque::from([handler]);
            let mut seen = HashSet::from([handler]);
            while let Some(block_id) = queue.pop_front() {
                region.entry(block_id).or_default().push(handler);
                let block = &self.func.blocks[block_id.index()];
                let Some(term) = block.instrs.last() else { continue };
                if !matches!(term.op, Opcode::Br | Opcode::Cbr | Opcode::Switch) {
                    continue;
                }
                for target in &term.targets {
                    if seen.insert(target.block) {
                        queue.push_back(target.block);
                    }
                }
            }
        }

        for (block_index, block) in self.func.blocks.iter().enumerate() {
            let block_id = BlockId(block_index as u32);
            let owners = region.get(&block_id);
            for (index, instr) in block.instrs.iter().enumerate() {
                if !instr.op.info().is_eh_only() {
                    continue;
                }
                match owners {
                    None => self.error(
                        "VER0506",
                        Some(block_id),
                        Some(index),
                        format!("'{}' outside any handler region", instr.op),
                    ),
                    Some(owners) if owners.len() > 1 => self.error(
                        "VER0508",
                        Some(block_id),
                        Some(index),
                        format!("'{}' in a block shared by {} handlers", instr.op, owners.len()),
                    ),
                    Some(owners) => {
                        if matches!(instr.op, Opcode::ResumeSame | Opcode::ResumeNext | Opcode::ResumeLabel) {
                            let handler = &self.func.blocks[owners[0].index()];
                            let token = handler.params.get(1).map(|p| p.temp);
                            if instr.operands.first().and_then(|op| op.as_temp()) != token {
                                self.error(
                                    "VER0507",
                                    Some(block_id),
                                    Some(index),
                                    format!(
                                        "'{}' must consume the token parameter of handler '{}'",
                                        instr.op, handler.label
                                    ),
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;
    use crate::registry::RtSignature;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(RtSignature::new("rt_str_concat", [Type::Str, Type::Str], Type::Str))
            .unwrap();
        registry
    }

    fn verify_text(text: &str) -> Diagnostics {
        let module = parse_module(text).expect("test module must parse");
        verify_module(&module, &registry())
    }

    fn codes(diags: &Diagnostics) -> Vec<&str> {
        diags.iter().map(|d| d.code.as_str()).collect()
    }

    #[test]
    fn test_valid_module_passes() {
        let diags = verify_text(
            "il 0.1.0\n\nfunc @main() -> i32 {\nentry:\n  %r = iadd 1:i32, 2:i32\n  ret %r\n}\n",
        );
        assert!(!diags.has_errors(), "{}", diags);
    }

    #[test]
    fn test_missing_terminator() {
        let diags = verify_text("il 0.1.0\nfunc @f() -> void {\nentry:\n  %r = iadd 1:i32, 2:i32\n}\n");
        assert!(codes(&diags).contains(&"VER0105"));
    }

    #[test]
    fn test_operand_type_mismatch() {
        let diags = verify_text("il 0.1.0\nfunc @f() -> i32 {\nentry:\n  %r = iadd 1:i32, 2:i64\n  ret %r\n}\n");
        assert!(codes(&diags).contains(&"VER0202"), "{}", diags);
    }

    #[test]
    fn test_signed_op_on_unsigned() {
        let diags = verify_text("il 0.1.0\nfunc @f() -> u32 {\nentry:\n  %r = sdiv 8:u32, 2:u32\n  ret %r\n}\n");
        assert!(codes(&diags).contains(&"VER0202"), "{}", diags);
    }

    #[test]
    fn test_branch_arity_mismatch() {
        let text = "\
il 0.1.0
func @f() -> i32 {
entry:
  br ^next
next(%v: i32):
  ret %v
}
";
        let diags = verify_text(text);
        assert!(codes(&diags).contains(&"VER0210"), "{}", diags);
    }

    #[test]
    fn test_branch_argument_type_mismatch() {
        let text = "\
il 0.1.0
func @f() -> i32 {
entry:
  br ^next(1:i64)
next(%v: i32):
  ret %v
}
";
        let diags = verify_text(text);
        assert!(codes(&diags).contains(&"VER0211"), "{}", diags);
    }

    #[test]
    fn test_double_definition() {
        let text = "\
il 0.1.0
func @f() -> i32 {
entry:
  %r = iadd 1:i32, 2:i32
  %r = iadd 3:i32, 4:i32
  ret %r
}
";
        let diags = verify_text(text);
        assert!(codes(&diags).contains(&"VER0301"), "{}", diags);
    }

    #[test]
    fn test_use_not_dominated() {
        // %x is defined only on the 'then' path but used at the join
        let text = "\
il 0.1.0
func @f(%c: i1) -> i32 {
entry:
  cbr %c, ^then, ^join
then:
  %x = iadd 1:i32, 2:i32
  br ^join
join:
  ret %x
}
";
        let diags = verify_text(text);
        assert!(codes(&diags).contains(&"VER0303"), "{}", diags);
    }

    #[test]
    fn test_unreachable_block_is_warning_only() {
        let text = "\
il 0.1.0
func @f() -> i32 {
entry:
  ret 0:i32
orphan:
  ret 1:i32
}
";
        let diags = verify_text(text);
        assert!(!diags.has_errors(), "{}", diags);
        assert!(codes(&diags).contains(&"VER0900"));
    }

    #[test]
    fn test_ret_type_mismatch() {
        let diags = verify_text("il 0.1.0\nfunc @f() -> i32 {\nentry:\n  ret 1:i64\n}\n");
        assert!(codes(&diags).contains(&"VER0216"), "{}", diags);
    }

    #[test]
    fn test_handler_shape_enforced() {
        let text = "\
il 0.1.0
func @f() -> i32 {
entry:
  eh.push ^h
  eh.pop
  ret 0:i32
h(%err: error):
  ret 1:i32
}
";
        let diags = verify_text(text);
        assert!(codes(&diags).contains(&"VER0501"), "{}", diags);
    }

    #[test]
    fn test_branch_into_handler_rejected() {
        let text = "\
il 0.1.0
func @f() -> i32 {
entry:
  eh.push ^h
  eh.pop
  br ^h
h(%err: error, %tok: resume_tok):
  ret 1:i32
}
";
        let diags = verify_text(text);
        assert!(codes(&diags).contains(&"VER0502"), "{}", diags);
    }

    #[test]
    fn test_unbalanced_push_at_ret() {
        let text = "\
il 0.1.0
func @f() -> i32 {
entry:
  eh.push ^h
  ret 0:i32
h(%err: error, %tok: resume_tok):
  ret 1:i32
}
";
        let diags = verify_text(text);
        assert!(codes(&diags).contains(&"VER0504"), "{}", diags);
    }

    #[test]
    fn test_pop_without_push() {
        let text = "\
il 0.1.0
func @f() -> void {
entry:
  eh.pop
  ret
}
";
        let diags = verify_text(text);
        assert!(codes(&diags).contains(&"VER0503"), "{}", diags);
    }

    #[test]
    fn test_handler_may_return_with_live_entry() {
        // Scenario: handler returns without resuming; the frame pop releases
        // the handler entry, so this verifies cleanly.
        let text = "\
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
        let diags = verify_text(text);
        assert!(!diags.has_errors(), "{}", diags);
    }

    #[test]
    fn test_resume_must_use_own_token() {
        let text = "\
il 0.1.0
func @f(%outer: resume_tok) -> i32 {
entry:
  eh.push ^h
  %q = sdiv.chk0 1:i32, 0:i32
  eh.pop
  ret 0:i32
h(%err: error, %tok: resume_tok):
  resume.next %outer
}
";
        let diags = verify_text(text);
        assert!(codes(&diags).contains(&"VER0507"), "{}", diags);
    }

    #[test]
    fn test_resume_outside_handler() {
        let text = "\
il 0.1.0
func @f(%tok: resume_tok) -> void {
entry:
  resume.next %tok
}
";
        let diags = verify_text(text);
        assert!(codes(&diags).contains(&"VER0506"), "{}", diags);
    }

    #[test]
    fn test_trap_kind_outside_handler() {
        let text = "\
il 0.1.0
func @f() -> i32 {
entry:
  %k = trap.kind
  ret %k
}
";
        let diags = verify_text(text);
        assert!(codes(&diags).contains(&"VER0506"), "{}", diags);
    }

    #[test]
    fn test_extern_must_match_registry() {
        let diags = verify_text(
            "il 0.1.0\nextern @rt_unknown(str) -> void\nfunc @f() -> void {\nentry:\n  ret\n}\n",
        );
        assert!(codes(&diags).contains(&"VER0601"), "{}", diags);

        let diags = verify_text(
            "il 0.1.0\nextern @rt_str_concat(str) -> str\nfunc @f() -> void {\nentry:\n  ret\n}\n",
        );
        assert!(codes(&diags).contains(&"VER0602"), "{}", diags);
    }

    #[test]
    fn test_call_checked_against_extern_sig() {
        let text = "\
il 0.1.0
extern @rt_str_concat(str, str) -> str
func @f() -> void {
entry:
  %r = call @rt_str_concat(\"a\":str, 1:i32)
  ret
}
";
        let diags = verify_text(text);
        assert!(codes(&diags).contains(&"VER0207"), "{}", diags);
    }

    #[test]
    fn test_cast_target_checked() {
        let diags = verify_text("il 0.1.0\nfunc @f() -> i64 {\nentry:\n  %r = trunc 1:i8 to i64\n  ret %r\n}\n");
        assert!(codes(&diags).contains(&"VER0206"), "{}", diags);
    }

    #[test]
    fn test_switch_case_types_and_duplicates() {
        let text = "\
il 0.1.0
func @f(%x: i32) -> i32 {
entry:
  switch %x, ^d [ 0:i32 -> ^d, 0:i32 -> ^d ]
d:
  ret 0:i32
}
";
        let diags = verify_text(text);
        assert!(codes(&diags).contains(&"VER0215"), "{}", diags);
    }

    #[test]
    fn test_void_call_with_result() {
        let text = "\
il 0.1.0
func @helper() -> void {
entry:
  ret
}
func @f() -> void {
entry:
  %r = call @helper()
  ret
}
";
        let diags = verify_text(text);
        assert!(codes(&diags).contains(&"VER0203"), "{}", diags);
    }
}
