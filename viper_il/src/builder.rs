//! Builder API for constructing modules in memory
//!
//! Frontends either emit textual IL or drive this builder; `finalize` runs
//! the verifier so an unverified module never escapes. Externs and globals
//! must be declared before the function bodies that reference them (their
//! ids are fixed once referenced).

use crate::function::{Function, Param};
use crate::instr::{Block, BlockParam, BranchTarget, Instr};
use crate::module::{ExternSig, Global, Module, ModuleError};
use crate::opcode::Opcode;
use crate::registry::Registry;
use crate::types::Type;
use crate::value::{BlockId, Const, Operand, StrId, TempId};
use crate::verifier::verify_ok;
use thiserror::Error;
use viper_common::Diagnostics;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    #[error("unknown callee @{0}")]
    UnknownCallee(String),
    #[error("function @{0} was already finished")]
    AlreadyFinished(String),
    #[error(transparent)]
    Module(#[from] ModuleError),
}

/// Builds a module incrementally
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self { module: Module::new() }
    }

    pub fn with_triple(mut self, triple: impl Into<String>) -> Self {
        self.module.triple = triple.into();
        self
    }

    pub fn declare_extern(&mut self, name: impl Into<String>, sig: ExternSig) -> Result<(), BuilderError> {
        self.module.add_extern(name, sig)?;
        Ok(())
    }

    pub fn declare_global(&mut self, name: impl Into<String>, global: Global) -> Result<(), BuilderError> {
        self.module.add_global(name, global)?;
        Ok(())
    }

    pub fn intern_str(&mut self, s: impl Into<String>) -> StrId {
        self.module.intern_str(s)
    }

    /// Start a function; a placeholder slot is created immediately so calls
    /// to it (including recursion) resolve while the body is being built.
    pub fn function<'m>(
        &'m mut self,
        name: &str,
        params: &[(&str, Type)],
        ret: Type,
    ) -> Result<FunctionBuilder<'m>, BuilderError> {
        self.module.add_function(Function::new(name, ret))?;

        let mut func = Function::new(name, ret);
        let mut entry = Block::new("entry");
        for (param_name, ty) in params {
            let temp = func.new_temp(*param_name);
            func.params.push(Param { temp, ty: *ty });
            entry.params.push(BlockParam { temp, ty: *ty });
        }
        func.add_block(entry);

        Ok(FunctionBuilder { module: &mut self.module, func, current: BlockId(0), finished: false })
    }

    /// Verify and hand the module over
    pub fn finalize(self, registry: &Registry) -> Result<Module, Diagnostics> {
        verify_ok(&self.module, registry)?;
        Ok(self.module)
    }

    /// The module as built so far, without the verification gate
    pub fn build_unverified(self) -> Module {
        self.module
    }
}

/// Builds one function's blocks and instructions
pub struct FunctionBuilder<'m> {
    module: &'m mut Module,
    func: Function,
    current: BlockId,
    finished: bool,
}

impl<'m> FunctionBuilder<'m> {
    pub fn params(&self) -> Vec<TempId> {
        self.func.params.iter().map(|p| p.temp).collect()
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    /// Temp names must be unique for the textual form to round-trip; clashes
    /// get a numeric suffix.
    fn fresh_name(&self, base: &str) -> String {
        if !self.func.temp_names.iter().any(|n| n == base) {
            return base.to_string();
        }
        let mut counter = 2;
        loop {
            let candidate = format!("{}{}", base, counter);
            if !self.func.temp_names.iter().any(|n| *n == candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    fn fresh_temp(&mut self, base: &str) -> TempId {
        let name = self.fresh_name(base);
        self.func.new_temp(name)
    }

    /// Create a block with the given parameters; returns the id and the
    /// parameter temps
    pub fn block(&mut self, label: &str, params: &[(&str, Type)]) -> (BlockId, Vec<TempId>) {
        let mut block = Block::new(label);
        let mut temps = Vec::with_capacity(params.len());
        for (name, ty) in params {
            let temp = self.fresh_temp(name);
            block.params.push(BlockParam { temp, ty: *ty });
            temps.push(temp);
        }
        (self.func.add_block(block), temps)
    }

    /// Create a handler block with the canonical `(error, resume_tok)`
    /// parameters; returns (id, error temp, token temp)
    pub fn handler_block(&mut self, label: &str) -> (BlockId, TempId, TempId) {
        let (id, temps) = self.block(label, &[("err", Type::Error), ("tok", Type::ResumeTok)]);
        (id, temps[0], temps[1])
    }

    /// Switch the insertion point
    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    pub fn push(&mut self, instr: Instr) {
        self.func.blocks[self.current.index()].instrs.push(instr);
    }

    fn result_of(&mut self, name: &str, instr: Instr) -> TempId {
        let result = self.fresh_temp(name);
        self.push(instr.with_result(result));
        result
    }

    // ---- value producers -------------------------------------------------

    pub fn binary(&mut self, op: Opcode, lhs: impl Into<Operand>, rhs: impl Into<Operand>, name: &str) -> TempId {
        self.result_of(name, Instr::new(op).with_operands([lhs.into(), rhs.into()]))
    }

    pub fn unary(&mut self, op: Opcode, value: impl Into<Operand>, name: &str) -> TempId {
        self.result_of(name, Instr::new(op).with_operands([value.into()]))
    }

    pub fn cast(&mut self, op: Opcode, value: impl Into<Operand>, to: Type, name: &str) -> TempId {
        self.result_of(name, Instr::new(op).with_operands([value.into()]).with_ty(to))
    }

    pub fn select(
        &mut self,
        cond: impl Into<Operand>,
        then_value: impl Into<Operand>,
        else_value: impl Into<Operand>,
        name: &str,
    ) -> TempId {
        self.result_of(
            name,
            Instr::new(Opcode::Select).with_operands([cond.into(), then_value.into(), else_value.into()]),
        )
    }

    pub fn alloca(&mut self, size: i64, align: i64, name: &str) -> TempId {
        self.result_of(
            name,
            Instr::new(Opcode::Alloca).with_operands([Const::i64(size).into(), Const::i64(align).into()]),
        )
    }

    pub fn load(&mut self, ty: Type, ptr: impl Into<Operand>, name: &str) -> TempId {
        self.result_of(name, Instr::new(Opcode::Load).with_operands([ptr.into()]).with_ty(ty))
    }

    pub fn store(&mut self, value: impl Into<Operand>, ptr: impl Into<Operand>) {
        self.push(Instr::new(Opcode::Store).with_operands([value.into(), ptr.into()]));
    }

    pub fn gep(&mut self, ptr: impl Into<Operand>, offset: impl Into<Operand>, name: &str) -> TempId {
        self.result_of(name, Instr::new(Opcode::Gep).with_operands([ptr.into(), offset.into()]))
    }

    pub fn idx_chk(
        &mut self,
        ptr: impl Into<Operand>,
        index: impl Into<Operand>,
        lo: impl Into<Operand>,
        hi: impl Into<Operand>,
        name: &str,
    ) -> TempId {
        self.result_of(
            name,
            Instr::new(Opcode::IdxChk).with_operands([ptr.into(), index.into(), lo.into(), hi.into()]),
        )
    }

    /// Call a function or extern by name; binds a result unless the callee
    /// returns void
    pub fn call(
        &mut self,
        callee: &str,
        args: impl IntoIterator<Item = Operand>,
        name: &str,
    ) -> Result<Option<TempId>, BuilderError> {
        let (target, ret) = if let Some(id) = self.module.func_id(callee) {
            let ret = if self.func.name == callee {
                self.func.ret
            } else {
                self.module.function(id).map(|f| f.ret).unwrap_or(Type::Void)
            };
            (Operand::Func(id), ret)
        } else if let Some(id) = self.module.extern_id(callee) {
            let ret = self.module.extern_sig(id).map(|(_, s)| s.ret).unwrap_or(Type::Void);
            (Operand::Extern(id), ret)
        } else {
            return Err(BuilderError::UnknownCallee(callee.to_string()));
        };

        let mut operands = vec![target];
        operands.extend(args);
        let instr = Instr::new(Opcode::Call).with_operands(operands);
        if ret == Type::Void {
            self.push(instr);
            Ok(None)
        } else {
            Ok(Some(self.result_of(name, instr)))
        }
    }

    pub fn trap_kind(&mut self, name: &str) -> TempId {
        self.result_of(name, Instr::new(Opcode::TrapKindOp))
    }

    pub fn trap_err(&mut self, name: &str) -> TempId {
        self.result_of(name, Instr::new(Opcode::TrapErr))
    }

    // ---- effects and terminators -----------------------------------------

    pub fn eh_push(&mut self, handler: BlockId) {
        self.push(Instr::new(Opcode::EhPush).with_target(BranchTarget::new(handler)));
    }

    pub fn eh_pop(&mut self) {
        self.push(Instr::new(Opcode::EhPop));
    }

    pub fn br(&mut self, target: BlockId, args: impl IntoIterator<Item = Operand>) {
        self.push(Instr::new(Opcode::Br).with_target(BranchTarget::with_args(target, args)));
    }

    pub fn cbr(
        &mut self,
        cond: impl Into<Operand>,
        then_target: BlockId,
        then_args: impl IntoIterator<Item = Operand>,
        else_target: BlockId,
        else_args: impl IntoIterator<Item = Operand>,
    ) {
        self.push(
            Instr::new(Opcode::Cbr)
                .with_operands([cond.into()])
                .with_target(BranchTarget::with_args(then_target, then_args))
                .with_target(BranchTarget::with_args(else_target, else_args)),
        );
    }

    pub fn switch(
        &mut self,
        scrutinee: impl Into<Operand>,
        default: BlockId,
        cases: impl IntoIterator<Item = (Const, BlockId)>,
    ) {
        let mut instr = Instr::new(Opcode::Switch)
            .with_operands([scrutinee.into()])
            .with_target(BranchTarget::new(default));
        for (value, target) in cases {
            instr.operands.push(value.into());
            instr.targets.push(BranchTarget::new(target));
        }
        self.push(instr);
    }

    pub fn ret(&mut self, value: Option<Operand>) {
        let mut instr = Instr::new(Opcode::Ret);
        if let Some(value) = value {
            instr.operands.push(value);
        }
        self.push(instr);
    }

    pub fn trap(&mut self) {
        self.push(Instr::new(Opcode::Trap));
    }

    pub fn trap_from_err(&mut self, kind: crate::trap::TrapKind, code: impl Into<Operand>) {
        self.push(Instr::new(Opcode::TrapFromErr).with_operands([Const::i32(kind.code()).into(), code.into()]));
    }

    pub fn resume_same(&mut self, token: TempId) {
        self.push(Instr::new(Opcode::ResumeSame).with_operands([Operand::Temp(token)]));
    }

    pub fn resume_next(&mut self, token: TempId) {
        self.push(Instr::new(Opcode::ResumeNext).with_operands([Operand::Temp(token)]));
    }

    pub fn resume_label(&mut self, token: TempId, target: BlockId) {
        self.push(
            Instr::new(Opcode::ResumeLabel)
                .with_operands([Operand::Temp(token)])
                .with_target(BranchTarget::new(target)),
        );
    }

    /// Attach a source line to the most recently pushed instruction
    pub fn set_line(&mut self, line: u32) {
        if let Some(instr) = self.func.blocks[self.current.index()].instrs.last_mut() {
            instr.line = Some(line);
        }
    }

    /// Install the finished body into the module
    pub fn finish(mut self) -> Result<(), BuilderError> {
        if self.finished {
            return Err(BuilderError::AlreadyFinished(self.func.name));
        }
        self.finished = true;
        let name = self.func.name.clone();
        let slot = self.module.functions.get_mut(&name).expect("placeholder slot");
        *slot = std::mem::replace(&mut self.func, Function::new(String::new(), Type::Void));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Registry, RtSignature};

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(RtSignature::new("rt_str_concat", [Type::Str, Type::Str], Type::Str))
            .unwrap();
        registry
    }

    #[test]
    fn test_build_and_finalize() {
        let mut mb = ModuleBuilder::new();
        let mut fb = mb.function("add", &[("x", Type::I64), ("y", Type::I64)], Type::I64).unwrap();
        let params = fb.params();
        let sum = fb.binary(Opcode::Iadd, params[0], params[1], "sum");
        fb.ret(Some(Operand::Temp(sum)));
        fb.finish().unwrap();

        let module = mb.finalize(&registry()).unwrap();
        let func = module.function_by_name("add").unwrap();
        assert_eq!(func.blocks.len(), 1);
        assert_eq!(func.blocks[0].instrs.len(), 2);
    }

    #[test]
    fn test_finalize_rejects_broken_module() {
        let mut mb = ModuleBuilder::new();
        let mut fb = mb.function("bad", &[], Type::I32).unwrap();
        // Returns an i64 from an i32 function
        fb.ret(Some(Const::i64(1).into()));
        fb.finish().unwrap();

        let diags = mb.finalize(&registry()).unwrap_err();
        assert!(diags.has_errors());
    }

    #[test]
    fn test_recursive_call_resolves() {
        let mut mb = ModuleBuilder::new();
        let mut fb = mb.function("loop_forever", &[("n", Type::I64)], Type::I64).unwrap();
        let params = fb.params();
        let r = fb.call("loop_forever", [Operand::Temp(params[0])], "r").unwrap().unwrap();
        fb.ret(Some(Operand::Temp(r)));
        fb.finish().unwrap();

        let module = mb.finalize(&registry()).unwrap();
        assert!(module.function_by_name("loop_forever").is_some());
    }

    #[test]
    fn test_extern_call_through_builder() {
        let mut mb = ModuleBuilder::new();
        mb.declare_extern("rt_str_concat", ExternSig::new([Type::Str, Type::Str], Type::Str)).unwrap();
        let hello = mb.intern_str("hello ");
        let world = mb.intern_str("world");

        let mut fb = mb.function("greet", &[], Type::Str).unwrap();
        let joined = fb
            .call("rt_str_concat", [Const::Str(hello).into(), Const::Str(world).into()], "joined")
            .unwrap()
            .unwrap();
        fb.ret(Some(Operand::Temp(joined)));
        fb.finish().unwrap();

        let module = mb.finalize(&registry()).unwrap();
        assert_eq!(module.strings.len(), 2);
    }

    #[test]
    fn test_unknown_callee() {
        let mut mb = ModuleBuilder::new();
        let mut fb = mb.function("f", &[], Type::Void).unwrap();
        let err = fb.call("missing", [], "r").unwrap_err();
        assert_eq!(err, BuilderError::UnknownCallee("missing".to_string()));
    }
}
