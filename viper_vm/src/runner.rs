//! The interpreter core
//!
//! One `Vm` executes one module. The loop is iterative: IL calls push frames
//! on the VM's own stack, so host recursion never grows and the machine can
//! pause at any whole-instruction boundary. The dispatch match below is
//! exhaustive over `Opcode` on purpose: a new schema row fails to compile
//! until it gets semantics here.

use crate::bridge;
use crate::config::{BreakSpec, RunConfig};
use crate::error::{VmError, VmResult};
use crate::frame::{Frame, HandlerEntry};
use crate::ops;
use crate::trap::TrapInfo;
use crate::value::{Ptr, ResumeToken, RtValue};
use std::io::Write;
use viper_il::registry::{Registry, RtSignature};
use viper_il::{
    BranchTarget, Const, ErrorRecord, ExternId, FuncId, Instr, Module, Opcode, Operand, TempId, TrapKind,
    Type,
};
use viper_runtime::{RtFn, RtLibrary, RtState};

/// Why the VM gave control back to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    /// The poll callback returned false
    Interrupt,
    /// A breakpoint matched
    Breakpoint,
    /// A single `step()` completed with work remaining
    Step,
}

/// Result of `run`/`continue_run`
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Completed(Option<RtValue>),
    Paused(PauseReason),
    Trapped(TrapInfo),
}

enum Flow {
    Continue,
    Finished(Option<RtValue>),
    Trapped(TrapInfo),
}

struct ResolvedExtern {
    name: String,
    sig: RtSignature,
    func: RtFn,
}

/// A per-invocation interpreter over a verified module
pub struct Vm<'m> {
    module: &'m Module,
    externs: Vec<ResolvedExtern>,
    rt: RtState,
    /// Module string literal handles, indexed by `StrId`
    literals: Vec<u32>,
    globals: Vec<RtValue>,
    frames: Vec<Frame>,
    next_serial: u32,
    next_token_seq: u64,
    steps: u64,
    since_poll: usize,
    counts: Vec<u64>,
    config: RunConfig,
    skip_break_once: bool,
    max_steps_hit: bool,
    finished: bool,
}

impl<'m> Vm<'m> {
    pub fn new(
        module: &'m Module,
        registry: &Registry,
        library: &RtLibrary,
        config: RunConfig,
    ) -> VmResult<Vm<'m>> {
        Self::with_state(module, registry, library, config, RtState::new())
    }

    /// Like `new` but with a caller-provided runtime state (tests capture
    /// `rt_print_str` output this way)
    pub fn with_state(
        module: &'m Module,
        registry: &Registry,
        library: &RtLibrary,
        config: RunConfig,
        mut rt: RtState,
    ) -> VmResult<Vm<'m>> {
        // Resolve every extern once, at load
        let mut externs = Vec::with_capacity(module.externs.len());
        for name in module.externs.keys() {
            let sig = registry
                .get(name)
                .ok_or_else(|| VmError::UnresolvedExtern(name.clone()))?
                .clone();
            let func = library.resolve(name).ok_or_else(|| VmError::UnresolvedExtern(name.clone()))?;
            externs.push(ResolvedExtern { name: name.clone(), sig, func });
        }

        let literals: Vec<u32> = module.strings.iter().map(|s| rt.alloc_str(s.clone())).collect();

        let mut globals = Vec::with_capacity(module.globals.len());
        for global in module.globals.values() {
            let value = match &global.init {
                Some(Const::Int { ty, bits }) => RtValue::Int { ty: *ty, bits: *bits },
                Some(Const::Float { ty, value }) => RtValue::Float { ty: *ty, value: *value },
                Some(Const::Str(id)) => RtValue::Str(literal_handle_for(&literals, *id)?),
                Some(Const::Null) => RtValue::Ptr(Ptr::Null),
                None => zero_value(&mut rt, global.ty),
            };
            globals.push(value);
        }

        let counts = if config.count_ops { vec![0; Opcode::COUNT] } else { Vec::new() };

        Ok(Vm {
            module,
            externs,
            rt,
            literals,
            globals,
            frames: Vec::new(),
            next_serial: 0,
            next_token_seq: 0,
            steps: 0,
            since_poll: 0,
            counts,
            config,
            skip_break_once: false,
            max_steps_hit: false,
            finished: false,
        })
    }

    /// Total dispatched instruction count
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Per-opcode execution counts; empty unless `count_ops` was set
    pub fn op_counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn rt_state(&self) -> &RtState {
        &self.rt
    }

    /// Current call depth, for host inspection while paused
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn add_breakpoint(&mut self, spec: BreakSpec) {
        self.config.breakpoints.push(spec);
    }

    pub fn clear_breakpoints(&mut self) {
        self.config.breakpoints.clear();
    }

    /// Where the paused VM stands: (function, block label, instruction
    /// index) of the next instruction to execute
    pub fn current_location(&self) -> Option<(&str, &str, usize)> {
        let frame = self.frames.last()?;
        let func = self.module.function(frame.func)?;
        let block = func.blocks.get(frame.block.index())?;
        Some((func.name.as_str(), block.label.as_str(), frame.ip))
    }

    /// Read an SSA temp of the innermost frame by its printable name.
    /// Hosts build watches out of this: single-step and compare.
    /// Returns None for unknown names and registers not yet written.
    pub fn read_temp(&self, name: &str) -> Option<RtValue> {
        let frame = self.frames.last()?;
        let func = self.module.function(frame.func)?;
        let index = func.temp_names.iter().position(|n| n == name)?;
        match frame.regs.get(index)? {
            RtValue::Uninit => None,
            value => Some(*value),
        }
    }

    /// Start executing `name` with the given arguments
    pub fn run(&mut self, name: &str, args: Vec<RtValue>) -> VmResult<RunState> {
        if !self.frames.is_empty() || self.finished {
            return Err(VmError::Internal("vm already ran; create a new one".to_string()));
        }
        let func_id = self.module.func_id(name).ok_or_else(|| VmError::UnknownFunction(name.to_string()))?;
        let func = self.module.function(func_id).expect("id from lookup");
        if func.params.len() != args.len() {
            return Err(VmError::ArgumentMismatch {
                name: name.to_string(),
                expected: func.params.len(),
                actual: args.len(),
            });
        }
        for (param, value) in func.params.iter().zip(&args) {
            if value.ty() != Some(param.ty) {
                return Err(VmError::ArgumentMismatch {
                    name: name.to_string(),
                    expected: func.params.len(),
                    actual: args.len(),
                });
            }
        }

        self.push_frame(func_id, args, None);
        self.run_loop()
    }

    /// Resume after a pause, from the exact instruction boundary
    pub fn continue_run(&mut self) -> VmResult<RunState> {
        if self.frames.is_empty() {
            return Err(VmError::NotRunning);
        }
        self.run_loop()
    }

    /// Execute exactly one instruction (debugger stepping)
    pub fn step(&mut self) -> VmResult<RunState> {
        if self.frames.is_empty() {
            return Err(VmError::NotRunning);
        }
        match self.step_instr()? {
            Flow::Continue => Ok(RunState::Paused(PauseReason::Step)),
            Flow::Finished(value) => {
                self.finished = true;
                Ok(RunState::Completed(value))
            }
            Flow::Trapped(info) => {
                self.finished = true;
                Ok(RunState::Trapped(info))
            }
        }
    }

    fn run_loop(&mut self) -> VmResult<RunState> {
        loop {
            if self.frames.is_empty() {
                return Err(VmError::NotRunning);
            }

            // max_steps bounds total dispatched instructions; raised once as
            // a catchable RuntimeError trap
            if let Some(max) = self.config.max_steps {
                if self.steps >= max && !self.max_steps_hit {
                    self.max_steps_hit = true;
                    match self.raise(TrapKind::RuntimeError, 0)? {
                        Flow::Continue => continue,
                        Flow::Finished(value) => {
                            self.finished = true;
                            return Ok(RunState::Completed(value));
                        }
                        Flow::Trapped(info) => {
                            self.finished = true;
                            return Ok(RunState::Trapped(info));
                        }
                    }
                }
            }

            // Host polling, always between whole instructions. The callback
            // is taken out for the call so it can receive the VM itself.
            if self.config.interrupt_every_n > 0 && self.since_poll >= self.config.interrupt_every_n {
                self.since_poll = 0;
                if let Some(mut poll) = self.config.poll.take() {
                    let keep_running = poll(self);
                    self.config.poll = Some(poll);
                    if !keep_running {
                        return Ok(RunState::Paused(PauseReason::Interrupt));
                    }
                }
            }

            // Breakpoints, skipped once right after resuming from one
            if self.skip_break_once {
                self.skip_break_once = false;
            } else if !self.config.breakpoints.is_empty() && self.at_breakpoint() {
                self.skip_break_once = true;
                return Ok(RunState::Paused(PauseReason::Breakpoint));
            }

            match self.step_instr()? {
                Flow::Continue => {}
                Flow::Finished(value) => {
                    self.finished = true;
                    return Ok(RunState::Completed(value));
                }
                Flow::Trapped(info) => {
                    self.finished = true;
                    return Ok(RunState::Trapped(info));
                }
            }
        }
    }

    fn at_breakpoint(&self) -> bool {
        let Some(frame) = self.frames.last() else { return false };
        let Some(func) = self.module.function(frame.func) else { return false };
        let Some(block) = func.blocks.get(frame.block.index()) else { return false };
        let line = block.instrs.get(frame.ip).and_then(|i| i.line);

        self.config.breakpoints.iter().any(|spec| match spec {
            BreakSpec::At { function, block: label, index } => {
                *function == func.name && *label == block.label && *index == frame.ip
            }
            BreakSpec::Line { line: break_line } => line == Some(*break_line),
        })
    }

    // ---- operand evaluation ---------------------------------------------

    fn eval(&self, operand: &Operand) -> VmResult<RtValue> {
        Ok(match operand {
            Operand::Const(Const::Int { ty, bits }) => RtValue::Int { ty: *ty, bits: *bits },
            Operand::Const(Const::Float { ty, value }) => RtValue::Float { ty: *ty, value: *value },
            Operand::Const(Const::Str(id)) => RtValue::Str(literal_handle_for(&self.literals, *id)?),
            Operand::Const(Const::Null) => RtValue::Ptr(Ptr::Null),
            Operand::Temp(temp) => {
                let frame = self.frames.last().ok_or(VmError::NotRunning)?;
                match frame.get(*temp) {
                    RtValue::Uninit => {
                        let name = self
                            .module
                            .function(frame.func)
                            .map(|f| f.temp_name(*temp).to_string())
                            .unwrap_or_default();
                        return Err(VmError::UninitRead(name));
                    }
                    value => value,
                }
            }
            Operand::Func(id) => RtValue::Ptr(Ptr::Func(*id)),
            Operand::Extern(_) => RtValue::Ptr(Ptr::Null),
            Operand::Global(id) => self.globals[id.0 as usize],
        })
    }

    fn eval_int(&self, operand: &Operand) -> VmResult<(Type, i64)> {
        match self.eval(operand)? {
            RtValue::Int { ty, bits } => Ok((ty, bits)),
            other => Err(VmError::Internal(format!("expected integer, got {:?}", other))),
        }
    }

    fn eval_float(&self, operand: &Operand) -> VmResult<(Type, f64)> {
        match self.eval(operand)? {
            RtValue::Float { ty, value } => Ok((ty, value)),
            other => Err(VmError::Internal(format!("expected float, got {:?}", other))),
        }
    }

    fn eval_ptr(&self, operand: &Operand) -> VmResult<Ptr> {
        match self.eval(operand)? {
            RtValue::Ptr(ptr) => Ok(ptr),
            other => Err(VmError::Internal(format!("expected pointer, got {:?}", other))),
        }
    }

    // ---- frame plumbing --------------------------------------------------

    fn push_frame(&mut self, func_id: FuncId, args: Vec<RtValue>, ret_slot: Option<TempId>) {
        let func = self.module.function(func_id).expect("verified callee");
        self.next_serial += 1;
        let mut frame = Frame::new(func_id, self.next_serial, func.temp_count());
        frame.ret_slot = ret_slot;
        for (param, value) in func.params.iter().zip(args) {
            frame.set(param.temp, value);
        }
        self.frames.push(frame);
    }

    fn frame(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("active frame")
    }

    fn set_result(&mut self, instr: &Instr, value: RtValue) {
        if let Some(result) = instr.result {
            self.frame().set(result, value);
        }
    }

    fn advance(&mut self) {
        self.frame().ip += 1;
    }

    /// Parallel edge copy: all arguments are evaluated against the source
    /// block's state before any target parameter is written
    fn branch_to(&mut self, target: &BranchTarget) -> VmResult<()> {
        let mut args = Vec::with_capacity(target.args.len());
        for arg in &target.args {
            args.push(self.eval(arg)?);
        }
        let func_id = self.frame().func;
        let func = self.module.function(func_id).expect("verified function");
        let params: Vec<TempId> =
            func.blocks[target.block.index()].params.iter().map(|p| p.temp).collect();

        let frame = self.frame();
        for (param, value) in params.into_iter().zip(args) {
            frame.set(param, value);
        }
        frame.block = target.block;
        frame.ip = 0;
        Ok(())
    }

    // ---- memory ----------------------------------------------------------

    fn stack_slot(&mut self, ptr: Ptr, size: usize) -> VmResult<&mut [u8]> {
        let (serial, offset) = match ptr {
            Ptr::Stack { frame, offset } => (frame, offset as usize),
            Ptr::Null => return Err(VmError::MemoryFault("null pointer dereference".to_string())),
            other => return Err(VmError::MemoryFault(format!("not an addressable pointer: {:?}", other))),
        };
        let frame = self
            .frames
            .iter_mut()
            .rev()
            .find(|f| f.serial == serial)
            .ok_or_else(|| VmError::MemoryFault("dangling stack pointer".to_string()))?;
        let end = offset.checked_add(size).ok_or_else(|| VmError::MemoryFault("address overflow".to_string()))?;
        if end > frame.arena.len() {
            return Err(VmError::MemoryFault(format!(
                "access of {} byte(s) at offset {} exceeds arena of {}",
                size,
                offset,
                frame.arena.len()
            )));
        }
        Ok(&mut frame.arena[offset..end])
    }

    fn load_mem(&mut self, ptr: Ptr, ty: Type) -> VmResult<RtValue> {
        let size = ty.size_bytes();
        let slot = self.stack_slot(ptr, size)?;
        let mut raw = [0u8; 8];
        raw[..size].copy_from_slice(slot);
        let bits = u64::from_le_bytes(raw);
        Ok(if ty.is_float() {
            let value = if ty == Type::F32 {
                f32::from_bits(bits as u32) as f64
            } else {
                f64::from_bits(bits)
            };
            RtValue::Float { ty, value }
        } else {
            RtValue::Int { ty, bits: ops::normalize(ty, bits as i128) }
        })
    }

    fn store_mem(&mut self, ptr: Ptr, value: &RtValue) -> VmResult<()> {
        let (size, raw) = match value {
            RtValue::Int { ty, bits } => (ty.size_bytes(), (*bits as u64).to_le_bytes()),
            RtValue::Float { ty: Type::F32, value } => (4, ((*value as f32).to_bits() as u64).to_le_bytes()),
            RtValue::Float { value, .. } => (8, value.to_bits().to_le_bytes()),
            other => return Err(VmError::MemoryFault(format!("unstorable value: {:?}", other))),
        };
        let slot = self.stack_slot(ptr, size)?;
        slot.copy_from_slice(&raw[..size]);
        Ok(())
    }

    // ---- trap dispatch ---------------------------------------------------

    /// Where execution currently stands, for diagnostics
    fn fault_site(&self, kind: TrapKind, code: i32) -> TrapInfo {
        let frame = self.frames.last().expect("active frame");
        let func = self.module.function(frame.func).expect("verified function");
        let block = &func.blocks[frame.block.index()];
        let line = block.instrs.get(frame.ip).and_then(|i| i.line).map(|l| l as i32).unwrap_or(-1);
        TrapInfo {
            kind,
            code,
            function: func.name.clone(),
            block: block.label.clone(),
            index: frame.ip,
            line,
        }
    }

    /// Raise a trap at the current position: construct the error record and
    /// unwind until a dispatchable handler is found. Handler entries that are
    /// already executing are skipped, so a trap inside a handler propagates
    /// outward. Frames without handlers pop, releasing their arenas.
    fn raise(&mut self, kind: TrapKind, code: i32) -> VmResult<Flow> {
        let info = self.fault_site(kind, code);
        let err = ErrorRecord::new(kind, code, self.steps, info.line);
        log::debug!("trap {} at @{}#{}#{}", kind, info.function, info.block, info.index);

        loop {
            let Some(frame) = self.frames.last_mut() else {
                return Ok(Flow::Trapped(info));
            };
            let Some(entry_index) = frame.dispatchable_handler() else {
                self.frames.pop();
                continue;
            };

            self.next_token_seq += 1;
            let token = ResumeToken {
                frame: frame.serial,
                block: frame.block,
                ip: frame.ip,
                seq: self.next_token_seq,
            };
            frame.handlers[entry_index].active_seq = Some(token.seq);
            frame.cur_trap = Some(err);
            frame.live_token = Some(token);

            let handler_id = frame.handlers[entry_index].block;
            let func = self.module.function(frame.func).expect("verified function");
            let handler = &func.blocks[handler_id.index()];
            let (err_param, tok_param) = match handler.params.as_slice() {
                [e, t] => (e.temp, t.temp),
                _ => return Err(VmError::Internal("handler block without (error, resume_tok)".to_string())),
            };
            frame.set(err_param, RtValue::Err(err));
            frame.set(tok_param, RtValue::Token(token));
            frame.block = handler_id;
            frame.ip = 0;
            return Ok(Flow::Continue);
        }
    }

    // ---- dispatch --------------------------------------------------------

    fn step_instr(&mut self) -> VmResult<Flow> {
        let (func_id, block_id, ip) = {
            let frame = self.frames.last().ok_or(VmError::NotRunning)?;
            (frame.func, frame.block, frame.ip)
        };
        let func = self.module.function(func_id).ok_or_else(|| VmError::Internal("bad func id".to_string()))?;
        let block = func
            .blocks
            .get(block_id.index())
            .ok_or_else(|| VmError::Internal("bad block id".to_string()))?;
        let instr = block
            .instrs
            .get(ip)
            .ok_or_else(|| VmError::Internal("instruction pointer past block end".to_string()))?;

        self.steps += 1;
        self.since_poll += 1;
        if !self.counts.is_empty() {
            self.counts[instr.op as usize] += 1;
        }
        if let Some(trace) = self.config.trace.as_mut() {
            let _ = writeln!(trace, "@{}#{}#{}: {}", func.name, block.label, ip, instr.op);
        }

        use Opcode::*;
        match instr.op {
            // Integer arithmetic, bitwise and shifts; checked variants trap
            Iadd | Isub | Imul | Sdiv | Udiv | Srem | Urem | IaddOvf | IsubOvf | ImulOvf | SdivChk0
            | SremChk0 | UdivChk0 | UremChk0 | And | Or | Xor | Shl | Lshr | Ashr => {
                let (ty, a) = self.eval_int(&instr.operands[0])?;
                let (_, b) = self.eval_int(&instr.operands[1])?;
                match ops::int_binop(instr.op, ty, a, b) {
                    Ok(bits) => {
                        self.set_result(instr, RtValue::Int { ty, bits });
                        self.advance();
                        Ok(Flow::Continue)
                    }
                    Err(kind) => self.raise(kind, 0),
                }
            }
            Ineg | Not => {
                let (ty, a) = self.eval_int(&instr.operands[0])?;
                self.set_result(instr, RtValue::Int { ty, bits: ops::int_unop(instr.op, ty, a) });
                self.advance();
                Ok(Flow::Continue)
            }

            Fadd | Fsub | Fmul | Fdiv | Pow => {
                let (ty, a) = self.eval_float(&instr.operands[0])?;
                let (_, b) = self.eval_float(&instr.operands[1])?;
                match ops::float_binop(instr.op, ty, a, b) {
                    Ok(value) => {
                        self.set_result(instr, RtValue::Float { ty, value });
                        self.advance();
                        Ok(Flow::Continue)
                    }
                    Err(kind) => self.raise(kind, 0),
                }
            }
            Fneg => {
                let (ty, a) = self.eval_float(&instr.operands[0])?;
                self.set_result(instr, RtValue::Float { ty, value: -a });
                self.advance();
                Ok(Flow::Continue)
            }

            IcmpEq | IcmpNe | ScmpLt | ScmpLe | ScmpGt | ScmpGe | UcmpLt | UcmpLe | UcmpGt | UcmpGe => {
                let (ty, a) = self.eval_int(&instr.operands[0])?;
                let (_, b) = self.eval_int(&instr.operands[1])?;
                self.set_result(instr, RtValue::bool(ops::compare_int(instr.op, ty, a, b)));
                self.advance();
                Ok(Flow::Continue)
            }
            FcmpOeq | FcmpOne | FcmpOlt | FcmpOle | FcmpOgt | FcmpOge | FcmpUeq | FcmpUne => {
                let (_, a) = self.eval_float(&instr.operands[0])?;
                let (_, b) = self.eval_float(&instr.operands[1])?;
                self.set_result(instr, RtValue::bool(ops::compare_float(instr.op, a, b)));
                self.advance();
                Ok(Flow::Continue)
            }

            Trunc | Sext | Zext | Fptosi | Sitofp | Fptrunc | Fpext | Bitcast | CastFpToSiRteChk
            | CastFpToUiRteChk | CastSiNarrowChk | CastUiNarrowChk => {
                let to = instr.ty.expect("verified cast");
                let (from_ty, bits, float) = match self.eval(&instr.operands[0])? {
                    RtValue::Int { ty, bits } => (ty, bits, 0.0),
                    RtValue::Float { ty, value } => (ty, 0, value),
                    other => return Err(VmError::Internal(format!("cast of {:?}", other))),
                };
                match ops::cast(instr.op, from_ty, bits, float, to) {
                    Ok(ops::CastOut::Int(bits)) => {
                        self.set_result(instr, RtValue::Int { ty: to, bits });
                        self.advance();
                        Ok(Flow::Continue)
                    }
                    Ok(ops::CastOut::Float(value)) => {
                        self.set_result(instr, RtValue::Float { ty: to, value });
                        self.advance();
                        Ok(Flow::Continue)
                    }
                    Err(kind) => self.raise(kind, 0),
                }
            }

            Select => {
                let cond = self.eval(&instr.operands[0])?;
                let value = if cond.is_true() {
                    self.eval(&instr.operands[1])?
                } else {
                    self.eval(&instr.operands[2])?
                };
                self.set_result(instr, value);
                self.advance();
                Ok(Flow::Continue)
            }

            // Memory
            Alloca => {
                let (_, size) = self.eval_int(&instr.operands[0])?;
                let (_, align) = self.eval_int(&instr.operands[1])?;
                if size < 0 || align < 0 {
                    return Err(VmError::MemoryFault(format!("alloca of size {}, align {}", size, align)));
                }
                let frame = self.frame();
                let serial = frame.serial;
                let offset = frame.alloc(size as usize, align as usize);
                self.set_result(instr, RtValue::Ptr(Ptr::Stack { frame: serial, offset }));
                self.advance();
                Ok(Flow::Continue)
            }
            Load => {
                let ty = instr.ty.expect("verified load");
                let ptr = self.eval_ptr(&instr.operands[0])?;
                let value = self.load_mem(ptr, ty)?;
                self.set_result(instr, value);
                self.advance();
                Ok(Flow::Continue)
            }
            Store => {
                let value = self.eval(&instr.operands[0])?;
                let ptr = self.eval_ptr(&instr.operands[1])?;
                self.store_mem(ptr, &value)?;
                self.advance();
                Ok(Flow::Continue)
            }
            Gep => {
                let ptr = self.eval_ptr(&instr.operands[0])?;
                let (_, delta) = self.eval_int(&instr.operands[1])?;
                let moved = offset_ptr(ptr, delta)?;
                self.set_result(instr, RtValue::Ptr(moved));
                self.advance();
                Ok(Flow::Continue)
            }
            IdxChk => {
                let ptr = self.eval_ptr(&instr.operands[0])?;
                let (_, index) = self.eval_int(&instr.operands[1])?;
                let (_, lo) = self.eval_int(&instr.operands[2])?;
                let (_, hi) = self.eval_int(&instr.operands[3])?;
                if index < lo || index >= hi {
                    return self.raise(TrapKind::Bounds, 0);
                }
                let moved = offset_ptr(ptr, index)?;
                self.set_result(instr, RtValue::Ptr(moved));
                self.advance();
                Ok(Flow::Continue)
            }

            // Control
            Br => {
                self.branch_to(&instr.targets[0])?;
                Ok(Flow::Continue)
            }
            Cbr => {
                let cond = self.eval(&instr.operands[0])?;
                let target = if cond.is_true() { &instr.targets[0] } else { &instr.targets[1] };
                self.branch_to(target)?;
                Ok(Flow::Continue)
            }
            Switch => {
                let (_, scrutinee) = self.eval_int(&instr.operands[0])?;
                let mut target = &instr.targets[0];
                for (case, case_target) in instr.operands[1..].iter().zip(&instr.targets[1..]) {
                    if let Some(Const::Int { bits, .. }) = case.as_const() {
                        if *bits == scrutinee {
                            target = case_target;
                            break;
                        }
                    }
                }
                self.branch_to(target)?;
                Ok(Flow::Continue)
            }
            Ret => {
                let value = match instr.operands.first() {
                    Some(operand) => Some(self.eval(operand)?),
                    None => None,
                };
                let popped = self.frames.pop().expect("active frame");
                match self.frames.last_mut() {
                    None => Ok(Flow::Finished(value)),
                    Some(parent) => {
                        if let (Some(slot), Some(value)) = (popped.ret_slot, value) {
                            parent.set(slot, value);
                        }
                        parent.ip += 1;
                        Ok(Flow::Continue)
                    }
                }
            }
            Call => match instr.operands[0] {
                Operand::Func(callee) => {
                    let mut args = Vec::with_capacity(instr.operands.len() - 1);
                    for arg in &instr.operands[1..] {
                        args.push(self.eval(arg)?);
                    }
                    self.push_frame(callee, args, instr.result);
                    Ok(Flow::Continue)
                }
                Operand::Extern(id) => self.exec_extern_call(instr, id),
                _ => Err(VmError::Internal("call target is neither function nor extern".to_string())),
            },
            CallIndirect => {
                let callee = match self.eval_ptr(&instr.operands[0])? {
                    Ptr::Func(id) => id,
                    _ => return self.raise(TrapKind::InvalidOperation, 0),
                };
                let func = self
                    .module
                    .function(callee)
                    .ok_or_else(|| VmError::Internal("bad function pointer".to_string()))?;
                if func.params.len() != instr.operands.len() - 1 || func.ret != instr.ty.unwrap_or(Type::Void) {
                    return self.raise(TrapKind::InvalidOperation, 0);
                }
                let mut args = Vec::with_capacity(instr.operands.len() - 1);
                for (arg, param) in instr.operands[1..].iter().zip(&func.params) {
                    let value = self.eval(arg)?;
                    if value.ty() != Some(param.ty) {
                        return self.raise(TrapKind::InvalidOperation, 0);
                    }
                    args.push(value);
                }
                self.push_frame(callee, args, instr.result);
                Ok(Flow::Continue)
            }

            // Exception handling
            Trap => self.raise(TrapKind::RuntimeError, 0),
            TrapFromErr => {
                let (_, kind_code) = self.eval_int(&instr.operands[0])?;
                let (_, code) = self.eval_int(&instr.operands[1])?;
                let kind = TrapKind::from_code(kind_code as i32)
                    .ok_or_else(|| VmError::Internal(format!("bad trap kind code {}", kind_code)))?;
                self.raise(kind, code as i32)
            }
            TrapKindOp => {
                let trap = self.frame().cur_trap.ok_or_else(|| {
                    VmError::Internal("trap.kind with no trap being handled".to_string())
                })?;
                self.set_result(instr, RtValue::i32(trap.kind));
                self.advance();
                Ok(Flow::Continue)
            }
            TrapErr => {
                let trap = self.frame().cur_trap.ok_or_else(|| {
                    VmError::Internal("trap.err with no trap being handled".to_string())
                })?;
                self.set_result(instr, RtValue::Err(trap));
                self.advance();
                Ok(Flow::Continue)
            }
            EhPush => {
                let handler = instr.targets[0].block;
                self.frame().handlers.push(HandlerEntry { block: handler, active_seq: None });
                self.advance();
                Ok(Flow::Continue)
            }
            EhPop => {
                let frame = self.frame();
                if frame.handlers.pop().is_none() {
                    return Err(VmError::HandlerUnderflow);
                }
                self.advance();
                Ok(Flow::Continue)
            }
            ResumeSame | ResumeNext | ResumeLabel => self.exec_resume(instr),
        }
    }

    fn exec_resume(&mut self, instr: &Instr) -> VmResult<Flow> {
        let token = match self.eval(&instr.operands[0])? {
            RtValue::Token(token) => token,
            _ => return Err(VmError::InvalidResumeToken),
        };
        let frame = self.frame();
        if frame.serial != token.frame || frame.live_token != Some(token) {
            return Err(VmError::InvalidResumeToken);
        }
        let entry = frame
            .handlers
            .iter_mut()
            .find(|entry| entry.active_seq == Some(token.seq))
            .ok_or(VmError::InvalidResumeToken)?;
        entry.active_seq = None;
        frame.live_token = None;
        frame.cur_trap = None;

        match instr.op {
            Opcode::ResumeSame => {
                frame.block = token.block;
                frame.ip = token.ip;
            }
            Opcode::ResumeNext => {
                frame.block = token.block;
                frame.ip = token.ip + 1;
            }
            Opcode::ResumeLabel => {
                frame.block = instr.targets[0].block;
                frame.ip = 0;
            }
            _ => unreachable!("not a resume op"),
        }
        Ok(Flow::Continue)
    }

    // ---- runtime bridge --------------------------------------------------

    fn exec_extern_call(&mut self, instr: &Instr, id: ExternId) -> VmResult<Flow> {
        let mut args = Vec::with_capacity(instr.operands.len() - 1);
        for arg in &instr.operands[1..] {
            args.push(self.eval(arg)?);
        }

        let resolved = self
            .externs
            .get(id.0 as usize)
            .ok_or_else(|| VmError::Internal("bad extern id".to_string()))?;
        let (sig, rtfn) = (resolved.sig.clone(), resolved.func);
        log::trace!("bridge call @{}", resolved.name);

        // Strip the err-out pointer: the runtime reports failure to us, we
        // write the code into the slot the IL provided
        let err_ptr = match sig.err_out {
            Some(index) => {
                if index >= args.len() {
                    return Err(VmError::Internal("err_out index out of range".to_string()));
                }
                let value = args.remove(index);
                match value.as_ptr() {
                    Some(ptr @ Ptr::Stack { .. }) => Some(ptr),
                    _ => return Err(VmError::MemoryFault("err_out must be a stack pointer".to_string())),
                }
            }
            None => None,
        };

        let mut rt_args = Vec::with_capacity(args.len());
        for value in &args {
            rt_args.push(bridge::marshal(value)?);
        }

        match rtfn(&mut self.rt, &rt_args) {
            Ok(ret) => {
                if let Some(ptr) = err_ptr {
                    self.store_mem(ptr, &RtValue::i32(0))?;
                }
                if sig.ret != Type::Void {
                    let value = bridge::unmarshal(ret, sig.ret)?;
                    self.set_result(instr, value);
                }
                self.advance();
                Ok(Flow::Continue)
            }
            Err(rt_err) => {
                let code = rt_err.code.code();
                log::debug!("runtime @{} failed: {}", resolved.name, rt_err);
                if let Some(ptr) = err_ptr {
                    self.store_mem(ptr, &RtValue::i32(code))?;
                }
                let kind = (sig.map_err)(code);
                self.raise(kind, code)
            }
        }
    }
}

fn literal_handle_for(literals: &[u32], id: viper_il::StrId) -> VmResult<u32> {
    literals
        .get(id.0 as usize)
        .copied()
        .ok_or_else(|| VmError::Internal(format!("bad string literal id {}", id.0)))
}

fn zero_value(rt: &mut RtState, ty: Type) -> RtValue {
    match ty {
        ty if ty.is_int() => RtValue::Int { ty, bits: 0 },
        ty if ty.is_float() => RtValue::Float { ty, value: 0.0 },
        Type::Str => RtValue::Str(rt.alloc_str("")),
        _ => RtValue::Ptr(Ptr::Null),
    }
}

fn offset_ptr(ptr: Ptr, delta: i64) -> VmResult<Ptr> {
    match ptr {
        Ptr::Stack { frame, offset } => {
            let moved = offset as i64 + delta;
            if moved < 0 || moved > u32::MAX as i64 {
                return Err(VmError::MemoryFault(format!("pointer offset {} out of range", moved)));
            }
            Ok(Ptr::Stack { frame, offset: moved as u32 })
        }
        other => Err(VmError::MemoryFault(format!("pointer arithmetic on {:?}", other))),
    }
}
