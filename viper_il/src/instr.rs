//! Instructions and basic blocks

use crate::opcode::Opcode;
use crate::types::Type;
use crate::value::{BlockId, Operand, TempId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A branch edge: target block plus the arguments bound to its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchTarget {
    pub block: BlockId,
    pub args: SmallVec<[Operand; 4]>,
}

impl BranchTarget {
    pub fn new(block: BlockId) -> Self {
        Self { block, args: SmallVec::new() }
    }

    pub fn with_args(block: BlockId, args: impl IntoIterator<Item = Operand>) -> Self {
        Self { block, args: args.into_iter().collect() }
    }
}

/// A single IL instruction
///
/// The opcode's schema row dictates how the fields are used: `targets` holds
/// branch edges for terminators and the handler edge for `eh.push`; `ty` is
/// the explicit type attribute of casts, `load` and `call.indirect`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instr {
    pub op: Opcode,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<TempId>,
    pub operands: SmallVec<[Operand; 4]>,
    #[serde(skip_serializing_if = "SmallVec::is_empty", default)]
    pub targets: SmallVec<[BranchTarget; 2]>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ty: Option<Type>,
    /// Source line for diagnostics; None prints as -1
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub line: Option<u32>,
}

impl Instr {
    pub fn new(op: Opcode) -> Self {
        Self {
            op,
            result: None,
            operands: SmallVec::new(),
            targets: SmallVec::new(),
            ty: None,
            line: None,
        }
    }

    pub fn with_result(mut self, result: TempId) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_operands(mut self, operands: impl IntoIterator<Item = Operand>) -> Self {
        self.operands = operands.into_iter().collect();
        self
    }

    pub fn with_target(mut self, target: BranchTarget) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_ty(mut self, ty: Type) -> Self {
        self.ty = Some(ty);
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn is_terminator(&self) -> bool {
        self.op.info().is_terminator()
    }

    /// Successor blocks this instruction can transfer control to.
    ///
    /// `eh.push` is included: its handler target is a control-flow edge for
    /// reachability and dominance purposes even though the op itself falls
    /// through.
    pub fn successors(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.targets.iter().map(|t| t.block)
    }
}

/// A block parameter: an SSA temp bound by every incoming branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockParam {
    pub temp: TempId,
    pub ty: Type,
}

/// A basic block: parameters, straight-line instructions, one terminator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub label: String,
    pub params: Vec<BlockParam>,
    /// All instructions including the terminator in last position
    pub instrs: Vec<Instr>,
}

impl Block {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), params: Vec::new(), instrs: Vec::new() }
    }

    pub fn terminator(&self) -> Option<&Instr> {
        self.instrs.last().filter(|i| i.is_terminator())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator().is_some()
    }

    pub fn push(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    /// Blocks this one branches to, handler edges included
    pub fn successors(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.instrs.iter().flat_map(|i| i.successors())
    }
}
