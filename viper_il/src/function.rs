//! IL functions

use crate::instr::{Block, BlockParam};
use crate::types::Type;
use crate::value::{BlockId, TempId};
use serde::{Deserialize, Serialize};

/// A function parameter; also the entry block's parameter at the same position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub temp: TempId,
    pub ty: Type,
}

/// Function attribute set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FnAttrs {
    /// The function never returns normally (every path traps or loops)
    pub noreturn: bool,
}

impl FnAttrs {
    pub fn is_empty(&self) -> bool {
        *self == FnAttrs::default()
    }
}

/// An IL function: ordered blocks, the first being the entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Type,
    pub blocks: Vec<Block>,
    pub attrs: FnAttrs,
    /// Printable names of SSA temps, indexed by `TempId`
    pub temp_names: Vec<String>,
}

impl Function {
    pub fn new(name: impl Into<String>, ret: Type) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            ret,
            blocks: Vec::new(),
            attrs: FnAttrs::default(),
            temp_names: Vec::new(),
        }
    }

    pub fn temp_count(&self) -> usize {
        self.temp_names.len()
    }

    /// Mint a fresh SSA temp
    pub fn new_temp(&mut self, name: impl Into<String>) -> TempId {
        let id = TempId(self.temp_names.len() as u32);
        self.temp_names.push(name.into());
        id
    }

    pub fn temp_name(&self, id: TempId) -> &str {
        &self.temp_names[id.index()]
    }

    pub fn entry(&self) -> Option<&Block> {
        self.blocks.first()
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(id.index())
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(id.index())
    }

    pub fn block_id(&self, label: &str) -> Option<BlockId> {
        self.blocks.iter().position(|b| b.label == label).map(|i| BlockId(i as u32))
    }

    /// Append a block, returning its id
    pub fn add_block(&mut self, block: Block) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(block);
        id
    }

    /// Declared entry-block parameters (the function parameters)
    pub fn entry_params(&self) -> Vec<BlockParam> {
        self.params.iter().map(|p| BlockParam { temp: p.temp, ty: p.ty }).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::Block;

    #[test]
    fn test_temp_numbering() {
        let mut func = Function::new("f", Type::Void);
        let a = func.new_temp("a");
        let b = func.new_temp("b");
        assert_eq!(a, TempId(0));
        assert_eq!(b, TempId(1));
        assert_eq!(func.temp_name(b), "b");
        assert_eq!(func.temp_count(), 2);
    }

    #[test]
    fn test_block_lookup() {
        let mut func = Function::new("f", Type::I32);
        let entry = func.add_block(Block::new("entry"));
        let exit = func.add_block(Block::new("exit"));

        assert_eq!(entry, BlockId(0));
        assert_eq!(func.block_id("exit"), Some(exit));
        assert_eq!(func.block_id("nope"), None);
        assert_eq!(func.entry().unwrap().label, "entry");
    }
}
