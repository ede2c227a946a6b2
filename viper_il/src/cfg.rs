//! Control-flow graph over a function's blocks
//!
//! Handler edges (from `eh.push` to its handler block) are part of the graph:
//! a handler is reachable, and values flowing into it must dominate it, even
//! though no terminator names it.

use crate::function::Function;
use crate::opcode::Opcode;
use crate::value::BlockId;

/// Successor/predecessor sets and a reverse post-order for one function
#[derive(Debug, Clone)]
pub struct Cfg {
    pub succs: Vec<Vec<BlockId>>,
    pub preds: Vec<Vec<BlockId>>,
    /// Reverse post-order over reachable blocks, entry first
    pub rpo: Vec<BlockId>,
    /// Position of each block in `rpo`; `usize::MAX` for unreachable blocks
    pub rpo_index: Vec<usize>,
    /// Handler edges as (pushing block, index of the `eh.push`, handler)
    pub handler_edges: Vec<(BlockId, usize, BlockId)>,
}

impl Cfg {
    pub fn build(function: &Function) -> Cfg {
        let n = function.blocks.len();
        let mut succs = vec![Vec::new(); n];
        let mut preds = vec![Vec::new(); n];
        let mut handler_edges = Vec::new();

        for (index, block) in function.blocks.iter().enumerate() {
            let from = BlockId(index as u32);
            for (instr_index, instr) in block.instrs.iter().enumerate() {
                for target in &instr.targets {
                    succs[index].push(target.block);
                    preds[target.block.index()].push(from);
                    if instr.op == Opcode::EhPush {
                        handler_edges.push((from, instr_index, target.block));
                    }
                }
            }
        }

        // Post-order DFS from the entry block
        let mut rpo = Vec::with_capacity(n);
        if n > 0 {
            let mut visited = vec![false; n];
            let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
            visited[0] = true;
            while let Some((block, next_succ)) = stack.last_mut() {
                if let Some(succ) = succs[*block].get(*next_succ) {
                    *next_succ += 1;
                    let succ = succ.index();
                    if !visited[succ] {
                        visited[succ] = true;
                        stack.push((succ, 0));
                    }
                } else {
                    rpo.push(BlockId(*block as u32));
                    stack.pop();
                }
            }
            rpo.reverse();
        }

        let mut rpo_index = vec![usize::MAX; n];
        for (i, block) in rpo.iter().enumerate() {
            rpo_index[block.index()] = i;
        }

        Cfg { succs, preds, rpo, rpo_index, handler_edges }
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo_index[block.index()] != usize::MAX
    }

    pub fn block_count(&self) -> usize {
        self.succs.len()
    }
}
