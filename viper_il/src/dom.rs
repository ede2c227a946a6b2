//! Dominator computation (Cooper/Harvey/Kennedy iterative algorithm)

use crate::cfg::Cfg;
use crate::value::BlockId;

/// Immediate-dominator tree over the reachable blocks of a CFG
#[derive(Debug, Clone)]
pub struct DomTree {
    /// Immediate dominator per block; entry maps to itself, unreachable
    /// blocks to `None`
    idom: Vec<Option<BlockId>>,
}

impl DomTree {
    pub fn build(cfg: &Cfg) -> DomTree {
        let n = cfg.block_count();
        let mut idom: Vec<Option<BlockId>> = vec![None; n];
        if n == 0 {
            return DomTree { idom };
        }
        idom[0] = Some(BlockId(0));

        let mut changed = true;
        while changed {
            changed = false;
            // Skip the entry (rpo[0])
            for &block in cfg.rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &pred in &cfg.preds[block.index()] {
                    if idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, &cfg.rpo_index, pred, current),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom[block.index()] != Some(new_idom) {
                        idom[block.index()] = Some(new_idom);
                        changed = true;
                    }
                }
            }
        }

        DomTree { idom }
    }

    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(block.index()).copied().flatten()
    }

    /// Whether `a` dominates `b` (reflexive)
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if self.idom[b.index()].is_none() || self.idom[a.index()].is_none() {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            let parent = match self.idom[current.index()] {
                Some(parent) => parent,
                None => return false,
            };
            if parent == current {
                // reached the entry
                return a == current;
            }
            current = parent;
        }
    }
}

fn intersect(idom: &[Option<BlockId>], rpo_index: &[usize], mut a: BlockId, mut b: BlockId) -> BlockId {
    while a != b {
        while rpo_index[a.index()] > rpo_index[b.index()] {
            a = idom[a.index()].expect("processed block");
        }
        while rpo_index[b.index()] > rpo_index[a.index()] {
            b = idom[b.index()].expect("processed block");
        }
    }
    a
}
