//! Module-level optimization pass driver
//!
//! Passes transform a module in place. The driver snapshots the module before
//! each pass and re-verifies afterwards; a pass that errors out or whose
//! output fails verification is an implementation bug, so the driver logs it
//! and restores the pre-transform module.

use crate::cfg::Cfg;
use crate::module::Module;
use crate::registry::Registry;
use crate::value::BlockId;
use crate::verifier::verify_module;
use std::collections::HashMap;

/// A module transform
pub trait Pass {
    fn name(&self) -> &'static str;

    /// Returns whether the module changed
    fn run_on(&mut self, module: &mut Module) -> anyhow::Result<bool>;
}

/// Outcome of one pass under the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOutcome {
    pub name: &'static str,
    pub changed: bool,
    /// The pass broke verification and its output was discarded
    pub reverted: bool,
}

/// Runs a pipeline of passes with the snapshot/re-verify protocol
pub struct PassManager<'r> {
    registry: &'r Registry,
    passes: Vec<Box<dyn Pass>>,
}

impl<'r> PassManager<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry, passes: Vec::new() }
    }

    pub fn add_pass(&mut self, pass: impl Pass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn run(&mut self, module: &mut Module) -> Vec<PassOutcome> {
        let mut outcomes = Vec::with_capacity(self.passes.len());
        for pass in &mut self.passes {
            let snapshot = module.clone();
            let changed = match pass.run_on(module) {
                Ok(changed) => changed,
                Err(err) => {
                    log::error!("pass '{}' failed: {:#}; restoring input", pass.name(), err);
                    *module = snapshot;
                    outcomes.push(PassOutcome { name: pass.name(), changed: false, reverted: true });
                    continue;
                }
            };
            if !changed {
                outcomes.push(PassOutcome { name: pass.name(), changed: false, reverted: false });
                continue;
            }
            let diags = verify_module(module, self.registry);
            if diags.has_errors() {
                log::error!("pass '{}' produced an unverifiable module; restoring input:\n{}", pass.name(), diags);
                *module = snapshot;
                outcomes.push(PassOutcome { name: pass.name(), changed: false, reverted: true });
            } else {
                log::debug!("pass '{}' changed the module", pass.name());
                outcomes.push(PassOutcome { name: pass.name(), changed: true, reverted: false });
            }
        }
        outcomes
    }
}

/// Removes blocks unreachable from the entry (SimplifyCFG subset)
#[derive(Debug, Default)]
pub struct RemoveUnreachableBlocks;

impl Pass for RemoveUnreachableBlocks {
    fn name(&self) -> &'static str {
        "remove-unreachable-blocks"
    }

    fn run_on(&mut self, module: &mut Module) -> anyhow::Result<bool> {
        let mut changed = false;
        for function in module.functions.values_mut() {
            let cfg = Cfg::build(function);
            if cfg.rpo.len() == function.blocks.len() {
                continue;
            }

            // Compact the block list and remap every branch target
            let mut remap: HashMap<BlockId, BlockId> = HashMap::new();
            let mut kept = Vec::with_capacity(cfg.rpo.len());
            for (old_index, block) in std::mem::take(&mut function.blocks).into_iter().enumerate() {
                let old_id = BlockId(old_index as u32);
                if cfg.is_reachable(old_id) {
                    remap.insert(old_id, BlockId(kept.len() as u32));
                    kept.push(block);
                }
            }
            for block in &mut kept {
                for instr in &mut block.instrs {
                    for target in &mut instr.targets {
                        target.block = remap[&target.block];
                    }
                }
            }
            function.blocks = kept;
            changed = true;
        }
        Ok(changed)
    }
}

/// Deletes pure instructions whose results are never used (DCE subset)
#[derive(Debug, Default)]
pub struct DeadCodeElim;

impl Pass for DeadCodeElim {
    fn name(&self) -> &'static str {
        "dead-code-elim"
    }

    fn run_on(&mut self, module: &mut Module) -> anyhow::Result<bool> {
        let mut changed = false;
        for function in module.functions.values_mut() {
            loop {
                let mut uses = vec![0usize; function.temp_count()];
                for block in &function.blocks {
                    for instr in &block.instrs {
                        let operands = instr.operands.iter().chain(instr.targets.iter().flat_map(|t| t.args.iter()));
                        for operand in operands {
                            if let Some(temp) = operand.as_temp() {
                                uses[temp.index()] += 1;
                            }
                        }
                    }
                }

                let mut removed_any = false;
                for block in &mut function.blocks {
                    block.instrs.retain(|instr| {
                        let dead = instr.op.info().is_pure()
                            && matches!(instr.result, Some(result) if uses[result.index()] == 0);
                        if dead {
                            removed_any = true;
                        }
                        !dead
                    });
                }
                if !removed_any {
                    break;
                }
                changed = true;
            }
        }
        Ok(changed)
    }
}
