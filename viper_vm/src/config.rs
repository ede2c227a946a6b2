//! Runner configuration

use crate::runner::Vm;
use std::io::Write;

/// Host poll callback, invoked every N dispatched instructions with the VM
/// itself; returning `false` pauses execution at the instruction boundary.
///
/// The callback may inspect the VM (steps, frame depth, current location,
/// registers) and manage breakpoints, but it may not mutate module structure
/// or SSA state, and it must not re-enter the run loop.
pub type PollFn = Box<dyn FnMut(&mut Vm<'_>) -> bool>;

/// A breakpoint specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakSpec {
    /// Break before the instruction at (function, block label, index)
    At { function: String, block: String, index: usize },
    /// Break before any instruction tagged with this source line
    Line { line: u32 },
}

/// Per-run configuration for the VM
pub struct RunConfig {
    /// Poll the host every N dispatched instructions; 0 disables polling
    pub interrupt_every_n: usize,
    pub poll: Option<PollFn>,
    /// Raise a RuntimeError trap once this many instructions have dispatched
    pub max_steps: Option<u64>,
    /// Advisory: verifier-checked ops may elide redundant runtime checks.
    /// Checked ops always enforce regardless.
    pub bounds_checks: bool,
    pub breakpoints: Vec<BreakSpec>,
    /// Receives one line per dispatched instruction
    pub trace: Option<Box<dyn Write>>,
    /// Maintain per-opcode execution counts
    pub count_ops: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            interrupt_every_n: 0,
            poll: None,
            max_steps: None,
            bounds_checks: true,
            breakpoints: Vec::new(),
            trace: None,
            count_ops: false,
        }
    }
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("interrupt_every_n", &self.interrupt_every_n)
            .field("poll", &self.poll.is_some())
            .field("max_steps", &self.max_steps)
            .field("bounds_checks", &self.bounds_checks)
            .field("breakpoints", &self.breakpoints)
            .field("trace", &self.trace.is_some())
            .field("count_ops", &self.count_ops)
            .finish()
    }
}

impl RunConfig {
    pub fn with_interrupts(mut self, every_n: usize, poll: PollFn) -> Self {
        self.interrupt_every_n = every_n;
        self.poll = Some(poll);
        self
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_breakpoint(mut self, spec: BreakSpec) -> Self {
        self.breakpoints.push(spec);
        self
    }

    pub fn with_trace(mut self, sink: Box<dyn Write>) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn with_op_counts(mut self) -> Self {
        self.count_ops = true;
        self
    }
}
