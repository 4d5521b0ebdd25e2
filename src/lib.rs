//! Partial redundancy elimination over a tree-based IR with exceptional control flow.
//!
//! The pass is lazy code motion in edge form: it finds computations that are
//! redundant along some paths, places new computations at the latest points that
//! still remove the redundancy, and rewrites redundant occurrences to read a
//! temporary. Exception raising checks take part too, with an extra ordering
//! analysis that keeps the program's exception order intact.
//!
//! ```no_run
//! use pre::{block::BasicBlockBuilder, procedure::Procedure, Options, PassEnv};
//!
//! let mut proc = Procedure::new(Options::default());
//! let entry = proc.add_block(1.0);
//! BasicBlockBuilder::new(&mut proc, entry).ret(None);
//!
//! let outcome = pre::run(&mut proc, &mut PassEnv::default()).unwrap();
//! assert!(!outcome.altered);
//! ```

pub mod analysis;
pub mod block;
pub mod break_critical_edges;
pub mod candidates;
pub mod dominators;
pub mod effects;
pub mod error;
pub mod exception_check_motion;
pub mod frequency;
pub mod gate;
pub mod insertion_set;
pub mod interrupt;
pub mod natural_loops;
pub mod node;
pub mod opcode;
pub mod partial_redundancy;
pub mod procedure;
pub mod rewrite;
pub mod structure;
pub mod symbol;
pub mod typ;
pub mod use_counts;
pub mod utils;


pub use error::{PreError, Result};
pub use partial_redundancy::{run, PartialRedundancy, PreOutcome, PreStats, PromotedTemp};

use crate::{
    frequency::{FrequencyOracle, StaticFrequencies},
    gate::{AllowAll, TransformationGate},
    interrupt::{InterruptCheck, Never},
};

/// Knobs of the pass. Lives on the [`procedure::Procedure`] being optimized.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// Treat `LoadAddr` as a load candidate instead of an address operand.
    pub loadaddr_as_load: bool,
    /// Report replaced integer occurrences as value profiling candidates.
    pub value_profiling: bool,
    pub max_value_profiled_expressions: usize,
    /// Procedures with more candidates than this are not optimized.
    pub max_candidates: usize,
    /// Passes over one region before the solver gives up. `None` means
    /// the block count plus two.
    pub max_fixed_point_iterations: Option<usize>,
    /// Blocks with a frequency below this are cold.
    pub cold_block_frequency: f64,
    /// Leave cold successors out of global anticipatability for candidates
    /// that cannot raise.
    pub ignore_cold_successors: bool,
    /// Split critical edges that need an insertion and re-run the analyses once.
    /// Without it the affected candidates are dropped.
    pub split_critical_edges: bool,
    /// Dump per block sets at trace level.
    pub trace: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            loadaddr_as_load: false,
            value_profiling: false,
            max_value_profiled_expressions: 64,
            max_candidates: u16::MAX as usize,
            max_fixed_point_iterations: None,
            cold_block_frequency: 0.01,
            ignore_cold_successors: true,
            split_critical_edges: true,
            trace: false,
        }
    }
}

/// Policies injected by the compiler driving the pass.
pub struct PassEnv {
    pub gate: Box<dyn TransformationGate>,
    pub interrupt: Box<dyn InterruptCheck>,
    pub frequencies: Box<dyn FrequencyOracle>,
}

impl PassEnv {
    pub fn new(
        gate: Box<dyn TransformationGate>,
        interrupt: Box<dyn InterruptCheck>,
        frequencies: Box<dyn FrequencyOracle>,
    ) -> Self {
        Self {
            gate,
            interrupt,
            frequencies,
        }
    }

    pub fn with_gate(mut self, gate: impl TransformationGate + 'static) -> Self {
        self.gate = Box::new(gate);
        self
    }

    pub fn with_interrupt(mut self, interrupt: impl InterruptCheck + 'static) -> Self {
        self.interrupt = Box::new(interrupt);
        self
    }

    pub fn with_frequencies(mut self, frequencies: impl FrequencyOracle + 'static) -> Self {
        self.frequencies = Box::new(frequencies);
        self
    }
}

impl Default for PassEnv {
    fn default() -> Self {
        Self::new(Box::new(AllowAll), Box::new(Never), Box::new(StaticFrequencies::new()))
    }
}
