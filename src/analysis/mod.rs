//! Dataflow framework shared by the partial redundancy analyses.
//!
//! An analysis describes its lattice through [`DataflowAnalysis`]; the [`Solver`]
//! walks the [`StructureTree`] and iterates every region until no block output
//! changes, innermost loops first.

use std::fmt;

use crate::{
    block::BlockId,
    candidates::{CandidateCatalog, CandidateId, CandidateSet},
    error::{PreError, Result},
    interrupt::InterruptCheck,
    procedure::Procedure,
    structure::{StructureCache, StructureId, StructureKind, StructureTree},
};

pub mod delayedness;
pub mod earliestness;
pub mod global_anticipatability;
pub mod isolatedness;
pub mod latestness;
pub mod local_anticipatability;
pub mod local_transparency;
pub mod redundant_expression_adjustment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisKind {
    LocalTransparency,
    LocalAnticipatability,
    GlobalAnticipatability,
    Earliestness,
    Delayedness,
    Latestness,
    Isolatedness,
    RedundantExpressionAdjustment,
    ExceptionCheckMotion,
}

impl AnalysisKind {
    pub const fn name(self) -> &'static str {
        match self {
            AnalysisKind::LocalTransparency => "local transparency",
            AnalysisKind::LocalAnticipatability => "local anticipatability",
            AnalysisKind::GlobalAnticipatability => "global anticipatability",
            AnalysisKind::Earliestness => "earliestness",
            AnalysisKind::Delayedness => "delayedness",
            AnalysisKind::Latestness => "latestness",
            AnalysisKind::Isolatedness => "isolatedness",
            AnalysisKind::RedundantExpressionAdjustment => "redundant expression adjustment",
            AnalysisKind::ExceptionCheckMotion => "exception check motion",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Normal,
    Exceptional,
    /// The virtual edge into the procedure entry.
    Boundary,
}

/// A CFG edge, always oriented in control flow direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: BlockId,
    pub to: BlockId,
    pub kind: EdgeKind,
}

impl Edge {
    pub fn normal(from: BlockId, to: BlockId) -> Self {
        Self {
            from,
            to,
            kind: EdgeKind::Normal,
        }
    }

    pub fn is_exceptional(&self) -> bool {
        self.kind == EdgeKind::Exceptional
    }
}

pub trait DataflowAnalysis {
    type Value: Clone + PartialEq + fmt::Debug;

    const KIND: AnalysisKind;
    const DIRECTION: Direction;
    /// Whether exceptional edges take part in the meet.
    const EXCEPTIONAL_EDGES: bool = false;

    /// Starting value of every block output.
    fn initial(&self, block: BlockId) -> Self::Value;

    /// Input of a block with no incoming edge in the analysis direction.
    fn boundary(&self, block: BlockId) -> Self::Value;

    /// Combines the neighbors' outputs. Each value is paired with the edge it
    /// flows along; the procedure entry also gets a [`EdgeKind::Boundary`] input.
    fn meet(&self, block: BlockId, inputs: &[(Edge, Self::Value)]) -> Self::Value;

    fn transfer(&self, block: BlockId, input: &Self::Value) -> Self::Value;

    /// Whether going from `old` to `new` moves down the lattice.
    fn is_monotone(&self, _old: &Self::Value, _new: &Self::Value) -> bool {
        true
    }
}

/// Per block solution. For a forward analysis `entry` holds the meet input and
/// `exit` the transfer output; a backward analysis is the other way round.
#[derive(Debug, Clone, PartialEq)]
pub struct DataflowTables<V> {
    pub entry: Vec<V>,
    pub exit: Vec<V>,
}

impl<V> DataflowTables<V> {
    pub fn entry(&self, block: BlockId) -> &V {
        &self.entry[block.0]
    }

    pub fn exit(&self, block: BlockId) -> &V {
        &self.exit[block.0]
    }
}

/// Where promoted candidates are computed, per block.
#[derive(Debug, Clone, PartialEq)]
pub struct Placements {
    /// Before the first statement.
    pub entry: Vec<CandidateSet>,
    /// Before the terminator.
    pub exit: Vec<CandidateSet>,
    /// The last occurrence after the last kill writes the temporary.
    pub in_place: Vec<CandidateSet>,
}

impl Placements {
    pub fn empty(catalog: &CandidateCatalog, num_blocks: usize) -> Self {
        Self {
            entry: vec![catalog.empty_set(); num_blocks],
            exit: vec![catalog.empty_set(); num_blocks],
            in_place: vec![catalog.empty_set(); num_blocks],
        }
    }

    /// Removes `candidates` from every placement.
    pub fn drop_candidates(&mut self, candidates: &CandidateSet) {
        for set in self.entry.iter_mut().chain(self.exit.iter_mut()).chain(self.in_place.iter_mut()) {
            set.subtract(candidates);
        }
    }

    /// Every candidate placed somewhere.
    pub fn candidates(&self, catalog: &CandidateCatalog) -> CandidateSet {
        let mut set = catalog.empty_set();
        for placed in self.entry.iter().chain(self.exit.iter()).chain(self.in_place.iter()) {
            set.union_with(placed);
        }
        set
    }

    /// Blocks with an entry or exit placement of `candidate`.
    pub fn placed_blocks(&self, candidate: CandidateId) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.entry.len())
            .filter(move |b| self.entry[*b].contains(candidate) || self.exit[*b].contains(candidate))
            .map(BlockId)
    }
}

/// Intersection of the inputs, or `full` when there are none.
pub fn intersect_all<'a>(full: CandidateSet, inputs: impl IntoIterator<Item = &'a CandidateSet>) -> CandidateSet {
    let mut result = full;
    for input in inputs {
        result.intersect_with(input);
    }
    result
}

pub fn union_all<'a>(empty: CandidateSet, inputs: impl IntoIterator<Item = &'a CandidateSet>) -> CandidateSet {
    let mut result = empty;
    for input in inputs {
        result.union_with(input);
    }
    result
}

pub fn trace_sets(catalog: &CandidateCatalog, kind: AnalysisKind, label: &str, sets: &[CandidateSet]) {
    if !log::log_enabled!(log::Level::Trace) {
        return;
    }

    for (block, set) in sets.iter().enumerate() {
        if !set.is_empty() {
            log::trace!("{} {} BB{}: {:?} of {}", kind, label, block, set, catalog.len());
        }
    }
}

/// Structural fixed point solver.
pub struct Solver<'a> {
    proc: &'a Procedure,
    structure: &'a StructureTree,
    interrupt: &'a mut dyn InterruptCheck,
    max_passes: usize,
}

impl<'a> Solver<'a> {
    pub fn new(proc: &'a Procedure, structure: &'a StructureTree, interrupt: &'a mut dyn InterruptCheck) -> Self {
        let max_passes = proc
            .options()
            .max_fixed_point_iterations
            .unwrap_or(proc.num_blocks() + 2);

        Self {
            proc,
            structure,
            interrupt,
            max_passes,
        }
    }

    pub fn solve<A: DataflowAnalysis>(
        &mut self,
        analysis: &A,
        cache: &mut StructureCache<A::Value>,
    ) -> Result<DataflowTables<A::Value>> {
        let n = self.proc.num_blocks();
        let mut tables = DataflowTables {
            entry: (0..n).map(|b| analysis.initial(BlockId(b))).collect(),
            exit: (0..n).map(|b| analysis.initial(BlockId(b))).collect(),
        };

        cache.reset(A::KIND, self.structure.len());
        self.solve_region(analysis, cache, self.structure.root(), &mut tables)?;

        Ok(tables)
    }

    fn solve_region<A: DataflowAnalysis>(
        &mut self,
        analysis: &A,
        cache: &mut StructureCache<A::Value>,
        region: StructureId,
        tables: &mut DataflowTables<A::Value>,
    ) -> Result<bool> {
        let mut children = match &self.structure.node(region).kind {
            StructureKind::Region { children, .. } => children.clone(),
            StructureKind::Block(_) => vec![region],
        };

        if A::DIRECTION == Direction::Backward {
            children.reverse();
        }

        let mut any_change = false;
        let mut passes = 0;

        loop {
            if self.interrupt.should_interrupt(A::KIND.name()) {
                return Err(PreError::Interrupted { phase: A::KIND.name() });
            }

            passes += 1;
            if passes > self.max_passes {
                return Err(PreError::invariant(format!(
                    "{} did not converge in {} passes over region {}",
                    A::KIND,
                    self.max_passes,
                    region.0
                )));
            }

            let mut changed = false;
            for child in children.iter().copied() {
                changed |= match self.structure.node(child).kind {
                    StructureKind::Block(block) => self.visit_block(analysis, cache, child, block, tables)?,
                    StructureKind::Region { .. } => self.solve_region(analysis, cache, child, tables)?,
                };
            }

            any_change |= changed;
            if !changed {
                break;
            }
        }

        Ok(any_change)
    }

    fn inputs<A: DataflowAnalysis>(
        &self,
        analysis: &A,
        block: BlockId,
        tables: &DataflowTables<A::Value>,
    ) -> Vec<(Edge, A::Value)> {
        let proc = self.proc;
        let bb = proc.block(block);
        let mut inputs = Vec::new();

        match A::DIRECTION {
            Direction::Forward => {
                if block == proc.cfg_root() {
                    let edge = Edge {
                        from: block,
                        to: block,
                        kind: EdgeKind::Boundary,
                    };
                    inputs.push((edge, analysis.boundary(block)));
                }

                for pred in bb.predecessor_list().iter().copied() {
                    inputs.push((Edge::normal(pred, block), tables.exit[pred.0].clone()));
                }

                if A::EXCEPTIONAL_EDGES {
                    for pred in bb.exception_predecessors().iter().copied() {
                        let edge = Edge {
                            from: pred,
                            to: block,
                            kind: EdgeKind::Exceptional,
                        };
                        inputs.push((edge, tables.exit[pred.0].clone()));
                    }
                }
            }

            Direction::Backward => {
                for succ in proc.normal_successors(block) {
                    inputs.push((Edge::normal(block, succ), tables.entry[succ.0].clone()));
                }

                if A::EXCEPTIONAL_EDGES {
                    for succ in bb.exception_successors().iter().copied() {
                        let edge = Edge {
                            from: block,
                            to: succ,
                            kind: EdgeKind::Exceptional,
                        };
                        inputs.push((edge, tables.entry[succ.0].clone()));
                    }
                }
            }
        }

        inputs
    }

    /// Returns whether the block output changed.
    fn visit_block<A: DataflowAnalysis>(
        &mut self,
        analysis: &A,
        cache: &mut StructureCache<A::Value>,
        leaf: StructureId,
        block: BlockId,
        tables: &mut DataflowTables<A::Value>,
    ) -> Result<bool> {
        let inputs = self.inputs(analysis, block, tables);
        let input = if inputs.is_empty() {
            analysis.boundary(block)
        } else {
            analysis.meet(block, &inputs)
        };

        if cache.analyzed_before(A::KIND, leaf)? && cache.slot(A::KIND, leaf)? == Some(&input) {
            return Ok(false);
        }

        let output = analysis.transfer(block, &input);
        cache.set_slot(A::KIND, leaf, input.clone())?;

        let (input_slot, output_slot) = match A::DIRECTION {
            Direction::Forward => (&mut tables.entry[block.0], &mut tables.exit[block.0]),
            Direction::Backward => (&mut tables.exit[block.0], &mut tables.entry[block.0]),
        };

        if !analysis.is_monotone(output_slot, &output) {
            return Err(PreError::invariant(format!(
                "{} is not monotone at {}: {:?} -> {:?}",
                A::KIND,
                block,
                output_slot,
                output
            )));
        }

        *input_slot = input;
        let changed = *output_slot != output;
        *output_slot = output;

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::BasicBlockBuilder, interrupt::StepBudget, utils::index_set::KeyIndex, Options};

    /// Forward "reached from entry" over a one candidate universe.
    struct Reach;

    impl DataflowAnalysis for Reach {
        type Value = CandidateSet;

        const KIND: AnalysisKind = AnalysisKind::Earliestness;
        const DIRECTION: Direction = Direction::Forward;

        fn initial(&self, _block: BlockId) -> CandidateSet {
            CandidateSet::new(1)
        }

        fn boundary(&self, _block: BlockId) -> CandidateSet {
            CandidateSet::full(1)
        }

        fn meet(&self, _block: BlockId, inputs: &[(Edge, CandidateSet)]) -> CandidateSet {
            union_all(CandidateSet::new(1), inputs.iter().map(|(_, v)| v))
        }

        fn transfer(&self, _block: BlockId, input: &CandidateSet) -> CandidateSet {
            input.clone()
        }

        fn is_monotone(&self, old: &CandidateSet, new: &CandidateSet) -> bool {
            old.is_subset_of(new)
        }
    }

    fn looping_proc() -> Procedure {
        let mut proc = Procedure::new(Options::default());
        let entry = proc.add_block(1.0);
        let header = proc.add_block(1.0);
        let exit = proc.add_block(1.0);
        let dead = proc.add_block(1.0);

        BasicBlockBuilder::new(&mut proc, entry).goto(header);
        {
            let mut b = BasicBlockBuilder::new(&mut proc, header);
            let c = b.int32(1);
            b.branch(c, (header, Default::default()), (exit, Default::default()));
        }
        BasicBlockBuilder::new(&mut proc, exit).ret(None);
        BasicBlockBuilder::new(&mut proc, dead).goto(exit);
        proc
    }

    #[test]
    fn solver_reaches_loop_and_skips_dead_blocks() {
        let mut proc = looping_proc();
        let structure = StructureTree::build(&mut proc);
        let mut interrupt = crate::interrupt::Never;
        let mut cache = StructureCache::new();

        let tables = Solver::new(&proc, &structure, &mut interrupt)
            .solve(&Reach, &mut cache)
            .unwrap();

        let one = CandidateId::from_index(0);
        assert!(tables.exit(BlockId(1)).contains(one));
        assert!(tables.exit(BlockId(2)).contains(one));
        assert!(!tables.exit(BlockId(3)).contains(one));
        assert_eq!(cache.kind(), Some(AnalysisKind::Earliestness));
    }

    #[test]
    fn solver_honors_interrupts() {
        let mut proc = looping_proc();
        let structure = StructureTree::build(&mut proc);
        let mut interrupt = StepBudget::new(1);
        let mut cache = StructureCache::new();

        let result = Solver::new(&proc, &structure, &mut interrupt).solve(&Reach, &mut cache);
        assert_eq!(result.err(), Some(PreError::Interrupted { phase: "earliestness" }));
    }
}
