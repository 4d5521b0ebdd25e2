use crate::{
    block::BlockId,
    candidates::{CandidateCatalog, CandidateSet},
};

use super::{
    earliestness::Earliestness, intersect_all, local_anticipatability::LocalAnticipatability, AnalysisKind,
    DataflowAnalysis, DataflowTables, Direction, Edge, EdgeKind,
};

/// How far a computation can be pushed down from its earliest edge.
///
/// `LATER(P,S) = EARLIEST(P,S) ∪ (LATERIN[P] ∩ ¬ANTLOC[P])` and
/// `LATERIN[S] = ⋂ LATER(P,S)` over predecessors. The block output kept by the
/// solver is `LATERIN[P] ∩ ¬ANTLOC[P]`; [`Delayedness::later`] adds the edge part.
pub struct Delayedness<'a> {
    catalog: &'a CandidateCatalog,
    local: &'a LocalAnticipatability,
    earliestness: &'a Earliestness<'a>,
    anticipatability: &'a DataflowTables<CandidateSet>,
}

impl<'a> Delayedness<'a> {
    pub fn new(
        catalog: &'a CandidateCatalog,
        local: &'a LocalAnticipatability,
        earliestness: &'a Earliestness<'a>,
        anticipatability: &'a DataflowTables<CandidateSet>,
    ) -> Self {
        Self {
            catalog,
            local,
            earliestness,
            anticipatability,
        }
    }

    fn edge_value(&self, edge: Edge, from_output: &CandidateSet) -> CandidateSet {
        match edge.kind {
            // Entry and handlers compute in place: nothing is delayed into them.
            EdgeKind::Boundary | EdgeKind::Exceptional => self.anticipatability.entry(edge.to).clone(),
            EdgeKind::Normal => self.earliestness.earliest(edge).union(from_output),
        }
    }

    /// `LATER(P,S)` from a solved table.
    pub fn later(&self, tables: &DataflowTables<CandidateSet>, edge: Edge) -> CandidateSet {
        match edge.kind {
            EdgeKind::Normal => self.edge_value(edge, tables.exit(edge.from)),
            _ => self.edge_value(edge, &self.catalog.empty_set()),
        }
    }
}

impl DataflowAnalysis for Delayedness<'_> {
    type Value = CandidateSet;

    const KIND: AnalysisKind = AnalysisKind::Delayedness;
    const DIRECTION: Direction = Direction::Forward;
    const EXCEPTIONAL_EDGES: bool = true;

    fn initial(&self, _block: BlockId) -> CandidateSet {
        self.catalog.full_set()
    }

    fn boundary(&self, block: BlockId) -> CandidateSet {
        self.anticipatability.entry(block).clone()
    }

    fn meet(&self, _block: BlockId, inputs: &[(Edge, CandidateSet)]) -> CandidateSet {
        let values: Vec<CandidateSet> = inputs.iter().map(|(edge, v)| self.edge_value(*edge, v)).collect();
        intersect_all(self.catalog.full_set(), values.iter())
    }

    fn transfer(&self, block: BlockId, laterin: &CandidateSet) -> CandidateSet {
        laterin.difference(self.local.upward(block))
    }

    fn is_monotone(&self, old: &CandidateSet, new: &CandidateSet) -> bool {
        new.is_subset_of(old)
    }
}
