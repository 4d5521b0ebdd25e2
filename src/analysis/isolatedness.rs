use crate::{
    block::BlockId,
    candidates::{CandidateCatalog, CandidateSet},
};

use super::{
    intersect_all, latestness::Latestness, local_anticipatability::LocalAnticipatability,
    local_transparency::LocalTransparency, AnalysisKind, DataflowAnalysis, DataflowTables, Direction, Edge,
};

/// `ISOLOUT[B]`: candidates whose value at the exit of `B` is never reused.
///
/// Along each successor `S` the value is dead when `S` gets its own insertion, when
/// `S` recomputes it from a delayed placement, or when `S` does not use it and either
/// kills it or passes it on to a point where it is isolated again. A computation
/// that is isolated at its block exit does not need a temporary.
pub struct Isolatedness<'a> {
    catalog: &'a CandidateCatalog,
    transparency: &'a LocalTransparency,
    local: &'a LocalAnticipatability,
    latestness: &'a Latestness,
    later: &'a DataflowTables<CandidateSet>,
}

impl<'a> Isolatedness<'a> {
    pub fn new(
        catalog: &'a CandidateCatalog,
        transparency: &'a LocalTransparency,
        local: &'a LocalAnticipatability,
        latestness: &'a Latestness,
        later: &'a DataflowTables<CandidateSet>,
    ) -> Self {
        Self {
            catalog,
            transparency,
            local,
            latestness,
            later,
        }
    }
}

impl DataflowAnalysis for Isolatedness<'_> {
    type Value = CandidateSet;

    const KIND: AnalysisKind = AnalysisKind::Isolatedness;
    const DIRECTION: Direction = Direction::Backward;

    fn initial(&self, _block: BlockId) -> CandidateSet {
        self.catalog.full_set()
    }

    fn boundary(&self, _block: BlockId) -> CandidateSet {
        self.catalog.full_set()
    }

    fn meet(&self, _block: BlockId, inputs: &[(Edge, CandidateSet)]) -> CandidateSet {
        let values: Vec<CandidateSet> = inputs
            .iter()
            .map(|(edge, value)| match self.latestness.insert(edge.from, edge.to) {
                Some(insert) => value.union(insert),
                None => value.clone(),
            })
            .collect();

        intersect_all(self.catalog.full_set(), values.iter())
    }

    /// Value of the successor edge term for `S`, given `ISOLOUT[S]`.
    fn transfer(&self, block: BlockId, isolout: &CandidateSet) -> CandidateSet {
        let upward = self.local.upward(block);

        let recomputed = upward.intersection(self.later.entry(block));

        let mut passed = self.transparency.transparent(block).complemented();
        passed.union_with(isolout);
        passed.subtract(upward);

        recomputed.union(&passed)
    }

    fn is_monotone(&self, old: &CandidateSet, new: &CandidateSet) -> bool {
        new.is_subset_of(old)
    }
}
