use crate::{
    block::BlockId,
    candidates::{CandidateCatalog, CandidateSet},
    procedure::Procedure,
    structure::StructureTree,
};

use super::{delayedness::Delayedness, trace_sets, AnalysisKind, DataflowTables, Edge};

/// Edge insertions `INSERT(P,S) = LATER(P,S) ∩ ¬LATERIN[S]`, mapped onto blocks.
///
/// An insertion goes to the exit of `P` when `P` has a single successor and to the
/// entry of `S` when `S` has a single predecessor. Anything else needs the edge
/// split first.
pub struct Latestness {
    /// `latestness.in`: computed before the first statement.
    pub entry: Vec<CandidateSet>,
    /// `latestness.out`: computed before the terminator.
    pub exit: Vec<CandidateSet>,
    pub critical: Vec<(BlockId, BlockId, CandidateSet)>,
    /// Candidates that would need an insertion on an edge that cannot hold one.
    pub rejected: CandidateSet,
    insert: indexmap::IndexMap<(BlockId, BlockId), CandidateSet>,
}

impl Latestness {
    pub fn compute(
        proc: &Procedure,
        structure: &StructureTree,
        catalog: &CandidateCatalog,
        delayedness: &Delayedness<'_>,
        later: &DataflowTables<CandidateSet>,
        anticipatability: &DataflowTables<CandidateSet>,
    ) -> Self {
        let n = proc.num_blocks();
        let mut this = Self {
            entry: vec![catalog.empty_set(); n],
            exit: vec![catalog.empty_set(); n],
            critical: Vec::new(),
            rejected: catalog.empty_set(),
            insert: indexmap::IndexMap::new(),
        };

        for s in structure.reverse_post_order().iter().copied() {
            let laterin = later.entry(s);
            let bb = proc.block(s);

            for p in bb.predecessor_list().iter().copied() {
                if !structure.is_reachable(p) {
                    continue;
                }

                let insert = delayedness.later(later, Edge::normal(p, s)).difference(laterin);
                if insert.is_empty() {
                    continue;
                }

                this.insert.insert((p, s), insert.clone());

                if proc.normal_successors(p).len() == 1 {
                    this.exit[p.0].union_with(&insert);
                } else if bb.predecessor_list().len() == 1 && bb.exception_predecessors().is_empty() {
                    this.entry[s.0].union_with(&insert);
                } else {
                    this.critical.push((p, s, insert));
                }
            }

            let exceptional = !bb.exception_predecessors().is_empty();
            let entry_with_predecessors = s == proc.cfg_root() && !bb.predecessor_list().is_empty();

            if exceptional || entry_with_predecessors {
                let insert = anticipatability.entry(s).difference(laterin);
                if !insert.is_empty() {
                    log::debug!("insertion into {} needs an edge that cannot hold code: {:?}", s, insert);
                    this.rejected.union_with(&insert);
                }
            }
        }

        trace_sets(catalog, AnalysisKind::Latestness, "entry", &this.entry);
        trace_sets(catalog, AnalysisKind::Latestness, "exit", &this.exit);

        this
    }

    /// `INSERT(P,S)` for a normal edge, empty when nothing is inserted on it.
    pub fn insert(&self, from: BlockId, to: BlockId) -> Option<&CandidateSet> {
        self.insert.get(&(from, to))
    }

    pub fn has_critical(&self) -> bool {
        !self.critical.is_empty()
    }

    /// Candidates whose insertions landed on critical edges.
    pub fn critical_candidates(&self, catalog: &CandidateCatalog) -> CandidateSet {
        let mut set = catalog.empty_set();
        for (_, _, insert) in &self.critical {
            set.union_with(insert);
        }
        set
    }
}
