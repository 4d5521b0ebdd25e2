use crate::{block::BlockId, candidates::CandidateId};

/// Decides whether an individual placement or elimination may be applied.
/// A rejection only costs precision: the candidate keeps its original
/// computation at that site.
pub trait TransformationGate {
    fn allow_placement(&mut self, candidate: CandidateId, block: BlockId) -> bool;

    fn allow_elimination(&mut self, candidate: CandidateId, block: BlockId) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl TransformationGate for AllowAll {
    fn allow_placement(&mut self, _candidate: CandidateId, _block: BlockId) -> bool {
        true
    }

    fn allow_elimination(&mut self, _candidate: CandidateId, _block: BlockId) -> bool {
        true
    }
}

/// Numbers every query in the order it is asked and allows only those inside
/// `range`. Bisecting the range isolates the transformation behind a miscompile.
#[derive(Debug, Clone)]
pub struct IndexGate {
    pub range: std::ops::Range<usize>,
    next: usize,
    pub rejected: Vec<(usize, CandidateId, BlockId)>,
}

impl IndexGate {
    pub fn new(range: std::ops::Range<usize>) -> Self {
        Self {
            range,
            next: 0,
            rejected: Vec::new(),
        }
    }

    /// Allows the first `limit` transformations.
    pub fn first(limit: usize) -> Self {
        Self::new(0..limit)
    }

    pub fn queries(&self) -> usize {
        self.next
    }

    fn decide(&mut self, candidate: CandidateId, block: BlockId) -> bool {
        let index = self.next;
        self.next += 1;

        let allowed = self.range.contains(&index);
        if !allowed {
            log::debug!("gate rejected transformation {} ({} in {})", index, candidate, block);
            self.rejected.push((index, candidate, block));
        }
        allowed
    }
}

impl TransformationGate for IndexGate {
    fn allow_placement(&mut self, candidate: CandidateId, block: BlockId) -> bool {
        self.decide(candidate, block)
    }

    fn allow_elimination(&mut self, candidate: CandidateId, block: BlockId) -> bool {
        self.decide(candidate, block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_gate_allows_only_its_range() {
        let mut gate = IndexGate::new(1..3);
        let c = CandidateId::new(1);
        let b = BlockId(0);

        assert!(!gate.allow_placement(c, b));
        assert!(gate.allow_placement(c, b));
        assert!(gate.allow_elimination(c, b));
        assert!(!gate.allow_elimination(c, b));
        assert_eq!(gate.queries(), 4);
        assert_eq!(gate.rejected.len(), 2);
    }
}
