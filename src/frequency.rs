use crate::{
    block::{BlockId, Frequency},
    procedure::Procedure,
};

/// Block execution frequencies, used for cost/benefit pruning and for deciding
/// which successors are cold.
pub trait FrequencyOracle {
    /// Called once per analysis round before any query.
    fn prepare(&mut self, _proc: &mut Procedure) {}

    fn weight(&self, block: BlockId) -> f64;

    fn is_cold(&self, block: BlockId) -> bool;
}

/// Estimates frequencies from the CFG alone: a block's own frequency scaled by
/// 10 per enclosing loop. Blocks reached only through exception edges or rare
/// edges, or with a frequency below the cold threshold, are cold.
#[derive(Debug, Default)]
pub struct StaticFrequencies {
    weights: Vec<f64>,
    cold: Vec<bool>,
}

impl StaticFrequencies {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrequencyOracle for StaticFrequencies {
    fn prepare(&mut self, proc: &mut Procedure) {
        const BASE: f64 = 10.0;

        let natural_loops = proc.natural_loops_or_compute();
        let threshold = proc.options().cold_block_frequency;

        self.weights.clear();
        self.cold.clear();

        for block in proc.blocks() {
            let frequency = proc.block(block).frequency();
            self.weights.push(frequency * BASE.powi(natural_loops.loop_depth(block) as _));

            let bb = proc.block(block);
            let only_exceptional = bb.predecessor_list().is_empty() && !bb.exception_predecessors().is_empty();
            let only_rare = !bb.predecessor_list().is_empty()
                && bb.predecessor_list().iter().all(|pred| {
                    proc.block(*pred)
                        .successor_list()
                        .iter()
                        .filter(|(succ, _)| *succ == block)
                        .all(|(_, f)| *f == Frequency::Rare)
                });

            self.cold.push(only_exceptional || only_rare || frequency < threshold);
        }
    }

    fn weight(&self, block: BlockId) -> f64 {
        self.weights.get(block.0).copied().unwrap_or(0.0)
    }

    fn is_cold(&self, block: BlockId) -> bool {
        self.cold.get(block.0).copied().unwrap_or(true)
    }
}

/// Fixed weights, mostly for tests.
#[derive(Debug, Clone, Default)]
pub struct FixedFrequencies {
    pub weights: Vec<f64>,
    pub cold: Vec<bool>,
}

impl FrequencyOracle for FixedFrequencies {
    fn weight(&self, block: BlockId) -> f64 {
        self.weights.get(block.0).copied().unwrap_or(1.0)
    }

    fn is_cold(&self, block: BlockId) -> bool {
        self.cold.get(block.0).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::BasicBlockBuilder, Options};

    #[test]
    fn loop_blocks_weigh_more_and_handlers_are_cold() {
        let mut proc = Procedure::new(Options::default());
        let entry = proc.add_block(1.0);
        let body = proc.add_block(1.0);
        let exit = proc.add_block(1.0);
        let handler = proc.add_block(1.0);

        BasicBlockBuilder::new(&mut proc, entry).goto(body);
        {
            let mut b = BasicBlockBuilder::new(&mut proc, body);
            b.handler(handler);
            let c = b.int32(0);
            b.branch(c, (body, Frequency::Normal), (exit, Frequency::Rare));
        }
        BasicBlockBuilder::new(&mut proc, exit).ret(None);
        BasicBlockBuilder::new(&mut proc, handler).ret(None);

        let mut frequencies = StaticFrequencies::new();
        frequencies.prepare(&mut proc);

        assert_eq!(frequencies.weight(entry), 1.0);
        assert_eq!(frequencies.weight(body), 10.0);
        assert!(frequencies.is_cold(handler));
        assert!(frequencies.is_cold(exit));
        assert!(!frequencies.is_cold(body));
    }
}
