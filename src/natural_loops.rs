use crate::{
    dominators::{Dominators, Graph},
    utils::index_set::{IndexSet, KeyIndex},
};

#[derive(Debug)]
pub struct NaturalLoop<G: Graph> {
    body: Vec<G::Node>,
    members: IndexSet<G::Node>,
    header: G::Node,
    outer_loop_index: Option<usize>,
    index: usize,
}

impl<G: Graph> NaturalLoop<G> {
    fn new(header: G::Node, index: usize) -> Self {
        Self {
            body: vec![],
            members: IndexSet::new(0),
            header,
            outer_loop_index: None,
            index,
        }
    }

    /// Header first, then the rest of the body in discovery order.
    pub fn body(&self) -> &[G::Node] {
        &self.body
    }

    pub fn header(&self) -> G::Node {
        self.header
    }

    pub fn outer_loop_index(&self) -> Option<usize> {
        self.outer_loop_index
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn contains(&self, block: G::Node) -> bool {
        self.members.contains(block)
    }
}

#[derive(Debug)]
pub struct NaturalLoops<G: Graph> {
    loops: Vec<NaturalLoop<G>>,
    inner_most_loop_indices: Vec<Option<usize>>,
}

impl<G: Graph> NaturalLoops<G> {
    pub fn new(graph: &G, dominators: &Dominators<G>) -> Self {
        let mut loops: Vec<NaturalLoop<G>> = vec![];

        // The classic dominator based loop finder: an edge footer -> header where the
        // header dominates the footer is a back edge. All back edges into one header
        // form one loop; its body is found by walking predecessors from the footers
        // until the header is reached.
        for block_index in 0..graph.num_nodes() {
            let Some(header) = graph.node(block_index) else {
                continue;
            };

            for footer in graph.predecessors(header).iter().copied() {
                if !dominators.dominates(header, footer) {
                    continue;
                }

                match loops.iter_mut().find(|l| l.header == header) {
                    Some(l) => l.body.push(footer),
                    None => {
                        let mut l = NaturalLoop::new(header, loops.len());
                        l.body.push(footer);
                        loops.push(l);
                    }
                }
            }
        }

        for l in loops.iter_mut() {
            let footers = std::mem::take(&mut l.body);
            let mut members = IndexSet::new(graph.num_nodes());
            let mut worklist = vec![];

            members.insert(l.header);
            l.body.push(l.header);

            for footer in footers {
                if members.insert(footer) {
                    l.body.push(footer);
                    worklist.push(footer);
                }
            }

            while let Some(block) = worklist.pop() {
                for predecessor in graph.predecessors(block).iter().copied() {
                    if !dominators.is_reachable(predecessor) {
                        continue;
                    }

                    if members.insert(predecessor) {
                        l.body.push(predecessor);
                        worklist.push(predecessor);
                    }
                }
            }

            l.members = members;
        }

        // Natural loops either nest or share a header, and headers are unique here, so
        // the smallest containing loop is the innermost one.
        let mut inner_most_loop_indices: Vec<Option<usize>> = vec![None; graph.num_nodes()];

        for (loop_index, l) in loops.iter().enumerate() {
            for block in l.body.iter().copied() {
                let slot = &mut inner_most_loop_indices[graph.node_index(block)];

                let smaller = match *slot {
                    None => true,
                    Some(current) => l.body.len() < loops[current].body.len(),
                };

                if smaller {
                    *slot = Some(loop_index);
                }
            }
        }

        for loop_index in 0..loops.len() {
            let header = loops[loop_index].header;
            let size = loops[loop_index].body.len();

            loops[loop_index].outer_loop_index = loops
                .iter()
                .enumerate()
                .filter(|(other, l)| *other != loop_index && l.body.len() > size && l.contains(header))
                .min_by_key(|(_, l)| l.body.len())
                .map(|(other, _)| other);
        }

        Self {
            loops,
            inner_most_loop_indices,
        }
    }

    pub fn num_loops(&self) -> usize {
        self.loops.len()
    }

    pub fn loop_(&self, index: usize) -> &NaturalLoop<G> {
        &self.loops[index]
    }

    pub fn loops(&self) -> &[NaturalLoop<G>] {
        &self.loops
    }

    pub fn inner_most_loop_of(&self, block: G::Node) -> Option<&NaturalLoop<G>> {
        let index = (*self.inner_most_loop_indices.get(block.index())?)?;
        Some(&self.loops[index])
    }

    pub fn inner_most_outer_loop_of(&self, l: &NaturalLoop<G>) -> Option<&NaturalLoop<G>> {
        l.outer_loop_index.map(|index| &self.loops[index])
    }

    pub fn loop_depth(&self, block: G::Node) -> usize {
        let mut l = self.inner_most_loop_of(block);
        let mut depth = 0;

        while let Some(l_) = l {
            depth += 1;
            l = self.inner_most_outer_loop_of(l_);
        }

        depth
    }

    pub fn loops_of(&self, block: G::Node) -> Vec<&NaturalLoop<G>> {
        let mut l = self.inner_most_loop_of(block);
        let mut loops = vec![];

        while let Some(l_) = l {
            loops.push(l_);
            l = self.inner_most_outer_loop_of(l_);
        }

        loops
    }
}
