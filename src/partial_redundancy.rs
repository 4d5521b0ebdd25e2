//! The pass driver.
//!
//! [`AnalysisContext`] owns the catalog, the local sets and every solved global
//! table. Each stage borrows only the tables it needs and refuses to run before
//! them. [`PartialRedundancy`] turns the optimistic lazy code motion solution into
//! the placements that are actually applied:
//!
//! 1. candidates that would need an insertion on an edge that cannot hold code are
//!    dropped, after one round of critical edge splitting;
//! 2. candidates with no redundant occurrence anywhere are left alone;
//! 3. the gate may veto individual placements;
//! 4. exception check motion keeps only placements that respect evaluation order;
//! 5. expressions whose placements cost more than the redundancy they remove are
//!    invalidated, weighted by block frequency.

use crate::{
    analysis::{
        delayedness::Delayedness,
        earliestness::{Earliestness, NotAvailable},
        global_anticipatability::GlobalAnticipatability,
        isolatedness::Isolatedness,
        latestness::Latestness,
        local_anticipatability::LocalAnticipatability,
        local_transparency::LocalTransparency,
        trace_sets, union_all, AnalysisKind, DataflowTables, Placements, Solver,
    },
    block::BlockId,
    break_critical_edges::break_critical_edges,
    candidates::{CandidateCatalog, CandidateId, CandidateSet},
    error::{PreError, Result},
    exception_check_motion::{Adjustment, ExceptionCheckMotion},
    frequency::FrequencyOracle,
    gate::TransformationGate,
    interrupt::InterruptCheck,
    node::NodeId,
    procedure::Procedure,
    rewrite::{rewrite, RewritePlan},
    structure::{StructureCache, StructureTree},
    utils::phase_scope::phase_scope,
    PassEnv,
};

pub use crate::rewrite::PromotedTemp;

/// Counters for one run of the pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreStats {
    pub candidates: usize,
    /// Candidates that got a temporary.
    pub promoted: usize,
    /// Statements inserted at entry and exit placements.
    pub placements: usize,
    pub eliminated: usize,
    pub checks_removed: usize,
    /// Stores of promoted locations that also update the temporary.
    pub privatized_stores: usize,
    /// Expressions dropped by cost/benefit.
    pub invalidated: usize,
    /// Placements and eliminations refused for legality or by the gate.
    pub rejected: usize,
    pub split_edges: usize,
    pub motion_rounds: usize,
    /// Exception check motion kept a not yet converged solution.
    pub motion_fell_back: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PreOutcome {
    pub altered: bool,
    /// Local commoning and dead store elimination have new opportunities.
    pub request_local_cleanup: bool,
    pub temporaries: Vec<PromotedTemp>,
    pub profiling_candidates: Vec<NodeId>,
    pub stats: PreStats,
}

fn required<T>(slot: Option<&T>, stage: AnalysisKind, missing: AnalysisKind) -> Result<&T> {
    slot.ok_or(PreError::StageOrder { stage, missing })
}

/// Result tables of every analysis over one shape of the CFG.
pub struct AnalysisContext {
    pub catalog: CandidateCatalog,
    pub transparency: LocalTransparency,
    pub local: LocalAnticipatability,
    pub structure: StructureTree,
    cold: Vec<bool>,
    anticipatability: Option<DataflowTables<CandidateSet>>,
    not_available: Option<DataflowTables<CandidateSet>>,
    later: Option<DataflowTables<CandidateSet>>,
    latestness: Option<Latestness>,
    isolated: Option<DataflowTables<CandidateSet>>,
}

impl AnalysisContext {
    /// Builds the catalog and the local sets. `frequencies` must be prepared for `proc`.
    pub fn new(proc: &mut Procedure, frequencies: &dyn FrequencyOracle) -> Result<Self> {
        let structure = StructureTree::build(proc);
        let catalog = CandidateCatalog::build(proc)?;
        let transparency = LocalTransparency::compute(proc, &catalog);
        let local = LocalAnticipatability::compute(proc, &catalog);
        let cold = proc.blocks().map(|b| frequencies.is_cold(b)).collect();

        Ok(Self {
            catalog,
            transparency,
            local,
            structure,
            cold,
            anticipatability: None,
            not_available: None,
            later: None,
            latestness: None,
            isolated: None,
        })
    }

    /// Runs every global stage in order.
    pub fn analyze(&mut self, proc: &Procedure, interrupt: &mut dyn InterruptCheck) -> Result<()> {
        self.solve_anticipatability(proc, interrupt)?;
        self.solve_earliestness(proc, interrupt)?;
        self.solve_delayedness(proc, interrupt)?;
        self.compute_latestness(proc)?;
        self.solve_isolatedness(proc, interrupt)
    }

    pub fn solve_anticipatability(&mut self, proc: &Procedure, interrupt: &mut dyn InterruptCheck) -> Result<()> {
        let analysis = GlobalAnticipatability::new(
            &self.catalog,
            &self.transparency,
            &self.local,
            &self.cold,
            proc.options().ignore_cold_successors,
        );
        let tables = Solver::new(proc, &self.structure, interrupt).solve(&analysis, &mut StructureCache::new())?;

        if proc.options().trace {
            trace_sets(&self.catalog, AnalysisKind::GlobalAnticipatability, "in", &tables.entry);
        }
        self.anticipatability = Some(tables);
        Ok(())
    }

    /// Solves not-availability; earliestness itself is evaluated per edge from it.
    pub fn solve_earliestness(&mut self, proc: &Procedure, interrupt: &mut dyn InterruptCheck) -> Result<()> {
        required(
            self.anticipatability.as_ref(),
            AnalysisKind::Earliestness,
            AnalysisKind::GlobalAnticipatability,
        )?;

        let analysis = NotAvailable::new(&self.catalog, &self.transparency, &self.local);
        let tables = Solver::new(proc, &self.structure, interrupt).solve(&analysis, &mut StructureCache::new())?;

        if proc.options().trace {
            trace_sets(&self.catalog, AnalysisKind::Earliestness, "not available out", &tables.exit);
        }
        self.not_available = Some(tables);
        Ok(())
    }

    pub fn solve_delayedness(&mut self, proc: &Procedure, interrupt: &mut dyn InterruptCheck) -> Result<()> {
        let stage = AnalysisKind::Delayedness;
        let ant = required(self.anticipatability.as_ref(), stage, AnalysisKind::GlobalAnticipatability)?;
        let nav = required(self.not_available.as_ref(), stage, AnalysisKind::Earliestness)?;

        let earliestness = Earliestness::new(&self.catalog, &self.transparency, ant, nav);
        let analysis = Delayedness::new(&self.catalog, &self.local, &earliestness, ant);
        let tables = Solver::new(proc, &self.structure, interrupt).solve(&analysis, &mut StructureCache::new())?;

        if proc.options().trace {
            trace_sets(&self.catalog, stage, "in", &tables.entry);
        }
        self.later = Some(tables);
        Ok(())
    }

    pub fn compute_latestness(&mut self, proc: &Procedure) -> Result<()> {
        let stage = AnalysisKind::Latestness;
        let ant = required(self.anticipatability.as_ref(), stage, AnalysisKind::GlobalAnticipatability)?;
        let nav = required(self.not_available.as_ref(), stage, AnalysisKind::Earliestness)?;
        let later = required(self.later.as_ref(), stage, AnalysisKind::Delayedness)?;

        let earliestness = Earliestness::new(&self.catalog, &self.transparency, ant, nav);
        let delayedness = Delayedness::new(&self.catalog, &self.local, &earliestness, ant);
        let latestness = Latestness::compute(proc, &self.structure, &self.catalog, &delayedness, later, ant);

        self.latestness = Some(latestness);
        Ok(())
    }

    pub fn solve_isolatedness(&mut self, proc: &Procedure, interrupt: &mut dyn InterruptCheck) -> Result<()> {
        let stage = AnalysisKind::Isolatedness;
        let later = required(self.later.as_ref(), stage, AnalysisKind::Delayedness)?;
        let latestness = required(self.latestness.as_ref(), stage, AnalysisKind::Latestness)?;

        let analysis = Isolatedness::new(&self.catalog, &self.transparency, &self.local, latestness, later);
        let tables = Solver::new(proc, &self.structure, interrupt).solve(&analysis, &mut StructureCache::new())?;

        if proc.options().trace {
            trace_sets(&self.catalog, stage, "out", &tables.exit);
        }
        self.isolated = Some(tables);
        Ok(())
    }

    pub fn anticipatability(&self) -> Option<&DataflowTables<CandidateSet>> {
        self.anticipatability.as_ref()
    }

    pub fn not_available(&self) -> Option<&DataflowTables<CandidateSet>> {
        self.not_available.as_ref()
    }

    pub fn later(&self) -> Option<&DataflowTables<CandidateSet>> {
        self.later.as_ref()
    }

    pub fn latestness(&self) -> Option<&Latestness> {
        self.latestness.as_ref()
    }

    pub fn isolated(&self) -> Option<&DataflowTables<CandidateSet>> {
        self.isolated.as_ref()
    }

    /// Lazy code motion's own answer, before any legality or profitability pruning:
    /// the placements and the occurrences they make redundant, per block.
    pub fn optimistic_placements(&self) -> Result<(Placements, Vec<CandidateSet>)> {
        let stage = AnalysisKind::RedundantExpressionAdjustment;
        let later = required(self.later.as_ref(), stage, AnalysisKind::Delayedness)?;
        let latestness = required(self.latestness.as_ref(), stage, AnalysisKind::Latestness)?;
        let isolated = required(self.isolated.as_ref(), stage, AnalysisKind::Isolatedness)?;

        let n = later.entry.len();
        let mut placements = Placements::empty(&self.catalog, n);
        let mut redundant = vec![self.catalog.empty_set(); n];

        for b in 0..n {
            let block = BlockId(b);
            if !self.structure.is_reachable(block) {
                continue;
            }

            let redn = self.local.upward(block).difference(later.entry(block));

            let mut in_place = self.local.downward(block).difference(isolated.exit(block));
            let mut reuses_temp = redn.clone();
            reuses_temp.intersect_with(self.transparency.transparent(block));
            in_place.subtract(&reuses_temp);

            placements.entry[b] = latestness.entry[b].clone();
            placements.exit[b] = latestness.exit[b].clone();
            placements.in_place[b] = in_place;
            redundant[b] = redn;
        }

        Ok((placements, redundant))
    }

    fn has_local_redundancy(&self, proc: &Procedure) -> bool {
        proc.blocks().any(|b| !self.local.locally_redundant(b).is_empty())
    }
}

/// The decided transformation, ready to be applied.
pub struct PartialRedundancy {
    pub context: AnalysisContext,
    pub placements: Placements,
    pub entry_order: Vec<Vec<CandidateId>>,
    pub exit_order: Vec<Vec<CandidateId>>,
    pub adjustment: Adjustment,
    pub stats: PreStats,
}

impl PartialRedundancy {
    pub fn new(proc: &mut Procedure, env: &mut PassEnv) -> Result<Self> {
        let mut stats = PreStats::default();

        let mut context = Self::analyze(proc, env)?;
        let critical = match context.latestness() {
            Some(latestness) if proc.options().split_critical_edges && latestness.has_critical() => latestness
                .critical
                .iter()
                .map(|(from, to, _)| (*from, *to))
                .collect::<Vec<_>>(),
            _ => Vec::new(),
        };

        if !critical.is_empty() {
            let created = break_critical_edges(proc, &critical);
            log::debug!("split {} critical edges, analyzing again", created.len());
            stats.split_edges = created.len();
            context = Self::analyze(proc, env)?;
        }

        stats.candidates = context.catalog.len();
        let catalog = &context.catalog;

        let (mut optimistic, mut redundant) = context.optimistic_placements()?;
        let latestness = required(
            context.latestness(),
            AnalysisKind::ExceptionCheckMotion,
            AnalysisKind::Latestness,
        )?;

        let mut illegal = latestness.rejected.union(&latestness.critical_candidates(catalog));
        stats.rejected += illegal.len();
        illegal.union_with(&catalog.filtered(|c| c.is_auto_load));

        // Nothing redundant anywhere: local commoning handles whatever is left.
        let anywhere = union_all(catalog.empty_set(), redundant.iter());
        illegal.union_with(&anywhere.complemented());

        drop_everywhere(&mut optimistic, &mut redundant, &illegal);
        stats.rejected += gate_placements(&mut optimistic, &mut *env.gate);

        let motion = ExceptionCheckMotion::new(
            proc,
            &context.structure,
            catalog,
            &context.transparency,
            &context.local,
            &optimistic,
            &redundant,
        );
        let outcome = motion.perform(&mut *env.interrupt)?;
        stats.motion_rounds = outcome.rounds;
        stats.motion_fell_back = outcome.fell_back;
        stats.rejected += outcome.selection.rejected;

        let mut selection = outcome.selection;
        let mut adjustment = outcome.adjustment;

        let unprofitable = unprofitable(catalog, &selection.placements, &adjustment.redundant, &*env.frequencies);
        stats.invalidated = unprofitable.len();

        // Checks keep their placements: dropping one could let a later check raise first.
        let mut useless = union_all(catalog.empty_set(), adjustment.redundant.iter()).complemented();
        useless.subtract(&catalog.checks());
        useless.union_with(&unprofitable);
        useless.intersect_with(&selection.placements.candidates(catalog));

        if !useless.is_empty() {
            log::debug!("dropping {} candidates without profitable redundancy", useless.len());
            selection.placements.drop_candidates(&useless);

            let mut solver = Solver::new(proc, &context.structure, &mut *env.interrupt);
            adjustment = motion.adjust(&mut solver, &selection.placements, false)?;
        }

        let promoted = selection.placements.candidates(catalog);
        log::debug!(
            "partial redundancy: {} of {} candidates placed, {} invalidated",
            promoted.len(),
            catalog.len(),
            stats.invalidated
        );

        Ok(Self {
            context,
            placements: selection.placements,
            entry_order: selection.entry_order,
            exit_order: selection.exit_order,
            adjustment,
            stats,
        })
    }

    fn analyze(proc: &mut Procedure, env: &mut PassEnv) -> Result<AnalysisContext> {
        env.frequencies.prepare(proc);
        let mut context = AnalysisContext::new(proc, &*env.frequencies)?;
        context.analyze(proc, &mut *env.interrupt)?;
        Ok(context)
    }

    /// Rewrites `proc`. Consumes the decision: the tables describe the code as it was.
    pub fn apply(self, proc: &mut Procedure, env: &mut PassEnv) -> PreOutcome {
        let reachable: Vec<bool> = proc.blocks().map(|b| self.context.structure.is_reachable(b)).collect();
        let plan = RewritePlan {
            catalog: &self.context.catalog,
            placements: &self.placements,
            entry_order: &self.entry_order,
            exit_order: &self.exit_order,
            available: &self.adjustment.tables.entry,
            reachable: &reachable,
        };

        let result = rewrite(proc, &plan, &mut *env.gate);
        let altered = result.altered();

        if altered && proc.options().trace {
            log::trace!("after partial redundancy elimination:\n{}", proc.display());
        }

        let mut stats = self.stats;
        stats.promoted = result.temporaries.len();
        stats.placements = result.placed;
        stats.eliminated = result.eliminated;
        stats.checks_removed = result.checks_removed;
        stats.privatized_stores = result.privatized_stores;
        stats.rejected += result.rejected;

        PreOutcome {
            altered,
            request_local_cleanup: altered || self.context.has_local_redundancy(proc),
            temporaries: result.temporaries,
            profiling_candidates: result.profiling_candidates,
            stats,
        }
    }
}

/// Runs partial redundancy elimination on `proc`.
///
/// On error `proc` is unchanged apart from split critical edges, and the caller
/// should compile it without this pass.
pub fn run(proc: &mut Procedure, env: &mut PassEnv) -> Result<PreOutcome> {
    phase_scope("partial redundancy elimination", || {
        let pre = PartialRedundancy::new(proc, env)?;
        let outcome = pre.apply(proc, env);

        log::debug!("{:?}", outcome.stats);
        Ok(outcome)
    })
}

fn drop_everywhere(placements: &mut Placements, redundant: &mut [CandidateSet], candidates: &CandidateSet) {
    placements.drop_candidates(candidates);
    for set in redundant {
        set.subtract(candidates);
    }
}

/// Asks the gate about every entry and exit placement, in block order.
fn gate_placements(placements: &mut Placements, gate: &mut dyn TransformationGate) -> usize {
    let mut rejected = 0;

    for b in 0..placements.entry.len() {
        let block = BlockId(b);

        for set in [&mut placements.entry[b], &mut placements.exit[b]] {
            let vetoed: Vec<CandidateId> = set.iter().filter(|c| !gate.allow_placement(*c, block)).collect();
            for candidate in vetoed {
                set.remove(candidate);
                rejected += 1;
            }
        }
    }

    rejected
}

/// Expressions whose placements weigh more than the redundancy they remove.
/// Cold blocks count for neither side.
fn unprofitable(
    catalog: &CandidateCatalog,
    placements: &Placements,
    redundant: &[CandidateSet],
    frequencies: &dyn FrequencyOracle,
) -> CandidateSet {
    let mut result = catalog.empty_set();

    for candidate in placements.candidates(catalog).iter() {
        if catalog.get(candidate).is_check() {
            continue;
        }

        let mut cost = 0.0;
        let mut benefit = 0.0;

        for b in 0..placements.entry.len() {
            let block = BlockId(b);
            if frequencies.is_cold(block) {
                continue;
            }

            let weight = frequencies.weight(block);
            if placements.entry[b].contains(candidate)
                || placements.exit[b].contains(candidate)
                || placements.in_place[b].contains(candidate)
            {
                cost += weight;
            }
            if redundant[b].contains(candidate) {
                benefit += weight;
            }
        }

        if cost > benefit {
            log::debug!("{} costs {} for a benefit of {}", candidate, cost, benefit);
            result.insert(candidate);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::BasicBlockBuilder,
        frequency::FixedFrequencies,
        interrupt::Never,
        opcode::Opcode,
        symbol::{Symbol, SymbolKind},
        typ::Type,
        Options,
    };

    #[test]
    fn stages_refuse_to_run_out_of_order() {
        let mut proc = Procedure::new(Options::default());
        let x = proc.add_symbol(Symbol::new(SymbolKind::Static, Type::Int32, "x"));
        let entry = proc.add_block(1.0);
        {
            let mut bb = BasicBlockBuilder::new(&mut proc, entry);
            let a = bb.load(x);
            let b = bb.load(x);
            let sum = bb.binary(Opcode::Add, a, b);
            bb.ret(Some(sum));
        }

        let mut context = AnalysisContext::new(&mut proc, &FixedFrequencies::default()).unwrap();
        let error = context.solve_delayedness(&proc, &mut Never).unwrap_err();
        assert_eq!(
            error,
            PreError::StageOrder {
                stage: AnalysisKind::Delayedness,
                missing: AnalysisKind::GlobalAnticipatability,
            }
        );

        context.solve_anticipatability(&proc, &mut Never).unwrap();
        let error = context.compute_latestness(&proc).unwrap_err();
        assert_eq!(
            error,
            PreError::StageOrder {
                stage: AnalysisKind::Latestness,
                missing: AnalysisKind::Earliestness,
            }
        );

        context.solve_earliestness(&proc, &mut Never).unwrap();
        context.solve_delayedness(&proc, &mut Never).unwrap();
        context.compute_latestness(&proc).unwrap();
        context.solve_isolatedness(&proc, &mut Never).unwrap();
        assert!(context.optimistic_placements().is_ok());
    }
}
