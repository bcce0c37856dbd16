use crate::engine::History;
use crate::individual::Kind;
use crate::model::ModelState;
use crate::stats::Accumulator;
use anyhow::{Context, Result};

/// Observable measured on the horizon state of each run of an ensemble.
pub trait Obs {
    fn update(&mut self, state: &ModelState) -> Result<()>;
    fn report(&self) -> Vec<String>;
}

/// Number of infected individuals of one kind, per population.
pub struct InfectedCount {
    kind: Kind,
    pop_ids: Vec<String>,
    acc_vec: Vec<Accumulator>,
}

impl InfectedCount {
    pub fn new(kind: Kind, pop_ids: &[String]) -> Self {
        Self {
            kind,
            pop_ids: pop_ids.to_vec(),
            acc_vec: vec![Accumulator::new(); pop_ids.len()],
        }
    }
}

impl Obs for InfectedCount {
    fn update(&mut self, state: &ModelState) -> Result<()> {
        for (pop_id, acc) in self.pop_ids.iter().zip(&mut self.acc_vec) {
            let pop = state
                .population(pop_id)
                .with_context(|| format!("population {pop_id:?} is missing from the state"))?;
            let n_infected = pop
                .individuals(self.kind)
                .iter()
                .filter(|ind| !ind.pathogens.is_empty())
                .count();
            acc.add(n_infected as f64);
        }
        Ok(())
    }

    fn report(&self) -> Vec<String> {
        self.pop_ids
            .iter()
            .zip(&self.acc_vec)
            .map(|(pop_id, acc)| format!("infected {}s in {pop_id}: {}", self.kind, acc.summary()))
            .collect()
    }
}

/// Probability that a genome is carried by anyone in a population.
pub struct GenomePresence {
    pop_ids: Vec<String>,
    genomes: Vec<String>,
    /// One accumulator per population and genome, population-major.
    acc_vec: Vec<Accumulator>,
}

impl GenomePresence {
    pub fn new(pop_ids: &[String], genomes: &[String]) -> Self {
        Self {
            pop_ids: pop_ids.to_vec(),
            genomes: genomes.to_vec(),
            acc_vec: vec![Accumulator::new(); pop_ids.len() * genomes.len()],
        }
    }

    /// Fraction of runs in which `genome` was present in `pop_id`.
    pub fn probability(&self, pop_id: &str, genome: &str) -> Option<f64> {
        let i_pop = self.pop_ids.iter().position(|id| id == pop_id)?;
        let i_genome = self.genomes.iter().position(|g| g == genome)?;
        let acc = &self.acc_vec[i_pop * self.genomes.len() + i_genome];
        (acc.n_vals() > 0).then(|| acc.summary().mean)
    }
}

impl Obs for GenomePresence {
    fn update(&mut self, state: &ModelState) -> Result<()> {
        for (i_pop, pop_id) in self.pop_ids.iter().enumerate() {
            let pop = state
                .population(pop_id)
                .with_context(|| format!("population {pop_id:?} is missing from the state"))?;
            for (i_genome, genome) in self.genomes.iter().enumerate() {
                let present = Kind::ALL
                    .iter()
                    .any(|&kind| pop.carriers(kind, genome) > 0);
                self.acc_vec[i_pop * self.genomes.len() + i_genome]
                    .add(if present { 1.0 } else { 0.0 });
            }
        }
        Ok(())
    }

    fn report(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for (i_pop, pop_id) in self.pop_ids.iter().enumerate() {
            for (i_genome, genome) in self.genomes.iter().enumerate() {
                let summary = self.acc_vec[i_pop * self.genomes.len() + i_genome].summary();
                lines.push(format!(
                    "presence of {genome} in {pop_id}: {:.4} over {} runs",
                    summary.mean, summary.n_vals
                ));
            }
        }
        lines
    }
}

/// Collects horizon observables over the runs of an ensemble.
pub struct Analyzer {
    n_runs: usize,
    presence: GenomePresence,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new(pop_ids: &[String], genomes: &[String]) -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(InfectedCount::new(Kind::Host, pop_ids)),
            Box::new(InfectedCount::new(Kind::Vector, pop_ids)),
        ];
        Self {
            n_runs: 0,
            presence: GenomePresence::new(pop_ids, genomes),
            obs_ptr_vec,
        }
    }

    pub fn n_runs(&self) -> usize {
        self.n_runs
    }

    pub fn presence(&self) -> &GenomePresence {
        &self.presence
    }

    pub fn add_run(&mut self, history: &History) -> Result<()> {
        let (_, snapshot) = history.last().context("history is empty")?;
        let state = snapshot.state();
        for obs in &mut self.obs_ptr_vec {
            obs.update(&state).context("failed to update observable")?;
        }
        self.presence
            .update(&state)
            .context("failed to update genome presence")?;
        self.n_runs += 1;
        Ok(())
    }

    pub fn report(&self) -> Vec<String> {
        let mut lines: Vec<String> = self.obs_ptr_vec.iter().flat_map(|obs| obs.report()).collect();
        lines.extend(self.presence.report());
        lines
    }

    pub fn log_report(&self) {
        log::info!("analysis of {} runs", self.n_runs);
        for line in self.report() {
            log::info!("{line}");
        }
    }
}
