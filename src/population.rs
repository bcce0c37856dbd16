use crate::coefficients::{Coefficient, CoefficientMatrix};
use crate::individual::{Individual, IndividualId, Kind};
use crate::sampling::{GroupSize, weighted_random};
use crate::setup::Setup;
use anyhow::{Context, Result, bail, ensure};
use rand::prelude::*;
use rand::seq::index;
use rand_distr::{Poisson, weighted::WeightedIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Handle of a population inside a model.
pub type PopId = usize;

/// Health filter used when drawing groups of individuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Infected,
    #[default]
    Any,
}

impl Health {
    fn matches(self, ind: &Individual) -> bool {
        match self {
            Health::Healthy => !ind.is_infected(),
            Health::Infected => ind.is_infected(),
            Health::Any => true,
        }
    }
}

/// Outgoing neighbor weights of a population.
///
/// The owning population is always present with weight zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbors {
    rates: BTreeMap<PopId, f64>,
    total: f64,
}

impl Neighbors {
    fn new(own: PopId) -> Self {
        Self {
            rates: BTreeMap::from([(own, 0.0)]),
            total: 0.0,
        }
    }

    pub fn set(&mut self, neighbor: PopId, rate: f64) -> Result<()> {
        ensure!(
            rate >= 0.0 && rate.is_finite(),
            "neighbor rate must be non-negative and finite, but is {rate}"
        );
        self.rates.insert(neighbor, rate);
        self.total = self.rates.values().sum();
        Ok(())
    }

    pub fn rate(&self, neighbor: PopId) -> f64 {
        self.rates.get(&neighbor).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn iter(&self) -> impl Iterator<Item = (PopId, f64)> + '_ {
        self.rates.iter().map(|(&pop, &rate)| (pop, rate))
    }
}

/// All individuals of one kind inside a population.
///
/// The live sequence, the coefficient rows and the health sets are kept in
/// step: the individual at position `i` owns row `i` and has
/// `coefficient_index == i`.
#[derive(Debug, Clone, PartialEq)]
pub struct Cohort {
    kind: Kind,
    next_id: IndividualId,
    individuals: Vec<Individual>,
    coefficients: CoefficientMatrix,
    healthy: BTreeSet<IndividualId>,
    infected: BTreeSet<IndividualId>,
    dead: Vec<Individual>,
    migration: Neighbors,
    contact: Neighbors,
}

impl Cohort {
    fn new(kind: Kind, own: PopId) -> Self {
        Self {
            kind,
            next_id: 0,
            individuals: Vec::new(),
            coefficients: CoefficientMatrix::new(),
            healthy: BTreeSet::new(),
            infected: BTreeSet::new(),
            dead: Vec::new(),
            migration: Neighbors::new(own),
            contact: Neighbors::new(own),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    pub fn individuals(&self) -> &[Individual] {
        &self.individuals
    }

    pub fn coefficients(&self) -> &CoefficientMatrix {
        &self.coefficients
    }

    pub fn healthy(&self) -> &BTreeSet<IndividualId> {
        &self.healthy
    }

    pub fn infected(&self) -> &BTreeSet<IndividualId> {
        &self.infected
    }

    pub fn dead(&self) -> &[Individual] {
        &self.dead
    }

    pub fn migration(&self) -> &Neighbors {
        &self.migration
    }

    pub fn contact(&self) -> &Neighbors {
        &self.contact
    }

    /// Position of a live individual in the live sequence.
    pub fn position(&self, id: IndividualId) -> Option<usize> {
        self.individuals.binary_search_by_key(&id, |ind| ind.id).ok()
    }

    pub fn get(&self, id: IndividualId) -> Option<&Individual> {
        self.position(id).map(|i_ind| &self.individuals[i_ind])
    }

    /// Verify the bookkeeping between individuals, rows and health sets.
    pub fn check_invariants(&self) -> Result<()> {
        ensure!(
            self.coefficients.len() == self.individuals.len(),
            "{} {} rows for {} individuals",
            self.coefficients.len(),
            self.kind,
            self.individuals.len()
        );
        ensure!(
            self.healthy.len() + self.infected.len() == self.individuals.len(),
            "health sets of {}s do not cover the live individuals",
            self.kind
        );
        for (i_ind, ind) in self.individuals.iter().enumerate() {
            ensure!(
                ind.coefficient_index == i_ind,
                "{} {} at position {i_ind} points to row {}",
                self.kind,
                ind.id,
                ind.coefficient_index
            );
            let set = if ind.is_infected() {
                &self.infected
            } else {
                &self.healthy
            };
            ensure!(
                set.contains(&ind.id),
                "{} {} is in the wrong health set",
                self.kind,
                ind.id
            );
        }
        Ok(())
    }

    fn positions(&self, ids: &[IndividualId]) -> Result<Vec<usize>> {
        let mut seen = BTreeSet::new();
        ids.iter()
            .map(|&id| -> Result<usize> {
                ensure!(seen.insert(id), "{} {id} is listed more than once", self.kind);
                self.position(id)
                    .with_context(|| format!("no live {} with id {id}", self.kind))
            })
            .collect()
    }

    fn candidates(&self, subset: Option<&[IndividualId]>) -> Result<Vec<usize>> {
        match subset {
            Some(ids) => self.positions(ids),
            None => Ok((0..self.individuals.len()).collect()),
        }
    }

    fn add(&mut self, num: usize) -> Vec<IndividualId> {
        (0..num)
            .map(|_| {
                let id = self.next_id;
                self.next_id += 1;
                let i_row = self.coefficients.push_zeroed();
                self.individuals.push(Individual::new(id, i_row));
                self.healthy.insert(id);
                id
            })
            .collect()
    }

    fn remove_at(&mut self, i_ind: usize) -> Individual {
        let ind = self.individuals.remove(i_ind);
        self.coefficients.remove(ind.coefficient_index);
        for later in &mut self.individuals[i_ind..] {
            later.coefficient_index -= 1;
        }
        self.healthy.remove(&ind.id);
        self.infected.remove(&ind.id);
        ind
    }

    fn remove(&mut self, ids: &[IndividualId]) -> Result<Vec<Individual>> {
        let mut positions = self.positions(ids)?;
        // Remove from the back so earlier positions stay valid.
        positions.sort_unstable_by(|a, b| b.cmp(a));
        Ok(positions
            .into_iter()
            .map(|i_ind| self.remove_at(i_ind))
            .collect())
    }

    /// Draw a group without replacement among the individuals matching `health`.
    pub fn group<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        size: GroupSize,
        health: Health,
        subset: Option<&[IndividualId]>,
    ) -> Result<Vec<IndividualId>> {
        let pool: Vec<IndividualId> = self
            .candidates(subset)?
            .into_iter()
            .map(|i_ind| &self.individuals[i_ind])
            .filter(|ind| health.matches(ind))
            .map(|ind| ind.id)
            .collect();
        let count = size
            .resolve(pool.len())
            .with_context(|| format!("invalid {} group size", self.kind))?;
        Ok(index::sample(rng, pool.len(), count)
            .into_vec()
            .into_iter()
            .map(|i_pool| pool[i_pool])
            .collect())
    }

    /// Uniform sample of `fraction` of the matching individuals, truncated.
    fn fraction<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        fraction: f64,
        health: Health,
        subset: Option<&[IndividualId]>,
    ) -> Result<Vec<usize>> {
        ensure!(
            (0.0..=1.0).contains(&fraction),
            "fraction must be in the range [0, 1], but is {fraction}"
        );
        let mut ids = self.group(rng, GroupSize::ALL, health, subset)?;
        ids.truncate((fraction * ids.len() as f64) as usize);
        self.positions(&ids)
    }

    fn column(&self, class: Coefficient) -> Vec<f64> {
        self.coefficients.column(class).collect()
    }

    fn select(&self, draw: f64, class: Coefficient) -> Result<(usize, f64)> {
        weighted_random(draw, &self.column(class))
            .with_context(|| format!("failed to select a {} by {class:?}", self.kind))
    }

    fn refresh_health(&mut self, i_ind: usize) {
        let ind = &self.individuals[i_ind];
        if ind.is_infected() {
            self.healthy.remove(&ind.id);
            self.infected.insert(ind.id);
        } else {
            self.infected.remove(&ind.id);
            self.healthy.insert(ind.id);
        }
    }

    /// Add a genome to an individual and fold its effects into the row.
    ///
    /// Each coefficient becomes the fitness-weighted mean over the carried
    /// genomes. Returns `false` if the genome is already carried.
    fn acquire(&mut self, i_ind: usize, genome: &str, setup: &Setup) -> Result<bool> {
        let ind = &mut self.individuals[i_ind];
        if ind.carries(genome) {
            return Ok(false);
        }
        let fitness = setup.effects.fitness(self.kind, genome);
        ensure!(
            fitness > 0.0 && fitness.is_finite(),
            "fitness of genome {genome:?} must be positive and finite, but is {fitness}"
        );
        let effects = setup.effects.row(self.kind, genome);

        let old_sum = ind.sum_fitness;
        let new_sum = old_sum + fitness;
        let row = self.coefficients.row_mut(ind.coefficient_index);
        for (val, eff) in row.iter_mut().zip(effects) {
            *val = (*val * old_sum + eff * fitness) / new_sum;
        }
        ind.pathogens.insert(genome.to_string(), fitness);
        ind.sum_fitness = new_sum;

        self.refresh_health(i_ind);
        Ok(true)
    }

    /// Strip every pathogen and zero the row, returning what was carried.
    fn clear(&mut self, i_ind: usize) -> BTreeMap<String, f64> {
        let ind = &mut self.individuals[i_ind];
        ind.sum_fitness = 0.0;
        self.coefficients.zero_row(ind.coefficient_index);
        let pathogens = std::mem::take(&mut ind.pathogens);
        self.refresh_health(i_ind);
        pathogens
    }

    fn update_coefficients(&mut self, setup: &Setup) -> Result<()> {
        for i_ind in 0..self.individuals.len() {
            for genome in self.clear(i_ind).into_keys() {
                self.acquire(i_ind, &genome, setup)?;
            }
        }
        Ok(())
    }

    /// Pass a Poisson-sized inoculum drawn from `source` to an individual.
    fn infect<R: Rng + ?Sized>(
        &mut self,
        i_ind: usize,
        source: &BTreeMap<String, f64>,
        mean_inoculum: f64,
        setup: &Setup,
        rng: &mut R,
    ) -> Result<bool> {
        if source.is_empty() || mean_inoculum <= 0.0 {
            return Ok(false);
        }
        let inoculum: f64 = Poisson::new(mean_inoculum)?.sample(rng);
        if inoculum < 1.0 {
            return Ok(false);
        }

        let genomes: Vec<&str> = source.keys().map(String::as_str).collect();
        let genome_dist = WeightedIndex::new(source.values())?;
        let drawn: BTreeSet<&str> = (0..inoculum as usize)
            .map(|_| genomes[genome_dist.sample(rng)])
            .collect();

        let mut changed = false;
        for genome in drawn {
            // Foreign genomes that do not fit this setup cannot establish.
            if self.individuals[i_ind].is_protected_against(genome)
                || setup.params.check_genome(genome).is_err()
            {
                continue;
            }
            changed |= self.acquire(i_ind, genome, setup)?;
        }
        Ok(changed)
    }

    fn recover(&mut self, i_ind: usize, setup: &Setup) {
        let protection = setup.params.kind(self.kind).protection_upon_recovery;
        let pathogens = self.clear(i_ind);
        let Some([start, end]) = protection else {
            return;
        };
        let ind = &mut self.individuals[i_ind];
        for genome in pathogens.keys() {
            if let Some(seq) = genome.get(start..end) {
                if !ind.protection_sequences.iter().any(|s| s == seq) {
                    ind.protection_sequences.push(seq.to_string());
                }
            }
        }
    }

    fn kill(&mut self, i_ind: usize) {
        let ind = self.remove_at(i_ind);
        self.dead.push(ind);
    }

    fn genome_weights(&self, i_ind: usize, class: Coefficient, setup: &Setup) -> Vec<f64> {
        self.individuals[i_ind]
            .pathogens
            .iter()
            .map(|(genome, &fitness)| fitness * setup.effects.coefficient(self.kind, class, genome))
            .collect()
    }

    /// Replace one allele of a carried genome, resolving genome, locus and
    /// allele from successive residuals of `draw`.
    fn mutate(&mut self, i_ind: usize, draw: f64, setup: &Setup) -> Result<bool> {
        let weights = self.genome_weights(i_ind, Coefficient::Mutation, setup);
        let (i_genome, draw) = weighted_random(draw, &weights)?;
        let Some(genome) = self.individuals[i_ind].pathogens.keys().nth(i_genome) else {
            bail!("genome {i_genome} is out of range");
        };

        let alleles = setup.params.alleles();
        let (i_locus, draw) = weighted_random(draw, &vec![1.0; alleles.len()])?;
        let current = genome.chars().nth(i_locus);
        let replacements: Vec<char> = alleles[i_locus]
            .chars()
            .filter(|&allele| Some(allele) != current)
            .collect();
        if replacements.is_empty() {
            return Ok(false);
        }
        let (i_allele, _) = weighted_random(draw, &vec![1.0; replacements.len()])?;

        let mutant: String = genome
            .chars()
            .enumerate()
            .map(|(i_pos, allele)| {
                if i_pos == i_locus {
                    replacements[i_allele]
                } else {
                    allele
                }
            })
            .collect();
        self.acquire(i_ind, &mutant, setup)
    }

    /// Cross two distinct carried genomes over and acquire both recombinants.
    fn recombine(&mut self, i_ind: usize, draw: f64, setup: &Setup) -> Result<bool> {
        if self.individuals[i_ind].pathogens.len() < 2 {
            return Ok(false);
        }
        let mut weights = self.genome_weights(i_ind, Coefficient::Recombination, setup);
        let (i_first, draw) = weighted_random(draw, &weights)?;
        weights[i_first] = 0.0;
        if weights.iter().all(|&w| w <= 0.0) {
            return Ok(false);
        }
        let (i_second, mut draw) = weighted_random(draw, &weights)?;

        let genomes: Vec<Vec<char>> = self.individuals[i_ind]
            .pathogens
            .keys()
            .map(|genome| genome.chars().collect())
            .collect();
        let (first, second) = (&genomes[i_first], &genomes[i_second]);
        let len = first.len().min(second.len());
        if len < 2 {
            return Ok(false);
        }

        let mut points = BTreeSet::new();
        for _ in 0..setup.params.kind(self.kind).num_crossover {
            let (point, residual) = weighted_random(draw, &vec![1.0; len - 1])?;
            points.insert(point + 1);
            draw = residual;
        }

        let mut left = String::with_capacity(len);
        let mut right = String::with_capacity(len);
        let mut swapped = false;
        for i_pos in 0..len {
            if points.contains(&i_pos) {
                swapped = !swapped;
            }
            let (a, b) = if swapped {
                (second[i_pos], first[i_pos])
            } else {
                (first[i_pos], second[i_pos])
            };
            left.push(a);
            right.push(b);
        }

        let mut changed = self.acquire(i_ind, &left, setup)?;
        changed |= self.acquire(i_ind, &right, setup)?;
        Ok(changed)
    }

    /// Keep only the genomes that contain every resistance sequence.
    fn apply_treatment(
        &mut self,
        i_ind: usize,
        resistance: &[String],
        setup: &Setup,
    ) -> Result<bool> {
        let pathogens = &self.individuals[i_ind].pathogens;
        let survivors: Vec<String> = pathogens
            .keys()
            .filter(|genome| resistance.iter().all(|seq| genome.contains(seq.as_str())))
            .cloned()
            .collect();
        if survivors.len() == pathogens.len() {
            return Ok(false);
        }
        self.clear(i_ind);
        for genome in survivors {
            self.acquire(i_ind, &genome, setup)?;
        }
        Ok(true)
    }

    fn state(&self, sampling: usize) -> (Vec<IndividualState>, Vec<IndividualState>) {
        let stride = sampling.max(1);
        let copy = |inds: &[Individual]| -> Vec<IndividualState> {
            inds.iter().step_by(stride).map(IndividualState::from).collect()
        };
        (copy(&self.individuals), copy(&self.dead))
    }
}

/// Slim copy of an individual: identity and pathogen load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndividualState {
    pub id: IndividualId,
    pub pathogens: BTreeMap<String, f64>,
    pub protection_sequences: Vec<String>,
}

impl From<&Individual> for IndividualState {
    fn from(ind: &Individual) -> Self {
        Self {
            id: ind.id,
            pathogens: ind.pathogens.clone(),
            protection_sequences: ind.protection_sequences.clone(),
        }
    }
}

/// Slim copy of a population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationState {
    pub id: String,
    pub hosts: Vec<IndividualState>,
    pub vectors: Vec<IndividualState>,
    pub dead_hosts: Vec<IndividualState>,
    pub dead_vectors: Vec<IndividualState>,
}

impl PopulationState {
    pub fn individuals(&self, kind: Kind) -> &[IndividualState] {
        match kind {
            Kind::Host => &self.hosts,
            Kind::Vector => &self.vectors,
        }
    }

    /// Number of live individuals of `kind` carrying `genome`.
    pub fn carriers(&self, kind: Kind, genome: &str) -> usize {
        self.individuals(kind)
            .iter()
            .filter(|ind| ind.pathogens.contains_key(genome))
            .count()
    }
}

/// A population: one host cohort, one vector cohort and the setup they share.
#[derive(Debug, Clone)]
pub struct Population {
    id: String,
    index: PopId,
    setup: Setup,
    hosts: Cohort,
    vectors: Cohort,
}

impl Population {
    pub fn new(
        id: impl Into<String>,
        index: PopId,
        setup: Setup,
        num_hosts: usize,
        num_vectors: usize,
    ) -> Self {
        let mut pop = Self {
            id: id.into(),
            index,
            setup,
            hosts: Cohort::new(Kind::Host, index),
            vectors: Cohort::new(Kind::Vector, index),
        };
        pop.hosts.add(num_hosts);
        pop.vectors.add(num_vectors);
        pop
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn index(&self) -> PopId {
        self.index
    }

    pub fn setup(&self) -> &Setup {
        &self.setup
    }

    pub fn cohort(&self, kind: Kind) -> &Cohort {
        match kind {
            Kind::Host => &self.hosts,
            Kind::Vector => &self.vectors,
        }
    }

    /// Split borrow of a cohort and the setup.
    fn parts(&mut self, kind: Kind) -> (&mut Cohort, &Setup) {
        let cohort = match kind {
            Kind::Host => &mut self.hosts,
            Kind::Vector => &mut self.vectors,
        };
        (cohort, &self.setup)
    }

    pub fn check_invariants(&self) -> Result<()> {
        self.hosts.check_invariants()?;
        self.vectors.check_invariants()?;
        Ok(())
    }

    /// Append healthy individuals with fresh ids and zeroed rows.
    pub fn add_individuals(&mut self, kind: Kind, num: usize) -> Vec<IndividualId> {
        self.parts(kind).0.add(num)
    }

    /// Remove listed individuals, compacting the coefficient rows.
    pub fn remove_individuals(
        &mut self,
        kind: Kind,
        ids: &[IndividualId],
    ) -> Result<Vec<Individual>> {
        self.parts(kind).0.remove(ids)
    }

    /// Remove a uniform random sample of `num` individuals.
    pub fn remove_random<R: Rng + ?Sized>(
        &mut self,
        kind: Kind,
        num: usize,
        rng: &mut R,
    ) -> Result<Vec<Individual>> {
        let cohort = self.parts(kind).0;
        ensure!(
            num <= cohort.len(),
            "cannot remove {num} {kind}s from a population of {}",
            cohort.len()
        );
        let ids: Vec<IndividualId> = index::sample(rng, cohort.len(), num)
            .into_vec()
            .into_iter()
            .map(|i_ind| cohort.individuals[i_ind].id)
            .collect();
        cohort.remove(&ids)
    }

    pub fn new_group<R: Rng + ?Sized>(
        &self,
        kind: Kind,
        size: GroupSize,
        health: Health,
        rng: &mut R,
    ) -> Result<Vec<IndividualId>> {
        self.cohort(kind).group(rng, size, health, None)
    }

    /// Seed genomes into individuals, each genome into `count` distinct ones.
    pub fn add_pathogens<R: Rng + ?Sized>(
        &mut self,
        kind: Kind,
        genomes: &BTreeMap<String, usize>,
        subset: Option<&[IndividualId]>,
        rng: &mut R,
    ) -> Result<()> {
        for genome in genomes.keys() {
            self.setup
                .params
                .check_genome(genome)
                .with_context(|| format!("invalid genome for population {:?}", self.id))?;
        }
        let (cohort, setup) = self.parts(kind);
        let candidates = cohort.candidates(subset)?;
        for (genome, &count) in genomes {
            ensure!(
                count <= candidates.len(),
                "cannot seed {genome:?} into {count} of {} {kind}s",
                candidates.len()
            );
        }
        for (genome, &count) in genomes {
            for i_cand in index::sample(rng, candidates.len(), count).into_vec() {
                cohort.acquire(candidates[i_cand], genome, setup)?;
            }
        }
        Ok(())
    }

    /// Treat a fraction of the infected individuals; returns how many were cured.
    pub fn treat<R: Rng + ?Sized>(
        &mut self,
        kind: Kind,
        fraction: f64,
        resistance: &[String],
        subset: Option<&[IndividualId]>,
        rng: &mut R,
    ) -> Result<usize> {
        let (cohort, setup) = self.parts(kind);
        let positions = cohort.fraction(rng, fraction, Health::Infected, subset)?;
        let mut n_cured = 0;
        for i_ind in positions {
            cohort.apply_treatment(i_ind, resistance, setup)?;
            if !cohort.individuals[i_ind].is_infected() {
                n_cured += 1;
            }
        }
        Ok(n_cured)
    }

    /// Add a protection sequence to a fraction of the individuals.
    pub fn protect<R: Rng + ?Sized>(
        &mut self,
        kind: Kind,
        fraction: f64,
        sequence: &str,
        subset: Option<&[IndividualId]>,
        rng: &mut R,
    ) -> Result<()> {
        ensure!(!sequence.is_empty(), "protection sequence must not be empty");
        let cohort = self.parts(kind).0;
        for i_ind in cohort.fraction(rng, fraction, Health::Any, subset)? {
            cohort.individuals[i_ind]
                .protection_sequences
                .push(sequence.to_string());
        }
        Ok(())
    }

    pub fn wipe_protection(&mut self, kind: Kind, subset: Option<&[IndividualId]>) -> Result<()> {
        let cohort = self.parts(kind).0;
        for i_ind in cohort.candidates(subset)? {
            cohort.individuals[i_ind].protection_sequences.clear();
        }
        Ok(())
    }

    pub fn set_migration_neighbor(&mut self, kind: Kind, neighbor: PopId, rate: f64) -> Result<()> {
        self.parts(kind).0.migration.set(neighbor, rate)
    }

    pub fn set_contact_neighbor(&mut self, kind: Kind, neighbor: PopId, rate: f64) -> Result<()> {
        self.parts(kind).0.contact.set(neighbor, rate)
    }

    /// Contact between an infected `origin` and any `target` in this population.
    pub fn contact<R: Rng + ?Sized>(
        &mut self,
        origin: Kind,
        target: Kind,
        draw: f64,
        rng: &mut R,
    ) -> Result<bool> {
        let origins = self.cohort(origin);
        let (i_origin, draw) =
            weighted_random(draw, &origins.coefficients.infectious_complement(Coefficient::Contact))
                .with_context(|| format!("failed to select an infectious {origin}"))?;
        let source = origins.individuals[i_origin].pathogens.clone();
        let mean_inoculum = self.setup.params.kind(target).mean_inoculum;

        let (targets, setup) = self.parts(target);
        let (i_target, _) =
            weighted_random(draw, &targets.coefficients.complement(Coefficient::Contact))
                .with_context(|| format!("failed to select a {target} to contact"))?;
        targets.infect(i_target, &source, mean_inoculum, setup, rng)
    }

    pub fn contact_host_host<R: Rng + ?Sized>(&mut self, draw: f64, rng: &mut R) -> Result<bool> {
        self.contact(Kind::Host, Kind::Host, draw, rng)
    }

    pub fn contact_host_vector<R: Rng + ?Sized>(&mut self, draw: f64, rng: &mut R) -> Result<bool> {
        self.contact(Kind::Host, Kind::Vector, draw, rng)
    }

    pub fn contact_vector_host<R: Rng + ?Sized>(&mut self, draw: f64, rng: &mut R) -> Result<bool> {
        self.contact(Kind::Vector, Kind::Host, draw, rng)
    }

    pub fn recover(&mut self, kind: Kind, draw: f64) -> Result<bool> {
        let (cohort, setup) = self.parts(kind);
        let (i_ind, _) = cohort.select(draw, Coefficient::Recovery)?;
        cohort.recover(i_ind, setup);
        Ok(true)
    }

    pub fn kill(&mut self, kind: Kind, draw: f64) -> Result<bool> {
        let cohort = self.parts(kind).0;
        let (i_ind, _) = cohort.select(draw, Coefficient::Lethality)?;
        cohort.kill(i_ind);
        Ok(true)
    }

    pub fn mutate(&mut self, kind: Kind, draw: f64) -> Result<bool> {
        let (cohort, setup) = self.parts(kind);
        let (i_ind, draw) = cohort.select(draw, Coefficient::Mutation)?;
        cohort.mutate(i_ind, draw, setup)
    }

    pub fn recombine(&mut self, kind: Kind, draw: f64) -> Result<bool> {
        let (cohort, setup) = self.parts(kind);
        let (i_ind, draw) = cohort.select(draw, Coefficient::Recombination)?;
        cohort.recombine(i_ind, draw, setup)
    }

    /// Infect the individual at `i_ind` from a foreign pathogen source.
    pub(crate) fn infect<R: Rng + ?Sized>(
        &mut self,
        kind: Kind,
        i_ind: usize,
        source: &BTreeMap<String, f64>,
        mean_inoculum: f64,
        rng: &mut R,
    ) -> Result<bool> {
        let (cohort, setup) = self.parts(kind);
        cohort.infect(i_ind, source, mean_inoculum, setup, rng)
    }

    /// Remove the individual at `i_ind` for transfer to another population.
    pub(crate) fn take(&mut self, kind: Kind, i_ind: usize) -> Individual {
        self.parts(kind).0.remove_at(i_ind)
    }

    /// Create an individual carrying `genomes`, as the arrival end of a migration.
    pub(crate) fn receive(&mut self, kind: Kind, genomes: &[String]) -> Result<IndividualId> {
        self.check_genomes(genomes)?;
        let (cohort, setup) = self.parts(kind);
        let id = cohort.add(1)[0];
        let i_ind = cohort.len() - 1;
        for genome in genomes {
            cohort.acquire(i_ind, genome, setup)?;
        }
        Ok(id)
    }

    pub fn check_genomes(&self, genomes: &[String]) -> Result<()> {
        for genome in genomes {
            self.setup.params.check_genome(genome)?;
        }
        Ok(())
    }

    /// Recompute every row of a cohort from the carried genomes.
    ///
    /// The cohort is left untouched if any genome is rejected.
    pub fn update_coefficients(&mut self, kind: Kind) -> Result<()> {
        let updated = recomputed(self.cohort(kind), &self.setup)?;
        *self.parts(kind).0 = updated;
        Ok(())
    }

    /// Assign a new setup and recompute all coefficient rows.
    ///
    /// Nothing changes unless every carried genome is accepted by `setup`.
    pub fn set_setup(&mut self, setup: Setup) -> Result<()> {
        let hosts = recomputed(&self.hosts, &setup)?;
        let vectors = recomputed(&self.vectors, &setup)?;
        self.hosts = hosts;
        self.vectors = vectors;
        self.setup = setup;
        Ok(())
    }

    /// Slim copy keeping every `host_sampling`-th host and every
    /// `vector_sampling`-th vector (zero keeps all).
    pub fn state(&self, host_sampling: usize, vector_sampling: usize) -> PopulationState {
        let (hosts, dead_hosts) = self.hosts.state(host_sampling);
        let (vectors, dead_vectors) = self.vectors.state(vector_sampling);
        PopulationState {
            id: self.id.clone(),
            hosts,
            vectors,
            dead_hosts,
            dead_vectors,
        }
    }
}

fn recomputed(cohort: &Cohort, setup: &Setup) -> Result<Cohort> {
    let mut cohort = cohort.clone();
    cohort
        .update_coefficients(setup)
        .with_context(|| format!("failed to update {} coefficients", cohort.kind))?;
    Ok(cohort)
}
