use crate::coefficients::Coefficient;
use crate::individual::{IndividualId, Kind};
use crate::population::{PopId, Population, PopulationState};
use crate::sampling::weighted_random;
use crate::setup::Setup;
use anyhow::{Context, Result, bail, ensure};
use rand::prelude::*;
use rand::seq::index;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of neighbor weight between two populations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Migration,
    Contact,
}

/// Registry of populations, addressed by [`PopId`] handles.
#[derive(Debug, Clone, Default)]
pub struct Model {
    populations: Vec<Population>,
    ids: HashMap<String, PopId>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_population(
        &mut self,
        id: &str,
        setup: Setup,
        num_hosts: usize,
        num_vectors: usize,
    ) -> Result<PopId> {
        if self.ids.contains_key(id) {
            bail!("population {id:?} already exists");
        }
        let pop = self.populations.len();
        self.populations
            .push(Population::new(id, pop, setup, num_hosts, num_vectors));
        self.ids.insert(id.to_string(), pop);
        Ok(pop)
    }

    pub fn pop_id(&self, id: &str) -> Result<PopId> {
        self.ids
            .get(id)
            .copied()
            .with_context(|| format!("unknown population {id:?}"))
    }

    pub fn population(&self, pop: PopId) -> &Population {
        &self.populations[pop]
    }

    pub fn population_mut(&mut self, pop: PopId) -> &mut Population {
        &mut self.populations[pop]
    }

    pub fn populations(&self) -> &[Population] {
        &self.populations
    }

    pub fn len(&self) -> usize {
        self.populations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.populations.is_empty()
    }

    pub fn check_invariants(&self) -> Result<()> {
        for pop in &self.populations {
            pop.check_invariants()
                .with_context(|| format!("broken bookkeeping in population {:?}", pop.id()))?;
        }
        Ok(())
    }

    /// Set the weight of a migration or contact link from `from` to `to`.
    pub fn set_link(
        &mut self,
        link: LinkKind,
        kind: Kind,
        from: PopId,
        to: PopId,
        rate: f64,
    ) -> Result<()> {
        ensure!(
            from < self.len() && to < self.len(),
            "link {from} -> {to} refers to a missing population"
        );
        // The self-loop stays at zero: within-population contact has its own events.
        ensure!(from != to, "population {from} cannot be linked to itself");
        let origin = &mut self.populations[from];
        match link {
            LinkKind::Migration => origin.set_migration_neighbor(kind, to, rate),
            LinkKind::Contact => origin.set_contact_neighbor(kind, to, rate),
        }
    }

    /// Move the individual at `i_ind` with all its genomes to `target`.
    ///
    /// The arrival is a new individual of the target population whose rows are
    /// computed with the target's setup.
    fn transfer(
        &mut self,
        origin: PopId,
        target: PopId,
        kind: Kind,
        i_ind: usize,
    ) -> Result<IndividualId> {
        let genomes: Vec<String> = self.populations[origin].cohort(kind).individuals()[i_ind]
            .pathogens
            .keys()
            .cloned()
            .collect();
        self.populations[target]
            .check_genomes(&genomes)
            .with_context(|| {
                format!("{kind} cannot migrate into {:?}", self.populations[target].id())
            })?;
        self.populations[origin].take(kind, i_ind);
        self.populations[target].receive(kind, &genomes)
    }

    /// Migrate one individual chosen by `draw`, as a single Gillespie event.
    ///
    /// The draw resolves the neighbor by migration weight and then the
    /// individual by its MIGRATION coefficient.
    pub fn migrate_one(&mut self, origin: PopId, kind: Kind, draw: f64) -> Result<bool> {
        let cohort = self.populations[origin].cohort(kind);
        let neighbors: Vec<(PopId, f64)> = cohort.migration().iter().collect();
        let rates: Vec<f64> = neighbors.iter().map(|&(_, rate)| rate).collect();
        let (i_neighbor, draw) =
            weighted_random(draw, &rates).context("failed to select a migration target")?;
        let migration: Vec<f64> = cohort.coefficients().column(Coefficient::Migration).collect();
        let (i_ind, _) = weighted_random(draw, &migration)
            .with_context(|| format!("failed to select a migrating {kind}"))?;
        self.transfer(origin, neighbors[i_neighbor].0, kind, i_ind)?;
        Ok(true)
    }

    /// Migrate `num` individuals at once, sampled without replacement by
    /// their MIGRATION coefficient.
    pub fn migrate<R: Rng + ?Sized>(
        &mut self,
        origin: PopId,
        target: PopId,
        kind: Kind,
        num: usize,
        rng: &mut R,
    ) -> Result<()> {
        ensure!(origin != target, "population cannot migrate into itself");
        if num == 0 {
            return Ok(());
        }
        let cohort = self.populations[origin].cohort(kind);
        let weights: Vec<f64> = cohort.coefficients().column(Coefficient::Migration).collect();
        let n_eligible = weights.iter().filter(|&&w| w > 0.0).count();
        ensure!(
            num <= n_eligible,
            "cannot migrate {num} {kind}s, only {n_eligible} are able to migrate"
        );
        let ids: Vec<IndividualId> =
            index::sample_weighted(rng, weights.len(), |i| weights[i], num)?
                .into_vec()
                .into_iter()
                .map(|i_ind| cohort.individuals()[i_ind].id)
                .collect();

        for &id in &ids {
            let Some(ind) = cohort.get(id) else {
                bail!("no live {kind} with id {id}");
            };
            let genomes: Vec<String> = ind.pathogens.keys().cloned().collect();
            self.populations[target].check_genomes(&genomes)?;
        }
        for id in ids {
            let i_ind = self.populations[origin]
                .cohort(kind)
                .position(id)
                .with_context(|| format!("no live {kind} with id {id}"))?;
            self.transfer(origin, target, kind, i_ind)?;
        }
        Ok(())
    }

    /// Neighbor weights for a population-contact event starting in `pop`.
    ///
    /// Each neighbor contributes its contact weight times the susceptibility
    /// of its `target` cohort. These are the terms summed by the rate engine.
    pub fn population_contact_weights(
        &self,
        pop: PopId,
        origin: Kind,
        target: Kind,
    ) -> Vec<(PopId, f64)> {
        self.populations[pop]
            .cohort(origin)
            .contact()
            .iter()
            .map(|(neighbor, rate)| {
                let targets = self.populations[neighbor].cohort(target).coefficients();
                (neighbor, rate * targets.susceptibility(Coefficient::PopulationContact))
            })
            .collect()
    }

    /// Contact between an infected individual of `pop` and an individual of a
    /// neighbor population.
    pub fn population_contact<R: Rng + ?Sized>(
        &mut self,
        pop: PopId,
        origin: Kind,
        target: Kind,
        draw: f64,
        rng: &mut R,
    ) -> Result<bool> {
        let neighbors = self.population_contact_weights(pop, origin, target);
        let weights: Vec<f64> = neighbors.iter().map(|&(_, w)| w).collect();
        let (i_neighbor, draw) =
            weighted_random(draw, &weights).context("failed to select a contact population")?;
        let neighbor = neighbors[i_neighbor].0;

        let origin_pop = &self.populations[pop];
        let origins = origin_pop.cohort(origin).coefficients();
        let (i_origin, draw) =
            weighted_random(draw, &origins.infectious_complement(Coefficient::PopulationContact))
                .with_context(|| format!("failed to select an infectious {origin}"))?;
        let source = origin_pop.cohort(origin).individuals()[i_origin].pathogens.clone();
        let mean_inoculum = origin_pop.setup().params.kind(target).mean_inoculum;

        let target_pop = &mut self.populations[neighbor];
        let targets = target_pop.cohort(target).coefficients();
        let (i_target, _) =
            weighted_random(draw, &targets.complement(Coefficient::PopulationContact))
                .with_context(|| format!("failed to select a {target} to contact"))?;
        target_pop.infect(target, i_target, &source, mean_inoculum, rng)
    }

    /// Slim copy of every population.
    pub fn state(&self, host_sampling: usize, vector_sampling: usize) -> ModelState {
        ModelState {
            populations: self
                .populations
                .iter()
                .map(|pop| pop.state(host_sampling, vector_sampling))
                .collect(),
        }
    }
}

/// Slim copy of a model: identities and pathogen loads only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub populations: Vec<PopulationState>,
}

impl ModelState {
    pub fn population(&self, id: &str) -> Option<&PopulationState> {
        self.populations.iter().find(|pop| pop.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::{Alleles, ConstantEffects, SetupParams};
    use rand_chacha::ChaCha12Rng;
    use std::collections::BTreeMap;

    fn setup(num_loci: usize) -> Setup {
        let params = SetupParams {
            num_loci,
            possible_alleles: Alleles::Shared("AB".to_string()),
            ..SetupParams::default()
        };
        Setup::constant("test", params, ConstantEffects::default()).unwrap()
    }

    fn two_populations() -> (Model, PopId, PopId) {
        let mut model = Model::new();
        let a = model.add_population("A", setup(4), 5, 5).unwrap();
        let b = model.add_population("B", setup(4), 5, 5).unwrap();
        (model, a, b)
    }

    #[test]
    fn duplicate_and_unknown_ids() {
        let (mut model, _, _) = two_populations();
        assert!(model.add_population("A", setup(4), 1, 1).is_err());
        assert!(model.pop_id("C").is_err());
        assert_eq!(model.pop_id("B").unwrap(), 1);
    }

    #[test]
    fn migration_conserves_individuals_and_genomes() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let (mut model, a, b) = two_populations();
        let genomes = BTreeMap::from([("AABB".to_string(), 1), ("BBAA".to_string(), 1)]);
        model
            .population_mut(a)
            .add_pathogens(Kind::Host, &genomes, Some(&[2]), &mut rng)
            .unwrap();
        model.set_link(LinkKind::Migration, Kind::Host, a, b, 0.5).unwrap();

        assert!(model.migrate_one(a, Kind::Host, 0.7).unwrap());
        assert_eq!(model.population(a).cohort(Kind::Host).len(), 4);
        assert_eq!(model.population(b).cohort(Kind::Host).len(), 6);
        let arrival = model.population(b).cohort(Kind::Host).get(5).unwrap();
        let carried: Vec<_> = arrival.pathogens.keys().cloned().collect();
        assert_eq!(carried, vec!["AABB".to_string(), "BBAA".to_string()]);
        assert!(model.population(a).cohort(Kind::Host).get(2).is_none());
        model.check_invariants().unwrap();
    }

    #[test]
    fn migration_into_incompatible_setup_is_rejected() {
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let mut model = Model::new();
        let a = model.add_population("A", setup(4), 2, 0).unwrap();
        let b = model.add_population("B", setup(3), 2, 0).unwrap();
        let genomes = BTreeMap::from([("ABAB".to_string(), 2)]);
        model
            .population_mut(a)
            .add_pathogens(Kind::Host, &genomes, None, &mut rng)
            .unwrap();
        assert!(model.migrate(a, b, Kind::Host, 1, &mut rng).is_err());
        assert_eq!(model.population(a).cohort(Kind::Host).len(), 2);
        assert_eq!(model.population(b).cohort(Kind::Host).len(), 2);
    }

    #[test]
    fn contact_with_incompatible_setup_transmits_nothing() {
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        let mut model = Model::new();
        let a = model.add_population("A", setup(4), 2, 0).unwrap();
        let b = model.add_population("B", setup(3), 3, 0).unwrap();
        let genomes = BTreeMap::from([("ABAB".to_string(), 2)]);
        model
            .population_mut(a)
            .add_pathogens(Kind::Host, &genomes, None, &mut rng)
            .unwrap();
        model.set_link(LinkKind::Contact, Kind::Host, a, b, 1.0).unwrap();

        for _ in 0..50 {
            let draw: f64 = rng.random();
            let changed = model
                .population_contact(a, Kind::Host, Kind::Host, draw, &mut rng)
                .unwrap();
            assert!(!changed);
        }
        let hosts = model.population(b).cohort(Kind::Host);
        assert!(hosts.infected().is_empty());
        assert!(hosts.individuals().iter().all(|ind| ind.pathogens.is_empty()));
        model.check_invariants().unwrap();
    }

    #[test]
    fn links_into_itself_are_rejected() {
        let (mut model, a, b) = two_populations();
        assert!(model.set_link(LinkKind::Migration, Kind::Host, a, a, 1.0).is_err());
        assert!(model.set_link(LinkKind::Contact, Kind::Vector, b, b, 1.0).is_err());
        assert_eq!(model.population(b).cohort(Kind::Vector).contact().rate(b), 0.0);
        assert_eq!(model.population(b).cohort(Kind::Vector).contact().total(), 0.0);
    }

    #[test]
    fn bulk_migration_moves_infected() {
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let (mut model, a, b) = two_populations();
        let genomes = BTreeMap::from([("ABAB".to_string(), 3)]);
        model
            .population_mut(a)
            .add_pathogens(Kind::Vector, &genomes, None, &mut rng)
            .unwrap();
        assert!(model.migrate(a, b, Kind::Vector, 4, &mut rng).is_err());
        model.migrate(a, b, Kind::Vector, 3, &mut rng).unwrap();
        assert_eq!(model.population(a).cohort(Kind::Vector).infected().len(), 0);
        assert_eq!(model.population(b).cohort(Kind::Vector).infected().len(), 3);
        model.check_invariants().unwrap();
    }

    #[test]
    fn population_contact_reaches_neighbor() {
        let mut rng = ChaCha12Rng::seed_from_u64(4);
        let (mut model, a, b) = two_populations();
        let genomes = BTreeMap::from([("AAAA".to_string(), 5)]);
        model
            .population_mut(a)
            .add_pathogens(Kind::Host, &genomes, None, &mut rng)
            .unwrap();
        model.set_link(LinkKind::Contact, Kind::Host, a, b, 1.0).unwrap();

        let weights = model.population_contact_weights(a, Kind::Host, Kind::Vector);
        assert_eq!(weights, vec![(a, 0.0), (b, 1.0)]);

        let mut changed = false;
        for _ in 0..20 {
            let draw: f64 = rng.random();
            changed |= model
                .population_contact(a, Kind::Host, Kind::Vector, draw, &mut rng)
                .unwrap();
        }
        assert!(changed);
        assert!(!model.population(b).cohort(Kind::Vector).infected().is_empty());
        assert!(model.population(a).cohort(Kind::Vector).infected().is_empty());
    }

    #[test]
    fn empty_neighbor_has_no_weight() {
        let mut model = Model::new();
        let a = model.add_population("A", setup(4), 2, 2).unwrap();
        let b = model.add_population("B", setup(4), 0, 0).unwrap();
        model.set_link(LinkKind::Contact, Kind::Vector, a, b, 3.0).unwrap();
        let weights = model.population_contact_weights(a, Kind::Vector, Kind::Host);
        assert_eq!(weights, vec![(a, 0.0), (b, 0.0)]);
    }
}
