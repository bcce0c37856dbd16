use crate::coefficients::{Coefficient, CoefficientMatrix};
use crate::individual::Kind;
use crate::model::Model;
use crate::population::PopId;
use crate::sampling::weighted_random;
use anyhow::{Context, Result};

/// Event classes, in the fixed order used to scan the rate matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    MigrateHost,
    MigrateVector,
    PopulationContactHostHost,
    PopulationContactHostVector,
    PopulationContactVectorHost,
    ContactHostHost,
    ContactHostVector,
    ContactVectorHost,
    RecoverHost,
    RecoverVector,
    MutateHost,
    MutateVector,
    RecombineHost,
    RecombineVector,
    KillHost,
    KillVector,
}

pub const NUM_EVENTS: usize = 16;

impl Event {
    pub const ALL: [Event; NUM_EVENTS] = [
        Event::MigrateHost,
        Event::MigrateVector,
        Event::PopulationContactHostHost,
        Event::PopulationContactHostVector,
        Event::PopulationContactVectorHost,
        Event::ContactHostHost,
        Event::ContactHostVector,
        Event::ContactVectorHost,
        Event::RecoverHost,
        Event::RecoverVector,
        Event::MutateHost,
        Event::MutateVector,
        Event::RecombineHost,
        Event::RecombineVector,
        Event::KillHost,
        Event::KillVector,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Rates of every event class in every population, stored row-major
/// (event class, then population).
#[derive(Debug, Clone, PartialEq)]
pub struct RateMatrix {
    rates: Vec<f64>,
    n_pops: usize,
}

impl RateMatrix {
    fn zeros(n_pops: usize) -> Self {
        Self {
            rates: vec![0.0; NUM_EVENTS * n_pops],
            n_pops,
        }
    }

    pub fn n_pops(&self) -> usize {
        self.n_pops
    }

    pub fn get(&self, event: Event, pop: PopId) -> f64 {
        self.rates[event.index() * self.n_pops + pop]
    }

    fn set(&mut self, event: Event, pop: PopId, rate: f64) {
        self.rates[event.index() * self.n_pops + pop] = rate;
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.rates
    }

    pub fn total(&self) -> f64 {
        self.rates.iter().sum()
    }

    /// Pick the event and population a uniform `draw` falls on.
    ///
    /// Returns the residual draw for the population-level action.
    pub fn select(&self, draw: f64) -> Result<(Event, PopId, f64)> {
        let (idx, residual) =
            weighted_random(draw, &self.rates).context("failed to select an event")?;
        Ok((Event::ALL[idx / self.n_pops], idx % self.n_pops, residual))
    }
}

fn infectious(coefficients: &CoefficientMatrix, class: Coefficient) -> f64 {
    coefficients.infectious_complement(class).iter().sum()
}

/// Aggregate population-contact weight of `pop` towards its neighbors.
fn population_contact_total(model: &Model, pop: PopId, origin: Kind, target: Kind) -> f64 {
    model
        .population_contact_weights(pop, origin, target)
        .iter()
        .map(|&(_, weight)| weight)
        .sum()
}

/// Compute the rate matrix for the current state of `model`.
pub fn compute_rates(model: &Model) -> RateMatrix {
    let mut rates = RateMatrix::zeros(model.len());

    for (i_pop, pop) in model.populations().iter().enumerate() {
        let params = &pop.setup().params;
        let hosts = pop.cohort(Kind::Host);
        let vectors = pop.cohort(Kind::Vector);
        let host_coef = hosts.coefficients();
        let vector_coef = vectors.coefficients();

        let pc_host_host = population_contact_total(model, i_pop, Kind::Host, Kind::Host);
        let pc_host_vector = population_contact_total(model, i_pop, Kind::Host, Kind::Vector);
        let pc_vector_host = population_contact_total(model, i_pop, Kind::Vector, Kind::Host);

        let pc_hosts = infectious(host_coef, Coefficient::PopulationContact);
        let pc_vectors = infectious(vector_coef, Coefficient::PopulationContact);
        let contact_hosts = infectious(host_coef, Coefficient::Contact);
        let contact_vectors = infectious(vector_coef, Coefficient::Contact);

        let cells = [
            (
                Event::MigrateHost,
                hosts.migration().total() * host_coef.column_sum(Coefficient::Migration),
            ),
            (
                Event::MigrateVector,
                vectors.migration().total() * vector_coef.column_sum(Coefficient::Migration),
            ),
            (Event::PopulationContactHostHost, pc_hosts * pc_host_host),
            (Event::PopulationContactHostVector, pc_hosts * pc_host_vector),
            (Event::PopulationContactVectorHost, pc_vectors * pc_vector_host),
            (
                Event::ContactHostHost,
                params.contact_rate_host_host
                    * contact_hosts
                    * host_coef.susceptibility(Coefficient::Contact),
            ),
            (
                Event::ContactHostVector,
                params.contact_rate_host_vector
                    * contact_hosts
                    * vector_coef.susceptibility(Coefficient::Contact),
            ),
            (
                Event::ContactVectorHost,
                params.contact_rate_host_vector
                    * contact_vectors
                    * host_coef.susceptibility(Coefficient::Contact),
            ),
            (
                Event::RecoverHost,
                params.host.recovery_rate * host_coef.column_sum(Coefficient::Recovery),
            ),
            (
                Event::RecoverVector,
                params.vector.recovery_rate * vector_coef.column_sum(Coefficient::Recovery),
            ),
            (
                Event::MutateHost,
                params.host.mutation_rate * host_coef.column_sum(Coefficient::Mutation),
            ),
            (
                Event::MutateVector,
                params.vector.mutation_rate * vector_coef.column_sum(Coefficient::Mutation),
            ),
            (
                Event::RecombineHost,
                params.host.recombination_rate * host_coef.column_sum(Coefficient::Recombination),
            ),
            (
                Event::RecombineVector,
                params.vector.recombination_rate
                    * vector_coef.column_sum(Coefficient::Recombination),
            ),
            (
                Event::KillHost,
                params.host.death_rate * host_coef.column_sum(Coefficient::Lethality),
            ),
            (
                Event::KillVector,
                params.vector.death_rate * vector_coef.column_sum(Coefficient::Lethality),
            ),
        ];
        for (event, rate) in cells {
            // Rounding in the row updates can leave tiny negative sums.
            rates.set(event, i_pop, rate.max(0.0));
        }
    }

    rates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LinkKind;
    use crate::setup::{Alleles, ConstantEffects, Setup, SetupParams};
    use rand::prelude::*;
    use rand_chacha::ChaCha12Rng;
    use std::collections::BTreeMap;

    fn model() -> Model {
        let mut params = SetupParams {
            num_loci: 2,
            possible_alleles: Alleles::Shared("AB".to_string()),
            contact_rate_host_vector: 2.0,
            contact_rate_host_host: 0.5,
            ..SetupParams::default()
        };
        params.host.recovery_rate = 0.25;
        params.host.death_rate = 0.125;
        params.vector.recovery_rate = 0.0;
        let mut effects = ConstantEffects::default();
        effects.vector.contact = 0.5;
        let setup = Setup::constant("test", params, effects).unwrap();

        let mut model = Model::new();
        model.add_population("A", setup.clone(), 4, 2).unwrap();
        model.add_population("B", setup, 3, 3).unwrap();
        model
    }

    #[test]
    fn healthy_model_has_zero_rates() {
        let rates = compute_rates(&model());
        assert_eq!(rates.total(), 0.0);
        assert!(rates.select(0.5).is_err());
    }

    #[test]
    fn rates_follow_coefficients() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let mut model = model();
        let genomes = BTreeMap::from([("AB".to_string(), 2)]);
        model
            .population_mut(0)
            .add_pathogens(Kind::Host, &genomes, None, &mut rng)
            .unwrap();
        let genomes = BTreeMap::from([("BA".to_string(), 1)]);
        model
            .population_mut(0)
            .add_pathogens(Kind::Vector, &genomes, None, &mut rng)
            .unwrap();
        model
            .set_link(LinkKind::Migration, Kind::Host, 0, 1, 0.5)
            .unwrap();
        model.set_link(LinkKind::Contact, Kind::Host, 0, 1, 2.0).unwrap();

        let rates = compute_rates(&model);
        assert!(rates.as_slice().iter().all(|&r| r >= 0.0));

        // Two infected hosts, migration weight 0.5.
        assert_eq!(rates.get(Event::MigrateHost, 0), 1.0);
        assert_eq!(rates.get(Event::MigrateVector, 0), 0.0);
        // Two infectious hosts, contact weight 2 towards fully susceptible B.
        assert_eq!(rates.get(Event::PopulationContactHostHost, 0), 4.0);
        assert_eq!(rates.get(Event::PopulationContactHostVector, 0), 4.0);
        assert_eq!(rates.get(Event::PopulationContactVectorHost, 0), 0.0);
        assert_eq!(rates.get(Event::ContactHostHost, 0), 1.0);
        // One infected vector with contact resistance 0.5 among two vectors.
        assert_eq!(rates.get(Event::ContactHostVector, 0), 2.0 * 2.0 * 0.75);
        assert_eq!(rates.get(Event::ContactVectorHost, 0), 2.0 * 0.5 * 1.0);
        assert_eq!(rates.get(Event::RecoverHost, 0), 0.5);
        assert_eq!(rates.get(Event::RecoverVector, 0), 0.0);
        assert_eq!(rates.get(Event::KillHost, 0), 0.25);
        for event in Event::ALL {
            assert_eq!(rates.get(event, 1), 0.0);
        }
    }

    #[test]
    fn selection_maps_back_to_event_and_population() {
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let mut model = model();
        let genomes = BTreeMap::from([("AA".to_string(), 1)]);
        model
            .population_mut(1)
            .add_pathogens(Kind::Host, &genomes, None, &mut rng)
            .unwrap();
        let rates = compute_rates(&model);
        for _ in 0..1000 {
            let (event, pop, residual) = rates.select(rng.random()).unwrap();
            assert_eq!(pop, 1);
            assert!(rates.get(event, pop) > 0.0);
            assert!((0.0..1.0).contains(&residual));
        }
    }
}
