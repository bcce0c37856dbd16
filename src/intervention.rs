use crate::engine::SimRng;
use crate::individual::Kind;
use crate::model::{LinkKind, Model};
use crate::setup::Setup;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

type Action = Box<dyn FnMut(&mut Model, &mut SimRng) -> Result<()>>;

/// An action applied to the model at a fixed simulated time.
pub struct Intervention {
    pub time: f64,
    pub label: String,
    action: Action,
}

impl Intervention {
    pub fn new<F>(time: f64, label: impl Into<String>, action: F) -> Self
    where
        F: FnMut(&mut Model, &mut SimRng) -> Result<()> + 'static,
    {
        Self {
            time,
            label: label.into(),
            action: Box::new(action),
        }
    }

    pub fn apply(&mut self, model: &mut Model, rng: &mut SimRng) -> Result<()> {
        (self.action)(model, rng)
    }
}

impl fmt::Debug for Intervention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Intervention")
            .field("time", &self.time)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Interventions that can be written in a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterventionAction {
    /// Clear non-resistant genomes from a fraction of the infected.
    Treat {
        population: String,
        individuals: Kind,
        fraction: f64,
        resistance: Vec<String>,
    },
    Protect {
        population: String,
        individuals: Kind,
        fraction: f64,
        sequence: String,
    },
    WipeProtection {
        population: String,
        individuals: Kind,
    },
    AddPathogens {
        population: String,
        individuals: Kind,
        genomes: BTreeMap<String, usize>,
    },
    AddIndividuals {
        population: String,
        individuals: Kind,
        num: usize,
    },
    /// Remove a uniform random sample.
    RemoveIndividuals {
        population: String,
        individuals: Kind,
        num: usize,
    },
    SetLink {
        link: LinkKind,
        individuals: Kind,
        from: String,
        to: String,
        rate: f64,
    },
    Migrate {
        from: String,
        to: String,
        individuals: Kind,
        num: usize,
    },
    SetSetup {
        population: String,
        setup: String,
    },
}

impl InterventionAction {
    fn name(&self) -> &'static str {
        match self {
            InterventionAction::Treat { .. } => "treat",
            InterventionAction::Protect { .. } => "protect",
            InterventionAction::WipeProtection { .. } => "wipe_protection",
            InterventionAction::AddPathogens { .. } => "add_pathogens",
            InterventionAction::AddIndividuals { .. } => "add_individuals",
            InterventionAction::RemoveIndividuals { .. } => "remove_individuals",
            InterventionAction::SetLink { .. } => "set_link",
            InterventionAction::Migrate { .. } => "migrate",
            InterventionAction::SetSetup { .. } => "set_setup",
        }
    }

    /// Resolve names against `model` and `setups` and build the intervention.
    pub fn into_intervention(
        self,
        time: f64,
        model: &Model,
        setups: &[Setup],
    ) -> Result<Intervention> {
        let label = format!("{} at t = {time}", self.name());
        let intervention = match self {
            InterventionAction::Treat {
                population,
                individuals,
                fraction,
                resistance,
            } => {
                let pop = model.pop_id(&population)?;
                Intervention::new(time, label, move |model, rng| {
                    let n_cured = model
                        .population_mut(pop)
                        .treat(individuals, fraction, &resistance, None, rng)?;
                    log::debug!("treatment cured {n_cured} {individuals}s in {population:?}");
                    Ok(())
                })
            }
            InterventionAction::Protect {
                population,
                individuals,
                fraction,
                sequence,
            } => {
                let pop = model.pop_id(&population)?;
                Intervention::new(time, label, move |model, rng| {
                    model
                        .population_mut(pop)
                        .protect(individuals, fraction, &sequence, None, rng)
                })
            }
            InterventionAction::WipeProtection {
                population,
                individuals,
            } => {
                let pop = model.pop_id(&population)?;
                Intervention::new(time, label, move |model, _| {
                    model.population_mut(pop).wipe_protection(individuals, None)
                })
            }
            InterventionAction::AddPathogens {
                population,
                individuals,
                genomes,
            } => {
                let pop = model.pop_id(&population)?;
                Intervention::new(time, label, move |model, rng| {
                    model
                        .population_mut(pop)
                        .add_pathogens(individuals, &genomes, None, rng)
                })
            }
            InterventionAction::AddIndividuals {
                population,
                individuals,
                num,
            } => {
                let pop = model.pop_id(&population)?;
                Intervention::new(time, label, move |model, _| {
                    model.population_mut(pop).add_individuals(individuals, num);
                    Ok(())
                })
            }
            InterventionAction::RemoveIndividuals {
                population,
                individuals,
                num,
            } => {
                let pop = model.pop_id(&population)?;
                Intervention::new(time, label, move |model, rng| {
                    model
                        .population_mut(pop)
                        .remove_random(individuals, num, rng)?;
                    Ok(())
                })
            }
            InterventionAction::SetLink {
                link,
                individuals,
                from,
                to,
                rate,
            } => {
                let from = model.pop_id(&from)?;
                let to = model.pop_id(&to)?;
                Intervention::new(time, label, move |model, _| {
                    model.set_link(link, individuals, from, to, rate)
                })
            }
            InterventionAction::Migrate {
                from,
                to,
                individuals,
                num,
            } => {
                let from = model.pop_id(&from)?;
                let to = model.pop_id(&to)?;
                Intervention::new(time, label, move |model, rng| {
                    model.migrate(from, to, individuals, num, rng)
                })
            }
            InterventionAction::SetSetup { population, setup } => {
                let pop = model.pop_id(&population)?;
                let setup = setups
                    .iter()
                    .find(|candidate| candidate.name == setup)
                    .cloned()
                    .with_context(|| format!("unknown setup {setup:?}"))?;
                Intervention::new(time, label, move |model, _| {
                    model.population_mut(pop).set_setup(setup.clone())
                })
            }
        };
        Ok(intervention)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::{Alleles, ConstantEffects, SetupParams};
    use rand::prelude::*;

    fn setup(name: &str, recovery: f64) -> Setup {
        let params = SetupParams {
            num_loci: 3,
            possible_alleles: Alleles::Shared("XY".to_string()),
            ..SetupParams::default()
        };
        let mut effects = ConstantEffects::default();
        effects.host.recovery = recovery;
        Setup::constant(name, params, effects).unwrap()
    }

    #[test]
    fn unknown_names_fail_at_build_time() {
        let mut model = Model::new();
        model.add_population("A", setup("base", 1.0), 2, 2).unwrap();
        let action = InterventionAction::WipeProtection {
            population: "B".to_string(),
            individuals: Kind::Host,
        };
        assert!(action.into_intervention(1.0, &model, &[]).is_err());
        let action = InterventionAction::SetSetup {
            population: "A".to_string(),
            setup: "missing".to_string(),
        };
        assert!(action.into_intervention(1.0, &model, &[]).is_err());
    }

    #[test]
    fn setup_reassignment_recomputes_rows() {
        let mut rng = SimRng::seed_from_u64(1);
        let mut model = Model::new();
        let pop = model.add_population("A", setup("base", 1.0), 2, 0).unwrap();
        let genomes = BTreeMap::from([("XYX".to_string(), 1)]);
        model
            .population_mut(pop)
            .add_pathogens(Kind::Host, &genomes, None, &mut rng)
            .unwrap();

        let setups = vec![setup("fast", 4.0)];
        let action = InterventionAction::SetSetup {
            population: "A".to_string(),
            setup: "fast".to_string(),
        };
        let mut intervention = action.into_intervention(2.0, &model, &setups).unwrap();
        intervention.apply(&mut model, &mut rng).unwrap();

        let coefficients = model.population(pop).cohort(Kind::Host).coefficients();
        let recovery: f64 = coefficients.column_sum(crate::coefficients::Coefficient::Recovery);
        assert_eq!(recovery, 4.0);
        assert_eq!(model.population(pop).setup().name, "fast");
    }

    #[test]
    fn actions_parse_from_toml() {
        let text = r#"
            type = "treat"
            population = "A"
            individuals = "host"
            fraction = 0.5
            resistance = ["XY"]
        "#;
        let action: InterventionAction = toml::from_str(text).unwrap();
        assert_eq!(
            action,
            InterventionAction::Treat {
                population: "A".to_string(),
                individuals: Kind::Host,
                fraction: 0.5,
                resistance: vec!["XY".to_string()],
            }
        );
    }
}
