use crate::engine::{RunOptions, SimRng};
use crate::individual::Kind;
use crate::intervention::{Intervention, InterventionAction};
use crate::model::{LinkKind, Model};
use crate::setup::{Alleles, ConstantEffects, Preset, Setup, SetupParams};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    fmt::Debug,
    fs,
    ops::RangeBounds,
    path::Path,
};

/// Simulation configuration.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub run: RunSection,
    pub setups: Vec<SetupSection>,
    pub populations: Vec<PopulationSection>,
    #[serde(default)]
    pub links: Vec<LinkSection>,
    #[serde(default)]
    pub pathogens: Vec<PathogenSection>,
    #[serde(default)]
    pub interventions: Vec<InterventionSection>,
}

/// Time horizon, sampling and seeding of every run.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSection {
    pub t0: f64,
    pub tf: f64,
    pub time_sampling: i64,
    pub host_sampling: usize,
    pub vector_sampling: usize,
    pub progress_every: u64,
    /// Base seed; replicate `i` uses `seed + i`. OS entropy when absent.
    pub seed: Option<u64>,
}

impl Default for RunSection {
    fn default() -> Self {
        let opts = RunOptions::default();
        Self {
            t0: opts.t0,
            tf: opts.tf,
            time_sampling: opts.time_sampling,
            host_sampling: opts.host_sampling,
            vector_sampling: opts.vector_sampling,
            progress_every: opts.progress_every,
            seed: None,
        }
    }
}

impl RunSection {
    pub fn options(&self) -> RunOptions {
        RunOptions {
            t0: self.t0,
            tf: self.tf,
            time_sampling: self.time_sampling,
            host_sampling: self.host_sampling,
            vector_sampling: self.vector_sampling,
            progress_every: self.progress_every,
        }
    }
}

/// Per-kind overrides of a preset.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KindSection {
    pub mean_inoculum: Option<f64>,
    pub recovery_rate: Option<f64>,
    pub mutation_rate: Option<f64>,
    pub recombination_rate: Option<f64>,
    pub num_crossover: Option<usize>,
    pub death_rate: Option<f64>,
    pub protection_upon_recovery: Option<[usize; 2]>,
}

/// A named setup: a preset, field overrides and constant genome effects.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupSection {
    pub name: String,
    #[serde(default)]
    pub preset: Preset,
    pub num_loci: Option<usize>,
    pub possible_alleles: Option<Alleles>,
    pub contact_rate_host_vector: Option<f64>,
    pub contact_rate_host_host: Option<f64>,
    #[serde(default)]
    pub host: KindSection,
    #[serde(default)]
    pub vector: KindSection,
    #[serde(default)]
    pub effects: ConstantEffects,
}

impl SetupSection {
    pub fn params(&self) -> SetupParams {
        let mut params = SetupParams::preset(self.preset);
        if let Some(num_loci) = self.num_loci {
            params.num_loci = num_loci;
        }
        if let Some(alleles) = &self.possible_alleles {
            params.possible_alleles = alleles.clone();
        }
        if let Some(rate) = self.contact_rate_host_vector {
            params.contact_rate_host_vector = rate;
        }
        if let Some(rate) = self.contact_rate_host_host {
            params.contact_rate_host_host = rate;
        }
        for (section, kind) in [
            (&self.host, &mut params.host),
            (&self.vector, &mut params.vector),
        ] {
            kind.mean_inoculum = section.mean_inoculum.unwrap_or(kind.mean_inoculum);
            kind.recovery_rate = section.recovery_rate.unwrap_or(kind.recovery_rate);
            kind.mutation_rate = section.mutation_rate.unwrap_or(kind.mutation_rate);
            kind.recombination_rate = section.recombination_rate.unwrap_or(kind.recombination_rate);
            kind.num_crossover = section.num_crossover.unwrap_or(kind.num_crossover);
            kind.death_rate = section.death_rate.unwrap_or(kind.death_rate);
            if section.protection_upon_recovery.is_some() {
                kind.protection_upon_recovery = section.protection_upon_recovery;
            }
        }
        params
    }

    pub fn build(&self) -> Result<Setup> {
        Setup::constant(self.name.clone(), self.params(), self.effects.clone())
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PopulationSection {
    pub id: String,
    pub setup: String,
    #[serde(default)]
    pub num_hosts: usize,
    #[serde(default)]
    pub num_vectors: usize,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkSection {
    pub kind: LinkKind,
    pub individuals: Kind,
    pub from: String,
    pub to: String,
    pub rate: f64,
}

/// Genomes seeded before the run, each into `count` distinct individuals.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathogenSection {
    pub population: String,
    pub individuals: Kind,
    pub genomes: BTreeMap<String, usize>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterventionSection {
    pub time: f64,
    pub action: InterventionAction,
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let text = fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("failed to deserialize config")?;
        config.validate().context("failed to validate config")?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let run = &self.run;
        check_num(run.t0, 0.0..1e12).context("invalid initial time")?;
        check_num(run.tf, run.t0..1e12).context("invalid final time")?;
        check_num(run.time_sampling, -1..).context("invalid time sampling")?;
        check_num(run.host_sampling, 0..1_000_000).context("invalid host sampling")?;
        check_num(run.vector_sampling, 0..1_000_000).context("invalid vector sampling")?;

        let mut setup_names = HashSet::new();
        for setup in &self.setups {
            if !setup_names.insert(setup.name.as_str()) {
                bail!("setup {:?} is defined more than once", setup.name);
            }
            setup
                .build()
                .with_context(|| format!("invalid setup {:?}", setup.name))?;
        }

        if self.populations.is_empty() {
            bail!("at least one population must be defined");
        }
        let mut pop_ids = HashSet::new();
        for pop in &self.populations {
            if !pop_ids.insert(pop.id.as_str()) {
                bail!("population {:?} is defined more than once", pop.id);
            }
            if !setup_names.contains(pop.setup.as_str()) {
                bail!("population {:?} uses unknown setup {:?}", pop.id, pop.setup);
            }
            check_num(pop.num_hosts, 0..1_000_000)
                .with_context(|| format!("invalid number of hosts in {:?}", pop.id))?;
            check_num(pop.num_vectors, 0..1_000_000)
                .with_context(|| format!("invalid number of vectors in {:?}", pop.id))?;
        }

        for link in &self.links {
            for id in [&link.from, &link.to] {
                if !pop_ids.contains(id.as_str()) {
                    bail!("link refers to unknown population {id:?}");
                }
            }
            check_num(link.rate, 0.0..1e12)
                .with_context(|| format!("invalid rate of link {:?} -> {:?}", link.from, link.to))?;
        }

        for pathogens in &self.pathogens {
            if !pop_ids.contains(pathogens.population.as_str()) {
                bail!("pathogens refer to unknown population {:?}", pathogens.population);
            }
        }

        for intervention in &self.interventions {
            check_num(intervention.time, 0.0..1e12).context("invalid intervention time")?;
        }

        Ok(())
    }

    pub fn build_setups(&self) -> Result<Vec<Setup>> {
        self.setups.iter().map(SetupSection::build).collect()
    }

    /// Build the populations and links, without any pathogens.
    pub fn build_model(&self, setups: &[Setup]) -> Result<Model> {
        let mut model = Model::new();
        for pop in &self.populations {
            let setup = setups
                .iter()
                .find(|setup| setup.name == pop.setup)
                .with_context(|| format!("unknown setup {:?}", pop.setup))?;
            model.add_population(&pop.id, setup.clone(), pop.num_hosts, pop.num_vectors)?;
        }
        for link in &self.links {
            let from = model.pop_id(&link.from)?;
            let to = model.pop_id(&link.to)?;
            model
                .set_link(link.kind, link.individuals, from, to, link.rate)
                .with_context(|| format!("invalid link {:?} -> {:?}", link.from, link.to))?;
        }
        Ok(model)
    }

    pub fn seed_pathogens(&self, model: &mut Model, rng: &mut SimRng) -> Result<()> {
        for pathogens in &self.pathogens {
            let pop = model.pop_id(&pathogens.population)?;
            model
                .population_mut(pop)
                .add_pathogens(pathogens.individuals, &pathogens.genomes, None, rng)
                .with_context(|| {
                    format!("failed to seed pathogens into {:?}", pathogens.population)
                })?;
        }
        Ok(())
    }

    pub fn build_interventions(
        &self,
        model: &Model,
        setups: &[Setup],
    ) -> Result<Vec<Intervention>> {
        self.interventions
            .iter()
            .map(|section| {
                section
                    .action
                    .clone()
                    .into_intervention(section.time, model, setups)
                    .with_context(|| format!("invalid intervention at t = {}", section.time))
            })
            .collect()
    }

    /// Every genome seeded into the model, in order of first appearance.
    pub fn seeded_genomes(&self) -> Vec<String> {
        let mut genomes: Vec<String> = Vec::new();
        for pathogens in &self.pathogens {
            for genome in pathogens.genomes.keys() {
                if !genomes.contains(genome) {
                    genomes.push(genome.clone());
                }
            }
        }
        genomes
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}
