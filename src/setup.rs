use crate::coefficients::{Coefficient, CoefficientRow, NUM_COEFFICIENTS};
use crate::individual::Kind;
use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, sync::Arc};

/// Maps pathogen genomes to fitness and event-rate coefficients.
pub trait GenomeEffects: Debug + Send + Sync {
    /// Relative weight of a genome inside an individual.
    fn fitness(&self, kind: Kind, genome: &str) -> f64;

    /// Coefficient contributed by a genome to one of the non-infection classes.
    fn coefficient(&self, kind: Kind, class: Coefficient, genome: &str) -> f64;

    /// Full coefficient row contributed by a single genome.
    fn row(&self, kind: Kind, genome: &str) -> CoefficientRow {
        let mut row = [0.0; NUM_COEFFICIENTS];
        for class in Coefficient::ALL {
            row[class.column()] = match class {
                Coefficient::Infected => 1.0,
                _ => self.coefficient(kind, class, genome),
            };
        }
        row
    }
}

/// Genome-independent effects for one kind of individual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EffectTable {
    pub fitness: f64,
    /// Contact resistance in `[0, 1]`.
    pub contact: f64,
    pub lethality: f64,
    pub recovery: f64,
    pub migration: f64,
    /// Population-contact resistance in `[0, 1]`.
    pub population_contact: f64,
    pub mutation: f64,
    pub recombination: f64,
}

impl Default for EffectTable {
    fn default() -> Self {
        Self {
            fitness: 1.0,
            contact: 0.0,
            lethality: 1.0,
            recovery: 1.0,
            migration: 1.0,
            population_contact: 0.0,
            mutation: 1.0,
            recombination: 1.0,
        }
    }
}

impl EffectTable {
    fn validate(&self) -> Result<()> {
        ensure!(self.fitness > 0.0, "fitness must be positive, but is {}", self.fitness);
        for (name, val) in [
            ("contact", self.contact),
            ("population_contact", self.population_contact),
        ] {
            ensure!(
                (0.0..=1.0).contains(&val),
                "{name} resistance must be in [0, 1], but is {val}"
            );
        }
        for (name, val) in [
            ("lethality", self.lethality),
            ("recovery", self.recovery),
            ("migration", self.migration),
            ("mutation", self.mutation),
            ("recombination", self.recombination),
        ] {
            ensure!(val >= 0.0, "{name} must be non-negative, but is {val}");
        }
        Ok(())
    }

    fn get(&self, class: Coefficient) -> f64 {
        match class {
            Coefficient::Infected => 1.0,
            Coefficient::Contact => self.contact,
            Coefficient::Lethality => self.lethality,
            Coefficient::Recovery => self.recovery,
            Coefficient::Migration => self.migration,
            Coefficient::PopulationContact => self.population_contact,
            Coefficient::Mutation => self.mutation,
            Coefficient::Recombination => self.recombination,
        }
    }
}

/// Effects that ignore the genome: every pathogen of a kind behaves alike.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConstantEffects {
    pub host: EffectTable,
    pub vector: EffectTable,
}

impl ConstantEffects {
    pub fn validate(&self) -> Result<()> {
        self.host.validate().context("invalid host effects")?;
        self.vector.validate().context("invalid vector effects")?;
        Ok(())
    }

    fn table(&self, kind: Kind) -> &EffectTable {
        match kind {
            Kind::Host => &self.host,
            Kind::Vector => &self.vector,
        }
    }
}

impl GenomeEffects for ConstantEffects {
    fn fitness(&self, kind: Kind, _genome: &str) -> f64 {
        self.table(kind).fitness
    }

    fn coefficient(&self, kind: Kind, class: Coefficient, _genome: &str) -> f64 {
        self.table(kind).get(class)
    }
}

/// Rate parameters that apply to one kind of individual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KindParams {
    /// Mean number of genomes passed on in a single infectious contact.
    pub mean_inoculum: f64,
    pub recovery_rate: f64,
    pub mutation_rate: f64,
    pub recombination_rate: f64,
    pub num_crossover: usize,
    pub death_rate: f64,
    /// Locus range `[start, end)` recorded as a protection sequence on recovery.
    pub protection_upon_recovery: Option<[usize; 2]>,
}

impl Default for KindParams {
    fn default() -> Self {
        Self {
            mean_inoculum: 1.0,
            recovery_rate: 0.1,
            mutation_rate: 0.0,
            recombination_rate: 0.0,
            num_crossover: 1,
            death_rate: 0.0,
            protection_upon_recovery: None,
        }
    }
}

impl KindParams {
    fn validate(&self, num_loci: usize) -> Result<()> {
        for (name, val) in [
            ("mean_inoculum", self.mean_inoculum),
            ("recovery_rate", self.recovery_rate),
            ("mutation_rate", self.mutation_rate),
            ("recombination_rate", self.recombination_rate),
            ("death_rate", self.death_rate),
        ] {
            ensure!(
                val >= 0.0 && val.is_finite(),
                "{name} must be non-negative and finite, but is {val}"
            );
        }
        if let Some([start, end]) = self.protection_upon_recovery {
            ensure!(
                start < end && end <= num_loci,
                "protection range [{start}, {end}) must lie within {num_loci} loci"
            );
        }
        Ok(())
    }
}

/// Named parameter presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Preset {
    /// Transmission between hosts and vectors only.
    #[default]
    VectorBorne,
    /// Direct transmission between hosts, no vectors involved.
    HostHost,
}

/// Allowed alleles, either one alphabet for every locus or one per locus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Alleles {
    Shared(String),
    PerLocus(Vec<String>),
}

/// Scalar parameters of a setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SetupParams {
    pub num_loci: usize,
    pub possible_alleles: Alleles,
    pub contact_rate_host_vector: f64,
    pub contact_rate_host_host: f64,
    pub host: KindParams,
    pub vector: KindParams,
}

impl Default for SetupParams {
    fn default() -> Self {
        Self::preset(Preset::default())
    }
}

impl SetupParams {
    pub fn preset(preset: Preset) -> Self {
        match preset {
            Preset::VectorBorne => Self {
                num_loci: 10,
                possible_alleles: Alleles::Shared("ATCG".to_string()),
                contact_rate_host_vector: 2e-1,
                contact_rate_host_host: 0.0,
                host: KindParams {
                    mean_inoculum: 1e1,
                    recovery_rate: 1e-1,
                    mutation_rate: 1e-2,
                    ..KindParams::default()
                },
                vector: KindParams {
                    mean_inoculum: 1e2,
                    recovery_rate: 1e-1,
                    ..KindParams::default()
                },
            },
            Preset::HostHost => Self {
                num_loci: 10,
                possible_alleles: Alleles::Shared("ATCG".to_string()),
                contact_rate_host_vector: 0.0,
                contact_rate_host_host: 2e-1,
                host: KindParams {
                    mean_inoculum: 1e2,
                    recovery_rate: 1e-1,
                    mutation_rate: 1e-2,
                    ..KindParams::default()
                },
                vector: KindParams {
                    recovery_rate: 0.0,
                    ..KindParams::default()
                },
            },
        }
    }

    pub fn kind(&self, kind: Kind) -> &KindParams {
        match kind {
            Kind::Host => &self.host,
            Kind::Vector => &self.vector,
        }
    }

    /// Alphabet of every locus, one entry per locus.
    pub fn alleles(&self) -> Vec<&str> {
        match &self.possible_alleles {
            Alleles::Shared(alphabet) => vec![alphabet.as_str(); self.num_loci],
            Alleles::PerLocus(alphabets) => alphabets.iter().map(String::as_str).collect(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.num_loci > 0, "number of loci must be positive");
        let alleles = self.alleles();
        ensure!(
            alleles.len() == self.num_loci,
            "expected {} allele alphabets, but got {}",
            self.num_loci,
            alleles.len()
        );
        for (i_locus, alphabet) in alleles.iter().enumerate() {
            ensure!(
                !alphabet.is_empty() && alphabet.is_ascii(),
                "alphabet of locus {i_locus} must be non-empty ASCII, but is {alphabet:?}"
            );
        }
        for (name, val) in [
            ("contact_rate_host_vector", self.contact_rate_host_vector),
            ("contact_rate_host_host", self.contact_rate_host_host),
        ] {
            ensure!(
                val >= 0.0 && val.is_finite(),
                "{name} must be non-negative and finite, but is {val}"
            );
        }
        self.host
            .validate(self.num_loci)
            .context("invalid host parameters")?;
        self.vector
            .validate(self.num_loci)
            .context("invalid vector parameters")?;
        Ok(())
    }

    /// Check that a genome has one allele from the right alphabet per locus.
    pub fn check_genome(&self, genome: &str) -> Result<()> {
        let alleles = self.alleles();
        let len = genome.chars().count();
        if len != self.num_loci {
            bail!(
                "genome {genome:?} must have length {}, but has length {len}",
                self.num_loci
            );
        }
        for (i_locus, (allele, alphabet)) in genome.chars().zip(alleles).enumerate() {
            if !alphabet.contains(allele) {
                bail!(
                    "allele {allele:?} at locus {i_locus} of genome {genome:?} \
                     is not one of {alphabet:?}"
                );
            }
        }
        Ok(())
    }
}

/// Parameters and genome effects assigned to a population.
#[derive(Debug, Clone)]
pub struct Setup {
    pub name: String,
    pub params: SetupParams,
    pub effects: Arc<dyn GenomeEffects>,
}

impl Setup {
    pub fn new(
        name: impl Into<String>,
        params: SetupParams,
        effects: Arc<dyn GenomeEffects>,
    ) -> Result<Self> {
        let name = name.into();
        params
            .validate()
            .with_context(|| format!("invalid parameters in setup {name:?}"))?;
        Ok(Self {
            name,
            params,
            effects,
        })
    }

    /// Setup whose genome effects are the same for every genome.
    pub fn constant(
        name: impl Into<String>,
        params: SetupParams,
        effects: ConstantEffects,
    ) -> Result<Self> {
        effects.validate().context("invalid genome effects")?;
        Self::new(name, params, Arc::new(effects))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SetupParams {
        SetupParams {
            num_loci: 3,
            possible_alleles: Alleles::PerLocus(vec!["AB".into(), "C".into(), "DEF".into()]),
            ..SetupParams::default()
        }
    }

    #[test]
    fn genome_checks() {
        let params = params();
        params.validate().unwrap();
        params.check_genome("BCF").unwrap();
        assert!(params.check_genome("BC").is_err());
        assert!(params.check_genome("BDF").is_err());
        assert!(params.check_genome("BCFA").is_err());
    }

    #[test]
    fn protection_range_is_checked() {
        let mut params = params();
        params.host.protection_upon_recovery = Some([1, 4]);
        assert!(params.validate().is_err());
        params.host.protection_upon_recovery = Some([0, 2]);
        params.validate().unwrap();
    }

    #[test]
    fn constant_rows_mark_infection() {
        let effects = ConstantEffects::default();
        let row = effects.row(Kind::Host, "AAA");
        assert_eq!(row[Coefficient::Infected.column()], 1.0);
        assert_eq!(row[Coefficient::Contact.column()], 0.0);
        assert_eq!(row[Coefficient::Migration.column()], 1.0);
    }

    #[test]
    fn resistance_out_of_range_is_rejected() {
        let mut effects = ConstantEffects::default();
        effects.vector.contact = 1.5;
        assert!(Setup::constant("bad", params(), effects).is_err());
    }
}
