use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Kind of individual a pathogen can live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Host,
    Vector,
}

impl Kind {
    pub const ALL: [Kind; 2] = [Kind::Host, Kind::Vector];
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Host => write!(f, "host"),
            Kind::Vector => write!(f, "vector"),
        }
    }
}

/// Serial number of an individual inside its cohort.
///
/// Serials are handed out in increasing order and never reused, so the live
/// sequence of a cohort is always sorted by serial.
pub type IndividualId = u64;

/// A host or vector together with the pathogens it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub id: IndividualId,
    /// Carried genomes mapped to their fitness weight.
    pub pathogens: BTreeMap<String, f64>,
    pub sum_fitness: f64,
    /// Row of this individual in the owning cohort's coefficient matrix.
    pub coefficient_index: usize,
    pub protection_sequences: Vec<String>,
}

impl Individual {
    pub fn new(id: IndividualId, coefficient_index: usize) -> Self {
        Self {
            id,
            pathogens: BTreeMap::new(),
            sum_fitness: 0.0,
            coefficient_index,
            protection_sequences: Vec::new(),
        }
    }

    pub fn is_infected(&self) -> bool {
        !self.pathogens.is_empty()
    }

    /// Whether any protection sequence occurs in `genome`.
    pub fn is_protected_against(&self, genome: &str) -> bool {
        self.protection_sequences
            .iter()
            .any(|seq| genome.contains(seq.as_str()))
    }

    pub fn carries(&self, genome: &str) -> bool {
        self.pathogens.contains_key(genome)
    }
}
