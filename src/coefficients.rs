use serde::{Deserialize, Serialize};

/// Event-rate classes, in the column order of a [`CoefficientMatrix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Coefficient {
    Infected = 0,
    Contact = 1,
    Lethality = 2,
    Recovery = 3,
    Migration = 4,
    PopulationContact = 5,
    Mutation = 6,
    Recombination = 7,
}

pub const NUM_COEFFICIENTS: usize = 8;

impl Coefficient {
    pub const ALL: [Coefficient; NUM_COEFFICIENTS] = [
        Coefficient::Infected,
        Coefficient::Contact,
        Coefficient::Lethality,
        Coefficient::Recovery,
        Coefficient::Migration,
        Coefficient::PopulationContact,
        Coefficient::Mutation,
        Coefficient::Recombination,
    ];

    pub fn column(self) -> usize {
        self as usize
    }
}

pub type CoefficientRow = [f64; NUM_COEFFICIENTS];

/// Dense matrix with one row per live individual of a cohort.
///
/// Row `i` always belongs to the individual at position `i` of the cohort's
/// live sequence. The cohort is responsible for keeping both in step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoefficientMatrix {
    rows: Vec<CoefficientRow>,
}

impl CoefficientMatrix {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a zeroed row and return its index.
    pub fn push_zeroed(&mut self) -> usize {
        self.rows.push([0.0; NUM_COEFFICIENTS]);
        self.rows.len() - 1
    }

    /// Remove a row, shifting every later row up by one.
    pub fn remove(&mut self, i_row: usize) -> CoefficientRow {
        self.rows.remove(i_row)
    }

    pub fn row(&self, i_row: usize) -> &CoefficientRow {
        &self.rows[i_row]
    }

    pub fn row_mut(&mut self, i_row: usize) -> &mut CoefficientRow {
        &mut self.rows[i_row]
    }

    pub fn zero_row(&mut self, i_row: usize) {
        self.rows[i_row] = [0.0; NUM_COEFFICIENTS];
    }

    pub fn zero_all(&mut self) {
        self.rows.iter_mut().for_each(|row| *row = [0.0; NUM_COEFFICIENTS]);
    }

    pub fn column(&self, class: Coefficient) -> impl Iterator<Item = f64> + '_ {
        let col = class.column();
        self.rows.iter().map(move |row| row[col])
    }

    pub fn column_sum(&self, class: Coefficient) -> f64 {
        self.column(class).sum()
    }

    /// Mean of a column, or `None` for an empty matrix.
    pub fn column_mean(&self, class: Coefficient) -> Option<f64> {
        if self.rows.is_empty() {
            return None;
        }
        Some(self.column_sum(class) / self.rows.len() as f64)
    }

    /// Per-row contact weight `1 - class`, clamped at zero.
    pub fn complement(&self, class: Coefficient) -> Vec<f64> {
        self.column(class).map(|val| (1.0 - val).max(0.0)).collect()
    }

    /// Per-row weight `(1 - class) * INFECTED`, clamped at zero.
    pub fn infectious_complement(&self, class: Coefficient) -> Vec<f64> {
        let col = class.column();
        let col_inf = Coefficient::Infected.column();
        self.rows
            .iter()
            .map(|row| (1.0 - row[col]).max(0.0) * row[col_inf])
            .collect()
    }

    /// Fraction of the cohort reachable through `class`: `1 - mean(class)`.
    ///
    /// An empty matrix has no one to reach and yields zero.
    pub fn susceptibility(&self, class: Coefficient) -> f64 {
        match self.column_mean(class) {
            Some(mean) => (1.0 - mean).max(0.0),
            None => 0.0,
        }
    }
}
