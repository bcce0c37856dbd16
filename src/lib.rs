//! Stochastic simulation of pathogen evolution and spread in structured host
//! and vector populations.
//!
//! A [`model::Model`] holds populations of hosts and vectors. The
//! [`engine::Engine`] advances it through continuous time with the Gillespie
//! algorithm, firing scheduled [`intervention::Intervention`]s along the way.

pub mod analysis;
pub mod coefficients;
pub mod config;
pub mod engine;
pub mod individual;
pub mod intervention;
pub mod manager;
pub mod model;
pub mod population;
pub mod rates;
pub mod sampling;
pub mod setup;
pub mod stats;
