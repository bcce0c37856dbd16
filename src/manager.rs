use crate::analysis::Analyzer;
use crate::config::Config;
use crate::engine::{Engine, LogObserver};
use crate::setup::Setup;
use anyhow::{Context, Result};
use std::path::Path;

/// Builds engines from a configuration and runs ensembles of replicates.
pub struct Manager {
    cfg: Config,
    setups: Vec<Setup>,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(config_file: P) -> Result<Self> {
        let cfg = Config::from_file(config_file).context("failed to construct cfg")?;
        log::debug!("{cfg:#?}");
        Self::from_config(cfg)
    }

    pub fn from_config(cfg: Config) -> Result<Self> {
        let setups = cfg.build_setups().context("failed to build setups")?;
        Ok(Self { cfg, setups })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    /// Build a ready-to-run engine: populations, links, seeded pathogens and
    /// scheduled interventions.
    pub fn build_engine(&self, seed: Option<u64>) -> Result<Engine> {
        let model = self
            .cfg
            .build_model(&self.setups)
            .context("failed to build model")?;
        let interventions = self
            .cfg
            .build_interventions(&model, &self.setups)
            .context("failed to build interventions")?;

        let mut engine = Engine::new(model, seed).context("failed to construct engine")?;
        engine
            .initialize(|model, rng| self.cfg.seed_pathogens(model, rng))
            .context("failed to seed pathogens")?;
        for intervention in interventions {
            engine.schedule(intervention);
        }
        Ok(engine)
    }

    /// Build one engine to check that the configuration is usable.
    pub fn check(&self) -> Result<()> {
        let engine = self.build_engine(Some(0))?;
        engine
            .model()
            .check_invariants()
            .context("inconsistent initial model")?;
        log::info!(
            "configuration is valid: {} populations, {} interventions",
            engine.model().len(),
            self.cfg.interventions.len()
        );
        Ok(())
    }

    /// Run `n_runs` independent replicates and analyze their horizon states.
    ///
    /// Replicate `i` is seeded with `seed + i`; `seed` falls back to the
    /// configured one.
    pub fn run_ensemble(&self, n_runs: usize, seed: Option<u64>) -> Result<Analyzer> {
        let seed = seed.or(self.cfg.run.seed);
        let opts = self.cfg.run.options();
        let pop_ids: Vec<String> = self.cfg.populations.iter().map(|pop| pop.id.clone()).collect();
        let mut analyzer = Analyzer::new(&pop_ids, &self.cfg.seeded_genomes());

        for i_run in 0..n_runs {
            let run_seed = seed.map(|seed| seed.wrapping_add(i_run as u64));
            let mut engine = self
                .build_engine(run_seed)
                .with_context(|| format!("failed to build engine for run {i_run}"))?;
            let history = engine
                .run(&opts, &mut LogObserver)
                .with_context(|| format!("failed to perform run {i_run}"))?;
            analyzer
                .add_run(&history)
                .with_context(|| format!("failed to analyze run {i_run}"))?;

            let progress = 100.0 * (i_run + 1) as f64 / n_runs as f64;
            log::info!("completed {progress:06.2}%");
        }

        Ok(analyzer)
    }
}
