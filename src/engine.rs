use crate::individual::Kind;
use crate::intervention::Intervention;
use crate::model::{Model, ModelState};
use crate::population::PopId;
use crate::rates::{Event, compute_rates};
use anyhow::{Context, Result, ensure};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::Exp;
use serde::{Deserialize, Serialize};

/// Random number generator driving a simulation.
pub type SimRng = ChaCha12Rng;

/// Time horizon and sampling options of a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunOptions {
    pub t0: f64,
    pub tf: f64,
    /// Changed events skipped between intermediate snapshots (negative: none).
    pub time_sampling: i64,
    /// Keep every n-th host in intermediate snapshots (zero keeps all).
    pub host_sampling: usize,
    pub vector_sampling: usize,
    /// Events between observer calls (zero disables the observer).
    pub progress_every: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            t0: 0.0,
            tf: 100.0,
            time_sampling: -1,
            host_sampling: 0,
            vector_sampling: 0,
            progress_every: 0,
        }
    }
}

impl RunOptions {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.t0.is_finite(), "initial time must be finite, but is {}", self.t0);
        ensure!(
            self.tf.is_finite() && self.tf >= self.t0,
            "final time must be finite and not before {}, but is {}",
            self.t0,
            self.tf
        );
        Ok(())
    }
}

/// Recorded model state.
#[derive(Debug, Clone)]
pub enum Snapshot {
    /// Deep copy of the whole model.
    Full(Box<Model>),
    /// Identities and pathogen loads only.
    Slim(ModelState),
}

impl Snapshot {
    pub fn state(&self) -> ModelState {
        match self {
            Snapshot::Full(model) => model.state(0, 0),
            Snapshot::Slim(state) => state.clone(),
        }
    }
}

/// Snapshots of a run, ordered by simulated time.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<(f64, Snapshot)>,
}

impl History {
    /// Record a snapshot, replacing one already taken at the same time.
    fn record(&mut self, time: f64, snapshot: Snapshot) {
        if let Some(last) = self.entries.last_mut() {
            if last.0 == time {
                last.1 = snapshot;
                return;
            }
        }
        self.entries.push((time, snapshot));
    }

    pub fn entries(&self) -> &[(f64, Snapshot)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.entries.iter().map(|(time, _)| *time)
    }

    /// Snapshot at the horizon.
    pub fn last(&self) -> Option<&(f64, Snapshot)> {
        self.entries.last()
    }
}

/// Progress of a run, as handed to an [`Observer`].
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    pub time: f64,
    pub n_events: u64,
    pub event: Event,
    pub population: &'a str,
    pub total_rate: f64,
}

/// Receives progress reports from the simulation loop.
pub trait Observer {
    fn observe(&mut self, progress: &Progress);
}

/// Logs progress at `info` level.
#[derive(Debug, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn observe(&mut self, progress: &Progress) {
        log::info!(
            "simulating time {:.4}, event {} ({:?} in {:?}), total rate {:.4}",
            progress.time,
            progress.n_events,
            progress.event,
            progress.population,
            progress.total_rate
        );
    }
}

/// Ignores all progress.
#[derive(Debug, Default)]
pub struct NullObserver;

impl Observer for NullObserver {
    fn observe(&mut self, _progress: &Progress) {}
}

/// Gillespie simulation engine.
///
/// Holds the model, the scheduled interventions and the random number
/// generator, and advances the model through continuous simulated time.
#[derive(Debug)]
pub struct Engine {
    model: Model,
    interventions: Vec<Intervention>,
    rng: SimRng,
}

impl Engine {
    /// Create an engine, seeding the generator from the OS when `seed` is `None`.
    pub fn new(model: Model, seed: Option<u64>) -> Result<Self> {
        let rng = match seed {
            Some(seed) => SimRng::seed_from_u64(seed),
            None => SimRng::try_from_os_rng().context("failed to seed generator")?,
        };
        Ok(Self {
            model,
            interventions: Vec::new(),
            rng,
        })
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Modify the model with access to the engine's generator.
    pub fn initialize<F>(&mut self, init: F) -> Result<()>
    where
        F: FnOnce(&mut Model, &mut SimRng) -> Result<()>,
    {
        init(&mut self.model, &mut self.rng)
    }

    pub fn schedule(&mut self, intervention: Intervention) {
        self.interventions.push(intervention);
    }

    /// Run the simulation from `opts.t0` to `opts.tf`.
    ///
    /// Interventions fire in time order; those scheduled after the horizon
    /// stay pending. The history starts with a full snapshot at `t0` and ends
    /// with a full snapshot at `tf`.
    ///
    /// # Errors
    /// Returns an error if an event cannot be carried out. Failing
    /// interventions are logged and skipped.
    pub fn run(&mut self, opts: &RunOptions, observer: &mut dyn Observer) -> Result<History> {
        opts.validate().context("invalid run options")?;

        let mut pending = std::mem::take(&mut self.interventions);
        pending.sort_by(|a, b| a.time.total_cmp(&b.time));
        let mut i_next = 0;

        let mut t = opts.t0;
        let mut history = History::default();
        history.record(t, Snapshot::Full(Box::new(self.model.clone())));
        log::info!(
            "running from t = {} to t = {} with {} interventions",
            opts.t0,
            opts.tf,
            pending.len()
        );

        let mut n_events: u64 = 0;
        let mut n_changed: i64 = 0;
        loop {
            let mut rates = compute_rates(&self.model);
            let mut total = rates.total();
            let mut t_next = self.next_time(t, total)?;

            while i_next < pending.len()
                && pending[i_next].time <= t_next
                && pending[i_next].time <= opts.tf
            {
                let intervention = &mut pending[i_next];
                i_next += 1;
                t = t.max(intervention.time);
                log::debug!("applying intervention {}", intervention.label);
                if let Err(error) = intervention.apply(&mut self.model, &mut self.rng) {
                    log::warn!("intervention {} failed: {error:#}", intervention.label);
                }
                history.record(t, self.slim_snapshot(opts));
                n_changed = 0;

                rates = compute_rates(&self.model);
                total = rates.total();
                t_next = self.next_time(t, total)?;
            }

            if t_next >= opts.tf {
                break;
            }
            t = t_next;

            let draw: f64 = self.rng.random();
            let (event, pop, draw) = rates.select(draw)?;
            let changed = self.dispatch(event, pop, draw).with_context(|| {
                format!(
                    "failed to perform {event:?} in population {:?} at t = {t}",
                    self.model.population(pop).id()
                )
            })?;
            n_events += 1;

            if opts.progress_every > 0 && n_events % opts.progress_every == 0 {
                observer.observe(&Progress {
                    time: t,
                    n_events,
                    event,
                    population: self.model.population(pop).id(),
                    total_rate: total,
                });
            }

            if changed && opts.time_sampling >= 0 {
                n_changed += 1;
                if n_changed > opts.time_sampling {
                    history.record(t, self.slim_snapshot(opts));
                    n_changed = 0;
                }
            }
        }

        history.record(opts.tf, Snapshot::Full(Box::new(self.model.clone())));
        self.interventions = pending.split_off(i_next);
        log::info!("reached t = {} after {n_events} events", opts.tf);

        Ok(history)
    }

    /// Time of the next event, or infinity when nothing can happen.
    fn next_time(&mut self, t: f64, total: f64) -> Result<f64> {
        if total > 0.0 {
            let dt = Exp::new(total)?.sample(&mut self.rng);
            Ok(t + dt)
        } else {
            Ok(f64::INFINITY)
        }
    }

    fn slim_snapshot(&self, opts: &RunOptions) -> Snapshot {
        Snapshot::Slim(self.model.state(opts.host_sampling, opts.vector_sampling))
    }

    fn dispatch(&mut self, event: Event, pop: PopId, draw: f64) -> Result<bool> {
        let model = &mut self.model;
        let rng = &mut self.rng;
        match event {
            Event::MigrateHost => model.migrate_one(pop, Kind::Host, draw),
            Event::MigrateVector => model.migrate_one(pop, Kind::Vector, draw),
            Event::PopulationContactHostHost => {
                model.population_contact(pop, Kind::Host, Kind::Host, draw, rng)
            }
            Event::PopulationContactHostVector => {
                model.population_contact(pop, Kind::Host, Kind::Vector, draw, rng)
            }
            Event::PopulationContactVectorHost => {
                model.population_contact(pop, Kind::Vector, Kind::Host, draw, rng)
            }
            Event::ContactHostHost => model.population_mut(pop).contact_host_host(draw, rng),
            Event::ContactHostVector => model.population_mut(pop).contact_host_vector(draw, rng),
            Event::ContactVectorHost => model.population_mut(pop).contact_vector_host(draw, rng),
            Event::RecoverHost => model.population_mut(pop).recover(Kind::Host, draw),
            Event::RecoverVector => model.population_mut(pop).recover(Kind::Vector, draw),
            Event::MutateHost => model.population_mut(pop).mutate(Kind::Host, draw),
            Event::MutateVector => model.population_mut(pop).mutate(Kind::Vector, draw),
            Event::RecombineHost => model.population_mut(pop).recombine(Kind::Host, draw),
            Event::RecombineVector => model.population_mut(pop).recombine(Kind::Vector, draw),
            Event::KillHost => model.population_mut(pop).kill(Kind::Host, draw),
            Event::KillVector => model.population_mut(pop).kill(Kind::Vector, draw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::{Alleles, ConstantEffects, Setup, SetupParams};
    use anyhow::bail;
    use std::{cell::Cell, collections::BTreeMap, rc::Rc};

    fn model() -> Model {
        let mut params = SetupParams {
            num_loci: 3,
            possible_alleles: Alleles::Shared("AC".to_string()),
            contact_rate_host_vector: 1.0,
            ..SetupParams::default()
        };
        params.host.recovery_rate = 0.2;
        params.vector.recovery_rate = 0.2;
        params.host.mutation_rate = 0.1;
        let setup = Setup::constant("test", params, ConstantEffects::default()).unwrap();
        let mut model = Model::new();
        model.add_population("A", setup, 10, 10).unwrap();
        model
    }

    fn seed_pathogens(model: &mut Model, rng: &mut SimRng) -> Result<()> {
        let genomes = BTreeMap::from([("AAA".to_string(), 2)]);
        model.population_mut(0).add_pathogens(Kind::Host, &genomes, None, rng)
    }

    fn opts(tf: f64) -> RunOptions {
        RunOptions {
            tf,
            time_sampling: 0,
            ..RunOptions::default()
        }
    }

    #[test]
    fn zero_rates_jump_to_horizon() {
        let mut engine = Engine::new(model(), Some(1)).unwrap();
        let history = engine.run(&opts(50.0), &mut NullObserver).unwrap();
        let times: Vec<f64> = history.times().collect();
        assert_eq!(times, vec![0.0, 50.0]);
        assert!(matches!(history.last(), Some((_, Snapshot::Full(_)))));
    }

    #[test]
    fn interventions_fire_in_zero_rate_states() {
        let mut engine = Engine::new(model(), Some(2)).unwrap();
        engine.schedule(Intervention::new(5.0, "seed", seed_pathogens));
        let history = engine.run(&opts(30.0), &mut NullObserver).unwrap();

        let times: Vec<f64> = history.times().collect();
        assert!(times.contains(&5.0));
        assert!(times.len() > 3);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(times.last(), Some(&30.0));
        engine.model().check_invariants().unwrap();
    }

    #[test]
    fn late_interventions_never_fire() {
        let fired = Rc::new(Cell::new(0));
        let mut engine = Engine::new(model(), Some(3)).unwrap();
        let counter = fired.clone();
        engine.schedule(Intervention::new(20.0, "late", move |_, _| {
            counter.set(counter.get() + 1);
            Ok(())
        }));
        let counter = fired.clone();
        engine.schedule(Intervention::new(10.0, "early", move |_, _| {
            counter.set(counter.get() + 10);
            Ok(())
        }));
        engine.run(&opts(15.0), &mut NullObserver).unwrap();
        assert_eq!(fired.get(), 10);
    }

    #[test]
    fn failing_intervention_does_not_stop_run() {
        let mut engine = Engine::new(model(), Some(4)).unwrap();
        engine.schedule(Intervention::new(1.0, "broken", |_, _| bail!("no effect")));
        engine.schedule(Intervention::new(2.0, "seed", seed_pathogens));
        let history = engine.run(&opts(10.0), &mut NullObserver).unwrap();
        let state = history.last().unwrap().1.state();
        assert_eq!(state.populations[0].hosts.len(), 10);
    }

    #[test]
    fn runs_are_reproducible() {
        let run = |seed| {
            let mut engine = Engine::new(model(), Some(seed)).unwrap();
            engine.initialize(seed_pathogens).unwrap();
            let history = engine.run(&opts(20.0), &mut NullObserver).unwrap();
            let times: Vec<f64> = history.times().collect();
            (times, history.last().unwrap().1.state())
        };
        assert_eq!(run(5), run(5));
    }

    #[test]
    fn snapshots_do_not_alias_live_state() {
        let mut engine = Engine::new(model(), Some(6)).unwrap();
        engine.initialize(seed_pathogens).unwrap();
        let first = engine.model().state(0, 0);
        let second = engine.model().state(0, 0);
        assert_eq!(first, second);

        let history = engine.run(&opts(20.0), &mut NullObserver).unwrap();
        let (_, initial) = &history.entries()[0];
        assert_eq!(initial.state(), first);
        assert!(history.len() > 2);
    }

    #[test]
    fn observer_sees_every_nth_event() {
        struct Counter(u64);
        impl Observer for Counter {
            fn observe(&mut self, progress: &Progress) {
                assert_eq!(progress.n_events % 2, 0);
                self.0 += 1;
            }
        }
        let mut engine = Engine::new(model(), Some(7)).unwrap();
        engine.initialize(seed_pathogens).unwrap();
        let mut counter = Counter(0);
        let opts = RunOptions {
            tf: 20.0,
            progress_every: 2,
            ..RunOptions::default()
        };
        engine.run(&opts, &mut counter).unwrap();
        assert!(counter.0 > 0);
    }

    struct EventCounter(u64);

    impl Observer for EventCounter {
        fn observe(&mut self, _progress: &Progress) {
            self.0 += 1;
        }
    }

    /// Hosts that all carry `AAA`, so only recovery can change the state.
    fn carriers(n_hosts: usize, recovery_rate: f64, contact_rate_host_host: f64) -> Model {
        let mut params = SetupParams {
            num_loci: 3,
            possible_alleles: Alleles::Shared("AC".to_string()),
            contact_rate_host_vector: 0.0,
            contact_rate_host_host,
            ..SetupParams::default()
        };
        params.host.recovery_rate = recovery_rate;
        params.host.mutation_rate = 0.0;
        let setup = Setup::constant("test", params, ConstantEffects::default()).unwrap();
        let mut model = Model::new();
        let pop = model.add_population("A", setup, n_hosts, 0).unwrap();
        let genomes = BTreeMap::from([("AAA".to_string(), n_hosts)]);
        let mut rng = SimRng::seed_from_u64(0);
        model
            .population_mut(pop)
            .add_pathogens(Kind::Host, &genomes, None, &mut rng)
            .unwrap();
        model
    }

    #[test]
    fn snapshot_every_third_change() {
        let mut engine = Engine::new(carriers(7, 1.0, 0.0), Some(9)).unwrap();
        let mut counter = EventCounter(0);
        let opts = RunOptions {
            tf: 1000.0,
            time_sampling: 2,
            progress_every: 1,
            ..RunOptions::default()
        };
        let history = engine.run(&opts, &mut counter).unwrap();

        assert_eq!(counter.0, 7);
        assert_eq!(history.len(), 2 + 7 / 3);
        let entries = history.entries();
        assert_eq!(entries[0].0, 0.0);
        assert_eq!(entries[3].0, 1000.0);
        assert!(matches!(entries[0].1, Snapshot::Full(_)));
        assert!(matches!(entries[1].1, Snapshot::Slim(_)));
        assert!(matches!(entries[2].1, Snapshot::Slim(_)));
        assert!(matches!(entries[3].1, Snapshot::Full(_)));
        let infected = |i: usize| {
            entries[i].1.state().populations[0]
                .hosts
                .iter()
                .filter(|ind| !ind.pathogens.is_empty())
                .count()
        };
        assert_eq!(infected(1), 4);
        assert_eq!(infected(2), 1);
    }

    #[test]
    fn negative_sampling_records_only_bounds_and_interventions() {
        let mut engine = Engine::new(carriers(7, 1.0, 0.0), Some(10)).unwrap();
        engine.schedule(Intervention::new(500.0, "noop", |_, _| Ok(())));
        let mut counter = EventCounter(0);
        let opts = RunOptions {
            tf: 1000.0,
            time_sampling: -1,
            progress_every: 1,
            ..RunOptions::default()
        };
        let history = engine.run(&opts, &mut counter).unwrap();

        assert_eq!(counter.0, 7);
        let times: Vec<f64> = history.times().collect();
        assert_eq!(times, vec![0.0, 500.0, 1000.0]);
    }

    #[test]
    fn unchanged_contacts_record_nothing() {
        let mut engine = Engine::new(carriers(3, 0.0, 1.0), Some(11)).unwrap();
        let mut counter = EventCounter(0);
        let opts = RunOptions {
            tf: 10.0,
            time_sampling: 0,
            progress_every: 1,
            ..RunOptions::default()
        };
        let history = engine.run(&opts, &mut counter).unwrap();

        assert!(counter.0 > 0);
        let times: Vec<f64> = history.times().collect();
        assert_eq!(times, vec![0.0, 10.0]);
    }

    #[test]
    fn invalid_horizon_is_rejected() {
        let mut engine = Engine::new(model(), Some(8)).unwrap();
        let opts = RunOptions {
            t0: 5.0,
            tf: 1.0,
            ..RunOptions::default()
        };
        assert!(engine.run(&opts, &mut NullObserver).is_err());
    }
}
