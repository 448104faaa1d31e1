//! Matrix runner
//!
//! Registration enumerates every (driver, suite, pattern) triple in a fixed
//! order: drivers in registration order, then suites, then each suite's
//! tuned pattern list. Execution groups scenarios by driver: the driver is
//! installed once, its scenarios run (optionally shuffled), and it is
//! uninstalled once. Results are reported in registration order whatever the
//! execution order was.
//!
//! Each scenario runs skip-check, setup, execute, teardown. Teardown runs if
//! and only if setup produced a resource, including when the scenario body
//! fails or panics.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, error, info, warn};

use storage_e2e_common::Error;

use crate::cluster::ClusterClient;
use crate::compat::{check_capabilities, skip_unsupported};
use crate::config::RunConfig;
use crate::driver::{driver_name_with_feature_tags, DriverFactory, TestDriver};
use crate::framework::Framework;
use crate::pattern::{dynamic_only, keep_all, PatternTuner, TestPattern, TestVolType};
use crate::resource::{GenericVolumeTestResource, SetupOutcome};
use crate::suite::{test_name_str, ScenarioContext, SuiteFactory, TestSuite};

/// How one scenario ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioOutcome {
    /// Assertions held and teardown succeeded
    Passed,
    /// Not applicable to the driver; carries the reason
    Skipped(String),
    /// Setup, execution or teardown failed; carries the error
    Failed(String),
}

impl fmt::Display for ScenarioOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioOutcome::Passed => f.write_str("passed"),
            ScenarioOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
            ScenarioOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Result of one scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioResult {
    /// Full scenario name
    pub name: String,
    /// Driver the scenario ran against
    pub driver: String,
    /// Outcome
    pub outcome: ScenarioOutcome,
}

/// Results of a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Results in registration order
    pub results: Vec<ScenarioResult>,
    /// Driver configuration inconsistencies found at registration
    pub inconsistencies: Vec<String>,
}

impl RunReport {
    fn count(&self, f: impl Fn(&ScenarioOutcome) -> bool) -> usize {
        self.results.iter().filter(|r| f(&r.outcome)).count()
    }

    /// Number of passed scenarios
    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, ScenarioOutcome::Passed))
    }

    /// Number of skipped scenarios
    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ScenarioOutcome::Skipped(_)))
    }

    /// Number of failed scenarios
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ScenarioOutcome::Failed(_)))
    }

    /// No scenario failed
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Log one line per scenario and a summary
    pub fn log_summary(&self) {
        for result in &self.results {
            match &result.outcome {
                ScenarioOutcome::Passed => info!(scenario = %result.name, "PASS"),
                ScenarioOutcome::Skipped(reason) => {
                    debug!(scenario = %result.name, reason = %reason, "SKIP")
                }
                ScenarioOutcome::Failed(reason) => {
                    error!(scenario = %result.name, reason = %reason, "FAIL")
                }
            }
        }
        for inconsistency in &self.inconsistencies {
            warn!(%inconsistency, "driver configuration inconsistency");
        }
        info!(
            total = self.results.len(),
            passed = self.passed(),
            skipped = self.skipped(),
            failed = self.failed(),
            "run finished"
        );
    }
}

/// One registered scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    /// Full scenario name
    pub name: String,
    /// Index into the registered drivers
    pub driver: usize,
    /// Index into the registered suites
    pub suite: usize,
    /// Pattern under test
    pub pattern: TestPattern,
}

/// Builder collecting drivers, suites and the pattern tuner
pub struct MatrixRunner {
    config: Arc<RunConfig>,
    client: Arc<dyn ClusterClient>,
    drivers: Vec<DriverFactory>,
    suites: Vec<SuiteFactory>,
    tuner: PatternTuner,
}

impl MatrixRunner {
    /// Runner with no drivers or suites; the tuner follows `config.dynamic_only`
    pub fn new(config: Arc<RunConfig>, client: Arc<dyn ClusterClient>) -> Self {
        let tuner = if config.dynamic_only {
            dynamic_only()
        } else {
            keep_all()
        };
        Self {
            config,
            client,
            drivers: Vec::new(),
            suites: Vec::new(),
            tuner,
        }
    }

    /// Register a driver constructor
    pub fn with_driver(mut self, factory: DriverFactory) -> Self {
        self.drivers.push(factory);
        self
    }

    /// Register several driver constructors
    pub fn with_drivers(mut self, factories: impl IntoIterator<Item = DriverFactory>) -> Self {
        self.drivers.extend(factories);
        self
    }

    /// Register a suite constructor
    pub fn with_suite(mut self, factory: SuiteFactory) -> Self {
        self.suites.push(factory);
        self
    }

    /// Register several suite constructors
    pub fn with_suites(mut self, factories: impl IntoIterator<Item = SuiteFactory>) -> Self {
        self.suites.extend(factories);
        self
    }

    /// Replace the run-wide pattern tuner
    pub fn with_pattern_tuner(mut self, tuner: PatternTuner) -> Self {
        self.tuner = tuner;
        self
    }

    /// Instantiate drivers and suites and enumerate the scenarios
    ///
    /// Fails in strict mode when a driver cannot serve a pattern it would be
    /// asked to run.
    pub fn register(self) -> Result<Matrix, Error> {
        let drivers: Vec<Box<dyn TestDriver>> = self.drivers.iter().map(|f| f()).collect();
        let suites: Vec<Box<dyn TestSuite>> = self.suites.iter().map(|f| f()).collect();

        let mut scenarios = Vec::new();
        let mut inconsistencies = Vec::new();
        let mut inconsistent_drivers: Vec<&str> = Vec::new();
        for (d, driver) in drivers.iter().enumerate() {
            let driver_label = driver_name_with_feature_tags(driver.driver_info());
            for (s, suite) in suites.iter().enumerate() {
                let info = suite.info();
                for pattern in (self.tuner)(&info.test_patterns) {
                    if let Some(problem) = inconsistency(driver.as_ref(), suite.as_ref(), &pattern)
                    {
                        if !inconsistencies.contains(&problem) {
                            inconsistencies.push(problem);
                        }
                        let name = driver.driver_info().name.as_str();
                        if !inconsistent_drivers.contains(&name) {
                            inconsistent_drivers.push(name);
                        }
                    }
                    let name = format!("{} {}", driver_label, test_name_str(info, &pattern));
                    if !self.config.selects(&name) {
                        debug!(scenario = %name, "filtered out");
                        continue;
                    }
                    scenarios.push(Scenario {
                        name,
                        driver: d,
                        suite: s,
                        pattern,
                    });
                }
            }
        }

        for problem in &inconsistencies {
            error!(%problem, "driver configuration inconsistency");
        }
        if self.config.strict_capabilities && !inconsistencies.is_empty() {
            return Err(Error::configuration(
                inconsistent_drivers.join(","),
                inconsistencies.join("; "),
            ));
        }

        info!(
            drivers = drivers.len(),
            suites = suites.len(),
            scenarios = scenarios.len(),
            "registered test matrix"
        );
        Ok(Matrix {
            config: self.config,
            client: self.client,
            drivers,
            suites,
            scenarios,
            inconsistencies,
        })
    }
}

/// A driver that passes the capability checks for a pattern but lacks the
/// extension contract setup needs for it
fn inconsistency(
    driver: &dyn TestDriver,
    suite: &dyn TestSuite,
    pattern: &TestPattern,
) -> Option<String> {
    let info = driver.driver_info();
    if check_capabilities(suite.info(), pattern, info).is_some() {
        return None;
    }
    let missing = match pattern.vol_type() {
        TestVolType::InlineVolume | TestVolType::PreprovisionedPV
            if driver.as_preprovisioned().is_none() =>
        {
            "volume creation"
        }
        TestVolType::DynamicPV if driver.as_dynamic_pv().is_none() => "dynamic provisioning",
        _ => return None,
    };
    Some(format!(
        "driver {:?} is offered {} patterns but has no {} capability",
        info.name,
        pattern.vol_type(),
        missing
    ))
}

/// Registered drivers, suites and scenarios, ready to run
pub struct Matrix {
    config: Arc<RunConfig>,
    client: Arc<dyn ClusterClient>,
    drivers: Vec<Box<dyn TestDriver>>,
    suites: Vec<Box<dyn TestSuite>>,
    scenarios: Vec<Scenario>,
    inconsistencies: Vec<String>,
}

impl Matrix {
    /// Scenarios in registration order
    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    /// Configuration inconsistencies found at registration
    pub fn inconsistencies(&self) -> &[String] {
        &self.inconsistencies
    }

    /// Run every scenario, driver by driver
    pub async fn run(mut self) -> RunReport {
        let mut outcomes: Vec<Option<ScenarioOutcome>> = vec![None; self.scenarios.len()];
        let mut shuffle = self.config.shuffle_seed.map(StdRng::seed_from_u64);

        for d in 0..self.drivers.len() {
            let mut indices: Vec<usize> = (0..self.scenarios.len())
                .filter(|&i| self.scenarios[i].driver == d)
                .collect();
            if let Some(rng) = shuffle.as_mut() {
                indices.shuffle(rng);
            }
            self.run_driver(d, &indices, &mut outcomes).await;
        }

        let results = self
            .scenarios
            .iter()
            .zip(outcomes)
            .map(|(scenario, outcome)| ScenarioResult {
                name: scenario.name.clone(),
                driver: self.drivers[scenario.driver].driver_info().name.clone(),
                outcome: outcome.unwrap_or_else(|| {
                    ScenarioOutcome::Failed("scenario was never run".to_string())
                }),
            })
            .collect();

        let report = RunReport {
            results,
            inconsistencies: self.inconsistencies,
        };
        report.log_summary();
        report
    }

    async fn run_driver(
        &mut self,
        d: usize,
        indices: &[usize],
        outcomes: &mut [Option<ScenarioOutcome>],
    ) {
        let driver_name = self.drivers[d].driver_info().name.clone();

        // Skips are decided before anything touches the cluster
        let mut runnable = Vec::new();
        for &i in indices {
            let scenario = &self.scenarios[i];
            let suite = self.suites[scenario.suite].as_ref();
            match skip_unsupported(suite, self.drivers[d].as_ref(), &scenario.pattern) {
                Some(skip) => {
                    debug!(scenario = %scenario.name, reason = %skip, "skipping");
                    outcomes[i] = Some(ScenarioOutcome::Skipped(skip.reason().to_string()));
                }
                None => runnable.push(i),
            }
        }
        if runnable.is_empty() {
            info!(driver = %driver_name, "no runnable scenarios; driver not installed");
            return;
        }

        let created = Framework::create(Arc::clone(&self.client), Arc::clone(&self.config)).await;
        let framework = match created {
            Ok(fw) => fw,
            Err(e) => {
                error!(driver = %driver_name, error = %e, "failed to create test namespace");
                for &i in &runnable {
                    outcomes[i] = Some(ScenarioOutcome::Failed(format!(
                        "test namespace creation failed: {}",
                        e
                    )));
                }
                return;
            }
        };

        info!(driver = %driver_name, namespace = %framework.namespace(), "installing driver");
        let installed = self.drivers[d].create_driver(&framework).await;

        match installed {
            Ok(()) => {
                let driver = self.drivers[d].as_ref();
                let mut broken: Option<String> = None;
                for &i in &runnable {
                    if let Some(cause) = &broken {
                        outcomes[i] = Some(ScenarioOutcome::Failed(format!(
                            "driver unusable after earlier failure: {}",
                            cause
                        )));
                        continue;
                    }
                    let scenario = &self.scenarios[i];
                    let suite = self.suites[scenario.suite].as_ref();
                    let run = run_scenario(&framework, driver, suite, scenario).await;
                    if let Some(cause) = run.driver_fatal {
                        error!(
                            driver = %driver_name,
                            scenario = %scenario.name,
                            error = %cause,
                            "driver failure; aborting its remaining scenarios"
                        );
                        broken = Some(cause);
                    }
                    outcomes[i] = Some(run.outcome);
                }
            }
            Err(e) => {
                error!(
                    driver = %driver_name,
                    error = %e,
                    fatal = e.is_driver_fatal(),
                    "driver installation failed; aborting its scenarios"
                );
                for &i in &runnable {
                    outcomes[i] = Some(ScenarioOutcome::Failed(format!(
                        "driver installation failed: {}",
                        e
                    )));
                }
            }
        }

        if let Err(e) = self.drivers[d].cleanup_driver().await {
            error!(driver = %driver_name, error = %e, "driver cleanup failed");
        }
        if let Err(e) = framework.destroy().await {
            error!(
                driver = %driver_name,
                namespace = %framework.namespace(),
                error = %e,
                "failed to destroy test namespace"
            );
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Outcome of one scenario
struct ScenarioRun {
    outcome: ScenarioOutcome,
    /// Set when the scenario failed in a way that leaves the driver unusable
    driver_fatal: Option<String>,
}

impl From<ScenarioOutcome> for ScenarioRun {
    fn from(outcome: ScenarioOutcome) -> Self {
        Self {
            outcome,
            driver_fatal: None,
        }
    }
}

fn fatal_cause(e: &Error) -> Option<String> {
    e.is_driver_fatal().then(|| e.to_string())
}

/// Setup, execute and tear down one scenario that passed the skip check
async fn run_scenario(
    framework: &Framework,
    driver: &dyn TestDriver,
    suite: &dyn TestSuite,
    scenario: &Scenario,
) -> ScenarioRun {
    info!(scenario = %scenario.name, "running");

    let mut resource =
        match GenericVolumeTestResource::setup(framework, driver, &scenario.pattern).await {
            Ok(SetupOutcome::Ready(resource)) => resource,
            Ok(SetupOutcome::Skipped(skip)) => {
                warn!(scenario = %scenario.name, reason = %skip, "skipped during setup");
                return ScenarioOutcome::Skipped(skip.reason().to_string()).into();
            }
            Err(e) => {
                error!(scenario = %scenario.name, error = %e, "setup failed");
                return ScenarioRun {
                    outcome: ScenarioOutcome::Failed(format!("setup failed: {}", e)),
                    driver_fatal: fatal_cause(&e),
                };
            }
        };

    let executed = {
        let mut ctx = ScenarioContext {
            framework,
            driver,
            pattern: &scenario.pattern,
            resource: &mut resource,
        };
        AssertUnwindSafe(suite.execute(&mut ctx)).catch_unwind().await
    };

    let torn_down = resource.teardown(framework, driver).await;

    let (outcome, driver_fatal) = match executed {
        Ok(Ok(())) => (ScenarioOutcome::Passed, None),
        Ok(Err(e)) => (ScenarioOutcome::Failed(e.to_string()), fatal_cause(&e)),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            (ScenarioOutcome::Failed(format!("panicked: {}", message)), None)
        }
    };

    let outcome = match (outcome, torn_down) {
        (outcome, Ok(())) => outcome,
        (ScenarioOutcome::Passed, Err(e)) => {
            error!(scenario = %scenario.name, error = %e, "teardown failed");
            ScenarioOutcome::Failed(format!("teardown failed: {}", e))
        }
        (outcome, Err(e)) => {
            error!(
                scenario = %scenario.name,
                error = %e,
                "teardown failed after scenario failure"
            );
            outcome
        }
    };
    ScenarioRun {
        outcome,
        driver_fatal,
    }
}
