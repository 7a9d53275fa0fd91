//! Minimal test runner built around collection and class fixtures
//!
//! Lifecycle for one [`TestCollection::run`]:
//!
//! 1. collection start: build the [`CollectionContainer`]
//! 2. class start: build a [`ClassFixture`] for each [`TestClass`]
//! 3. run every [`TestCase`] of the class with a fresh [`TestOutput`]
//! 4. collection end: [`CollectionContainer::dispose`]
//!
//! A container failure errors every test in the collection, a class fixture
//! failure errors every test in that class. Nothing is retried.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::collection::CollectionContainer;
use crate::config::ConfigSource;
use crate::database::SharedDatabase;
use crate::error::{FixtureError, Result};
use crate::fixture::ClassFixture;

/// Signature of a test body
pub type TestBody = fn(&TestContext<'_>) -> anyhow::Result<()>;

/// How tests within a collection are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Classes and tests run one after another on the calling thread
    #[default]
    Sequential,
    /// Every class and every test runs on its own scoped thread
    Parallel,
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(RunMode::Sequential),
            "parallel" => Ok(RunMode::Parallel),
            other => Err(format!(
                "Invalid run mode '{}', expected 'sequential' or 'parallel'",
                other
            )),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Sequential => f.write_str("sequential"),
            RunMode::Parallel => f.write_str("parallel"),
        }
    }
}

/// Per-test observation channel
#[derive(Debug)]
pub struct TestOutput {
    test: String,
    lines: Mutex<Vec<String>>,
}

impl TestOutput {
    pub fn new(test: impl Into<String>) -> Self {
        Self {
            test: test.into(),
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn write_line(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::debug!(test = %self.test, "{}", line);
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn into_lines(self) -> Vec<String> {
        self.lines
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything a test body receives from the runner
pub struct TestContext<'a> {
    pub collection: &'a str,
    pub class: &'a str,
    pub test: &'a str,
    fixture: &'a ClassFixture,
    output: &'a TestOutput,
}

impl<'a> TestContext<'a> {
    /// The collection's shared database
    pub fn db(&self) -> &'a SharedDatabase {
        self.fixture.db()
    }

    pub fn output(&self) -> &'a TestOutput {
        self.output
    }
}

/// A named test body
#[derive(Clone)]
pub struct TestCase {
    pub name: String,
    pub body: TestBody,
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase").field("name", &self.name).finish()
    }
}

impl TestCase {
    pub fn new(name: impl Into<String>, body: TestBody) -> Self {
        Self {
            name: name.into(),
            body,
        }
    }
}

/// Tests sharing one class fixture
#[derive(Debug, Clone)]
pub struct TestClass {
    pub name: String,
    pub cases: Vec<TestCase>,
}

impl TestClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cases: Vec::new(),
        }
    }

    pub fn case(mut self, name: impl Into<String>, body: TestBody) -> Self {
        self.cases.push(TestCase::new(name, body));
        self
    }
}

/// Test classes sharing one collection container
#[derive(Debug, Clone)]
pub struct TestCollection {
    pub name: String,
    pub classes: Vec<TestClass>,
}

impl TestCollection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classes: Vec::new(),
        }
    }

    pub fn class(mut self, class: TestClass) -> Self {
        self.classes.push(class);
        self
    }

    pub fn test_count(&self) -> usize {
        self.classes.iter().map(|class| class.cases.len()).sum()
    }

    /// Build the container from `source` and run every test
    pub fn run(&self, source: &ConfigSource, mode: RunMode) -> CollectionReport {
        let started_at = Utc::now();
        match CollectionContainer::build(source) {
            Ok(container) => self.execute(container, mode, started_at),
            Err(e) => {
                tracing::error!("Collection '{}' could not start: {}", self.name, e);
                let message = &e.to_string();
                let tests: Vec<TestReport> = self
                    .classes
                    .iter()
                    .flat_map(|class| {
                        class
                            .cases
                            .iter()
                            .map(move |case| TestReport::errored(class, case, message.clone()))
                    })
                    .collect();
                CollectionReport {
                    run_id: None,
                    collection: self.name.clone(),
                    mode,
                    started_at,
                    finished_at: Utc::now(),
                    tests,
                }
            }
        }
    }

    /// Run every test against an already built container, then dispose it
    pub fn run_with_container(
        &self,
        container: CollectionContainer,
        mode: RunMode,
    ) -> CollectionReport {
        self.execute(container, mode, Utc::now())
    }

    fn execute(
        &self,
        container: CollectionContainer,
        mode: RunMode,
        started_at: DateTime<Utc>,
    ) -> CollectionReport {
        tracing::info!(
            "Running collection '{}' ({} tests, {} mode) in {}",
            self.name,
            self.test_count(),
            mode,
            container.run_id()
        );

        let tests: Vec<TestReport> = match mode {
            RunMode::Sequential => self
                .classes
                .iter()
                .flat_map(|class| self.run_class(&container, class, mode))
                .collect(),
            RunMode::Parallel => thread::scope(|scope| {
                let container = &container;
                let workers: Vec<_> = self
                    .classes
                    .iter()
                    .map(|class| scope.spawn(move || self.run_class(container, class, mode)))
                    .collect();
                workers
                    .into_iter()
                    .zip(&self.classes)
                    .flat_map(|(worker, class)| {
                        worker.join().unwrap_or_else(|_| {
                            class
                                .cases
                                .iter()
                                .map(|case| {
                                    TestReport::errored(
                                        class,
                                        case,
                                        "class runner panicked".to_string(),
                                    )
                                })
                                .collect()
                        })
                    })
                    .collect()
            }),
        };

        let run_id = container.run_id();
        container.dispose();

        let report = CollectionReport {
            run_id: Some(run_id),
            collection: self.name.clone(),
            mode,
            started_at,
            finished_at: Utc::now(),
            tests,
        };
        tracing::info!("Collection '{}' finished: {}", self.name, report.summary());
        report
    }

    fn run_class(
        &self,
        container: &CollectionContainer,
        class: &TestClass,
        mode: RunMode,
    ) -> Vec<TestReport> {
        let fixture = match ClassFixture::new(container) {
            Ok(fixture) => fixture,
            Err(e) => {
                tracing::warn!("Class fixture for '{}' failed: {}", class.name, e);
                let message = e.to_string();
                return class
                    .cases
                    .iter()
                    .map(|case| TestReport::errored(class, case, message.clone()))
                    .collect();
            }
        };
        tracing::debug!("Class '{}' started", class.name);

        let reports: Vec<TestReport> = match mode {
            RunMode::Sequential => class
                .cases
                .iter()
                .map(|case| self.run_case(class, case, &fixture))
                .collect(),
            RunMode::Parallel => thread::scope(|scope| {
                let fixture = &fixture;
                let workers: Vec<_> = class
                    .cases
                    .iter()
                    .map(|case| scope.spawn(move || self.run_case(class, case, fixture)))
                    .collect();
                workers
                    .into_iter()
                    .zip(&class.cases)
                    .map(|(worker, case)| {
                        worker.join().unwrap_or_else(|_| {
                            TestReport::errored(class, case, "test runner panicked".to_string())
                        })
                    })
                    .collect()
            }),
        };

        tracing::debug!("Class '{}' finished", class.name);
        reports
    }

    fn run_case(&self, class: &TestClass, case: &TestCase, fixture: &ClassFixture) -> TestReport {
        let output = TestOutput::new(format!("{}::{}", class.name, case.name));
        let context = TestContext {
            collection: &self.name,
            class: &class.name,
            test: &case.name,
            fixture,
            output: &output,
        };

        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| (case.body)(&context)));
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = match result {
            Ok(Ok(())) => TestOutcome::Passed,
            Ok(Err(e)) => TestOutcome::Failed(format!("{:#}", e)),
            Err(payload) => TestOutcome::Failed(panic_message(payload)),
        };
        if let TestOutcome::Failed(message) = &outcome {
            tracing::warn!("{}::{} failed: {}", class.name, case.name, message);
        }

        TestReport {
            class: class.name.clone(),
            name: case.name.clone(),
            outcome,
            output: output.into_lines(),
            duration_ms,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "test panicked".to_string()
    }
}

/// Result of a single test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "lowercase")]
pub enum TestOutcome {
    Passed,
    /// The test body returned an error or panicked
    Failed(String),
    /// A fixture the test depends on could not be built
    Errored(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub class: String,
    pub name: String,
    pub outcome: TestOutcome,
    pub output: Vec<String>,
    pub duration_ms: u64,
}

impl TestReport {
    fn errored(class: &TestClass, case: &TestCase, message: String) -> Self {
        Self {
            class: class.name.clone(),
            name: case.name.clone(),
            outcome: TestOutcome::Errored(message),
            output: Vec::new(),
            duration_ms: 0,
        }
    }
}

/// Outcome of one collection run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionReport {
    /// Container run identifier, absent when the container never built
    pub run_id: Option<Ulid>,
    pub collection: String,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tests: Vec<TestReport>,
}

impl CollectionReport {
    pub fn passed(&self) -> usize {
        self.count(|outcome| matches!(outcome, TestOutcome::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, TestOutcome::Failed(_)))
    }

    pub fn errored(&self) -> usize {
        self.count(|outcome| matches!(outcome, TestOutcome::Errored(_)))
    }

    fn count(&self, predicate: impl Fn(&TestOutcome) -> bool) -> usize {
        self.tests.iter().filter(|test| predicate(&test.outcome)).count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.errored() == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} passed, {} failed, {} errored",
            self.passed(),
            self.failed(),
            self.errored()
        )
    }

    /// Find a test report by class and test name
    pub fn test(&self, class: &str, name: &str) -> Option<&TestReport> {
        self.tests
            .iter()
            .find(|test| test.class == class && test.name == name)
    }

    /// Serialize the report to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| FixtureError::Harness(e.to_string()))
    }
}

impl fmt::Display for CollectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.run_id {
            Some(run_id) => writeln!(
                f,
                "Collection {} ({}, run {})",
                self.collection, self.mode, run_id
            )?,
            None => writeln!(f, "Collection {} ({})", self.collection, self.mode)?,
        }
        for test in &self.tests {
            let (label, detail) = match &test.outcome {
                TestOutcome::Passed => ("PASS", None),
                TestOutcome::Failed(message) => ("FAIL", Some(message)),
                TestOutcome::Errored(message) => ("ERROR", Some(message)),
            };
            writeln!(
                f,
                "  [{}] {}::{} ({} ms)",
                label, test.class, test.name, test.duration_ms
            )?;
            if let Some(detail) = detail {
                writeln!(f, "      {}", detail)?;
            }
            for line in &test.output {
                writeln!(f, "      > {}", line)?;
            }
        }
        write!(f, "{}", self.summary())
    }
}
