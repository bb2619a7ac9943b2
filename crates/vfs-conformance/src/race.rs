//! Barrier-synchronized race harness.
//!
//! Every launched task parks at a shared start line. The orchestrator holds
//! the write side of a `RwLock`, waits until every task has checked in, then
//! drops the guard once so all read acquisitions proceed together.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError, RwLock};
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vfs_conformance_traits::VfsResult;

use crate::report::{sub_case, Reporter};

/// How many concurrent invocations are expected to succeed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RaceResult {
    /// No invocation may succeed.
    NoneOk,
    /// Exactly one invocation wins.
    OneOk,
    /// Every invocation succeeds.
    AllOk,
    /// Backend dependent; counts are only logged.
    Undefined,
}

impl fmt::Display for RaceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoneOk => "none ok",
            Self::OneOk => "one ok",
            Self::AllOk => "all ok",
            Self::Undefined => "undefined",
        })
    }
}

/// A zero-argument operation raced by the verifier.
pub type RaceOp<'a> = Box<dyn Fn() -> VfsResult<()> + Send + Sync + 'a>;

/// Box an operation for [`RaceSpec::ops`].
pub fn race_op<'a, F>(op: F) -> RaceOp<'a>
where
    F: Fn() -> VfsResult<()> + Send + Sync + 'a,
{
    Box::new(op)
}

/// Named set of operations with their expected success distribution.
pub struct RaceSpec<'a> {
    pub name: String,
    pub expected: RaceResult,
    pub ops: Vec<RaceOp<'a>>,
}

impl<'a> RaceSpec<'a> {
    pub fn new<S: Into<String>>(name: S, expected: RaceResult) -> Self {
        Self {
            name: name.into(),
            expected,
            ops: Vec::new(),
        }
    }

    /// Add an operation; each one is launched `max_race` times.
    pub fn op<F>(mut self, op: F) -> Self
    where
        F: Fn() -> VfsResult<()> + Send + Sync + 'a,
    {
        self.ops.push(race_op(op));
        self
    }
}

impl fmt::Debug for RaceSpec<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RaceSpec")
            .field("name", &self.name)
            .field("expected", &self.expected)
            .field("ops", &self.ops.len())
            .finish()
    }
}

/// Counts observed across one race.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RaceOutcome {
    pub population: usize,
    pub successes: usize,
    /// Includes panicked invocations.
    pub failures: usize,
    pub panics: usize,
    /// Text of the first error observed, for diagnostics.
    pub first_error: Option<String>,
}

impl RaceOutcome {
    /// Compare against the expected distribution; `Err` carries the mismatch.
    pub fn check(&self, expected: RaceResult) -> Result<(), String> {
        let want = match expected {
            RaceResult::NoneOk => 0,
            RaceResult::OneOk => 1,
            RaceResult::AllOk => self.population,
            RaceResult::Undefined => return Ok(()),
        };
        if self.successes == want && self.panics == 0 {
            return Ok(());
        }
        let mut message = format!(
            "want {want} success(es) ({expected}), got {} success(es) and {} failure(s) out of {}",
            self.successes, self.failures, self.population
        );
        if self.panics > 0 {
            message.push_str(&format!(", {} panicked", self.panics));
        }
        if let Some(err) = &self.first_error {
            message.push_str(&format!("; first error: {err}"));
        }
        Err(message)
    }
}

impl fmt::Display for RaceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} success(es), {} failure(s) out of {}",
            self.successes, self.failures, self.population
        )?;
        if self.panics > 0 {
            write!(f, " ({} panicked)", self.panics)?;
        }
        Ok(())
    }
}

/// Count of tasks parked at the start line.
#[derive(Default)]
struct ReadyCount {
    count: Mutex<usize>,
    cond: Condvar,
}

impl ReadyCount {
    fn arrive(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count += 1;
        self.cond.notify_all();
    }

    fn wait_for(&self, expected: usize) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count < expected {
            count = self
                .cond
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[derive(Default)]
struct Counters {
    successes: AtomicUsize,
    failures: AtomicUsize,
    panics: AtomicUsize,
    first_error: Mutex<Option<String>>,
}

impl Counters {
    fn record(&self, result: thread::Result<VfsResult<()>>) {
        match result {
            Ok(Ok(())) => {
                self.successes.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Err(err)) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                self.first_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get_or_insert_with(|| err.to_string());
            }
            Err(_) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                self.panics.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

/// Launches race specs and reports their verdicts.
pub struct ConcurrencyVerifier<'r> {
    max_race: usize,
    reporter: &'r dyn Reporter,
}

impl<'r> ConcurrencyVerifier<'r> {
    pub fn new(max_race: usize, reporter: &'r dyn Reporter) -> Self {
        Self { max_race, reporter }
    }

    pub fn max_race(&self) -> usize {
        self.max_race
    }

    /// Race `spec` and report the verdict under `race/<name>`.
    pub fn run(&self, spec: &RaceSpec<'_>) -> RaceOutcome {
        let case = sub_case("race", &spec.name);
        if spec.ops.is_empty() {
            self.reporter.fail(&case, "race spec has no operations");
            return RaceOutcome::default();
        }
        if self.max_race == 0 {
            self.reporter.fail(&case, "max_race is 0, no operation would run");
            return RaceOutcome::default();
        }

        let outcome = self.launch(&spec.ops);
        info!(
            case = %case,
            expected = %spec.expected,
            successes = outcome.successes,
            failures = outcome.failures,
            population = outcome.population,
            "race finished"
        );

        match outcome.check(spec.expected) {
            Ok(()) => {
                self.reporter.log(&case, &outcome.to_string());
                self.reporter.pass(&case);
            }
            Err(message) => self.reporter.fail(&case, &message),
        }
        outcome
    }

    /// Run every operation `max_race` times at once and tally the results.
    pub fn launch(&self, ops: &[RaceOp<'_>]) -> RaceOutcome {
        let population = self.max_race * ops.len();
        let ready = ReadyCount::default();
        let start = RwLock::new(());
        let counters = Counters::default();

        thread::scope(|scope| {
            let starter = start.write().unwrap_or_else(PoisonError::into_inner);

            for op in ops {
                for _ in 0..self.max_race {
                    let (ready, start, counters) = (&ready, &start, &counters);
                    scope.spawn(move || {
                        ready.arrive();
                        let result = {
                            let _running = start.read().unwrap_or_else(PoisonError::into_inner);
                            panic::catch_unwind(AssertUnwindSafe(|| op()))
                        };
                        counters.record(result);
                    });
                }
            }

            ready.wait_for(population);
            debug!(population, "all racers parked, releasing");
            drop(starter);
        });

        let first_error = counters
            .first_error
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        RaceOutcome {
            population,
            successes: counters.successes.into_inner(),
            failures: counters.failures.into_inner(),
            panics: counters.panics.into_inner(),
            first_error,
        }
    }
}
