//! Sub-case reporting.
//!
//! The suite never aborts a run on a mismatch. Every verdict is handed to a
//! [`Reporter`], which plays the role of a test framework's sub-test sink.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

/// Outcome attached to a reported event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verdict {
    Pass,
    Fail,
    /// Not applicable in this environment; distinct from a failure.
    Skip,
    /// Informational only.
    Log,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Skip => "skip",
            Self::Log => "log",
        })
    }
}

/// One reported event for a named (sub-)case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub case: String,
    pub verdict: Verdict,
    pub message: String,
}

impl Event {
    pub fn new<C: Into<String>, M: Into<String>>(case: C, verdict: Verdict, message: M) -> Self {
        Self {
            case: case.into(),
            verdict,
            message: message.into(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "[{}] {}", self.verdict, self.case)
        } else {
            write!(f, "[{}] {}: {}", self.verdict, self.case, self.message)
        }
    }
}

/// Sink for sub-case verdicts.
pub trait Reporter: Send + Sync {
    fn report(&self, event: Event);

    fn pass(&self, case: &str) {
        self.report(Event::new(case, Verdict::Pass, ""));
    }

    fn fail(&self, case: &str, message: &str) {
        self.report(Event::new(case, Verdict::Fail, message));
    }

    fn skip(&self, case: &str, reason: &str) {
        self.report(Event::new(case, Verdict::Skip, reason));
    }

    fn log(&self, case: &str, message: &str) {
        self.report(Event::new(case, Verdict::Log, message));
    }
}

/// Verdict counts of a [`Report`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} failed, {} skipped",
            self.passed, self.failed, self.skipped
        )
    }
}

/// Reporter collecting every event in memory.
#[derive(Debug, Default)]
pub struct Report {
    events: Mutex<Vec<Event>>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    fn with_verdict(&self, verdict: Verdict) -> Vec<Event> {
        self.lock()
            .iter()
            .filter(|e| e.verdict == verdict)
            .cloned()
            .collect()
    }

    pub fn failures(&self) -> Vec<Event> {
        self.with_verdict(Verdict::Fail)
    }

    pub fn skipped(&self) -> Vec<Event> {
        self.with_verdict(Verdict::Skip)
    }

    pub fn passed(&self) -> Vec<Event> {
        self.with_verdict(Verdict::Pass)
    }

    /// Informational events whose case starts with `prefix`.
    pub fn logs_for(&self, prefix: &str) -> Vec<Event> {
        self.lock()
            .iter()
            .filter(|e| e.verdict == Verdict::Log && e.case.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.lock().iter().any(|e| e.verdict == Verdict::Fail)
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for event in self.lock().iter() {
            match event.verdict {
                Verdict::Pass => summary.passed += 1,
                Verdict::Fail => summary.failed += 1,
                Verdict::Skip => summary.skipped += 1,
                Verdict::Log => {}
            }
        }
        summary
    }

    /// Panic with every failure listed if any sub-case failed.
    pub fn assert_ok(&self) {
        let failures = self.failures();
        if failures.is_empty() {
            return;
        }
        let listing: Vec<String> = failures.iter().map(ToString::to_string).collect();
        panic!(
            "{} conformance failure(s):\n{}",
            failures.len(),
            listing.join("\n")
        );
    }
}

impl Reporter for Report {
    fn report(&self, event: Event) {
        match event.verdict {
            Verdict::Pass => debug!(case = %event.case, verdict = %event.verdict, "{}", event.message),
            Verdict::Fail => warn!(case = %event.case, verdict = %event.verdict, "{}", event.message),
            Verdict::Skip => info!(case = %event.case, verdict = %event.verdict, "{}", event.message),
            Verdict::Log => info!(case = %event.case, verdict = %event.verdict, "{}", event.message),
        }
        self.lock().push(event);
    }
}

/// Name of a sub-case below `parent`.
pub fn sub_case(parent: &str, child: &str) -> String {
    format!("{parent}/{child}")
}

/// Single path component standing for the case `name`.
///
/// ASCII letters, digits, `-` and `_` are kept, `/` becomes `+` and every
/// other byte is written as `%XX`, so distinct names never share a file.
pub fn escape_name(name: &str) -> String {
    if name.is_empty() {
        return "%".to_string();
    }
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(char::from(byte)),
            b'/' => out.push('+'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let report = Report::new();
        report.pass("perm/mkdir");
        report.fail("race/mkdir", "want 1 success, got 2");
        report.skip("perm/chown", "not applicable");
        report.log("race/mkdir", "2 successes");

        assert_eq!(
            report.summary(),
            Summary {
                passed: 1,
                failed: 1,
                skipped: 1
            }
        );
        assert!(report.has_failures());
        assert_eq!(report.events().len(), 4);
        assert_eq!(report.logs_for("race/").len(), 1);
    }

    #[test]
    #[should_panic(expected = "race/mkdir: want 1 success")]
    fn test_assert_ok_lists_failures() {
        let report = Report::new();
        report.fail("race/mkdir", "want 1 success, got 2");
        report.assert_ok();
    }

    #[test]
    fn test_assert_ok_passes_without_failures() {
        let report = Report::new();
        report.skip("perm/chown", "not applicable");
        report.assert_ok();
    }

    #[test]
    fn test_case_names() {
        assert_eq!(sub_case("perm/mkdir", "usrTest"), "perm/mkdir/usrTest");
        assert_eq!(escape_name("perm/read_dir"), "perm+read_dir");
        assert_eq!(escape_name("perm/odd name"), "perm+odd%20name");
        assert_eq!(escape_name(".."), "%2E%2E");
        assert_eq!(escape_name(""), "%");
    }

    #[test]
    fn test_escaped_names_do_not_collide() {
        let names = ["a/b", "a_b", "a-b", "a+b", "a%2Fb", "perm/a-b", "perm/a/b", "perm+a+b"];
        let escaped: std::collections::HashSet<String> =
            names.iter().map(|name| escape_name(name)).collect();
        assert_eq!(escaped.len(), names.len());
    }
}
