//! Time-boxed regular expression matching.
//!
//! User-supplied patterns are compiled with size limits and matched on a
//! worker thread that the caller abandons once the deadline passes. The
//! `regex` engine runs in linear time, so an abandoned worker always finishes
//! on its own; its late result is simply dropped.

use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Upper bound on how long one match may block the caller.
pub const DEFAULT_REGEX_TIMEOUT: Duration = Duration::from_secs(1);

/// Limit on the compiled program size of a user pattern.
const COMPILED_SIZE_LIMIT: usize = 1 << 20;

/// Limit on the lazy DFA cache of a user pattern.
const DFA_SIZE_LIMIT: usize = 2 << 20;

/// Result of a time-boxed match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched,
    NoMatch,
    TimedOut,
}

impl MatchOutcome {
    /// Only an actual match counts; a timeout is a non-match.
    pub fn is_match(self) -> bool {
        self == MatchOutcome::Matched
    }
}

/// Compiles a user pattern with resource limits.
///
/// # Errors
///
/// Returns the compile error for invalid or oversized patterns.
pub fn compile(pattern: &str, ignore_case: bool) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(ignore_case)
        .size_limit(COMPILED_SIZE_LIMIT)
        .dfa_size_limit(DFA_SIZE_LIMIT)
        .build()
}

/// Runs `regex.is_match(haystack)` on a worker thread and waits at most
/// `timeout` for the answer.
pub fn match_with_timeout(regex: &Arc<Regex>, haystack: &str, timeout: Duration) -> MatchOutcome {
    let (tx, rx) = mpsc::channel();
    let worker_regex = Arc::clone(regex);
    let worker_haystack = haystack.to_owned();

    let spawned = thread::Builder::new()
        .name("regex-match".to_string())
        .spawn(move || {
            // The receiver may be gone after a timeout.
            let _ = tx.send(worker_regex.is_match(&worker_haystack));
        });

    if let Err(e) = spawned {
        tracing::warn!(error = %e, "Could not spawn regex worker; treating as no match");
        return MatchOutcome::NoMatch;
    }

    match rx.recv_timeout(timeout) {
        Ok(true) => MatchOutcome::Matched,
        Ok(false) => MatchOutcome::NoMatch,
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(
                pattern = regex.as_str(),
                timeout_ms = timeout.as_millis() as u64,
                "Regex evaluation timed out"
            );
            MatchOutcome::TimedOut
        }
        Err(RecvTimeoutError::Disconnected) => MatchOutcome::NoMatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_compile_rejects_invalid_pattern() {
        assert!(compile("[unclosed(", false).is_err());
    }

    #[test]
    fn test_ignore_case() {
        let regex = Arc::new(compile("^IMG_\\d+", true).expect("Pattern should compile"));
        assert_eq!(
            match_with_timeout(&regex, "img_0042.jpg", DEFAULT_REGEX_TIMEOUT),
            MatchOutcome::Matched
        );
    }

    #[test]
    fn test_pathological_pattern_returns_within_bound() {
        let regex = Arc::new(compile("(a+)+b", false).expect("Pattern should compile"));
        let haystack = "a".repeat(64);

        let started = Instant::now();
        let outcome = match_with_timeout(&regex, &haystack, DEFAULT_REGEX_TIMEOUT);

        assert!(!outcome.is_match());
        assert!(started.elapsed() < DEFAULT_REGEX_TIMEOUT + Duration::from_millis(500));
    }
}
