//! Struggle signal detection.
//!
//! The `StruggleDetector` keeps per-session counters for five independent
//! signals and reports a [`StrugglePattern`] when one crosses its threshold.
//!
//! | Signal           | Counts                       | Triggers at            | Resets |
//! |------------------|------------------------------|------------------------|--------|
//! | quiz failure     | every failed attempt         | attempt >= 2           | no     |
//! | excessive pauses | pauses < 30s apart           | 3 in a burst           | yes    |
//! | coach activation | every coach invocation       | 2 activations          | no     |
//! | video skipping   | forward skips > 30s          | every qualifying skip  | n/a    |
//! | help requests    | every explicit request       | 3 requests             | no     |
//!
//! Counters that do not reset keep triggering on every further signal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StruggleConfig;
use crate::types::{Severity, StrugglePattern, StruggleType};

/// A raw signal fed to the detector.
#[derive(Debug, Clone, PartialEq)]
pub enum StruggleSignal {
    /// A failed quiz attempt. `attempt` defaults to the running failure count.
    QuizFailure {
        topic: Option<String>,
        attempt: Option<u32>,
    },
    Pause {
        topic: Option<String>,
    },
    CoachActivation {
        topic: Option<String>,
    },
    /// A seek within the video, in seconds.
    Skip {
        from_seconds: f64,
        to_seconds: f64,
        topic: Option<String>,
    },
    HelpRequest {
        topic: Option<String>,
    },
}

impl StruggleSignal {
    pub fn struggle_type(&self) -> StruggleType {
        match self {
            Self::QuizFailure { .. } => StruggleType::QuizFailure,
            Self::Pause { .. } => StruggleType::ExcessivePauses,
            Self::CoachActivation { .. } => StruggleType::CoachActivation,
            Self::Skip { .. } => StruggleType::VideoSkipping,
            Self::HelpRequest { .. } => StruggleType::HelpRequests,
        }
    }

    pub fn topic(&self) -> Option<&str> {
        match self {
            Self::QuizFailure { topic, .. }
            | Self::Pause { topic }
            | Self::CoachActivation { topic }
            | Self::Skip { topic, .. }
            | Self::HelpRequest { topic } => topic.as_deref(),
        }
    }
}

/// Per-session counters. In memory only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StruggleCounters {
    pub quiz_failures: u32,
    pub pause_count: u32,
    pub last_pause_time: Option<DateTime<Utc>>,
    pub coach_activations: u32,
    pub help_requests: u32,
    pub skipping_events: u32,
}

/// What the detector made of one signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub struggle_type: StruggleType,
    pub topic: Option<String>,
    /// Counter value after the signal, or the skip distance for skips.
    pub value: f64,
    /// Set when the signal crossed its threshold.
    pub pattern: Option<StrugglePattern>,
}

/// Detects struggle patterns from raw learner signals.
#[derive(Debug, Clone)]
pub struct StruggleDetector {
    config: StruggleConfig,
    counters: StruggleCounters,
}

impl StruggleDetector {
    pub fn new(config: StruggleConfig) -> Self {
        Self {
            config,
            counters: StruggleCounters::default(),
        }
    }

    pub fn counters(&self) -> &StruggleCounters {
        &self.counters
    }

    /// Feed one signal.
    ///
    /// Returns `None` for signals that are not struggle observations at all
    /// (a backward seek, for example).
    pub fn observe(&mut self, signal: StruggleSignal, now: DateTime<Utc>) -> Option<Observation> {
        let struggle_type = signal.struggle_type();
        let topic = signal.topic().map(str::to_string);

        let (value, severity) = match signal {
            StruggleSignal::QuizFailure { attempt, .. } => {
                self.counters.quiz_failures += 1;
                let attempt = attempt.unwrap_or(self.counters.quiz_failures);
                let severity = if attempt >= self.config.quiz_failure_high_attempts {
                    Severity::High
                } else {
                    Severity::Medium
                };
                let triggered = attempt >= self.config.quiz_failure_attempts;
                (f64::from(attempt), triggered.then_some(severity))
            }
            StruggleSignal::Pause { .. } => {
                let in_burst = self.counters.last_pause_time.is_some_and(|last| {
                    ((now - last).num_milliseconds() as f64) / 1000.0
                        < self.config.pause_window_seconds
                });
                self.counters.pause_count = if in_burst {
                    self.counters.pause_count + 1
                } else {
                    1
                };
                self.counters.last_pause_time = Some(now);

                let count = self.counters.pause_count;
                let triggered = count >= self.config.pause_threshold;
                if triggered {
                    self.counters.pause_count = 0;
                }
                (f64::from(count), triggered.then_some(Severity::Medium))
            }
            StruggleSignal::CoachActivation { .. } => {
                self.counters.coach_activations += 1;
                let count = self.counters.coach_activations;
                let triggered = count >= self.config.coach_activation_threshold;
                (f64::from(count), triggered.then_some(Severity::Medium))
            }
            StruggleSignal::Skip {
                from_seconds,
                to_seconds,
                ..
            } => {
                let distance = to_seconds - from_seconds;
                if !distance.is_finite() || distance <= 0.0 {
                    return None;
                }
                let triggered = distance > self.config.skip_min_seconds;
                if triggered {
                    self.counters.skipping_events += 1;
                }
                let severity = if distance > self.config.skip_high_seconds {
                    Severity::High
                } else {
                    Severity::Medium
                };
                (distance, triggered.then_some(severity))
            }
            StruggleSignal::HelpRequest { .. } => {
                self.counters.help_requests += 1;
                let count = self.counters.help_requests;
                let triggered = count >= self.config.help_request_threshold;
                (f64::from(count), triggered.then_some(Severity::High))
            }
        };

        let pattern = severity.map(|severity| StrugglePattern {
            struggle_type,
            severity,
            topic: topic.clone(),
            observed: value,
            detected_at: now,
        });
        if let Some(p) = &pattern {
            debug!(struggle_type = ?p.struggle_type, severity = ?p.severity, value, "Struggle detected");
        }

        Some(Observation {
            struggle_type,
            topic,
            value,
            pattern,
        })
    }
}

impl Default for StruggleDetector {
    fn default() -> Self {
        Self::new(StruggleConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(secs)
    }

    fn pause() -> StruggleSignal {
        StruggleSignal::Pause {
            topic: Some("ladders".into()),
        }
    }

    fn triggered(obs: Option<Observation>) -> Option<StrugglePattern> {
        obs.and_then(|o| o.pattern)
    }

    #[test]
    fn three_pauses_in_burst_trigger_once_and_reset() {
        let mut detector = StruggleDetector::default();

        assert!(triggered(detector.observe(pause(), t(0))).is_none());
        assert!(triggered(detector.observe(pause(), t(10))).is_none());
        let pattern = triggered(detector.observe(pause(), t(25))).unwrap();

        assert_eq!(pattern.struggle_type, StruggleType::ExcessivePauses);
        assert_eq!(pattern.severity, Severity::Medium);
        assert_eq!(pattern.topic.as_deref(), Some("ladders"));
        assert_eq!(detector.counters().pause_count, 0);

        // An isolated fourth pause starts a fresh burst
        assert!(triggered(detector.observe(pause(), t(120))).is_none());
        assert_eq!(detector.counters().pause_count, 1);
    }

    #[test]
    fn spaced_pauses_never_trigger() {
        let mut detector = StruggleDetector::default();
        for i in 0..10 {
            assert!(triggered(detector.observe(pause(), t(i * 31))).is_none());
        }
        assert_eq!(detector.counters().pause_count, 1);
    }

    #[test]
    fn quiz_failure_severity_follows_attempt() {
        let mut detector = StruggleDetector::default();
        let fail = |attempt| StruggleSignal::QuizFailure {
            topic: None,
            attempt: Some(attempt),
        };

        assert!(triggered(detector.observe(fail(1), t(0))).is_none());
        assert_eq!(
            triggered(detector.observe(fail(2), t(1))).unwrap().severity,
            Severity::Medium
        );
        assert_eq!(
            triggered(detector.observe(fail(3), t(2))).unwrap().severity,
            Severity::High
        );
        assert_eq!(detector.counters().quiz_failures, 3);
    }

    #[test]
    fn quiz_failure_without_attempt_uses_running_count() {
        let mut detector = StruggleDetector::default();
        let fail = || StruggleSignal::QuizFailure {
            topic: Some("lockout".into()),
            attempt: None,
        };
        assert!(triggered(detector.observe(fail(), t(0))).is_none());
        assert!(triggered(detector.observe(fail(), t(1))).is_some());
        // No reset: keeps triggering
        assert!(triggered(detector.observe(fail(), t(2))).is_some());
    }

    #[test]
    fn long_forward_skip_triggers_high_immediately() {
        let mut detector = StruggleDetector::default();
        let skip = StruggleSignal::Skip {
            from_seconds: 10.0,
            to_seconds: 160.0,
            topic: None,
        };
        let pattern = triggered(detector.observe(skip, t(0))).unwrap();
        assert_eq!(pattern.struggle_type, StruggleType::VideoSkipping);
        assert_eq!(pattern.severity, Severity::High);
        assert_eq!(pattern.observed, 150.0);
        assert_eq!(detector.counters().skipping_events, 1);
    }

    #[test]
    fn short_and_backward_skips() {
        let mut detector = StruggleDetector::default();
        let short = StruggleSignal::Skip {
            from_seconds: 10.0,
            to_seconds: 40.0,
            topic: None,
        };
        let obs = detector.observe(short, t(0)).unwrap();
        assert!(obs.pattern.is_none());

        let medium = StruggleSignal::Skip {
            from_seconds: 10.0,
            to_seconds: 60.0,
            topic: None,
        };
        assert_eq!(
            triggered(detector.observe(medium, t(1))).unwrap().severity,
            Severity::Medium
        );

        let backward = StruggleSignal::Skip {
            from_seconds: 60.0,
            to_seconds: 10.0,
            topic: None,
        };
        assert!(detector.observe(backward, t(2)).is_none());
    }

    #[test]
    fn coach_and_help_thresholds() {
        let mut detector = StruggleDetector::default();
        let coach = || StruggleSignal::CoachActivation { topic: None };
        let help = || StruggleSignal::HelpRequest { topic: None };

        assert!(triggered(detector.observe(coach(), t(0))).is_none());
        assert!(triggered(detector.observe(coach(), t(1))).is_some());

        assert!(triggered(detector.observe(help(), t(2))).is_none());
        assert!(triggered(detector.observe(help(), t(3))).is_none());
        let pattern = triggered(detector.observe(help(), t(4))).unwrap();
        assert_eq!(pattern.severity, Severity::High);
        assert_eq!(detector.counters().help_requests, 3);
    }
}
