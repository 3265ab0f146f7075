use crate::detection::FilteredDetectionSet;
use crate::episode::state::{CommitRequest, EpisodeState};
use crate::prelude::DwellConfig;
use crate::telemetry::log::LogManager;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// First hold-off after a permanent sink failure; doubles per failed attempt.
const PERMANENT_RETRY_BASE_MS: i64 = 1_000;
const PERMANENT_RETRY_MAX_MS: i64 = 60_000;

/// Per-label presence debouncer.
///
/// The tracker only emits requests; a label stays `Rising` until the caller
/// reports a durable write through [`EpisodeTracker::acknowledge`]. While a
/// request is outstanding the label is marked pending and emits nothing
/// further. A failed write clears the mark, so the next present frame
/// re-emits, unless a permanent failure set a hold-off.
pub struct EpisodeTracker {
    states: BTreeMap<String, EpisodeState>,
    debounce_ms: i64,
    logger: LogManager,
}

impl EpisodeTracker {
    pub fn new(config: &DwellConfig) -> Self {
        let states = config
            .tracked_labels
            .iter()
            .map(|label| (label.clone(), EpisodeState::Idle))
            .collect();
        Self {
            states,
            debounce_ms: i64::try_from(config.debounce_ms).unwrap_or(i64::MAX),
            logger: LogManager::new("tracker"),
        }
    }

    /// Applies one frame to every tracked label and returns the commits due.
    pub fn observe(
        &mut self,
        detections: &FilteredDetectionSet,
        now: DateTime<Utc>,
    ) -> Vec<CommitRequest> {
        let mut due = Vec::new();
        for (label, state) in self.states.iter_mut() {
            let present = detections.contains(label);
            let (next, commit_due) = transition(*state, present, now, self.debounce_ms);
            if next != *state {
                self.logger
                    .debug(&format!("{} {:?} -> {:?}", label, state, next));
            }
            *state = next;
            if commit_due {
                if let Some(since) = next.presence_start_time() {
                    due.push(CommitRequest::new(label.clone(), since, now));
                }
            }
        }
        due
    }

    /// Marks the request's run as durably recorded. Outcomes for a run that
    /// already ended are ignored.
    pub fn acknowledge(&mut self, request: &CommitRequest, committed_at: DateTime<Utc>) {
        let Some(state) = self.states.get_mut(&request.label) else {
            self.logger.warn(&format!(
                "acknowledgement for untracked label {}",
                request.label
            ));
            return;
        };
        match *state {
            EpisodeState::Rising {
                since, attempts, ..
            } if since == request.episode_start => {
                self.logger.record(&format!(
                    "{} episode recorded after {} failed attempt(s)",
                    request.label, attempts
                ));
                *state = EpisodeState::Committed {
                    since,
                    committed_at,
                };
            }
            other => self.logger.record(&format!(
                "{} recorded for a run that ended (now {:?})",
                request.label, other
            )),
        }
    }

    /// Records a failed write. The run stays eligible for another attempt;
    /// a permanent failure holds it off with exponential back-off.
    pub fn reject(&mut self, request: &CommitRequest, transient: bool, now: DateTime<Utc>) {
        let Some(EpisodeState::Rising {
            since,
            attempts,
            pending,
            retry_at,
        }) = self.states.get_mut(&request.label)
        else {
            return;
        };
        if *since != request.episode_start {
            return;
        }
        *attempts = attempts.saturating_add(1);
        *pending = false;
        *retry_at = if transient {
            None
        } else {
            Some(now + Duration::milliseconds(permanent_backoff_ms(*attempts)))
        };

        let message = format!(
            "{} commit failed ({}, {} attempt(s)), retrying while present",
            request.label,
            if transient { "transient" } else { "permanent" },
            attempts
        );
        if *attempts == 1 {
            self.logger.warn(&message);
        } else {
            self.logger.debug(&message);
        }
    }

    pub fn state(&self, label: &str) -> Option<EpisodeState> {
        self.states.get(label).copied()
    }

    pub fn snapshot(&self) -> Vec<(String, EpisodeState)> {
        self.states
            .iter()
            .map(|(label, state)| (label.clone(), *state))
            .collect()
    }

    pub fn tracked_labels(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }
}

fn permanent_backoff_ms(attempts: u32) -> i64 {
    let doublings = attempts.saturating_sub(1).min(16);
    PERMANENT_RETRY_BASE_MS
        .saturating_mul(1_i64 << doublings)
        .min(PERMANENT_RETRY_MAX_MS)
}

fn transition(
    state: EpisodeState,
    present: bool,
    now: DateTime<Utc>,
    debounce_ms: i64,
) -> (EpisodeState, bool) {
    match (state, present) {
        (EpisodeState::Idle, false) => (EpisodeState::Idle, false),
        (EpisodeState::Idle, true) => (EpisodeState::rising(now), false),
        (EpisodeState::Rising { .. }, false) => (EpisodeState::Idle, false),
        (
            EpisodeState::Rising {
                since,
                attempts,
                pending,
                retry_at,
            },
            true,
        ) => {
            let elapsed = now.signed_duration_since(since).num_milliseconds();
            let held_off = retry_at.is_some_and(|at| now < at);
            if elapsed > debounce_ms && !pending && !held_off {
                let next = EpisodeState::Rising {
                    since,
                    attempts,
                    pending: true,
                    retry_at: None,
                };
                (next, true)
            } else {
                (state, false)
            }
        }
        (EpisodeState::Committed { .. }, true) => (state, false),
        (EpisodeState::Committed { .. }, false) => (EpisodeState::Idle, false),
    }
}
