//! Per-stage elapsed times for one query.
//!
//! [`StageTimings`] is built by folding `(label, duration)` pairs: each
//! [`record`](StageTimings::record) consumes the value and returns a new
//! one, so a stage can only contribute its own entry. Labels keep the
//! order they were recorded in and serialize as a map of seconds.

use std::time::Duration;

use serde::ser::{Serialize, SerializeMap, Serializer};

pub const SCOPE_CHECK: &str = "scope_check";
pub const CONTEXT_RETRIEVAL: &str = "context_retrieval";
pub const ANSWER_GENERATION: &str = "answer_generation";
pub const OUT_OF_SCOPE_HANDLING: &str = "out_of_scope_handling";
pub const TOTAL: &str = "total";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageTimings {
    stages: Vec<(&'static str, Duration)>,
}

impl StageTimings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return these timings extended with one stage.
    #[must_use]
    pub fn record(mut self, label: &'static str, elapsed: Duration) -> Self {
        self.stages.push((label, elapsed));
        self
    }

    pub fn get(&self, label: &str) -> Option<Duration> {
        self.stages
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, d)| *d)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.get(label).is_some()
    }

    pub fn labels(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.stages.iter().map(|(l, _)| *l)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Duration)> + '_ {
        self.stages.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl FromIterator<(&'static str, Duration)> for StageTimings {
    fn from_iter<I: IntoIterator<Item = (&'static str, Duration)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(StageTimings::new(), |t, (label, d)| t.record(label, d))
    }
}

impl Serialize for StageTimings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.stages.len()))?;
        for (label, d) in &self.stages {
            map.serialize_entry(label, &d.as_secs_f64())?;
        }
        map.end()
    }
}
