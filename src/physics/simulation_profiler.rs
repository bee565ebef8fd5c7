#[cfg(feature = "profile")]
use std::collections::HashMap;
#[cfg(feature = "profile")]
use std::time::Instant;

/// Stage names recorded by an evolution.
pub mod stages {
    pub const CREATE_BODIES: &str = "create_bodies";
    pub const FORCES: &str = "forces";
    pub const BROAD_PHASE: &str = "broad_phase";
    pub const NARROW_PHASE: &str = "narrow_phase";
    pub const CONTACT_GRAPH: &str = "contact_graph";
    pub const APPLY: &str = "apply";
    pub const PUSH_OUT: &str = "push_out";
    pub const SLEEP: &str = "sleep";
    pub const EVENTS: &str = "events";
}

/// Stores profiling information for the previous `advance_by`.
///
/// Profiling is only active when the `profile` feature is enabled. When inactive, all methods are no-ops.
#[derive(Debug, Default)]
pub struct SimulationProfiler {
    #[cfg(feature = "profile")]
    stages: HashMap<&'static str, f64>,
    #[cfg(feature = "profile")]
    start_timestamps: HashMap<&'static str, Instant>,
}

impl SimulationProfiler {
    pub fn new(_initial_stage_count: usize) -> Self {
        Self {
            #[cfg(feature = "profile")]
            stages: HashMap::with_capacity(_initial_stage_count),
            #[cfg(feature = "profile")]
            start_timestamps: HashMap::with_capacity(_initial_stage_count),
        }
    }

    /// Seconds spent in the given stage during the last frame, or -1 if it did not run.
    pub fn get(&self, _stage: &'static str) -> f64 {
        #[cfg(feature = "profile")]
        {
            if let Some(&time) = self.stages.get(_stage) {
                return time;
            }
        }
        -1.0
    }

    pub fn start(&mut self, _stage: &'static str) {
        #[cfg(feature = "profile")]
        {
            debug_assert!(
                !self.start_timestamps.contains_key(_stage),
                "Cannot start a stage that has already been started."
            );
            self.start_timestamps.insert(_stage, Instant::now());
        }
    }

    /// Ends timing a stage and accumulates the elapsed time. Ending a stage that never started is ignored.
    pub fn end(&mut self, _stage: &'static str) {
        #[cfg(feature = "profile")]
        {
            let Some(start_time) = self.start_timestamps.remove(_stage) else {
                debug_assert!(false, "To end a stage, it must currently be active.");
                return;
            };
            let elapsed = start_time.elapsed().as_secs_f64();
            *self.stages.entry(_stage).or_insert(0.0) += elapsed;
        }
    }

    /// Runs `body` as the given stage.
    #[inline]
    pub fn time<R>(&mut self, stage: &'static str, body: impl FnOnce() -> R) -> R {
        self.start(stage);
        let result = body();
        self.end(stage);
        result
    }

    pub fn clear(&mut self) {
        #[cfg(feature = "profile")]
        {
            debug_assert!(
                self.start_timestamps.is_empty(),
                "It's likely that some stage was left unended from the previous frame."
            );
            self.stages.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_stage_reports_negative() {
        let profiler = SimulationProfiler::new(4);
        assert_eq!(profiler.get(stages::APPLY), -1.0);
    }

    #[cfg(feature = "profile")]
    #[test]
    fn timed_stage_is_recorded() {
        let mut profiler = SimulationProfiler::new(4);
        profiler.time(stages::APPLY, || std::thread::sleep(std::time::Duration::from_millis(1)));
        assert!(profiler.get(stages::APPLY) > 0.0);
        profiler.clear();
        assert_eq!(profiler.get(stages::APPLY), -1.0);
    }
}
