use crate::physics::particles::ParticleSet;

/// Sub-steps shorter than this are dropped rather than simulated.
const MINIMUM_SUBSTEP: f32 = 1.0e-6;

/// Callback run at a fixed point of the frame. Receives the frame or sub-step length.
pub type TimestepperStageHandler = Box<dyn FnMut(f32, &mut ParticleSet) + Send>;

/// Points of a frame where user code can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimestepperStage {
    /// Before the first sub-step, after the proxies' start-of-frame hooks.
    FrameStarted,
    /// After forces were integrated into velocities, before prediction.
    ForcesApplied,
    /// After contacts were generated and the contact graph built, before the velocity solve.
    CollisionsDetected,
    /// After the position solve, before velocities are derived and poses committed.
    ConstraintsSolved,
    /// After the last sub-step.
    FrameEnded,
}

/// Splits frames into sub-steps and runs stage handlers in registration order.
#[derive(Default)]
pub struct Timestepper {
    handlers: Vec<(TimestepperStage, TimestepperStageHandler)>,
}

impl std::fmt::Debug for Timestepper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timestepper")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl Timestepper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&mut self, stage: TimestepperStage, handler: TimestepperStageHandler) {
        self.handlers.push((stage, handler));
    }

    pub fn handler_count(&self, stage: TimestepperStage) -> usize {
        self.handlers.iter().filter(|(s, _)| *s == stage).count()
    }

    pub(crate) fn invoke(&mut self, stage: TimestepperStage, dt: f32, particles: &mut ParticleSet) {
        for (handler_stage, handler) in self.handlers.iter_mut() {
            if *handler_stage == stage {
                handler(dt, particles);
            }
        }
    }

    /// Splits `dt` into full `max_step` sub-steps followed by the remainder.
    pub fn substeps(mut dt: f32, max_step: f32) -> Vec<f32> {
        let mut steps = Vec::new();
        if !(dt.is_finite() && max_step.is_finite() && max_step > 0.0) {
            return steps;
        }
        while dt > max_step + MINIMUM_SUBSTEP {
            steps.push(max_step);
            dt -= max_step;
        }
        if dt > MINIMUM_SUBSTEP {
            steps.push(dt);
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_split_into_bounded_substeps() {
        let steps = Timestepper::substeps(0.1, 1.0 / 30.0);
        assert_eq!(steps.len(), 3);
        assert!(steps.iter().all(|&step| step <= 1.0 / 30.0 + 1e-6));
        assert!((steps.iter().sum::<f32>() - 0.1).abs() < 1e-6);

        let steps = Timestepper::substeps(0.05, 1.0 / 30.0);
        assert_eq!(steps.len(), 2);
        assert!((steps[1] - (0.05 - 1.0 / 30.0)).abs() < 1e-6);

        assert_eq!(Timestepper::substeps(0.01, 1.0 / 30.0), vec![0.01]);
        assert!(Timestepper::substeps(0.0, 1.0 / 30.0).is_empty());
        assert!(Timestepper::substeps(-1.0, 1.0 / 30.0).is_empty());
    }

    #[test]
    fn handlers_run_for_their_stage_only() {
        let mut timestepper = Timestepper::new();
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = counter.clone();
        timestepper.add_handler(
            TimestepperStage::FrameEnded,
            Box::new(move |_, _| {
                seen.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }),
        );
        let mut particles = ParticleSet::new();
        timestepper.invoke(TimestepperStage::FrameStarted, 0.1, &mut particles);
        timestepper.invoke(TimestepperStage::FrameEnded, 0.1, &mut particles);
        assert_eq!(counter.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(timestepper.handler_count(TimestepperStage::FrameEnded), 1);
    }
}
