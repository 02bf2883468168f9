// THEORY:
// The `state_estimator` turns a confirmed cluster's jittery consensus position
// into a stable trajectory. It is a simplified, single-pass Kalman-style filter
// over the state `[x, y, vx, vy]` under a constant-velocity motion model, with
// unmodeled acceleration treated as process noise.
//
// The uncertainty is kept as the diagonal of the covariance only. Correlation
// between position and velocity is not modeled, which keeps `predict` and
// `update` O(1) per axis. Velocity is not measured either: it is an exponential
// moving average of the innovation, which stands in for the per-step
// displacement.

/// Smoothed kinematic state of one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EstimatorState {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
}

/// Weight of the previous velocity in the velocity moving average.
const VELOCITY_MEMORY: f64 = 0.8;

/// Per-cluster smoothing filter. Inert until the first `update`.
#[derive(Debug, Clone)]
pub struct StateEstimator {
    state: EstimatorState,
    /// Diagonal of the covariance, ordered `[x, y, vx, vy]`.
    uncertainty: [f64; 4],
    process_noise: f64,
    measurement_noise: f64,
    initialized: bool,
}

impl StateEstimator {
    pub fn new(process_noise: f64, measurement_noise: f64) -> Self {
        Self {
            state: EstimatorState::default(),
            uncertainty: [0.0; 4],
            process_noise,
            measurement_noise,
            initialized: false,
        }
    }

    /// Advances the state by `dt` under constant velocity and inflates every
    /// diagonal term by the process noise. No-op before the first update.
    pub fn predict(&mut self, dt: f64) {
        if !self.initialized {
            return;
        }
        self.state.x += self.state.vx * dt;
        self.state.y += self.state.vy * dt;
        for term in &mut self.uncertainty {
            *term += self.process_noise;
        }
    }

    /// Corrects the state with a measured position.
    pub fn update(&mut self, measured_x: f64, measured_y: f64) {
        if !self.initialized {
            self.initialize(measured_x, measured_y);
            return;
        }

        let innovation_x = measured_x - self.state.x;
        let innovation_y = measured_y - self.state.y;

        let gain_x = self.uncertainty[0] / (self.uncertainty[0] + self.measurement_noise);
        let gain_y = self.uncertainty[1] / (self.uncertainty[1] + self.measurement_noise);

        self.state.x += gain_x * innovation_x;
        self.state.y += gain_y * innovation_y;

        self.state.vx = VELOCITY_MEMORY * self.state.vx + (1.0 - VELOCITY_MEMORY) * innovation_x;
        self.state.vy = VELOCITY_MEMORY * self.state.vy + (1.0 - VELOCITY_MEMORY) * innovation_y;

        self.uncertainty[0] *= 1.0 - gain_x;
        self.uncertainty[1] *= 1.0 - gain_y;
    }

    fn initialize(&mut self, x: f64, y: f64) {
        self.state = EstimatorState { x, y, vx: 0.0, vy: 0.0 };
        self.uncertainty = [1.0; 4];
        self.initialized = true;
    }

    pub fn state(&self) -> EstimatorState {
        self.state
    }

    /// Root of the summed positional variances. For display only.
    pub fn uncertainty(&self) -> f64 {
        (self.uncertainty[0] + self.uncertainty[1]).sqrt()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predict_before_first_update_is_a_no_op() {
        let mut estimator = StateEstimator::new(0.1, 1.0);
        estimator.predict(0.1);
        assert!(!estimator.is_initialized());
        assert_eq!(estimator.state(), EstimatorState::default());
        assert_eq!(estimator.uncertainty(), 0.0);
    }

    #[test]
    fn first_update_seeds_state_from_measurement() {
        let mut estimator = StateEstimator::new(0.1, 1.0);
        estimator.update(11.0, 10.5);
        let state = estimator.state();
        assert_eq!((state.x, state.y, state.vx, state.vy), (11.0, 10.5, 0.0, 0.0));
        assert!((estimator.uncertainty() - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn update_moves_part_way_toward_the_measurement() {
        let mut estimator = StateEstimator::new(0.1, 1.0);
        estimator.update(0.0, 0.0);
        estimator.predict(0.1);
        estimator.update(10.0, 0.0);

        // gain = 1.1 / 2.1
        let gain = 1.1 / 2.1;
        let state = estimator.state();
        assert!((state.x - 10.0 * gain).abs() < 1e-9);
        assert!((state.vx - 2.0).abs() < 1e-9);
        assert_eq!(state.y, 0.0);
    }

    #[test]
    fn repeated_identical_measurements_converge_and_velocity_decays() {
        let mut estimator = StateEstimator::new(0.1, 1.0);
        estimator.update(0.0, 0.0);
        for _ in 0..300 {
            estimator.predict(0.1);
            estimator.update(40.0, -20.0);
        }
        let state = estimator.state();
        assert!((state.x - 40.0).abs() < 1e-3, "x = {}", state.x);
        assert!((state.y + 20.0).abs() < 1e-3, "y = {}", state.y);
        assert!(state.vx.abs() < 1e-3, "vx = {}", state.vx);
        assert!(state.vy.abs() < 1e-3, "vy = {}", state.vy);
    }

    #[test]
    fn steady_measurements_shrink_positional_uncertainty() {
        let mut estimator = StateEstimator::new(0.1, 1.0);
        estimator.update(5.0, 5.0);
        let initial = estimator.uncertainty();
        for _ in 0..20 {
            estimator.predict(0.1);
            estimator.update(5.0, 5.0);
        }
        assert!(estimator.uncertainty() < initial);
    }
}
