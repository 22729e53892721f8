//! PID controllers for the motion planner.
//!
//! One longitudinal controller on the velocity error and one lateral
//! controller on the deviation signal, sharing a per-vehicle state
//! entry. Throttle and brake are mutually exclusive by construction.

use std::time::Instant;

use contracts::PidGains;

/// Controller memory for one vehicle.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateEntry {
    pub time: Option<Instant>,
    pub velocity_error: f32,
    pub deviation: f32,
    pub velocity_integral: f32,
    pub deviation_integral: f32,
}

impl StateEntry {
    /// Integrate the new errors on top of `previous`.
    pub fn advance(previous: &StateEntry, velocity_error: f32, deviation: f32, now: Instant, fallback_dt: f32) -> (StateEntry, f32) {
        let dt = previous
            .time
            .map(|t| now.duration_since(t).as_secs_f32())
            .unwrap_or(fallback_dt)
            .max(1e-3);

        let entry = StateEntry {
            time: Some(now),
            velocity_error,
            deviation,
            velocity_integral: previous.velocity_integral + velocity_error * dt,
            deviation_integral: previous.deviation_integral + deviation * dt,
        };
        (entry, dt)
    }

    /// Cleared integrators, keeping the clock; applied on hazard stops
    /// so the controller resumes without wind-up.
    pub fn reset(now: Instant) -> StateEntry {
        StateEntry {
            time: Some(now),
            ..Default::default()
        }
    }
}

/// Output of one controller step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ActuationSignal {
    pub throttle: f32,
    pub brake: f32,
    pub steer: f32,
}

/// Run both controllers over the current and previous state.
pub fn run_step(
    current: &StateEntry,
    previous: &StateEntry,
    dt: f32,
    longitudinal: &PidGains,
    lateral: &PidGains,
) -> ActuationSignal {
    let [kp_l, ki_l, kd_l] = *longitudinal;
    let longitudinal_term = kp_l * current.velocity_error
        + ki_l * current.velocity_integral
        + kd_l * (current.velocity_error - previous.velocity_error) / dt;

    let (throttle, brake) = if longitudinal_term >= 0.0 {
        (longitudinal_term.min(1.0), 0.0)
    } else {
        (0.0, (-longitudinal_term).min(1.0))
    };

    let [kp_s, ki_s, kd_s] = *lateral;
    let steer = (kp_s * current.deviation
        + ki_s * current.deviation_integral
        + kd_s * (current.deviation - previous.deviation) / dt)
        .clamp(-1.0, 1.0);

    ActuationSignal {
        throttle,
        brake,
        steer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LONGITUDINAL: PidGains = [0.1, 0.15, 0.01];
    const LATERAL: PidGains = [10.0, 0.0, 0.1];

    #[test]
    fn test_below_target_throttles() {
        let previous = StateEntry::default();
        let (current, dt) =
            StateEntry::advance(&previous, 5.0, 0.0, Instant::now(), 0.05);
        let signal = run_step(&current, &previous, dt, &LONGITUDINAL, &LATERAL);
        assert!(signal.throttle > 0.0);
        assert_eq!(signal.brake, 0.0);
        assert_eq!(signal.steer, 0.0);
    }

    #[test]
    fn test_above_target_brakes() {
        let previous = StateEntry::default();
        let (current, dt) =
            StateEntry::advance(&previous, -5.0, 0.0, Instant::now(), 0.05);
        let signal = run_step(&current, &previous, dt, &LONGITUDINAL, &LATERAL);
        assert_eq!(signal.throttle, 0.0);
        assert!(signal.brake > 0.0);
    }

    #[test]
    fn test_never_both_throttle_and_brake() {
        let mut previous = StateEntry::default();
        for error in [-10.0, -0.1, 0.0, 0.1, 10.0] {
            let (current, dt) =
                StateEntry::advance(&previous, error, 0.0, Instant::now(), 0.05);
            let signal = run_step(&current, &previous, dt, &LONGITUDINAL, &LATERAL);
            assert!(signal.throttle == 0.0 || signal.brake == 0.0);
            previous = current;
        }
    }

    #[test]
    fn test_steer_follows_deviation_sign() {
        let previous = StateEntry::default();
        let (current, dt) =
            StateEntry::advance(&previous, 0.0, 0.02, Instant::now(), 0.05);
        let signal = run_step(&current, &previous, dt, &LONGITUDINAL, &LATERAL);
        assert!(signal.steer > 0.0);
        assert!(signal.steer <= 1.0);

        let (current, dt) =
            StateEntry::advance(&previous, 0.0, -0.02, Instant::now(), 0.05);
        let signal = run_step(&current, &previous, dt, &LONGITUDINAL, &LATERAL);
        assert!(signal.steer < 0.0);
    }

    #[test]
    fn test_reset_clears_integrals() {
        let previous = StateEntry {
            velocity_integral: 3.0,
            deviation_integral: 1.0,
            ..Default::default()
        };
        let reset = StateEntry::reset(Instant::now());
        assert_eq!(reset.velocity_integral, 0.0);
        assert_eq!(reset.deviation_integral, 0.0);
        assert!(reset.time.is_some());
        let _ = previous;
    }
}
