//! Closed-form constant-jerk maneuvers used to plan coast and brake windows.

use crate::imports::*;

/// Tolerance on the speed/distance consistency condition of a single-step maneuver
const SINGLE_STEP_TOL: f64 = 1e-9;

/// A constant-jerk maneuver anchored at sample 0.
/// Step `i` runs from sample `i` to sample `i + 1` at acceleration `accel_at(i)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// distance at sample 0 \[m\]
    pub d0_m: f64,
    /// speed at sample 0 \[m/s\]
    pub v0_m_per_s: f64,
    /// acceleration over the first step \[m/s^2\]
    pub accel0_m_per_s2: f64,
    /// change in acceleration per unit time \[m/s^3\]
    pub jerk_m_per_s3: f64,
    /// step duration \[s\]
    pub dt_s: f64,
}

impl Trajectory {
    /// Acceleration over step `n`
    pub fn accel_at(&self, n: usize) -> f64 {
        accel_for_constant_jerk(n, self.accel0_m_per_s2, self.jerk_m_per_s3, self.dt_s)
    }

    /// Speed at sample `n`
    pub fn speed_at(&self, n: usize) -> f64 {
        speed_for_constant_jerk(
            n,
            self.v0_m_per_s,
            self.accel0_m_per_s2,
            self.jerk_m_per_s3,
            self.dt_s,
        )
    }

    /// Distance at sample `n`
    pub fn dist_at(&self, n: usize) -> f64 {
        dist_for_constant_jerk(
            n,
            self.d0_m,
            self.v0_m_per_s,
            self.accel0_m_per_s2,
            self.jerk_m_per_s3,
            self.dt_s,
        )
    }

    /// Accelerations over the first `n` steps
    pub fn accels(&self, n: usize) -> Array1<f64> {
        accel_array_for_constant_jerk(n, self.accel0_m_per_s2, self.jerk_m_per_s3, self.dt_s)
    }

    /// True if over the first `n` steps the maneuver never speeds up and never
    /// drops below zero speed
    pub fn slows_to_rest(&self, n: usize) -> bool {
        let tol = 1e-9;
        (0..n).all(|k| self.accel_at(k) <= tol && self.speed_at(k + 1) >= -tol)
    }
}

/// Calculate the (accel0, jerk) pair of a constant-jerk maneuver that starts at
/// distance `d0` and speed `v0` and reaches distance `dr` and speed `vr` after
/// `n` steps of duration `dt`.
///
/// # Arguments
///
/// * `n` - number of steps, at least 1
/// * `d0` - initial distance \[m\]
/// * `v0` - initial speed \[m/s\]
/// * `dr` - rendezvous distance \[m\], not less than `d0`
/// * `vr` - rendezvous speed \[m/s\]
/// * `dt` - step duration \[s\]
///
/// A single step has no freedom in jerk, so `n == 1` only succeeds when the
/// rendezvous is reachable at constant acceleration.
pub fn calc_constant_jerk_trajectory(
    n: usize,
    d0: f64,
    v0: f64,
    dr: f64,
    vr: f64,
    dt: f64,
) -> anyhow::Result<Trajectory> {
    ensure!(n >= 1, "step count must be at least 1, got {}", n);
    ensure!(dt > 0.0, "{}", format_dbg!(dt));
    ensure!(
        [d0, v0, dr, vr, dt].iter().all(|x| x.is_finite()),
        "non-finite trajectory input: {}, {}, {}, {}",
        format_dbg!(d0),
        format_dbg!(v0),
        format_dbg!(dr),
        format_dbg!(vr)
    );
    ensure!(
        dr >= d0,
        "rendezvous distance {} is behind starting distance {}",
        dr,
        d0
    );
    // distance and speed deficits in units where dt == 1
    let ddr = (dr - d0) / dt - (n as f64) * v0;
    let dvr = vr - v0;
    let (a0_dt, k_dt2) = if n == 1 {
        ensure!(
            (dvr - 2.0 * ddr).abs() <= SINGLE_STEP_TOL * (1.0 + dvr.abs()),
            "single-step maneuver cannot reach both {} and {}",
            format_dbg!(dr),
            format_dbg!(vr)
        );
        (dvr, 0.0)
    } else {
        let nf = n as f64;
        let k_dt2 = 6.0 * (nf * dvr - 2.0 * ddr) / (nf * (nf * nf - 1.0));
        let a0_dt = (dvr - k_dt2 * 0.5 * nf * (nf - 1.0)) / nf;
        (a0_dt, k_dt2)
    };
    Ok(Trajectory {
        d0_m: d0,
        v0_m_per_s: v0,
        accel0_m_per_s2: a0_dt / dt,
        jerk_m_per_s3: k_dt2 / (dt * dt),
        dt_s: dt,
    })
}

/// Calculate distance (m) after n timesteps
///
/// INPUTS:
/// - n: Int, number of timesteps away to calculate
/// - d0: Num, initial distance (m)
/// - v0: Num, initial speed (m/s)
/// - a0: Num, initial acceleration (m/s2)
/// - k: Num, constant jerk (m/s3)
/// - dt: Num, duration of a timestep (s)
///
/// NOTE:
/// - distance is integrated with the trapezoidal rule between samples
///
/// RETURN: Num, the distance at n timesteps away (m)
pub fn dist_for_constant_jerk(n: usize, d0: f64, v0: f64, a0: f64, k: f64, dt: f64) -> f64 {
    let n = n as f64;
    d0 + dt
        * (n * v0
            + 0.5 * a0 * dt * n * n
            + k * dt * dt * n * (n - 1.0) * (2.0 * n - 1.0) / 12.0)
}

/// Calculate speed (m/s) n timesteps away via a constant-jerk acceleration
///
/// NOTE:
/// - this is the speed at sample n
/// - if n == 0, speed is v0
/// - if n == 1, speed is v0 + a0*dt, etc.
pub fn speed_for_constant_jerk(n: usize, v0: f64, a0: f64, k: f64, dt: f64) -> f64 {
    let n = n as f64;
    v0 + n * a0 * dt + 0.5 * n * (n - 1.0) * k * dt * dt
}

/// Calculate the acceleration n timesteps away.
/// This is the constant acceleration over the time-step from sample n to sample n+1.
pub fn accel_for_constant_jerk(n: usize, a0: f64, k: f64, dt: f64) -> f64 {
    a0 + (n as f64) * k * dt
}

/// Apply `accel_for_constant_jerk` to steps `0..nmax`
pub fn accel_array_for_constant_jerk(nmax: usize, a0: f64, k: f64, dt: f64) -> Array1<f64> {
    (0..nmax)
        .map(|n| accel_for_constant_jerk(n, a0, k, dt))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trajectory_reaches_rendezvous() {
        let (n, d0, v0, dr, vr, dt) = (10, 0.0, 15.0, 120.0, 7.5, 1.0);
        let traj = calc_constant_jerk_trajectory(n, d0, v0, dr, vr, dt).unwrap();
        assert!((traj.speed_at(n) - vr).abs() < 1e-9);
        assert!((traj.dist_at(n) - dr).abs() < 1e-9);
        assert_eq!(traj.speed_at(0), v0);
        assert_eq!(traj.dist_at(0), d0);
    }

    #[test]
    fn test_closed_forms_agree_with_stepwise_sums() {
        let traj = Trajectory {
            d0_m: 3.0,
            v0_m_per_s: 12.0,
            accel0_m_per_s2: -0.4,
            jerk_m_per_s3: 0.05,
            dt_s: 0.5,
        };
        let mut v = traj.v0_m_per_s;
        let mut d = traj.d0_m;
        for i in 0..25 {
            let v_next = v + traj.accel_at(i) * traj.dt_s;
            d += 0.5 * (v + v_next) * traj.dt_s;
            v = v_next;
            assert!((traj.speed_at(i + 1) - v).abs() < 1e-9);
            assert!((traj.dist_at(i + 1) - d).abs() < 1e-9);
        }
    }

    #[test]
    fn test_non_unit_time_step() {
        let dt = 0.25;
        let traj = calc_constant_jerk_trajectory(40, 5.0, 18.0, 105.0, 4.0, dt).unwrap();
        assert!((traj.speed_at(40) - 4.0).abs() < 1e-9);
        assert!((traj.dist_at(40) - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_constant_deceleration_has_zero_jerk() {
        // 20 m/s to rest at -2 m/s^2 covers 100 m in 10 steps
        let traj = calc_constant_jerk_trajectory(10, 0.0, 20.0, 100.0, 0.0, 1.0).unwrap();
        assert!(traj.jerk_m_per_s3.abs() < 1e-12);
        assert!((traj.accel0_m_per_s2 + 2.0).abs() < 1e-12);
        let accels = traj.accels(10);
        assert_eq!(accels.len(), 10);
        assert!(accels.iter().all(|a| (a + 2.0).abs() < 1e-12));
    }

    #[test]
    fn test_single_step_requires_consistent_target() {
        // constant accel of -1 m/s^2 from 10 m/s covers 9.5 m in one second
        let traj = calc_constant_jerk_trajectory(1, 0.0, 10.0, 9.5, 9.0, 1.0).unwrap();
        assert_eq!(traj.jerk_m_per_s3, 0.0);
        assert!((traj.accel0_m_per_s2 + 1.0).abs() < 1e-12);
        assert!(calc_constant_jerk_trajectory(1, 0.0, 10.0, 12.0, 9.0, 1.0).is_err());
    }

    #[test]
    fn test_invalid_inputs_are_rejected() {
        assert!(calc_constant_jerk_trajectory(0, 0.0, 10.0, 50.0, 0.0, 1.0).is_err());
        assert!(calc_constant_jerk_trajectory(5, 0.0, 10.0, 50.0, 0.0, 0.0).is_err());
        assert!(calc_constant_jerk_trajectory(5, 0.0, 10.0, 50.0, 0.0, -1.0).is_err());
        assert!(calc_constant_jerk_trajectory(5, 10.0, 10.0, 5.0, 0.0, 1.0).is_err());
        assert!(calc_constant_jerk_trajectory(5, 0.0, f64::NAN, 50.0, 0.0, 1.0).is_err());
        assert!(calc_constant_jerk_trajectory(5, 0.0, 10.0, f64::INFINITY, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_accel_array_matches_pointwise() {
        let accels = accel_array_for_constant_jerk(4, -1.0, 0.25, 2.0);
        assert_eq!(accels, array![-1.0, -0.5, 0.0, 0.5]);
        assert_eq!(accel_for_constant_jerk(3, -1.0, 0.25, 2.0), 0.5);
    }
}
