//! Module containing the stepping and road-load calculations of [`SimDrive`]

use super::{CoastState, SimDrive, SimDriveParams, SimDriveSummary};
use crate::cycle::Cycle;
use crate::imports::*;
use crate::params::{PhysicalProperties, M_PER_KM};
use crate::utils::{max, min, ndarrmax};
use crate::vehicle::Vehicle;

impl SimDrive {
    pub fn new(cyc: Cycle, veh: Vehicle) -> Self {
        Self::with_params(cyc, veh, SimDriveParams::default())
    }

    pub fn with_params(cyc: Cycle, veh: Vehicle, sim_params: SimDriveParams) -> Self {
        let cyc_len = cyc.len();
        let cyc0_cache = cyc.build_cache();
        Self {
            veh,
            cyc: cyc.clone(),
            cyc0: cyc,
            cyc0_cache,
            sim_params,
            props: PhysicalProperties::default(),
            i: 1,
            coast_state: CoastState::NotCoasting,
            coast_events: 0,
            mps_ach: Array1::zeros(cyc_len),
            dist_m: Array1::zeros(cyc_len),
            grade: Array1::zeros(cyc_len),
            impose_coast: Array1::from_elem(cyc_len, false),
            cyc_met: Array1::from_elem(cyc_len, false),
            newton_iters: Array1::zeros(cyc_len),
            cur_max_trac_kw: Array1::zeros(cyc_len),
            drag_kw: Array1::zeros(cyc_len),
            accel_kw: Array1::zeros(cyc_len),
            ascent_kw: Array1::zeros(cyc_len),
            rr_kw: Array1::zeros(cyc_len),
            cyc_whl_kw_req: Array1::zeros(cyc_len),
            trac_kw_out_ach: Array1::zeros(cyc_len),
            brake_kw: Array1::zeros(cyc_len),
            pt_kw_in: Array1::zeros(cyc_len),
            dist_total_m: 0.0,
            drag_kj: 0.0,
            ascent_kj: 0.0,
            rr_kj: 0.0,
            brake_kj: 0.0,
            aux_kj: 0.0,
            pt_kj_in: 0.0,
            trac_kj: 0.0,
            ke_kj: 0.0,
            net_kj: 0.0,
            energy_audit_error: 0.0,
            trace_miss: false,
            trace_miss_dist_frac: 0.0,
            trace_miss_speed_mps: 0.0,
        }
    }

    /// Number of time steps, including the initial sample
    pub fn len(&self) -> usize {
        self.cyc0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cyc0.is_empty()
    }

    /// Reset all time series to zero at the length of `cyc0`
    pub fn init_arrays(&mut self) {
        let cyc_len = self.len();
        self.mps_ach = Array1::zeros(cyc_len);
        self.dist_m = Array1::zeros(cyc_len);
        self.grade = Array1::zeros(cyc_len);
        self.impose_coast = Array1::from_elem(cyc_len, false);
        self.cyc_met = Array1::from_elem(cyc_len, false);
        self.newton_iters = Array1::zeros(cyc_len);
        self.cur_max_trac_kw = Array1::zeros(cyc_len);
        self.drag_kw = Array1::zeros(cyc_len);
        self.accel_kw = Array1::zeros(cyc_len);
        self.ascent_kw = Array1::zeros(cyc_len);
        self.rr_kw = Array1::zeros(cyc_len);
        self.cyc_whl_kw_req = Array1::zeros(cyc_len);
        self.trac_kw_out_ach = Array1::zeros(cyc_len);
        self.brake_kw = Array1::zeros(cyc_len);
        self.pt_kw_in = Array1::zeros(cyc_len);
    }

    /// Run the full simulation and compute post-processing scalars
    pub fn sim_drive(&mut self) -> anyhow::Result<()> {
        self.walk()?;
        self.set_post_scalars()?;
        Ok(())
    }

    /// Step through the whole cycle without post-processing
    pub fn walk(&mut self) -> anyhow::Result<()> {
        self.init_for_step()?;
        while self.i < self.cyc.len() {
            self.step()?;
        }
        Ok(())
    }

    /// This is a specialty method which should be called prior to using
    /// `step` in a loop. Resets the working cycle to `cyc0`.
    pub fn init_for_step(&mut self) -> anyhow::Result<()> {
        ensure!(
            self.cyc0.len() >= 2,
            "cycle `{}` needs at least 2 points to simulate, got {}",
            self.cyc0.name,
            self.cyc0.len()
        );
        self.sim_params.init()?;
        self.init_arrays();
        // reset the cycle in case it has been manipulated
        self.cyc = self.cyc0.clone();
        self.cyc0_cache = self.cyc0.build_cache();

        self.cyc_met[0] = true;
        self.mps_ach[0] = self.cyc0.mps()[0];
        self.grade[0] = self.cyc0.grade()[0];
        self.coast_state = CoastState::NotCoasting;
        self.coast_events = 0;
        self.i = 1; // time step counter
        Ok(())
    }

    /// Step through 1 time step.
    pub fn step(&mut self) -> anyhow::Result<()> {
        if self.sim_params.coast_allow {
            self.set_coast_speed(self.i);
        }
        self.solve_step(self.i)?;
        if self.sim_params.coast_allow {
            self.cyc
                .set_speed(self.i, self.mps_ach[self.i])
                .with_context(|| format!("recording achieved speed at step {}", self.i))?;
        }
        self.i += 1; // increment time step counter
        Ok(())
    }

    /// Perform all the calculations to solve 1 time step.
    pub fn solve_step(&mut self, i: usize) -> anyhow::Result<()> {
        ensure!(
            i >= 1 && i < self.cyc.len(),
            "step index {} must be in [1, {})",
            i,
            self.cyc.len()
        );
        self.set_comp_lims(i);
        self.set_power_calcs(i)?;
        self.set_ach_speed(i)?;
        self.set_energy_calcs(i);
        Ok(())
    }

    /// Sets the tractive power limit for step `i`; propulsion is cut while
    /// coasting or braking is imposed.
    pub fn set_comp_lims(&mut self, i: usize) {
        self.cur_max_trac_kw[i] = if self.impose_coast[i] {
            0.0
        } else {
            self.veh.max_trac_kw
        };
    }

    /// For situations where cyc can deviate from cyc0, this method looks up
    /// the average grade over the step by distance on the reference cycle.
    /// If `mps_ach` is given, it is used to predict the distance traveled
    /// over the step.
    ///
    /// Without coasting the cycle never leaves the reference timeline and
    /// the grade of `cyc` is returned as is.
    pub fn lookup_grade_for_step(&self, i: usize, mps_ach: Option<f64>) -> f64 {
        if self.cyc0_cache.grade_all_zero {
            return 0.0;
        }
        if !self.sim_params.coast_allow {
            return self.cyc.grade()[i];
        }
        let step_dist_m = match mps_ach {
            Some(mps_ach) => 0.5 * (mps_ach + self.mps_ach[i - 1]) * self.cyc.dt_s_at_i(i),
            None => self.cyc.trapz_distance_for_step(i),
        };
        self.cyc0_cache
            .average_grade_over_range(self.cyc.trapz_step_start_distance(i), step_dist_m)
    }

    /// Calculate road-load power terms required to meet the cycle, or to
    /// reach the achieved speed once the speed solver has run.
    pub fn set_power_calcs(&mut self, i: usize) -> anyhow::Result<()> {
        let mps_ach = if self.newton_iters[i] > 0 {
            self.mps_ach[i]
        } else {
            self.cyc.mps()[i]
        };
        let v0 = self.mps_ach[i - 1];
        let dt = self.cyc.dt_s_at_i(i);
        ensure!(dt > 0.0, "non-positive time step at index {}: {}", i, dt);
        let grade = self.lookup_grade_for_step(i, Some(mps_ach));
        self.grade[i] = grade;
        let vavg = 0.5 * (mps_ach + v0);
        let mass = self.veh.veh_kg;
        let g = self.props.a_grav_mps2;

        self.drag_kw[i] =
            0.5 * self.props.air_density_kg_per_m3 * self.veh.cdfa_m2() * vavg.powi(3) / M_PER_KM;
        self.accel_kw[i] = mass / (2.0 * dt) * (mps_ach.powi(2) - v0.powi(2)) / M_PER_KM;
        self.ascent_kw[i] = g * grade.atan().sin() * mass * vavg / M_PER_KM;
        self.rr_kw[i] = mass * g * self.veh.wheel_rr_coef * grade.atan().cos() * vavg / M_PER_KM;
        self.cyc_whl_kw_req[i] = self.drag_kw[i] + self.accel_kw[i] + self.ascent_kw[i] + self.rr_kw[i];

        if self.newton_iters[i] == 0 {
            self.cyc_met[i] = self.cyc_whl_kw_req[i] <= self.cur_max_trac_kw[i];
        }
        Ok(())
    }

    /// Calculate the achieved speed. When the cycle cannot be met, solve the
    /// cubic road-load equation for the speed at which the required power
    /// equals the tractive limit.
    pub fn set_ach_speed(&mut self, i: usize) -> anyhow::Result<()> {
        if self.cyc_met[i] {
            self.mps_ach[i] = self.cyc.mps()[i];
        } else {
            let dt = self.cyc.dt_s_at_i(i);
            let v0 = self.mps_ach[i - 1];
            let mass = self.veh.veh_kg;
            let g_accel = self.props.a_grav_mps2;
            let rho_cdfa = self.props.air_density_kg_per_m3 * self.veh.cdfa_m2();

            let mut grade_estimate = self.lookup_grade_for_step(i, None);
            let grade_tol = 1e-4;
            let mut grade_diff = grade_tol + 1.0;
            let max_grade_iter = 3;
            let mut grade_iter = 0;
            while grade_diff > grade_tol && grade_iter < max_grade_iter {
                grade_iter += 1;
                let grade = grade_estimate;
                let (sin_theta, cos_theta) = grade.atan().sin_cos();

                let drag3 = 1.0 / 16.0 * rho_cdfa;
                let accel2 = 0.5 * mass / dt;
                let drag2 = 3.0 / 16.0 * rho_cdfa * v0;
                let drag1 = 3.0 / 16.0 * rho_cdfa * v0.powi(2);
                let roll1 = 0.5 * mass * g_accel * self.veh.wheel_rr_coef * cos_theta;
                let ascent1 = 0.5 * g_accel * sin_theta * mass;
                let accel0 = -0.5 * mass * v0.powi(2) / dt;
                let drag0 = 1.0 / 16.0 * rho_cdfa * v0.powi(3);
                let roll0 = 0.5 * mass * g_accel * self.veh.wheel_rr_coef * cos_theta * v0;
                let ascent0 = 0.5 * g_accel * sin_theta * mass * v0;

                let t3 = drag3 / M_PER_KM;
                let t2 = (accel2 + drag2) / M_PER_KM;
                let t1 = (drag1 + roll1 + ascent1) / M_PER_KM;
                let t0 = (accel0 + drag0 + roll0 + ascent0) / M_PER_KM - self.cur_max_trac_kw[i];

                let (x, iterate) = self.newton_cubic_root(t3, t2, t1, t0, max(1.0, v0));
                self.newton_iters[i] = iterate;
                self.mps_ach[i] = max(x, 0.0);

                grade_estimate = self.lookup_grade_for_step(i, Some(self.mps_ach[i]));
                grade_diff = (grade - grade_estimate).abs();
            }
            self.set_power_calcs(i)?;
        }
        self.dist_m[i] = self.mps_ach[i] * self.cyc.dt_s_at_i(i);
        Ok(())
    }

    /// Damped Newton iteration on `t3 x^3 + t2 x^2 + t1 x + t0` starting
    /// from `xi`. Returns the iterate with the smallest residual and the
    /// number of iterations taken.
    fn newton_cubic_root(&self, t3: f64, t2: f64, t1: f64, t0: f64, xi: f64) -> (f64, u32) {
        let max_iter = self.sim_params.newton_max_iter;
        let xtol = self.sim_params.newton_xtol;
        // solver gain
        let g = self.sim_params.newton_gain;
        let eval = |x: f64| {
            let y = t3 * x.powi(3) + t2 * x.powi(2) + t1 * x + t0;
            let m = 3.0 * t3 * x.powi(2) + 2.0 * t2 * x + t1;
            (y, m, y - x * m)
        };

        let (mut y, mut m, mut b) = eval(xi);
        let mut x = xi;
        let mut best = (x, y.abs());
        let mut iterate = 1;
        let mut converged = false;
        while iterate < max_iter && !converged {
            if m == 0.0 {
                break;
            }
            let x_next = x * (1.0 - g) - g * b / m;
            (y, m, b) = eval(x_next);
            if y.abs() < best.1 {
                best = (x_next, y.abs());
            }
            converged = x == 0.0 || ((x_next - x) / x).abs() < xtol;
            x = x_next;
            iterate += 1;
        }
        (best.0, iterate)
    }

    /// Split the wheel power into traction and friction braking and charge
    /// the traction plus auxiliary load to the powertrain.
    pub fn set_energy_calcs(&mut self, i: usize) {
        self.trac_kw_out_ach[i] = min(max(self.cyc_whl_kw_req[i], 0.0), self.veh.max_trac_kw);
        self.brake_kw[i] = max(-self.cyc_whl_kw_req[i], 0.0);
        let pt_kw_out = self.trac_kw_out_ach[i] + self.veh.aux_kw;
        self.pt_kw_in[i] = if pt_kw_out > 0.0 {
            pt_kw_out / self.veh.pt_eff_at(pt_kw_out / self.veh.max_trac_kw)
        } else {
            0.0
        };
    }

    /// Sets scalar variables that can be calculated after a cycle is run.
    pub fn set_post_scalars(&mut self) -> anyhow::Result<()> {
        let dt_s = self.cyc.secs();
        ensure!(
            dt_s.len() == self.drag_kw.len(),
            "time series length {} does not match cycle length {}",
            self.drag_kw.len(),
            dt_s.len()
        );
        self.dist_total_m = self.dist_m.sum();
        self.drag_kj = (&self.drag_kw * dt_s).sum();
        self.ascent_kj = (&self.ascent_kw * dt_s).sum();
        self.rr_kj = (&self.rr_kw * dt_s).sum();
        self.brake_kj = (&self.brake_kw * dt_s).sum();
        self.trac_kj = (&self.trac_kw_out_ach * dt_s).sum();
        self.pt_kj_in = (&self.pt_kw_in * dt_s).sum();
        self.aux_kj = self.veh.aux_kw * dt_s.sum();

        let v_first = self.mps_ach.first().copied().unwrap_or_default();
        let v_last = self.mps_ach.last().copied().unwrap_or_default();
        self.ke_kj = 0.5 * self.veh.veh_kg * (v_first.powi(2) - v_last.powi(2)) / M_PER_KM;

        self.net_kj = self.drag_kj + self.ascent_kj + self.rr_kj + self.brake_kj;
        let supplied_kj = self.trac_kj + self.ke_kj;
        self.energy_audit_error = if supplied_kj == 0.0 {
            0.0
        } else {
            (supplied_kj - self.net_kj) / supplied_kj
        };
        if self.energy_audit_error.abs() > self.sim_params.energy_audit_error_tol {
            log::warn!(
                "problem detected with conservation of energy; energy audit error: {:.5}",
                self.energy_audit_error
            );
        }

        let cyc0_dist_m = self.cyc0.dist_m().sum();
        self.trace_miss_dist_frac = if cyc0_dist_m > 0.0 {
            (self.dist_total_m - cyc0_dist_m).abs() / cyc0_dist_m
        } else {
            0.0
        };
        self.trace_miss_speed_mps = ndarrmax(&(&self.mps_ach - self.cyc.mps()).mapv(f64::abs));
        self.trace_miss = false;
        if self.trace_miss_dist_frac > self.sim_params.trace_miss_dist_tol {
            self.trace_miss = true;
            log::warn!(
                "trace miss distance fraction {:.5} exceeds tolerance of {:.5}",
                self.trace_miss_dist_frac,
                self.sim_params.trace_miss_dist_tol
            );
        }
        if self.trace_miss_speed_mps > self.sim_params.trace_miss_speed_mps_tol {
            self.trace_miss = true;
            log::warn!(
                "trace miss speed {:.5} m/s exceeds tolerance of {:.5} m/s",
                self.trace_miss_speed_mps,
                self.sim_params.trace_miss_speed_mps_tol
            );
        }
        Ok(())
    }

    /// Headline results; meaningful after `sim_drive`
    pub fn summary(&self) -> SimDriveSummary {
        let time_s = self.cyc0.time_s();
        let duration_s = match (time_s.first(), time_s.last()) {
            (Some(t0), Some(t1)) => t1 - t0,
            _ => 0.0,
        };
        SimDriveSummary {
            cycle: self.cyc0.name.clone(),
            vehicle: self.veh.scenario_name.clone(),
            coast_allow: self.sim_params.coast_allow,
            duration_s,
            dist_total_m: self.dist_total_m,
            max_speed_m_per_s: ndarrmax(&self.mps_ach),
            coast_events: self.coast_events,
            coast_steps: self.impose_coast.iter().filter(|flag| **flag).count(),
            pt_kj_in: self.pt_kj_in,
            drag_kj: self.drag_kj,
            ascent_kj: self.ascent_kj,
            rr_kj: self.rr_kj,
            brake_kj: self.brake_kj,
            aux_kj: self.aux_kj,
            energy_audit_error: self.energy_audit_error,
            trace_miss: self.trace_miss,
            trace_miss_dist_frac: self.trace_miss_dist_frac,
            trace_miss_speed_mps: self.trace_miss_speed_mps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trapz_sd() -> SimDrive {
        let cyc = Cycle::trapezoid(20.0, 10.0, 45.0, 55.0, 100.0, 0.0).unwrap();
        SimDrive::new(cyc, Vehicle::mock_vehicle())
    }

    #[test]
    fn test_sim_drive_follows_achievable_trace() {
        let mut sd = trapz_sd();
        sd.sim_drive().unwrap();
        assert_eq!(sd.i, sd.len());
        assert!(sd.cyc_met.iter().all(|met| *met));
        assert!(sd.newton_iters.iter().all(|n| *n == 0));
        assert_eq!(sd.mps_ach, *sd.cyc0.mps());
        assert!(!sd.trace_miss);
        assert!(sd.trace_miss_speed_mps < 1e-12);
        assert_eq!(sd.coast_events, 0);
        assert!(sd.impose_coast.iter().all(|flag| !*flag));
        assert!((sd.dist_total_m - sd.cyc0.dist_m().sum()).abs() < 1e-9);
    }

    #[test]
    fn test_energy_terms_are_consistent() {
        let mut sd = trapz_sd();
        sd.sim_drive().unwrap();
        assert!(sd.drag_kj > 0.0);
        assert!(sd.rr_kj > 0.0);
        assert!(sd.ascent_kj.abs() < 1e-12);
        // the decel ramp needs friction braking at 2 m/s^2
        assert!(sd.brake_kj > 0.0);
        assert!(sd.pt_kj_in > sd.trac_kj);
        assert!(sd.energy_audit_error.abs() < 1e-9);
        assert!((sd.aux_kj - 0.7 * 100.0).abs() < 1e-9);
        assert!(sd.ke_kj.abs() < 1e-12);
    }

    #[test]
    fn test_power_limited_acceleration() {
        // 0 to 30 m/s in 2 s needs far more than the tractive limit
        let cyc = Cycle::new(
            vec![0.0, 1.0, 2.0, 3.0],
            vec![0.0, 15.0, 30.0, 30.0],
            vec![0.0; 4],
            vec![0.0; 4],
            "launch",
        )
        .unwrap();
        let mut sd = SimDrive::new(cyc, Vehicle::mock_vehicle());
        sd.sim_drive().unwrap();
        assert!(!sd.cyc_met[1]);
        assert!(sd.newton_iters[1] > 0);
        assert!(sd.mps_ach[1] > 0.0 && sd.mps_ach[1] < 15.0);
        // achieved power sits at the limit
        assert!((sd.cyc_whl_kw_req[1] - sd.veh.max_trac_kw).abs() < 1e-3);
        assert!(sd.mps_ach[2] > sd.mps_ach[1]);
        assert!(sd.trace_miss);
        assert!(sd.trace_miss_speed_mps > 1.0);
    }

    #[test]
    fn test_zero_tractive_limit_coasts_down() {
        let cyc = Cycle::new(
            vec![0.0, 1.0, 2.0],
            vec![20.0, 20.0, 20.0],
            vec![0.0; 3],
            vec![0.0; 3],
            "cruise",
        )
        .unwrap();
        let mut sd = SimDrive::new(cyc, Vehicle::mock_vehicle());
        sd.init_for_step().unwrap();
        sd.impose_coast[1] = true;
        sd.solve_step(1).unwrap();
        assert!(!sd.cyc_met[1]);
        let natural_decel = sd.mps_ach[1] - 20.0;
        // drag and rolling resistance on a flat road, roughly 0.2 m/s^2 at 20 m/s
        assert!(natural_decel < -0.15 && natural_decel > -0.3);
        assert!(sd.cyc_whl_kw_req[1].abs() < 1e-3);
        assert!(sd.brake_kw[1] < 1e-3);
    }

    #[test]
    fn test_uphill_costs_more() {
        let flat = Cycle::trapezoid(20.0, 10.0, 45.0, 55.0, 100.0, 0.0).unwrap();
        let hill = Cycle::trapezoid(20.0, 10.0, 45.0, 55.0, 100.0, 0.02).unwrap();
        let mut sd_flat = SimDrive::new(flat, Vehicle::mock_vehicle());
        let mut sd_hill = SimDrive::new(hill, Vehicle::mock_vehicle());
        sd_flat.sim_drive().unwrap();
        sd_hill.sim_drive().unwrap();
        assert!(sd_hill.ascent_kj > 0.0);
        assert!(sd_hill.pt_kj_in > sd_flat.pt_kj_in);
        assert!((sd_hill.grade[20] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_single_point_cycle() {
        let cyc = Cycle::new(vec![0.0], vec![0.0], vec![0.0], vec![0.0], "point").unwrap();
        let mut sd = SimDrive::new(cyc, Vehicle::mock_vehicle());
        assert!(sd.sim_drive().is_err());
    }

    #[test]
    fn test_summary_round_trip() {
        let mut sd = trapz_sd();
        sd.sim_drive().unwrap();
        let summary = sd.summary();
        assert_eq!(summary.duration_s, 100.0);
        assert_eq!(summary.max_speed_m_per_s, 20.0);
        assert_eq!(summary.coast_steps, 0);
        let json = summary.to_json().unwrap();
        assert_eq!(SimDriveSummary::from_json(json).unwrap(), summary);
    }
}
