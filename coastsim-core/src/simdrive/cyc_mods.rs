//! Module containing the coast-to-stop decisions made while stepping
//! through a [`SimDrive`]. Each decision rewrites the working cycle only at
//! and after the current step.

use super::{CoastState, SimDrive};
use crate::coast::{distance_to_next_stop, CoastIntegration, RoadLoad};
use crate::cycle::modify_cycle_with_trajectory;
use crate::imports::*;
use crate::params::STOPPED_SPEED_M_PER_S;
use crate::trajectory::{calc_constant_jerk_trajectory, Trajectory};
use crate::utils::{max, min};

/// Coasting hands over to braking early once speed falls this far below the
/// brake-initiation speed \[m/s\]
const BRAKE_START_SPEED_MARGIN_M_PER_S: f64 = 0.1;

/// A planned deceleration reaching brake initiation after `n` steps
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rendezvous {
    pub n: usize,
    pub trajectory: Trajectory,
}

impl SimDrive {
    /// Road-load parameters of the simulated vehicle
    pub fn road_load(&self) -> RoadLoad {
        RoadLoad::new(&self.veh, &self.props)
    }

    /// Distance (m) from the start of step `i` to the next stop of the
    /// reference cycle, if there is one.
    pub fn distance_to_next_stop(&self, i: usize) -> Option<f64> {
        distance_to_next_stop(self.cyc.trapz_step_start_distance(i), &self.cyc0)
    }

    /// Distance (m) needed to stop from the speed at the start of step `i`
    /// by coasting to the brake-initiation speed and then braking, over the
    /// reference grades ahead.
    pub fn calc_distance_to_stop_coast(&self, i: usize) -> anyhow::Result<Option<f64>> {
        let d0 = self.cyc.trapz_step_start_distance(i);
        let (distances_m, grades) = self.cyc0_cache.grade_profile_from(d0);
        let integ = CoastIntegration {
            dt_s: self.cyc0.dt_s_at_i(i),
            max_distance_m: None,
            max_iter: self.sim_params.coast_max_iter,
        };
        self.road_load().distance_to_stop_coast(
            self.mps_ach[i - 1],
            self.sim_params.coast_brake_start_speed_m_per_s,
            self.sim_params.coast_brake_accel_m_per_s2,
            &distances_m.to_vec(),
            &grades.to_vec(),
            &integ,
        )
    }

    /// Whether a coast should begin at step `i`.
    ///
    /// With a positive `coast_start_speed_m_per_s` coasting is triggered by
    /// speed alone. Otherwise it is triggered once the next stop is no
    /// farther away than the vehicle would travel coasting and braking to
    /// rest, i.e. coast now or overshoot.
    ///
    /// Both modes judge the speed achieved at the end of step `i - 1`, not
    /// the trace's target for step `i`: a coast is planned from the state the
    /// vehicle is actually in, and a target the vehicle cannot reach must not
    /// start one.
    pub fn should_impose_coast(&self, i: usize) -> bool {
        let v0 = self.mps_ach[i - 1];
        if v0 < STOPPED_SPEED_M_PER_S {
            return false;
        }
        if !self.sim_params.coast_auto_start() {
            return v0 >= self.sim_params.coast_start_speed_m_per_s;
        }
        if v0 <= self.sim_params.coast_brake_start_speed_m_per_s {
            return false;
        }
        let Some(dts0) = self.distance_to_next_stop(i) else {
            return false;
        };
        match self.calc_distance_to_stop_coast(i) {
            Ok(Some(dtsc0)) => dts0 <= dtsc0,
            Ok(None) => false,
            Err(err) => {
                log::warn!("step {}: coast distance unavailable: {:#}", i, err);
                false
            }
        }
    }

    /// Search for a constant-jerk trajectory from the start of step `i` to
    /// the brake-initiation point ahead of the next stop.
    ///
    /// A candidate is accepted when its deceleration eases off over time
    /// (non-negative jerk), every step's acceleration lies within
    /// `[min_accel_m_per_s2, max_accel_m_per_s2]`, and the vehicle can follow
    /// it with propulsion off (see [`SimDrive::can_coast_along`]). Windows run
    /// at most `time_horizon_s` (at least one second) when given, and never
    /// past the end of the cycle. Among accepted step counts the one with the
    /// smallest acceleration spread wins.
    pub fn calc_next_rendezvous_trajectory(
        &self,
        i: usize,
        min_accel_m_per_s2: f64,
        max_accel_m_per_s2: f64,
        time_horizon_s: Option<f64>,
    ) -> Option<Rendezvous> {
        let tol = 1e-6;
        let v0 = self.mps_ach[i - 1];
        let v_brake = self.sim_params.coast_brake_start_speed_m_per_s;
        let a_brake = self.sim_params.coast_brake_accel_m_per_s2;
        if v0 < v_brake + tol {
            return None;
        }
        let dts0 = self.distance_to_next_stop(i)?;
        // distance to brake from brake initiation to rest
        let dtb = -0.5 * v_brake * v_brake / a_brake;
        // distance to brake initiation
        let dtbi0 = dts0 - dtb;
        if dtbi0 < tol {
            return None;
        }
        let dt = self.cyc.dt_s_at_i(i);
        let n_max = match time_horizon_s {
            Some(horizon_s) => {
                let n_horizon = ((max(horizon_s, 1.0) / dt) + 1e-9).floor().max(1.0) as usize;
                n_horizon.min(self.cyc.len() - i)
            }
            None => self.cyc.len() - i,
        };
        let mut best: Option<(f64, Rendezvous)> = None;
        for n in 1..=n_max {
            let Ok(trajectory) = calc_constant_jerk_trajectory(n, 0.0, v0, dtbi0, v_brake, dt)
            else {
                continue;
            };
            if trajectory.jerk_m_per_s3 < -tol {
                continue;
            }
            // acceleration is linear in the step index, so its extremes sit at the ends
            let a_first = trajectory.accel_at(0);
            let a_last = trajectory.accel_at(n - 1);
            let (a_min, a_max) = (a_first.min(a_last), a_first.max(a_last));
            if a_max > max_accel_m_per_s2 + tol || a_min < min_accel_m_per_s2 - tol {
                continue;
            }
            let rendezvous = Rendezvous { n, trajectory };
            if !self.can_coast_along(i, &rendezvous) {
                continue;
            }
            let spread = a_max - a_min;
            if best.map_or(true, |(best_spread, _)| spread < best_spread) {
                best = Some((spread, rendezvous));
            }
        }
        best.map(|(_, rendezvous)| rendezvous)
    }

    /// True when, over every step of `rendezvous` planned from the start of
    /// step `i`, the vehicle would slow at least as much as the plan asks for
    /// while coasting at the speed it starts that step with. Friction braking
    /// then makes up the difference, so the plan is followed exactly.
    pub fn can_coast_along(&self, i: usize, rendezvous: &Rendezvous) -> bool {
        let tol = 1e-6;
        let road_load = self.road_load();
        let d0 = self.cyc.trapz_step_start_distance(i);
        let traj = &rendezvous.trajectory;
        (0..rendezvous.n).all(|k| {
            // steeper of the grades at either end of the step
            let grade = max(
                self.cyc0_cache.interp_grade(d0 + traj.dist_at(k)),
                self.cyc0_cache.interp_grade(d0 + traj.dist_at(k + 1)),
            );
            let v = traj.speed_at(k);
            traj.accel_at(k) <= road_load.dvdd(v, grade) * v + tol
        })
    }

    /// Splice `rendezvous` into the working cycle at `i` and flag its window,
    /// clearing any flags left past it.
    fn impose_rendezvous(&mut self, i: usize, rendezvous: &Rendezvous) -> anyhow::Result<()> {
        modify_cycle_with_trajectory(
            &mut self.cyc,
            i,
            rendezvous.n,
            rendezvous.trajectory.jerk_m_per_s3,
            rendezvous.trajectory.accel0_m_per_s2,
        )?;
        let i_end = (i + rendezvous.n).min(self.cyc.len());
        self.impose_coast.slice_mut(s![i..]).fill(false);
        self.impose_coast.slice_mut(s![i..i_end]).fill(true);
        Ok(())
    }

    /// Start a coast at `i` if a feasible trajectory to brake initiation
    /// exists. Returns whether coasting began.
    fn begin_coast(&mut self, i: usize) -> bool {
        let Some(rendezvous) = self.calc_next_rendezvous_trajectory(
            i,
            self.sim_params.coast_brake_accel_m_per_s2,
            0.0,
            None,
        ) else {
            log::debug!("step {}: coast triggered but no feasible trajectory", i);
            return false;
        };
        match self.impose_rendezvous(i, &rendezvous) {
            Ok(()) => {
                self.coast_state = CoastState::Coasting;
                self.coast_events += 1;
                log::debug!(
                    "step {}: coasting for {} steps from {:.3} m/s",
                    i,
                    rendezvous.n,
                    self.mps_ach[i - 1]
                );
                true
            }
            Err(err) => {
                log::warn!("step {}: coast rejected: {:#}", i, err);
                false
            }
        }
    }

    /// Re-plan the remaining coast when the vehicle would have to be
    /// propelled to follow it, bounding the new trajectory by the natural
    /// coast-down deceleration and the adjustment time horizon.
    fn adjust_coast(&mut self, i: usize) {
        let v0 = self.mps_ach[i - 1];
        let dt = self.cyc.dt_s_at_i(i);
        let accel_planned = (self.cyc.mps()[i] - v0) / dt;
        let grade = self.lookup_grade_for_step(i, None);
        let accel_natural = self.road_load().dvdd(v0, grade) * v0;
        if accel_planned <= accel_natural {
            return;
        }
        if let Some(rendezvous) = self.calc_next_rendezvous_trajectory(
            i,
            self.sim_params.coast_brake_accel_m_per_s2,
            min(accel_natural, 0.0),
            Some(self.sim_params.coast_time_horizon_for_adjustment_s),
        ) {
            if let Err(err) = self.impose_rendezvous(i, &rendezvous) {
                log::warn!("step {}: coast adjustment rejected: {:#}", i, err);
            }
        }
    }

    /// Replace the rest of the coast with a braking trajectory starting at `i`
    /// that comes to rest at the next stop, if that is within half to double
    /// the distance constant braking would take.
    fn begin_braking(&mut self, i: usize) {
        let coast_end = (i..self.cyc.len())
            .find(|&idx| !self.impose_coast[idx])
            .unwrap_or(self.cyc.len());
        self.impose_coast.slice_mut(s![i..]).fill(false);
        let a_brake = self.sim_params.coast_brake_accel_m_per_s2;
        let v0 = self.mps_ach[i - 1];
        let dtb = -0.5 * v0 * v0 / a_brake;
        let dts_m = self
            .distance_to_next_stop(i)
            .map(|dts0| min(max(dts0, 0.5 * dtb), 2.0 * dtb));
        let n = match self.cyc.modify_with_braking_trajectory(a_brake, i, dts_m) {
            Ok(n) => n,
            Err(err) => {
                log::warn!("step {}: braking rejected: {:#}", i, err);
                self.coast_state = CoastState::NotCoasting;
                return;
            }
        };
        if n == 0 {
            self.coast_state = CoastState::NotCoasting;
            return;
        }
        let brake_end = (i + n).min(self.cyc.len());
        self.impose_coast.slice_mut(s![i..brake_end]).fill(true);
        self.coast_state = CoastState::Braking;
        log::debug!(
            "step {}: braking for {} steps from {:.3} m/s",
            i,
            n,
            self.mps_ach[i - 1]
        );
        // hold at rest over what is left of the abandoned coast window
        if brake_end < coast_end {
            if let Err(err) = modify_cycle_with_trajectory(
                &mut self.cyc,
                brake_end,
                coast_end - brake_end,
                0.0,
                0.0,
            ) {
                log::warn!("step {}: could not hold at rest: {:#}", brake_end, err);
            }
        }
    }

    /// Advance the coast state machine before step `i` is solved, rewriting
    /// target speeds of the working cycle at and after `i` as needed.
    /// Failures are logged and mean no coasting for the step.
    pub fn set_coast_speed(&mut self, i: usize) {
        match self.coast_state {
            CoastState::Coasting => {
                let v0 = self.mps_ach[i - 1];
                let v_brake_late = self.sim_params.coast_brake_start_speed_m_per_s
                    - BRAKE_START_SPEED_MARGIN_M_PER_S;
                if !self.impose_coast[i] || v0 < v_brake_late {
                    self.begin_braking(i);
                } else {
                    self.adjust_coast(i);
                }
            }
            CoastState::Braking => {
                if !self.impose_coast[i] {
                    log::debug!("step {}: braking complete", i);
                    self.coast_state = CoastState::NotCoasting;
                }
            }
            CoastState::NotCoasting => {}
        }
        if self.coast_state == CoastState::NotCoasting && self.should_impose_coast(i) {
            self.begin_coast(i);
        }
    }
}
