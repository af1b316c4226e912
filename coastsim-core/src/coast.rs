//! Coast-down and braking distances under road load, and distance to the
//! next stop along a cycle.

use crate::cycle::Cycle;
use crate::imports::*;
use crate::params::{PhysicalProperties, STOPPED_SPEED_M_PER_S};
use crate::utils::{ndarrunique, segment_lookup};
use crate::vehicle::Vehicle;

/// Number of times the step acceleration is re-evaluated at the step-average speed
const COAST_REFINEMENTS: usize = 2;

/// Calculate the distance to the next stop ahead of `current_distance_m`
/// along the trapezoidal distance of `cyc`.
///
/// Returns `None` when no stop lies ahead.
pub fn distance_to_next_stop(current_distance_m: f64, cyc: &Cycle) -> Option<f64> {
    let tol = 1e-6;
    cyc.cumu_dist_v2_m()
        .iter()
        .zip(cyc.mps().iter())
        .find(|&(&dist, &v)| v < STOPPED_SPEED_M_PER_S && dist > current_distance_m + tol)
        .map(|(dist, _)| dist - current_distance_m)
}

/// Vehicle and environment parameters governing free deceleration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoadLoad {
    pub veh_mass_kg: f64,
    pub air_density_kg_per_m3: f64,
    /// drag coefficient times frontal area
    pub cdfa_m2: f64,
    /// rolling resistance coefficient
    pub rrc: f64,
    pub gravity_m_per_s2: f64,
}

/// Bounds on the numeric coast-down integration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoastIntegration {
    /// time step of the integration \[s\]
    pub dt_s: f64,
    /// give up past this distance; unbounded by default, with the last
    /// grade holding past the last breakpoint
    pub max_distance_m: Option<f64>,
    pub max_iter: usize,
}

impl Default for CoastIntegration {
    fn default() -> Self {
        Self {
            dt_s: 1.0,
            max_distance_m: None,
            max_iter: 10_000,
        }
    }
}

impl RoadLoad {
    pub fn new(veh: &Vehicle, props: &PhysicalProperties) -> Self {
        Self {
            veh_mass_kg: veh.veh_kg,
            air_density_kg_per_m3: props.air_density_kg_per_m3,
            cdfa_m2: veh.cdfa_m2(),
            rrc: veh.wheel_rr_coef,
            gravity_m_per_s2: props.a_grav_mps2,
        }
    }

    /// Change in speed per unit distance (1/s) while coasting at speed `v`
    /// on road `grade`. Zero when stopped.
    pub fn dvdd(&self, v: f64, grade: f64) -> f64 {
        if v <= 0.0 {
            return 0.0;
        }
        let (sin_theta, cos_theta) = if grade == 0.0 {
            (0.0, 1.0)
        } else {
            grade.atan().sin_cos()
        };
        let g = self.gravity_m_per_s2;
        let rho_cdfa = self.air_density_kg_per_m3 * self.cdfa_m2;
        -((g / v) * (sin_theta + self.rrc * cos_theta) + 0.5 * rho_cdfa * v / self.veh_mass_kg)
    }

    /// Coast distance from `v0` down to `v_brake` at a constant grade, if the
    /// vehicle decelerates all the way to `v_brake`.
    fn coast_distance_constant_grade(&self, v0: f64, v_brake: f64, grade: f64) -> Option<f64> {
        let theta = grade.atan();
        let c1 = self.gravity_m_per_s2 * (theta.sin() + self.rrc * theta.cos());
        let c2 = (self.air_density_kg_per_m3 * self.cdfa_m2) / (2.0 * self.veh_mass_kg);
        let v02 = v0 * v0;
        let vb2 = v_brake * v_brake;
        if c2 == 0.0 {
            (c1 > 0.0).then(|| (v02 - vb2) / (2.0 * c1))
        } else {
            let a1 = c1 + c2 * v02;
            let b1 = c1 + c2 * vb2;
            (a1 > 0.0 && b1 > 0.0).then(|| (a1.ln() - b1.ln()) / (2.0 * c2))
        }
    }

    /// Distance (m) to come to a stop from `v0`: coast down to `v_brake`,
    /// then brake at constant `a_brake`.
    ///
    /// # Arguments
    ///
    /// * `distances_m` - grade breakpoints relative to the current position
    /// * `grades` - `grades[i]` applies over `(distances_m[i - 1], distances_m[i]]`;
    ///   the last grade holds past the last breakpoint
    /// * `integ` - bounds on the numeric integration used for varying grade
    ///
    /// Returns `Ok(None)` when the vehicle does not slow to `v_brake` within
    /// `integ.max_iter` steps or `integ.max_distance_m`.
    pub fn distance_to_stop_coast(
        &self,
        v0: f64,
        v_brake: f64,
        a_brake: f64,
        distances_m: &[f64],
        grades: &[f64],
        integ: &CoastIntegration,
    ) -> anyhow::Result<Option<f64>> {
        ensure!(
            !distances_m.is_empty() && distances_m.len() == grades.len(),
            "grade profile must be non-empty with matching lengths, got {} distances and {} grades",
            distances_m.len(),
            grades.len()
        );
        ensure!(integ.dt_s > 0.0, "{}", format_dbg!(integ.dt_s));
        ensure!(a_brake < 0.0, "{}", format_dbg!(a_brake));
        ensure!(
            v0.is_finite() && v0 >= 0.0 && v_brake.is_finite() && v_brake >= 0.0,
            "speeds must be finite and non-negative: {}, {}",
            format_dbg!(v0),
            format_dbg!(v_brake)
        );
        ensure!(self.veh_mass_kg > 0.0, "{}", format_dbg!(self.veh_mass_kg));

        if v0 <= v_brake {
            return Ok(Some(-0.5 * v0 * v0 / a_brake));
        }
        // distance traveled while stopping via friction-braking (i.e., distance to brake)
        let dtb = -0.5 * v_brake * v_brake / a_brake;

        let unique_grades = ndarrunique(&Array1::from_vec(grades.to_vec()));
        if unique_grades.len() == 1 {
            return Ok(self
                .coast_distance_constant_grade(v0, v_brake, unique_grades[0])
                .map(|d| d + dtb));
        }

        let grade_at = |d: f64| segment_lookup(d, distances_m, grades);
        let trapz_update =
            |v: f64, k: f64| v * (1.0 + 0.5 * k * integ.dt_s) / (1.0 - 0.5 * k * integ.dt_s);
        let d_max = integ.max_distance_m.unwrap_or(f64::INFINITY);
        let mut v = v0;
        let mut d = 0.0;
        for _ in 0..integ.max_iter {
            let mut k = self.dvdd(v, grade_at(d));
            if k >= 0.0 {
                return Ok(None);
            }
            let mut v_next = trapz_update(v, k);
            for _ in 0..COAST_REFINEMENTS {
                let vavg = 0.5 * (v + v_next);
                k = self.dvdd(vavg, grade_at(d + 0.5 * vavg * integ.dt_s));
                if k >= 0.0 {
                    return Ok(None);
                }
                v_next = trapz_update(v, k);
            }
            if v_next <= v_brake {
                // finish the last partial step exactly at the brake speed
                let vavg = 0.5 * (v + v_brake);
                let k_mid = self.dvdd(vavg, grade_at(d + 0.5 * vavg * integ.dt_s));
                if k_mid >= 0.0 {
                    return Ok(None);
                }
                d += (v_brake - v) / k_mid;
                return Ok((d <= d_max).then_some(d + dtb));
            }
            d += 0.5 * (v + v_next) * integ.dt_s;
            v = v_next;
            if d > d_max {
                return Ok(None);
            }
        }
        Ok(None)
    }
}

/// Calculate the derivative dv/dd (change in speed by change in distance)
/// of a freely coasting vehicle.
/// - v: the speed at which to evaluate dv/dd (m/s)
/// - grade: the road grade as a decimal fraction
///
/// RETURN: the dv/dd for these conditions, zero if `v <= 0`
pub fn calc_dvdd(
    v: f64,
    grade: f64,
    veh_mass_kg: f64,
    air_density_kg_per_m3: f64,
    cdfa_m2: f64,
    rrc: f64,
    gravity_m_per_s2: f64,
) -> f64 {
    RoadLoad {
        veh_mass_kg,
        air_density_kg_per_m3,
        cdfa_m2,
        rrc,
        gravity_m_per_s2,
    }
    .dvdd(v, grade)
}

/// Calculate the distance to stop via coasting from `v0` to `v_brake`
/// followed by braking at `a_brake`, in meters. See
/// [`RoadLoad::distance_to_stop_coast`]; integration uses time step `dt_s`
/// and the default bounds.
#[allow(clippy::too_many_arguments)]
pub fn calc_distance_to_stop_coast(
    v0: f64,
    v_brake: f64,
    a_brake: f64,
    distances_m: &[f64],
    grades: &[f64],
    veh_mass_kg: f64,
    air_density_kg_per_m3: f64,
    cdfa_m2: f64,
    rrc: f64,
    gravity_m_per_s2: f64,
    dt_s: f64,
) -> anyhow::Result<Option<f64>> {
    let road_load = RoadLoad {
        veh_mass_kg,
        air_density_kg_per_m3,
        cdfa_m2,
        rrc,
        gravity_m_per_s2,
    };
    road_load.distance_to_stop_coast(
        v0,
        v_brake,
        a_brake,
        distances_m,
        grades,
        &CoastIntegration {
            dt_s,
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    /// rolling resistance only: deceleration is a constant 1 m/s^2 on flat ground
    fn rolling_only() -> RoadLoad {
        RoadLoad {
            veh_mass_kg: 1_000.0,
            air_density_kg_per_m3: 0.0,
            cdfa_m2: 0.7,
            rrc: 0.1,
            gravity_m_per_s2: 10.0,
        }
    }

    #[test]
    fn test_dvdd() {
        assert_eq!(calc_dvdd(0.0, 0.0, 1_000.0, 1.2, 0.7, 0.1, 10.0), 0.0);
        assert_eq!(calc_dvdd(-1.0, 0.0, 1_000.0, 1.2, 0.7, 0.1, 10.0), 0.0);
        let k = calc_dvdd(20.0, 0.0, 1_000.0, 0.0, 0.7, 0.1, 10.0);
        assert!((k + 10.0 / 20.0 * 0.1).abs() < 1e-12);
        // drag adds 0.5 * rho * CdA * v / M
        let k_drag = calc_dvdd(20.0, 0.0, 1_000.0, 1.2, 0.7, 0.1, 10.0);
        assert!((k_drag - (k - 0.5 * 1.2 * 0.7 * 20.0 / 1_000.0)).abs() < 1e-12);
        // uphill decelerates harder than downhill
        assert!(calc_dvdd(20.0, 0.02, 1_000.0, 0.0, 0.7, 0.1, 10.0) < k);
        assert!(calc_dvdd(20.0, -0.02, 1_000.0, 0.0, 0.7, 0.1, 10.0) > k);
    }

    #[test]
    fn test_braking_only_when_below_brake_speed() {
        let d = calc_distance_to_stop_coast(
            5.0,
            7.5,
            -2.5,
            &[100.0],
            &[0.0],
            1_000.0,
            1.2,
            0.7,
            0.006,
            9.81,
            1.0,
        )
        .unwrap();
        assert_eq!(d, Some(5.0));
    }

    #[test]
    fn test_closed_form_with_rolling_resistance_only() {
        let d = calc_distance_to_stop_coast(
            20.0,
            7.5,
            -2.5,
            &[1_000.0, 2_000.0],
            &[0.0, 0.0],
            1_000.0,
            0.0,
            0.7,
            0.1,
            10.0,
            1.0,
        )
        .unwrap()
        .unwrap();
        // (20^2 - 7.5^2) / (2 * 1) + 7.5^2 / (2 * 2.5)
        assert!((d - 183.125).abs() < 1e-9);
    }

    #[test]
    fn test_closed_form_with_drag() {
        let rl = RoadLoad {
            air_density_kg_per_m3: 1.2,
            ..rolling_only()
        };
        let d = rl
            .distance_to_stop_coast(20.0, 7.5, -2.5, &[5_000.0], &[0.0], &Default::default())
            .unwrap()
            .unwrap();
        let c1: f64 = 1.0;
        let c2 = 1.2 * 0.7 / 2_000.0;
        let expected = ((c1 + c2 * 400.0) / (c1 + c2 * 56.25)).ln() / (2.0 * c2) + 11.25;
        assert!((d - expected).abs() < 1e-9);
        assert!(d < 183.125);
    }

    #[test]
    fn test_numeric_matches_closed_form_within_first_segment() {
        let rl = rolling_only();
        let d = rl
            .distance_to_stop_coast(
                20.0,
                7.5,
                -2.5,
                &[1_000.0, 2_000.0],
                &[0.0, 0.05],
                &Default::default(),
            )
            .unwrap()
            .unwrap();
        assert!((d - 183.125).abs() / 183.125 < 1e-3, "{d}");
    }

    #[test]
    fn test_uphill_shortens_coast() {
        let rl = RoadLoad {
            air_density_kg_per_m3: 1.2,
            ..rolling_only()
        };
        let integ = CoastIntegration::default();
        let flat = rl
            .distance_to_stop_coast(20.0, 7.5, -2.5, &[50.0, 5_000.0], &[0.0, 0.0], &integ)
            .unwrap()
            .unwrap();
        let uphill = rl
            .distance_to_stop_coast(20.0, 7.5, -2.5, &[50.0, 5_000.0], &[0.0, 0.02], &integ)
            .unwrap()
            .unwrap();
        assert!(uphill < flat);
        assert!(uphill > 50.0);
    }

    #[test]
    fn test_no_deceleration_downhill() {
        let rl = RoadLoad {
            rrc: 0.006,
            ..rolling_only()
        };
        let res = rl
            .distance_to_stop_coast(
                20.0,
                7.5,
                -2.5,
                &[100.0, 200.0],
                &[-0.05, -0.04],
                &Default::default(),
            )
            .unwrap();
        assert_eq!(res, None);
        // a single downhill grade without drag has no closed form either
        let res = rl
            .distance_to_stop_coast(20.0, 7.5, -2.5, &[100.0], &[-0.05], &Default::default())
            .unwrap();
        assert_eq!(res, None);
    }

    #[test]
    fn test_integration_bounds() {
        let rl = rolling_only();
        let grades = [0.0, 0.001];
        let capped = CoastIntegration {
            max_distance_m: Some(100.0),
            ..Default::default()
        };
        let short = rl
            .distance_to_stop_coast(20.0, 7.5, -2.5, &[50.0, 100.0], &grades, &capped)
            .unwrap();
        assert_eq!(short, None);
        let few_iters = CoastIntegration {
            max_iter: 3,
            ..Default::default()
        };
        let res = rl
            .distance_to_stop_coast(20.0, 7.5, -2.5, &[1_000.0, 2_000.0], &grades, &few_iters)
            .unwrap();
        assert_eq!(res, None);
    }

    #[test]
    fn test_last_grade_holds_past_last_breakpoint() {
        let rl = rolling_only();
        let d = rl
            .distance_to_stop_coast(
                20.0,
                7.5,
                -2.5,
                &[50.0, 100.0],
                &[0.0, 0.001],
                &Default::default(),
            )
            .unwrap()
            .unwrap();
        // 50 m flat, then the rest of the coast at grade 0.001
        let c1 = 10.0 * (0.001_f64.atan().sin() + 0.1 * 0.001_f64.atan().cos());
        let expected = 50.0 + (300.0 - 56.25) / (2.0 * c1) + 11.25;
        assert!((d - expected).abs() < 0.5, "{d} vs {expected}");

        // a slight grade change well short of where the coast ends
        let rl = RoadLoad::new(&Vehicle::mock_vehicle(), &PhysicalProperties::default());
        let integ = CoastIntegration::default();
        let flat = rl
            .distance_to_stop_coast(20.0, 7.5, -2.5, &[100.0, 400.0], &[0.0, 0.0], &integ)
            .unwrap()
            .unwrap();
        let bumpy = rl
            .distance_to_stop_coast(20.0, 7.5, -2.5, &[100.0, 400.0], &[0.0, 0.001], &integ)
            .unwrap()
            .unwrap();
        assert!(flat > 400.0);
        assert!(bumpy < flat);
        assert!(bumpy > 0.8 * flat);
    }

    #[test]
    fn test_no_road_load_never_slows() {
        let rl = RoadLoad {
            air_density_kg_per_m3: 0.0,
            rrc: 0.0,
            ..rolling_only()
        };
        let integ = CoastIntegration::default();
        let res = rl
            .distance_to_stop_coast(20.0, 7.5, -2.5, &[100.0], &[0.0], &integ)
            .unwrap();
        assert_eq!(res, None);
        let res = rl
            .distance_to_stop_coast(20.0, 7.5, -2.5, &[100.0, 200.0], &[0.0, 0.0], &integ)
            .unwrap();
        assert_eq!(res, None);
    }

    #[test]
    fn test_preconditions() {
        let rl = rolling_only();
        let integ = CoastIntegration::default();
        assert!(rl
            .distance_to_stop_coast(20.0, 7.5, -2.5, &[], &[], &integ)
            .is_err());
        assert!(rl
            .distance_to_stop_coast(20.0, 7.5, -2.5, &[1.0, 2.0], &[0.0], &integ)
            .is_err());
        assert!(rl
            .distance_to_stop_coast(20.0, 7.5, 0.0, &[1.0], &[0.0], &integ)
            .is_err());
        assert!(rl
            .distance_to_stop_coast(-1.0, 7.5, -2.5, &[1.0], &[0.0], &integ)
            .is_err());
        let zero_dt = CoastIntegration {
            dt_s: 0.0,
            ..Default::default()
        };
        assert!(rl
            .distance_to_stop_coast(20.0, 7.5, -2.5, &[1.0], &[0.0], &zero_dt)
            .is_err());
    }

    #[test]
    fn test_distance_to_next_stop() {
        let cyc = Cycle::trapezoid(20.0, 10.0, 45.0, 55.0, 100.0, 0.0).unwrap();
        assert!((distance_to_next_stop(300.0, &cyc).unwrap() - 600.0).abs() < 1e-9);
        assert!((distance_to_next_stop(0.0, &cyc).unwrap() - 900.0).abs() < 1e-9);
        assert_eq!(distance_to_next_stop(900.0, &cyc), None);
        assert_eq!(distance_to_next_stop(1_000.0, &cyc), None);
    }
}
