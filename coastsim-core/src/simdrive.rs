//! Module containing the step-wise drive simulation and its parameters.

use crate::cycle::{Cycle, CycleCache};
use crate::imports::*;
use crate::params::PhysicalProperties;
use crate::vehicle::Vehicle;

pub mod cyc_mods;
pub mod simdrive_impl;
pub mod simdrive_iter;

pub use simdrive_iter::SimDriveVec;

/// Solver and coasting parameters for [`SimDrive`]
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SimDriveParams {
    /// if true, the vehicle coasts toward upcoming stops instead of following the trace
    #[serde(default = "SimDriveParams::def_coast_allow")]
    pub coast_allow: bool,
    /// speed at which coasting starts \[m/s\]; zero or negative selects the
    /// automatic trigger based on distance to the next stop
    #[serde(default = "SimDriveParams::def_coast_start_speed_m_per_s")]
    pub coast_start_speed_m_per_s: f64,
    /// speed at which coasting gives way to friction braking \[m/s\]
    #[serde(
        alias = "coast_to_brake_speed_m_per_s",
        default = "SimDriveParams::def_coast_brake_start_speed_m_per_s"
    )]
    pub coast_brake_start_speed_m_per_s: f64,
    /// constant deceleration while friction braking to a stop \[m/s^2\], negative
    #[serde(default = "SimDriveParams::def_coast_brake_accel_m_per_s2")]
    pub coast_brake_accel_m_per_s2: f64,
    /// how far ahead \[s\] a coast already under way may be re-planned
    #[serde(default = "SimDriveParams::def_coast_time_horizon_for_adjustment_s")]
    pub coast_time_horizon_for_adjustment_s: f64,
    /// cap on the iterations of the coast-down distance integration
    #[serde(default = "SimDriveParams::def_coast_max_iter")]
    pub coast_max_iter: usize,
    /// Newton method gain for setting achieved speed
    #[serde(default = "SimDriveParams::def_newton_gain")]
    pub newton_gain: f64,
    /// max number of iterations allowed in setting achieved speed when trace
    /// cannot be achieved
    #[serde(default = "SimDriveParams::def_newton_max_iter")]
    pub newton_max_iter: u32,
    /// relative tolerance on the change in speed guess when setting achieved speed
    #[serde(default = "SimDriveParams::def_newton_xtol")]
    pub newton_xtol: f64,
    /// allowed fractional miss of total distance
    #[serde(default = "SimDriveParams::def_trace_miss_dist_tol")]
    pub trace_miss_dist_tol: f64,
    /// allowed miss of speed at any step \[m/s\]
    #[serde(default = "SimDriveParams::def_trace_miss_speed_mps_tol")]
    pub trace_miss_speed_mps_tol: f64,
    /// allowed relative error in the wheel energy balance
    #[serde(default = "SimDriveParams::def_energy_audit_error_tol")]
    pub energy_audit_error_tol: f64,
}

impl SimDriveParams {
    fn def_coast_allow() -> bool {
        Self::default().coast_allow
    }
    fn def_coast_start_speed_m_per_s() -> f64 {
        Self::default().coast_start_speed_m_per_s
    }
    fn def_coast_brake_start_speed_m_per_s() -> f64 {
        Self::default().coast_brake_start_speed_m_per_s
    }
    fn def_coast_brake_accel_m_per_s2() -> f64 {
        Self::default().coast_brake_accel_m_per_s2
    }
    fn def_coast_time_horizon_for_adjustment_s() -> f64 {
        Self::default().coast_time_horizon_for_adjustment_s
    }
    fn def_coast_max_iter() -> usize {
        Self::default().coast_max_iter
    }
    fn def_newton_gain() -> f64 {
        Self::default().newton_gain
    }
    fn def_newton_max_iter() -> u32 {
        Self::default().newton_max_iter
    }
    fn def_newton_xtol() -> f64 {
        Self::default().newton_xtol
    }
    fn def_trace_miss_dist_tol() -> f64 {
        Self::default().trace_miss_dist_tol
    }
    fn def_trace_miss_speed_mps_tol() -> f64 {
        Self::default().trace_miss_speed_mps_tol
    }
    fn def_energy_audit_error_tol() -> f64 {
        Self::default().energy_audit_error_tol
    }

    /// True when coasting starts from the distance-to-stop comparison rather
    /// than a fixed speed
    pub fn coast_auto_start(&self) -> bool {
        self.coast_start_speed_m_per_s <= 0.0
    }
}

impl Default for SimDriveParams {
    fn default() -> Self {
        Self {
            coast_allow: false,
            coast_start_speed_m_per_s: -1.0,
            coast_brake_start_speed_m_per_s: 7.5,
            coast_brake_accel_m_per_s2: -2.5,
            coast_time_horizon_for_adjustment_s: 20.0,
            coast_max_iter: 10_000,
            newton_gain: 0.9,
            newton_max_iter: 100,
            newton_xtol: 1e-9,
            trace_miss_dist_tol: 1e-3,
            trace_miss_speed_mps_tol: 1.0,
            energy_audit_error_tol: 0.002,
        }
    }
}

impl SerdeAPI for SimDriveParams {
    fn init(&mut self) -> anyhow::Result<()> {
        ensure!(
            self.coast_brake_accel_m_per_s2 < 0.0,
            "{}",
            format_dbg!(self.coast_brake_accel_m_per_s2)
        );
        ensure!(
            self.coast_brake_start_speed_m_per_s >= 0.0,
            "{}",
            format_dbg!(self.coast_brake_start_speed_m_per_s)
        );
        ensure!(
            self.coast_time_horizon_for_adjustment_s > 0.0,
            "{}",
            format_dbg!(self.coast_time_horizon_for_adjustment_s)
        );
        ensure!(self.coast_max_iter > 0, "{}", format_dbg!(self.coast_max_iter));
        ensure!(
            self.newton_gain > 0.0 && self.newton_gain <= 1.0,
            "{}",
            format_dbg!(self.newton_gain)
        );
        ensure!(self.newton_max_iter > 0, "{}", format_dbg!(self.newton_max_iter));
        Ok(())
    }
}

/// Where the vehicle is in a coast-to-stop maneuver
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CoastState {
    /// following the trace
    #[default]
    NotCoasting,
    /// propulsion off, following a planned deceleration toward brake initiation
    Coasting,
    /// friction braking to a stop
    Braking,
}

/// Drive simulation of a [`Vehicle`] over a [`Cycle`].
///
/// `cyc0` is the reference trace; `cyc` is the working copy that coasting
/// rewrites and into which achieved speeds are recorded.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SimDrive {
    pub veh: Vehicle,
    pub cyc: Cycle,
    pub cyc0: Cycle,
    #[serde(skip)]
    pub cyc0_cache: CycleCache,
    pub sim_params: SimDriveParams,
    pub props: PhysicalProperties,
    /// step counter
    pub i: usize,
    pub coast_state: CoastState,
    /// number of coast maneuvers started
    pub coast_events: usize,
    // time series
    pub mps_ach: Array1<f64>,
    pub dist_m: Array1<f64>,
    pub grade: Array1<f64>,
    pub impose_coast: Array1<bool>,
    pub cyc_met: Array1<bool>,
    pub newton_iters: Array1<u32>,
    pub cur_max_trac_kw: Array1<f64>,
    pub drag_kw: Array1<f64>,
    pub accel_kw: Array1<f64>,
    pub ascent_kw: Array1<f64>,
    pub rr_kw: Array1<f64>,
    pub cyc_whl_kw_req: Array1<f64>,
    pub trac_kw_out_ach: Array1<f64>,
    pub brake_kw: Array1<f64>,
    pub pt_kw_in: Array1<f64>,
    // post-processing scalars
    pub dist_total_m: f64,
    pub drag_kj: f64,
    pub ascent_kj: f64,
    pub rr_kj: f64,
    pub brake_kj: f64,
    pub aux_kj: f64,
    pub pt_kj_in: f64,
    pub trac_kj: f64,
    pub ke_kj: f64,
    pub net_kj: f64,
    pub energy_audit_error: f64,
    pub trace_miss: bool,
    pub trace_miss_dist_frac: f64,
    pub trace_miss_speed_mps: f64,
}

impl SerdeAPI for SimDrive {
    fn init(&mut self) -> anyhow::Result<()> {
        self.cyc0.init()?;
        self.cyc.init()?;
        self.veh.init()?;
        self.sim_params.init()?;
        self.props.init()?;
        self.cyc0_cache = self.cyc0.build_cache();
        Ok(())
    }
}

/// Headline results of a [`SimDrive`] run
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SimDriveSummary {
    pub cycle: String,
    pub vehicle: String,
    pub coast_allow: bool,
    pub duration_s: f64,
    pub dist_total_m: f64,
    pub max_speed_m_per_s: f64,
    pub coast_events: usize,
    /// steps during which propulsion was cut for coasting or braking
    pub coast_steps: usize,
    pub pt_kj_in: f64,
    pub drag_kj: f64,
    pub ascent_kj: f64,
    pub rr_kj: f64,
    pub brake_kj: f64,
    pub aux_kj: f64,
    pub energy_audit_error: f64,
    pub trace_miss: bool,
    pub trace_miss_dist_frac: f64,
    pub trace_miss_speed_mps: f64,
}

impl SerdeAPI for SimDriveSummary {}
