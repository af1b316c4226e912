//! Module containing the drive cycle, its distance bookkeeping, and the
//! splicing operations that overwrite parts of its speed trace.

use itertools::Itertools;

use crate::imports::*;
use crate::params::STOPPED_SPEED_M_PER_S;
use crate::trajectory::{calc_constant_jerk_trajectory, speed_for_constant_jerk, Trajectory};
use crate::utils::{interpolate, ndarrcumsum, segment_lookup};

/// Distance covered in each step using the speed reported at the end of the
/// step, `mps[i] * (time_s[i] - time_s[i - 1])`.
/// This is the convention used for reporting, and it disagrees with the
/// trapezoidal distance whenever speed changes within a step.
pub fn reported_step_distances(time_s: &Array1<f64>, mps: &Array1<f64>) -> Array1<f64> {
    let mut dists: Vec<f64> = Vec::with_capacity(time_s.len());
    if !time_s.is_empty() {
        dists.push(0.0);
    }
    for i in 1..time_s.len() {
        dists.push(mps[i] * (time_s[i] - time_s[i - 1]));
    }
    Array1::from_vec(dists)
}

/// Distance covered in each step by trapezoidal integration of speed.
/// The first element is always zero.
pub fn trapz_step_distances(time_s: &Array1<f64>, mps: &Array1<f64>) -> Array1<f64> {
    let mut dists: Vec<f64> = Vec::with_capacity(time_s.len());
    if !time_s.is_empty() {
        dists.push(0.0);
    }
    for i in 1..time_s.len() {
        dists.push((time_s[i] - time_s[i - 1]) * 0.5 * (mps[i] + mps[i - 1]));
    }
    Array1::from_vec(dists)
}

/// One row of a cycle as stored in CSV files
#[derive(Default, PartialEq, Clone, Debug, Deserialize, Serialize)]
pub struct CycleElement {
    /// time [s]
    #[serde(alias = "cycSecs")]
    pub time_s: f64,
    /// speed [m/s]
    #[serde(alias = "cycMps")]
    pub mps: f64,
    /// grade [rise/run]
    #[serde(alias = "cycGrade")]
    pub grade: Option<f64>,
    /// road type indicator
    #[serde(alias = "cycRoadType")]
    pub road_type: Option<f64>,
}

/// Drive cycle: time, speed, grade, and road type sampled at the same points,
/// plus per-step durations and distances derived from them.
///
/// The derived arrays are never serialized. [`Cycle::rebuild_derived`]
/// rebuilds them on load, and speed edits refresh the distances from the
/// first edited sample on.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Cycle {
    /// array of time [s]
    #[serde(alias = "cycSecs")]
    time_s: Array1<f64>,
    /// array of speed [m/s]
    #[serde(alias = "cycMps")]
    mps: Array1<f64>,
    /// array of grade [rise/run]
    #[serde(alias = "cycGrade")]
    #[serde(default)]
    grade: Array1<f64>,
    /// array of road type indicators
    #[serde(alias = "cycRoadType")]
    #[serde(default)]
    road_type: Array1<f64>,
    #[serde(default)]
    pub name: String,
    /// step durations, `secs[0] == 0`
    #[serde(skip)]
    secs: Array1<f64>,
    #[serde(skip)]
    dist_v1_m: Array1<f64>,
    #[serde(skip)]
    dist_v2_m: Array1<f64>,
    #[serde(skip)]
    cumu_dist_v2_m: Array1<f64>,
}

impl SerdeAPI for Cycle {
    fn init(&mut self) -> anyhow::Result<()> {
        let cyc_len = self.len();
        if self.grade.is_empty() {
            self.grade = Array1::zeros(cyc_len);
        }
        if self.road_type.is_empty() {
            self.road_type = Array1::zeros(cyc_len);
        }
        self.init_checks()?;
        self.rebuild_derived();
        Ok(())
    }

    fn write_csv<W: std::io::Write>(&self, wtr: W) -> anyhow::Result<()> {
        let mut wtr = csv::Writer::from_writer(wtr);
        for i in 0..self.len() {
            wtr.serialize(CycleElement {
                time_s: self.time_s[i],
                mps: self.mps[i],
                grade: Some(self.grade[i]),
                road_type: Some(self.road_type[i]),
            })?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Cycles read from CSV get an empty name; use [`Cycle::from_csv_str`] or
    /// [`Cycle::from_csv_file`] to set one.
    fn read_csv<R: std::io::Read>(rdr: R) -> anyhow::Result<Self> {
        let elems = csv::Reader::from_reader(rdr)
            .deserialize()
            .enumerate()
            .map(|(row, res)| {
                res.with_context(|| format!("Could not parse cycle CSV row {}", row + 1))
            })
            .collect::<anyhow::Result<Vec<CycleElement>>>()?;
        Ok(Self::from_elements(elems))
    }
}

impl Cycle {
    /// Build a cycle from its sampled arrays. Empty `grade` or `road_type`
    /// default to zeros.
    pub fn new(
        time_s: Vec<f64>,
        mps: Vec<f64>,
        grade: Vec<f64>,
        road_type: Vec<f64>,
        name: &str,
    ) -> anyhow::Result<Self> {
        let mut cyc = Self {
            time_s: Array1::from_vec(time_s),
            mps: Array1::from_vec(mps),
            grade: Array1::from_vec(grade),
            road_type: Array1::from_vec(road_type),
            name: name.to_string(),
            ..Default::default()
        };
        cyc.init()
            .with_context(|| format!("Invalid cycle {:?}", cyc.name))?;
        Ok(cyc)
    }

    fn from_elements(elems: Vec<CycleElement>) -> Self {
        Self {
            time_s: elems.iter().map(|e| e.time_s).collect(),
            mps: elems.iter().map(|e| e.mps).collect(),
            grade: elems.iter().map(|e| e.grade.unwrap_or_default()).collect(),
            road_type: elems
                .iter()
                .map(|e| e.road_type.unwrap_or_default())
                .collect(),
            ..Default::default()
        }
    }

    /// Trapezoidal cycle at 1 s resolution: accelerate from rest to
    /// `cruise_m_per_s` by `accel_end_s`, hold until `decel_start_s`, reach
    /// rest at `stop_s`, then idle until `end_s`.
    pub fn trapezoid(
        cruise_m_per_s: f64,
        accel_end_s: f64,
        decel_start_s: f64,
        stop_s: f64,
        end_s: f64,
        grade: f64,
    ) -> anyhow::Result<Self> {
        let breakpoints = array![0.0, accel_end_s, decel_start_s, stop_s, end_s];
        ensure!(
            breakpoints.iter().tuple_windows().all(|(a, b)| a < b),
            "trapezoid breakpoints must be strictly increasing: {:?}",
            breakpoints
        );
        let speeds = array![0.0, cruise_m_per_s, cruise_m_per_s, 0.0, 0.0];
        let num_samples = end_s.floor() as usize + 1;
        let time_s: Vec<f64> = (0..num_samples).map(|t| t as f64).collect();
        let mps: Vec<f64> = time_s
            .iter()
            .map(|&t| interpolate(t, &breakpoints, &speeds, false))
            .collect();
        Self::new(
            time_s,
            mps,
            vec![grade; num_samples],
            vec![],
            "trapezoid",
        )
    }

    fn init_checks(&self) -> anyhow::Result<()> {
        ensure!(!self.is_empty(), "Cycle is empty");
        ensure!(
            self.are_fields_equal_length(),
            "Cycle has unequal field lengths\ntime_s: {}\nmps: {}\ngrade: {}\nroad_type: {}",
            self.time_s.len(),
            self.mps.len(),
            self.grade.len(),
            self.road_type.len(),
        );
        ensure!(self.is_sorted(), "Cycle time is not strictly increasing");
        ensure!(
            self.time_s.iter().all(|t| t.is_finite()),
            "Cycle time contains non-finite values"
        );
        if let Some((i, v)) = self
            .mps
            .iter()
            .find_position(|v| !v.is_finite() || **v < 0.0)
        {
            bail!("Cycle speed at index {} is invalid: {}", i, v);
        }
        ensure!(
            self.grade.iter().all(|g| g.is_finite()),
            "Cycle grade contains non-finite values"
        );
        Ok(())
    }

    /// Recompute step durations and the v1/v2 distance arrays from time and speed
    pub fn rebuild_derived(&mut self) {
        let mut secs = Array1::zeros(self.len());
        for (i, (t0, t1)) in self.time_s.iter().tuple_windows().enumerate() {
            secs[i + 1] = t1 - t0;
        }
        self.secs = secs;
        self.dist_v1_m = reported_step_distances(&self.time_s, &self.mps);
        self.dist_v2_m = trapz_step_distances(&self.time_s, &self.mps);
        self.cumu_dist_v2_m = ndarrcumsum(&self.dist_v2_m);
    }

    /// Recompute the distance arrays at and after sample `i`, for speeds that
    /// changed only from `i` on. Time, and so `secs`, must be unchanged.
    fn rebuild_distances_from(&mut self, i: usize) {
        let len = self.len();
        if i >= len {
            return;
        }
        for idx in i.max(1)..len {
            self.dist_v1_m[idx] = self.mps[idx] * self.secs[idx];
            self.dist_v2_m[idx] = self.secs[idx] * 0.5 * (self.mps[idx] + self.mps[idx - 1]);
        }
        let mut cumu = if i == 0 {
            0.0
        } else {
            self.cumu_dist_v2_m[i - 1]
        };
        for idx in i..len {
            cumu += self.dist_v2_m[idx];
            self.cumu_dist_v2_m[idx] = cumu;
        }
    }

    /// Load cycle from CSV file, parsing name from filepath
    pub fn from_csv_file<P: AsRef<Path>>(filepath: P) -> anyhow::Result<Self> {
        let filepath = filepath.as_ref();
        let name = filepath
            .file_stem()
            .and_then(OsStr::to_str)
            .with_context(|| format!("Could not parse cycle name from filepath: {filepath:?}"))?
            .to_string();
        let mut cyc = Self::from_file(filepath)?;
        cyc.name = name;
        Ok(cyc)
    }

    /// Load cycle from CSV string
    pub fn from_csv_str<S: AsRef<str>>(csv_str: S, name: &str) -> anyhow::Result<Self> {
        let mut cyc = Self::from_str(csv_str, "csv")?;
        cyc.name = name.to_string();
        Ok(cyc)
    }

    /// Write (serialize) cycle to a CSV string
    pub fn to_csv(&self) -> anyhow::Result<String> {
        let mut buf = Vec::with_capacity(self.len());
        self.to_writer(&mut buf, "csv")?;
        Ok(String::from_utf8(buf)?)
    }

    pub fn build_cache(&self) -> CycleCache {
        CycleCache::new(self)
    }

    pub fn len(&self) -> usize {
        self.time_s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sorted(&self) -> bool {
        self.time_s.iter().tuple_windows().all(|(a, b)| a < b)
    }

    pub fn are_fields_equal_length(&self) -> bool {
        let cyc_len = self.len();
        [self.mps.len(), self.grade.len(), self.road_type.len()]
            .iter()
            .all(|len| len == &cyc_len)
    }

    pub fn time_s(&self) -> &Array1<f64> {
        &self.time_s
    }

    pub fn mps(&self) -> &Array1<f64> {
        &self.mps
    }

    pub fn grade(&self) -> &Array1<f64> {
        &self.grade
    }

    pub fn road_type(&self) -> &Array1<f64> {
        &self.road_type
    }

    /// step durations [s]
    pub fn secs(&self) -> &Array1<f64> {
        &self.secs
    }

    /// duration of step i [s], zero for i == 0
    pub fn dt_s_at_i(&self, i: usize) -> f64 {
        self.secs[i]
    }

    /// distance covered in each step based on the speed at the end of the step
    pub fn dist_m(&self) -> &Array1<f64> {
        &self.dist_v1_m
    }

    /// distance covered in each step by trapezoidal integration
    pub fn dist_v2_m(&self) -> &Array1<f64> {
        &self.dist_v2_m
    }

    /// cumulative trapezoidal distance at each sample point
    pub fn cumu_dist_v2_m(&self) -> &Array1<f64> {
        &self.cumu_dist_v2_m
    }

    /// Overwrite the speed at `i`, e.g. with the speed a vehicle actually achieved
    pub fn set_speed(&mut self, i: usize, mps: f64) -> anyhow::Result<()> {
        ensure!(
            i < self.len(),
            "index {} out of range for cycle of length {}",
            i,
            self.len()
        );
        ensure!(mps.is_finite() && mps >= 0.0, "{}", format_dbg!(mps));
        self.mps[i] = mps;
        self.rebuild_distances_from(i);
        Ok(())
    }

    /// Average speed over each step [m/s], zero for step 0
    pub fn average_step_speeds(&self) -> Array1<f64> {
        let mut result: Vec<f64> = Vec::with_capacity(self.len());
        result.push(0.0);
        for i in 1..self.len() {
            result.push(self.average_step_speed_at(i));
        }
        Array1::from_vec(result)
    }

    /// Average speed from sample point i-1 to i [m/s]
    pub fn average_step_speed_at(&self, i: usize) -> f64 {
        0.5 * (self.mps[i] + self.mps[i - 1])
    }

    /// The distance traveled from start at the beginning of step i
    /// (i.e., distance traveled up to sample point i-1)
    pub fn trapz_step_start_distance(&self, i: usize) -> f64 {
        if i == 0 {
            0.0
        } else {
            self.cumu_dist_v2_m[(i - 1).min(self.len() - 1)]
        }
    }

    /// The distance traveled during step i in meters
    pub fn trapz_distance_for_step(&self, i: usize) -> f64 {
        self.dist_v2_m[i]
    }

    /// Distance from the start of step `i_start` to the start of step `i_end`
    pub fn trapz_distance_over_range(&self, i_start: usize, i_end: usize) -> f64 {
        let i_end = i_end.min(self.len());
        if i_start >= i_end {
            return 0.0;
        }
        self.dist_v2_m.slice(s![i_start..i_end]).sum()
    }

    /// Time spent moving [s]. A step counts as moving when its average speed
    /// exceeds `stopped_speed_m_per_s` (default 0).
    pub fn time_spent_moving(&self, stopped_speed_m_per_s: Option<f64>) -> f64 {
        let stopped_speed_m_per_s = stopped_speed_m_per_s.unwrap_or(0.0);
        (1..self.len())
            .filter(|&i| self.average_step_speed_at(i) > stopped_speed_m_per_s)
            .map(|i| self.secs[i])
            .sum()
    }

    /// Average grade over the given range of distances, using `cache` when one
    /// is supplied
    pub fn average_grade_over_range(
        &self,
        distance_start_m: f64,
        delta_distance_m: f64,
        cache: Option<&CycleCache>,
    ) -> f64 {
        match cache {
            Some(cc) => cc.average_grade_over_range(distance_start_m, delta_distance_m),
            None => self
                .build_cache()
                .average_grade_over_range(distance_start_m, delta_distance_m),
        }
    }

    /// Overwrite the speeds of samples `i..i + n` with a constant-jerk
    /// trajectory anchored at sample `i - 1`.
    ///
    /// # Arguments
    ///
    /// * `i` - first sample to overwrite, at least 1
    /// * `n` - number of samples to overwrite; the window is clipped at the end of the cycle
    /// * `jerk_m_per_s3` - jerk of the trajectory
    /// * `accel0_m_per_s2` - acceleration over the first step
    ///
    /// Negative speeds are written as zero. Returns the last speed written.
    /// Assumes a uniform step duration over the window.
    pub fn modify_by_const_jerk_trajectory(
        &mut self,
        i: usize,
        n: usize,
        jerk_m_per_s3: f64,
        accel0_m_per_s2: f64,
    ) -> anyhow::Result<f64> {
        let num_samples = self.len();
        ensure!(n >= 1, "trajectory must cover at least one step");
        ensure!(
            i >= 1 && i < num_samples,
            "trajectory start index {} must be in [1, {})",
            i,
            num_samples
        );
        ensure!(
            jerk_m_per_s3.is_finite() && accel0_m_per_s2.is_finite(),
            "non-finite trajectory: {}, {}",
            format_dbg!(jerk_m_per_s3),
            format_dbg!(accel0_m_per_s2)
        );
        let v0 = self.mps[i - 1];
        let dt = self.dt_s_at_i(i);
        let mut v = v0;
        for ni in 1..=n {
            let idx_to_set = (i - 1) + ni;
            if idx_to_set >= num_samples {
                break;
            }
            v = speed_for_constant_jerk(ni, v0, accel0_m_per_s2, jerk_m_per_s3, dt).max(0.0);
            self.mps[idx_to_set] = v;
        }
        self.rebuild_distances_from(i);
        Ok(v)
    }

    /// Splice in a braking trajectory starting at sample `i` that stops from
    /// `mps[i - 1]`.
    ///
    /// The stop lands `dts_m` ahead when that is given and reachable without
    /// speeding up or dipping below zero. Otherwise it lands where a constant
    /// `brake_accel_m_per_s2` would stop.
    ///
    /// Returns the number of steps the maneuver takes, or 0 if the vehicle
    /// is already stopped (nothing is modified).
    pub fn modify_with_braking_trajectory(
        &mut self,
        brake_accel_m_per_s2: f64,
        i: usize,
        dts_m: Option<f64>,
    ) -> anyhow::Result<usize> {
        ensure!(
            brake_accel_m_per_s2 < 0.0,
            "{}",
            format_dbg!(brake_accel_m_per_s2)
        );
        ensure!(
            i >= 1 && i < self.len(),
            "braking start index {} must be in [1, {})",
            i,
            self.len()
        );
        let v0 = self.mps[i - 1];
        if v0 <= STOPPED_SPEED_M_PER_S {
            return Ok(0);
        }
        let dt = self.dt_s_at_i(i);
        let targeted = match dts_m {
            Some(dts_m) if dts_m.is_finite() && dts_m > 0.0 => {
                Some(plan_braking(v0, dts_m, dt)?).filter(|(n, traj)| traj.slows_to_rest(*n))
            }
            _ => None,
        };
        let (n, traj) = match targeted {
            Some(plan) => plan,
            // distance-to-stop at constant deceleration (m)
            None => plan_braking(v0, -0.5 * v0 * v0 / brake_accel_m_per_s2, dt)?,
        };
        self.modify_by_const_jerk_trajectory(i, n, traj.jerk_m_per_s3, traj.accel0_m_per_s2)?;
        let i_end = (i + n).min(self.len());
        self.mps
            .slice_mut(s![i..i_end])
            .mapv_inplace(|v| if v <= STOPPED_SPEED_M_PER_S { 0.0 } else { v });
        self.rebuild_distances_from(i);
        Ok(n)
    }
}

/// Constant-jerk maneuver stopping from `v0` after `dts_m`, taking as many
/// whole steps as a constant deceleration over `dts_m` would need.
fn plan_braking(v0: f64, dts_m: f64, dt: f64) -> anyhow::Result<(usize, Trajectory)> {
    // time-to-stop (s)
    let tts_s = 2.0 * dts_m / v0;
    let n = ((tts_s / dt) - 1e-9).ceil().max(1.0) as usize;
    if n == 1 {
        // stopping within one step cannot honor the distance exactly
        let traj = Trajectory {
            d0_m: 0.0,
            v0_m_per_s: v0,
            accel0_m_per_s2: -v0 / dt,
            jerk_m_per_s3: 0.0,
            dt_s: dt,
        };
        return Ok((1, traj));
    }
    Ok((n, calc_constant_jerk_trajectory(n, 0.0, v0, dts_m, 0.0, dt)?))
}

/// Overwrite `n` speeds of `cyc` starting at `start_index` with a
/// constant-jerk trajectory. See [`Cycle::modify_by_const_jerk_trajectory`].
pub fn modify_cycle_with_trajectory(
    cyc: &mut Cycle,
    start_index: usize,
    n: usize,
    jerk_m_per_s3: f64,
    accel0_m_per_s2: f64,
) -> anyhow::Result<f64> {
    cyc.modify_by_const_jerk_trajectory(start_index, n, jerk_m_per_s3, accel0_m_per_s2)
}

/// Splice a braking trajectory into `cyc` at `start_index`.
/// See [`Cycle::modify_with_braking_trajectory`].
pub fn modify_cycle_adding_braking_trajectory(
    cyc: &mut Cycle,
    brake_accel_m_per_s2: f64,
    start_index: usize,
) -> anyhow::Result<usize> {
    cyc.modify_with_braking_trajectory(brake_accel_m_per_s2, start_index, None)
}

/// Distance-indexed lookups over a reference cycle
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CycleCache {
    pub grade_all_zero: bool,
    pub trapz_distances_m: Array1<f64>,
    pub trapz_elevations_m: Array1<f64>,
    pub stops: Array1<bool>,
    grades: Array1<f64>,
}

impl SerdeAPI for CycleCache {}

impl CycleCache {
    pub fn new(cyc: &Cycle) -> Self {
        let num_items = cyc.len();
        let grade_all_zero = cyc.grade.iter().all(|g| *g == 0.0);
        let trapz_elevations_m = if grade_all_zero {
            Array1::zeros(num_items)
        } else {
            let xs: Array1<f64> = cyc
                .grade
                .iter()
                .zip(&cyc.dist_v2_m)
                .map(|(g, dd)| g.atan().cos() * dd * g)
                .collect();
            ndarrcumsum(&xs)
        };
        Self {
            grade_all_zero,
            trapz_distances_m: cyc.cumu_dist_v2_m.clone(),
            trapz_elevations_m,
            stops: cyc.mps.mapv(|v| v <= STOPPED_SPEED_M_PER_S),
            grades: cyc.grade.clone(),
        }
    }

    /// Grade at the given distance, where the grade at i applies from
    /// sample point (i-1, i]
    pub fn interp_grade(&self, dist_m: f64) -> f64 {
        if self.grade_all_zero {
            0.0
        } else {
            segment_lookup(
                dist_m,
                self.trapz_distances_m.as_slice().unwrap_or(&[]),
                self.grades.as_slice().unwrap_or(&[]),
            )
        }
    }

    /// Interpolate the elevation at the given distance
    pub fn interp_elevation(&self, dist_m: f64) -> f64 {
        if self.grade_all_zero {
            0.0
        } else {
            interpolate(
                dist_m,
                &self.trapz_distances_m,
                &self.trapz_elevations_m,
                false,
            )
        }
    }

    /// Average grade (rise over run) over `[distance_start_m, distance_start_m + delta_distance_m]`
    pub fn average_grade_over_range(&self, distance_start_m: f64, delta_distance_m: f64) -> f64 {
        let tol = 1e-6;
        if self.grade_all_zero {
            0.0
        } else if delta_distance_m <= tol {
            self.interp_grade(distance_start_m)
        } else {
            let e0 = self.interp_elevation(distance_start_m);
            let e1 = self.interp_elevation(distance_start_m + delta_distance_m);
            ((e1 - e0) / delta_distance_m).clamp(-1.0, 1.0).asin().tan()
        }
    }

    /// Grade breakpoints ahead of `distance_m`, as distances relative to
    /// `distance_m` paired with the grade that applies up to each of them.
    /// Past the end of the cycle the last grade holds.
    pub fn grade_profile_from(&self, distance_m: f64) -> (Array1<f64>, Array1<f64>) {
        let last_grade = self.grades.last().copied().unwrap_or_default();
        let (dists, grades): (Vec<f64>, Vec<f64>) = self
            .trapz_distances_m
            .iter()
            .zip(self.grades.iter())
            .filter(|(d, _)| **d > distance_m)
            .map(|(d, g)| (d - distance_m, if self.grade_all_zero { 0.0 } else { *g }))
            .unzip();
        if dists.is_empty() {
            (array![0.0], array![last_grade])
        } else {
            (Array1::from_vec(dists), Array1::from_vec(grades))
        }
    }
}
