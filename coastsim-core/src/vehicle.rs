//! Module containing the vehicle road-load and powertrain description.

use crate::imports::*;
use crate::utils::interpolate;

/// Read-only vehicle parameters used by the drive simulation
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Vehicle {
    /// descriptive name of the vehicle
    #[serde(default)]
    pub scenario_name: String,
    /// total test mass \[kg\]
    pub veh_kg: f64,
    /// aerodynamic drag coefficient
    pub drag_coef: f64,
    /// frontal area \[m^2\]
    pub frontal_area_m2: f64,
    /// rolling resistance coefficient
    pub wheel_rr_coef: f64,
    /// maximum tractive power at the wheels \[kW\]
    pub max_trac_kw: f64,
    /// constant auxiliary load \[kW\]
    #[serde(default)]
    pub aux_kw: f64,
    /// fraction of `max_trac_kw` at which each `pt_eff_map` value applies
    pub pt_pwr_out_frac: Array1<f64>,
    /// powertrain efficiency from fuel/energy input to wheel output
    pub pt_eff_map: Array1<f64>,
}

impl SerdeAPI for Vehicle {
    fn init(&mut self) -> anyhow::Result<()> {
        self.init_checks()
    }
}

impl Vehicle {
    fn init_checks(&self) -> anyhow::Result<()> {
        ensure!(self.veh_kg > 0.0, "{}", format_dbg!(self.veh_kg));
        ensure!(self.drag_coef >= 0.0, "{}", format_dbg!(self.drag_coef));
        ensure!(
            self.frontal_area_m2 >= 0.0,
            "{}",
            format_dbg!(self.frontal_area_m2)
        );
        ensure!(self.wheel_rr_coef >= 0.0, "{}", format_dbg!(self.wheel_rr_coef));
        ensure!(self.max_trac_kw > 0.0, "{}", format_dbg!(self.max_trac_kw));
        ensure!(self.aux_kw >= 0.0, "{}", format_dbg!(self.aux_kw));
        ensure!(
            self.pt_pwr_out_frac.len() == self.pt_eff_map.len() && self.pt_eff_map.len() >= 2,
            "efficiency curve needs at least 2 points of matching length\npt_pwr_out_frac: {}\npt_eff_map: {}",
            self.pt_pwr_out_frac.len(),
            self.pt_eff_map.len()
        );
        ensure!(
            self.pt_eff_map.iter().all(|eff| *eff > 0.0 && *eff <= 1.0),
            "efficiencies must be in (0, 1]: {:?}",
            self.pt_eff_map
        );
        Ok(())
    }

    /// Drag coefficient times frontal area \[m^2\]
    pub fn cdfa_m2(&self) -> f64 {
        self.drag_coef * self.frontal_area_m2
    }

    /// Powertrain efficiency at the given fraction of max tractive power
    pub fn pt_eff_at(&self, pwr_out_frac: f64) -> f64 {
        interpolate(
            pwr_out_frac.clamp(0.0, 1.0),
            &self.pt_pwr_out_frac,
            &self.pt_eff_map,
            false,
        )
    }

    pub fn mock_vehicle() -> Self {
        Self {
            scenario_name: String::from("2016 FORD Escape 4cyl 2WD"),
            veh_kg: 1_701.0,
            drag_coef: 0.355,
            frontal_area_m2: 3.066,
            wheel_rr_coef: 0.007,
            max_trac_kw: 115.0,
            aux_kw: 0.7,
            pt_pwr_out_frac: array![
                0.0, 0.005, 0.015, 0.04, 0.06, 0.1, 0.14, 0.2, 0.4, 0.6, 0.8, 1.0,
            ],
            pt_eff_map: array![
                0.1, 0.12, 0.16, 0.22, 0.28, 0.33, 0.35, 0.36, 0.35, 0.34, 0.32, 0.3,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_vehicle_is_valid() {
        let veh = Vehicle::mock_vehicle();
        assert!(veh.init_checks().is_ok());
        assert!((veh.cdfa_m2() - 0.355 * 3.066).abs() < 1e-12);
    }

    #[test]
    fn test_efficiency_lookup() {
        let veh = Vehicle::mock_vehicle();
        assert!((veh.pt_eff_at(0.2) - 0.36).abs() < 1e-12);
        assert!((veh.pt_eff_at(0.3) - 0.355).abs() < 1e-12);
        assert!((veh.pt_eff_at(1.5) - 0.3).abs() < 1e-12);
        assert_eq!(veh.pt_eff_at(-0.5), 0.1);
    }

    #[test]
    fn test_yaml_round_trip_and_validation() {
        let veh = Vehicle::mock_vehicle();
        let yaml = veh.to_yaml().unwrap();
        assert_eq!(Vehicle::from_yaml(&yaml).unwrap(), veh);

        let mut bad = veh.clone();
        bad.veh_kg = 0.0;
        assert!(Vehicle::from_yaml(bad.to_yaml().unwrap()).is_err());

        let mut bad = veh;
        bad.pt_eff_map = array![0.3];
        assert!(Vehicle::from_json(bad.to_json().unwrap()).is_err());
    }
}
