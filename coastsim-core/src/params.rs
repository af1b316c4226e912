//! Module containing physical constants and unit conversions.

use crate::imports::*;

/// Unit conversions that should NEVER change
pub const M_PER_KM: f64 = 1_000.0;

/// Speed below which the vehicle is considered stopped, m/s
pub const STOPPED_SPEED_M_PER_S: f64 = 1e-6;

/// Physical constants consumed by road-load and coasting calculations
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PhysicalProperties {
    /// sea level air density at approximately 20C, $\frac{kg}{m^3}$
    #[serde(default = "PhysicalProperties::def_air_density_kg_per_m3")]
    pub air_density_kg_per_m3: f64,
    /// gravitational acceleration, $\frac{m}{s^2}$
    #[serde(default = "PhysicalProperties::def_a_grav_mps2")]
    pub a_grav_mps2: f64,
}

impl PhysicalProperties {
    fn def_air_density_kg_per_m3() -> f64 {
        Self::default().air_density_kg_per_m3
    }
    fn def_a_grav_mps2() -> f64 {
        Self::default().a_grav_mps2
    }
}

impl Default for PhysicalProperties {
    fn default() -> Self {
        Self {
            air_density_kg_per_m3: 1.2,
            a_grav_mps2: 9.81,
        }
    }
}

impl SerdeAPI for PhysicalProperties {
    fn init(&mut self) -> anyhow::Result<()> {
        ensure!(
            self.air_density_kg_per_m3 >= 0.0,
            "{}",
            format_dbg!(self.air_density_kg_per_m3)
        );
        ensure!(self.a_grav_mps2 > 0.0, "{}", format_dbg!(self.a_grav_mps2));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_falls_back_to_defaults() {
        let props = PhysicalProperties::from_yaml("a_grav_mps2: 10.0").unwrap();
        assert_eq!(props.a_grav_mps2, 10.0);
        assert_eq!(props.air_density_kg_per_m3, 1.2);
    }

    #[test]
    fn test_negative_gravity_is_rejected() {
        assert!(PhysicalProperties::from_json(r#"{"a_grav_mps2": -9.81}"#).is_err());
    }
}
