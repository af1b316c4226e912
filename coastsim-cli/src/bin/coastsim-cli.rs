use clap::{ArgGroup, Parser};
use std::path::Path;

extern crate coastsim_core;
use coastsim_core::{
    cycle::Cycle,
    simdrive::{SimDrive, SimDriveParams},
    traits::SerdeAPI,
    vehicle::Vehicle,
};

/// Drive a vehicle over a cycle, optionally coasting toward stops.
/// After running `cargo build --release`, run with
/// ```bash
/// ./target/release/coastsim-cli --cyc-file coastsim-cli/tests/assets/two_stops.csv --coast
/// ```
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(group(
    ArgGroup::new("cycle")
    .required(true)
    .args(&["cyc", "cyc-file"])
))]
#[clap(group(
    ArgGroup::new("vehicle")
    .args(&["veh", "veh-file"])
))]
struct CoastSimApi {
    /// Cycle as json string
    #[clap(long, value_parser)]
    cyc: Option<String>,
    /// Path to cycle file (csv, yaml or json)
    #[clap(long, value_parser)]
    cyc_file: Option<String>,
    /// Vehicle as json string; defaults to a mock vehicle
    #[clap(long, value_parser)]
    veh: Option<String>,
    /// Path to vehicle file (yaml or json)
    #[clap(long, value_parser)]
    veh_file: Option<String>,
    /// Path to simulation parameters file (yaml or json)
    #[clap(long, value_parser)]
    params_file: Option<String>,
    /// Enable coasting toward stops
    #[clap(long, action)]
    coast: bool,
    /// Speed at which coasting starts (m/s); zero or negative selects the
    /// automatic trigger
    #[clap(long, value_parser, allow_hyphen_values = true)]
    coast_start_speed: Option<f64>,
    /// Speed at which coasting hands over to braking (m/s)
    #[clap(long, value_parser)]
    coast_brake_speed: Option<f64>,
    /// Braking deceleration (m/s^2), negative
    #[clap(long, value_parser, allow_hyphen_values = true)]
    coast_brake_accel: Option<f64>,
    /// How to return results: `json` or `yaml`
    #[clap(long, value_parser, default_value = "json")]
    res_fmt: String,
}

fn load_cycle(api: &CoastSimApi) -> anyhow::Result<Cycle> {
    if let Some(cyc_json_str) = &api.cyc {
        return Cycle::from_json(cyc_json_str);
    }
    let cyc_file = api
        .cyc_file
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("one of `--cyc` or `--cyc-file` is required"))?;
    let is_csv = Path::new(cyc_file)
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        Cycle::from_csv_file(cyc_file)
    } else {
        Cycle::from_file(cyc_file)
    }
}

fn load_vehicle(api: &CoastSimApi) -> anyhow::Result<Vehicle> {
    if let Some(veh_json_str) = &api.veh {
        Vehicle::from_json(veh_json_str)
    } else if let Some(veh_file) = &api.veh_file {
        Vehicle::from_file(veh_file)
    } else {
        Ok(Vehicle::mock_vehicle())
    }
}

fn load_params(api: &CoastSimApi) -> anyhow::Result<SimDriveParams> {
    let mut sim_params = match &api.params_file {
        Some(params_file) => SimDriveParams::from_file(params_file)?,
        None => SimDriveParams::default(),
    };
    if api.coast {
        sim_params.coast_allow = true;
    }
    if let Some(speed) = api.coast_start_speed {
        sim_params.coast_start_speed_m_per_s = speed;
    }
    if let Some(speed) = api.coast_brake_speed {
        sim_params.coast_brake_start_speed_m_per_s = speed;
    }
    if let Some(accel) = api.coast_brake_accel {
        sim_params.coast_brake_accel_m_per_s2 = accel;
    }
    sim_params.init()?;
    Ok(sim_params)
}

pub fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let api = CoastSimApi::parse();

    let cyc = load_cycle(&api)?;
    let veh = load_vehicle(&api)?;
    let sim_params = load_params(&api)?;
    log::info!(
        "simulating `{}` over cycle `{}` ({} points), coasting: {}",
        veh.scenario_name,
        cyc.name,
        cyc.len(),
        sim_params.coast_allow
    );

    let mut sim_drive = SimDrive::with_params(cyc, veh, sim_params);
    sim_drive.sim_drive()?;
    println!("{}", sim_drive.summary().to_str(&api.res_fmt)?);
    Ok(())
}
