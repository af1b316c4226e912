#![allow(clippy::field_reassign_with_default)]

//! Crate containing models for eco-approach coasting of a vehicle following a drive cycle:
//! constant-jerk trajectory planning, grade-aware coast and brake distances, splicing of
//! trajectories into drive cycles, and a step-wise road-load simulation that decides when
//! to coast.

#[macro_use]
pub mod macros;

pub mod coast;
pub mod cycle;
pub mod imports;
pub mod params;
pub mod simdrive;
pub mod traits;
pub mod trajectory;
pub mod utils;
pub mod vehicle;

pub use coast::{calc_distance_to_stop_coast, calc_dvdd, distance_to_next_stop};
pub use cycle::{modify_cycle_adding_braking_trajectory, modify_cycle_with_trajectory, Cycle};
pub use trajectory::{
    accel_for_constant_jerk, calc_constant_jerk_trajectory, dist_for_constant_jerk,
    speed_for_constant_jerk, Trajectory,
};
