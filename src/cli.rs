use std::fmt;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Deserialize, Serialize)]
pub enum DistanceType {
    #[serde(rename = "manhattan")]
    Manhattan,
    #[serde(rename = "euclidean")]
    Euclidean,
}

impl fmt::Display for DistanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Manhattan => "manhattan",
                Self::Euclidean => "euclidean",
            }
        )
    }
}

impl DistanceType {
    pub fn matrix(&self, x: &[f64], y: &[f64]) -> Vec<Vec<f64>> {
        let n = x.len().min(y.len());

        let mut matrix = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }

                let dx = x[i] - x[j];
                let dy = y[i] - y[j];
                matrix[i][j] = match self {
                    Self::Manhattan => dx.abs() + dy.abs(),
                    Self::Euclidean => dx.hypot(dy),
                };
            }
        }

        matrix
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Deserialize, Serialize)]
pub enum AvailabilityModel {
    /// Every customer is at home with the same fixed probability
    #[serde(rename = "constant")]
    Constant,
    /// Time-bucketed probabilities read from a CAF file
    #[serde(rename = "profile")]
    Profile,
}

impl fmt::Display for AvailabilityModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Constant => "constant",
                Self::Profile => "profile",
            }
        )
    }
}

#[derive(Debug, Parser)]
#[command(
    long_about = "Dynamic truck-and-drone pickup-and-delivery re-optimization under uncertain customer presence",
    propagate_version = true,
    version
)]
pub struct Arguments {
    #[command(subcommand)]
    pub command: Commands,
}

#[allow(clippy::large_enum_variant)] // This struct is mostly a singleton
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Evaluate an existing solution
    Evaluate {
        /// Path to the solution JSON file
        solution: String,

        /// Path to the config JSON file
        config: String,
    },

    /// Run the dynamic optimization
    Run {
        /// Path to the customer CSV file (CUST_NO,XCOORD,YCOORD,DEMAND,ST,ET,DE)
        problem: String,

        /// Path to an initial plan JSON file. Otherwise, build one with a sweep heuristic.
        #[arg(long)]
        plan: Option<String>,

        /// Number of vehicle pairs used when building the initial plan
        #[arg(long, default_value_t = 3)]
        pairs: usize,

        /// Customer availability model
        #[arg(long, default_value_t = AvailabilityModel::Constant)]
        availability_model: AvailabilityModel,

        /// Probability that a customer is at home (constant model)
        #[arg(long, default_value_t = 0.8)]
        availability: f64,

        /// Path to the CAF file (profile model): one row of 10 probabilities per customer
        #[arg(long)]
        caf: Option<String>,

        /// Time horizon covered by the CAF buckets
        #[arg(long, default_value_t = 600.0)]
        caf_horizon: f64,

        /// Depot X coordinate
        #[arg(long, default_value_t = 40.0, allow_negative_numbers = true)]
        depot_x: f64,

        /// Depot Y coordinate
        #[arg(long, default_value_t = 50.0, allow_negative_numbers = true)]
        depot_y: f64,

        /// Latest return time at the depot
        #[arg(long, default_value_t = 480.0)]
        depot_close: f64,

        /// Distance type to use for trucks.
        #[arg(long, default_value_t = DistanceType::Manhattan)]
        truck_distance: DistanceType,

        /// Distance type to use for drones.
        #[arg(long, default_value_t = DistanceType::Euclidean)]
        drone_distance: DistanceType,

        #[arg(long, default_value_t = 5.0)]
        truck_speed: f64,

        #[arg(long, default_value_t = 200.0)]
        truck_capacity: f64,

        #[arg(long, default_value_t = 480.0)]
        truck_max_work_time: f64,

        #[arg(long, default_value_t = 10.0)]
        drone_speed: f64,

        #[arg(long, default_value_t = 9.0)]
        drone_capacity: f64,

        #[arg(long, default_value_t = 650.0)]
        drone_battery: f64,

        /// Self-weight of the drone, added to the payload in every energy term
        #[arg(long, default_value_t = 15.0)]
        drone_weight: f64,

        /// Service duration at every stop
        #[arg(long, default_value_t = 10.0)]
        service_time: f64,

        #[arg(long, default_value_t = 0.5)]
        energy_flight: f64,

        #[arg(long, default_value_t = 0.3)]
        energy_service: f64,

        #[arg(long, default_value_t = 0.2)]
        energy_hover: f64,

        /// Truck cost per distance unit
        #[arg(long, default_value_t = 0.078)]
        cost_truck: f64,

        /// Drone cost per energy unit
        #[arg(long, default_value_t = 0.00248)]
        cost_drone: f64,

        /// Fixed cost charged for every vehicle pair
        #[arg(long, default_value_t = 22.0)]
        pair_fixed_cost: f64,

        /// Minimum fraction of the candidate pool removed by destroy operators
        #[arg(long, default_value_t = 0.2)]
        min_delete: f64,

        /// Maximum fraction of the candidate pool removed by destroy operators
        #[arg(long, default_value_t = 0.4)]
        max_delete: f64,

        /// Maximum number of bounded ALNS iterations per truck failure
        #[arg(long, default_value_t = 50)]
        alns_iterations: usize,

        /// Wall-clock budget (seconds) of one bounded ALNS run
        #[arg(long)]
        alns_time_budget: Option<f64>,

        /// Number of consecutive non-improving local search moves before stopping
        #[arg(long, default_value_t = 100)]
        local_search_max_no_improve: usize,

        /// Maximum rounds of the feasibility repair loop
        #[arg(long, default_value_t = 3)]
        max_repair_attempts: usize,

        /// Seed of the random number generator. Otherwise, seed from the OS.
        #[arg(long)]
        seed: Option<u64>,

        /// The verbose mode
        #[arg(short, long)]
        verbose: bool,

        /// The directory to store results
        #[arg(long, default_value_t = String::from("outputs/"))]
        outputs: String,

        /// Disable CSV logging per stage
        #[arg(long)]
        disable_logging: bool,

        /// Do not run the optimization, only validate the input and write the config file
        #[arg(long)]
        dry_run: bool,
    },
}
