use std::error::Error;
use std::fs;

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

use crate::availability::Availability;
use crate::cli;
use crate::errors::ExpectedValue;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TruckConfig {
    #[serde(rename = "speed (unit/min)")]
    pub speed: f64,

    #[serde(rename = "capacity (kg)")]
    pub capacity: f64,

    #[serde(rename = "max work time (min)")]
    pub max_work_time: f64,
}

impl Default for TruckConfig {
    fn default() -> Self {
        Self {
            speed: 5.0,
            capacity: 200.0,
            max_work_time: 480.0,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DroneConfig {
    #[serde(rename = "speed (unit/min)")]
    pub speed: f64,

    #[serde(rename = "capacity (kg)")]
    pub capacity: f64,

    #[serde(rename = "battery")]
    pub battery: f64,

    #[serde(rename = "self weight (kg)")]
    pub weight: f64,

    #[serde(rename = "flight energy (per kg per min)")]
    pub energy_flight: f64,

    #[serde(rename = "service energy (per kg per min)")]
    pub energy_service: f64,

    #[serde(rename = "hover energy (per kg per min)")]
    pub energy_hover: f64,
}

impl Default for DroneConfig {
    fn default() -> Self {
        Self {
            speed: 10.0,
            capacity: 9.0,
            battery: 650.0,
            weight: 15.0,
            energy_flight: 0.5,
            energy_service: 0.3,
            energy_hover: 0.2,
        }
    }
}

impl DroneConfig {
    pub fn flight_time(&self, distance: f64) -> f64 {
        distance / self.speed
    }

    pub fn flight_energy(&self, load: f64, distance: f64) -> f64 {
        (load + self.weight) * self.flight_time(distance) * self.energy_flight
    }

    pub fn hover_energy(&self, load: f64, duration: f64) -> f64 {
        (load + self.weight) * duration * self.energy_hover
    }

    pub fn service_energy(&self, load: f64, duration: f64) -> f64 {
        (load + self.weight) * duration * self.energy_service
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PheromoneConfig {
    pub alpha: f64,
    pub beta: f64,
    pub learning_rate: f64,
    pub evaporation_rate: f64,
    pub min: f64,
    pub max: f64,
    pub initial: f64,
    pub evaporate_every: usize,
}

impl Default for PheromoneConfig {
    fn default() -> Self {
        Self {
            alpha: 0.6,
            beta: 0.4,
            learning_rate: 0.15,
            evaporation_rate: 0.02,
            min: 0.01,
            max: 10.0,
            initial: 1.0,
            evaporate_every: 10,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SearchConfig {
    pub min_delete: f64,
    pub max_delete: f64,

    /// Operator weights are refreshed after this many calls.
    pub adaptive_window: usize,

    /// Repair operators need more calls than this before their weight moves.
    pub adaptive_min_calls: usize,

    pub alns_iterations: usize,
    pub alns_time_budget: Option<f64>,
    pub alns_temperature_factor: f64,
    pub alns_temperature_decay: f64,

    /// A repaired plan goes through local search when its cost is below `current * (1 + slack)`.
    pub local_search_slack: f64,
    pub local_search_max_no_improve: usize,

    pub max_repair_attempts: usize,
    pub violation_tolerance: f64,
    pub max_late_relocations: usize,

    /// More cascading effects than this make a failure critical.
    pub critical_cascade: usize,

    /// Remaining battery margin (fraction of the battery) under which an energy warning is raised.
    pub energy_warning_margin: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_delete: 0.2,
            max_delete: 0.4,
            adaptive_window: 50,
            adaptive_min_calls: 10,
            alns_iterations: 50,
            alns_time_budget: None,
            alns_temperature_factor: 0.1,
            alns_temperature_decay: 0.95,
            local_search_slack: 0.05,
            local_search_max_no_improve: 100,
            max_repair_attempts: 3,
            violation_tolerance: 0.1,
            max_late_relocations: 3,
            critical_cascade: 3,
            energy_warning_margin: 0.1,
        }
    }
}

/// One row of the problem file.
#[derive(Clone, Debug, PartialEq)]
pub struct CustomerRow {
    pub x: f64,
    pub y: f64,
    pub demand: f64,
    pub start_time: f64,
    pub end_time: f64,
    pub dronable: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SerializedConfig {
    customers_count: usize,

    x: Vec<f64>,
    y: Vec<f64>,
    demands: Vec<f64>,
    start_times: Vec<f64>,
    end_times: Vec<f64>,
    dronable: Vec<bool>,
    availability: Vec<Availability>,

    truck_distance: cli::DistanceType,
    drone_distance: cli::DistanceType,

    truck: TruckConfig,
    drone: DroneConfig,
    pheromone: PheromoneConfig,
    search: SearchConfig,

    service_time: f64,
    cost_truck: f64,
    cost_drone: f64,
    pair_fixed_cost: f64,

    problem: String,
    plan: Option<String>,
    pairs: usize,
    seed: Option<u64>,
    verbose: bool,
    outputs: String,
    disable_logging: bool,
    dry_run: bool,
}

/// Immutable problem data and run parameters. Index 0 of every per-customer vector is the depot.
#[derive(Clone, Debug)]
pub struct Config {
    pub customers_count: usize,

    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub demands: Vec<f64>,
    pub start_times: Vec<f64>,
    pub end_times: Vec<f64>,
    pub dronable: Vec<bool>,
    pub availability: Vec<Availability>,

    pub truck_distance: cli::DistanceType,
    pub drone_distance: cli::DistanceType,
    pub truck_distances: Vec<Vec<f64>>,
    pub drone_distances: Vec<Vec<f64>>,

    pub truck: TruckConfig,
    pub drone: DroneConfig,
    pub pheromone: PheromoneConfig,
    pub search: SearchConfig,

    pub service_time: f64,
    pub cost_truck: f64,
    pub cost_drone: f64,
    pub pair_fixed_cost: f64,

    pub problem: String,
    pub plan: Option<String>,
    pub pairs: usize,
    pub seed: Option<u64>,
    pub verbose: bool,
    pub outputs: String,
    pub disable_logging: bool,
    pub dry_run: bool,
}

impl From<SerializedConfig> for Config {
    fn from(config: SerializedConfig) -> Self {
        let truck_distances = config.truck_distance.matrix(&config.x, &config.y);
        let drone_distances = config.drone_distance.matrix(&config.x, &config.y);

        Self {
            customers_count: config.customers_count,
            x: config.x,
            y: config.y,
            demands: config.demands,
            start_times: config.start_times,
            end_times: config.end_times,
            dronable: config.dronable,
            availability: config.availability,
            truck_distance: config.truck_distance,
            drone_distance: config.drone_distance,
            truck_distances,
            drone_distances,
            truck: config.truck,
            drone: config.drone,
            pheromone: config.pheromone,
            search: config.search,
            service_time: config.service_time,
            cost_truck: config.cost_truck,
            cost_drone: config.cost_drone,
            pair_fixed_cost: config.pair_fixed_cost,
            problem: config.problem,
            plan: config.plan,
            pairs: config.pairs,
            seed: config.seed,
            verbose: config.verbose,
            outputs: config.outputs,
            disable_logging: config.disable_logging,
            dry_run: config.dry_run,
        }
    }
}

impl From<Config> for SerializedConfig {
    fn from(config: Config) -> Self {
        Self {
            customers_count: config.customers_count,
            x: config.x,
            y: config.y,
            demands: config.demands,
            start_times: config.start_times,
            end_times: config.end_times,
            dronable: config.dronable,
            availability: config.availability,
            truck_distance: config.truck_distance,
            drone_distance: config.drone_distance,
            truck: config.truck,
            drone: config.drone,
            pheromone: config.pheromone,
            search: config.search,
            service_time: config.service_time,
            cost_truck: config.cost_truck,
            cost_drone: config.cost_drone,
            pair_fixed_cost: config.pair_fixed_cost,
            problem: config.problem,
            plan: config.plan,
            pairs: config.pairs,
            seed: config.seed,
            verbose: config.verbose,
            outputs: config.outputs,
            disable_logging: config.disable_logging,
            dry_run: config.dry_run,
        }
    }
}

impl Config {
    /// Build a configuration with default parameters around the given depot and customer rows.
    pub fn build(depot: (f64, f64), depot_close: f64, rows: &[CustomerRow]) -> Self {
        let mut x = vec![depot.0];
        let mut y = vec![depot.1];
        let mut demands = vec![0.0];
        let mut start_times = vec![0.0];
        let mut end_times = vec![depot_close];
        let mut dronable = vec![false];
        let mut availability = vec![Availability::Constant(1.0)];

        for row in rows {
            x.push(row.x);
            y.push(row.y);
            demands.push(row.demand);
            start_times.push(row.start_time);
            end_times.push(row.end_time);
            dronable.push(row.dronable);
            availability.push(Availability::default());
        }

        let truck_distance = cli::DistanceType::Manhattan;
        let drone_distance = cli::DistanceType::Euclidean;
        let truck_distances = truck_distance.matrix(&x, &y);
        let drone_distances = drone_distance.matrix(&x, &y);

        Self {
            customers_count: rows.len(),
            x,
            y,
            demands,
            start_times,
            end_times,
            dronable,
            availability,
            truck_distance,
            drone_distance,
            truck_distances,
            drone_distances,
            truck: TruckConfig::default(),
            drone: DroneConfig::default(),
            pheromone: PheromoneConfig::default(),
            search: SearchConfig::default(),
            service_time: 10.0,
            cost_truck: 0.078,
            cost_drone: 0.00248,
            pair_fixed_cost: 22.0,
            problem: String::new(),
            plan: None,
            pairs: 1,
            seed: None,
            verbose: false,
            outputs: String::from("outputs/"),
            disable_logging: true,
            dry_run: false,
        }
    }

    pub fn set_distance_types(&mut self, truck: cli::DistanceType, drone: cli::DistanceType) {
        self.truck_distance = truck;
        self.drone_distance = drone;
        self.truck_distances = truck.matrix(&self.x, &self.y);
        self.drone_distances = drone.matrix(&self.x, &self.y);
    }

    pub fn from_arguments(arguments: cli::Arguments) -> Result<Self, Box<dyn Error>> {
        match arguments.command {
            cli::Commands::Evaluate { config, .. } => {
                let data = fs::read_to_string(config)?;
                let deserialized = serde_json::from_str::<SerializedConfig>(&data)?;
                Ok(Self::from(deserialized))
            }
            cli::Commands::Run {
                problem,
                plan,
                pairs,
                availability_model,
                availability,
                caf,
                caf_horizon,
                depot_x,
                depot_y,
                depot_close,
                truck_distance,
                drone_distance,
                truck_speed,
                truck_capacity,
                truck_max_work_time,
                drone_speed,
                drone_capacity,
                drone_battery,
                drone_weight,
                service_time,
                energy_flight,
                energy_service,
                energy_hover,
                cost_truck,
                cost_drone,
                pair_fixed_cost,
                min_delete,
                max_delete,
                alns_iterations,
                alns_time_budget,
                local_search_max_no_improve,
                max_repair_attempts,
                seed,
                verbose,
                outputs,
                disable_logging,
                dry_run,
            } => {
                let rows = parse_problem(&fs::read_to_string(&problem)?)?;
                if rows.is_empty() {
                    return Err(format!("No customer found in {problem}").into());
                }

                let mut config = Self::build((depot_x, depot_y), depot_close, &rows);
                config.set_distance_types(truck_distance, drone_distance);

                config.availability[1..].fill(Availability::Constant(availability));
                if availability_model == cli::AvailabilityModel::Profile {
                    let path = ExpectedValue::cast(caf, "a CAF file for the profile availability model")?;
                    let profiles = parse_caf(&fs::read_to_string(path)?, caf_horizon)?;
                    if profiles.len() < rows.len() {
                        return Err(format!(
                            "CAF file holds {} rows, {} customers need a profile",
                            profiles.len(),
                            rows.len()
                        )
                        .into());
                    }

                    for (slot, profile) in config.availability[1..].iter_mut().zip(profiles) {
                        *slot = profile;
                    }
                }

                config.truck = TruckConfig {
                    speed: truck_speed,
                    capacity: truck_capacity,
                    max_work_time: truck_max_work_time,
                };
                config.drone = DroneConfig {
                    speed: drone_speed,
                    capacity: drone_capacity,
                    battery: drone_battery,
                    weight: drone_weight,
                    energy_flight,
                    energy_service,
                    energy_hover,
                };
                config.search.min_delete = min_delete;
                config.search.max_delete = max_delete.max(min_delete);
                config.search.alns_iterations = alns_iterations;
                config.search.alns_time_budget = alns_time_budget;
                config.search.local_search_max_no_improve = local_search_max_no_improve;
                config.search.max_repair_attempts = max_repair_attempts;

                config.service_time = service_time;
                config.cost_truck = cost_truck;
                config.cost_drone = cost_drone;
                config.pair_fixed_cost = pair_fixed_cost;
                config.problem = problem;
                config.plan = plan;
                config.pairs = pairs.max(1);
                config.seed = seed;
                config.verbose = verbose;
                config.outputs = outputs;
                config.disable_logging = disable_logging;
                config.dry_run = dry_run;

                Ok(config)
            }
        }
    }
}

/// Parse `CUST_NO,XCOORD,YCOORD,DEMAND,ST,ET,DE` rows. The header and blank lines are skipped.
///
/// Customers are renumbered in file order starting from 1.
pub fn parse_problem(data: &str) -> Result<Vec<CustomerRow>, Box<dyn Error>> {
    let number = r"\s*(-?[\d\.]+(?:[eE][-+]?\d+)?)\s*";
    let customers_regex = RegexBuilder::new(&format!(
        r"^\s*(\d+)\s*,{number},{number},{number},{number},{number},\s*(0|1)\s*$"
    ))
    .multi_line(true)
    .build()?;

    let mut rows = vec![];
    for c in customers_regex.captures_iter(data) {
        let (_, [id, x, y, demand, start_time, end_time, dronable]) = c.extract::<7>();
        let id = id.parse::<usize>()?;
        if id != rows.len() + 1 {
            return Err(format!("Customer ids must be 1..=n in file order, found {id} in row {}", rows.len() + 1).into());
        }

        let row = CustomerRow {
            x: x.parse::<f64>()?,
            y: y.parse::<f64>()?,
            demand: demand.parse::<f64>()?,
            start_time: start_time.parse::<f64>()?,
            end_time: end_time.parse::<f64>()?,
            dronable: dronable == "1",
        };

        if row.end_time < row.start_time {
            return Err(format!("Time window [{}, {}] is empty", row.start_time, row.end_time).into());
        }

        rows.push(row);
    }

    Ok(rows)
}

/// Parse a CAF file: one comma-separated row of bucket probabilities per customer, in customer order.
pub fn parse_caf(data: &str, horizon: f64) -> Result<Vec<Availability>, Box<dyn Error>> {
    let row_regex = RegexBuilder::new(r"^\s*([\d\.]+(?:\s*,\s*[\d\.]+)*)\s*,?\s*$")
        .multi_line(true)
        .build()?;

    let mut profiles = vec![];
    for c in row_regex.captures_iter(data) {
        let (_, [row]) = c.extract::<1>();
        let buckets = row
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()?;

        if buckets.iter().any(|p| !(0.0..=1.0).contains(p)) {
            return Err(format!("Probability out of [0, 1] in CAF row {row:?}").into());
        }

        profiles.push(Availability::Profile { buckets, horizon });
    }

    Ok(profiles)
}
