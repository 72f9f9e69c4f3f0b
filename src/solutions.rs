use std::error::Error;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::clusterize;
use crate::config::Config;
use crate::context::Context;
use crate::customers::{Customer, Outcome, ServiceBy};
use crate::errors::RoutingError;
use crate::routes::{DroneTrip, Route, TruckRoute, VehiclePair};
use crate::timing;

/// Route layout of one vehicle pair, as found in plan and solution files.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PairPlan {
    pub truck: Vec<usize>,
    #[serde(default)]
    pub trips: Vec<Vec<usize>>,
}

impl PairPlan {
    pub fn new(truck: Vec<usize>, trips: Vec<Vec<usize>>) -> Self {
        Self { truck, trips }
    }

    pub fn from_pair(pair: &VehiclePair) -> Self {
        Self {
            truck: pair.truck.nodes().to_vec(),
            trips: pair.trips.iter().map(|t| t.path.clone()).collect(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Plan {
    pub pairs: Vec<PairPlan>,
}

impl Plan {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str::<Self>(&data)?)
    }

    /// Check the depot framing of every truck route. Everything else is checked when the context is built.
    pub fn validate(&self) -> Result<(), RoutingError> {
        for (id, plan) in self.pairs.iter().enumerate() {
            let truck = &plan.truck;
            if truck.len() < 2 || truck[0] != 0 || truck[truck.len() - 1] != 0 {
                return Err(RoutingError::MalformedRoute {
                    pair: id,
                    reason: format!("truck route {truck:?} must start and end at the depot"),
                });
            }

            for (t, path) in plan.trips.iter().enumerate() {
                if path.contains(&0) {
                    return Err(RoutingError::MalformedTrip {
                        pair: id,
                        trip: t,
                        reason: String::from("drone trips are anchored on customers, not on the depot"),
                    });
                }
            }
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum SnapshotKind {
    #[serde(rename = "initial")]
    Initial,
    #[serde(rename = "current")]
    Current,
    #[serde(rename = "best")]
    Best,
    #[serde(rename = "copy")]
    Copy,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CustomerState {
    pub customer: usize,
    pub outcome: Outcome,
    pub service_by: Option<ServiceBy>,
    pub service_begin: Option<f64>,
}

/// Routes, costs and customer attribution at one point of the run.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Solution {
    pub kind: SnapshotKind,
    pub pairs: Vec<PairPlan>,
    pub pair_costs: Vec<f64>,
    pub total_cost: f64,
    pub served: usize,
    pub failed: usize,
    pub customers: Vec<CustomerState>,
}

impl Solution {
    pub fn capture(ctx: &Context, kind: SnapshotKind) -> Self {
        let customers = ctx
            .customers
            .iter()
            .skip(1)
            .map(|c| CustomerState {
                customer: c.id,
                outcome: c.record.outcome,
                service_by: c.record.service_by,
                service_begin: c.record.service_begin(),
            })
            .collect::<Vec<_>>();

        Self {
            kind,
            pairs: ctx.pairs.iter().map(PairPlan::from_pair).collect(),
            pair_costs: (0..ctx.pairs.len()).map(|id| ctx.pair_cost(id)).collect(),
            total_cost: ctx.total_cost(),
            served: customers
                .iter()
                .filter(|c| c.outcome == Outcome::Succeeded)
                .count(),
            failed: customers.iter().filter(|c| c.outcome == Outcome::Failed).count(),
            customers,
        }
    }

    pub fn plan(&self) -> Plan {
        Plan {
            pairs: self.pairs.clone(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str::<Self>(&data)?)
    }
}

fn _nearest_neighbour(mut cluster: Vec<usize>, distances: &[Vec<f64>]) -> Vec<usize> {
    let mut start = 0;
    for i in 0..cluster.len() {
        let mut min_distance = f64::INFINITY;
        let mut min_idx = i;
        for (j, &customer) in cluster.iter().enumerate().skip(i) {
            let d = distances[start][customer];
            if d < min_distance {
                min_distance = d;
                min_idx = j;
            }
        }

        start = cluster[min_idx];
        cluster.swap(i, min_idx);
    }

    cluster
}

fn _sortie_fits(config: &Config, customers: &[Customer], pair: &mut VehiclePair, path: &[usize]) -> bool {
    if pair.validate_structure().is_err() {
        return false;
    }

    timing::refresh_initial_loads(customers, pair);
    if !timing::simulate_truck_load(config, customers, pair).overloads.is_empty() {
        return false;
    }

    let load = path[1..path.len() - 1]
        .iter()
        .map(|&c| customers[c].delivery())
        .sum();
    let simulation = timing::simulate_trip(config, customers, path, 0, 0.0, load, None);
    simulation.overload.is_none() && simulation.energy <= config.drone.battery
}

/// Move drone-servable truck stops onto single-customer trips between their two truck neighbours.
fn _convert_sorties(config: &Config, customers: &[Customer], pair: &mut VehiclePair) {
    let mut i = 2;
    while i + 2 < pair.truck.len() {
        let nodes = pair.truck.nodes();
        let (a, c, b) = (nodes[i - 1], nodes[i], nodes[i + 1]);
        if customers[c].drone_servable(config.drone.capacity) && !pair.is_anchor(a) && !pair.is_anchor(b) {
            let path = vec![a, c, b];
            let mut candidate = pair.clone();
            candidate.truck.remove(c);
            candidate.trips.push(DroneTrip::new(path.clone(), config.drone.battery));
            candidate.sort_trips();

            if _sortie_fits(config, customers, &mut candidate, &path) {
                *pair = candidate;
                i += 2;
                continue;
            }
        }

        i += 1;
    }
}

/// Sweep customers into one territory per pair, order each territory by nearest neighbour from the depot and
/// hand suitable stops to the drone.
pub fn initial_plan(config: &Config) -> Plan {
    let customers = Customer::from_config(config);
    let mut index = (1..=config.customers_count).collect::<Vec<_>>();
    let clusters = clusterize::clusterize(config, &mut index, config.pairs.max(1));

    let pairs = clusters
        .into_iter()
        .filter(|cluster| !cluster.is_empty())
        .enumerate()
        .map(|(id, cluster)| {
            let mut truck = vec![0];
            truck.extend(_nearest_neighbour(cluster, &config.truck_distances));
            truck.push(0);

            let mut pair = VehiclePair::new(id, TruckRoute::new(truck), vec![]);
            _convert_sorties(config, &customers, &mut pair);
            PairPlan::from_pair(&pair)
        })
        .collect();

    Plan { pairs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_plan_json_format() {
        let plan = serde_json::from_str::<Plan>(r#"{"pairs": [{"truck": [0, 1, 3, 0], "trips": [[1, 2, 3]]}, {"truck": [0, 4, 0]}]}"#)
            .unwrap();

        assert_eq!(plan.pairs.len(), 2);
        assert_eq!(plan.pairs[0].trips, vec![vec![1, 2, 3]]);
        assert!(plan.pairs[1].trips.is_empty());
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_plan_validation_errors() {
        let open = Plan {
            pairs: vec![PairPlan::new(vec![0, 1, 2], vec![])],
        };
        assert!(matches!(open.validate(), Err(RoutingError::MalformedRoute { pair: 0, .. })));

        let depot_trip = Plan {
            pairs: vec![PairPlan::new(vec![0, 1, 0], vec![vec![0, 2, 1]])],
        };
        assert!(matches!(depot_trip.validate(), Err(RoutingError::MalformedTrip { pair: 0, trip: 0, .. })));

        let config = fixtures::line_config(3);
        let duplicate = [PairPlan::new(vec![0, 1, 2, 0], vec![]), PairPlan::new(vec![0, 2, 3, 0], vec![])];
        assert_eq!(
            Context::new(config.clone(), &duplicate).err(),
            Some(RoutingError::DuplicateCustomer(2))
        );

        let missing = [PairPlan::new(vec![0, 1, 2, 0], vec![])];
        assert_eq!(Context::new(config.clone(), &missing).err(), Some(RoutingError::UnservedCustomer(3)));

        let reversed = [PairPlan::new(vec![0, 1, 3, 0], vec![vec![3, 2, 1]])];
        assert!(matches!(
            Context::new(config, &reversed).err(),
            Some(RoutingError::MalformedRoute { pair: 0, .. })
        ));
    }

    #[test]
    fn test_initial_plan_serves_everyone_once() {
        let mut config = fixtures::grid_config(12);
        config.pairs = 3;

        let plan = initial_plan(&config);
        assert!(plan.validate().is_ok());
        assert!(plan.pairs.len() <= 3);

        let ctx = Context::new(config, &plan.pairs).unwrap();
        for (id, pair) in ctx.pairs.iter().enumerate() {
            for trip in &pair.trips {
                assert!(trip.energy <= ctx.config.drone.battery);
                assert_eq!(ctx.registry.owner(trip.launch()), Some(id));
            }
        }
    }

    #[test]
    fn test_sortie_conversion() {
        let config = fixtures::line_config(3);
        let plan = initial_plan(&config);

        assert_eq!(plan.pairs, vec![PairPlan::new(vec![0, 1, 3, 0], vec![vec![1, 2, 3]])]);
    }

    #[test]
    fn test_capture_counts_outcomes() {
        let mut ctx = fixtures::line_context(3, &[PairPlan::new(vec![0, 1, 2, 3, 0], vec![])]);
        ctx.customers[1].record.outcome = Outcome::Succeeded;
        ctx.customers[2].record.outcome = Outcome::Failed;
        ctx.refresh_pair(0).unwrap();

        let solution = Solution::capture(&ctx, SnapshotKind::Current);
        assert_eq!(solution.served, 1);
        assert_eq!(solution.failed, 1);
        assert_eq!(solution.customers.len(), 3);
        assert_eq!(solution.plan().pairs, vec![PairPlan::new(vec![0, 1, 2, 3, 0], vec![])]);
        assert!((solution.total_cost - ctx.total_cost()).abs() < 1e-9);
    }
}
