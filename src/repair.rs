use std::cmp::Ordering;
use std::fmt;

use rand::seq::SliceRandom;
use serde::Serialize;

use crate::adaptive::AdaptiveState;
use crate::context::Context;
use crate::customers::Vehicle;
use crate::errors::RoutingError;
use crate::feasibility;
use crate::routes::{DroneTrip, Route, VehiclePair};
use crate::timing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RepairOperator {
    RandomOrder,
    CheapestDistance,
    RegretDistance,
    GreedyFeasibility,
    DronePriority,
    DroneNewRoute,
}

pub const REPAIR_OPERATORS: [RepairOperator; 6] = [
    RepairOperator::RandomOrder,
    RepairOperator::CheapestDistance,
    RepairOperator::RegretDistance,
    RepairOperator::GreedyFeasibility,
    RepairOperator::DronePriority,
    RepairOperator::DroneNewRoute,
];

impl fmt::Display for RepairOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::RandomOrder => "random_order_insertion",
                Self::CheapestDistance => "cheapest_distance_insertion",
                Self::RegretDistance => "regret_distance_insertion",
                Self::GreedyFeasibility => "greedy_feasibility_insertion",
                Self::DronePriority => "drone_priority_insertion",
                Self::DroneNewRoute => "drone_new_route_insertion",
            }
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Insert so that the customer lands at this truck position.
    Truck { position: usize },

    /// Insert into the trip's path at `index`.
    Drone { trip: usize, index: usize },
}

impl Placement {
    pub fn vehicle(&self) -> Vehicle {
        match self {
            Self::Truck { .. } => Vehicle::Truck,
            Self::Drone { .. } => Vehicle::Drone,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Insertion {
    pub customer: usize,
    pub placement: Placement,
    pub cost: f64,

    /// Pheromone-guided ranking score, lower is better.
    pub score: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RepairStatus {
    pub operator: Option<RepairOperator>,
    pub inserted: Vec<usize>,

    /// Customers the operator could not place, appended to the truck route instead.
    pub emergency: Vec<usize>,

    /// Every customer registered to the pair is on one of its routes.
    pub routed: bool,

    /// Feasibility repair left no violation behind. Reported only, a late customer does not fail the repair.
    pub feasible: bool,
    pub cost: f64,
}

impl RepairStatus {
    /// The operator placed every customer it was given.
    pub fn success(&self) -> bool {
        self.emergency.is_empty() && self.routed
    }
}

/// Every load-safe way to insert `customer`, truck positions first (in route order), then drone slots.
///
/// Truck positions start at `min_position`. Drone slots are only offered in trips that have not been launched
/// and that launch no earlier than `min_position - 1`.
pub fn insertions(ctx: &Context, id: usize, customer: usize, min_position: usize) -> Result<Vec<Insertion>, RoutingError> {
    let pair = ctx.pair(id)?;
    let config = &ctx.config;
    let customers = &ctx.customers;
    let first_open = ctx.first_open_position(id);
    let min_position = min_position.max(first_open);

    let mut result = vec![];
    let nodes = pair.truck.nodes();
    for position in min_position..nodes.len() {
        let mut candidate = pair.clone();
        candidate.truck.insert(position, customer);
        timing::refresh_initial_loads(customers, &mut candidate);

        let profile = timing::simulate_truck_load(config, customers, &candidate);
        if profile.overloads.iter().any(|o| o.position >= first_open) {
            continue;
        }

        let (prev, next) = (nodes[position - 1], nodes[position]);
        let d = &config.truck_distances;
        let cost = (d[prev][customer] + d[customer][next] - d[prev][next]) * config.cost_truck;
        result.push(Insertion {
            customer,
            placement: Placement::Truck { position },
            cost,
            score: ctx.pheromone.insertion_score(prev, customer, next, cost),
        });
    }

    if !customers[customer].drone_servable(config.drone.capacity) {
        return Ok(result);
    }

    for (t, trip) in pair.trips.iter().enumerate() {
        if !ctx.trip_is_open(id, t) {
            continue;
        }
        match pair.trip_span(t) {
            Some((launch, _)) if launch + 1 >= min_position => {}
            _ => continue,
        }

        let departure = customers[trip.launch()].record.truck.map_or(0.0, |v| v.departure);
        let ready = customers[trip.retrieval()]
            .record
            .truck
            .map(|v| v.service_begin + config.service_time);
        for index in 1..trip.path.len() {
            let mut path = trip.path.clone();
            path.insert(index, customer);

            let load = path[1..path.len() - 1].iter().map(|&c| customers[c].delivery()).sum();
            let simulation = timing::simulate_trip(config, customers, &path, 0, departure, load, ready);
            if simulation.overload.is_some() || simulation.energy > config.drone.battery {
                continue;
            }

            let (prev, next) = (trip.path[index - 1], trip.path[index]);
            let d = &config.drone_distances;
            let cost = (d[prev][customer] + d[customer][next] - d[prev][next]) * config.cost_drone;
            result.push(Insertion {
                customer,
                placement: Placement::Drone { trip: t, index },
                cost,
                score: ctx.pheromone.insertion_score(prev, customer, next, cost),
            });
        }
    }

    Ok(result)
}

fn _by_score(a: &Insertion, b: &Insertion) -> Ordering {
    a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal)
}

pub fn apply(ctx: &mut Context, id: usize, insertion: &Insertion) -> Result<(), RoutingError> {
    ctx.registry.check(id, insertion.customer)?;

    let pair = ctx.pair_mut(id)?;
    match insertion.placement {
        Placement::Truck { position } => pair.truck.insert(position, insertion.customer),
        Placement::Drone { trip, index } => match pair.trips.get_mut(trip) {
            Some(t) if index >= 1 && index < t.path.len() => t.path.insert(index, insertion.customer),
            _ => {
                return Err(RoutingError::MalformedTrip {
                    pair: id,
                    trip,
                    reason: format!("no slot {index}"),
                });
            }
        },
    }

    ctx.refresh_pair(id)?;
    Ok(())
}

/// First feasible truck position, otherwise first feasible drone slot.
pub fn insert_to_specific_vehicle(
    ctx: &mut Context,
    id: usize,
    customer: usize,
    min_position: usize,
) -> Result<bool, RoutingError> {
    let options = insertions(ctx, id, customer, min_position)?;
    let choice = options
        .iter()
        .find(|o| o.placement.vehicle() == Vehicle::Truck)
        .or_else(|| options.iter().find(|o| o.placement.vehicle() == Vehicle::Drone))
        .copied();

    match choice {
        Some(insertion) => {
            apply(ctx, id, &insertion)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn _best_drone_insertion(ctx: &Context, id: usize, customer: usize, min_position: usize) -> Result<Option<Insertion>, RoutingError> {
    Ok(insertions(ctx, id, customer, min_position)?
        .into_iter()
        .filter(|o| o.placement.vehicle() == Vehicle::Drone)
        .min_by(_by_score))
}

/// Try to open a new trip between two free truck nodes and fill it greedily with the closest candidates.
///
/// Returns the customers placed on the new trip (empty if no trip could be built).
pub fn create_new_drone_trip(
    ctx: &mut Context,
    id: usize,
    candidates: &[usize],
    min_position: usize,
) -> Result<Vec<usize>, RoutingError> {
    let built = {
        let pair = ctx.pair(id)?;
        let config = &ctx.config;
        let customers = &ctx.customers;
        let nodes = pair.truck.nodes();
        let first = min_position.max(ctx.first_open_position(id));

        let eligible = candidates
            .iter()
            .copied()
            .filter(|&c| pair.locate(c).is_none() && customers[c].drone_servable(config.drone.capacity))
            .collect::<Vec<_>>();

        let mut built = None;
        'search: for i in first..nodes.len().saturating_sub(1) {
            let launch = nodes[i];
            if pair.trip_launched_at(launch).is_some() {
                continue;
            }

            for j in i + 1..nodes.len() - 1 {
                if !pair.span_is_free(i, j, None) {
                    break;
                }

                let retrieval = nodes[j];
                if pair.trip_retrieved_at(retrieval).is_some() {
                    continue;
                }

                let path = _fill_trip(ctx, launch, retrieval, &eligible);
                if path.len() > 2 {
                    built = Some(path);
                    break 'search;
                }
            }
        }

        built
    };

    let Some(path) = built else {
        return Ok(vec![]);
    };

    let served = path[1..path.len() - 1].to_vec();
    let battery = ctx.config.drone.battery;
    let pair = ctx.pair_mut(id)?;
    pair.trips.push(DroneTrip::new(path, battery));
    pair.sort_trips();
    ctx.refresh_pair(id)?;

    Ok(served)
}

/// Candidates by increasing drone distance from the launch node, added while the payload fits; stops at the first
/// candidate that would drain the battery.
fn _fill_trip(ctx: &Context, launch: usize, retrieval: usize, eligible: &[usize]) -> Vec<usize> {
    let config = &ctx.config;
    let customers = &ctx.customers;
    let departure = customers[launch].record.truck.map_or(0.0, |v| v.departure);
    let ready = customers[retrieval]
        .record
        .truck
        .map(|v| v.service_begin + config.service_time);

    let mut sorted = eligible.to_vec();
    sorted.sort_by(|&a, &b| {
        config.drone_distances[launch][a]
            .partial_cmp(&config.drone_distances[launch][b])
            .unwrap_or(Ordering::Equal)
    });

    let mut path = vec![launch, retrieval];
    let mut payload = 0.0;
    for c in sorted {
        let weight = customers[c].weight();
        if payload + weight > config.drone.capacity {
            continue;
        }

        let mut candidate = path.clone();
        candidate.insert(candidate.len() - 1, c);
        let load = candidate[1..candidate.len() - 1]
            .iter()
            .map(|&c| customers[c].delivery())
            .sum();
        let simulation = timing::simulate_trip(config, customers, &candidate, 0, departure, load, ready);
        if simulation.energy > config.drone.battery {
            break;
        }
        if simulation.overload.is_some() {
            continue;
        }

        path = candidate;
        payload += weight;
    }

    path
}

/// Append customers right before the final depot. Returns those actually appended.
pub fn emergency_insert(ctx: &mut Context, id: usize, customers: &[usize]) -> Result<Vec<usize>, RoutingError> {
    ctx.registry.check_all(id, customers)?;

    let pair = ctx.pair_mut(id)?;
    let mut appended = vec![];
    for &c in customers {
        if pair.locate(c).is_none() {
            pair.truck.push(c);
            appended.push(c);
        }
    }

    ctx.refresh_pair(id)?;
    Ok(appended)
}

/// Run one repair operator. Returns the customers it could not place.
pub fn apply_operator(
    ctx: &mut Context,
    id: usize,
    operator: RepairOperator,
    customers: &[usize],
    min_position: usize,
) -> Result<Vec<usize>, RoutingError> {
    let mut failed = vec![];
    match operator {
        RepairOperator::RandomOrder => {
            let mut order = customers.to_vec();
            order.shuffle(&mut ctx.rng);
            for c in order {
                if !insert_to_specific_vehicle(ctx, id, c, min_position)? {
                    failed.push(c);
                }
            }
        }
        RepairOperator::CheapestDistance => {
            let mut remaining = customers.to_vec();
            while !remaining.is_empty() {
                let mut best: Option<Insertion> = None;
                for &c in &remaining {
                    for option in insertions(ctx, id, c, min_position)? {
                        if best.is_none_or(|b| _by_score(&option, &b) == Ordering::Less) {
                            best = Some(option);
                        }
                    }
                }

                match best {
                    Some(insertion) => {
                        apply(ctx, id, &insertion)?;
                        remaining.retain(|&c| c != insertion.customer);
                    }
                    None => failed.push(remaining.remove(0)),
                }
            }
        }
        RepairOperator::RegretDistance => {
            let mut remaining = customers.to_vec();
            while !remaining.is_empty() {
                let mut best: Option<(f64, Insertion)> = None;
                for &c in &remaining {
                    let mut options = insertions(ctx, id, c, min_position)?;
                    options.sort_by(_by_score);
                    let Some(&first) = options.first() else {
                        continue;
                    };

                    let regret = options.get(1).map_or(f64::INFINITY, |second| second.score - first.score);
                    let better = match &best {
                        None => true,
                        Some((r, b)) => regret > *r || (regret == *r && first.score < b.score),
                    };
                    if better {
                        best = Some((regret, first));
                    }
                }

                match best {
                    Some((_, insertion)) => {
                        apply(ctx, id, &insertion)?;
                        remaining.retain(|&c| c != insertion.customer);
                    }
                    None => failed.push(remaining.remove(0)),
                }
            }
        }
        RepairOperator::GreedyFeasibility => {
            let mut order = customers.to_vec();
            order.sort_by(|&a, &b| {
                ctx.customers[b]
                    .weight()
                    .partial_cmp(&ctx.customers[a].weight())
                    .unwrap_or(Ordering::Equal)
            });
            for c in order {
                if !insert_to_specific_vehicle(ctx, id, c, min_position)? {
                    failed.push(c);
                }
            }
        }
        RepairOperator::DronePriority => {
            let capacity = ctx.config.drone.capacity;
            let (eligible, others): (Vec<usize>, Vec<usize>) = customers
                .iter()
                .partition(|&&c| ctx.customers[c].drone_servable(capacity));

            for c in eligible {
                match _best_drone_insertion(ctx, id, c, min_position)? {
                    Some(insertion) => apply(ctx, id, &insertion)?,
                    None => {
                        if !insert_to_specific_vehicle(ctx, id, c, min_position)? {
                            failed.push(c);
                        }
                    }
                }
            }
            for c in others {
                if !insert_to_specific_vehicle(ctx, id, c, min_position)? {
                    failed.push(c);
                }
            }
        }
        RepairOperator::DroneNewRoute => {
            let capacity = ctx.config.drone.capacity;
            let (mut eligible, others): (Vec<usize>, Vec<usize>) = customers
                .iter()
                .partition(|&&c| ctx.customers[c].drone_servable(capacity));

            while !eligible.is_empty() {
                let served = create_new_drone_trip(ctx, id, &eligible, min_position)?;
                if !served.is_empty() {
                    eligible.retain(|c| !served.contains(c));
                    continue;
                }

                let c = eligible.remove(0);
                match _best_drone_insertion(ctx, id, c, min_position)? {
                    Some(insertion) => apply(ctx, id, &insertion)?,
                    None => {
                        if !insert_to_specific_vehicle(ctx, id, c, min_position)? {
                            failed.push(c);
                        }
                    }
                }
            }
            for c in others {
                if !insert_to_specific_vehicle(ctx, id, c, min_position)? {
                    failed.push(c);
                }
            }
        }
    }

    Ok(failed)
}

/// Reinsert removed customers of one pair with an adaptively chosen operator, then repair feasibility.
///
/// A customer owned by another pair rejects the whole request before anything changes. Customers the operator
/// cannot place go to the truck route tail. The operator is credited when it places everyone and the pair ends
/// up cheaper than `baseline`.
pub fn repair_solution(
    ctx: &mut Context,
    adaptive: &mut AdaptiveState<RepairOperator>,
    id: usize,
    customers: &[usize],
    baseline: f64,
) -> Result<RepairStatus, RoutingError> {
    ctx.registry.check_all(id, customers)?;

    let pending = {
        let pair = ctx.pair(id)?;
        customers
            .iter()
            .copied()
            .filter(|&c| pair.locate(c).is_none())
            .collect::<Vec<_>>()
    };
    if pending.is_empty() {
        let feasible = feasibility::check_and_repair(ctx, id)?;
        return Ok(RepairStatus {
            routed: all_routed(ctx, id)?,
            feasible,
            cost: ctx.pair_cost(id),
            ..RepairStatus::default()
        });
    }

    let operator = adaptive.select(&mut ctx.rng);
    let min_position = ctx.first_open_position(id);
    let failed = apply_operator(ctx, id, operator, &pending, min_position)?;
    let emergency = if failed.is_empty() {
        vec![]
    } else {
        emergency_insert(ctx, id, &failed)?
    };

    let feasible = feasibility::check_and_repair(ctx, id)?;
    let status = RepairStatus {
        operator: Some(operator),
        inserted: pending.into_iter().filter(|c| !failed.contains(c)).collect(),
        emergency,
        routed: all_routed(ctx, id)?,
        feasible,
        cost: ctx.pair_cost(id),
    };
    adaptive.record(operator, status.success() && status.cost < baseline);

    Ok(status)
}

/// Whether every customer registered to the pair is on one of its routes.
pub fn all_routed(ctx: &Context, id: usize) -> Result<bool, RoutingError> {
    let pair: &VehiclePair = ctx.pair(id)?;
    Ok(ctx
        .registry
        .assigned(id)?
        .iter()
        .all(|&c| pair.truck.contains(c) || pair.trip_of(c).is_some()))
}
