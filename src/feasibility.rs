use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::context::Context;
use crate::customers::Vehicle;
use crate::errors::RoutingError;
use crate::routes::Location;
use crate::timing::{self, OverloadCause};

/// Violation types, in repair priority order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ViolationKind {
    #[serde(rename = "truck_load")]
    TruckLoad,
    #[serde(rename = "drone_load")]
    DroneLoad,
    #[serde(rename = "drone_energy")]
    DroneEnergy,
    #[serde(rename = "time_window")]
    TimeWindow,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::TruckLoad => "truck_load",
                Self::DroneLoad => "drone_load",
                Self::DroneEnergy => "drone_energy",
                Self::TimeWindow => "time_window",
            }
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Violation {
    TruckLoad {
        position: usize,
        node: usize,
        load: f64,
        cause: OverloadCause,
    },
    LaunchOverload {
        trip: usize,
        load: f64,
    },
    FlightOverload {
        trip: usize,
        index: usize,
    },
    DroneEnergy {
        trip: usize,
        energy: f64,
        overflow: usize,
    },
    Early {
        customer: usize,
        vehicle: Vehicle,
        wait: f64,
    },
    Late {
        customer: usize,
        vehicle: Vehicle,
        lateness: f64,
    },
}

impl Violation {
    pub fn kind(&self) -> ViolationKind {
        match self {
            Self::TruckLoad { .. } => ViolationKind::TruckLoad,
            Self::LaunchOverload { .. } | Self::FlightOverload { .. } => ViolationKind::DroneLoad,
            Self::DroneEnergy { .. } => ViolationKind::DroneEnergy,
            Self::Early { .. } | Self::Late { .. } => ViolationKind::TimeWindow,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RepairCounter {
    pub calls: usize,
    pub successes: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FeasibilityStatistics {
    pub checks: usize,
    pub feasible: usize,
    pub aggressive: usize,
    pub repairs: BTreeMap<ViolationKind, RepairCounter>,
}

/// `"kind:count"` entries sorted by kind and joined by `|`.
pub fn signature(violations: &[Violation]) -> String {
    let mut counts = BTreeMap::<ViolationKind, usize>::new();
    for v in violations {
        *counts.entry(v.kind()).or_default() += 1;
    }

    counts
        .into_iter()
        .map(|(kind, count)| format!("{kind}:{count}"))
        .collect::<Vec<_>>()
        .join("|")
}

/// Violations of the part of the pair that can still change.
///
/// Visited customers and trips already in flight are history and never reported.
pub fn scan(ctx: &Context, id: usize) -> Result<Vec<Violation>, RoutingError> {
    let pair = ctx.pair(id)?;
    let config = &ctx.config;
    let tolerance = config.search.violation_tolerance;
    let first_open = ctx.first_open_position(id);
    let mut violations = vec![];

    for overload in timing::simulate_truck_load(config, &ctx.customers, pair).overloads {
        // The departure load only matters while the truck is still at the depot.
        let open = overload.position >= first_open || (overload.cause == OverloadCause::Depot && first_open == 1);
        if open && overload.load > config.truck.capacity + tolerance {
            violations.push(Violation::TruckLoad {
                position: overload.position,
                node: overload.node,
                load: overload.load,
                cause: overload.cause,
            });
        }
    }

    for (t, trip) in pair.trips.iter().enumerate() {
        if !ctx.trip_is_open(id, t) {
            continue;
        }

        if trip.initial_load > config.drone.capacity + tolerance {
            violations.push(Violation::LaunchOverload {
                trip: t,
                load: trip.initial_load,
            });
        } else {
            let departure = ctx.customers[trip.launch()].record.truck.map_or(0.0, |v| v.departure);
            let simulation = timing::simulate_trip(
                config,
                &ctx.customers,
                &trip.path,
                0,
                departure,
                trip.initial_load,
                None,
            );
            if let Some(index) = simulation.overload {
                violations.push(Violation::FlightOverload { trip: t, index });
            }
        }

        if trip.energy > config.drone.battery + tolerance {
            let launch = ctx.customers[trip.launch()].record.truck.map_or(0.0, |v| v.departure);
            let ready = ctx.customers[trip.retrieval()]
                .record
                .truck
                .map(|v| v.service_begin + config.service_time);
            let simulation =
                timing::simulate_trip(config, &ctx.customers, &trip.path, 0, launch, trip.initial_load, ready);

            let mut spent = 0.0;
            let overflow = simulation
                .leg_energy
                .iter()
                .position(|e| {
                    spent += e;
                    spent > config.drone.battery
                })
                .map_or(trip.path.len() - 1, |i| i + 1);

            violations.push(Violation::DroneEnergy {
                trip: t,
                energy: trip.energy,
                overflow,
            });
        }
    }

    for &c in ctx.registry.assigned(id)? {
        let customer = &ctx.customers[c];
        if customer.is_processed() {
            continue;
        }

        let Some(service_by) = customer.record.service_by else {
            continue;
        };
        let Some(visit) = customer.record.visit() else {
            continue;
        };

        if visit.service_begin < customer.start_time - tolerance {
            violations.push(Violation::Early {
                customer: c,
                vehicle: service_by.vehicle,
                wait: customer.start_time - visit.service_begin,
            });
        } else if visit.service_begin > customer.end_time + tolerance {
            violations.push(Violation::Late {
                customer: c,
                vehicle: service_by.vehicle,
                lateness: visit.service_begin - customer.end_time,
            });
        }
    }

    Ok(violations)
}

/// Move customers (in order) to the end of the truck route. Visited customers and trip anchors stay put.
fn _move_to_truck_tail(ctx: &mut Context, id: usize, customers: &[usize]) -> Result<usize, RoutingError> {
    let mut moved = 0;
    for &c in customers {
        if !ctx.is_movable(c) {
            continue;
        }

        let pair = ctx.pair_mut(id)?;
        if pair.detach(c).is_some() {
            pair.truck.push(c);
            moved += 1;
        }
    }

    Ok(moved)
}

/// Dissolve an open trip and append its customers to the truck route.
fn _dissolve_to_truck(ctx: &mut Context, id: usize, trip: usize) -> Result<usize, RoutingError> {
    if !ctx.trip_is_open(id, trip) {
        return Ok(0);
    }

    let customers = ctx.pair_mut(id)?.dissolve_trip(trip);
    let pair = ctx.pair_mut(id)?;
    for &c in &customers {
        pair.truck.push(c);
    }

    Ok(customers.len())
}

fn _repair_truck_load(ctx: &mut Context, id: usize, violations: &[Violation]) -> Result<bool, RoutingError> {
    let Some(Violation::TruckLoad { node, cause, .. }) =
        violations.iter().find(|v| v.kind() == ViolationKind::TruckLoad)
    else {
        return Ok(false);
    };

    let moved = match cause {
        // Every delivery of the pair leaves the depot, no move inside the pair lowers that load.
        OverloadCause::Depot => 0,
        OverloadCause::Retrieval { trip } => _dissolve_to_truck(ctx, id, *trip)?,
        OverloadCause::Customer => {
            let mut moved = 0;
            let anchored = ctx.pair(id)?.anchored_trips(*node);
            for t in anchored.into_iter().rev() {
                moved += _dissolve_to_truck(ctx, id, t)?;
            }
            moved + _move_to_truck_tail(ctx, id, &[*node])?
        }
    };

    Ok(moved > 0)
}

fn _repair_drone_load(ctx: &mut Context, id: usize, violations: &[Violation]) -> Result<bool, RoutingError> {
    let mut targets = vec![];
    for v in violations {
        let pair = ctx.pair(id)?;
        match *v {
            Violation::LaunchOverload { trip, .. } => {
                let path = &pair.trips[trip].path;
                let end = (path.len() / 2).max(2).min(path.len() - 1);
                targets.extend_from_slice(&path[1..end]);
            }
            Violation::FlightOverload { trip, index } => {
                let path = &pair.trips[trip].path;
                if index > 0 && index < path.len() - 1 {
                    targets.push(path[index]);
                }
            }
            _ => {}
        }
    }

    Ok(_move_to_truck_tail(ctx, id, &targets)? > 0)
}

fn _repair_drone_energy(ctx: &mut Context, id: usize, violations: &[Violation]) -> Result<bool, RoutingError> {
    let mut targets = vec![];
    for v in violations {
        if let Violation::DroneEnergy { trip, overflow, .. } = *v {
            let path = &ctx.pair(id)?.trips[trip].path;
            let start = overflow.min(path.len() / 2).max(1);
            targets.extend_from_slice(&path[start..path.len() - 1]);
        }
    }

    Ok(_move_to_truck_tail(ctx, id, &targets)? > 0)
}

fn _repair_time_windows(ctx: &mut Context, id: usize, violations: &[Violation]) -> Result<bool, RoutingError> {
    let mut changed = false;
    let first_open = ctx.first_open_position(id);
    let late = violations
        .iter()
        .filter_map(|v| match *v {
            Violation::Late { customer, .. } => Some(customer),
            _ => None,
        })
        .take(ctx.config.search.max_late_relocations)
        .collect::<Vec<_>>();

    for c in late {
        if !ctx.is_movable(c) {
            continue;
        }

        let open = ctx.pair(id)?.locate(c).is_some_and(|location| match location {
            Location::Truck { .. } => true,
            Location::Drone { trip, .. } => ctx.trip_is_open(id, trip),
        });
        if !open {
            continue;
        }

        let pair = ctx.pair_mut(id)?;
        match pair.locate(c) {
            Some(Location::Truck { position }) => {
                let target = position.saturating_sub(2).max(first_open);
                if target < position && !pair.is_anchor(c) {
                    pair.truck.remove(c);
                    pair.truck.insert(target, c);
                    changed = true;
                }
            }
            Some(Location::Drone { trip, index }) => {
                if index > 1 {
                    pair.trips[trip].path.swap(index - 1, index);
                    changed = true;
                }
            }
            None => {}
        }
    }

    // Early service is a stale record: a fresh recompute starts service at the window opening.
    if violations.iter().any(|v| matches!(v, Violation::Early { .. })) {
        changed = true;
    }

    Ok(changed)
}

/// Drop every open trip that breaks its energy or load limit, move its customers to the truck route tail and
/// refresh all times.
pub fn aggressive_repair(ctx: &mut Context, id: usize) -> Result<(), RoutingError> {
    let tolerance = ctx.config.search.violation_tolerance;
    let doomed = {
        let pair = ctx.pair(id)?;
        (0..pair.trips.len())
            .filter(|&t| ctx.trip_is_open(id, t))
            .filter(|&t| {
                let trip = &pair.trips[t];
                let departure = ctx.customers[trip.launch()].record.truck.map_or(0.0, |v| v.departure);
                let simulation = timing::simulate_trip(
                    &ctx.config,
                    &ctx.customers,
                    &trip.path,
                    0,
                    departure,
                    trip.initial_load,
                    None,
                );

                trip.energy > ctx.config.drone.battery + tolerance || simulation.overload.is_some()
            })
            .collect::<Vec<_>>()
    };

    for &t in doomed.iter().rev() {
        _dissolve_to_truck(ctx, id, t)?;
    }

    ctx.refresh_pair(id)?;
    ctx.statistics.aggressive += 1;
    Ok(())
}

/// Bounded repair loop. Each round repairs only the highest-priority violation type; a repeated violation
/// signature or exhausted attempts fall back to [`aggressive_repair`].
///
/// Returns whether the pair ends up free of violations.
pub fn check_and_repair(ctx: &mut Context, id: usize) -> Result<bool, RoutingError> {
    ctx.refresh_pair(id)?;
    ctx.statistics.checks += 1;

    let mut previous: Option<String> = None;
    for _ in 0..ctx.config.search.max_repair_attempts {
        let violations = scan(ctx, id)?;
        if violations.is_empty() {
            ctx.statistics.feasible += 1;
            return Ok(true);
        }

        let current = signature(&violations);
        if previous.as_ref() == Some(&current) {
            break;
        }
        previous = Some(current);

        let Some(kind) = violations.iter().map(Violation::kind).min() else {
            break;
        };
        let before = violations.iter().filter(|v| v.kind() == kind).count();

        let changed = match kind {
            ViolationKind::TruckLoad => _repair_truck_load(ctx, id, &violations)?,
            ViolationKind::DroneLoad => _repair_drone_load(ctx, id, &violations)?,
            ViolationKind::DroneEnergy => _repair_drone_energy(ctx, id, &violations)?,
            ViolationKind::TimeWindow => _repair_time_windows(ctx, id, &violations)?,
        };
        ctx.refresh_pair(id)?;

        let after = scan(ctx, id)?.iter().filter(|v| v.kind() == kind).count();
        let counter = ctx.statistics.repairs.entry(kind).or_default();
        counter.calls += 1;
        if changed && after < before {
            counter.successes += 1;
        }
    }

    aggressive_repair(ctx, id)?;
    let feasible = scan(ctx, id)?.is_empty();
    if feasible {
        ctx.statistics.feasible += 1;
    }

    Ok(feasible)
}
