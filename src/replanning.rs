use std::fmt;
use std::time::Instant;

use colored::Colorize;
use rand::Rng;
use serde::Serialize;

use crate::adaptive::{AdaptiveState, WeightRule};
use crate::context::Context;
use crate::customers::{Outcome, Vehicle};
use crate::destroy::{self, DESTROY_OPERATORS, DestroyOperator};
use crate::errors::RoutingError;
use crate::feasibility;
use crate::neighborhoods;
use crate::repair::{self, REPAIR_OPERATORS, RepairOperator};
use crate::routes::{Location, Route, VehiclePair};
use crate::timing;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Severity {
    #[default]
    #[serde(rename = "none")]
    None,
    #[serde(rename = "minor")]
    Minor,
    #[serde(rename = "moderate")]
    Moderate,
    #[serde(rename = "critical")]
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::None => "none",
                Self::Minor => "minor",
                Self::Moderate => "moderate",
                Self::Critical => "critical",
            }
        )
    }
}

/// Constraint broken by a failure, looking only at what is still ahead of the vehicle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum DirectViolation {
    EnergyInsufficient { trip: usize, remaining: f64, required: f64 },
    DroneOverload { trip: usize, node: usize, load: f64, excess: f64 },
    TruckOverload { position: usize, node: usize, load: f64 },
}

impl DirectViolation {
    pub fn is_critical(&self, drone_capacity: f64) -> bool {
        match self {
            Self::EnergyInsufficient { .. } | Self::TruckOverload { .. } => true,
            Self::DroneOverload { excess, .. } => *excess > 0.1 * drone_capacity,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum CascadingEffect {
    /// Truck stop after the retrieval node of the failed customer's trip.
    TruckDelay { customer: usize, trip: usize },
    SubsequentCustomer { customer: usize, vehicle: Vehicle },
    EnergyCritical { trip: usize, ratio: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EnergyWarning {
    pub trip: usize,
    pub margin: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConstraintAnalysis {
    pub pair: usize,
    pub customer: usize,
    pub vehicle: Vehicle,
    pub direct: Vec<DirectViolation>,
    pub cascading: Vec<CascadingEffect>,
    pub warning: Option<EnergyWarning>,
    pub requires_replanning: bool,
    pub severity: Severity,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ReplanOutcome {
    /// The drone skips the failed customer and flies the rest of its trip.
    Skipped,

    /// Trailing trip customers were dropped and reinserted elsewhere in the pair.
    Abandoned { customers: Vec<usize>, emergency: Vec<usize> },

    /// Every unvisited customer of the trip was dropped and reinserted.
    Collapsed { customers: Vec<usize>, emergency: Vec<usize> },

    /// Nothing left to replan behind the failure.
    Unchanged,
    Improved { before: f64, after: f64 },

    /// The replanning scope was appended to the truck route.
    Emergency { customers: Vec<usize> },
    Failed,
}

impl ReplanOutcome {
    pub fn success(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

impl fmt::Display for ReplanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Skipped => "skipped",
                Self::Abandoned { .. } => "abandoned",
                Self::Collapsed { .. } => "collapsed",
                Self::Unchanged => "unchanged",
                Self::Improved { .. } => "improved",
                Self::Emergency { .. } => "emergency",
                Self::Failed => "failed",
            }
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageRecord {
    pub stage: usize,
    pub customer: usize,
    pub outcome: Outcome,
    pub vehicle: Vehicle,
    pub pair: usize,
    pub service_begin: f64,
    pub analysis: Option<ConstraintAnalysis>,
    pub replan: Option<ReplanOutcome>,
    pub feasible: bool,
    pub pair_cost: f64,
    pub total_cost: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    pub stages: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub replanned: usize,
    pub replan_successes: usize,
    pub cost_improvements: usize,
    pub energy_warnings: usize,
    pub pheromone_updates: usize,
    pub evaporations: usize,
}

/// Failure-driven re-optimization of a fleet of truck/drone pairs.
pub struct DynamicOptimizer {
    pub ctx: Context,
    pub destroy: AdaptiveState<DestroyOperator>,
    pub repair: AdaptiveState<RepairOperator>,
    pub statistics: RunStatistics,
}

fn _pair_edges(pair: &VehiclePair) -> Vec<(usize, usize)> {
    let mut edges = pair.truck.edges();
    for trip in &pair.trips {
        edges.extend(trip.edges());
    }

    edges
}

impl DynamicOptimizer {
    pub fn new(ctx: Context) -> Self {
        let search = &ctx.config.search;
        let destroy = AdaptiveState::new(&DESTROY_OPERATORS, search.adaptive_window, WeightRule::PerOperator);
        let repair = AdaptiveState::new(
            &REPAIR_OPERATORS,
            search.adaptive_window,
            WeightRule::Global {
                min_calls: search.adaptive_min_calls,
            },
        );

        Self {
            ctx,
            destroy,
            repair,
            statistics: RunStatistics::default(),
        }
    }

    /// Unvisited routed customers by planned service begin.
    pub fn stage_order(&self) -> Vec<usize> {
        let mut stages = (1..self.ctx.customers.len())
            .filter_map(|c| {
                let customer = &self.ctx.customers[c];
                if customer.is_processed() || customer.record.service_by.is_none() {
                    return None;
                }
                customer.record.service_begin().map(|t| (t, c))
            })
            .collect::<Vec<_>>();
        stages.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        stages.into_iter().map(|(_, c)| c).collect()
    }

    pub fn run(&mut self) -> Result<bool, RoutingError> {
        self.run_with(|_| Ok::<(), RoutingError>(()))
    }

    /// Visit every customer in service order, replanning after failures that break a constraint.
    ///
    /// `observer` sees every stage once it is settled. Returns whether every customer was visited.
    pub fn run_with<E, F>(&mut self, mut observer: F) -> Result<bool, E>
    where
        E: From<RoutingError>,
        F: FnMut(&StageRecord) -> Result<(), E>,
    {
        let mut stages = self.stage_order();
        let mut index = 0;
        while index < stages.len() {
            let customer = stages[index];
            if self.ctx.customers[customer].is_processed() {
                index += 1;
                continue;
            }

            let record = self.process_stage(customer)?;
            if self.ctx.config.verbose {
                let outcome = match record.outcome {
                    Outcome::Succeeded => record.outcome.to_string().green(),
                    _ => record.outcome.to_string().red(),
                };
                eprintln!(
                    "Stage #{} customer {}: {} by {} #{} (replan = {}, cost = {:.2})",
                    record.stage,
                    record.customer,
                    outcome,
                    record.vehicle,
                    record.pair,
                    record.replan.as_ref().map_or(String::from("-"), |r| r.to_string()),
                    record.total_cost,
                );
            }
            observer(&record)?;

            if record.replan.as_ref().is_some_and(ReplanOutcome::success) {
                stages = self.stage_order();
                index = 0;
            } else {
                index += 1;
            }
        }

        Ok((1..self.ctx.customers.len()).all(|c| self.ctx.customers[c].is_processed()))
    }

    /// Visit one customer: draw its presence, update battery and loads, and replan its pair after a failure.
    pub fn process_stage(&mut self, customer: usize) -> Result<StageRecord, RoutingError> {
        let id = self
            .ctx
            .registry
            .owner(customer)
            .ok_or(RoutingError::UnknownCustomer(customer))?;
        let location = self
            .ctx
            .pair(id)?
            .locate(customer)
            .ok_or(RoutingError::CustomerNotRouted { customer, pair: id })?;
        let service_begin = self.ctx.customers[customer].record.service_begin().unwrap_or(0.0);

        if let Location::Drone { trip, index } = location {
            self._charge_arrival(id, trip, index)?;
        }

        let draw = self.ctx.rng.random::<f64>();
        let present = self.ctx.customers[customer].availability.is_present(service_begin, draw);
        if let Location::Drone { trip, .. } = location {
            self._charge_departure(id, trip, customer, present)?;
        }

        self.ctx.customers[customer].record.outcome = if present {
            Outcome::Succeeded
        } else {
            Outcome::Failed
        };
        self.ctx.refresh_pair(id)?;

        self.statistics.stages += 1;
        let (analysis, replan) = if present {
            self.statistics.succeeded += 1;
            (None, None)
        } else {
            self.statistics.failed += 1;
            let analysis = self.analyze_failure(id, customer)?;
            if analysis.warning.is_some() {
                self.statistics.energy_warnings += 1;
            }

            let replan = if analysis.requires_replanning {
                self.statistics.replanned += 1;
                let outcome = match location.vehicle() {
                    Vehicle::Drone => self.replan_drone(id, customer)?,
                    Vehicle::Truck => self.replan_truck(id, customer)?,
                };
                if outcome.success() {
                    self.statistics.replan_successes += 1;
                }
                Some(outcome)
            } else {
                None
            };

            (Some(analysis), replan)
        };

        Ok(StageRecord {
            stage: self.statistics.stages,
            customer,
            outcome: self.ctx.customers[customer].record.outcome,
            vehicle: location.vehicle(),
            pair: id,
            service_begin,
            analysis,
            replan,
            feasible: feasibility::scan(&self.ctx, id)?.is_empty(),
            pair_cost: self.ctx.pair_cost(id),
            total_cost: self.ctx.total_cost(),
        })
    }

    /// Flight energy of the leg into `path[index]`, charged on arrival with the load currently on board.
    fn _charge_arrival(&mut self, id: usize, trip: usize, index: usize) -> Result<(), RoutingError> {
        let Context { config, pairs, .. } = &mut self.ctx;
        let pair = pairs.get_mut(id).ok_or(RoutingError::UnknownPair(id))?;
        let trip = &mut pair.trips[trip];

        let (prev, node) = (trip.path[index - 1], trip.path[index]);
        let energy = config
            .drone
            .flight_energy(trip.current_load, config.drone_distances[prev][node]);
        trip.current_remain_battery -= energy;

        Ok(())
    }

    /// Hover and service energy, charged on leaving. A failed stop is neither waited for nor serviced.
    fn _charge_departure(&mut self, id: usize, trip: usize, customer: usize, present: bool) -> Result<(), RoutingError> {
        if !present {
            return Ok(());
        }

        let Context {
            config,
            customers,
            pairs,
            ..
        } = &mut self.ctx;
        let pair = pairs.get_mut(id).ok_or(RoutingError::UnknownPair(id))?;
        let trip = &mut pair.trips[trip];

        let wait = customers[customer].record.drone.map_or(0.0, |v| v.wait);
        let energy = config.drone.hover_energy(trip.current_load, wait)
            + config.drone.service_energy(trip.current_load, config.service_time);
        trip.current_remain_battery -= energy;

        Ok(())
    }

    /// Energy the drone still needs to fly `path` from `index` to the retrieval node, with the current load.
    pub fn remaining_energy(&self, id: usize, trip: usize, path: &[usize], index: usize) -> Result<f64, RoutingError> {
        let ctx = &self.ctx;
        let pair = ctx.pair(id)?;
        let Some(t) = pair.trips.get(trip) else {
            return Err(RoutingError::MalformedTrip {
                pair: id,
                trip,
                reason: String::from("no such trip"),
            });
        };

        let node = path[index];
        let departure = ctx.customers[node].record.drone.map_or(0.0, |v| v.departure);
        let ready = ctx.customers[t.retrieval()]
            .record
            .truck
            .map(|v| v.service_begin + ctx.config.service_time);
        let simulation = timing::simulate_trip(
            &ctx.config,
            &ctx.customers,
            path,
            index,
            departure,
            t.current_load,
            ready,
        );

        Ok(simulation.energy)
    }

    /// Direct constraint check and cascading-effect analysis after `customer` of pair `id` failed.
    pub fn analyze_failure(&self, id: usize, customer: usize) -> Result<ConstraintAnalysis, RoutingError> {
        let ctx = &self.ctx;
        let config = &ctx.config;
        let pair = ctx.pair(id)?;
        let location = pair
            .locate(customer)
            .ok_or(RoutingError::CustomerNotRouted { customer, pair: id })?;

        let mut direct = vec![];
        let mut warning = None;
        match location {
            Location::Drone { trip, index } => {
                let t = &pair.trips[trip];
                let required = self.remaining_energy(id, trip, &t.path, index)?;
                let remaining = t.current_remain_battery;
                if required > remaining {
                    direct.push(DirectViolation::EnergyInsufficient {
                        trip,
                        remaining,
                        required,
                    });
                } else if remaining - required < config.search.energy_warning_margin * config.drone.battery {
                    warning = Some(EnergyWarning {
                        trip,
                        margin: remaining - required,
                    });
                }

                let departure = ctx.customers[customer].record.drone.map_or(0.0, |v| v.departure);
                let simulation =
                    timing::simulate_trip(config, &ctx.customers, &t.path, index, departure, t.current_load, None);
                if let Some(i) = simulation.overload {
                    direct.push(DirectViolation::DroneOverload {
                        trip,
                        node: t.path[i],
                        load: simulation.peak_load,
                        excess: simulation.peak_load - config.drone.capacity,
                    });
                }
            }
            Location::Truck { position } => {
                for overload in timing::simulate_truck_load(config, &ctx.customers, pair).overloads {
                    if overload.position >= position && overload.load > config.truck.capacity {
                        direct.push(DirectViolation::TruckOverload {
                            position: overload.position,
                            node: overload.node,
                            load: overload.load,
                        });
                    }
                }
            }
        }

        let mut cascading = vec![];
        let nodes = pair.truck.nodes();
        if let Some(trip) = pair.trips.iter().position(|t| t.path.contains(&customer)) {
            let t = &pair.trips[trip];
            if let Some((_, retrieval)) = pair.trip_span(trip) {
                for &c in &nodes[retrieval + 1..nodes.len() - 1] {
                    if !ctx.customers[c].is_processed() {
                        cascading.push(CascadingEffect::TruckDelay { customer: c, trip });
                    }
                }
            }

            if let Some(i) = t.path.iter().position(|&c| c == customer) {
                for &c in t.path.iter().take(t.path.len() - 1).skip(i + 1) {
                    if !ctx.customers[c].is_processed() {
                        cascading.push(CascadingEffect::SubsequentCustomer {
                            customer: c,
                            vehicle: Vehicle::Drone,
                        });
                    }
                }
            }

            if t.energy > 0.9 * config.drone.battery {
                cascading.push(CascadingEffect::EnergyCritical {
                    trip,
                    ratio: t.energy / config.drone.battery,
                });
            }
        }
        if let Location::Truck { position } = location {
            for &c in &nodes[position + 1..nodes.len() - 1] {
                if !ctx.customers[c].is_processed() {
                    cascading.push(CascadingEffect::SubsequentCustomer {
                        customer: c,
                        vehicle: Vehicle::Truck,
                    });
                }
            }
        }

        let critical = direct.iter().any(|v| v.is_critical(config.drone.capacity));
        let requires_replanning = critical || cascading.len() > config.search.critical_cascade;
        let severity = if critical {
            Severity::Critical
        } else if direct.len() > 2 || cascading.len() > config.search.critical_cascade {
            Severity::Moderate
        } else if !direct.is_empty() || !cascading.is_empty() {
            Severity::Minor
        } else {
            Severity::None
        };

        Ok(ConstraintAnalysis {
            pair: id,
            customer,
            vehicle: location.vehicle(),
            direct,
            cascading,
            warning,
            requires_replanning,
            severity,
        })
    }

    /// Keep the drone flying if its battery allows, otherwise drop trailing customers (pickups first) or collapse
    /// the trip, then reinsert the dropped customers after the trip's retrieval node.
    pub fn replan_drone(&mut self, id: usize, customer: usize) -> Result<ReplanOutcome, RoutingError> {
        let Some(Location::Drone { trip, index }) = self.ctx.pair(id)?.locate(customer) else {
            return Ok(ReplanOutcome::Failed);
        };

        let (path, battery) = {
            let t = &self.ctx.pair(id)?.trips[trip];
            (t.path.clone(), t.current_remain_battery)
        };
        if self.remaining_energy(id, trip, &path, index)? <= battery {
            return Ok(ReplanOutcome::Skipped);
        }

        let trailing = path[index + 1..path.len() - 1]
            .iter()
            .copied()
            .filter(|&c| !self.ctx.customers[c].is_processed())
            .collect::<Vec<_>>();
        let mut order = trailing
            .iter()
            .rev()
            .copied()
            .filter(|&c| self.ctx.customers[c].is_pickup())
            .collect::<Vec<_>>();
        order.extend(
            trailing
                .iter()
                .rev()
                .copied()
                .filter(|&c| !self.ctx.customers[c].is_pickup()),
        );

        let mut candidate = path.clone();
        let mut abandoned = vec![];
        let mut fits = false;
        for c in order {
            candidate.retain(|&node| node != c);
            abandoned.push(c);
            if self.remaining_energy(id, trip, &candidate, index)? <= battery {
                fits = true;
                break;
            }
        }

        let collapsed = !fits;
        if collapsed {
            abandoned = trailing;
            candidate = path
                .iter()
                .copied()
                .filter(|c| !abandoned.contains(c))
                .collect();
        }

        let retrieval = path[path.len() - 1];
        {
            let pair = self.ctx.pair_mut(id)?;
            pair.trips[trip].path = candidate;
        }
        for &c in &abandoned {
            self.ctx.customers[c].record.outcome = Outcome::Unserved;
        }
        self.ctx.refresh_pair(id)?;

        let mut emergency = vec![];
        for &c in &abandoned {
            let min_position = self.ctx.pair(id)?.truck.position(retrieval).map_or(1, |p| p + 1);
            if !repair::insert_to_specific_vehicle(&mut self.ctx, id, c, min_position)? {
                emergency.extend(repair::emergency_insert(&mut self.ctx, id, &[c])?);
            }
        }
        feasibility::check_and_repair(&mut self.ctx, id)?;

        Ok(if collapsed {
            ReplanOutcome::Collapsed {
                customers: abandoned,
                emergency,
            }
        } else {
            ReplanOutcome::Abandoned {
                customers: abandoned,
                emergency,
            }
        })
    }

    /// Unvisited truck stops after the failed one, plus the customers of every open trip launched or retrieved
    /// after it. Anchors of trips already in flight stay put.
    pub fn replanning_scope(&self, id: usize, customer: usize) -> Result<Vec<usize>, RoutingError> {
        let pair = self.ctx.pair(id)?;
        let Some(position) = pair.truck.position(customer) else {
            return Ok(vec![]);
        };

        let nodes = pair.truck.nodes();
        let mut scope = nodes[position + 1..nodes.len() - 1]
            .iter()
            .copied()
            .filter(|&c| {
                self.ctx.is_movable(c)
                    && pair
                        .anchored_trips(c)
                        .iter()
                        .all(|&t| self.ctx.trip_is_open(id, t))
            })
            .collect::<Vec<_>>();
        for t in 0..pair.trips.len() {
            let Some((launch, retrieval)) = pair.trip_span(t) else {
                continue;
            };
            if (launch > position || retrieval > position) && self.ctx.trip_is_open(id, t) {
                for &c in pair.trips[t].customers() {
                    if !scope.contains(&c) && self.ctx.is_movable(c) {
                        scope.push(c);
                    }
                }
            }
        }

        Ok(scope)
    }

    /// Bounded ALNS over the part of the pair behind the failed truck stop, falling back to an emergency tail
    /// rebuild when no improvement is found.
    pub fn replan_truck(&mut self, id: usize, customer: usize) -> Result<ReplanOutcome, RoutingError> {
        let scope = self.replanning_scope(id, customer)?;
        if scope.is_empty() {
            return Ok(ReplanOutcome::Unchanged);
        }

        let search = self.ctx.config.search.clone();
        let max_iterations = search.alns_iterations.min(5 * scope.len());
        let max_no_improve = (max_iterations / 5).max(10);

        let initial = self.ctx.pair_cost(id);
        let mut current = initial;
        let mut best = initial;
        let mut best_snapshot = self.ctx.snapshot_pair(id)?;
        let mut temperature = search.alns_temperature_factor * initial;
        let mut no_improve = 0;
        let started = Instant::now();

        for _ in 0..max_iterations {
            if search
                .alns_time_budget
                .is_some_and(|budget| started.elapsed().as_secs_f64() >= budget)
            {
                break;
            }

            let before = self.ctx.snapshot_pair(id)?;
            let operator = self.destroy.select(&mut self.ctx.rng);
            let removed = destroy::destroy(&mut self.ctx, id, operator, Some(customer))?;
            if removed.is_empty() {
                self.destroy.record(operator, false);
                no_improve += 1;
                if no_improve >= max_no_improve {
                    break;
                }
                continue;
            }

            let status = repair::repair_solution(&mut self.ctx, &mut self.repair, id, &removed, current)?;
            if !status.success() {
                self.ctx.restore_pair(&before);
                self.destroy.record(operator, false);
                no_improve += 1;
                temperature *= search.alns_temperature_decay;
                if no_improve >= max_no_improve {
                    break;
                }
                continue;
            }

            let mut cost = self.ctx.pair_cost(id);
            if cost < current * (1.0 + search.local_search_slack) {
                cost = cost.min(neighborhoods::local_search(&mut self.ctx, id, cost)?.cost);
            }

            let improved = cost < best;
            let accepted = if improved {
                if self.ctx.pheromone.update(&_pair_edges(self.ctx.pair(id)?), current, cost) {
                    self.statistics.pheromone_updates += 1;
                }
                if self.ctx.pheromone.tick() {
                    self.statistics.evaporations += 1;
                }

                best = cost;
                best_snapshot = self.ctx.snapshot_pair(id)?;
                true
            } else if cost < current {
                true
            } else {
                temperature > 0.0 && self.ctx.rng.random::<f64>() < ((current - cost) / temperature).exp()
            };

            if cost < current {
                no_improve = 0;
            } else {
                no_improve += 1;
            }
            if accepted {
                current = cost;
            } else {
                self.ctx.restore_pair(&before);
            }

            self.destroy.record(operator, improved);
            temperature *= search.alns_temperature_decay;
            if no_improve >= max_no_improve {
                break;
            }
        }

        self.ctx.restore_pair(&best_snapshot);
        if best < initial - 0.01 {
            feasibility::check_and_repair(&mut self.ctx, id)?;
            self.statistics.cost_improvements += 1;
            return Ok(ReplanOutcome::Improved {
                before: initial,
                after: self.ctx.pair_cost(id),
            });
        }

        self.emergency_replan(id, customer)
    }

    /// Pull the replanning scope off the pair and append it to the truck route in nearest-neighbour order.
    pub fn emergency_replan(&mut self, id: usize, customer: usize) -> Result<ReplanOutcome, RoutingError> {
        let scope = self.replanning_scope(id, customer)?;
        if scope.is_empty() {
            return Ok(ReplanOutcome::Unchanged);
        }

        let mut removed = vec![];
        for &c in &scope {
            destroy::safe_remove(&mut self.ctx, id, c, &mut removed)?;
        }

        let pair = self.ctx.pair(id)?;
        let nodes = pair.truck.nodes();
        let mut last = nodes[nodes.len() - 2];
        let mut remaining = removed;
        let mut order = vec![];
        while !remaining.is_empty() {
            let distances = &self.ctx.config.truck_distances[last];
            let mut nearest = 0;
            for i in 1..remaining.len() {
                if distances[remaining[i]] < distances[remaining[nearest]] {
                    nearest = i;
                }
            }

            last = remaining.swap_remove(nearest);
            order.push(last);
        }

        let appended = repair::emergency_insert(&mut self.ctx, id, &order)?;
        feasibility::check_and_repair(&mut self.ctx, id)?;
        if appended.is_empty() {
            return Ok(ReplanOutcome::Failed);
        }

        Ok(ReplanOutcome::Emergency { customers: appended })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::availability::Availability;
    use crate::config::Config;
    use crate::fixtures;
    use crate::solutions::PairPlan;

    fn present_everywhere(mut config: Config) -> Config {
        for a in config.availability.iter_mut() {
            *a = Availability::Constant(1.0);
        }
        config
    }

    fn drone_optimizer() -> DynamicOptimizer {
        let config = present_everywhere(fixtures::line_config(6));
        DynamicOptimizer::new(fixtures::context(
            config,
            &[PairPlan::new(vec![0, 1, 5, 6, 0], vec![vec![1, 2, 3, 4, 5]])],
        ))
    }

    fn fail_drone_customer(optimizer: &mut DynamicOptimizer, customer: usize, battery_slack: f64) {
        optimizer.ctx.customers[1].record.outcome = Outcome::Succeeded;
        optimizer.ctx.customers[customer].record.outcome = Outcome::Failed;
        optimizer.ctx.refresh_pair(0).unwrap();

        let path = optimizer.ctx.pairs[0].trips[0].path.clone();
        let index = path.iter().position(|&c| c == customer).unwrap();
        let required = optimizer.remaining_energy(0, 0, &path, index).unwrap();
        optimizer.ctx.pairs[0].trips[0].current_remain_battery = required + battery_slack;
    }

    #[test]
    fn test_everyone_home() {
        let config = present_everywhere(fixtures::line_config(6));
        let ctx = fixtures::context(
            config,
            &[PairPlan::new(vec![0, 1, 2, 4, 5, 6, 0], vec![vec![2, 3, 4]])],
        );
        let mut optimizer = DynamicOptimizer::new(ctx);

        let mut seen = vec![];
        let done = optimizer
            .run_with(|record| {
                seen.push(record.customer);
                Ok::<(), RoutingError>(())
            })
            .unwrap();

        assert!(done);
        assert_eq!(optimizer.statistics.succeeded, 6);
        assert_eq!(optimizer.statistics.failed, 0);
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0], 1);
        assert!(optimizer.ctx.pairs[0].trips[0].current_remain_battery < optimizer.ctx.config.drone.battery);
    }

    #[test]
    fn test_stage_order_follows_service_begin() {
        let optimizer = drone_optimizer();
        let order = optimizer.stage_order();
        let times = order
            .iter()
            .map(|&c| optimizer.ctx.customers[c].record.service_begin().unwrap())
            .collect::<Vec<_>>();

        assert_eq!(order.len(), 6);
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_drone_failure_with_enough_battery_is_skipped() {
        let mut optimizer = drone_optimizer();
        fail_drone_customer(&mut optimizer, 2, 100.0);

        let analysis = optimizer.analyze_failure(0, 2).unwrap();
        assert!(analysis.direct.is_empty());
        assert_eq!(optimizer.replan_drone(0, 2).unwrap(), ReplanOutcome::Skipped);
        assert_eq!(optimizer.ctx.pairs[0].trips[0].path, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_energy_shortfall_abandons_from_the_tail() {
        let mut optimizer = drone_optimizer();
        fail_drone_customer(&mut optimizer, 2, -15.0);

        let analysis = optimizer.analyze_failure(0, 2).unwrap();
        assert!(matches!(analysis.direct[0], DirectViolation::EnergyInsufficient { .. }));
        assert_eq!(analysis.severity, Severity::Critical);
        assert!(analysis.requires_replanning);

        let outcome = optimizer.replan_drone(0, 2).unwrap();
        assert!(matches!(&outcome, ReplanOutcome::Abandoned { customers, .. } if customers == &vec![4]));

        let pair = &optimizer.ctx.pairs[0];
        assert_eq!(pair.trips[0].path, vec![1, 2, 3, 5]);
        assert!(pair.truck.position(4) > pair.truck.position(5));
        assert_eq!(optimizer.ctx.customers[4].record.outcome, Outcome::Unserved);
        assert_eq!(optimizer.ctx.registry.owner(4), Some(0));
    }

    #[test]
    fn test_hopeless_trip_collapses() {
        let mut optimizer = drone_optimizer();
        fail_drone_customer(&mut optimizer, 2, 0.0);
        optimizer.ctx.pairs[0].trips[0].current_remain_battery = 1.0;

        let outcome = optimizer.replan_drone(0, 2).unwrap();
        assert!(matches!(&outcome, ReplanOutcome::Collapsed { customers, .. } if customers == &vec![3, 4]));

        let pair = &optimizer.ctx.pairs[0];
        assert_eq!(pair.trips[0].path, vec![1, 2, 5]);
        for c in [3, 4] {
            assert!(pair.truck.position(c) > pair.truck.position(5));
        }
    }

    #[test]
    fn test_truck_failure_stays_in_pair() {
        let mut config = fixtures::line_config(8);
        config.availability[1] = Availability::Constant(0.0);
        for c in 2..=8 {
            config.availability[c] = Availability::Constant(1.0);
        }
        let ctx = fixtures::context(
            config,
            &[
                PairPlan::new(vec![0, 1, 2, 3, 4, 5, 6, 0], vec![]),
                PairPlan::new(vec![0, 7, 8, 0], vec![]),
            ],
        );
        let mut optimizer = DynamicOptimizer::new(ctx);

        let record = optimizer.process_stage(1).unwrap();
        assert_eq!(record.outcome, Outcome::Failed);
        let analysis = record.analysis.unwrap();
        assert_eq!(analysis.cascading.len(), 5);
        assert!(analysis.requires_replanning);
        assert!(record.replan.is_some_and(|r| r.success()));

        let pair = &optimizer.ctx.pairs[0];
        assert_eq!(pair.truck.nodes()[1], 1);
        let mut customers = pair.customers();
        customers.sort_unstable();
        assert_eq!(customers, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(optimizer.ctx.pairs[1].truck.nodes(), &[0, 7, 8, 0]);
    }

    #[test]
    fn test_truck_replan_improves_despite_unfixable_lateness() {
        let mut config = present_everywhere(fixtures::line_config(9));
        config.end_times[5] = 1.0;
        let ctx = fixtures::context(config, &[PairPlan::new(vec![0, 1, 6, 2, 7, 3, 8, 4, 9, 5, 0], vec![])]);
        let mut optimizer = DynamicOptimizer::new(ctx);
        optimizer.ctx.customers[1].record.outcome = Outcome::Failed;
        optimizer.ctx.refresh_pair(0).unwrap();
        assert!(!feasibility::scan(&optimizer.ctx, 0).unwrap().is_empty());

        let outcome = optimizer.replan_truck(0, 1).unwrap();
        assert!(matches!(outcome, ReplanOutcome::Improved { .. }), "{outcome:?}");
        assert!(optimizer.destroy.successes.iter().sum::<usize>() > 0);

        let pair = &optimizer.ctx.pairs[0];
        assert_eq!(pair.truck.nodes()[1], 1);
        assert!(pair.validate_structure().is_ok());
        let mut customers = pair.customers();
        customers.sort_unstable();
        assert_eq!(customers, (1..=9).collect::<Vec<_>>());
    }

    #[test]
    fn test_full_run_keeps_pairs_isolated() {
        let mut config = fixtures::grid_config(10);
        for c in 1..=10 {
            config.availability[c] = Availability::Constant(0.5);
        }
        let ctx = fixtures::context(
            config,
            &[
                PairPlan::new(vec![0, 1, 2, 3, 4, 5, 0], vec![]),
                PairPlan::new(vec![0, 6, 7, 8, 9, 10, 0], vec![]),
            ],
        );
        let mut optimizer = DynamicOptimizer::new(ctx);

        assert!(optimizer.run().unwrap());
        assert_eq!(optimizer.statistics.stages, 10);
        assert_eq!(optimizer.statistics.succeeded + optimizer.statistics.failed, 10);
        for (id, pair) in optimizer.ctx.pairs.iter().enumerate() {
            assert!(pair.validate_structure().is_ok());
            for c in pair.customers() {
                assert_eq!(optimizer.ctx.registry.owner(c), Some(id));
            }
        }
    }
}
