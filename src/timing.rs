//! Forward simulation of a vehicle pair: arrival and departure times, truck/drone rendezvous, drone energy and
//! vehicle loads.
//!
//! Every change of a plan goes through [`recompute_pair`] so that the rendezvous rule lives in one place.

use std::collections::HashMap;

use crate::config::Config;
use crate::customers::{Customer, Outcome, Visit};
use crate::routes::{DroneTrip, Route, VehiclePair};

const EPS: f64 = 1e-6;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TripSimulation {
    /// One visit per node after the start index; the last one is the retrieval node, where `wait` is the hover
    /// time until the truck is ready.
    pub stops: Vec<Visit>,

    /// Energy spent to reach (and serve) each of `stops`.
    pub leg_energy: Vec<f64>,
    pub energy: f64,
    pub peak_load: f64,

    /// Path index at which the load first exceeds the drone capacity (0 is the launch itself).
    pub overload: Option<usize>,

    /// First customer served after its window closed, with the lateness.
    pub late: Option<(usize, f64)>,
}

/// Fly `path` from index `start`, leaving `path[start]` at `start_time` with `start_load` on board.
///
/// `truck_ready` is the time the truck can take the drone back at the retrieval node. The drone hovers until then.
pub fn simulate_trip(
    config: &Config,
    customers: &[Customer],
    path: &[usize],
    start: usize,
    start_time: f64,
    start_load: f64,
    truck_ready: Option<f64>,
) -> TripSimulation {
    let drone = &config.drone;
    let mut result = TripSimulation {
        peak_load: start_load,
        overload: (start_load > drone.capacity + EPS).then_some(start),
        ..TripSimulation::default()
    };

    let mut time = start_time;
    let mut load = start_load;
    for i in start + 1..path.len() {
        let (prev, node) = (path[i - 1], path[i]);
        let distance = config.drone_distances[prev][node];
        let arrival = time + drone.flight_time(distance);
        let mut energy = drone.flight_energy(load, distance);

        let visit = if i == path.len() - 1 {
            let hover = truck_ready.map_or(0.0, |ready| (ready - arrival).max(0.0));
            energy += drone.hover_energy(load, hover);
            Visit {
                arrival,
                service_begin: arrival,
                departure: arrival + hover,
                wait: hover,
            }
        } else {
            let customer = &customers[node];
            if customer.record.outcome == Outcome::Failed {
                Visit {
                    arrival,
                    service_begin: arrival,
                    departure: arrival,
                    wait: 0.0,
                }
            } else {
                let service_begin = arrival.max(customer.start_time);
                let wait = service_begin - arrival;
                energy += drone.hover_energy(load, wait) + drone.service_energy(load, config.service_time);

                if service_begin > customer.end_time + EPS && result.late.is_none() {
                    result.late = Some((node, service_begin - customer.end_time));
                }

                load += customer.load_change();
                result.peak_load = result.peak_load.max(load);
                if load > drone.capacity + EPS && result.overload.is_none() {
                    result.overload = Some(i);
                }

                Visit {
                    arrival,
                    service_begin,
                    departure: service_begin + config.service_time,
                    wait,
                }
            }
        };

        time = visit.departure;
        result.energy += energy;
        result.leg_energy.push(energy);
        result.stops.push(visit);
    }

    result
}

/// Load the drone carries back to the truck.
pub fn trip_return_load(customers: &[Customer], trip: &DroneTrip) -> f64 {
    trip.initial_load + trip.customers().iter().map(|&c| customers[c].load_change()).sum::<f64>()
}

/// Recompute the launch loads of every trip and the depot load of the truck.
pub fn refresh_initial_loads(customers: &[Customer], pair: &mut VehiclePair) {
    for trip in &mut pair.trips {
        trip.initial_load = trip.customers().iter().map(|&c| customers[c].delivery()).sum();
    }

    pair.truck.initial_load = pair.customers().iter().map(|&c| customers[c].delivery()).sum();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverloadCause {
    /// The deliveries of the whole pair do not fit on the truck leaving the depot.
    Depot,
    Customer,
    Retrieval { trip: usize },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Overload {
    pub position: usize,
    pub node: usize,
    pub load: f64,
    pub cause: OverloadCause,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadProfile {
    pub peak: f64,

    /// Load after each truck position (index 0 is the depot departure).
    pub loads: Vec<f64>,
    pub overloads: Vec<Overload>,
}

/// Walk the truck route: at each node a retrieved drone hands over its load first, then the customer is served,
/// then a launched drone takes its deliveries.
///
/// Capacity is checked at the depot departure and after every increase.
pub fn simulate_truck_load(config: &Config, customers: &[Customer], pair: &VehiclePair) -> LoadProfile {
    let capacity = config.truck.capacity;
    let nodes = pair.truck.nodes();

    let mut load = pair.truck.initial_load;
    let mut profile = LoadProfile {
        peak: load,
        loads: vec![load],
        overloads: vec![],
    };
    if load > capacity + EPS {
        profile.overloads.push(Overload {
            position: 0,
            node: 0,
            load,
            cause: OverloadCause::Depot,
        });
    }

    for (position, &node) in nodes.iter().enumerate().take(nodes.len() - 1).skip(1) {
        if let Some(t) = pair.trip_retrieved_at(node) {
            load += trip_return_load(customers, &pair.trips[t]);
            if load > capacity + EPS {
                profile.overloads.push(Overload {
                    position,
                    node,
                    load,
                    cause: OverloadCause::Retrieval { trip: t },
                });
            }
        }

        let change = customers[node].load_change();
        load += change;
        if change > 0.0 && load > capacity + EPS {
            profile.overloads.push(Overload {
                position,
                node,
                load,
                cause: OverloadCause::Customer,
            });
        }

        if let Some(t) = pair.trip_launched_at(node) {
            load -= pair.trips[t].initial_load;
        }

        profile.peak = profile.peak.max(load);
        profile.loads.push(load);
    }

    profile
}

/// Loads reached so far in the dynamic run.
pub fn refresh_current_loads(config: &Config, customers: &[Customer], pair: &mut VehiclePair) {
    let profile = simulate_truck_load(config, customers, pair);
    let last_visited = pair
        .truck
        .customers()
        .iter()
        .rposition(|&c| customers[c].is_processed())
        .map_or(0, |i| i + 1);

    let truck = pair.truck.customers();
    let delivery = truck
        .iter()
        .filter(|&&c| !customers[c].is_processed())
        .map(|&c| customers[c].delivery())
        .sum();
    let pickup = truck
        .iter()
        .filter(|&&c| customers[c].record.outcome == Outcome::Succeeded)
        .map(|&c| customers[c].pickup())
        .sum();

    pair.truck.current_load = profile.loads.get(last_visited).copied().unwrap_or(pair.truck.initial_load);
    pair.truck.current_delivery = delivery;
    pair.truck.current_pickup = pickup;

    for trip in &mut pair.trips {
        let mut load = trip.initial_load;
        let mut delivery = 0.0;
        let mut pickup = 0.0;
        for &c in trip.customers() {
            let customer = &customers[c];
            match customer.record.outcome {
                Outcome::Unserved => delivery += customer.delivery(),
                Outcome::Succeeded => {
                    load += customer.load_change();
                    pickup += customer.pickup();
                }
                Outcome::Failed => {}
            }
        }

        trip.current_load = load;
        trip.current_delivery = delivery;
        trip.current_pickup = pickup;
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimingReport {
    /// Customers served after their window closed, with the lateness.
    pub late: Vec<(usize, f64)>,
    pub return_time: f64,

    /// Time spent past the truck's maximum work time.
    pub overtime: f64,
}

/// Recompute every visit of the pair from truck position `from` onwards, then every trip's energy.
///
/// Positions inside a drone trip's span are pulled back to the launch node so the drone leg is simulated again.
/// The truck leaves a retrieval node once both its own service and the drone's arrival are done.
pub fn recompute_pair(config: &Config, customers: &mut [Customer], pair: &mut VehiclePair, from: usize) -> TimingReport {
    let nodes = pair.truck.nodes().to_vec();
    let mut from = from.clamp(1, nodes.len() - 1);

    let spans = (0..pair.trips.len()).filter_map(|t| pair.trip_span(t)).collect::<Vec<_>>();
    loop {
        let pulled = spans
            .iter()
            .filter(|&&(a, b)| a < from && from <= b)
            .map(|&(a, _)| a)
            .min();
        match pulled {
            Some(a) => from = a,
            None => break,
        }
    }

    let mut departure = customers[0].start_time;
    if from > 1 {
        match customers[nodes[from - 1]].record.truck {
            Some(visit) => departure = visit.departure,
            None => from = 1,
        }
    }

    let mut report = TimingReport::default();
    let mut drone_arrivals = HashMap::new();
    for position in from..nodes.len() {
        let (prev, node) = (nodes[position - 1], nodes[position]);
        let arrival = departure + config.truck_distances[prev][node] / config.truck.speed;
        if position == nodes.len() - 1 {
            pair.truck.return_time = arrival;
            break;
        }

        let customer = &customers[node];
        let service_begin = arrival.max(customer.start_time);
        let ready = service_begin + config.service_time;
        if service_begin > customer.end_time + EPS {
            report.late.push((node, service_begin - customer.end_time));
        }

        departure = ready;
        let mut drone_visit = None;
        if pair.trip_retrieved_at(node).is_some() {
            let drone_arrival = drone_arrivals
                .get(&node)
                .copied()
                .or_else(|| customers[node].record.drone.map(|v| v.arrival))
                .unwrap_or(ready);

            departure = departure.max(drone_arrival);
            let hover = (ready - drone_arrival).max(0.0);
            drone_visit = Some(Visit {
                arrival: drone_arrival,
                service_begin: drone_arrival,
                departure,
                wait: hover,
            });
        }

        customers[node].record.truck = Some(Visit {
            arrival,
            service_begin,
            departure,
            wait: service_begin - arrival,
        });

        if let Some(t) = pair.trip_launched_at(node) {
            let trip = &pair.trips[t];
            let simulation = simulate_trip(config, customers, &trip.path, 0, departure, trip.initial_load, None);
            if let Some(late) = simulation.late {
                report.late.push(late);
            }

            let path = trip.path.clone();
            for (&c, visit) in path.iter().skip(1).zip(&simulation.stops) {
                if c == trip.retrieval() {
                    drone_arrivals.insert(c, visit.arrival);
                } else {
                    customers[c].record.drone = Some(*visit);
                    customers[c].record.truck = None;
                }
            }

            drone_visit = Some(match drone_visit {
                Some(v) => Visit { departure, ..v },
                None => Visit {
                    arrival: departure,
                    service_begin: departure,
                    departure,
                    wait: 0.0,
                },
            });
        }

        customers[node].record.drone = drone_visit;
    }

    for trip in &mut pair.trips {
        let launch = customers[trip.launch()].record.truck;
        let retrieval = customers[trip.retrieval()].record.truck;
        if let (Some(launch), Some(retrieval)) = (launch, retrieval) {
            let ready = retrieval.service_begin + config.service_time;
            let simulation = simulate_trip(
                config,
                customers,
                &trip.path,
                0,
                launch.departure,
                trip.initial_load,
                Some(ready),
            );
            trip.energy = simulation.energy;
        }
    }

    report.return_time = pair.truck.return_time;
    report.overtime = (pair.truck.return_time - customers[0].start_time - config.truck.max_work_time).max(0.0);
    report
}

/// Fixed pair cost, plus truck distance times the truck rate, plus drone energy times the drone rate.
pub fn pair_cost(config: &Config, pair: &VehiclePair) -> f64 {
    let truck = pair.truck.distance(&config.truck_distances) * config.cost_truck;
    let drone = pair.trips.iter().map(|t| t.energy).sum::<f64>() * config.cost_drone;
    config.pair_fixed_cost + truck + drone
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CustomerRow;
    use crate::routes::TruckRoute;

    fn row(x: f64, y: f64, demand: f64, start_time: f64, end_time: f64) -> CustomerRow {
        CustomerRow {
            x,
            y,
            demand,
            start_time,
            end_time,
            dronable: true,
        }
    }

    /// Depot at the origin; customers on a line so that both metrics agree.
    fn setup() -> (Config, Vec<Customer>) {
        let rows = [
            row(10.0, 0.0, 5.0, 0.0, 1000.0),
            row(20.0, 0.0, -2.0, 0.0, 1000.0),
            row(30.0, 0.0, 1.0, 0.0, 1000.0),
            row(40.0, 0.0, 3.0, 0.0, 1000.0),
        ];
        let config = Config::build((0.0, 0.0), 1000.0, &rows);
        let customers = Customer::from_config(&config);
        (config, customers)
    }

    fn pair(customers: &[Customer]) -> VehiclePair {
        let mut pair = VehiclePair::new(
            0,
            TruckRoute::new(vec![0, 1, 3, 4, 0]),
            vec![DroneTrip::new(vec![1, 2, 3], 650.0)],
        );
        refresh_initial_loads(customers, &mut pair);
        pair
    }

    #[test]
    fn test_truck_waits_for_drone() {
        let (config, mut customers) = setup();
        let mut pair = pair(&customers);
        recompute_pair(&config, &mut customers, &mut pair, 1);

        // Truck: depot -> 1 at t=2, leaves at 12.
        let visit = customers[1].record.truck.unwrap();
        assert!((visit.arrival - 2.0).abs() < 1e-9);
        assert!((visit.departure - 12.0).abs() < 1e-9);

        // Drone: 1 -> 2 at t=13, serves until 23, reaches 3 at t=24.
        let drone = customers[2].record.drone.unwrap();
        assert!((drone.arrival - 13.0).abs() < 1e-9);
        assert!((drone.departure - 23.0).abs() < 1e-9);
        assert_eq!(customers[2].record.truck, None);

        // Truck reaches 3 at t=16, ready at 26 > 24: no wait for the drone, which hovers 2 minutes.
        let truck = customers[3].record.truck.unwrap();
        assert!((truck.arrival - 16.0).abs() < 1e-9);
        assert!((truck.departure - 26.0).abs() < 1e-9);
        let rendezvous = customers[3].record.drone.unwrap();
        assert!((rendezvous.arrival - 24.0).abs() < 1e-9);
        assert!((rendezvous.wait - 2.0).abs() < 1e-9);

        // Energy: leg 1 with 0 load, leg 2 with 2 load, service with 0 load, hover with 2 load.
        let expected = config.drone.flight_energy(0.0, 10.0)
            + config.drone.service_energy(0.0, 10.0)
            + config.drone.flight_energy(2.0, 10.0)
            + config.drone.hover_energy(2.0, 2.0);
        assert!((pair.trips[0].energy - expected).abs() < 1e-9);
    }

    #[test]
    fn test_partial_recompute_matches_full() {
        let (config, mut customers) = setup();
        let mut full = pair(&customers);
        recompute_pair(&config, &mut customers, &mut full, 1);
        let expected = customers.iter().map(|c| c.record.clone()).collect::<Vec<_>>();
        let expected_energy = full.trips[0].energy;

        // Starting inside the drone span is pulled back to the launch.
        let mut partial = pair(&customers);
        for c in &mut customers[2..] {
            c.record.drone = None;
            c.record.truck = None;
        }
        recompute_pair(&config, &mut customers, &mut partial, 2);

        for (c, record) in customers.iter().zip(&expected) {
            assert_eq!(&c.record, record);
        }
        assert!((partial.trips[0].energy - expected_energy).abs() < 1e-9);
        assert!((partial.truck.return_time - full.truck.return_time).abs() < 1e-9);
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let (config, mut customers) = setup();
        let mut pair = pair(&customers);
        let first = recompute_pair(&config, &mut customers, &mut pair, 1);
        let records = customers.iter().map(|c| c.record.clone()).collect::<Vec<_>>();
        let second = recompute_pair(&config, &mut customers, &mut pair, 1);

        assert_eq!(first, second);
        for (c, record) in customers.iter().zip(&records) {
            assert_eq!(&c.record, record);
        }
    }

    #[test]
    fn test_failed_drone_stop_is_skipped() {
        let (config, mut customers) = setup();
        let mut pair = pair(&customers);
        customers[2].record.outcome = Outcome::Failed;
        recompute_pair(&config, &mut customers, &mut pair, 1);

        let drone = customers[2].record.drone.unwrap();
        assert_eq!(drone.arrival, drone.departure);

        // Nothing picked up: the drone flies back empty and hovers until the truck is ready.
        let expected = config.drone.flight_energy(0.0, 10.0)
            + config.drone.flight_energy(0.0, 10.0)
            + config.drone.hover_energy(0.0, 26.0 - 14.0);
        assert!((pair.trips[0].energy - expected).abs() < 1e-9);
    }

    #[test]
    fn test_truck_load_profile() {
        let (config, customers) = setup();
        let pair = pair(&customers);

        // All deliveries of the pair leave the depot: 5 + 1 + 3.
        assert_eq!(pair.truck.initial_load, 9.0);
        assert_eq!(pair.trips[0].initial_load, 0.0);

        let profile = simulate_truck_load(&config, &customers, &pair);
        assert_eq!(profile.loads, vec![9.0, 4.0, 5.0, 2.0]);
        assert!(profile.overloads.is_empty());

        let mut small = config.clone();
        small.truck.capacity = 4.5;
        let profile = simulate_truck_load(&small, &customers, &pair);
        assert_eq!(profile.overloads[0].position, 0);
        assert_eq!(profile.overloads[0].cause, OverloadCause::Depot);
        assert!(
            profile
                .overloads
                .iter()
                .any(|o| o.cause == OverloadCause::Retrieval { trip: 0 })
        );

        // Everything after the depot fits, only the departure is over.
        small.truck.capacity = 8.5;
        let profile = simulate_truck_load(&small, &customers, &pair);
        assert_eq!(profile.overloads.len(), 1);
        assert_eq!(profile.overloads[0].cause, OverloadCause::Depot);
    }

    #[test]
    fn test_pair_cost() {
        let (config, mut customers) = setup();
        let mut pair = pair(&customers);
        recompute_pair(&config, &mut customers, &mut pair, 1);

        let expected = 22.0 + 80.0 * config.cost_truck + pair.trips[0].energy * config.cost_drone;
        assert!((pair_cost(&config, &pair) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_early_arrival_waits_for_window() {
        let config = Config::build((0.0, 0.0), 1000.0, &[row(450.0, 0.0, 1.0, 100.0, 120.0)]);
        let mut customers = Customer::from_config(&config);
        let mut pair = VehiclePair::new(0, TruckRoute::new(vec![0, 1, 0]), vec![]);
        refresh_initial_loads(&customers, &mut pair);

        let report = recompute_pair(&config, &mut customers, &mut pair, 1);
        let visit = customers[1].record.truck.unwrap();
        assert!((visit.arrival - 90.0).abs() < 1e-9);
        assert!((visit.wait - 10.0).abs() < 1e-9);
        assert!((visit.service_begin - 100.0).abs() < 1e-9);
        assert!((visit.departure - 100.0 - config.service_time).abs() < 1e-9);
        assert!(report.late.is_empty());
    }
}
