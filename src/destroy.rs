use std::cmp::Ordering;
use std::fmt;

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use serde::Serialize;

use crate::config::Config;
use crate::context::Context;
use crate::customers::Customer;
use crate::errors::RoutingError;
use crate::routes::{Location, Route, VehiclePair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DestroyOperator {
    Random,
    WorstDistance,
    WorstTime,
    DroneWorstEnergy,
    Shaw,
    Route,
}

pub const DESTROY_OPERATORS: [DestroyOperator; 6] = [
    DestroyOperator::Random,
    DestroyOperator::WorstDistance,
    DestroyOperator::WorstTime,
    DestroyOperator::DroneWorstEnergy,
    DestroyOperator::Shaw,
    DestroyOperator::Route,
];

impl fmt::Display for DestroyOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Random => "random_removal",
                Self::WorstDistance => "worst_distance_removal",
                Self::WorstTime => "worst_time_removal",
                Self::DroneWorstEnergy => "drone_worst_energy_removal",
                Self::Shaw => "shaw_removal",
                Self::Route => "route_removal",
            }
        )
    }
}

/// Uniform draw in `[max(floor(n * min), 1), max(floor(n * max), lower)]`, never above `n`.
pub fn removal_count<R: Rng>(pool: usize, min: f64, max: f64, rng: &mut R) -> usize {
    if pool == 0 {
        return 0;
    }

    let lower = ((pool as f64 * min).floor() as usize).max(1);
    let upper = ((pool as f64 * max).floor() as usize).max(lower);
    rng.random_range(lower..=upper).min(pool)
}

/// Customers of the pair that destroy operators may remove.
///
/// Without a trigger this is every unvisited customer outside in-flight trips. With a trigger, only the truck
/// stops after it and the trips launched at or after it are candidates.
pub fn candidate_pool(ctx: &Context, id: usize, trigger: Option<usize>) -> Result<Vec<usize>, RoutingError> {
    let pair = ctx.pair(id)?;
    let threshold = match trigger {
        None => None,
        Some(c) => {
            ctx.registry.check(id, c)?;
            match pair.locate(c) {
                Some(Location::Truck { position }) => Some(position),
                Some(Location::Drone { trip, .. }) => pair.trip_span(trip).map(|(launch, _)| launch),
                None => return Err(RoutingError::CustomerNotRouted { customer: c, pair: id }),
            }
        }
    };

    let mut pool = vec![];
    for (i, &c) in pair.truck.customers().iter().enumerate() {
        if threshold.is_some_and(|p| i < p) || !ctx.is_movable(c) {
            continue;
        }
        if pair.anchored_trips(c).iter().any(|&t| !ctx.trip_is_open(id, t)) {
            continue;
        }

        pool.push(c);
    }

    for (t, trip) in pair.trips.iter().enumerate() {
        if !ctx.trip_is_open(id, t) {
            continue;
        }
        if let (Some(p), Some((launch, _))) = (threshold, pair.trip_span(t)) {
            if launch < p {
                continue;
            }
        }

        pool.extend(
            trip.customers()
                .iter()
                .filter(|&&c| ctx.is_movable(c) && Some(c) != trigger),
        );
    }

    Ok(pool)
}

/// Remove `customer` from the pair. Removing a launch or retrieval node also removes every trip anchored there,
/// and their customers join `removed`. A trip left without customers is deleted.
pub fn safe_remove(ctx: &mut Context, id: usize, customer: usize, removed: &mut Vec<usize>) -> Result<(), RoutingError> {
    ctx.registry.check(id, customer)?;
    if removed.contains(&customer) {
        return Ok(());
    }

    let pair = ctx.pair_mut(id)?;
    match pair.locate(customer) {
        None => return Err(RoutingError::CustomerNotRouted { customer, pair: id }),
        Some(Location::Truck { .. }) => {
            for t in pair.anchored_trips(customer).into_iter().rev() {
                for c in pair.dissolve_trip(t) {
                    if !removed.contains(&c) {
                        removed.push(c);
                    }
                }
            }

            pair.truck.remove(customer);
        }
        Some(Location::Drone { .. }) => {
            pair.detach(customer);
        }
    }

    removed.push(customer);
    Ok(())
}

/// Remove customers from the pair with the given policy and refresh its schedule.
///
/// Returns every removed customer, including those dropped along with a dissolved trip.
pub fn destroy(
    ctx: &mut Context,
    id: usize,
    operator: DestroyOperator,
    trigger: Option<usize>,
) -> Result<Vec<usize>, RoutingError> {
    let pool = candidate_pool(ctx, id, trigger)?;
    if pool.is_empty() {
        return Ok(vec![]);
    }

    let targets = {
        let Context {
            config,
            customers,
            pairs,
            rng,
            ..
        } = ctx;
        let pair = pairs.get(id).ok_or(RoutingError::UnknownPair(id))?;
        let count = removal_count(pool.len(), config.search.min_delete, config.search.max_delete, rng);
        _select(config, customers, pair, operator, &pool, count, rng)
    };

    let mut removed = vec![];
    for c in targets {
        safe_remove(ctx, id, c, &mut removed)?;
    }

    ctx.refresh_pair(id)?;
    Ok(removed)
}

fn _select(
    config: &Config,
    customers: &[Customer],
    pair: &VehiclePair,
    operator: DestroyOperator,
    pool: &[usize],
    count: usize,
    rng: &mut StdRng,
) -> Vec<usize> {
    let random = |rng: &mut StdRng| pool.choose_multiple(rng, count).copied().collect::<Vec<_>>();

    match operator {
        DestroyOperator::Random => random(rng),
        DestroyOperator::WorstDistance => {
            let ranked = pool.iter().map(|&c| (c, _detour(config, pair, c))).collect();
            _pick_ranked(ranked, count, rng)
        }
        DestroyOperator::WorstTime => {
            let ranked = pool
                .iter()
                .map(|&c| {
                    let customer = &customers[c];
                    let begin = customer.record.service_begin().unwrap_or(customer.start_time);
                    (c, (begin - customer.window_midpoint()).abs())
                })
                .collect();
            _pick_ranked(ranked, count, rng)
        }
        DestroyOperator::DroneWorstEnergy => {
            let ranked = pool
                .iter()
                .filter(|&&c| matches!(pair.locate(c), Some(Location::Drone { .. })))
                .map(|&c| {
                    let wait = customers[c].record.drone.map_or(0.0, |v| v.wait);
                    (c, wait * config.drone.energy_hover * config.drone.weight)
                })
                .collect::<Vec<_>>();

            if ranked.is_empty() {
                random(rng)
            } else {
                _pick_ranked(ranked, count, rng)
            }
        }
        DestroyOperator::Shaw => _shaw(config, customers, pair, pool, count, rng),
        DestroyOperator::Route => {
            let mut segments = vec![
                pair.truck
                    .customers()
                    .iter()
                    .copied()
                    .filter(|c| pool.contains(c))
                    .collect::<Vec<_>>(),
            ];
            for trip in &pair.trips {
                segments.push(trip.customers().iter().copied().filter(|c| pool.contains(c)).collect());
            }

            match segments.into_iter().filter(|s| !s.is_empty()).min_by_key(Vec::len) {
                Some(segment) => segment,
                None => random(rng),
            }
        }
    }
}

/// Distance saved by skipping `customer` on its own route.
fn _detour(config: &Config, pair: &VehiclePair, customer: usize) -> f64 {
    let (nodes, i, distances) = match pair.locate(customer) {
        Some(Location::Truck { position }) => (pair.truck.nodes(), position, &config.truck_distances),
        Some(Location::Drone { trip, index }) => (pair.trips[trip].nodes(), index, &config.drone_distances),
        None => return 0.0,
    };

    let (prev, next) = (nodes[i - 1], nodes[i + 1]);
    distances[prev][customer] + distances[customer][next] - distances[prev][next]
}

/// Sort by decreasing score, then draw `count` customers at random among the best `2 * count`.
fn _pick_ranked(mut ranked: Vec<(usize, f64)>, count: usize, rng: &mut StdRng) -> Vec<usize> {
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    ranked.truncate(2 * count);
    ranked.choose_multiple(rng, count).map(|&(c, _)| c).collect()
}

/// Shaw relatedness: grow the removed set with the customer closest to a random member of it, by weighted truck
/// distance, start-time gap and serving vehicle.
fn _shaw(
    config: &Config,
    customers: &[Customer],
    pair: &VehiclePair,
    pool: &[usize],
    count: usize,
    rng: &mut StdRng,
) -> Vec<usize> {
    let Some(&seed) = pool.choose(rng) else {
        return vec![];
    };

    let horizon = config.end_times[0].max(1.0);
    let vehicle = |c: usize| pair.locate(c).map(|l| l.vehicle());

    let mut chosen = vec![seed];
    let mut remaining = pool.iter().copied().filter(|&c| c != seed).collect::<Vec<_>>();
    while chosen.len() < count && !remaining.is_empty() {
        let Some(&reference) = chosen.choose(rng) else {
            break;
        };

        let longest = remaining
            .iter()
            .map(|&c| config.truck_distances[reference][c])
            .fold(f64::EPSILON, f64::max);
        let relatedness = |c: usize| {
            let distance = config.truck_distances[reference][c] / longest;
            let gap = (customers[reference].start_time - customers[c].start_time).abs() / horizon;
            let other = if vehicle(reference) == vehicle(c) { 0.0 } else { 1.0 };
            0.3f64.mul_add(other, 0.4f64.mul_add(distance, 0.3 * gap))
        };

        let Some(best) = (0..remaining.len()).min_by(|&a, &b| {
            relatedness(remaining[a])
                .partial_cmp(&relatedness(remaining[b]))
                .unwrap_or(Ordering::Equal)
        }) else {
            break;
        };
        chosen.push(remaining.swap_remove(best));
    }

    chosen
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rand::SeedableRng;

    use super::*;
    use crate::customers::Outcome;
    use crate::fixtures;
    use crate::solutions::PairPlan;

    fn setup() -> Context {
        fixtures::line_context(
            6,
            &[
                PairPlan::new(vec![0, 1, 2, 4, 0], vec![vec![2, 3, 4]]),
                PairPlan::new(vec![0, 5, 6, 0], vec![]),
            ],
        )
    }

    #[test]
    fn test_removal_count_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(removal_count(0, 0.2, 0.4, &mut rng), 0);
        assert_eq!(removal_count(2, 0.2, 0.4, &mut rng), 1);
        for _ in 0..100 {
            let k = removal_count(20, 0.2, 0.4, &mut rng);
            assert!((4..=8).contains(&k));
        }
    }

    proptest! {
        #[test]
        fn prop_removal_count_within_pool(pool in 1usize..200, min in 0.0f64..1.0, extra in 0.0f64..1.0, seed in any::<u64>()) {
            let max = (min + extra).min(1.0);
            let mut rng = StdRng::seed_from_u64(seed);
            let k = removal_count(pool, min, max, &mut rng);

            prop_assert!(k >= 1);
            prop_assert!(k <= pool);
            prop_assert!(k >= ((pool as f64 * min).floor() as usize).min(pool));
            prop_assert!(k <= ((pool as f64 * max).floor() as usize).max(1));
        }
    }

    #[test]
    fn test_pool_respects_trigger() {
        let mut ctx = setup();
        assert_eq!(candidate_pool(&ctx, 0, None).unwrap(), vec![1, 2, 4, 3]);
        assert_eq!(candidate_pool(&ctx, 0, Some(2)).unwrap(), vec![4, 3]);
        assert_eq!(candidate_pool(&ctx, 0, Some(4)).unwrap(), Vec::<usize>::new());

        ctx.customers[1].record.outcome = Outcome::Succeeded;
        assert_eq!(candidate_pool(&ctx, 0, None).unwrap(), vec![2, 4, 3]);

        assert!(matches!(
            candidate_pool(&ctx, 0, Some(5)),
            Err(RoutingError::ForeignCustomer { .. })
        ));
    }

    #[test]
    fn test_removing_anchor_dissolves_trip() {
        let mut ctx = setup();
        let mut removed = vec![];
        safe_remove(&mut ctx, 0, 2, &mut removed).unwrap();

        assert_eq!(removed, vec![3, 2]);
        assert!(ctx.pairs[0].trips.is_empty());
        assert_eq!(ctx.pairs[0].truck.nodes(), &[0, 1, 4, 0]);
        assert!(safe_remove(&mut ctx, 0, 6, &mut removed).is_err());
    }

    #[test]
    fn test_destroy_single_truck_customer() {
        let mut ctx = fixtures::line_context(2, &[PairPlan::new(vec![0, 1, 2, 0], vec![])]);
        let removed = destroy(&mut ctx, 0, DestroyOperator::Random, None).unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(ctx.pairs[0].truck.len(), 3);
        assert!(ctx.customers[removed[0]].record.service_by.is_none());
    }

    #[test]
    fn test_every_operator_stays_in_pair() {
        for operator in DESTROY_OPERATORS {
            let mut ctx = setup();
            let removed = destroy(&mut ctx, 0, operator, None).unwrap();
            assert!(!removed.is_empty(), "{operator} removed nothing");
            assert!(removed.iter().all(|&c| ctx.registry.owner(c) == Some(0)));
            assert_eq!(ctx.pairs[1].truck.nodes(), &[0, 5, 6, 0]);
            assert!(ctx.pairs[0].validate_structure().is_ok());
        }
    }

    #[test]
    fn test_route_removal_takes_shortest_segment() {
        let mut ctx = setup();
        let removed = destroy(&mut ctx, 0, DestroyOperator::Route, None).unwrap();
        assert_eq!(removed, vec![3]);
    }
}
