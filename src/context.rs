use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::Config;
use crate::customers::{Customer, ServiceBy, ServiceRecord, Vehicle};
use crate::errors::RoutingError;
use crate::feasibility::FeasibilityStatistics;
use crate::pheromone::PheromoneField;
use crate::registry::Registry;
use crate::routes::{DroneTrip, Route, TruckRoute, VehiclePair};
use crate::solutions::PairPlan;
use crate::timing::{self, TimingReport};

/// Routes, customer states and shared search state of one dynamic run.
pub struct Context {
    pub config: Config,
    pub customers: Vec<Customer>,
    pub registry: Registry,
    pub pairs: Vec<VehiclePair>,
    pub pheromone: PheromoneField,
    pub rng: StdRng,
    pub statistics: FeasibilityStatistics,
}

/// Copy of one pair and of the records of its customers.
#[derive(Clone, Debug)]
pub struct PairSnapshot {
    pair: VehiclePair,
    records: Vec<(usize, ServiceRecord)>,
}

impl Context {
    pub fn new(config: Config, plans: &[PairPlan]) -> Result<Self, RoutingError> {
        let customers = Customer::from_config(&config);

        let mut pairs = vec![];
        for (id, plan) in plans.iter().enumerate() {
            let truck = TruckRoute::new(plan.truck.clone());
            if let Some(&c) = truck.nodes().iter().find(|&&c| c > config.customers_count) {
                return Err(RoutingError::UnknownCustomer(c));
            }

            let mut trips = vec![];
            for (t, path) in plan.trips.iter().enumerate() {
                if path.len() < 2 {
                    return Err(RoutingError::MalformedTrip {
                        pair: id,
                        trip: t,
                        reason: String::from("a trip needs a launch and a retrieval node"),
                    });
                }
                if let Some(&c) = path.iter().find(|&&c| c > config.customers_count) {
                    return Err(RoutingError::UnknownCustomer(c));
                }

                let trip = DroneTrip::new(path.clone(), config.drone.battery);
                if let Some(&c) = trip.customers().iter().find(|&&c| !customers[c].drone_servable(config.drone.capacity)) {
                    return Err(RoutingError::MalformedTrip {
                        pair: id,
                        trip: t,
                        reason: format!("customer {c} cannot be served by a drone"),
                    });
                }

                trips.push(trip);
            }

            let pair = VehiclePair::new(id, truck, trips);
            pair.validate_structure()
                .map_err(|reason| RoutingError::MalformedRoute { pair: id, reason })?;
            pairs.push(pair);
        }

        let registry = Registry::new(config.customers_count, &pairs)?;
        let pheromone = PheromoneField::new(config.customers_count + 1, &config.pheromone);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut context = Self {
            config,
            customers,
            registry,
            pairs,
            pheromone,
            rng,
            statistics: FeasibilityStatistics::default(),
        };
        for id in 0..context.pairs.len() {
            context.refresh_pair(id)?;
        }

        Ok(context)
    }

    pub fn pair(&self, id: usize) -> Result<&VehiclePair, RoutingError> {
        self.pairs.get(id).ok_or(RoutingError::UnknownPair(id))
    }

    pub fn pair_mut(&mut self, id: usize) -> Result<&mut VehiclePair, RoutingError> {
        self.pairs.get_mut(id).ok_or(RoutingError::UnknownPair(id))
    }

    /// Bring records, loads, timings and energies of the pair in line with its current routes.
    pub fn refresh_pair(&mut self, id: usize) -> Result<TimingReport, RoutingError> {
        self.recompute_from(id, 1)
    }

    pub fn recompute_from(&mut self, id: usize, from: usize) -> Result<TimingReport, RoutingError> {
        self._sync_records(id)?;

        let Self {
            config,
            customers,
            pairs,
            ..
        } = self;
        let pair = pairs.get_mut(id).ok_or(RoutingError::UnknownPair(id))?;

        pair.sort_trips();
        timing::refresh_initial_loads(customers, pair);
        let report = timing::recompute_pair(config, customers, pair, from);
        timing::refresh_current_loads(config, customers, pair);
        Ok(report)
    }

    fn _sync_records(&mut self, id: usize) -> Result<(), RoutingError> {
        let Self {
            customers,
            registry,
            pairs,
            ..
        } = self;
        let pair = pairs.get(id).ok_or(RoutingError::UnknownPair(id))?;

        for &c in registry.assigned(id)? {
            let record = &mut customers[c].record;
            match pair.locate(c) {
                Some(location) => {
                    record.service_by = Some(ServiceBy {
                        vehicle: location.vehicle(),
                        pair: id,
                    });
                    if location.vehicle() == Vehicle::Drone {
                        record.truck = None;
                    }
                }
                None => {
                    record.service_by = None;
                    record.truck = None;
                    record.drone = None;
                }
            }

            record.launch = pair.trip_launched_at(c).is_some();
            record.retrieve = pair.trip_retrieved_at(c).is_some();
            if !record.launch && !record.retrieve && record.service_by.map(|s| s.vehicle) == Some(Vehicle::Truck) {
                record.drone = None;
            }
        }

        Ok(())
    }

    pub fn pair_cost(&self, id: usize) -> f64 {
        self.pairs
            .get(id)
            .map_or(0.0, |pair| timing::pair_cost(&self.config, pair))
    }

    pub fn total_cost(&self) -> f64 {
        (0..self.pairs.len()).map(|id| self.pair_cost(id)).sum()
    }

    pub fn snapshot_pair(&self, id: usize) -> Result<PairSnapshot, RoutingError> {
        let pair = self.pair(id)?.clone();
        let records = self
            .registry
            .assigned(id)?
            .iter()
            .map(|&c| (c, self.customers[c].record.clone()))
            .collect();

        Ok(PairSnapshot { pair, records })
    }

    pub fn restore_pair(&mut self, snapshot: &PairSnapshot) {
        let id = snapshot.pair.id;
        if let Some(pair) = self.pairs.get_mut(id) {
            *pair = snapshot.pair.clone();
        }

        for (c, record) in &snapshot.records {
            self.customers[*c].record = record.clone();
        }
    }

    /// First truck position where a new stop may be inserted: right after the last visited customer.
    pub fn first_open_position(&self, id: usize) -> usize {
        self.pairs.get(id).map_or(1, |pair| {
            pair.truck
                .customers()
                .iter()
                .rposition(|&c| self.customers[c].is_processed())
                .map_or(1, |i| i + 2)
        })
    }

    /// A trip can still change as long as its launch node has not been visited.
    pub fn trip_is_open(&self, id: usize, trip: usize) -> bool {
        self.pairs
            .get(id)
            .and_then(|pair| pair.trips.get(trip))
            .is_some_and(|t| !self.customers[t.launch()].is_processed())
    }

    pub fn is_movable(&self, customer: usize) -> bool {
        self.customers.get(customer).is_some_and(|c| !c.is_processed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customers::Outcome;
    use crate::fixtures;

    #[test]
    fn test_new_rejects_bad_plans() {
        let config = fixtures::line_config(4);

        let unknown = [PairPlan::new(vec![0, 1, 2, 3, 9, 0], vec![])];
        assert_eq!(Context::new(config.clone(), &unknown).err(), Some(RoutingError::UnknownCustomer(9)));

        let missing = [PairPlan::new(vec![0, 1, 2, 3, 0], vec![])];
        assert_eq!(Context::new(config.clone(), &missing).err(), Some(RoutingError::UnservedCustomer(4)));

        let depot_anchor = [PairPlan::new(vec![0, 1, 2, 3, 0], vec![vec![0, 4, 1]])];
        assert!(matches!(
            Context::new(config.clone(), &depot_anchor),
            Err(RoutingError::MalformedRoute { .. })
        ));

        let valid = [PairPlan::new(vec![0, 1, 3, 0], vec![vec![1, 2, 4, 3]])];
        assert!(Context::new(config, &valid).is_ok());
    }

    #[test]
    fn test_records_follow_routes() {
        let context = fixtures::line_context(4, &[PairPlan::new(vec![0, 1, 3, 0], vec![vec![1, 2, 4, 3]])]);

        let record = &context.customers[2].record;
        assert_eq!(
            record.service_by,
            Some(ServiceBy {
                vehicle: Vehicle::Drone,
                pair: 0
            })
        );
        assert!(record.truck.is_none());
        assert!(record.drone.is_some());
        assert!(context.customers[1].record.launch);
        assert!(context.customers[3].record.retrieve);
        assert!(!context.customers[3].record.launch);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut context = fixtures::line_context(4, &[PairPlan::new(vec![0, 1, 2, 3, 4, 0], vec![])]);
        let snapshot = context.snapshot_pair(0).unwrap();
        let cost = context.pair_cost(0);

        context.pairs[0].truck.remove(3);
        context.refresh_pair(0).unwrap();
        assert!(context.customers[3].record.service_by.is_none());

        context.restore_pair(&snapshot);
        assert_eq!(context.pairs[0].truck.nodes(), &[0, 1, 2, 3, 4, 0]);
        assert!(context.customers[3].record.service_by.is_some());
        assert!((context.pair_cost(0) - cost).abs() < 1e-9);
    }

    #[test]
    fn test_frozen_prefix() {
        let mut context = fixtures::line_context(4, &[PairPlan::new(vec![0, 1, 2, 3, 4, 0], vec![])]);
        assert_eq!(context.first_open_position(0), 1);

        context.customers[2].record.outcome = Outcome::Succeeded;
        assert_eq!(context.first_open_position(0), 3);
        assert!(!context.is_movable(2));
        assert!(context.is_movable(3));
    }
}
