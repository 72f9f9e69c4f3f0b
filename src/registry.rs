use std::collections::BTreeSet;

use crate::errors::RoutingError;
use crate::routes::VehiclePair;

/// Immutable ownership map: which vehicle pair may serve which customer.
///
/// Built once from the initial plan. Operators consult it before every mutation so that a customer never
/// migrates to another pair, even through destroy and repair.
#[derive(Clone, Debug)]
pub struct Registry {
    _owner: Vec<Option<usize>>,
    _assigned: Vec<BTreeSet<usize>>,
}

impl Registry {
    pub fn new(customers_count: usize, pairs: &[VehiclePair]) -> Result<Self, RoutingError> {
        let mut owner = vec![None; customers_count + 1];
        let mut assigned = vec![BTreeSet::new(); pairs.len()];

        for (p, pair) in pairs.iter().enumerate() {
            for c in pair.customers() {
                if c == 0 || c > customers_count {
                    return Err(RoutingError::UnknownCustomer(c));
                }
                if owner[c].is_some() {
                    return Err(RoutingError::DuplicateCustomer(c));
                }

                owner[c] = Some(p);
                assigned[p].insert(c);
            }
        }

        if let Some(c) = (1..=customers_count).find(|&c| owner[c].is_none()) {
            return Err(RoutingError::UnservedCustomer(c));
        }

        Ok(Self {
            _owner: owner,
            _assigned: assigned,
        })
    }

    pub fn owner(&self, customer: usize) -> Option<usize> {
        self._owner.get(customer).copied().flatten()
    }

    pub fn assigned(&self, pair: usize) -> Result<&BTreeSet<usize>, RoutingError> {
        self._assigned.get(pair).ok_or(RoutingError::UnknownPair(pair))
    }

    /// `Ok` iff `customer` is registered to `pair`.
    pub fn check(&self, pair: usize, customer: usize) -> Result<(), RoutingError> {
        if pair >= self._assigned.len() {
            return Err(RoutingError::UnknownPair(pair));
        }
        if customer == 0 || customer >= self._owner.len() {
            return Err(RoutingError::UnknownCustomer(customer));
        }

        match self.owner(customer) {
            Some(owner) if owner == pair => Ok(()),
            owner => Err(RoutingError::ForeignCustomer { customer, pair, owner }),
        }
    }

    pub fn check_all(&self, pair: usize, customers: &[usize]) -> Result<(), RoutingError> {
        customers.iter().try_for_each(|&c| self.check(pair, c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::{DroneTrip, TruckRoute};

    fn setup() -> Registry {
        let pairs = vec![
            VehiclePair::new(0, TruckRoute::new(vec![0, 1, 2, 0]), vec![DroneTrip::new(vec![1, 3, 2], 1.0)]),
            VehiclePair::new(1, TruckRoute::new(vec![0, 4, 0]), vec![]),
        ];
        Registry::new(4, &pairs).unwrap()
    }

    #[test]
    fn test_ownership() {
        let registry = setup();
        assert_eq!(registry.owner(3), Some(0));
        assert_eq!(registry.owner(4), Some(1));
        assert!(registry.check(0, 3).is_ok());
        assert_eq!(
            registry.check(1, 3),
            Err(RoutingError::ForeignCustomer {
                customer: 3,
                pair: 1,
                owner: Some(0)
            })
        );
        assert_eq!(registry.check(2, 3), Err(RoutingError::UnknownPair(2)));
        assert_eq!(registry.check(0, 9), Err(RoutingError::UnknownCustomer(9)));
        assert!(registry.check_all(0, &[1, 2, 4]).is_err());
    }

    #[test]
    fn test_rejects_duplicates_and_missing() {
        let pairs = vec![
            VehiclePair::new(0, TruckRoute::new(vec![0, 1, 0]), vec![]),
            VehiclePair::new(1, TruckRoute::new(vec![0, 1, 0]), vec![]),
        ];
        assert_eq!(Registry::new(1, &pairs).unwrap_err(), RoutingError::DuplicateCustomer(1));

        let pairs = vec![VehiclePair::new(0, TruckRoute::new(vec![0, 1, 0]), vec![])];
        assert_eq!(Registry::new(2, &pairs).unwrap_err(), RoutingError::UnservedCustomer(2));
    }
}
