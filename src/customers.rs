use std::fmt;

use serde::{Deserialize, Serialize};

use crate::availability::Availability;
use crate::config::Config;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Outcome {
    #[default]
    #[serde(rename = "unserved")]
    Unserved,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Unserved => "unserved",
                Self::Succeeded => "succeeded",
                Self::Failed => "failed",
            }
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Vehicle {
    #[serde(rename = "truck")]
    Truck,
    #[serde(rename = "drone")]
    Drone,
}

impl fmt::Display for Vehicle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Truck => "truck",
                Self::Drone => "drone",
            }
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ServiceBy {
    pub vehicle: Vehicle,
    pub pair: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Visit {
    pub arrival: f64,
    pub service_begin: f64,
    pub departure: f64,
    pub wait: f64,
}

/// Mutable per-customer state written by the dynamic run.
///
/// `truck` is `None` whenever the truck does not stop at this node (the customer is served mid-flight by
/// the drone). Launch and retrieval nodes carry both a truck visit and a drone visit.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ServiceRecord {
    pub outcome: Outcome,
    pub service_by: Option<ServiceBy>,
    pub truck: Option<Visit>,
    pub drone: Option<Visit>,
    pub launch: bool,
    pub retrieve: bool,
}

impl ServiceRecord {
    pub fn visit(&self) -> Option<&Visit> {
        match self.service_by?.vehicle {
            Vehicle::Truck => self.truck.as_ref(),
            Vehicle::Drone => self.drone.as_ref(),
        }
    }

    pub fn service_begin(&self) -> Option<f64> {
        self.visit().map(|v| v.service_begin)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Customer {
    pub id: usize,
    pub x: f64,
    pub y: f64,

    /// Positive for a delivery, negative for a pickup.
    pub demand: f64,
    pub start_time: f64,
    pub end_time: f64,
    pub drone_eligible: bool,
    pub availability: Availability,

    #[serde(skip)]
    pub record: ServiceRecord,
}

impl Customer {
    pub fn depot(x: f64, y: f64, close: f64) -> Self {
        Self {
            id: 0,
            x,
            y,
            demand: 0.0,
            start_time: 0.0,
            end_time: close,
            drone_eligible: false,
            availability: Availability::Constant(1.0),
            record: ServiceRecord::default(),
        }
    }

    pub fn is_pickup(&self) -> bool {
        self.demand < 0.0
    }

    pub fn weight(&self) -> f64 {
        self.demand.abs()
    }

    pub fn delivery(&self) -> f64 {
        self.demand.max(0.0)
    }

    pub fn pickup(&self) -> f64 {
        (-self.demand).max(0.0)
    }

    pub fn drone_servable(&self, capacity: f64) -> bool {
        self.id != 0 && self.drone_eligible && self.weight() <= capacity
    }

    /// Change of the carrying vehicle's load once this stop is passed.
    ///
    /// A failed stop leaves the load untouched: an undelivered parcel stays on board and nothing is picked up.
    pub fn load_change(&self) -> f64 {
        match self.record.outcome {
            Outcome::Failed => 0.0,
            Outcome::Unserved | Outcome::Succeeded => -self.demand,
        }
    }

    pub fn window_midpoint(&self) -> f64 {
        0.5 * (self.start_time + self.end_time)
    }

    pub fn is_processed(&self) -> bool {
        self.record.outcome != Outcome::Unserved
    }

    /// Fresh customers (depot at index 0) built from the problem data.
    pub fn from_config(config: &Config) -> Vec<Self> {
        (0..=config.customers_count)
            .map(|id| Self {
                id,
                x: config.x[id],
                y: config.y[id],
                demand: config.demands[id],
                start_time: config.start_times[id],
                end_time: config.end_times[id],
                drone_eligible: config.dronable[id],
                availability: config.availability[id].clone(),
                record: ServiceRecord::default(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(demand: f64) -> Customer {
        Customer {
            id: 1,
            x: 0.0,
            y: 0.0,
            demand,
            start_time: 100.0,
            end_time: 120.0,
            drone_eligible: true,
            availability: Availability::default(),
            record: ServiceRecord::default(),
        }
    }

    #[test]
    fn test_load_change() {
        let mut delivery = customer(5.0);
        assert_eq!(delivery.load_change(), -5.0);
        delivery.record.outcome = Outcome::Failed;
        assert_eq!(delivery.load_change(), 0.0);

        let pickup = customer(-3.0);
        assert!(pickup.is_pickup());
        assert_eq!(pickup.load_change(), 3.0);
        assert_eq!(pickup.pickup(), 3.0);
        assert_eq!(pickup.delivery(), 0.0);
    }

    #[test]
    fn test_drone_servable() {
        assert!(customer(-8.0).drone_servable(9.0));
        assert!(!customer(-10.0).drone_servable(9.0));

        let mut c = customer(1.0);
        c.drone_eligible = false;
        assert!(!c.drone_servable(9.0));
        assert!(!Customer::depot(0.0, 0.0, 480.0).drone_servable(9.0));
    }

    #[test]
    fn test_record_visit_follows_service_vehicle() {
        let mut c = customer(1.0);
        assert_eq!(c.record.service_begin(), None);

        c.record.service_by = Some(ServiceBy {
            vehicle: Vehicle::Drone,
            pair: 0,
        });
        c.record.truck = Some(Visit {
            service_begin: 1.0,
            ..Visit::default()
        });
        c.record.drone = Some(Visit {
            service_begin: 2.0,
            ..Visit::default()
        });
        assert_eq!(c.record.service_begin(), Some(2.0));
    }
}
