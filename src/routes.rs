use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::customers::Vehicle;

/// Node sequence shared by truck routes and drone trips: `nodes()[0]` and `nodes().last()` are the endpoints
/// (the depot for a truck route, the launch and retrieval nodes for a drone trip).
pub trait Route {
    fn nodes(&self) -> &[usize];

    fn customers(&self) -> &[usize] {
        let nodes = self.nodes();
        if nodes.len() < 2 { &[] } else { &nodes[1..nodes.len() - 1] }
    }

    fn contains(&self, customer: usize) -> bool {
        self.customers().contains(&customer)
    }

    fn edges(&self) -> Vec<(usize, usize)> {
        self.nodes().windows(2).map(|w| (w[0], w[1])).collect()
    }

    fn distance(&self, distances: &[Vec<f64>]) -> f64 {
        self.nodes().windows(2).map(|w| distances[w[0]][w[1]]).sum()
    }
}

/// A depot-to-depot truck route with a position index over its customers.
#[derive(Clone)]
pub struct TruckRoute {
    _nodes: Vec<usize>,
    _positions: HashMap<usize, usize>,

    /// Sum of every delivery of the pair, loaded at the depot.
    pub initial_load: f64,
    pub current_load: f64,
    pub current_delivery: f64,
    pub current_pickup: f64,
    pub return_time: f64,
}

impl fmt::Debug for TruckRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TruckRoute({:?})", self._nodes)
    }
}

impl Route for TruckRoute {
    fn nodes(&self) -> &[usize] {
        &self._nodes
    }

    fn contains(&self, customer: usize) -> bool {
        self._positions.contains_key(&customer)
    }
}

impl TruckRoute {
    /// Missing depot endpoints are added.
    pub fn new(mut nodes: Vec<usize>) -> Self {
        if nodes.first() != Some(&0) {
            nodes.insert(0, 0);
        }
        if nodes.len() < 2 || nodes.last() != Some(&0) {
            nodes.push(0);
        }

        let mut route = Self {
            _nodes: nodes,
            _positions: HashMap::new(),
            initial_load: 0.0,
            current_load: 0.0,
            current_delivery: 0.0,
            current_pickup: 0.0,
            return_time: 0.0,
        };
        route._reindex();
        route
    }

    fn _reindex(&mut self) {
        self._positions.clear();
        for (i, &node) in self._nodes.iter().enumerate() {
            if node != 0 {
                self._positions.insert(node, i);
            }
        }
    }

    pub fn len(&self) -> usize {
        self._nodes.len()
    }

    pub fn position(&self, customer: usize) -> Option<usize> {
        self._positions.get(&customer).copied()
    }

    /// Insert `customer` so that it ends up at `position` (`1..=len - 1`).
    pub fn insert(&mut self, position: usize, customer: usize) {
        let position = position.clamp(1, self._nodes.len() - 1);
        self._nodes.insert(position, customer);
        self._reindex();
    }

    /// Insert right before the final depot.
    pub fn push(&mut self, customer: usize) {
        let position = self._nodes.len() - 1;
        self.insert(position, customer);
    }

    pub fn remove(&mut self, customer: usize) -> Option<usize> {
        let position = self.position(customer)?;
        self._nodes.remove(position);
        self._reindex();
        Some(position)
    }

    pub fn swap(&mut self, i: usize, j: usize) {
        self._nodes.swap(i, j);
        self._reindex();
    }

    /// Reverse the inclusive segment `[i, j]`.
    pub fn reverse(&mut self, i: usize, j: usize) {
        self._nodes[i..=j].reverse();
        self._reindex();
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct DroneTrip {
    pub path: Vec<usize>,
    pub energy: f64,
    pub current_remain_battery: f64,

    /// Sum of the trip's deliveries, loaded at launch.
    pub initial_load: f64,
    pub current_load: f64,
    pub current_delivery: f64,
    pub current_pickup: f64,
}

impl Route for DroneTrip {
    fn nodes(&self) -> &[usize] {
        &self.path
    }
}

impl DroneTrip {
    pub fn new(path: Vec<usize>, battery: f64) -> Self {
        Self {
            path,
            energy: 0.0,
            current_remain_battery: battery,
            initial_load: 0.0,
            current_load: 0.0,
            current_delivery: 0.0,
            current_pickup: 0.0,
        }
    }

    pub fn launch(&self) -> usize {
        self.path[0]
    }

    pub fn retrieval(&self) -> usize {
        self.path[self.path.len() - 1]
    }

    pub fn index_of(&self, customer: usize) -> Option<usize> {
        let n = self.path.len();
        self.path.iter().take(n - 1).skip(1).position(|&c| c == customer).map(|i| i + 1)
    }

    /// A trip with only its launch and retrieval nodes serves nobody.
    pub fn is_empty(&self) -> bool {
        self.path.len() <= 2
    }
}

/// Where a customer sits inside one vehicle pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    Truck { position: usize },
    Drone { trip: usize, index: usize },
}

impl Location {
    pub fn vehicle(&self) -> Vehicle {
        match self {
            Self::Truck { .. } => Vehicle::Truck,
            Self::Drone { .. } => Vehicle::Drone,
        }
    }
}

#[derive(Clone, Debug)]
pub struct VehiclePair {
    pub id: usize,
    pub truck: TruckRoute,
    pub trips: Vec<DroneTrip>,
}

impl VehiclePair {
    pub fn new(id: usize, truck: TruckRoute, trips: Vec<DroneTrip>) -> Self {
        let mut pair = Self { id, truck, trips };
        pair.sort_trips();
        pair
    }

    pub fn locate(&self, customer: usize) -> Option<Location> {
        if let Some(position) = self.truck.position(customer) {
            return Some(Location::Truck { position });
        }

        self.trips
            .iter()
            .enumerate()
            .find_map(|(trip, t)| t.index_of(customer).map(|index| Location::Drone { trip, index }))
    }

    pub fn trip_of(&self, customer: usize) -> Option<usize> {
        self.trips.iter().position(|t| t.contains(customer))
    }

    pub fn trip_launched_at(&self, node: usize) -> Option<usize> {
        self.trips.iter().position(|t| t.launch() == node)
    }

    pub fn trip_retrieved_at(&self, node: usize) -> Option<usize> {
        self.trips.iter().position(|t| t.retrieval() == node)
    }

    pub fn is_anchor(&self, node: usize) -> bool {
        self.trips.iter().any(|t| t.launch() == node || t.retrieval() == node)
    }

    pub fn anchored_trips(&self, node: usize) -> Vec<usize> {
        (0..self.trips.len())
            .filter(|&t| self.trips[t].launch() == node || self.trips[t].retrieval() == node)
            .collect()
    }

    /// Truck positions of the trip's launch and retrieval nodes.
    pub fn trip_span(&self, trip: usize) -> Option<(usize, usize)> {
        let t = self.trips.get(trip)?;
        Some((self.truck.position(t.launch())?, self.truck.position(t.retrieval())?))
    }

    /// Every customer served by this pair, truck stops first.
    pub fn customers(&self) -> Vec<usize> {
        let mut customers = self.truck.customers().to_vec();
        for trip in &self.trips {
            customers.extend_from_slice(trip.customers());
        }
        customers
    }

    /// Take a non-anchor customer out of its route. A trip left without customers is deleted.
    pub fn detach(&mut self, customer: usize) -> Option<Location> {
        let location = self.locate(customer)?;
        match location {
            Location::Truck { .. } => {
                if self.is_anchor(customer) {
                    return None;
                }
                self.truck.remove(customer);
            }
            Location::Drone { trip, index } => {
                self.trips[trip].path.remove(index);
                if self.trips[trip].is_empty() {
                    self.trips.remove(trip);
                }
            }
        }

        Some(location)
    }

    /// Delete a trip and return the customers it served.
    pub fn dissolve_trip(&mut self, trip: usize) -> Vec<usize> {
        if trip >= self.trips.len() {
            return vec![];
        }

        self.trips.remove(trip).customers().to_vec()
    }

    pub fn sort_trips(&mut self) {
        let truck = &self.truck;
        self.trips
            .sort_by_key(|t| truck.position(t.launch()).unwrap_or(usize::MAX));
    }

    /// Whether a span `[launch, retrieval]` of truck positions fits next to the other trips.
    ///
    /// Spans may share an endpoint (a retrieval node may launch the next trip) but never overlap.
    pub fn span_is_free(&self, launch: usize, retrieval: usize, ignore: Option<usize>) -> bool {
        if launch == 0 || launch >= retrieval || retrieval >= self.truck.len() - 1 {
            return false;
        }

        (0..self.trips.len()).filter(|&t| Some(t) != ignore).all(|t| match self.trip_span(t) {
            Some((a, b)) => retrieval <= a || b <= launch,
            None => false,
        })
    }

    /// Structural check: every trip is anchored on the truck route with launch strictly before retrieval, spans
    /// never overlap, drone customers never appear on the truck route and nobody is served twice.
    pub fn validate_structure(&self) -> Result<(), String> {
        let nodes = self.truck.nodes();
        if nodes.len() < 2 || nodes[0] != 0 || nodes[nodes.len() - 1] != 0 {
            return Err(String::from("truck route must start and end at the depot"));
        }

        let mut seen = HashSet::new();
        for &c in self.truck.customers() {
            if c == 0 {
                return Err(String::from("depot inside the truck route"));
            }
            if !seen.insert(c) {
                return Err(format!("customer {c} appears twice"));
            }
        }

        let mut spans = vec![];
        for (t, trip) in self.trips.iter().enumerate() {
            if trip.path.len() < 2 {
                return Err(format!("trip #{t} has no endpoints"));
            }

            let span = self
                .trip_span(t)
                .ok_or_else(|| format!("trip #{t} is not anchored on the truck route"))?;
            if span.0 >= span.1 {
                return Err(format!("trip #{t} is retrieved before it is launched"));
            }
            spans.push(span);

            for &c in trip.customers() {
                if c == 0 {
                    return Err(format!("depot inside trip #{t}"));
                }
                if !seen.insert(c) {
                    return Err(format!("customer {c} appears twice"));
                }
            }
        }

        spans.sort_unstable();
        if spans.windows(2).any(|w| w[1].0 < w[0].1) {
            return Err(String::from("drone trips overlap"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> VehiclePair {
        VehiclePair::new(
            0,
            TruckRoute::new(vec![0, 1, 2, 3, 4, 0]),
            vec![DroneTrip::new(vec![3, 6, 4], 650.0), DroneTrip::new(vec![1, 5, 2], 650.0)],
        )
    }

    #[test]
    fn test_truck_route_index() {
        let mut route = TruckRoute::new(vec![5, 7]);
        assert_eq!(route.nodes(), &[0, 5, 7, 0]);
        assert_eq!(route.position(7), Some(2));

        route.insert(1, 9);
        assert_eq!(route.nodes(), &[0, 9, 5, 7, 0]);
        assert_eq!(route.position(7), Some(3));

        assert_eq!(route.remove(5), Some(2));
        assert_eq!(route.position(5), None);
        assert_eq!(route.position(7), Some(2));

        route.push(3);
        route.reverse(1, 3);
        assert_eq!(route.nodes(), &[0, 3, 7, 9, 0]);
        assert!(route.contains(9));
        assert!(!route.contains(0));
    }

    #[test]
    fn test_locate() {
        let pair = setup();
        assert_eq!(pair.trips[0].launch(), 1);
        assert_eq!(pair.locate(2), Some(Location::Truck { position: 2 }));
        assert_eq!(pair.locate(6), Some(Location::Drone { trip: 1, index: 1 }));
        assert_eq!(pair.locate(8), None);
        assert_eq!(pair.trip_span(1), Some((3, 4)));
        assert_eq!(pair.customers(), vec![1, 2, 3, 4, 5, 6]);
        assert!(pair.is_anchor(3));
        assert!(!pair.is_anchor(5));
    }

    #[test]
    fn test_structure() {
        let mut pair = setup();
        assert!(pair.validate_structure().is_ok());

        assert!(pair.span_is_free(2, 3, None));
        assert!(!pair.span_is_free(1, 3, None));
        assert!(!pair.span_is_free(4, 5, None));

        pair.trips[1].path = vec![2, 6, 4];
        assert!(pair.validate_structure().is_ok());

        pair.trips[1].path = vec![1, 6, 4];
        assert!(pair.validate_structure().is_err());

        pair.trips[1].path = vec![4, 6, 3];
        assert!(pair.validate_structure().is_err());

        pair.trips[1].path = vec![3, 2, 4];
        assert!(pair.validate_structure().is_err());
    }

    #[test]
    fn test_detach_and_dissolve() {
        let mut pair = setup();
        assert_eq!(pair.detach(3), None);
        assert_eq!(pair.detach(2), None);

        assert_eq!(pair.detach(5), Some(Location::Drone { trip: 0, index: 1 }));
        assert_eq!(pair.trips.len(), 1);
        assert!(!pair.is_anchor(1));

        assert_eq!(pair.detach(1), Some(Location::Truck { position: 1 }));
        assert_eq!(pair.truck.nodes(), &[0, 2, 3, 4, 0]);

        assert_eq!(pair.dissolve_trip(0), vec![6]);
        assert!(pair.trips.is_empty());
        assert!(pair.dissolve_trip(0).is_empty());
    }

    #[test]
    fn test_route_edges() {
        let trip = DroneTrip::new(vec![3, 6, 4], 650.0);
        assert_eq!(trip.edges(), vec![(3, 6), (6, 4)]);
        assert_eq!(trip.index_of(6), Some(1));
        assert_eq!(trip.index_of(3), None);
        assert!(!trip.is_empty());
        assert!(DroneTrip::new(vec![3, 4], 650.0).is_empty());
    }
}
