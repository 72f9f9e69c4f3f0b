use std::sync::atomic::{AtomicUsize, Ordering};

use atomic_float::AtomicF64;

use crate::config::PheromoneConfig;

/// Square matrix of learned edge desirability, shared read-mostly by the repair operators.
///
/// Values stay within `[min, max]` except on the diagonal, which is always 0.
pub struct PheromoneField {
    _size: usize,
    _values: Vec<AtomicF64>,
    _cycles: AtomicUsize,
    _config: PheromoneConfig,
}

impl PheromoneField {
    pub fn new(size: usize, config: &PheromoneConfig) -> Self {
        let initial = config.initial.clamp(config.min, config.max);
        let values = (0..size * size)
            .map(|k| AtomicF64::new(if k / size == k % size { 0.0 } else { initial }))
            .collect();

        Self {
            _size: size,
            _values: values,
            _cycles: AtomicUsize::new(0),
            _config: config.clone(),
        }
    }

    pub fn size(&self) -> usize {
        self._size
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        if i >= self._size || j >= self._size {
            return 0.0;
        }

        self._values[i * self._size + j].load(Ordering::Relaxed)
    }

    fn _set(&self, i: usize, j: usize, value: f64) {
        let value = if i == j {
            0.0
        } else {
            value.clamp(self._config.min, self._config.max)
        };

        self._values[i * self._size + j].store(value, Ordering::Relaxed);
    }

    /// Reinforce `edges` proportionally to the relative cost improvement.
    ///
    /// Returns whether anything was updated: a non-positive `before` or a cost increase leaves the field untouched.
    pub fn update(&self, edges: &[(usize, usize)], before: f64, after: f64) -> bool {
        if before <= 0.0 || after >= before {
            return false;
        }

        let rate = self._config.learning_rate;
        let increment = (before - after) / before * rate;
        for &(i, j) in edges {
            if i < self._size && j < self._size {
                self._set(i, j, self.get(i, j).mul_add(1.0 - rate, increment));
            }
        }

        true
    }

    pub fn evaporate(&self) {
        let keep = 1.0 - self._config.evaporation_rate;
        for i in 0..self._size {
            for j in 0..self._size {
                self._set(i, j, self.get(i, j) * keep);
            }
        }
    }

    /// Count one update cycle and evaporate on every `evaporate_every`-th.
    pub fn tick(&self) -> bool {
        let cycles = self._cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let every = self._config.evaporate_every.max(1);
        if cycles % every == 0 {
            self.evaporate();
            return true;
        }

        false
    }

    /// Lower is better: blends the insertion cost with the pheromone on the two new edges.
    pub fn insertion_score(&self, prev: usize, customer: usize, next: usize, cost: f64) -> f64 {
        let attraction = self.get(prev, customer) + self.get(customer, next);
        -(self._config.alpha / cost.max(0.1) + self._config.beta * attraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> PheromoneField {
        PheromoneField::new(4, &PheromoneConfig::default())
    }

    #[test]
    fn test_initial_values() {
        let field = setup();
        assert_eq!(field.size(), 4);
        assert_eq!(field.get(1, 2), 1.0);
        assert_eq!(field.get(2, 2), 0.0);
        assert_eq!(field.get(9, 0), 0.0);
    }

    #[test]
    fn test_update_on_improvement() {
        let field = setup();
        let edges = [(0, 1), (1, 2), (2, 0), (3, 3)];
        assert!(field.update(&edges, 1000.0, 900.0));

        // increment = 0.1 * 0.15 = 0.015; 1.0 * 0.85 + 0.015
        for &(i, j) in &edges[..3] {
            assert!((field.get(i, j) - 0.865).abs() < 1e-12);
            assert!(field.get(i, j) >= 0.015);
        }
        assert_eq!(field.get(3, 3), 0.0);
        assert_eq!(field.get(1, 3), 1.0);

        assert!(!field.update(&edges, 900.0, 950.0));
        assert!(!field.update(&edges, 0.0, -1.0));
    }

    #[test]
    fn test_bounds() {
        let field = setup();
        for _ in 0..1000 {
            field.evaporate();
        }
        assert_eq!(field.get(0, 1), 0.01);
        assert_eq!(field.get(1, 1), 0.0);

        let config = PheromoneConfig {
            learning_rate: 1.0,
            initial: 10.0,
            ..PheromoneConfig::default()
        };
        let field = PheromoneField::new(3, &config);
        field.update(&[(0, 1)], 1.0, 1e-9);
        assert!(field.get(0, 1) <= 10.0);
    }

    #[test]
    fn test_tick_evaporates_periodically() {
        let field = setup();
        for _ in 0..9 {
            assert!(!field.tick());
        }
        assert!(field.tick());
        assert!((field.get(0, 1) - 0.98).abs() < 1e-12);
    }

    #[test]
    fn test_insertion_score_prefers_pheromone() {
        let field = setup();
        for _ in 0..500 {
            field.evaporate();
        }
        field.update(&[(0, 1), (1, 2)], 100.0, 10.0);
        assert!(field.insertion_score(0, 1, 2, 5.0) < field.insertion_score(0, 3, 2, 5.0));
        assert!(field.insertion_score(0, 3, 2, 1.0) < field.insertion_score(0, 3, 2, 5.0));
    }
}
