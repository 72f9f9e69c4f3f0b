use std::fmt::Display;

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OperatorRecord {
    pub name: String,
    pub weight: f64,
    pub calls: usize,
    pub successes: usize,
}

/// How weights are refreshed from success rates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WeightRule {
    /// Every `window` calls of one operator, that operator gets `0.1 + 0.9 * rate`.
    PerOperator,

    /// Every `window` calls overall, each operator called more than `min_calls` times gets
    /// `0.1 + 0.8 * rate + 0.1`.
    Global { min_calls: usize },
}

/// Roulette-wheel operator selection with success-rate weights.
#[derive(Clone, Debug)]
pub struct AdaptiveState<T> {
    _operators: Vec<T>,
    _rule: WeightRule,
    _window: usize,
    _total: usize,
    pub weights: Vec<f64>,
    pub calls: Vec<usize>,
    pub successes: Vec<usize>,
}

impl<T: Copy + PartialEq + Display> AdaptiveState<T> {
    pub fn new(operators: &[T], window: usize, rule: WeightRule) -> Self {
        Self {
            _operators: operators.to_vec(),
            _rule: rule,
            _window: window.max(1),
            _total: 0,
            weights: vec![1.0; operators.len()],
            calls: vec![0; operators.len()],
            successes: vec![0; operators.len()],
        }
    }

    fn _index(&self, operator: T) -> Option<usize> {
        self._operators.iter().position(|&o| o == operator)
    }

    pub fn select<R: Rng>(&self, rng: &mut R) -> T {
        let index = match WeightedIndex::new(&self.weights) {
            Ok(distribution) => distribution.sample(rng),
            Err(_) => rng.random_range(0..self._operators.len()),
        };

        self._operators[index]
    }

    pub fn weight(&self, operator: T) -> f64 {
        self._index(operator).map_or(0.0, |i| self.weights[i])
    }

    pub fn record(&mut self, operator: T, success: bool) {
        let Some(i) = self._index(operator) else {
            return;
        };

        self._total += 1;
        self.calls[i] += 1;
        if success {
            self.successes[i] += 1;
        }

        match self._rule {
            WeightRule::PerOperator => {
                if self.calls[i] % self._window == 0 {
                    let rate = self.successes[i] as f64 / self.calls[i] as f64;
                    self.weights[i] = 0.9f64.mul_add(rate, 0.1);
                }
            }
            WeightRule::Global { min_calls } => {
                if self._total % self._window == 0 {
                    for j in 0..self._operators.len() {
                        if self.calls[j] > min_calls {
                            let rate = self.successes[j] as f64 / self.calls[j] as f64;
                            self.weights[j] = 0.8f64.mul_add(rate, 0.1) + 0.1;
                        }
                    }
                }
            }
        }
    }

    pub fn records(&self) -> Vec<OperatorRecord> {
        self._operators
            .iter()
            .enumerate()
            .map(|(i, o)| OperatorRecord {
                name: o.to_string(),
                weight: self.weights[i],
                calls: self.calls[i],
                successes: self.successes[i],
            })
            .collect()
    }
}
