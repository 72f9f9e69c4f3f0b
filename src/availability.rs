use serde::{Deserialize, Serialize};

/// Probability that a customer is at home when a vehicle shows up.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum Availability {
    #[serde(rename = "constant")]
    Constant(f64),
    /// Equal-width buckets over `[0, horizon]`; times past the horizon use the last bucket.
    #[serde(rename = "profile")]
    Profile { buckets: Vec<f64>, horizon: f64 },
}

impl Default for Availability {
    fn default() -> Self {
        Self::Constant(0.8)
    }
}

impl Availability {
    pub fn probability(&self, time: f64) -> f64 {
        match self {
            Self::Constant(p) => p.clamp(0.0, 1.0),
            Self::Profile { buckets, horizon } => {
                if buckets.is_empty() {
                    return 1.0;
                }

                let width = horizon / buckets.len() as f64;
                let index = if width > 0.0 && time > 0.0 {
                    ((time / width) as usize).min(buckets.len() - 1)
                } else {
                    0
                };

                buckets[index].clamp(0.0, 1.0)
            }
        }
    }

    /// A uniform `draw` in `[0, 1)` at or below the probability means the customer is present.
    pub fn is_present(&self, time: f64, draw: f64) -> bool {
        draw <= self.probability(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant() {
        let a = Availability::default();
        assert_eq!(a.probability(0.0), 0.8);
        assert_eq!(a.probability(1e6), 0.8);
        assert!(a.is_present(10.0, 0.8));
        assert!(!a.is_present(10.0, 0.81));
    }

    #[test]
    fn test_profile_buckets() {
        let a = Availability::Profile {
            buckets: vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9],
            horizon: 600.0,
        };
        assert_eq!(a.probability(0.0), 0.0);
        assert_eq!(a.probability(59.9), 0.0);
        assert_eq!(a.probability(60.0), 0.1);
        assert_eq!(a.probability(599.0), 0.9);
        assert_eq!(a.probability(10_000.0), 0.9);
    }
}
