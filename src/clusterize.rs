use std::cmp::min;
use std::f64::consts;

use crate::config::Config;

/// Angular sweep around the depot: split `customers` into `k` sectors of equal angular width, starting right after
/// the widest empty gap.
pub fn clusterize(config: &Config, customers: &mut [usize], k: usize) -> Vec<Vec<usize>> {
    let mut clusters = vec![vec![]; k];
    if customers.is_empty() || k == 0 {
        return clusters;
    }

    let angle = |customer: usize| {
        let angle = (config.y[customer] - config.y[0]).atan2(config.x[customer] - config.x[0]);
        if angle < 0.0 { angle + 2.0 * consts::PI } else { angle }
    };

    customers.sort_by(|&i, &j| angle(i).total_cmp(&angle(j)).then(i.cmp(&j)));

    // Start the sweep after the widest gap between consecutive customers
    let n = customers.len();
    let mut max_gap = 0.0;
    let mut max_gap_idx = n - 1;
    for i in 0..n {
        let mut gap = angle(customers[(i + 1) % n]) - angle(customers[i]);
        if gap <= 0.0 {
            gap += 2.0 * consts::PI;
        }
        if gap > max_gap {
            max_gap = gap;
            max_gap_idx = i;
        }
    }
    customers.rotate_left((max_gap_idx + 1) % n);

    let first = angle(customers[0]);
    let unwrap = |customer: usize| {
        let a = angle(customer);
        if a < first { a + 2.0 * consts::PI } else { a }
    };

    let span = unwrap(customers[n - 1]) - first;
    let width = span / k as f64;
    for &customer in customers.iter() {
        let cluster = if width > 0.0 {
            min(((unwrap(customer) - first) / width) as usize, k - 1)
        } else {
            0
        };
        clusters[cluster].push(customer);
    }

    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CustomerRow;

    fn config(points: &[(f64, f64)]) -> Config {
        let rows = points
            .iter()
            .map(|&(x, y)| CustomerRow {
                x,
                y,
                demand: 1.0,
                start_time: 0.0,
                end_time: 100.0,
                dronable: true,
            })
            .collect::<Vec<_>>();
        Config::build((0.0, 0.0), 100.0, &rows)
    }

    #[test]
    fn test_two_opposite_groups() {
        let config = config(&[(10.0, 1.0), (-10.0, 1.0), (10.0, -1.0), (-10.0, -1.0)]);
        let mut customers = vec![1, 2, 3, 4];

        let mut clusters = clusterize(&config, &mut customers, 2);
        for cluster in &mut clusters {
            cluster.sort_unstable();
        }
        clusters.sort();

        assert_eq!(clusters, vec![vec![1, 3], vec![2, 4]]);
    }

    #[test]
    fn test_degenerate_inputs() {
        let config = config(&[(5.0, 5.0), (10.0, 10.0)]);

        assert!(clusterize(&config, &mut [], 3).iter().all(Vec::is_empty));
        assert!(clusterize(&config, &mut [1, 2], 0).is_empty());

        let clusters = clusterize(&config, &mut [1, 2], 3);
        assert_eq!(clusters[0].len(), 2);
        assert!(clusters[1].is_empty() && clusters[2].is_empty());
    }
}
