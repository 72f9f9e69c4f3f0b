//! Small deterministic instances shared by the unit tests.

use crate::config::{Config, CustomerRow};
use crate::context::Context;
use crate::solutions::PairPlan;

/// Depot at the origin, customer `i` at `(10 i, 0)` with one unit of delivery and a wide window.
pub fn line_config(n: usize) -> Config {
    let rows = (1..=n)
        .map(|i| CustomerRow {
            x: 10.0 * i as f64,
            y: 0.0,
            demand: 1.0,
            start_time: 0.0,
            end_time: 1000.0,
            dronable: true,
        })
        .collect::<Vec<_>>();

    let mut config = Config::build((0.0, 0.0), 1000.0, &rows);
    config.truck.max_work_time = 1000.0;
    config.seed = Some(7);
    config
}

pub fn line_context(n: usize, plans: &[PairPlan]) -> Context {
    Context::new(line_config(n), plans).unwrap()
}

pub fn context(config: Config, plans: &[PairPlan]) -> Context {
    Context::new(config, plans).unwrap()
}

/// Customers scattered on a grid around a central depot, with mixed pickups and deliveries.
pub fn grid_config(n: usize) -> Config {
    let rows = (1..=n)
        .map(|i| {
            let x = 40.0 + 6.0 * ((i % 5) as f64 - 2.0);
            let y = 50.0 + 6.0 * ((i / 5) as f64 - 1.0);
            CustomerRow {
                x,
                y,
                demand: if i % 3 == 0 { -2.0 } else { 1.0 + (i % 4) as f64 },
                start_time: 0.0,
                end_time: 2000.0,
                dronable: i % 4 != 0,
            }
        })
        .collect::<Vec<_>>();

    let mut config = Config::build((40.0, 50.0), 2000.0, &rows);
    config.truck.max_work_time = 2000.0;
    config.seed = Some(11);
    config
}
