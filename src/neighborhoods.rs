use std::fmt::{self, Display};

use rand::Rng;
use serde::Serialize;

use crate::context::Context;
use crate::errors::RoutingError;
use crate::feasibility::{self, Violation, ViolationKind};
use crate::routes::Route;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Neighborhood {
    Relocate,
    Swap,
    TwoOpt,
}

pub const NEIGHBORHOODS: [Neighborhood; 3] = [Neighborhood::Relocate, Neighborhood::Swap, Neighborhood::TwoOpt];

impl Display for Neighborhood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Relocate => "Relocate",
                Self::Swap => "Swap",
                Self::TwoOpt => "2-opt",
            }
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct SearchReport {
    pub cost: f64,
    pub attempts: usize,
    pub improvements: usize,
}

fn _counts(violations: &[Violation]) -> (usize, usize) {
    let late = violations
        .iter()
        .filter(|v| v.kind() == ViolationKind::TimeWindow)
        .count();
    (violations.len() - late, late)
}

impl Neighborhood {
    /// Apply the move to the truck route of pair `id`. Relocation moves the node at `i` to `j`, the other moves
    /// expect `i < j`.
    fn _apply(&self, ctx: &mut Context, id: usize, i: usize, j: usize) -> Result<(), RoutingError> {
        let truck = &mut ctx.pair_mut(id)?.truck;
        match self {
            Self::Relocate => {
                let customer = truck.nodes()[i];
                truck.remove(customer);
                truck.insert(j, customer);
            }
            Self::Swap => truck.swap(i, j),
            Self::TwoOpt => truck.reverse(i, j),
        }

        Ok(())
    }
}

/// Randomized first-improvement search over the unvisited part of the truck route.
///
/// A move is kept when the pair stays structurally valid, gains no load or energy violation, gains no late customer
/// and costs no more than the best cost so far. The search stops after
/// `local_search_max_no_improve` consecutive attempts without a strict improvement.
pub fn local_search(ctx: &mut Context, id: usize, current_cost: f64) -> Result<SearchReport, RoutingError> {
    let (hard, late) = _counts(&feasibility::scan(ctx, id)?);
    let mut report = SearchReport {
        cost: current_cost,
        ..SearchReport::default()
    };

    let limit = ctx.config.search.local_search_max_no_improve;
    let mut no_improve = 0;
    while no_improve < limit {
        let first = ctx.first_open_position(id);
        let last = ctx.pair(id)?.truck.len().saturating_sub(2);
        if last <= first {
            break;
        }

        report.attempts += 1;
        let neighborhood = NEIGHBORHOODS[ctx.rng.random_range(0..NEIGHBORHOODS.len())];
        let i = ctx.rng.random_range(first..last);
        let j = ctx.rng.random_range(i + 1..=last);
        let (i, j) = if neighborhood == Neighborhood::Relocate && ctx.rng.random_bool(0.5) {
            (j, i)
        } else {
            (i, j)
        };

        let snapshot = ctx.snapshot_pair(id)?;
        neighborhood._apply(ctx, id, i, j)?;

        let accepted = if ctx.pair(id)?.validate_structure().is_ok() {
            ctx.refresh_pair(id)?;
            let (new_hard, new_late) = _counts(&feasibility::scan(ctx, id)?);
            let cost = ctx.pair_cost(id);

            if new_hard <= hard && new_late <= late && cost <= report.cost {
                if cost < report.cost - 1e-9 {
                    report.improvements += 1;
                    no_improve = 0;
                } else {
                    no_improve += 1;
                }
                report.cost = cost;
                true
            } else {
                false
            }
        } else {
            false
        };

        if !accepted {
            ctx.restore_pair(&snapshot);
            no_improve += 1;
        }
    }

    Ok(report)
}
