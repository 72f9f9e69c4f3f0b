use std::error::Error;
use std::process;

use clap::Parser;
use colored::Colorize;
use mimalloc::MiMalloc;

mod adaptive;
mod availability;
mod cli;
mod clusterize;
mod config;
mod context;
mod customers;
mod destroy;
mod errors;
mod feasibility;
#[cfg(test)]
mod fixtures;
mod logger;
mod neighborhoods;
mod pheromone;
mod registry;
mod repair;
mod replanning;
mod routes;
mod solutions;
mod timing;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn run() -> Result<(), Box<dyn Error>> {
    let arguments = cli::Arguments::parse();
    let evaluate = match &arguments.command {
        cli::Commands::Evaluate { solution, .. } => Some(solution.clone()),
        cli::Commands::Run { .. } => None,
    };
    let config = config::Config::from_arguments(arguments)?;

    if let Some(path) = evaluate {
        // Costs stored in the file were computed with the config of that run, rebuild the routes with this one.
        let recorded = solutions::Solution::load(path)?;
        let plan = recorded.plan();
        plan.validate()?;

        let ctx = context::Context::new(config, &plan.pairs)?;
        let evaluated = solutions::Solution::capture(&ctx, solutions::SnapshotKind::Copy);
        for (id, cost) in evaluated.pair_costs.iter().enumerate() {
            eprintln!("Vehicle pair #{id}: cost = {cost:.4}");
        }
        eprintln!(
            "{}",
            format!(
                "Result = {:.4} (recorded {:.4})",
                evaluated.total_cost, recorded.total_cost
            )
            .red()
        );
        return Ok(());
    }

    let plan = match &config.plan {
        Some(path) => solutions::Plan::load(path)?,
        None => solutions::initial_plan(&config),
    };
    plan.validate()?;

    let ctx = context::Context::new(config, &plan.pairs)?;
    let mut logger = logger::Logger::new(&ctx.config)?;
    let initial = solutions::Solution::capture(&ctx, solutions::SnapshotKind::Initial);
    eprintln!(
        "Initial plan: {} vehicle pair(s), {} drone trip(s), cost = {:.4}",
        initial.pairs.len(),
        initial.pairs.iter().map(|p| p.trips.len()).sum::<usize>(),
        initial.total_cost,
    );

    let mut optimizer = replanning::DynamicOptimizer::new(ctx);
    let completed = if optimizer.ctx.config.dry_run {
        false
    } else {
        optimizer.run_with(|record| logger.log(record).map_err(Box::<dyn Error>::from))?
    };

    let kind = if optimizer.ctx.config.dry_run {
        solutions::SnapshotKind::Current
    } else {
        solutions::SnapshotKind::Best
    };
    let best = solutions::Solution::capture(&optimizer.ctx, kind);
    logger.finalize(&optimizer, &initial, &best, completed)?;

    let statistics = &optimizer.statistics;
    eprintln!(
        "Stages = {}, failed = {}, replanned = {} ({} successful)",
        statistics.stages, statistics.failed, statistics.replanned, statistics.replan_successes,
    );
    eprintln!(
        "{}",
        format!(
            "Result = {:.4} ({} served, {} failed)",
            best.total_cost, best.served, best.failed
        )
        .red()
    );

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{}", format!("Error: {e}").red());
        process::exit(1);
    }
}
