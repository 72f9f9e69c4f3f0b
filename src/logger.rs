use std::error::Error;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Serialize;

use crate::adaptive::OperatorRecord;
use crate::config::{Config, SerializedConfig};
use crate::errors::ExpectedValue;
use crate::feasibility::FeasibilityStatistics;
use crate::replanning::{DynamicOptimizer, RunStatistics, StageRecord};
use crate::solutions::Solution;

#[derive(Serialize)]
struct RunJSON<'a> {
    problem: String,
    id: String,
    stages: usize,
    completed: bool,
    statistics: &'a RunStatistics,
    destroy_operators: Vec<OperatorRecord>,
    repair_operators: Vec<OperatorRecord>,
    feasibility: &'a FeasibilityStatistics,
    elapsed: f64,
    config: &'a SerializedConfig,
    initial: &'a Solution,
    best: &'a Solution,
}

pub struct Logger {
    _stage: usize,
    _time_offset: Instant,

    _outputs: PathBuf,
    _problem: String,
    _id: String,
    _writer: Option<File>,
}

impl Logger {
    pub fn new(config: &Config) -> Result<Self, Box<dyn Error>> {
        let outputs = PathBuf::from(&config.outputs);
        if !outputs.is_dir() {
            fs::create_dir_all(&outputs)?;
        }

        let problem = ExpectedValue::cast(
            Path::new(&config.problem)
                .file_stem()
                .and_then(|f| f.to_os_string().into_string().ok()),
            "a problem file name",
        )?;
        let id = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(char::from)
            .collect::<String>();

        let mut writer = if config.disable_logging {
            None
        } else {
            Some(File::create(outputs.join(format!("{problem}-{id}.csv")))?)
        };

        if let Some(ref mut writer) = writer {
            eprintln!("Logging stages to {writer:?}");

            let columns = [
                "Stage",
                "Customer",
                "Outcome",
                "Vehicle",
                "Pair",
                "Replanned",
                "Replan outcome",
                "Pair cost",
                "Total cost",
            ]
            .join(",");
            writeln!(writer, "sep=,\n{columns}")?;
        }

        Ok(Self {
            _stage: 0,
            _time_offset: Instant::now(),
            _outputs: outputs,
            _problem: problem,
            _id: id,
            _writer: writer,
        })
    }

    pub fn id(&self) -> &str {
        &self._id
    }

    pub fn log(&mut self, record: &StageRecord) -> Result<(), io::Error> {
        fn _wrap(content: &str) -> String {
            format!("\"{content}\"")
        }

        self._stage += 1;
        if let Some(ref mut writer) = self._writer {
            writeln!(
                writer,
                "{},{},{},{},{},{},{},{},{}",
                record.stage,
                record.customer,
                record.outcome,
                record.vehicle,
                record.pair,
                i32::from(record.replan.is_some()),
                _wrap(&record.replan.as_ref().map_or(String::new(), ToString::to_string)),
                record.pair_cost,
                record.total_cost,
            )?;
        }

        Ok(())
    }

    pub fn finalize(
        &self,
        optimizer: &DynamicOptimizer,
        initial: &Solution,
        best: &Solution,
        completed: bool,
    ) -> Result<Vec<PathBuf>, Box<dyn Error>> {
        let elapsed = self._time_offset.elapsed().as_secs_f64();
        let serialized_config = SerializedConfig::from(optimizer.ctx.config.clone());

        let report = RunJSON {
            problem: self._problem.clone(),
            id: self._id.clone(),
            stages: self._stage,
            completed,
            statistics: &optimizer.statistics,
            destroy_operators: optimizer.destroy.records(),
            repair_operators: optimizer.repair.records(),
            feasibility: &optimizer.ctx.statistics,
            elapsed,
            config: &serialized_config,
            initial,
            best,
        };

        let files = [
            (
                format!("{}-{}.json", self._problem, self._id),
                serde_json::to_string(&report)?,
            ),
            (
                format!("{}-{}-solution.json", self._problem, self._id),
                serde_json::to_string(best)?,
            ),
            (
                format!("{}-{}-config.json", self._problem, self._id),
                serde_json::to_string(&serialized_config)?,
            ),
        ];

        let mut paths = vec![];
        for (name, content) in files {
            let path = self._outputs.join(name);
            let mut json = File::create(&path)?;
            println!("{}", path.display());
            json.write_all(content.as_bytes())?;
            paths.push(path);
        }

        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::solutions::{PairPlan, SnapshotKind};

    #[test]
    fn test_stage_rows_and_reports() {
        let outputs = std::env::temp_dir().join(format!("dpd-logger-{}", std::process::id()));
        let mut config = fixtures::line_config(2);
        config.problem = String::from("problems/line.csv");
        config.outputs = outputs.display().to_string();
        config.disable_logging = false;

        let ctx = fixtures::context(config.clone(), &[PairPlan::new(vec![0, 1, 2, 0], vec![])]);
        let initial = Solution::capture(&ctx, SnapshotKind::Initial);
        let mut optimizer = DynamicOptimizer::new(ctx);

        let mut logger = Logger::new(&config).unwrap();
        let completed = optimizer
            .run_with(|record| logger.log(record).map_err(Box::<dyn Error>::from))
            .unwrap();
        let best = Solution::capture(&optimizer.ctx, SnapshotKind::Best);
        let paths = logger.finalize(&optimizer, &initial, &best, completed).unwrap();

        let csv = fs::read_to_string(outputs.join(format!("line-{}.csv", logger.id()))).unwrap();
        let lines = csv.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "sep=,");
        assert!(lines[1].starts_with("Stage,Customer,Outcome"));
        assert_eq!(lines.len(), 2 + optimizer.statistics.stages);

        assert_eq!(paths.len(), 3);
        let saved = Solution::load(&paths[1]).unwrap();
        assert_eq!(saved.pairs, best.pairs);

        fs::remove_dir_all(outputs).unwrap();
    }

    #[test]
    fn test_problem_name_required() {
        let mut config = fixtures::line_config(1);
        config.problem = String::new();
        config.outputs = std::env::temp_dir().display().to_string();

        assert!(Logger::new(&config).is_err());
    }
}
