// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Run the external verifier on the checking units and turn its output into
//! race reports.

use crate::regions::PairCheckingRegion;
use crate::session::RaceSession;
use crate::units::CheckingUnit;
use anyhow::{Context, Result};
use boogie_ast::boogie_program::AssertionSite;
use driver_metadata::{EntryPointPair, PairOutcome};
use rayon::prelude::*;
use regex::Regex;
use std::process::Command;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use strum_macros::AsRefStr;
use tracing::{debug, warn};

/// `unit.bpl(12,3): Error BP5001: This assertion might not hold.`
static ERROR_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<file>.+)\((?P<line>\d+),(?P<col>\d+)\): [Ee]rror(?: [A-Z]+\d+)?: (?P<msg>.*)$")
        .expect("valid error line pattern")
});

/// `Boogie program verifier finished with 1 verified, 2 errors, 1 time out`
static SUMMARY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"finished with (?P<verified>\d+) verified, (?P<errors>\d+) errors?(?:, (?P<timeouts>\d+) time outs?)?")
        .expect("valid summary pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
pub enum UnitStatus {
    Verified,
    Races,
    TimedOut,
    /// The verifier did not get to a verdict
    Failed,
}

/// An error reported on line `line` of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierError {
    pub line: usize,
    pub message: String,
}

/// A race assertion the verifier could not prove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceReport {
    pub resource: String,
    /// State captured right before the failing assertion
    pub capture_state: Option<String>,
    pub line: usize,
}

#[derive(Debug)]
pub struct UnitResult {
    pub checker: String,
    pub pair: EntryPointPair,
    pub status: UnitStatus,
    pub races: Vec<RaceReport>,
    pub runtime: Duration,
}

/// The error lines of a verifier run, in output order.
pub fn parse_errors(output: &str) -> Vec<VerifierError> {
    output
        .lines()
        .filter_map(|line| ERROR_LINE.captures(line.trim_end()))
        .filter_map(|caps| {
            let line = caps["line"].parse().ok()?;
            Some(VerifierError { line, message: caps["msg"].to_string() })
        })
        .collect()
}

fn timeouts(output: &str) -> Option<usize> {
    let caps = SUMMARY_LINE.captures(output)?;
    Some(caps.name("timeouts").and_then(|t| t.as_str().parse().ok()).unwrap_or(0))
}

/// Map each error on a race assertion to the resource it guards. Errors on
/// other lines are not races and are left out.
pub fn map_races(errors: &[VerifierError], assertions: &[AssertionSite], checker: &PairCheckingRegion) -> Vec<RaceReport> {
    let mut races: Vec<RaceReport> = Vec::new();
    for error in errors {
        let Some(site) = assertions.iter().find(|site| site.line == error.line) else { continue };
        if !site.attributes.has("race_checking") {
            continue;
        }
        let Some(resource) = site.attributes.string("resource") else { continue };
        if races.iter().any(|race| race.resource == resource) {
            continue;
        }
        races.push(RaceReport {
            resource: resource.to_string(),
            capture_state: checker.check_of(resource).map(|check| check.capture_state.clone()),
            line: error.line,
        });
    }
    races
}

/// Decide the verdict for one run from its output.
pub fn unit_status(output: &str, errors: &[VerifierError], races: &[RaceReport]) -> UnitStatus {
    if !races.is_empty() {
        return UnitStatus::Races;
    }
    match timeouts(output) {
        Some(count) if count > 0 => UnitStatus::TimedOut,
        Some(_) if errors.is_empty() => UnitStatus::Verified,
        _ => UnitStatus::Failed,
    }
}

/// Mark the pairs the verifier found a race in.
pub fn apply_results(outcomes: &mut [PairOutcome], results: &[UnitResult]) {
    for result in results.iter().filter(|r| r.status == UnitStatus::Races) {
        for outcome in outcomes.iter_mut() {
            if outcome.ep1 == result.pair.ep1 && outcome.ep2 == result.pair.ep2 {
                outcome.bug = true;
            }
        }
    }
}

impl RaceSession {
    fn verifier_command(&self, unit: &CheckingUnit) -> Option<Command> {
        let mut cmd = Command::new(self.verifier.as_ref()?);
        cmd.args(&self.args.verifier_args);
        if let Some(secs) = self.args.verifier_timeout {
            cmd.arg(format!("/timeLimit:{secs}"));
        }
        cmd.arg(&unit.path);
        Some(cmd)
    }

    /// Verify a single unit.
    pub fn verify_unit(&self, unit: &CheckingUnit, checker: &PairCheckingRegion) -> Result<UnitResult> {
        let cmd = self.verifier_command(unit).context("No verifier was configured")?;
        if !self.common.quiet {
            println!("Checking {}...", unit.checker);
        }
        let start_time = Instant::now();
        let output = self.run_captured(cmd)?;
        let runtime = start_time.elapsed();
        let stdout = String::from_utf8_lossy(&output.stdout);

        let errors = parse_errors(&stdout);
        let races = map_races(&errors, &unit.assertions, checker);
        let status = unit_status(&stdout, &errors, &races);
        if status == UnitStatus::Failed {
            warn!(unit = %unit.path.display(), exit = ?output.status.code(), "verifier gave no verdict");
        }
        debug!(checker = %unit.checker, status = status.as_ref(), races = races.len(), ?runtime, "verified");
        Ok(UnitResult { checker: unit.checker.clone(), pair: unit.pair.clone(), status, races, runtime })
    }

    /// Verify every unit on a pool of `--jobs` threads. Results keep the
    /// order of `units`.
    pub fn verify_units(&self, units: &[CheckingUnit], checkers: &[PairCheckingRegion]) -> Result<Vec<UnitResult>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.args.jobs.unwrap_or(0))
            .build()
            .context("Failed to start the verifier pool")?;
        pool.install(|| {
            units
                .par_iter()
                .map(|unit| {
                    let checker = checkers
                        .iter()
                        .find(|c| c.name() == unit.checker)
                        .with_context(|| format!("No checker named `{}`", unit.checker))?;
                    self.verify_unit(unit, checker)
                })
                .collect()
        })
    }

    /// Print the races and a summary line, then exit with a failure code if
    /// any race was found.
    pub fn print_final_summary(self, results: &[UnitResult]) -> Result<()> {
        let count = |status| results.iter().filter(|r| r.status == status).count();
        let racy = count(UnitStatus::Races);
        if !self.common.quiet {
            for result in results.iter().filter(|r| r.status != UnitStatus::Verified) {
                println!("{} for {} and {}", result.status.as_ref(), result.pair.ep1, result.pair.ep2);
                for race in &result.races {
                    let state = race.capture_state.as_deref().unwrap_or("unknown state");
                    println!("  possible race on `{}` ({state})", race.resource);
                }
            }
            println!(
                "Complete - {} pairs verified, {} with races, {} timed out, {} failed, {} total.",
                count(UnitStatus::Verified),
                racy,
                count(UnitStatus::TimedOut),
                count(UnitStatus::Failed),
                results.len()
            );
        }
        if racy > 0 {
            // Failure exit code without additional error message
            drop(self);
            std::process::exit(1);
        }
        Ok(())
    }
}
