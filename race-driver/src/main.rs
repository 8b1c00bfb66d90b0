// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use std::fs::File;
use std::io::{BufWriter, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use boogie_ast::boogie_program::BoogieProgram;
use clap::Parser;
use driver_metadata::{DriverModel, ModelError, PairOutcome, write_pairs};
use tracing::{debug, info};

use crate::args::{RaceDriverArgs, check_is_valid};
use crate::context::AnalysisContext;
use crate::session::RaceSession;

mod args;
mod call_verifier;
mod context;
mod ghost;
mod passes;
mod pointer;
mod regions;
mod session;
mod units;
mod util;

/// Exit code for a driver model or program that cannot be loaded.
const INPUT_ERROR: u8 = 2;

/// The main function for the `race-driver`.
fn main() -> ExitCode {
    let args = RaceDriverArgs::parse();
    check_is_valid(&args);

    if let Err(error) = run(args) {
        // We are using the debug format for now to print the all the context.
        debug!(?error, "main_failure");
        util::error(&format!("{error:#}"));
        if is_input_error(&error) { ExitCode::from(INPUT_ERROR) } else { ExitCode::FAILURE }
    } else {
        ExitCode::SUCCESS
    }
}

fn is_input_error(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| cause.is::<ModelError>() || cause.is::<serde_json::Error>())
}

fn run(args: RaceDriverArgs) -> Result<()> {
    let session = RaceSession::new(args)?;
    let model = DriverModel::from_info_file(&session.driver_info_path())?;
    info!(entry_points = model.entry_points().len(), pairs = model.pairs().len(), "loaded driver model");
    if model.has_synthesized_init() {
        debug!("driver has no registration table, its init is synthesized");
    }

    if session.args.pairs_only {
        let outcomes: Vec<PairOutcome> = model
            .pairs()
            .iter()
            .map(|pair| PairOutcome { ep1: pair.ep1.clone(), ep2: pair.ep2.clone(), bug: false })
            .collect();
        return write_report(&session, &outcomes);
    }

    let program = load_program(&session)?;
    let mut ctx = AnalysisContext::new(program, model);
    session.info_operation("Analyzing", &session.input.display().to_string());
    passes::run_passes(&mut passes::default_pipeline(), &mut ctx, &session.args)?;

    let units = session.write_units(&ctx)?;
    let mut outcomes = ctx.pair_outcomes();
    if !session.args.verify {
        return write_report(&session, &outcomes);
    }

    let results = session.verify_units(&units, &ctx.pair_regions)?;
    call_verifier::apply_results(&mut outcomes, &results);
    write_report(&session, &outcomes)?;
    session.print_final_summary(&results)
}

fn load_program(session: &RaceSession) -> Result<BoogieProgram> {
    let json = std::fs::read_to_string(&session.input)
        .with_context(|| format!("Failed to read `{}`", session.input.display()))?;
    let program = BoogieProgram::from_json(&json)
        .with_context(|| format!("Failed to parse the program in `{}`", session.input.display()))?;
    debug!(procedures = program.procedures.len(), implementations = program.implementations.len(), "loaded program");
    Ok(program)
}

fn write_report(session: &RaceSession, outcomes: &[PairOutcome]) -> Result<()> {
    let path = session.pairs_report_path();
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create `{}`", dir.display()))?;
    }
    let file = File::create(&path).with_context(|| format!("Failed to create `{}`", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_pairs(&mut writer, &session.driver_name(), outcomes)
        .and_then(|_| writer.flush())
        .with_context(|| format!("Failed to write `{}`", path.display()))?;
    session.info_operation("Wrote", &format!("{} pairs to {}", outcomes.len(), path.display()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_errors_are_recognized() {
        let model = DriverModel::from_info_str("<pci_driver>\nprobe::a\n</>\n<usb_driver>\nprobe::b\n</>\n").unwrap_err();
        let error = anyhow::Error::from(model).context("loading");
        assert!(is_input_error(&error));
        let json = BoogieProgram::from_json("{").unwrap_err();
        assert!(is_input_error(&anyhow::Error::from(json).context("parsing")));
        assert!(!is_input_error(&anyhow::anyhow!("verifier crashed")));
    }
}
