// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Module that defines the command line interface of the race driver.

pub mod common;

use self::common::CommonArgs;
use clap::{error::Error, error::ErrorKind};
use std::path::PathBuf;

/// Trait used to perform extra validation after parsing.
pub trait ValidateArgs {
    /// Perform post-parsing validation but do not abort.
    fn validate(&self) -> Result<(), Error>;
}

/// Validate a set of arguments and ensure they are in a valid state.
/// This method will abort execution with a user friendly error message if the state is invalid.
pub fn check_is_valid<T>(command: &T)
where
    T: clap::Parser + ValidateArgs,
{
    if let Err(e) = command.validate() {
        e.format(&mut T::command()).exit()
    }
}

#[derive(Debug, clap::Parser)]
#[command(
    version,
    name = "race-driver",
    about = "Check the entry points of a device driver for data races",
    args_override_self = true
)]
pub struct RaceDriverArgs {
    /// Instrumented driver program, serialized as JSON by the front end
    #[arg(required = true)]
    pub input: PathBuf,

    #[command(flatten)]
    pub analysis: AnalysisArgs,

    #[command(flatten)]
    pub common_args: CommonArgs,
}

/// Arguments that control which artifacts are produced and how they are checked.
#[derive(Debug, Default, clap::Args)]
pub struct AnalysisArgs {
    /// Driver metadata file. Defaults to the input with an `info` extension
    #[arg(long, value_name = "FILE")]
    pub driver_info: Option<PathBuf>,

    /// Name of the driver in the pairs report. Defaults to the input file stem
    #[arg(long, value_name = "NAME")]
    pub driver_name: Option<String>,

    /// Directory for checking units and the pairs report. Defaults to the input's directory
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Only compute the entry point pairs and write the pairs report
    #[arg(long)]
    pub pairs_only: bool,

    /// Keep accesses that happen before the device is registered
    #[arg(long)]
    pub no_slicing: bool,

    /// Run the verifier on every checking unit
    #[arg(long)]
    pub verify: bool,

    /// Verifier executable. Defaults to `boogie` on the PATH
    #[arg(long, value_name = "PATH")]
    pub verifier: Option<PathBuf>,

    /// Extra argument for the verifier. May be given more than once
    #[arg(long = "verifier-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub verifier_args: Vec<String>,

    /// Number of verifier instances to run in parallel
    #[arg(long, short = 'j', value_name = "N")]
    pub jobs: Option<usize>,

    /// Time limit for each checking unit, in seconds
    #[arg(long, value_name = "SECS")]
    pub verifier_timeout: Option<u64>,

    /// Keep intermediate files
    #[arg(long)]
    pub keep_temps: bool,
}

impl ValidateArgs for AnalysisArgs {
    fn validate(&self) -> Result<(), Error> {
        if self.pairs_only && self.verify {
            return Err(Error::raw(
                ErrorKind::ArgumentConflict,
                "`--pairs-only` does not produce checking units and cannot be combined with `--verify`.",
            ));
        }
        if self.jobs == Some(0) {
            return Err(Error::raw(ErrorKind::InvalidValue, "`--jobs` must be at least 1."));
        }
        let verifier_options = [
            ("--verifier", self.verifier.is_some()),
            ("--verifier-arg", !self.verifier_args.is_empty()),
            ("--jobs", self.jobs.is_some()),
            ("--verifier-timeout", self.verifier_timeout.is_some()),
        ];
        if !self.verify {
            if let Some((option, _)) = verifier_options.iter().find(|(_, given)| *given) {
                return Err(Error::raw(
                    ErrorKind::MissingRequiredArgument,
                    format!("`{option}` has no effect unless `--verify` is also given."),
                ));
            }
        }
        Ok(())
    }
}

impl ValidateArgs for RaceDriverArgs {
    fn validate(&self) -> Result<(), Error> {
        self.common_args.validate()?;
        self.analysis.validate()
    }
}
