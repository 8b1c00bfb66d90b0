// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Define arguments that control the output of the driver.
use crate::args::ValidateArgs;
use clap::{error::Error, error::ErrorKind};

/// Arguments that control verbosity and logging.
#[derive(Debug, Default, clap::Args)]
pub struct CommonArgs {
    /// Produce full debug information
    #[arg(long)]
    pub debug: bool,
    /// Produces no output, just an exit code and requested artifacts; overrides --verbose
    #[arg(long, short)]
    pub quiet: bool,
    /// Output processing stages and commands, along with minor debug information
    #[arg(long, short, default_value_if("debug", "true", Some("true")))]
    pub verbose: bool,
    /// Logging directive, e.g. `race_driver=trace`. Takes precedence over `RACE_DRIVER_LOG`
    #[arg(long, value_name = "DIRECTIVE")]
    pub log_level: Option<String>,
    /// Emit logs as JSON objects
    #[arg(long)]
    pub json_logs: bool,
}

impl CommonArgs {
    /// The level the driver crates log at when no directive is given.
    pub fn default_log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.verbose {
            "info"
        } else {
            "warn"
        }
    }
}

impl ValidateArgs for CommonArgs {
    fn validate(&self) -> Result<(), Error> {
        if self.log_level.as_deref().is_some_and(|level| level.trim().is_empty()) {
            return Err(Error::raw(ErrorKind::InvalidValue, "`--log-level` expects a non-empty directive."));
        }
        Ok(())
    }
}
