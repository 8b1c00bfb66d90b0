// Copyright Kani Contributors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Module used to configure a driver session: logging, the location of the
//! inputs and outputs, and the external verifier.

use crate::args::common::CommonArgs;
use crate::args::{AnalysisArgs, RaceDriverArgs};
use crate::util::{self, render_command};
use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::debug;
use tracing_subscriber::{EnvFilter, Registry, filter::Directive, layer::SubscriberExt};

/// Environment variable used to control this session log tracing.
const LOG_ENV_VAR: &str = "RACE_DRIVER_LOG";

/// The crates of this workspace, which `--verbose` and `--debug` apply to.
const DRIVER_CRATES: &[&str] = &["race_driver", "driver_metadata", "boogie_ast"];

/// Verifier looked up on the PATH when `--verifier` is not given.
const DEFAULT_VERIFIER: &str = "boogie";

/// Contains information about the execution environment and arguments that affect operations
pub struct RaceSession {
    /// The instrumented program
    pub input: PathBuf,
    pub args: AnalysisArgs,
    pub common: CommonArgs,

    /// The verifier executable, resolved when `--verify` is given
    pub verifier: Option<PathBuf>,

    /// The temporary files we littered that need to be cleaned up at the end of execution
    pub temporaries: Mutex<Vec<PathBuf>>,
}

impl RaceSession {
    pub fn new(args: RaceDriverArgs) -> Result<Self> {
        init_logger(&args.common_args)?;
        let verifier = if args.analysis.verify { Some(find_verifier(&args.analysis)?) } else { None };
        debug!(input = %args.input.display(), ?verifier, "session");
        Ok(RaceSession {
            input: args.input,
            args: args.analysis,
            common: args.common_args,
            verifier,
            temporaries: Mutex::new(vec![]),
        })
    }

    pub fn driver_info_path(&self) -> PathBuf {
        self.args.driver_info.clone().unwrap_or_else(|| util::alter_extension(&self.input, "info"))
    }

    pub fn driver_name(&self) -> String {
        self.args.driver_name.clone().unwrap_or_else(|| util::driver_name(&self.input))
    }

    pub fn output_dir(&self) -> PathBuf {
        match &self.args.output_dir {
            Some(dir) => dir.clone(),
            None => self.input.parent().map(Path::to_path_buf).unwrap_or_default(),
        }
    }

    pub fn pairs_report_path(&self) -> PathBuf {
        self.output_dir().join(format!("{}.pairs.xml", self.driver_name()))
    }

    /// Register a file that should be removed when the session ends.
    pub fn record_temporary(&self, path: &Path) {
        if let Ok(mut temporaries) = self.temporaries.lock() {
            temporaries.push(path.to_path_buf());
        }
    }

    /// Print a stage line unless the user asked for silence.
    pub fn info_operation(&self, op: &str, msg: &str) {
        if !self.common.quiet {
            util::info_operation(op, msg);
        }
    }

    pub fn warning(&self, msg: &str) {
        if !self.common.quiet {
            util::warning(msg);
        }
    }

    /// Run a job and capture its output. A non-zero exit status is not an
    /// error: verifiers report failed proofs that way.
    pub fn run_captured(&self, mut cmd: Command) -> Result<Output> {
        if self.common.verbose {
            println!("{}", render_command(&cmd).to_string_lossy());
        }
        cmd.output().with_context(|| format!("Failed to invoke {}", cmd.get_program().to_string_lossy()))
    }
}

impl Drop for RaceSession {
    fn drop(&mut self) {
        if !self.args.keep_temps {
            let temporaries = match self.temporaries.get_mut() {
                Ok(temporaries) => temporaries,
                Err(poisoned) => poisoned.into_inner(),
            };

            for file in temporaries.iter() {
                // If it fails, we don't care, skip it
                let _result = std::fs::remove_file(file);
            }
        }
    }
}

fn find_verifier(args: &AnalysisArgs) -> Result<PathBuf> {
    match &args.verifier {
        Some(path) if path.components().count() > 1 => {
            if !path.exists() {
                bail!("Unable to find verifier at `{}`", path.display());
            }
            Ok(path.clone())
        }
        Some(name) => which::which(name).with_context(|| format!("Unable to find verifier `{}`", name.display())),
        None => which::which(DEFAULT_VERIFIER)
            .with_context(|| format!("Unable to find `{DEFAULT_VERIFIER}` on the PATH. Use `--verifier` to point at it")),
    }
}

/// Build the log filter: the `RACE_DRIVER_LOG` environment variable if set,
/// otherwise the level implied by the verbosity flags. `--log-level` is added
/// on top of either.
fn log_filter(args: &CommonArgs) -> Result<EnvFilter> {
    let filter = match EnvFilter::try_from_env(LOG_ENV_VAR) {
        Ok(filter) => filter,
        Err(_) => {
            let level = args.default_log_level();
            let directives: Vec<String> = std::iter::once("warn".to_string())
                .chain(DRIVER_CRATES.iter().map(|krate| format!("{krate}={level}")))
                .collect();
            EnvFilter::try_new(directives.join(","))?
        }
    };
    match &args.log_level {
        Some(level) => {
            let directive =
                Directive::from_str(level).with_context(|| format!("Invalid log level directive `{level}`"))?;
            Ok(filter.add_directive(directive))
        }
        None => Ok(filter),
    }
}

/// Initialize the logger using the RACE_DRIVER_LOG environment variable and the --log-level argument.
fn init_logger(args: &CommonArgs) -> Result<()> {
    let filter = log_filter(args)?;
    if args.json_logs {
        json_logs(filter)
    } else {
        text_logs(filter)
    }
}

/// Configure global logger to use a json logger.
fn json_logs(filter: EnvFilter) -> Result<()> {
    use tracing_subscriber::fmt::layer;
    let subscriber = Registry::default().with(filter).with(layer().json().with_writer(std::io::stderr));
    tracing::subscriber::set_global_default(subscriber).context("Failed to install the logger")
}

/// Configure global logger to use a human readable format.
fn text_logs(filter: EnvFilter) -> Result<()> {
    use tracing_subscriber::fmt::layer;
    let use_colors = console::colors_enabled_stderr();
    let subscriber =
        Registry::default().with(filter).with(layer().with_writer(std::io::stderr).with_ansi(use_colors).with_target(true));
    tracing::subscriber::set_global_default(subscriber).context("Failed to install the logger")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(input: &str, args: AnalysisArgs) -> RaceSession {
        RaceSession {
            input: PathBuf::from(input),
            args,
            common: CommonArgs::default(),
            verifier: None,
            temporaries: Mutex::new(vec![]),
        }
    }

    #[test]
    fn default_locations() {
        let sess = session("/work/e1000.json", AnalysisArgs::default());
        assert_eq!(sess.driver_info_path(), PathBuf::from("/work/e1000.info"));
        assert_eq!(sess.driver_name(), "e1000");
        assert_eq!(sess.output_dir(), PathBuf::from("/work"));
        assert_eq!(sess.pairs_report_path(), PathBuf::from("/work/e1000.pairs.xml"));
    }

    #[test]
    fn explicit_locations() {
        let args = AnalysisArgs {
            driver_info: Some(PathBuf::from("/meta/drv.info")),
            driver_name: Some("eth".into()),
            output_dir: Some(PathBuf::from("/out")),
            ..Default::default()
        };
        let sess = session("e1000.json", args);
        assert_eq!(sess.driver_info_path(), PathBuf::from("/meta/drv.info"));
        assert_eq!(sess.pairs_report_path(), PathBuf::from("/out/eth.pairs.xml"));
    }

    #[test]
    fn temporaries_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let temp = dir.path().join("unit.bpl");
        std::fs::write(&temp, "").unwrap();
        let sess = session("e1000.json", AnalysisArgs::default());
        sess.record_temporary(&temp);
        drop(sess);
        assert!(!temp.exists());

        std::fs::write(&temp, "").unwrap();
        let sess = session("e1000.json", AnalysisArgs { keep_temps: true, ..Default::default() });
        sess.record_temporary(&temp);
        drop(sess);
        assert!(temp.exists());
    }

    #[test]
    fn log_level_directive() {
        let args = CommonArgs { log_level: Some("race_driver=trace".into()), ..Default::default() };
        assert!(log_filter(&args).is_ok());
        let args = CommonArgs { log_level: Some("race_driver=loud".into()), ..Default::default() };
        assert!(log_filter(&args).is_err());
    }
}
