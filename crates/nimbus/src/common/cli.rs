use std::path::PathBuf;

use clap::Parser;

#[derive(clap::ValueEnum, Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputMode {
    /// Human readable text.
    Cli,
    /// A single JSON document.
    Json,
}

// Common CLI options
#[derive(Parser)]
pub struct CommonOpts {
    /// Sets output formatting
    #[arg(
        long,
        env = "NIMBUS_OUTPUT_MODE",
        default_value_t = OutputMode::Cli,
        value_enum,
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub output_mode: OutputMode,

    /// Enables more detailed log output
    #[arg(
        long,
        env = "NIMBUS_DEBUG",
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub debug: bool,
}

// Root CLI options
#[derive(Parser)]
#[command(
    author,
    about,
    version,
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Provision resources and run jobs on them until every job is finished
    Run(RunOpts),
    /// Validate a configuration file
    CheckConfig(CheckConfigOpts),
    /// Validate job files
    CheckJob(CheckJobOpts),
}

#[derive(Parser)]
pub struct RunOpts {
    /// Path to the configuration file
    #[arg(long, env = "NIMBUS_CONFIG", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Path to a job file, can be used multiple times
    #[arg(long = "job", required = true, value_hint = clap::ValueHint::FilePath)]
    pub jobs: Vec<PathBuf>,

    /// Wait until one resource of every initial specification is available before
    /// jobs are submitted
    #[arg(long)]
    pub wait_initial: bool,
}

#[derive(Parser)]
pub struct CheckConfigOpts {
    /// Path to the configuration file
    #[arg(long, env = "NIMBUS_CONFIG", value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,
}

#[derive(Parser)]
pub struct CheckJobOpts {
    /// Path to a job file, can be used multiple times
    #[arg(long = "job", required = true, value_hint = clap::ValueHint::FilePath)]
    pub jobs: Vec<PathBuf>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{OutputMode, RootOptions, SubCommand};

    #[test]
    fn parse_run_command() {
        let opts = RootOptions::try_parse_from([
            "nimbus",
            "--debug",
            "run",
            "--config",
            "nimbus.toml",
            "--job",
            "a.toml",
            "--job",
            "b.toml",
            "--wait-initial",
        ])
        .unwrap();
        assert!(opts.common.debug);
        assert_eq!(opts.common.output_mode, OutputMode::Cli);
        match opts.subcmd {
            SubCommand::Run(run) => {
                assert_eq!(run.config.to_str(), Some("nimbus.toml"));
                assert_eq!(run.jobs.len(), 2);
                assert!(run.wait_initial);
            }
            _ => panic!("Expected the run command"),
        }
    }

    #[test]
    fn run_requires_a_job() {
        assert!(RootOptions::try_parse_from(["nimbus", "run", "--config", "nimbus.toml"]).is_err());
    }

    #[test]
    fn global_options_after_subcommand() {
        let opts = RootOptions::try_parse_from([
            "nimbus",
            "check-job",
            "--job",
            "a.toml",
            "--output-mode",
            "json",
        ])
        .unwrap();
        assert_eq!(opts.common.output_mode, OutputMode::Json);
        assert!(matches!(opts.subcmd, SubCommand::CheckJob(_)));
    }
}
