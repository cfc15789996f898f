use clap::Parser;

use nimbus::common::cli::{RootOptions, SubCommand};
use nimbus::common::setup::setup_logging;
use nimbus::run::{command_check_config, command_check_job, command_run};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let opts = RootOptions::parse();
    setup_logging(opts.common.debug);

    let output_mode = opts.common.output_mode;
    let result = match opts.subcmd {
        SubCommand::Run(opts) => command_run(opts, output_mode).await,
        SubCommand::CheckConfig(opts) => command_check_config(opts),
        SubCommand::CheckJob(opts) => command_check_job(opts),
    };

    if let Err(error) = result {
        log::error!("{error:?}");
        std::process::exit(1);
    }
}
