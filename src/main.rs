use anyhow::Result;
use clap::Parser;

use slabsearch::cli::SubCommandExtend;
use slabsearch::config::{Opts, SubCommand};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let opts = Opts::parse();
    match &opts.subcmd {
        SubCommand::Add(cmd) => cmd.run(&opts).await,
        SubCommand::Build(cmd) => cmd.run(&opts).await,
        SubCommand::Search(cmd) => cmd.run(&opts).await,
        SubCommand::Server(cmd) => cmd.run(&opts).await,
        SubCommand::Tag(cmd) => cmd.run(&opts).await,
        SubCommand::Watermark(cmd) => cmd.run(&opts).await,
        SubCommand::Status(cmd) => cmd.run(&opts).await,
    }
}
