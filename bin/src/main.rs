use anyhow::Result;
use clap::Parser;
use tokio::runtime::Builder;
use tracing::{debug, error};

mod cli;
mod ndt7_cmd;
mod ping_cmd;

use cli::{Cli, Command, Ndt7Command};

#[cfg(not(target_env = "musl"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "musl"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let trace = netkit_core::config::Trace::init(&cli.log_level)?;
    debug!(?cli, ?trace, "parsed cli");
    if let Err(err) = dotenv::dotenv() {
        debug!(?err, ".env file not loaded");
    }

    let rt = Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(async move {
        match tokio::spawn(run(cli)).await {
            Err(err) => {
                error!(?err, "task panicked");
                Err(anyhow::anyhow!(err))
            }
            Ok(Err(err)) => {
                error!(?err, "exited with error");
                Err(err)
            }
            Ok(Ok(())) => {
                debug!("exiting...");
                Ok(())
            }
        }
    })
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ping(args) => ping_cmd::run(args).await,
        Command::Ndt7(args) => match args.command {
            Ndt7Command::Run(args) => ndt7_cmd::run(args).await,
            Ndt7Command::Monitor(args) => ndt7_cmd::monitor(args).await,
            Ndt7Command::Server(args) => ndt7_cmd::serve(args).await,
        },
    }
}
