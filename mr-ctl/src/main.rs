mod args;
use args::{Args, Commands};

mod core;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Status => core::status(&args.address).await?,
    }

    Ok(())
}
