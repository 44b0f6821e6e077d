use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// The address of the coordinator server
    #[arg(short = 'j', long = "join", default_value = "http://[::1]:8030")]
    pub address: String,

    /// Name of the workload to run.
    #[arg(short, long, default_value = "wc")]
    pub workload: String,

    /// Directory shared by all workers for intermediate and output files.
    #[arg(long, default_value = ".")]
    pub work_dir: PathBuf,

    /// Identifier sent with every request. Random when not given.
    #[arg(long)]
    pub worker_id: Option<String>,

    /// How long to sleep when the coordinator has nothing to hand out.
    #[arg(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// How many times a failed call to the coordinator is retried.
    #[arg(long, default_value_t = 3)]
    pub rpc_retries: u32,

    /// Auxiliary arguments to pass to the MapReduce application.
    #[clap(value_parser, last = true)]
    pub args: Vec<String>,
}
