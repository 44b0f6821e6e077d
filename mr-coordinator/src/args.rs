use clap::Parser;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// The port for the server to run on.
    #[arg(short, long, default_value = "8030")]
    pub port: u16,

    /// Number of reduce partitions.
    #[arg(short = 'r', long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..))]
    pub n_reduce: u32,

    /// Seconds a task may run before it is handed to another worker.
    #[arg(short, long, default_value = "10")]
    pub timeout_secs: u64,

    /// Fail the job once a task timed out this many times.
    /// Unlimited when not given.
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: Option<u32>,

    /// Keep serving this long after the job ended, so waiting workers
    /// learn about it.
    #[arg(short, long, default_value = "3")]
    pub linger_secs: u64,

    /// Input sources, one map task each. With none, the job only writes
    /// empty outputs.
    pub inputs: Vec<String>,
}
