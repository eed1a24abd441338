use std::path::PathBuf;
use std::time::Duration;

use structopt::StructOpt;

use mapred::{socket_path, Coordinator};

#[derive(StructOpt, Debug)]
#[structopt(name = env!("CARGO_PKG_NAME"), version = env!("CARGO_PKG_VERSION"), about = env!("CARGO_PKG_DESCRIPTION"), author = env!("CARGO_PKG_AUTHORS"))]
struct Opt {
    /// Files to process; one map task per file
    #[structopt(name = "FILE", parse(from_os_str))]
    files: Vec<PathBuf>,

    /// Number of reduce partitions
    #[structopt(long, default_value = "10")]
    nreduce: usize,

    /// Seconds before an in-flight task is handed to another worker
    #[structopt(short, long, default_value = "10")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();

    let opt = Opt::from_args();
    let c = Coordinator {
        files: opt.files,
        n_reduce: opt.nreduce,
        sock: socket_path(),
        task_timeout: Duration::from_secs(opt.timeout),
    };
    c.launch().await?;
    Ok(())
}
