use std::path::PathBuf;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(rename_all = "kebab")]
struct Opts {
    /// Config file location
    #[structopt(short, long)]
    config: PathBuf,

    /// FD from which to read upgrade data
    #[structopt(long)]
    upgrade_state_fd: Option<i32>,

    /// Run in foreground without daemonising
    #[structopt(short, long)]
    foreground: bool,
}

pub fn main() -> Result<(), anyhow::Error> {
    let opts = Opts::from_args();

    bouncer_server::run::run_bouncer(opts.config, opts.foreground, opts.upgrade_state_fd)
}
