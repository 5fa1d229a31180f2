use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use harness::Job;
use rpma_server::verbs::VerbsProvider;
use rpma_server::{Placement, RpmaServerConfig, ENGINE_NAME};

fn parse_placement(s: &str) -> Result<Placement, String> {
    match s {
        "volatile" => Ok(Placement::Volatile),
        "persistent" => Ok(Placement::Persistent),
        other => Err(format!("unknown placement: {}", other)),
    }
}

#[derive(Debug, Parser)]
#[command(name = "rpma-server", about = "Expose a buffer to one RDMA client until it disconnects")]
struct Opts {
    /// IP to listen for RDMA connections.
    #[arg(long)]
    listen_ip: String,
    /// Port to listen for RDMA connections.
    #[arg(long)]
    listen_port: String,
    #[arg(long, default_value_t = 1)]
    iodepth: u32,
    /// Size of the exposed buffer in bytes.
    #[arg(long, default_value_t = 1 << 20)]
    size: usize,
    #[arg(long, default_value = "volatile", value_parser = parse_placement)]
    placement: Placement,
    #[arg(long, default_value_t = 5000)]
    close_timeout_ms: u64,
    #[arg(long, default_value_t = 100)]
    poll_interval_ms: u64,
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    harness::logging::init_log(&opts.log_level, true);

    let config = RpmaServerConfig {
        listen_ip: opts.listen_ip,
        listen_port: opts.listen_port,
        placement: opts.placement,
        close_timeout_ms: opts.close_timeout_ms,
        ..Default::default()
    };
    let engine_options = toml::to_string(&config)?;

    rpma_server::init::<VerbsProvider>()?;
    let mut engine = harness::registry::global().create(ENGINE_NAME)?;

    let mut job = Job::new("rpma-server", opts.iodepth).with_engine_options(engine_options);
    job.alloc_buffer(opts.size)?;

    let ret = harness::driver::run(
        engine.as_mut(),
        &mut job,
        Duration::from_millis(opts.poll_interval_ms),
    );
    rpma_server::exit();

    let reaped = ret.context("librpma_server job failed")?;
    for err in job.errors() {
        tracing::warn!("reported during the run: {}", err);
    }
    tracing::info!(reaped, "client disconnected");
    Ok(())
}
