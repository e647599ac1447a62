//! iosurge CLI entry point

use anyhow::Context;
use iosurge::config::cli::Cli;
use iosurge::coordinator::Coordinator;
use iosurge::device::Capabilities;
use iosurge::service;
use iosurge::worker::remote::send_interrupt_request;
use iosurge::Result;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse_args();

    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            1
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    if cli.service {
        run_service_mode(cli.port)?;
        return Ok(0);
    }

    if cli.quit || cli.interrupt {
        return run_remote_control(cli);
    }

    run_benchmarks(cli)
}

/// Run as a service process for a remote master.
fn run_service_mode(port: u16) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to create async runtime")?;

    runtime.block_on(service::run_service(port, Capabilities::none()))
}

/// Send interrupt (or interrupt-and-quit) requests to the given hosts.
/// These commands need no benchmark config, only the host list.
fn run_remote_control(cli: Cli) -> Result<i32> {
    let Some(host_list) = &cli.hosts else {
        anyhow::bail!("--interrupt and --quit require --hosts");
    };

    let hosts: Vec<String> = host_list
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(|h| {
            if h.contains(':') {
                h.to_string()
            } else {
                format!("{h}:{}", cli.port)
            }
        })
        .collect();

    if hosts.is_empty() {
        anyhow::bail!("--interrupt and --quit require --hosts");
    }

    let mut exit_code = 0;

    for host in &hosts {
        if let Err(err) = send_interrupt_request(host, cli.quit) {
            eprintln!("ERROR: {err:#}");
            exit_code = 1;
        }
    }

    Ok(exit_code)
}

/// Run benchmarks, either locally or as master of remote services.
fn run_benchmarks(cli: Cli) -> Result<i32> {
    let mut config = cli.into_config()?;

    if config.phase_sequence().is_empty() {
        anyhow::bail!(
            "no benchmark phases selected \
             (see --mkdirs, --write, --read, --statfiles, --delfiles, --deldirs)"
        );
    }

    // masters never touch the benchmark paths themselves; the services
    // open their own
    if !config.is_master() {
        config.open_bench_paths()?;
    }

    println!("iosurge v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let mut coordinator = Coordinator::new(config, Capabilities::none());

    coordinator.run()
}
