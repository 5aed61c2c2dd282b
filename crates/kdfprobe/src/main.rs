use anyhow::Context;
use clap::Parser;
use kdfprobe::cli::{Cli, Command};
use kdfprobe::config::RunConfig;
use kdfprobe::error::exit_code;
use kdfprobe::fanout::FanOut;
use kdfprobe::invocation::Invocation;
use kdfprobe::kdf::KdfParams;
use kdfprobe::server::TriggerServer;
use kdfprobe::storage::{TraceFile, TraceMeta, TraceWriter};
use kdfprobe_trace::Tracer;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

// Stamp heap live bytes onto every region
kdfprobe_trace::counting_allocator!();

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS as u8),
        Err(e) => {
            eprintln!("Error: {e:#}");
            if let Some(probe_err) = e.downcast_ref::<kdfprobe::Error>() {
                ExitCode::from(probe_err.exit_code() as u8)
            } else {
                ExitCode::from(exit_code::GENERAL_ERROR as u8)
            }
        }
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    cli.validate()
        .map_err(kdfprobe::Error::InvalidArgument)
        .context("Invalid arguments")?;

    init_logging(cli.verbose);

    match cli.command {
        Some(Command::Regions {
            ref file,
            by_origin,
            json,
            csv,
        }) => {
            kdfprobe::commands::regions::run(file, by_origin, json, csv)?;
        }
        Some(Command::List { ref dir }) => {
            kdfprobe::commands::list::run(dir.as_deref())?;
        }
        Some(Command::Completions { shell }) => {
            use clap::CommandFactory;
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "kdfprobe", &mut std::io::stdout());
        }
        None => {
            run_server(&cli)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_server(cli: &Cli) -> anyhow::Result<()> {
    let config = RunConfig::from_cli(cli)?;

    // Everything that can fail runs before the trace opens, so a failed start
    // never leaves a trace without its end stamp
    let server = TriggerServer::bind(&cli.addr)?;
    let listen = server
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| cli.addr.clone());

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl-C handler")?;

    // Open the trace before anything can emit a region
    let writer = if cli.no_trace {
        tracing::info!("tracing disabled");
        None
    } else {
        let output_path = cli.output.clone().unwrap_or_else(|| {
            let timestamp = chrono::Local::now().format("%y%m%d%H%M%S");
            PathBuf::from(format!("kdfprobe.{}.db", timestamp))
        });
        let meta = TraceMeta {
            config,
            params: KdfParams::WORKLOAD,
            addr: listen.clone(),
        };
        let file = TraceFile::create(&output_path, &meta)
            .with_context(|| format!("Failed to create trace {}", output_path.display()))?;
        tracing::info!("trace output: {}", output_path.display());
        Some(TraceWriter::spawn(file, cli.interval).context("Failed to start trace writer")?)
    };

    let tracer = match &writer {
        Some(writer) => Tracer::new(writer.sink()),
        None => Tracer::disabled(),
    };

    let fanout = FanOut::new(config, Invocation::new(&config, tracer));
    fanout.on_startup();

    tracing::info!(
        force = config.force_collect,
        count = config.count.get(),
        "listening on: http://{listen}/"
    );

    let deadline = cli.duration.map(|d| Instant::now() + d);
    let requests = server.serve(&fanout, &running, deadline)?;

    if running.load(Ordering::SeqCst) {
        tracing::info!("duration elapsed, shutting down");
    } else {
        tracing::info!("ctrl+c received, shutting down");
    }
    tracing::info!(requests, launched = fanout.launched(), "server stopped");

    // In-flight invocations are abandoned; their late regions are dropped
    if let Some(writer) = writer {
        let written = writer.finish()?;
        tracing::info!(regions = written, "trace closed");
    }

    Ok(())
}
