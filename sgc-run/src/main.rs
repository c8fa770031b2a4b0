//! sgc - run collector workloads from the command line.
//!
//! Parses the launcher's own flags with clap, hands the JVM-style options
//! to [`sgc_run::Launcher`] and turns its result into the process exit code.

use std::process::ExitCode;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sgc_run::{Cli, LaunchOptions, Launcher};

fn main() -> ExitCode {
    let cli = match Cli::parse_env() {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    if let Err(e) = init_logging(&cli.log, cli.no_color) {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(sgc_run::EXIT_USAGE as u8);
    }

    let options = LaunchOptions {
        vm_options: cli.vm_options,
        workload: cli.workload,
        args: cli.args,
        stats_json: cli.stats_json,
        use_env: true,
    };

    let stdout = std::io::stdout();
    let stderr = std::io::stderr();
    let code = Launcher::new(options).run(&mut stdout.lock(), &mut stderr.lock());
    ExitCode::from(code as u8)
}

/// Initialize the logging system.
///
/// Diagnostics go to stderr so workload output on stdout stays clean.
/// The collector logs through the `log` facade, which the subscriber
/// picks up via its `tracing-log` bridge.
///
/// # Arguments
/// * `filter` - An `EnvFilter` directive such as `warn` or `sgc=debug`
/// * `no_color` - Whether to disable colored output
fn init_logging(filter: &str, no_color: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(filter).with_context(|| format!("invalid log filter '{}'", filter))?;

    let subscriber = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .with_target(true)
        .with_thread_names(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(subscriber)
        .try_init()
        .context("failed to initialize logging")?;

    Ok(())
}
