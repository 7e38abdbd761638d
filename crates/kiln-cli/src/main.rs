use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod build;
mod cli;
mod report;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    init_logging(&args);
    build::run(&args)
}

/// Log to stderr so `--json` output stays clean; `RUST_LOG` wins over `-v`/`-q`
fn init_logging(args: &[String]) {
    let level = if cli::peek_flag(args, &["-q", "--quiet"]) {
        "warn"
    } else if cli::peek_flag(args, &["-v", "--verbose"]) {
        "debug"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
