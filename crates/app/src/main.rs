mod cli;
mod html;
mod vision;

use clap::Parser;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let _telemetry = vision::telemetry::init(&cli.telemetry_options());
    cli::handle_command(cli)
}
