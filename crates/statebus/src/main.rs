mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, LogFormat};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The daemon is chatty by default, client commands are not.
    let baseline = u8::from(matches!(cli.command, Command::Serve));
    init_tracing(cli.global.verbose.saturating_add(baseline), cli.global.log_format);

    if let Err(err) = run(&cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, format: LogFormat) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.with_target(false).init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: &Cli) -> Result<(), CliError> {
    let global = &cli.global;
    match &cli.command {
        Command::Serve => commands::serve::handle(global).await,
        Command::Subject(args) => commands::subject::handle(args),
        Command::Get(args) => commands::rpc::get(args, global).await,
        Command::Set(args) => commands::rpc::set(args, global).await,
        Command::Delete(args) => commands::rpc::delete(args, global).await,
        Command::Watch(args) => commands::rpc::watch(args, global).await,
        Command::Config(args) => commands::config_cmd::handle(&args.command, global),
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "statebus", &mut std::io::stdout());
            Ok(())
        }
    }
}
