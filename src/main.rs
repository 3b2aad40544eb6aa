use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, trace};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;
use witan_cli::args::{Args, AuthSubcommand, Command, XlsxSubcommand};
use witan_cli::{commands, Config, Result};

/// Conventional exit code for a process stopped by SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let log_level = args.common().log_level();
    init_logger(log_level);
    debug!("Log level set to {}", log_level.to_string().to_lowercase());

    tokio::select! {
        result = main_inner(args) => match result {
            Ok(code) => code,
            Err(e) => {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}

pub async fn main_inner(args: Args) -> Result<ExitCode> {
    trace!("{args:?}");
    let json = args.common().json();
    let config = Config::load(args.common()).await?;

    // Route to appropriate command handler
    match args.command() {
        Command::Auth(auth_args) => match auth_args.command() {
            AuthSubcommand::Logout => commands::logout(config).await?.finish(json),
        },

        Command::Xlsx(xlsx_args) => match xlsx_args.command() {
            XlsxSubcommand::Calc(args) => commands::calc(config, args.clone()).await?.finish(json),
            XlsxSubcommand::Lint(args) => commands::lint(config, args.clone()).await?.finish(json),
            XlsxSubcommand::Render(args) => {
                commands::render(config, args.clone()).await?.finish(json)
            }
            XlsxSubcommand::Exec(args) => commands::exec(config, args.clone()).await?.finish(json),
            XlsxSubcommand::Edit(args) => commands::edit(config, args.clone()).await?.finish(json),
        },

        Command::Read(args) => commands::read(config, args.clone()).await?.finish(json),
    }
}

/// Initializes the tracing subscriber.
pub fn init_logger(level: LevelFilter) {
    let filter = match std::env::var("RUST_LOG").ok() {
        Some(_) => {
            // RUST_LOG exists; use it.
            EnvFilter::from_default_env()
        }
        None => {
            // RUST_LOG does not exist; use default log level for this crate only.
            EnvFilter::new(format!(
                "witan_cli={},{}={}",
                level,
                env!("CARGO_BIN_NAME"),
                level
            ))
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
