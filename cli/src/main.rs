mod mail;
mod serve;

use clap::{Arg, Command};
use mailroom::{config, Config};
use tokio_util::sync::CancellationToken;

pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &'static str = env!("CARGO_PKG_AUTHORS");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    // Config from the working directory is used when present, otherwise the
    // path can be provided through the `--config` argument.
    let mut config: Config = config::load().unwrap_or_default();

    let matches = cmd().get_matches();

    if let Some(config_path) = matches.get_one::<String>("config") {
        config = config::load_from(config_path)?;
    }
    let mut config = config.apply_env();
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.tracing.level = level.parse()?;
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Initiating graceful shutdown...");
            shutdown.cancel();
        }
    });

    match matches.subcommand() {
        Some(("serve", _)) => serve::run(config, cancel).await?,
        Some((name, m)) => mail::run(name, m, &config).await?,
        None => unreachable!("subcommand is required"),
    }

    Ok(())
}

pub fn cmd() -> Command {
    Command::new("mailroom")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .infer_subcommands(true)
        .version(VERSION)
        .author(AUTHORS)
        .about("Newsletter campaigns and bulk email with delivery tracking")
        .subcommand(serve::cmd())
        .subcommands(mail::cmds())
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("PATH")
                .global(true)
                .help("Path to the config file"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .short('v')
                .display_order(100)
                .value_name("level")
                .value_parser(["critical", "support", "normal", "debug", "trace", "off"])
                .global(true)
                .help("Set the verbosity of the log output"),
        )
}
