use std::{process::ExitCode, sync::Arc};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use relay_core::config::{Config, ConfigCheck};

#[derive(Parser)]
#[command(name = "relay", version, about = "Relay channel posts with converted prices", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Listen to the source channel and relay posts (default)
    Run,
    /// Print the configuration as the relay would read it
    CheckConfig,
    /// Send one test message to the target channel
    TestTarget,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let res = match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => return check_config(),
        Commands::Run => run().await,
        Commands::TestTarget => test_target().await,
    };

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Logging may not be up yet (e.g. bad config).
            eprintln!("fatal error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    relay_core::logging::init("relay")?;
    let cfg = Arc::new(Config::load()?);
    info!(
        source = %cfg.source_channel,
        target = %cfg.target_channel,
        "starting channel relay"
    );

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("stopping relay...");
        }
        on_signal.cancel();
    });

    relay_telegram::router::run_polling(cfg, shutdown).await
}

async fn test_target() -> anyhow::Result<()> {
    relay_core::logging::init("relay")?;
    let cfg = Config::load()?;
    info!(target = %cfg.target_channel, "sending test message");

    match relay_telegram::router::send_test_message(&cfg).await {
        Ok(key) => {
            info!(message_id = key.message_id.0, "test message sent");
            Ok(())
        }
        Err(e) => {
            let category = e
                .downcast_ref::<relay_core::Error>()
                .map_or("External", |e| e.category());
            Err(e.context(format!("test message failed ({category})")))
        }
    }
}

fn check_config() -> ExitCode {
    let check = ConfigCheck::from_env();
    let rule = "=".repeat(50);

    println!("{rule}\nChecking configuration...\n{rule}");
    for (key, value) in &check.entries {
        match value {
            Some(v) => println!("{key}: {v}"),
            None => println!("{key}: missing"),
        }
    }
    for w in &check.warnings {
        println!("warning: {w}");
    }
    println!("{rule}");

    if check.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Option<Commands> {
        Cli::try_parse_from(args).unwrap().command
    }

    #[test]
    fn subcommands_parse_with_run_as_default() {
        assert_eq!(parse(&["relay"]), None);
        assert_eq!(parse(&["relay", "run"]), Some(Commands::Run));
        assert_eq!(parse(&["relay", "check-config"]), Some(Commands::CheckConfig));
        assert_eq!(parse(&["relay", "test-target"]), Some(Commands::TestTarget));
    }

    #[test]
    fn unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["relay", "serve"]).is_err());
    }
}
