mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use output::print_error;
use routecache::CacheSettings;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // `key` is pure and works without a configuration file.
    let settings = match &cli.command {
        Commands::Key(_) => None,
        _ => Some(load_settings(&cli)?),
    };
    routecache::observability::init_tracing_with_level(log_level(settings.as_ref(), cli.verbose));

    match (&cli.command, &settings) {
        (Commands::Key(args), _) => {
            commands::key::show(args)?;
        }
        (Commands::Get(args), Some(settings)) => {
            commands::store::get(settings, &args.key).await?;
        }
        (Commands::Delete(args), Some(settings)) => {
            commands::store::delete(settings, &args.key, args.route.as_deref()).await?;
        }
        (Commands::PublishReset(args), Some(settings)) => {
            commands::store::publish_reset(settings, &args.route).await?;
        }
        (Commands::Config, Some(settings)) => {
            commands::store::show_config(settings)?;
        }
        (_, None) => anyhow::bail!("No configuration loaded"),
    }

    Ok(())
}

fn load_settings(cli: &Cli) -> Result<CacheSettings> {
    Ok(routecache::config::loader::load_settings(cli.config.as_deref())?)
}

/// `--verbose` forces debug; otherwise the configured level, or warnings
/// only when no configuration was loaded.
fn log_level(settings: Option<&CacheSettings>, verbose: bool) -> &str {
    if verbose {
        return "debug";
    }
    settings.map_or("warn", |s| s.logging.level.as_str())
}
