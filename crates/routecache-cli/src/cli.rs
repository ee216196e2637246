use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "routecache")]
#[command(about = "Inspect and invalidate routecache entries")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the cache configuration file (defaults to ./routecache.toml)
    #[arg(short, long, global = true, env = "ROUTECACHE_CONFIG")]
    pub config: Option<String>,

    /// Print debug logs
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the cache key and route tag for a request
    Key(KeyArgs),
    /// Read a cached value
    Get(GetArgs),
    /// Delete a cached value, optionally cascading through its route
    Delete(DeleteArgs),
    /// Publish a route reset to every instance
    PublishReset(PublishResetArgs),
    /// Show the effective configuration
    Config,
}

#[derive(clap::Args)]
pub struct KeyArgs {
    /// Service name (first key segment)
    #[arg(short, long)]
    pub service: String,
    /// HTTP method
    #[arg(short, long, default_value = "GET")]
    pub method: String,
    /// Route template (e.g. api/orders/{id})
    pub route: String,
    /// Route or body argument as name=json (e.g. id=7, filter={"a":1})
    #[arg(short, long = "arg", value_name = "NAME=JSON")]
    pub args: Vec<String>,
    /// Query string parameter as name=value; repeat for multiple values
    #[arg(short, long, value_name = "NAME=VALUE")]
    pub query: Vec<String>,
}

#[derive(clap::Args)]
pub struct GetArgs {
    /// Full cache key
    pub key: String,
}

#[derive(clap::Args)]
pub struct DeleteArgs {
    /// Full cache key
    pub key: String,
    /// Also publish this route tag so dependents are reset
    #[arg(short, long)]
    pub route: Option<String>,
}

#[derive(clap::Args)]
pub struct PublishResetArgs {
    /// Route tag (e.g. orders$get$api/orders/{id})
    pub route: String,
}
