//! Command-line parsing
//!
//! ```text
//! records-gateway [--config PATH] [--print-metrics] fetch ENDPOINT [KEY=VALUE ...]
//! records-gateway [--config PATH] [--print-metrics] count ENDPOINT [KEY=VALUE ...] [--max-return N]
//! records-gateway [--config PATH] health
//! ```

use clap::{Args, Parser, Subcommand};
use upstream::Params;

/// Resilient gateway to a rate-limited records API.
#[derive(Parser, Debug)]
#[command(name = "records-gateway")]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Path to the TOML configuration file (falls back to CONFIG_PATH).
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Print Prometheus metrics after the result.
    #[arg(long, global = true)]
    pub print_metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch one page and print it.
    Fetch(Target),

    /// Count every matching record.
    Count {
        #[command(flatten)]
        target: Target,

        /// Representative records to include in the result.
        #[arg(long, default_value_t = 0)]
        max_return: usize,
    },

    /// Print credential, admission, cache and queue health.
    Health,
}

/// Endpoint and query parameters shared by `fetch` and `count`.
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Endpoint path, e.g. /v1/cases
    pub endpoint: String,

    /// Query parameters as KEY=VALUE.
    #[arg(value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

impl Target {
    pub fn params(&self) -> Params {
        let mut params = Params::new();
        for (key, value) in &self.params {
            params.insert(key, value);
        }
        params
    }
}

/// Split `KEY=VALUE` at the first `=`; the value may itself contain `=`.
fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    if key.trim().is_empty() {
        return Err(format!("missing parameter name in {raw:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}
