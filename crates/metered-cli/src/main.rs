//! Command-line interface for metered market data access

use anyhow::Context;
use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table as ComfyTable, presets::UTF8_FULL};
use metered_api::{KeyUsage, MeteredConfig, Payload, PayloadFormat, ProviderRegistry, Table};
use metered_utils::LogFormat;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "metered")]
#[command(about = "Quota-aware access to market data providers", long_about = None)]
struct Args {
    /// JSON configuration file; provider presets from the environment are used otherwise
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a URL through the cache and key rotation
    Fetch {
        /// Provider whose keys and quota to use
        #[arg(short, long)]
        provider: String,

        /// Decode the response as CSV
        #[arg(long)]
        tabular: bool,

        /// Request URL without the key parameter
        url: String,
    },

    /// Show today's usage per key
    Usage {
        /// Limit output to one provider
        #[arg(short, long)]
        provider: Option<String>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<MeteredConfig> {
    match path {
        Some(path) => MeteredConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => MeteredConfig::from_env().context("reading provider keys from the environment"),
    }
}

fn render_table(table: &Table) -> String {
    let mut out = ComfyTable::new();
    out.load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(&table.columns);
    for row in &table.rows {
        out.add_row(row);
    }
    out.to_string()
}

fn render_usage(provider: &str, usage: &[KeyUsage]) -> String {
    let mut out = ComfyTable::new();
    out.load_preset(UTF8_FULL)
        .set_header(vec!["provider", "#", "key", "used today", "limit", "remaining"]);
    for key in usage {
        out.add_row(vec![
            provider.to_string(),
            key.position.to_string(),
            key.key.clone(),
            key.used_today.to_string(),
            key.daily_limit.to_string(),
            key.remaining().to_string(),
        ]);
    }
    out.to_string()
}

async fn run(command: Command, registry: &ProviderRegistry) -> anyhow::Result<()> {
    match command {
        Command::Fetch {
            provider,
            tabular,
            url,
        } => {
            let client = registry.require(&provider)?;
            let payload = client
                .fetch(&url, PayloadFormat::from_tabular(tabular))
                .await?;
            match payload {
                Payload::Json(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Payload::Table(table) => println!("{}", render_table(&table)),
            }
        }
        Command::Usage { provider } => {
            let names: Vec<String> = match provider {
                Some(name) => vec![name],
                None => registry.names().into_iter().map(String::from).collect(),
            };
            for name in names {
                let client = registry.require(&name)?;
                println!("{}", render_usage(&name, &client.usage_summary()?));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    metered_utils::init_tracing_with(if args.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    });

    let config = load_config(args.config.as_ref())?;
    info!(
        providers = config.providers.len(),
        database = %config.database_path.display(),
        "Starting metered"
    );

    let registry = ProviderRegistry::open(&config)?;
    let result = run(args.command, &registry).await;
    let closed = registry.close();

    result?;
    closed?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fetch() {
        let args = Args::try_parse_from([
            "metered",
            "fetch",
            "--provider",
            "alpha_vantage",
            "--tabular",
            "https://www.alphavantage.co/query?function=EARNINGS_CALENDAR",
        ])
        .unwrap();

        match args.command {
            Command::Fetch {
                provider, tabular, ..
            } => {
                assert_eq!(provider, "alpha_vantage");
                assert!(tabular);
            }
            Command::Usage { .. } => panic!("Expected fetch"),
        }
    }

    #[test]
    fn test_parse_usage_with_global_flags() {
        let args =
            Args::try_parse_from(["metered", "usage", "--config", "metered.json", "--json-logs"])
                .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("metered.json")));
        assert!(args.json_logs);
        assert!(matches!(args.command, Command::Usage { provider: None }));
    }

    #[test]
    fn test_render_table() {
        let table = Table {
            columns: vec!["symbol".into(), "reportDate".into()],
            rows: vec![vec!["IBM".into(), "2025-10-22".into()]],
        };
        let rendered = render_table(&table);
        assert!(rendered.contains("reportDate"));
        assert!(rendered.contains("IBM"));
    }

    #[test]
    fn test_render_usage() {
        let usage = vec![KeyUsage {
            key: "abcd****".into(),
            position: 0,
            used_today: 20,
            daily_limit: 25,
        }];
        let rendered = render_usage("alpha_vantage", &usage);
        assert!(rendered.contains("abcd****"));
        assert!(rendered.contains("alpha_vantage"));
        assert!(rendered.contains('5'));
    }
}
