//! # fili — command line client for the Fili data service
//!
//! - `fili serve` — launch the data service.
//! - `fili query <request.json>` — submit a resolved data request.
//! - `fili tables`, `fili cache stats|clear`, `fili health` — operations.
//! - `fili verify` — run the Kani proofs.
//!
//! The service address is read from `FILI_BASE_URL`.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

use fili_core::{DataApiRequest, ResponseFormat};

#[derive(Parser)]
#[command(name = "fili", version, about = "Fili Druid data service client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the data service.
    Serve {
        /// Path to the service config file.
        #[arg(long, default_value = "fili.toml")]
        config: PathBuf,

        /// Server bind address.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Submit a resolved data request read from a file ("-" for stdin).
    Query {
        file: PathBuf,

        /// Route through the UI broker.
        #[arg(long)]
        ui: bool,

        /// Ask for druid queries and responses in the metadata.
        #[arg(long)]
        debug: bool,

        /// Skip cached responses.
        #[arg(long)]
        no_cache: bool,

        #[arg(long, value_enum, default_value_t = Output::Table)]
        format: Output,
    },

    /// List physical tables and their availability.
    Tables,

    /// Inspect or clear the response cache.
    Cache {
        #[command(subcommand)]
        action: CacheCmd,
    },

    /// Report service health and workflow topology.
    Health,

    /// Run Kani formal verification proofs.
    Verify,
}

#[derive(Subcommand)]
enum CacheCmd {
    Stats,
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    Table,
    Json,
    Csv,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, bind } => {
            eprintln!("fili: launching data service");
            eprintln!("   Config: {}", config.display());
            let config = config.display().to_string();
            let mut args = vec!["run", "-p", "fili-server", "--", "--config", &config];
            if let Some(bind) = &bind {
                eprintln!("   Bind:   {}", bind);
                args.push("--bind");
                args.push(bind);
            }
            match Command::new("cargo").args(&args).status() {
                Ok(s) if s.success() => {}
                Ok(s) => {
                    eprintln!("Service exited with: {}", s);
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("Failed to launch service: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Verify => {
            eprintln!("fili: running formal verification");
            eprintln!("   Tool:   Kani Model Checker");
            eprintln!("   Target: fili-verify (interval list invariants)");
            eprintln!();
            match Command::new("cargo")
                .args(["kani", "--package", "fili-verify"])
                .status()
            {
                Ok(status) if status.success() => {
                    eprintln!("   fili-verify: all proofs passed");
                }
                Ok(_) => {
                    eprintln!("   fili-verify: proof failure");
                    std::process::exit(1);
                }
                Err(e) => {
                    eprintln!("   Kani not found: {}", e);
                    eprintln!("   Install with: cargo install kani-verifier && cargo kani setup");
                    std::process::exit(1);
                }
            }
        }
        cmd => {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("Failed to build tokio runtime: {}", e);
                    std::process::exit(1);
                }
            };
            if let Err(e) = rt.block_on(async_main(cmd)) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

async fn async_main(cmd: Commands) -> CliResult {
    let client = reqwest::Client::new();
    let base_url =
        std::env::var("FILI_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:9998".to_string());

    match cmd {
        Commands::Query {
            file,
            ui,
            debug,
            no_cache,
            format,
        } => {
            let mut request = read_request(&file)?;
            if format == Output::Csv {
                request.format = ResponseFormat::Csv;
            }
            let request_id = uuid::Uuid::new_v4().to_string();
            let mut call = client
                .post(format!("{}/v1/data", base_url))
                .header("x-request-id", &request_id)
                .json(&request);
            if ui {
                call = call.header("clientid", "UI");
            }
            if debug {
                call = call.header("x-fili-debug", "true");
            }
            if no_cache {
                call = call.header("cache-control", "no-cache");
            }
            let resp = call.send().await?;
            let status = resp.status();
            let total = resp
                .headers()
                .get("x-total-count")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = resp.text().await?;

            if !status.is_success() {
                eprintln!("Request {} failed with {}", request_id, status);
                print_json_or_raw(&body);
                std::process::exit(1);
            }
            match format {
                Output::Csv => print!("{}", body),
                Output::Json => print_json_or_raw(&body),
                Output::Table => {
                    let json: Value = serde_json::from_str(&body)?;
                    match rows_table(&json) {
                        Some(table) => println!("{}", table),
                        None => println!("(no rows)"),
                    }
                    if let Some(meta) = json.get("meta") {
                        eprintln!("meta: {}", serde_json::to_string_pretty(meta)?);
                    }
                    if let Some(total) = total {
                        eprintln!("total rows: {}", total);
                    }
                }
            }
        }

        Commands::Tables => {
            let json: Value = client
                .get(format!("{}/v1/tables", base_url))
                .send()
                .await?
                .json()
                .await?;
            println!("{}", tables_table(&json));
        }

        Commands::Cache { action } => {
            let url = format!("{}/v1/cache", base_url);
            let resp = match action {
                CacheCmd::Stats => client.get(&url).send().await?,
                CacheCmd::Clear => client.delete(&url).send().await?,
            };
            print_json_or_raw(&resp.text().await?);
        }

        Commands::Health => {
            let resp = client.get(format!("{}/healthcheck", base_url)).send().await?;
            let healthy = resp.status().is_success();
            print_json_or_raw(&resp.text().await?);
            if !healthy {
                std::process::exit(1);
            }
        }

        Commands::Serve { .. } | Commands::Verify => {}
    }
    Ok(())
}

fn read_request(file: &Path) -> Result<DataApiRequest, Box<dyn std::error::Error>> {
    let mut text = String::new();
    if file.as_os_str() == "-" {
        std::io::stdin().read_to_string(&mut text)?;
    } else {
        text = std::fs::read_to_string(file)?;
    }
    Ok(serde_json::from_str(&text)?)
}

fn print_json_or_raw(body: &str) {
    match serde_json::from_str::<Value>(body).and_then(|v| serde_json::to_string_pretty(&v)) {
        Ok(pretty) => println!("{}", pretty),
        Err(_) => println!("{}", body),
    }
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Renders the `rows` of a JSON data response, `dateTime` first.
fn rows_table(response: &Value) -> Option<String> {
    let rows = response.get("rows")?.as_array()?;
    let first = rows.first()?.as_object()?;
    let mut columns: Vec<&String> = first.keys().filter(|k| *k != "dateTime").collect();
    columns.sort();

    let mut builder = Builder::default();
    builder.push_record(
        std::iter::once("dateTime".to_string()).chain(columns.iter().map(|c| c.to_string())),
    );
    for row in rows {
        builder.push_record(
            std::iter::once(cell(&row["dateTime"]))
                .chain(columns.iter().map(|c| cell(&row[c.as_str()]))),
        );
    }
    Some(builder.build().with(Style::rounded()).to_string())
}

fn tables_table(tables: &Value) -> String {
    let mut builder = Builder::default();
    builder.push_record(["table", "segments", "availability"]);
    for table in tables.as_array().into_iter().flatten() {
        let availability = table["availability"]
            .as_array()
            .map(|list| list.iter().map(cell).collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        builder.push_record([
            cell(&table["name"]),
            cell(&table["segmentCount"]),
            availability,
        ]);
    }
    builder.build().with(Style::rounded()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rows_table_puts_date_time_first() {
        let table = rows_table(&json!({
            "rows": [
                {"page": "Foo", "dateTime": "2015-09-12 00:00:00.000", "added": 7},
                {"page": "Bar", "dateTime": "2015-09-12 00:00:00.000", "added": null}
            ]
        }))
        .unwrap();
        let header = table.lines().nth(1).unwrap();
        let date = header.find("dateTime").unwrap();
        let added = header.find("added").unwrap();
        let page = header.find("page").unwrap();
        assert!(date < added && added < page);
        assert!(table.contains("Foo"));
    }

    #[test]
    fn test_empty_rows_have_no_table() {
        assert!(rows_table(&json!({"rows": []})).is_none());
        assert!(rows_table(&json!({"error": "x"})).is_none());
    }

    #[test]
    fn test_tables_table() {
        let table = tables_table(&json!([{
            "name": "wiki",
            "segmentCount": 19,
            "availability": ["2015-09-01T00:00:00.000Z/2015-09-20T00:00:00.000Z"]
        }]));
        assert!(table.contains("wiki"));
        assert!(table.contains("19"));
    }
}
