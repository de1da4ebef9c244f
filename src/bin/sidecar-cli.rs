use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "sidecar-cli")]
#[command(about = "Management CLI for the queue sidecar", long_about = None)]
struct Cli {
    #[arg(short, long, env = "SIDECAR_ADMIN_URL", default_value = "http://localhost:8022")]
    url: String,

    #[arg(short, long, env = "SIDECAR_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show readiness and breaker occupancy
    Status,
    /// Show the latest aggregated concurrency statistics
    Stats,
    /// Change the breaker's capacity
    SetConcurrency {
        /// New capacity, clamped to the configured maximum
        concurrency: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let res = match cli.command {
        Commands::Status => {
            client
                .get(format!("{}/admin/status", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Stats => {
            client
                .get(format!("{}/admin/stats", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::SetConcurrency { concurrency } => {
            client
                .put(format!("{}/admin/concurrency", cli.url))
                .headers(headers)
                .json(&json!({ "concurrency": concurrency }))
                .send()
                .await?
        }
    };
    print_response(res).await?;

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
