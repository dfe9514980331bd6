use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "lb-cli")]
#[command(about = "Management CLI for the load balancer admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: String,

    #[arg(short, long, env = "LB_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show proxy status
    Status,
    /// List registered backends
    Backends,
    /// Register a backend
    Add { address: String },
    /// Deregister a backend
    Remove { address: String },
    /// Show the current load samples
    Loads,
    /// Report a load sample for a backend
    ReportLoad { address: String, load: f64 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let client = reqwest::Client::builder().default_headers(headers).build()?;
    let base = cli.url.trim_end_matches('/');

    let res = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)).send().await?,
        Commands::Backends => client.get(format!("{}/admin/backends", base)).send().await?,
        Commands::Add { address } => {
            client
                .post(format!("{}/admin/backends", base))
                .json(&json!({ "address": address }))
                .send()
                .await?
        }
        Commands::Remove { address } => {
            client
                .delete(format!("{}/admin/backends/{}", base, address))
                .send()
                .await?
        }
        Commands::Loads => client.get(format!("{}/admin/loads", base)).send().await?,
        Commands::ReportLoad { address, load } => {
            client
                .post(format!("{}/admin/loads", base))
                .json(&json!({ "address": address, "load": load }))
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await.unwrap_or_default();

    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) if text.is_empty() => println!("OK ({})", status),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
