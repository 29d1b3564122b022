use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "obs-cli")]
#[command(about = "Inspect a running obs-pipeline service", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Header used to send a correlation id.
    #[arg(long, default_value = "x-correlation-id")]
    header: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every health check
    Health,
    /// Evaluate readiness checks only
    Ready,
    /// Evaluate liveness (all checks)
    Live,
    /// Dump the Prometheus export
    Metrics,
    /// GET an API path and show the correlation id the service used
    Call {
        path: String,
        #[arg(long)]
        correlation_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::builder().no_proxy().build()?;
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Health => {
            let res = client.get(format!("{base}/health")).send().await?;
            print_json(res).await?;
        }
        Commands::Ready => {
            let res = client.get(format!("{base}/health/ready")).send().await?;
            print_json(res).await?;
        }
        Commands::Live => {
            let res = client.get(format!("{base}/health/live")).send().await?;
            print_json(res).await?;
        }
        Commands::Metrics => {
            let res = client.get(format!("{base}/metrics")).send().await?;
            let status = res.status();
            let text = res.text().await?;
            if !status.is_success() {
                eprintln!("Error: metrics endpoint returned status {status}");
            }
            println!("{text}");
        }
        Commands::Call {
            path,
            correlation_id,
        } => {
            let mut headers = HeaderMap::new();
            if let Some(id) = correlation_id {
                headers.insert(
                    reqwest::header::HeaderName::from_bytes(cli.header.as_bytes())?,
                    HeaderValue::from_str(&id)?,
                );
            }
            let path = path.trim_start_matches('/');
            let res = client
                .get(format!("{base}/{path}"))
                .headers(headers)
                .send()
                .await?;

            let echoed = res
                .headers()
                .get(cli.header.as_str())
                .and_then(|v| v.to_str().ok())
                .unwrap_or("<missing>")
                .to_string();
            println!("status: {}", res.status());
            println!("{}: {echoed}", cli.header);
            print_json(res).await?;
        }
    }

    Ok(())
}

async fn print_json(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: service returned status {status}");
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{text}"),
    }
    Ok(())
}
