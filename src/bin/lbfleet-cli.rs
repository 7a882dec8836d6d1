use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "lbfleet-cli")]
#[command(about = "Operator CLI for the lbfleet coordinator", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    /// Shared auth key, sent as the `authkey` query parameter
    #[arg(short, long)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit an upstream change
    Enqueue {
        /// Idempotency key; a random UUID when omitted
        #[arg(long)]
        request_id: Option<String>,
        #[arg(long)]
        service_id: String,
        /// Load balancer group, repeatable
        #[arg(long = "group")]
        groups: Vec<String>,
        /// Upstream to add, repeatable
        #[arg(long = "add")]
        add: Vec<String>,
        /// Upstream to remove, repeatable
        #[arg(long = "remove")]
        remove: Vec<String>,
    },
    /// List queued and in-flight requests
    List,
    /// Show the response for a request id
    Get { request_id: String },
    /// Cancel a request that has not been dispatched yet
    Cancel { request_id: String },
    /// Coordinator status and registered agents
    Status,
    /// Global state, or one service's state
    State { service_id: Option<String> },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let request = match &cli.command {
        Commands::Enqueue {
            request_id,
            service_id,
            groups,
            add,
            remove,
        } => {
            let request_id = request_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
            client.post(format!("{}/request", base)).json(&json!({
                "requestId": request_id,
                "loadBalancerService": {
                    "serviceId": service_id,
                    "loadBalancerGroups": groups,
                },
                "addUpstreams": add,
                "removeUpstreams": remove,
            }))
        }
        Commands::List => client.get(format!("{}/request", base)),
        Commands::Get { request_id } => client.get(format!("{}/request/{}", base, request_id)),
        Commands::Cancel { request_id } => client.delete(format!("{}/request/{}", base, request_id)),
        Commands::Status => client.get(format!("{}/status", base)),
        Commands::State { service_id: None } => client.get(format!("{}/state", base)),
        Commands::State {
            service_id: Some(service_id),
        } => client.get(format!("{}/state/{}", base, service_id)),
    };
    let request = match &cli.key {
        Some(key) => request.query(&[("authkey", key)]),
        None => request,
    };

    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() {
        eprintln!("Error: coordinator returned status {}", status);
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) if !text.is_empty() => println!("{}", text),
        Err(_) => {}
    }
    if !status.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
