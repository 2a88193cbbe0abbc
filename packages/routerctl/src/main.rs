//! Operator CLI for a running chat router.
//!
//! Talks to the HTTP control surface; every command prints the resulting
//! flow status (or the created message for `send`).

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "routerctl")]
#[command(about = "Control a running chat router")]
struct Cli {
    /// Base URL of the router
    #[arg(long, env = "ROUTER_URL", default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the flow-control status
    Status,

    /// Stop answering; new messages are held until resume
    Pause,

    /// Resume and re-drive held messages
    Resume,

    /// Set the delay before each reply
    Delay { ms: u64 },

    /// Turn auto-pause on or off
    AutoPause {
        state: Toggle,
        #[arg(long)]
        threshold: Option<u32>,
    },

    /// Post a message to a chat as the human member
    Send { chat_id: String, text: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new(&cli.url);

    match cli.command {
        Commands::Status => {
            let status = client.get("/api/program/status").await?;
            print_status(&status);
        }
        Commands::Pause => {
            let status = client.post("/api/program/pause", json!({})).await?;
            print_status(&status);
        }
        Commands::Resume => {
            let body = client.post("/api/program/resume", json!({})).await?;
            let resumed = body["resumed"].as_u64().unwrap_or(0);
            println!("{} {} held message(s)", "Resumed".bright_green().bold(), resumed);
            print_status(&body["status"]);
        }
        Commands::Delay { ms } => {
            let status = client
                .post("/api/program/delay", json!({ "delayMs": ms }))
                .await?;
            print_status(&status);
        }
        Commands::AutoPause { state, threshold } => {
            let enabled = matches!(state, Toggle::On);
            let status = client
                .post(
                    "/api/program/auto-pause",
                    json!({ "enabled": enabled, "threshold": threshold }),
                )
                .await?;
            print_status(&status);
        }
        Commands::Send { chat_id, text } => {
            let message = client
                .post(
                    &format!("/api/chats/{}/messages", chat_id),
                    json!({ "text": text }),
                )
                .await?;
            println!(
                "{} {}",
                "Sent".bright_green().bold(),
                message["id"].as_str().unwrap_or("?").dimmed()
            );
        }
    }

    Ok(())
}

struct Client {
    base_url: String,
    http: reqwest::Client,
}

impl Client {
    fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;
        read_json(response).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;
        read_json(response).await
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .context("Failed to parse router response")?;
    if !status.is_success() {
        let error = body["error"].as_str().unwrap_or("unknown error");
        bail!("{} {}", status, error);
    }
    Ok(body)
}

fn print_status(status: &Value) {
    let paused = status["isPaused"].as_bool().unwrap_or(false);
    let auto = status["isAutoPause"].as_bool().unwrap_or(false);
    let state = match (paused, auto) {
        (true, true) => "paused (auto)".bright_yellow().bold(),
        (true, false) => "paused".bright_yellow().bold(),
        (false, _) => "running".bright_green().bold(),
    };

    println!("{:<14} {}", "state:".dimmed(), state);
    println!(
        "{:<14} {}",
        "auto-pause:".dimmed(),
        if status["autoPauseEnabled"].as_bool().unwrap_or(false) {
            format!(
                "on (threshold {}, count {})",
                status["autoPauseThreshold"], status["messageCount"]
            )
        } else {
            "off".to_string()
        }
    );
    println!("{:<14} {} ms", "delay:".dimmed(), status["delayMs"]);
    println!("{:<14} {}", "pending:".dimmed(), status["pending"]);
}
