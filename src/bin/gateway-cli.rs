use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the job gateway", long_about = None)]
struct Cli {
    /// Admin API base URL
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "GATEWAY_ADMIN_KEY", default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// List open job sessions and their pending jobs
    Connections,
    /// Submit a job over the websocket route and print the frames that come back
    Submit {
        /// Job submission as a JSON object
        job: String,

        #[arg(long, default_value = "ws://localhost:8080/downloader/url")]
        ws_url: String,

        /// Stop after this many frames
        #[arg(long, default_value_t = 1)]
        frames: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status => admin_get(&cli.url, &cli.key, "/admin/status").await?,
        Commands::Connections => admin_get(&cli.url, &cli.key, "/admin/connections").await?,
        Commands::Submit {
            job,
            ws_url,
            frames,
        } => submit(&ws_url, &job, frames).await?,
    }

    Ok(())
}

async fn admin_get(base: &str, key: &str, path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", key))?,
    );

    let res = reqwest::Client::new()
        .get(format!("{}{}", base.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn submit(ws_url: &str, job: &str, frames: usize) -> Result<(), Box<dyn std::error::Error>> {
    let submission: Value = serde_json::from_str(job)?;
    if !submission.is_object() {
        return Err("job must be a JSON object".into());
    }

    let (mut socket, _) = tokio_tungstenite::connect_async(ws_url).await?;
    socket
        .send(Message::Text(submission.to_string().into()))
        .await?;

    let mut received = 0;
    while received < frames {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                received += 1;
                match serde_json::from_str::<Value>(text.as_str()) {
                    Ok(frame) => println!("{}", serde_json::to_string_pretty(&frame)?),
                    Err(_) => println!("{}", text.as_str()),
                }
            }
            Some(Ok(Message::Close(frame))) => {
                eprintln!("Connection closed by gateway: {:?}", frame);
                return Ok(());
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => break,
        }
    }

    let _ = socket.close(None).await;
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
