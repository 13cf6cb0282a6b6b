//! Rainwave CLI - 实时 API 命令行入口

use anyhow::{anyhow, Result};
use clap::Parser;
use rainwave_sdk::{
    ConnectionState, Event, EventKind, RainwaveClient, SdkConfig, Station, TlsConfig,
};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Rainwave realtime client
#[derive(Parser, Debug)]
#[command(name = "rainwave")]
#[command(version, about = "Connects to the Rainwave realtime API and logs pushed events")]
struct Args {
    /// Rainwave user id
    #[arg(long)]
    user_id: u64,

    /// API key for the user
    #[arg(long)]
    api_key: String,

    /// Station id (1 game, 2 ocremix, 3 covers, 4 chiptune, 5 all)
    #[arg(long, default_value = "1")]
    sid: u8,

    /// Websocket base URL (defaults to RAINWAVE_URL or the production endpoint)
    #[arg(short, long)]
    url: Option<String>,

    /// Failed attempts before a retry notification, 0 for unlimited
    #[arg(long)]
    max_retries: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// CA certificate path for TLS
    #[arg(long)]
    ca_cert: Option<PathBuf>,

    /// Skip TLS certificate verification (DEVELOPMENT ONLY)
    #[arg(long, default_value = "false")]
    insecure: bool,

    /// Look up one album once connected and print its name
    #[arg(long)]
    album: Option<u64>,
}

fn build_config(args: &Args) -> Result<SdkConfig> {
    let sid = Station::try_from(args.sid).map_err(|e| anyhow!(e))?;
    let mut config = SdkConfig::new(args.user_id, args.api_key.clone(), sid)
        .with_debug(|line| tracing::debug!(target: "rainwave::sdk", "{}", line))
        .with_socket_error(|e| warn!("Socket error: {}", e));

    if let Some(url) = &args.url {
        config.url = url.clone();
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    config.tls = TlsConfig {
        ca_cert_path: args.ca_cert.clone(),
        danger_accept_invalid_certs: args.insecure,
    };
    Ok(config)
}

fn log_events(client: &RainwaveClient) {
    client.on(EventKind::SchedCurrent, |event| {
        if let Event::SchedCurrent(schedule) = event {
            let titles: Vec<_> = schedule.songs.iter().map(|s| s.title.as_str()).collect();
            info!("Now playing (event {}): {}", schedule.id, titles.join(" / "));
        }
    });
    client.on(EventKind::SchedNext, |event| {
        if let Event::SchedNext(next) = event {
            info!("{} upcoming events", next.len());
        }
    });
    client.on(EventKind::AlreadyVoted, |event| {
        info!("Already voted: {:?}", event);
    });
    client.on(EventKind::VoteResult, |event| {
        if let Event::VoteResult(result) = event {
            info!("Vote result: {} {}", result.success, result.text);
        }
    });
    client.on(EventKind::Error, |event| {
        if let Event::Error(payload) = event {
            error!("Server error {}: {} {}", payload.code, payload.tl_key, payload.text);
        }
    });
    client.on(EventKind::SdkException, |event| {
        if let Event::SdkException(exception) = event {
            warn!("SDK exception: {}", exception.message);
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = build_config(&args)?;
    info!("Starting Rainwave client...");
    info!("Endpoint: {}", config.endpoint());

    let client = RainwaveClient::new(config)?;
    log_events(&client);

    // 状态变化写日志
    let mut states = client.state_changes();
    let state_logger = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow();
            info!("Connection state: {}", state);
            if state == ConnectionState::PermanentlyClosed {
                break;
            }
        }
    });

    client.start();

    if let Some(id) = args.album {
        let client = client.clone();
        tokio::spawn(async move {
            match client.album(id, None).await {
                Ok(album) => println!("{}", album.name),
                Err(e) => error!("Album lookup failed: {}", e),
            }
        });
    }

    // 等待 Ctrl+C
    info!("Client running. Press Ctrl+C to stop.");
    signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");

    client.stop();
    let _ = tokio::time::timeout(tokio::time::Duration::from_secs(1), state_logger).await;

    info!("Client stopped");
    Ok(())
}
