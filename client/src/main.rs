mod api;
mod console;
mod constants;
mod invite;
mod player;
mod protocol;
mod synchronizer;
mod sync;
mod utils;

use anyhow::{Context, Result};
use std::{ops::ControlFlow, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{mpsc, oneshot},
    time::Duration,
};

use api::ServerApi;
use console::{parse_command, ConsoleApp};
use constants::{LOCAL_WS_URL, PROGRESS_INTERVAL, VERSION};
use invite::{looks_like_invite, parse_invite_url};
use protocol::ServerEvent;
use sync::SyncClient;

#[derive(Debug, Default)]
struct Args {
    server: Option<String>,
    room: Option<String>,
    create: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cowatch_client=info".into()),
        )
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    tracing::info!("Cowatch client {}", VERSION);

    let sync = Arc::new(SyncClient::new());
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let endpoints = connection_endpoints(args.server.as_deref());
    let (server_url, mut disconnected) =
        run_connection_loop(Arc::clone(&sync), &endpoints, event_tx).await;

    let api = ServerApi::from_ws_url(&server_url)?;
    let (room_id, is_creator) = match args.room {
        Some(room) if !args.create => (room, false),
        _ => (
            api.create_room().await.context("Failed to create a room")?,
            true,
        ),
    };

    let mut app = ConsoleApp::new(Arc::clone(&sync), api, server_url);
    app.join(room_id, is_creator);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut progress = tokio::time::interval(PROGRESS_INTERVAL);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match parse_command(&line) {
                    Ok(command) => {
                        if let ControlFlow::Break(()) = app.handle_command(command).await {
                            break;
                        }
                    }
                    Err(message) => println!("{message}"),
                }
                app.tick();
            }
            Some(event) = event_rx.recv() => {
                app.handle_server_event(event);
            }
            _ = progress.tick() => {
                app.tick();
            }
            _ = &mut disconnected => {
                println!("Disconnected from the sync server; run again to start a new session");
                return Ok(());
            }
        }
    }

    // Let the sender task flush leave-room before the runtime shuts down.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut parsed = Args {
        server: std::env::var("COWATCH_SERVER_URL")
            .ok()
            .filter(|url| !url.is_empty()),
        ..Args::default()
    };
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--server" => parsed.server = Some(args.next().context("--server needs a URL")?),
            "--room" => parsed.room = Some(args.next().context("--room needs a room id")?),
            "--create" => parsed.create = true,
            "--invite-url" => {
                let url = args.next().context("--invite-url needs a URL")?;
                apply_invite(&mut parsed, &url)?;
            }
            other if looks_like_invite(other) => apply_invite(&mut parsed, other)?,
            other => anyhow::bail!(
                "Unknown argument {other:?}. Usage: cowatch-client [--server <ws url>] [--create | --room <id> | <invite url>]"
            ),
        }
    }
    Ok(parsed)
}

fn apply_invite(args: &mut Args, url: &str) -> Result<()> {
    let invite = parse_invite_url(url).with_context(|| format!("Invalid invite link {url}"))?;
    args.room = Some(invite.room_id);
    if invite.server.is_some() {
        args.server = invite.server;
    }
    Ok(())
}

/// Keeps trying every endpoint until one accepts the socket.
async fn run_connection_loop(
    sync_client: Arc<SyncClient>,
    endpoints: &[(String, String)],
    event_tx: mpsc::UnboundedSender<ServerEvent>,
) -> (String, oneshot::Receiver<()>) {
    let mut attempt: u32 = 0;

    loop {
        for (label, url) in endpoints {
            attempt += 1;
            println!("Connecting to {label} sync server (attempt {attempt})...");
            warm_up_backend(label, url).await;

            let tx = event_tx.clone();
            match sync_client
                .connect(url, move |event| {
                    let _ = tx.send(event);
                })
                .await
            {
                Ok(disconnected) => {
                    tracing::info!("Connected to {label} sync server at {url}");
                    sync_client.mark_connected(label);
                    return (url.clone(), disconnected);
                }
                Err(e) => {
                    tracing::warn!("Failed to connect to {label} sync server at {url}: {:#}", e);
                }
            }

            let capped_attempt = attempt.min(6);
            tokio::time::sleep(Duration::from_secs(5 * capped_attempt as u64)).await;
        }
    }
}

fn connection_endpoints(configured: Option<&str>) -> Vec<(String, String)> {
    let disable_local = std::env::var("COWATCH_DISABLE_LOCAL").is_ok();
    let prefer_local = std::env::var("COWATCH_PREFER_LOCAL").is_ok();
    order_endpoints(configured, prefer_local, disable_local)
}

fn order_endpoints(
    configured: Option<&str>,
    prefer_local: bool,
    disable_local: bool,
) -> Vec<(String, String)> {
    let local = ("local development".to_string(), LOCAL_WS_URL.to_string());
    let Some(configured) = configured.filter(|url| *url != LOCAL_WS_URL) else {
        return vec![local];
    };
    let remote = ("configured".to_string(), configured.to_string());

    let mut endpoints = Vec::with_capacity(2);
    if prefer_local && !disable_local {
        endpoints.push(local.clone());
    }
    endpoints.push(remote);
    if !prefer_local && !disable_local {
        endpoints.push(local);
    }
    endpoints
}

async fn warm_up_backend(label: &str, ws_url: &str) {
    let Ok(api) = ServerApi::from_ws_url(ws_url) else {
        return;
    };
    match api.health().await {
        Ok(status) => tracing::info!(
            "Warmup request to {label} backend at {} returned {}",
            api.base(),
            status
        ),
        Err(e) => tracing::warn!(
            "Warmup request to {label} backend at {} failed: {:#}",
            api.base(),
            e
        ),
    }
}
