mod api;
mod application;
mod browser;
mod channel;
mod config;
mod domain;
mod icon;
mod utils;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use application::{Agent, AgentHandle, LocalRequest};
use browser::{BrowserServices, ContextMenuClick, NativeDownload};
use channel::WebSocketConnector;
use config::{JsonFileSettings, SettingsStore};

/// Browser-originated events the host accepts next to local requests.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BrowserEvent {
    DownloadCreated(NativeDownload),
    ContextMenuClicked(ContextMenuClick),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HostLine {
    Request(LocalRequest),
    Browser(BrowserEvent),
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    // stdout carries the protocol, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let store = JsonFileSettings::from_env();
    info!(path = %store.path().display(), "loading settings");
    let settings = store.load().unwrap_or_else(|e| {
        error!("{}", e);
        Default::default()
    });

    let browser = BrowserServices::headless(settings.user_agent(), settings.cookies.clone());
    let (handle, agent_task) = Agent::spawn(
        Arc::new(store),
        browser,
        Arc::new(WebSocketConnector),
    );

    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_lines(out_rx));
    tokio::spawn(forward_events(handle.subscribe(), out_tx.clone()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<HostLine>(line) {
            Ok(input) => {
                if let Some(response) = dispatch(&handle, input).await {
                    let _ = out_tx.send(response);
                }
            }
            Err(e) => warn!("ignoring unreadable input line: {}", e),
        }
    }

    info!("stdin closed, shutting down");
    agent_task.abort();
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

/// Runs one input line. Only local requests produce a reply line.
async fn dispatch(handle: &AgentHandle, input: HostLine) -> Option<String> {
    let result = match input {
        HostLine::Request(request) => match handle.request(request).await {
            Ok(response) => return to_line(&response),
            Err(e) => Err(e),
        },
        HostLine::Browser(BrowserEvent::DownloadCreated(item)) => {
            handle.native_download_created(item)
        }
        HostLine::Browser(BrowserEvent::ContextMenuClicked(click)) => {
            handle.context_menu_clicked(click)
        }
    };
    if let Err(e) = result {
        error!("agent unavailable: {}", e);
    }
    None
}

async fn forward_events(
    mut events: broadcast::Receiver<application::HubEvent>,
    out: mpsc::UnboundedSender<String>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(line) = to_line(&event) {
                    if out.send(line).is_err() {
                        break;
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event output fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn write_lines(mut lines: mpsc::UnboundedReceiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(mut line) = lines.recv().await {
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            error!("failed to write output: {}", e);
            break;
        }
        let _ = stdout.flush().await;
    }
}

fn to_line<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_string(value)
        .map_err(|e| debug!("unserializable output: {}", e))
        .ok()
}
