//! Long-running service loop
//!
//! Runs the refresh timer and the badge timer, and answers newline-delimited
//! JSON commands on stdin with one JSON reply per line on stdout. Each
//! command runs in its own task so a slow sign-in never blocks the timers.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::{parse_request, Reply, Service};
use crate::badge::BADGE_PERIOD;

pub async fn serve(service: Arc<Service>, mut refresh_rx: mpsc::UnboundedReceiver<()>) -> Result<()> {
    let state = service.auth().start()?;
    tracing::info!("Service started, {}", state);
    service
        .auth()
        .tokens()
        .resume_schedule()
        .context("Failed to resume refresh schedule")?;

    // First tick fires immediately, which gives the initial badge update.
    let mut badge_timer = tokio::time::interval(BADGE_PERIOD);
    badge_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Reply>();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            Some(()) = refresh_rx.recv() => {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    if let Err(e) = service.auth().refresh().await {
                        tracing::warn!("Scheduled token refresh failed: {}", e);
                    }
                });
            }
            _ = badge_timer.tick() => {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    service.poll_badge().await;
                });
            }
            line = lines.next_line(), if stdin_open => {
                match line.context("Failed to read command")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        let service = Arc::clone(&service);
                        let reply_tx = reply_tx.clone();
                        tokio::spawn(async move {
                            let reply = match parse_request(&line) {
                                Ok((id, command)) => service.handle(command).await.with_id(id),
                                Err(reply) => reply,
                            };
                            let _ = reply_tx.send(reply);
                        });
                    }
                    None => {
                        tracing::info!("Command input closed, timers keep running (Ctrl-C to stop)");
                        stdin_open = false;
                    }
                }
            }
            Some(reply) = reply_rx.recv() => {
                let mut out = serde_json::to_string(&reply).context("Failed to encode reply")?;
                out.push('\n');
                stdout.write_all(out.as_bytes()).await.context("Failed to write reply")?;
                stdout.flush().await.context("Failed to flush reply")?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
