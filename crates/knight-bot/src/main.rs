//! # knight-bot
//!
//! Offline runner for the bot runtime.
//!
//! - restores the store snapshot (snapshot mode)
//! - replays newline-delimited JSON events from stdin into the store and the
//!   session handlers
//! - supervises the session and greets the owner when it opens
//! - runs housekeeping until stdin closes or Ctrl+C, then persists the store
//!   and writes a report

use std::sync::Arc;

use knight_bot::config::BotConfig;
use knight_bot::enhancer::Enhancer;
use knight_bot::error::BotError;
use knight_bot::feed;
use knight_bot::guard::message_text;
use knight_bot::housekeeping;
use knight_bot::report::{generate_report, EnhancerStats};
use knight_bot::send::LoggingSender;
use knight_bot::supervisor::{Decision, Supervisor};
use knight_shared::constants::{APP_NAME, VERSION};
use knight_shared::{
    EventEmitter, Jid, MessageKey, MessageSender, SendContent, SendOptions, SendReceipt,
};
use knight_store::InMemoryStore;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,knight_bot=debug,knight_store=info")),
        )
        .init();

    info!("Starting {} v{}", APP_NAME, VERSION);

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = BotConfig::from_env();
    info!(?config, "Loaded configuration");

    for dir in [&config.session_dir, &config.temp_dir, &config.logs_dir] {
        tokio::fs::create_dir_all(dir).await?;
    }

    // -----------------------------------------------------------------------
    // 3. Store and event wiring
    // -----------------------------------------------------------------------
    let store = InMemoryStore::with_mode(config.store_mode);
    store.read_from_file(&config.store_path);

    let stats = EnhancerStats::default();
    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let (decision_tx, mut decision_rx) = mpsc::unbounded_channel();

    let enhancer = Arc::new(Enhancer::new(
        config.clone(),
        store.clone(),
        stats.clone(),
        report_tx,
    ));
    let mut emitter = EventEmitter::new();
    let Some(inbound) = enhancer.init(&mut emitter) else {
        anyhow::bail!("enhancer was already initialized");
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    let supervisor = tokio::spawn(
        Supervisor::from_config(&config, stats.clone()).run(report_rx, decision_tx),
    );

    let mut background = housekeeping::spawn(enhancer.clone());

    let inbound_enhancer = enhancer.clone();
    background.push(tokio::spawn(async move {
        let summary = inbound_enhancer
            .process_inbound(inbound, |message| {
                let chat = MessageKey::from_record(&message)
                    .map(|key| key.remote_jid.to_string())
                    .unwrap_or_default();
                info!(
                    chat = %chat,
                    text = message_text(&message).unwrap_or(""),
                    "Inbound message"
                );
            })
            .await;
        info!(?summary, "Inbound queue closed");
    }));

    // Session decisions: greet the owner on open, stop on shutdown.
    let sender = enhancer.compose_sender(LoggingSender);
    let owner = config.owner_jid();
    let bot_name = config.bot_name.clone();
    let decisions = async move {
        while let Some(decision) = decision_rx.recv().await {
            match decision {
                Decision::Connected => {
                    if let Err(e) = greet(&sender, &owner, &bot_name).await {
                        warn!(error = %e, "Failed to greet owner");
                    }
                }
                Decision::Reconnect(delay) => {
                    info!(
                        delay_ms = delay.as_millis() as u64,
                        "Waiting for the transport to reconnect"
                    );
                }
                Decision::Shutdown(reason) => return reason,
                Decision::Continue => {}
            }
        }
        "supervisor stopped".to_string()
    };

    // -----------------------------------------------------------------------
    // 5. Replay the event feed (blocks until EOF, shutdown or Ctrl+C)
    // -----------------------------------------------------------------------
    let stdin = feed::spawn_stdin_reader()?;
    tokio::select! {
        result = feed::replay_lines(stdin, &mut emitter) => match result {
            Ok(replayed) => info!(?replayed, "Event feed finished"),
            Err(e) => error!(error = %e, "Event feed failed"),
        },
        reason = decisions => {
            warn!(%reason, "Session shut down");
            enhancer.emergency_cleanup().await;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    // -----------------------------------------------------------------------
    // 6. Persist and stop
    // -----------------------------------------------------------------------
    // Stop the periodic snapshot writer before the final write.
    supervisor.abort();
    for task in &background {
        task.abort();
    }
    futures::future::join_all(background).await;
    drop(emitter);

    let final_store = store.clone();
    let store_path = config.store_path.clone();
    tokio::task::spawn_blocking(move || final_store.write_to_file(&store_path)).await?;
    generate_report(&config.logs_dir, &enhancer.report());

    info!(sizes = ?store.sizes(), "Shutdown complete");
    Ok(())
}

async fn greet<S: MessageSender>(
    sender: &S,
    owner: &Jid,
    bot_name: &str,
) -> Result<SendReceipt, BotError> {
    let content = SendContent::text(format!("{bot_name} is online (v{VERSION})"));
    let receipt = sender.send(owner, &content, &SendOptions::default()).await?;
    Ok(receipt)
}
