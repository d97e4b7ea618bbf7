//! Headless batch command: `veo-studio batch`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use console::style;
use tokio::sync::broadcast;
use tracing::{info, warn};

use veo_studio::config::StudioConfig;
use veo_studio::studio::client::HttpGenerationClient;
use veo_studio::studio::credentials::{
    CredentialStore, HttpSessionVerifier, SessionVerifier, VerifiedSession,
};
use veo_studio::studio::models::RunStatus;
use veo_studio::studio::orchestrator::BatchOrchestrator;
use veo_studio::studio::prompts::PromptSet;
use veo_studio::studio::settings::{Settings, SettingsRequest};
use veo_studio::studio::storage::DirectorySink;
use veo_studio::studio::ws::WsMessage;
use veo_studio::ui::BatchUI;
use veo_studio::ui::icons::COOKIE;

pub struct BatchArgs {
    pub cookies: PathBuf,
    pub prompts: PathBuf,
    pub aspect_ratio: String,
    pub duration: i64,
    pub resolution: String,
    pub skip_verify: bool,
    pub verbose: bool,
}

pub async fn cmd_batch(studio: StudioConfig, args: BatchArgs) -> Result<()> {
    for warning in studio.validate() {
        warn!("{}", warning);
    }

    let settings = Settings::try_from(SettingsRequest {
        aspect_ratio: Some(args.aspect_ratio),
        duration: Some(serde_json::json!(args.duration)),
        resolution: Some(args.resolution),
    })?;

    let prompt_bytes = tokio::fs::read(&args.prompts)
        .await
        .with_context(|| format!("Failed to read prompt file {}", args.prompts.display()))?;
    let prompts = PromptSet::parse_bytes(&prompt_bytes)
        .with_context(|| format!("Invalid prompt file {}", args.prompts.display()))?;

    let credentials = CredentialStore::load_file(&args.cookies)
        .await
        .with_context(|| format!("Invalid cookie file {}", args.cookies.display()))?;
    let cookie_count = credentials.len();
    let session = if args.skip_verify {
        warn!("skipping cookie verification");
        VerifiedSession::assume_verified(credentials)
    } else {
        let verifier = HttpSessionVerifier::new(&studio.verification, &studio.generation.user_agent)
            .context("Failed to build verification client")?;
        verifier.verify(credentials).await.context("Cookie verification failed")?
    };
    println!("{}{} cookies loaded", COOKIE, style(cookie_count).bold());

    std::fs::create_dir_all(&studio.storage.download_dir).with_context(|| {
        format!(
            "Failed to create download directory {}",
            studio.storage.download_dir.display()
        )
    })?;

    let client = HttpGenerationClient::new(&studio.generation)
        .context("Failed to build generation client")?;
    let sink = DirectorySink::new(studio.storage.download_dir.clone());
    let (events_tx, mut events) = broadcast::channel::<String>(256);
    let orchestrator = BatchOrchestrator::new(
        Arc::new(client),
        Arc::new(sink),
        studio.status.recent_records,
    )
    .with_events(events_tx);

    let handle = orchestrator.start(session, &prompts, settings)?;
    info!(run_id = %handle.run_id(), total = handle.total(), "batch started");
    let ui = BatchUI::new(handle.total() as u64, args.verbose);

    let mut interrupted = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(json) => match serde_json::from_str::<WsMessage>(&json) {
                    Ok(WsMessage::JobUpdated { record, .. }) => ui.job_updated(&record),
                    Ok(WsMessage::RunFinished { .. }) => break,
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "unreadable run event"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "progress display fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                warn!("interrupt received; finishing the current video then stopping");
                handle.cancel();
            }
        }
    }
    orchestrator.wait().await;

    let snapshot = orchestrator.status();
    ui.finish(&snapshot, &studio.storage.download_dir);

    match snapshot.status {
        RunStatus::Completed => Ok(()),
        RunStatus::Cancelled => bail!("batch cancelled"),
        status => bail!("batch {}", status.as_str()),
    }
}
