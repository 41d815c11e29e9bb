#![deny(clippy::all)]

mod api;
mod auth;
mod capture;
mod config;
mod director;
mod error;
mod review;
mod session;
mod studio;
mod upload;

use crate::api::{HttpStudioApi, StudioApi};
use crate::auth::{EnvTokenProvider, TokenProvider};
use crate::capture::SyntheticSource;
use crate::config::{load_config, TOKEN_VAR};
use crate::director::{DirectorCommand, DirectorOutcome};
use crate::error::{ApiError, AppError};
use crate::session::SessionStore;
use crate::studio::{StudioSession, SubmitOutcome};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    tracing_subscriber::fmt::init();

    // Pick up SIGNSTUDIO_TOKEN / SIGNSTUDIO_API_URL from a local .env
    dotenvy::dotenv().ok();

    let config = load_config().map_err(AppError::Config)?;

    let Some(slug) = std::env::args().nth(1) else {
        eprintln!("usage: signstudio <assignment-slug>");
        std::process::exit(2);
    };

    let tokens = Arc::new(EnvTokenProvider::new(TOKEN_VAR));
    // Uploads are the whole point of an unattended run, so a missing
    // credential is fatal here rather than a per-upload rejection
    if let Err(e) = tokens.bearer_token() {
        return Err(AppError::Auth(e).into());
    }
    let api: Arc<dyn StudioApi> = Arc::new(HttpStudioApi::new(&config.api.base_url, tokens)?);

    let assignment = match api.assignment(&slug).await {
        Ok(assignment) => assignment,
        Err(ApiError::NotFound(slug)) => {
            return Err(AppError::AssignmentNotFound(slug).into());
        }
        Err(e) => return Err(AppError::Api(e).into()),
    };
    info!(
        slug = %assignment.slug,
        category = assignment.category.as_deref().unwrap_or("-"),
        "Assignment loaded"
    );

    let store = SessionStore::new()?;
    let mut session = StudioSession::new(
        assignment.slug,
        config.studio,
        SyntheticSource::new(),
        api,
        assignment.id,
        store,
    );

    if session.try_restore().await {
        info!(
            count = session.recordings().len(),
            "Resuming a previous session in review"
        );
    } else {
        // The lead-in countdown exists for a person in front of a camera;
        // the headless driver skips it
        let commands = session.commands();
        let _ = commands.send(DirectorCommand::SkipCountdown);

        match session.run_recording_cycle().await? {
            DirectorOutcome::Completed => {
                info!(
                    count = session.recordings().len(),
                    progress = session.overall_progress(),
                    "Recording cycle complete"
                );
            }
            DirectorOutcome::Cancelled => {
                info!("Session cancelled, nothing to submit");
                return Ok(());
            }
        }
    }

    match session.submit(false).await? {
        SubmitOutcome::Submitted { count } => {
            info!(count, "Session submitted");
        }
        SubmitOutcome::Incomplete { missing } => {
            // Unattended run: accept the partial set rather than stall
            warn!(missing, "Set below target, submitting partial");
            match session.submit(true).await? {
                SubmitOutcome::Submitted { count } => info!(count, "Partial set submitted"),
                other => error!("Partial submission failed: {:?}", other),
            }
        }
        SubmitOutcome::UploadsPending => {
            error!("Uploads did not settle, nothing submitted");
        }
        SubmitOutcome::NothingToSubmit => {
            error!("No recordings were produced, nothing submitted");
        }
    }

    Ok(())
}
