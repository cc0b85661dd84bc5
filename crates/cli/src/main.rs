//! `adcanvas-sync` -- inspect the persistence layer from a terminal.
//!
//! Lists projects, hydrates a project session the way the canvas does on
//! load, and renames projects through the offline queue.
//!
//! # Environment variables
//!
//! | Variable                  | Required | Default                 | Description                     |
//! |---------------------------|----------|-------------------------|---------------------------------|
//! | `API_BASE_URL`            | no       | `http://localhost:3000` | Application API origin          |
//! | `REQUEST_TIMEOUT_SECS`    | no       | `30`                    | Per-request timeout             |
//! | `API_MAX_RETRIES`         | no       | `3`                     | Retries after the first attempt |
//! | `API_RETRY_BASE_DELAY_MS` | no       | `1000`                  | First backoff delay             |
//! | `CHAT_DEBOUNCE_MS`        | no       | `500`                   | Chat write debounce             |
//! | `CANVAS_DEBOUNCE_MS`      | no       | `100`                   | Canvas write debounce           |

use std::sync::Arc;

use adcanvas_cli::{Cli, Command};
use adcanvas_client::PersistenceApi;
use adcanvas_sync::SyncSettings;
use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adcanvas_sync=info,adcanvas_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let settings = SyncSettings::from_env().context("invalid configuration")?;
    let api = Arc::new(PersistenceApi::from_config(&settings.client)?);

    tracing::info!(
        base_url = %settings.client.base_url,
        max_retries = settings.client.retry.max_retries,
        "Starting adcanvas-sync",
    );

    match cli.command {
        Command::Projects => {
            for project in adcanvas_cli::list_projects(&api).await? {
                println!("{}  {}  (updated {})", project.id, project.name, project.updated_at.to_rfc3339());
            }
        }
        Command::Hydrate { project_id } => {
            let summary = adcanvas_cli::hydrate(api, &settings, project_id)
                .await
                .with_context(|| format!("could not hydrate project {project_id}"))?;
            print!("{summary}");
        }
        Command::Rename { project_id, name } => {
            let project = adcanvas_cli::rename(api, &settings, project_id, name)
                .await
                .with_context(|| format!("could not rename project {project_id}"))?;
            println!("{}  {}", project.id, project.name);
        }
    }

    Ok(())
}
