//! Command-line arguments of the `adcanvas-sync` binary.

use adcanvas_core::EntityId;
use clap::{Parser, Subcommand};

/// Inspect the canvas persistence layer against a running API.
#[derive(Debug, Parser)]
#[command(name = "adcanvas-sync", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// List projects, most recently updated first.
    Projects,
    /// Load a project's chat and canvas and report what they hold.
    Hydrate {
        project_id: EntityId,
    },
    /// Rename a project through the offline queue.
    Rename {
        project_id: EntityId,
        #[arg(value_parser = non_blank)]
        name: String,
    },
}

fn non_blank(raw: &str) -> Result<String, String> {
    if raw.trim().is_empty() {
        Err("name must not be blank".to_string())
    } else {
        Ok(raw.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
