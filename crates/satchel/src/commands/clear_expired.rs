//! Clear-expired command - one sweep of the configured backend.

use anyhow::Result;
use clap::Args;
use tracing::info;

use satchel_session::SessionError;

use super::Context;

/// Arguments for the clear-expired command.
#[derive(Args, Debug)]
pub struct ClearExpiredArgs {}

/// Run the clear-expired command.
pub fn run(_args: ClearExpiredArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;

    match store.clear_expired() {
        Ok(removed) => {
            info!(backend = store.name(), removed, "Expired sessions cleared");
            if ctx.json_output {
                let output = serde_json::json!({
                    "backend": store.name(),
                    "removed": removed,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("Removed {} expired session(s) from {}", removed, store.name());
            }
            Ok(())
        }
        Err(SessionError::Unsupported(backend)) => {
            if ctx.json_output {
                let output = serde_json::json!({
                    "backend": backend,
                    "removed": null,
                    "supported": false,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{} expires sessions on its own; nothing to clear", backend);
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
