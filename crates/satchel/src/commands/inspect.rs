//! Inspect command - show what a session key holds.
//!
//! Reads through the backend primitives so that inspecting a corrupted or
//! expired session never replaces it.

use anyhow::{Result, bail};
use chrono::Utc;
use clap::Args;

use satchel_session::LoadOutcome;
use satchel_session::expiry::{Expiry, expiry_date};

use super::Context;

/// Arguments for the inspect command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Session key as presented by the client (the cookie value)
    pub key: String,
}

/// Run the inspect command.
pub fn run(args: InspectArgs, ctx: &Context) -> Result<()> {
    let store = ctx.open_store()?;
    let keys = store.key_codec();

    if !keys.validate(&args.key) {
        bail!("'{}' is not a valid session key for {}", args.key, store.name());
    }
    let backend_key = keys.to_backend_key(&args.key);

    let data = match store.load_data(&backend_key)? {
        LoadOutcome::Loaded(data) => data,
        LoadOutcome::Missing => bail!("No session found for that key"),
        LoadOutcome::Corrupted => bail!("Session data failed verification"),
        LoadOutcome::Expired => bail!("Session has expired"),
    };

    let expiry = Expiry::from_data(&data);
    let expires = expiry
        .filter(|e| !e.is_browser_close())
        .map(|e| expiry_date(Some(e), Utc::now(), store.context().cookie_age()));

    if ctx.json_output {
        let output = serde_json::json!({
            "backend": store.name(),
            "backend_key": backend_key,
            "browser_close": expiry.is_some_and(|e| e.is_browser_close()),
            "expires": expires.map(|t| t.to_rfc3339()),
            "data": data,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Backend:     {}", store.name());
    if ctx.verbose || backend_key != args.key {
        println!("Backend key: {}", backend_key);
    }
    match (expiry, expires) {
        (Some(e), _) if e.is_browser_close() => println!("Expires:     at browser close"),
        (_, Some(at)) => println!("Expires:     {}", at.to_rfc3339()),
        _ => println!("Expires:     default policy"),
    }

    if data.is_empty() {
        println!("\nNo attributes.");
        return Ok(());
    }

    println!("\nAttributes:");
    let mut names: Vec<_> = data.keys().collect();
    names.sort();
    for name in names {
        println!("  {:<20} {}", name, data[name]);
    }

    Ok(())
}
