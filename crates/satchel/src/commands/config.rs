//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};

use satchel_config::{SECRET_KEY_ENV, resolve_secret_key};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show resolved configuration and where it came from
    Show,

    /// Show configuration file path
    Path,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./satchel.toml) instead of user config
        #[arg(long)]
        local: bool,
    },
}

/// Run the config command.
pub fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx),
        ConfigCommand::Path => cmd_path(),
        ConfigCommand::Init { local } => cmd_init(local),
    }
}

fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = ctx.load_config()?;
    let config = &loaded.config;
    let session = config.session_settings();
    let storage = config.storage_config();
    let secret = resolve_secret_key(session.secret_key.as_deref());

    if ctx.json_output {
        let output = serde_json::json!({
            "sources": loaded.loaded_from(),
            "backend": storage.backend.to_string(),
            "database": storage.database_path(),
            "cookie_age": session.cookie_age,
            "cookie_name": session.cookie_name,
            "store_key_hash": session.store_key_hash,
            "require_key_hash": session.require_key_hash,
            "secret": secret.as_ref().map(|s| s.source.to_string()),
            "warnings": loaded.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("# Satchel Configuration\n");

    // Sources
    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in &sources {
            println!("  {}", source.display());
        }
        println!();
    }

    // Storage
    println!("Storage:");
    println!("  backend: {}", storage.backend);
    println!("  database: {}", storage.database_path().display());
    println!();

    // Session
    println!("Session:");
    println!("  cookie_age: {}s", session.cookie_age);
    println!("  cookie_name: {}", session.cookie_name);
    println!("  cache_alias: {}", session.cache_alias);
    match &session.file_path {
        Some(path) => println!("  file_path: {}", path.display()),
        None => println!("  file_path: {} (system temp)", std::env::temp_dir().display()),
    }
    println!(
        "  key hashing: store={} require={}",
        session.store_key_hash, session.require_key_hash
    );
    println!("  accept_legacy: {}", session.accept_legacy);
    match &secret {
        Some(secret) => println!("  secret: set ({})", secret.source),
        None => println!("  secret: missing (set {})", SECRET_KEY_ENV),
    }
    println!();

    // Warnings
    if !loaded.warnings.is_empty() {
        println!("Warnings:");
        for w in &loaded.warnings {
            println!("  ⚠ {}", w);
        }
        println!();
    }

    if ctx.verbose {
        println!("---\nRaw config:\n");
        if let Ok(toml_str) = config.to_toml() {
            println!("{}", toml_str);
        }
    }

    Ok(())
}

fn cmd_path() -> Result<()> {
    if let Some(path) = satchel_config::xdg_config_path() {
        println!("{}", path.display());
    } else {
        eprintln!("Could not determine config directory");
    }
    Ok(())
}

fn cmd_init(local: bool) -> Result<()> {
    let path = if local {
        PathBuf::from("satchel.toml")
    } else {
        satchel_config::xdg_config_path()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
    };

    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let template = r#"# Satchel Configuration

[session]
cookie_age = 1209600        # two weeks
cookie_name = "sessionid"   # also the file prefix for the file backend
store_key_hash = false
require_key_hash = false
accept_legacy = true
# file_path = "/var/lib/satchel"
# The signing secret belongs in the SATCHEL_SECRET_KEY environment variable.

[storage]
backend = "db"              # db, cached_db, file, cache, signed_cookies
# database = "/var/lib/satchel/sessions.db"

# [caches.default]
# max_entries = 10000
"#;

    std::fs::write(&path, template)?;
    println!("✓ Created config file: {}", path.display());
    println!();
    println!("Next steps:");
    println!("  export {}=...            # signing secret", SECRET_KEY_ENV);
    println!("  satchel config show                    # verify configuration");

    Ok(())
}
