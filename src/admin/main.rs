//! Standalone inspection tool for persisted bridge state.
//!
//! Cross-checks the JSON user store against the per-user credential
//! directories, reports each user's pairing state, and optionally prunes
//! credential directories that no longer belong to any user record.

use std::collections::HashSet;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use wa_bridge_bot::config::BridgeSettings;
use wa_bridge_bot::store::{FileUserStore, UserStore};
use wa_bridge_bot::transport::AuthManager;

/// Bridge state inspector.
#[derive(Parser, Debug)]
#[command(name = "bridge_admin")]
#[command(about = "Inspects persisted bridge state: user records and stored credentials")]
#[command(version)]
struct Args {
    /// Path to the JSON user store file (defaults to WA_USER_STORE).
    #[arg(short, long)]
    store: Option<std::path::PathBuf>,

    /// Root directory of per-user credentials (defaults to WA_AUTH_ROOT).
    #[arg(short, long)]
    auth_root: Option<std::path::PathBuf>,

    /// Delete credential directories that have no user record.
    #[arg(long)]
    prune: bool,

    /// Show every user record, not only mismatches.
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);
    dotenvy::dotenv().ok();

    let settings = BridgeSettings::from_env_with_defaults();
    let store_path = args.store.unwrap_or(settings.user_store_path);
    let auth_root = args.auth_root.unwrap_or(settings.auth_root);

    match inspect(&store_path, &auth_root, args.prune, args.verbose).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("✗ {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn inspect(store_path: &Path, auth_root: &Path, prune: bool, verbose: bool) -> Result<()> {
    println!("User store: {}", store_path.display());
    println!("Auth root:  {}\n", auth_root.display());

    let store = FileUserStore::open(store_path).context("Failed to open user store")?;
    let auth = AuthManager::new(auth_root);

    let mut users = store
        .all_users()
        .await
        .context("Failed to read user records")?;
    users.sort_unstable_by_key(|u| u.user_id);

    let credential_ids = auth
        .list_user_ids()
        .await
        .context("Failed to scan credential directories")?;

    let mut mismatches = 0;

    for user in &users {
        let registered = auth.is_registered(user.user_id).await;
        let consistent = registered == user.whatsapp_paired;
        if !consistent {
            mismatches += 1;
        }

        if verbose || !consistent {
            let marker = if consistent { "✓" } else { "⚠" };
            println!(
                "{marker} user {} [{:?}{}] paired={} creds-registered={} phone={}",
                user.user_id,
                user.role,
                if user.is_expired() { ", expired" } else { "" },
                user.whatsapp_paired,
                registered,
                user.whatsapp_phone.as_deref().unwrap_or("-"),
            );
        }
    }

    let known: HashSet<_> = users.iter().map(|u| u.user_id).collect();
    let orphans: Vec<_> = credential_ids
        .iter()
        .copied()
        .filter(|id| !known.contains(id))
        .collect();

    println!(
        "\n{} users, {} credential directories, {} pairing mismatches, {} orphaned directories",
        users.len(),
        credential_ids.len(),
        mismatches,
        orphans.len(),
    );

    for id in &orphans {
        if prune {
            auth.delete_user_auth(*id)
                .await
                .with_context(|| format!("Failed to prune credentials for user {id}"))?;
            println!("✓ Pruned credentials for unknown user {id}");
        } else {
            println!("⚠ Orphaned credentials for unknown user {id} (use --prune to delete)");
        }
    }

    if mismatches > 0 {
        println!("\nRun the bot to let the reconnect sweep settle pairing flags,");
        println!("or clear stale records by hand.");
    }

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
