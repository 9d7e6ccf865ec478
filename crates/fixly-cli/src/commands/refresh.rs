//! Refresh command implementation.

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::Colorize;

use fixly_http::ApiClient;

use crate::output;

#[derive(Args, Debug)]
pub struct RefreshArgs {}

pub async fn run(_args: RefreshArgs, client: ApiClient) -> Result<()> {
    if client.credentials().refresh_token().await.is_none() {
        bail!("No active session. Run 'fixly login' first.");
    }

    eprintln!("{}", "Refreshing session...".dimmed());

    client
        .refresh_credentials()
        .await
        .context("Failed to refresh session")?;

    output::success("Session refreshed successfully");
    Ok(())
}
