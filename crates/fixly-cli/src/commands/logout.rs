//! Logout command implementation.

use anyhow::Result;
use clap::Args;

use fixly_http::{ApiClient, AuthApi};

use crate::output;

#[derive(Args, Debug)]
pub struct LogoutArgs {}

pub async fn run(_args: LogoutArgs, client: ApiClient) -> Result<()> {
    let report = AuthApi::new(client).logout().await;

    for (key, err) in &report.failures {
        output::error(&format!("Could not remove stored {}: {}", key, err));
    }

    output::success("Logged out");
    Ok(())
}
