//! Login command implementation.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use fixly_http::{ApiClient, AuthApi, Credentials};

use crate::output;

#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Account email address
    #[arg(long)]
    pub email: String,

    /// Account password
    #[arg(long, env = "FIXLY_PASSWORD", hide_env_values = true)]
    pub password: String,
}

pub async fn run(args: LoginArgs, client: ApiClient) -> Result<()> {
    let credentials = Credentials::new(&args.email, &args.password);

    eprintln!("{}", "Logging in...".dimmed());

    let response = AuthApi::new(client)
        .login(&credentials)
        .await
        .context("Failed to login")?;

    output::success("Logged in successfully");
    println!();
    output::field("Email", credentials.email());
    if let Some(user_type) = &response.user_type {
        output::field("Role", user_type);
    }

    Ok(())
}
