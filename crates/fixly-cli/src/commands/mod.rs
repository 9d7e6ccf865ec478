//! Subcommand implementations.

pub mod login;
pub mod logout;
pub mod refresh;
pub mod request;
pub mod whoami;

use anyhow::Result;

use crate::cli::Commands;
use crate::context;

pub async fn handle(command: Commands, api_url: Option<&str>) -> Result<()> {
    let client = context::open_client(api_url)?;

    match command {
        Commands::Login(args) => login::run(args, client).await,
        Commands::Logout(args) => logout::run(args, client).await,
        Commands::Whoami(args) => whoami::run(args, client).await,
        Commands::Refresh(args) => refresh::run(args, client).await,
        Commands::Request(args) => request::run(args, client).await,
    }
}
