//! CLI argument definitions.

use clap::{Parser, Subcommand};

use crate::commands::{login, logout, refresh, request, whoami};

/// Command-line client for the Fixly marketplace API.
#[derive(Parser, Debug)]
#[command(name = "fixly")]
#[command(author, version = env!("FIXLY_VERSION"), about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Output logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// API base URL
    #[arg(long, env = "FIXLY_API_URL", global = true)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in with email and password
    Login(login::LoginArgs),

    /// End the current session
    Logout(logout::LogoutArgs),

    /// Show the signed-in user
    Whoami(whoami::WhoamiArgs),

    /// Renew the session tokens
    Refresh(refresh::RefreshArgs),

    /// Send an authenticated request and print the response
    Request(request::RequestArgs),
}
