//! Whoami command implementation.

use anyhow::{Context, Result, bail};
use clap::Args;
use serde_json::Value;

use fixly_http::{ApiClient, AuthApi};

use crate::output;

#[derive(Args, Debug)]
pub struct WhoamiArgs {
    /// Print the full profile as JSON
    #[arg(long)]
    pub json: bool,

    /// Use the cached profile instead of asking the server
    #[arg(long)]
    pub offline: bool,
}

pub async fn run(args: WhoamiArgs, client: ApiClient) -> Result<()> {
    if !client.credentials().has_valid_tokens().await {
        bail!("No active session. Run 'fixly login' first.");
    }

    let auth = AuthApi::new(client.clone());
    let profile = if args.offline {
        auth.cached_user()
            .await
            .context("No cached profile. Run 'fixly whoami' while online first.")?
    } else {
        auth.current_user().await.context("Failed to fetch profile")?
    };

    if args.json {
        return output::json_pretty(&profile);
    }

    for (label, key) in [("ID", "id"), ("Email", "email"), ("Name", "full_name")] {
        if let Some(value) = profile.get(key).and_then(display_value) {
            output::field(label, &value);
        }
    }
    if let Some(user_type) = client.credentials().user_type().await {
        output::field("Role", &user_type);
    }
    output::field("API", client.config().base_url.as_str());

    Ok(())
}

fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
