//! Raw request command implementation.

use anyhow::{Context, Result, anyhow, bail};
use clap::Args;
use serde_json::Value;

use fixly_http::{ApiClient, ApiRequest, Method};

use crate::output;

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE)
    pub method: String,

    /// Path relative to the API prefix, e.g. /services
    pub path: String,

    /// JSON request body
    #[arg(long)]
    pub data: Option<String>,

    /// Query parameter as key=value (repeatable)
    #[arg(long = "query", short = 'q', value_parser = parse_query)]
    pub query: Vec<(String, String)>,
}

pub async fn run(args: RequestArgs, client: ApiClient) -> Result<()> {
    let method = Method::from_bytes(args.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method '{}'", args.method))?;

    let mut request = args
        .query
        .into_iter()
        .fold(ApiRequest::new(method, args.path), |request, (key, value)| {
            request.query(key, value)
        });

    if let Some(data) = &args.data {
        let body: Value = serde_json::from_str(data).context("--data is not valid JSON")?;
        request = request.json_value(body);
    }

    let response = match client.send(request).await {
        Ok(response) => response,
        Err(e) if e.is_session_expired() => {
            bail!("Session expired. Run 'fixly login' to sign in again.")
        }
        Err(e) => return Err(e).context("Request failed"),
    };

    if response.body.is_empty() {
        output::success(&format!("HTTP {}", response.status));
        return Ok(());
    }
    match response.json::<Value>() {
        Ok(body) => output::json_pretty(&body),
        Err(_) => {
            println!("{}", response.text());
            Ok(())
        }
    }
}

fn parse_query(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got '{}'", raw))?;
    if key.is_empty() {
        return Err(anyhow!("query parameter name is empty"));
    }
    Ok((key.to_string(), value.to_string()))
}
