//!
//! sensilabel server binary
//! ------------------------
//! Command-line entry point for the labelled document download server.
//! Configuration comes from `SENSILABEL_*` environment variables; CLI flags override them.

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use sensilabel::config::{AppConfig, TokenProviderKind};

fn parse_value_arg(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn apply_args(mut cfg: AppConfig, args: &[String]) -> Result<AppConfig> {
    if let Some(v) = parse_value_arg(args, "--http-port") {
        cfg.http_port = v.parse().map_err(|_| anyhow!("--http-port expects a port number, got '{}'", v))?;
    }
    if let Some(v) = parse_value_arg(args, "--cache-dir") { cfg.cache_dir = PathBuf::from(v); }
    if let Some(v) = parse_value_arg(args, "--data-endpoint") { cfg.data_endpoint = Some(v); }
    if let Some(v) = parse_value_arg(args, "--label-policy") { cfg.label_policy_path = Some(PathBuf::from(v)); }
    if let Some(v) = parse_value_arg(args, "--token-provider") {
        cfg.token_provider = TokenProviderKind::parse(&v).ok_or_else(|| anyhow!("--token-provider expects dev|obo, got '{}'", v))?;
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))?;
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("sensilabel Server\n\nUSAGE:\n  sensilabel_server [--http-port N] [--cache-dir PATH] [--data-endpoint URL] [--label-policy FILE] [--token-provider dev|obo]\n\nOPTIONS:\n  --http-port N          HTTP port (env: SENSILABEL_HTTP_PORT, default 7880)\n  --cache-dir PATH       Engine profile cache root (env: SENSILABEL_CACHE_DIR, default mip_data)\n  --data-endpoint URL    JSON data source for the workbook (env: SENSILABEL_DATA_ENDPOINT)\n  --label-policy FILE    Label policy JSON for the local engine (env: SENSILABEL_LABEL_POLICY)\n  --token-provider KIND  dev or obo (env: SENSILABEL_TOKEN_PROVIDER, default dev)\n");
        return Ok(());
    }

    let cfg = apply_args(AppConfig::from_env()?, &args)?;
    println!(
        "sensilabel starting: http={}, cache_dir={}, token_provider={:?}",
        cfg.http_port, cfg.cache_dir.display(), cfg.token_provider
    );
    tracing::info!(target: "startup", "Using port: http={}, cache_dir={}", cfg.http_port, cfg.cache_dir.display());
    sensilabel::server::run(cfg).await
}
