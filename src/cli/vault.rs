use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde_json::Value;
use tokio::io::AsyncReadExt;

use runplane_session_vault::SessionVault;

use super::context::CliContext;

#[derive(Args, Clone)]
pub struct VaultArgs {
    #[command(subcommand)]
    pub action: VaultAction,
}

#[derive(Subcommand, Clone)]
pub enum VaultAction {
    /// Encrypt a JSON session state into an `iv:ciphertext` blob
    Encrypt(VaultInput),
    /// Decrypt a stored blob back into its JSON session state
    Decrypt(VaultInput),
}

#[derive(Args, Clone)]
pub struct VaultInput {
    /// Read input from this file
    #[arg(long, conflicts_with = "value")]
    pub file: Option<PathBuf>,

    /// Inline input; stdin is read when neither this nor --file is given
    pub value: Option<String>,
}

pub async fn cmd_vault(args: VaultArgs, ctx: &CliContext) -> Result<()> {
    let vault = SessionVault::from_config(ctx.config().vault.secret.as_deref())
        .context("set vault.secret or RUNPLANE_SESSION_SECRET")?;

    match args.action {
        VaultAction::Encrypt(input) => {
            let raw = read_input(&input).await?;
            let state: Value =
                serde_json::from_str(raw.trim()).context("session state must be JSON")?;
            println!("{}", vault.encrypt(&state)?);
        }
        VaultAction::Decrypt(input) => {
            let raw = read_input(&input).await?;
            let state: Value = vault.decrypt(raw.trim())?;
            ctx.output().emit(&state, || {
                serde_json::to_string_pretty(&state).unwrap_or_else(|_| state.to_string())
            })?;
        }
    }
    Ok(())
}

async fn read_input(input: &VaultInput) -> Result<String> {
    if let Some(value) = &input.value {
        return Ok(value.clone());
    }
    if let Some(path) = &input.file {
        return tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()));
    }
    let mut buffer = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buffer)
        .await
        .context("failed to read stdin")?;
    Ok(buffer)
}
