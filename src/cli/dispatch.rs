use anyhow::Result;

use super::commands::Commands;
use super::context::CliContext;
use super::env::CliArgs;
use super::models::cmd_models;
use super::serve::cmd_serve;
use super::vault::cmd_vault;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Serve(args) => cmd_serve(args, ctx).await,
        Commands::Models(args) => cmd_models(args, ctx),
        Commands::Vault(args) => cmd_vault(args, ctx).await,
    }
}
