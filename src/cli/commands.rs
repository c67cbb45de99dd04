use clap::Subcommand;

use super::models::ModelsArgs;
use super::serve::ServeArgs;
use super::vault::VaultArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run the control plane HTTP server
    Serve(ServeArgs),

    /// Show the model catalogue and routing decisions
    Models(ModelsArgs),

    /// Encrypt or decrypt session vault blobs
    Vault(VaultArgs),
}
