use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    runplane_cli::cli::run().await
}
