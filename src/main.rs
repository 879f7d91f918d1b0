#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cronfleet::cli::run().await
}
