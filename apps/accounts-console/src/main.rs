#[tokio::main]
async fn main() -> anyhow::Result<()> {
    accounts_console::cli::run().await
}
