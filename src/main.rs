#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = wavy_learn::run().await {
        eprintln!("wavy-learn fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
