#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = exam_ingest::run().await {
        eprintln!("exam-ingest fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
