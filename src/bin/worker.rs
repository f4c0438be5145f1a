#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = exam_ingest::run_worker().await {
        eprintln!("exam-ingest-worker fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
