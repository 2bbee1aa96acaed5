use anyhow::Context;

use mail_triage::config::AppConfig;
use mail_triage::pipeline::processor::TriageProcessor;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let triage = &config.triage;

    eprintln!("📬 Mail Triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Assistant: {}", triage.assistant_name);
    eprintln!(
        "   Query: {} | Max: {} | Dry run: {}",
        triage.query, triage.max_results, triage.dry_run
    );
    eprintln!(
        "   Models: classify={} draft={} @ {}",
        config.inference.classify.model, config.inference.draft.model, config.inference.base_url
    );
    eprintln!("{}", "=".repeat(80));

    let processor = TriageProcessor::from_config(&config)
        .await
        .context("setup failed")?;
    let summary = processor.run().await?;

    eprintln!("\n{}", "=".repeat(80));
    eprintln!(
        "Done. {} message(s): {} rejected by prefilter, {} classified, {} drafted, {} previewed, {} failed",
        summary.total,
        summary.rejected,
        summary.classified,
        summary.drafted,
        summary.previewed,
        summary.failed
    );
    eprintln!("Audit log: {}", summary.audit_path);
    if triage.dry_run {
        eprintln!("Dry run is ON. Set DRY_RUN=false to actually create drafts.");
    }
    eprintln!("{}", "=".repeat(80));

    Ok(())
}
