use std::process::ExitCode;

use anyhow::Context;
use tracing::{error, info};

use news_classifier::{
    app::ComponentRegistry,
    config::Config,
    observability::{self, Telemetry},
};

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(String::as_str)
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                thread = thread_name,
                file = location.file(),
                line = location.line(),
                column = location.column(),
                message,
                "panic occurred"
            );
        } else {
            error!(
                thread = thread_name,
                message, "panic occurred without location information"
            );
        }
    }));
}

async fn run() -> anyhow::Result<()> {
    // 認証情報などをローカルの .env から読む（無ければ環境変数のみ）
    let _ = dotenvy::dotenv();

    let config = Config::from_env().context("failed to load configuration")?;
    let telemetry = Telemetry::new().context("failed to initialize telemetry")?;
    info!(
        protocol = %config.extraction_protocol(),
        model = config.gemini_model(),
        "starting news classification run"
    );

    let mut registry = ComponentRegistry::build(config, telemetry)
        .await
        .context("failed to build component registry")?;
    let summary = registry.run_once().await.context("classification run aborted")?;

    info!(
        run_id = %summary.run_id,
        processed = summary.processed,
        skipped = summary.skipped,
        failed = summary.failed,
        rows_written = summary.rows_written,
        "total processed: {}",
        summary.processed
    );
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    install_panic_hook();

    let outcome = run().await;
    if let Err(err) = &outcome {
        // サブスクライバ初期化前に失敗した場合でも見えるように stderr にも出す
        error!(error = %format!("{err:#}"), "news classifier failed");
        eprintln!("news-classifier: {err:#}");
    }
    observability::tracing::shutdown();

    if outcome.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
