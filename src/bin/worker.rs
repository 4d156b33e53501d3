use std::time::Duration;

use tokio::{signal, time::sleep};
use tracing_subscriber::EnvFilter;

use mailroom::{config::AppConfig, db, drain, mailer, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let transport = mailer::build_mailer(&config)?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = 1,
        mail_transport = transport.is_some(),
        poll_interval_secs = config.worker_poll_interval_secs,
        "loaded mailroom configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let poll_interval = Duration::from_secs(config.worker_poll_interval_secs);
    let state = AppState::new(pool, config, transport);

    tokio::select! {
        _ = run(&state, poll_interval) => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

async fn run(state: &AppState, poll_interval: Duration) {
    tracing::info!("worker started");
    loop {
        match drain::drain_pending(state).await {
            Ok(summary) if summary.processed > 0 => {
                tracing::info!(
                    processed = summary.processed,
                    successful = summary.successful,
                    failed = summary.failed,
                    "drained email queue"
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!(error = ?err, "queue drain failed");
            }
        }
        sleep(poll_interval).await;
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
