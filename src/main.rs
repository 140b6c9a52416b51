use log::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Bridge `log` records into tracing, then install the subscriber with an
    // env-controlled filter (RUST_LOG), defaulting to info.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to initialize log bridge: {e}");
    }
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install tracing subscriber: {e}");
    }

    // Run the application
    if let Err(e) = mail_probe::run().await {
        error!("Application error: {}", e);
        std::process::exit(1);
    }
}
