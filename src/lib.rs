//! Determines whether an email address is likely deliverable without ever
//! sending a message.
//!
//! The pipeline fuses four signals into one classification: address syntax,
//! DNS mail-host resolution, a partial SMTP dialogue (always aborted before
//! DATA), and a behavioral probe that distinguishes selective servers from
//! catch-all servers. Interpretation is conservative throughout: when the
//! evidence is ambiguous the result is `Unknown`, never a guess.

pub mod config;
pub mod detector;
pub mod dns;
pub mod pipeline;
pub mod smtp;
pub mod syntax;

pub use config::Config;
pub use detector::{CacheStats, CatchAllConfidence, CatchAllDetectionResult, CatchAllDetector};
pub use dns::{DnsResolutionResult, DnsResolver, DnsStatus, MxDnsResolver};
pub use pipeline::{VerificationPipeline, VerificationResult, VerificationStatus};
pub use smtp::{
    interpret, SmtpOutcome, SmtpPhase, SmtpResponse, SmtpVerificationResult, TransportError,
};
pub use syntax::SyntaxResult;

use anyhow::Result;
use log::{error, info};

/// Runs the command-line frontend: loads configuration, verifies every
/// address given as an argument, and prints one JSON result per address.
///
/// Returns an error if configuration loading fails or no addresses were
/// supplied. Individual verification outcomes, including `Unknown`, are
/// reported through the printed results rather than the exit path.
pub async fn run() -> Result<()> {
    info!(
        "Starting {} v{} email verifier",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let addresses: Vec<String> = std::env::args().skip(1).collect();
    if addresses.is_empty() {
        return Err(anyhow::anyhow!("usage: mail_probe <address>..."));
    }

    // Load configuration; exit early if configuration is invalid or missing.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    let pipeline = VerificationPipeline::new(config);

    for address in &addresses {
        let result = pipeline.verify(address).await;
        match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("Failed to serialize result for {}: {}", address, e),
        }
    }

    let stats = pipeline.cache_stats();
    info!(
        "Catch-all cache: {} entries, {} hits, {} misses ({:.0}% hit rate)",
        stats.size,
        stats.hits,
        stats.misses,
        stats.hit_rate * 100.0
    );

    Ok(())
}
