//! Multi-probe catch-all detection.
//!
//! A server that accepts `RCPT TO` for a real-looking address may simply
//! accept *everything* at that domain. After the primary dialogue accepts,
//! this module opens a second session against the same mail host and offers
//! it a batch of random recipients that cannot exist. How the server treats
//! them decides whether the acceptance meant anything.

mod cache;

pub use cache::{CacheStats, DetectionCache};

use std::time::Duration;

use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::smtp::{parse_response, SmtpPhase, SmtpResponse, TcpSmtpTransport};

/// How confident the detector is that the domain accepts any recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CatchAllConfidence {
    /// Every probe was accepted; the server is catch-all.
    Confirmed,
    /// Probes neither rejected nor uniformly accepted; behavior is fishy.
    Suspected,
    /// At least one probe was rejected; the server is selective.
    NotDetected,
    /// The analysis could not run to a conclusion.
    Indeterminate,
}

/// Detector verdict plus a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatchAllDetectionResult {
    pub confidence: CatchAllConfidence,
    pub diagnostic: Option<String>,
}

impl CatchAllDetectionResult {
    pub fn confirmed(diagnostic: &str) -> Self {
        CatchAllDetectionResult {
            confidence: CatchAllConfidence::Confirmed,
            diagnostic: Some(diagnostic.to_string()),
        }
    }

    pub fn suspected(diagnostic: &str) -> Self {
        CatchAllDetectionResult {
            confidence: CatchAllConfidence::Suspected,
            diagnostic: Some(diagnostic.to_string()),
        }
    }

    pub fn not_detected(diagnostic: &str) -> Self {
        CatchAllDetectionResult {
            confidence: CatchAllConfidence::NotDetected,
            diagnostic: Some(diagnostic.to_string()),
        }
    }

    pub fn indeterminate(diagnostic: &str) -> Self {
        CatchAllDetectionResult {
            confidence: CatchAllConfidence::Indeterminate,
            diagnostic: Some(diagnostic.to_string()),
        }
    }
}

/// Outcome of a single random-recipient probe.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ProbeOutcome {
    Accepted,
    Rejected,
    Failed(String),
}

/// Runs batched probe sessions and caches verdicts per domain.
pub struct CatchAllDetector {
    probe_count: usize,
    helo_domain: String,
    mail_from: String,
    smtp_port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
    cache: DetectionCache,
}

impl CatchAllDetector {
    pub fn from_config(config: &Config) -> Self {
        CatchAllDetector {
            // Config validation already bounds this to [1, 5].
            probe_count: config.probe_count,
            helo_domain: config.helo_domain.clone(),
            mail_from: config.mail_from.clone(),
            smtp_port: config.smtp_port,
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            cache: DetectionCache::new(
                config.caching_enabled,
                config.cache_ttl(),
                config.max_cache_size,
            ),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Analyzes whether `domain` is served by a catch-all server.
    ///
    /// `primary_responses` is the response list of the verification dialogue
    /// that triggered this analysis. The primary outcome is never rewritten
    /// here; the return value only qualifies it. Probe-session failures are
    /// absorbed into the confidence, never raised as errors.
    pub async fn analyze(
        &self,
        primary_responses: &[SmtpResponse],
        domain: &str,
        mail_host: &str,
    ) -> CatchAllDetectionResult {
        // Single-probe pre-analysis: the primary RCPT TO response already
        // rules some cases out without a second session.
        let rcpt = primary_responses
            .iter()
            .find(|r| r.phase == SmtpPhase::RcptTo);
        match rcpt {
            None => {
                return CatchAllDetectionResult::indeterminate(
                    "primary dialogue has no RCPT_TO response",
                );
            }
            Some(r) if r.is_permanent_failure() => {
                let result = CatchAllDetectionResult::not_detected("server is selective");
                self.cache.put(domain, result.clone());
                return result;
            }
            Some(r) if r.is_positive_completion() => {} // worth probing
            Some(r) => {
                return CatchAllDetectionResult::indeterminate(&format!(
                    "ambiguous RCPT_TO response: {} {}",
                    r.code, r.message
                ));
            }
        }

        if let Some(cached) = self.cache.get(domain) {
            debug!("Using cached catch-all result for {}", domain);
            return cached;
        }

        let outcomes = self.run_probe_session(domain, mail_host).await;
        let result = aggregate(&outcomes);
        info!(
            "Catch-all analysis for {}: {:?} ({} probes)",
            domain,
            result.confidence,
            outcomes.len()
        );

        if result.confidence != CatchAllConfidence::Indeterminate {
            self.cache.put(domain, result.clone());
        }
        result
    }

    /// One batched session: GREETING, HELO, MAIL FROM, then `probe_count`
    /// RCPT TOs with random recipients, then QUIT.
    async fn run_probe_session(&self, domain: &str, mail_host: &str) -> Vec<ProbeOutcome> {
        let mut transport = match TcpSmtpTransport::connect(
            mail_host,
            self.smtp_port,
            self.connect_timeout,
            self.read_timeout,
        )
        .await
        {
            Ok(transport) => transport,
            Err(e) => {
                debug!("Probe session could not connect to {}: {}", mail_host, e);
                return vec![ProbeOutcome::Failed(e.to_string()); self.probe_count];
            }
        };

        let outcomes = match self.probe_preamble(&mut transport).await {
            Ok(()) => self.issue_probes(&mut transport, domain).await,
            Err(reason) => {
                debug!("Probe session preamble failed: {}", reason);
                vec![ProbeOutcome::Failed(reason); self.probe_count]
            }
        };

        // Best-effort QUIT; the aggregate does not depend on it.
        if transport.send_command("QUIT").await.is_ok() {
            let _ = transport.read_response().await;
        }
        transport.close().await;

        outcomes
    }

    /// GREETING/HELO/MAIL FROM, each of which must answer in the 2xx class.
    async fn probe_preamble(&self, transport: &mut TcpSmtpTransport) -> Result<(), String> {
        let greeting = transport
            .read_response()
            .await
            .map_err(|e| format!("greeting failed: {e}"))?;
        expect_positive("greeting", &greeting)?;

        for command in [
            format!("HELO {}", self.helo_domain),
            format!("MAIL FROM:<{}>", self.mail_from),
        ] {
            transport
                .send_command(&command)
                .await
                .map_err(|e| e.to_string())?;
            let response = transport
                .read_response()
                .await
                .map_err(|e| e.to_string())?;
            expect_positive(&command, &response)?;
        }
        Ok(())
    }

    /// Issues the batch of random-recipient RCPT TOs on the open session.
    async fn issue_probes(
        &self,
        transport: &mut TcpSmtpTransport,
        domain: &str,
    ) -> Vec<ProbeOutcome> {
        let mut outcomes = Vec::with_capacity(self.probe_count);

        for index in 0..self.probe_count {
            let local_part = random_probe_local_part();
            let command = format!("RCPT TO:<{local_part}@{domain}>");
            trace!("Probe {} of {}: {}", index + 1, self.probe_count, command);

            let exchange = async {
                transport.send_command(&command).await?;
                transport.read_response().await
            };
            match exchange.await {
                Ok(raw) => {
                    let code = parse_response(&raw, SmtpPhase::RcptTo).code;
                    outcomes.push(match code {
                        200..=299 => ProbeOutcome::Accepted,
                        500..=599 => ProbeOutcome::Rejected,
                        _ => ProbeOutcome::Failed(format!("unusable probe response: {raw}")),
                    });
                }
                Err(e) => {
                    // Mid-stream failure: this probe and the rest cannot run.
                    let message = e.to_string();
                    while outcomes.len() < self.probe_count {
                        outcomes.push(ProbeOutcome::Failed(message.clone()));
                    }
                    break;
                }
            }
        }

        outcomes
    }
}

fn expect_positive(step: &str, raw: &str) -> Result<(), String> {
    let code = parse_response(raw, SmtpPhase::Greeting).code;
    if (200..300).contains(&code) {
        Ok(())
    } else {
        Err(format!("{step} answered {code}"))
    }
}

/// A recipient that cannot plausibly exist: `probe-` plus 128 random bits in
/// hex. Tokens are distinct across probes within a session.
fn random_probe_local_part() -> String {
    format!("probe-{}", Uuid::new_v4().simple())
}

/// Collapses per-probe outcomes into a verdict.
fn aggregate(outcomes: &[ProbeOutcome]) -> CatchAllDetectionResult {
    let total = outcomes.len();
    let accepted = outcomes
        .iter()
        .filter(|o| **o == ProbeOutcome::Accepted)
        .count();
    let rejected = outcomes
        .iter()
        .filter(|o| **o == ProbeOutcome::Rejected)
        .count();
    let failed = total - accepted - rejected;

    if rejected > 0 {
        // Any rejection of a random recipient proves mailbox checking.
        CatchAllDetectionResult::not_detected("server is selective")
    } else if accepted == total {
        CatchAllDetectionResult::confirmed("all probes accepted")
    } else if failed == total {
        CatchAllDetectionResult::suspected("probes failed to complete")
    } else {
        CatchAllDetectionResult::suspected("mixed probe outcomes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smtp::NO_RESPONSE_CODE;

    fn config() -> Config {
        Config {
            helo_domain: "verifier.example".to_string(),
            mail_from: "probe@verifier.example".to_string(),
            smtp_port: 25,
            dns_timeout_ms: 5_000,
            smtp_connect_timeout_ms: 10_000,
            smtp_read_timeout_ms: 15_000,
            probe_count: 2,
            caching_enabled: true,
            cache_ttl_ms: 3_600_000,
            max_cache_size: 100,
        }
    }

    fn rcpt_response(code: i32) -> Vec<SmtpResponse> {
        vec![SmtpResponse {
            code,
            message: "test".to_string(),
            phase: SmtpPhase::RcptTo,
        }]
    }

    #[tokio::test]
    async fn rejected_primary_short_circuits_without_probing() {
        let detector = CatchAllDetector::from_config(&config());
        // mail_host is unroutable; a probe session attempt would fail loudly,
        // but the 5xx pre-analysis must never get that far.
        let result = detector
            .analyze(&rcpt_response(550), "example.com", "192.0.2.1")
            .await;
        assert_eq!(result.confidence, CatchAllConfidence::NotDetected);
        assert_eq!(result.diagnostic.as_deref(), Some("server is selective"));
    }

    #[tokio::test]
    async fn rejected_primary_is_cached() {
        let detector = CatchAllDetector::from_config(&config());
        detector
            .analyze(&rcpt_response(550), "Example.COM", "192.0.2.1")
            .await;
        assert_eq!(detector.cache_stats().size, 1);
    }

    #[tokio::test]
    async fn missing_rcpt_response_is_indeterminate_and_uncached() {
        let detector = CatchAllDetector::from_config(&config());
        let result = detector.analyze(&[], "example.com", "192.0.2.1").await;
        assert_eq!(result.confidence, CatchAllConfidence::Indeterminate);
        assert_eq!(detector.cache_stats().size, 0);
    }

    #[tokio::test]
    async fn transient_primary_is_indeterminate_and_uncached() {
        let detector = CatchAllDetector::from_config(&config());
        let result = detector
            .analyze(&rcpt_response(451), "example.com", "192.0.2.1")
            .await;
        assert_eq!(result.confidence, CatchAllConfidence::Indeterminate);
        assert_eq!(detector.cache_stats().size, 0);
    }

    #[tokio::test]
    async fn accepted_primary_with_cached_verdict_skips_the_probe_session() {
        let detector = CatchAllDetector::from_config(&config());
        // Seed the cache directly; the unroutable mail host would make any
        // real probe session fail, proving no transport was opened.
        detector
            .cache
            .put("example.com", CatchAllDetectionResult::confirmed("all probes accepted"));

        let result = detector
            .analyze(&rcpt_response(250), "example.com", "192.0.2.1")
            .await;
        assert_eq!(result.confidence, CatchAllConfidence::Confirmed);
        assert_eq!(detector.cache_stats().hits, 1);
    }

    #[test]
    fn aggregate_any_rejection_means_selective() {
        let outcomes = vec![
            ProbeOutcome::Accepted,
            ProbeOutcome::Rejected,
            ProbeOutcome::Failed("oops".to_string()),
        ];
        let result = aggregate(&outcomes);
        assert_eq!(result.confidence, CatchAllConfidence::NotDetected);
    }

    #[test]
    fn aggregate_all_accepted_confirms() {
        let outcomes = vec![ProbeOutcome::Accepted, ProbeOutcome::Accepted];
        let result = aggregate(&outcomes);
        assert_eq!(result.confidence, CatchAllConfidence::Confirmed);
        assert_eq!(result.diagnostic.as_deref(), Some("all probes accepted"));
    }

    #[test]
    fn aggregate_all_failed_is_suspected() {
        let outcomes = vec![
            ProbeOutcome::Failed("io".to_string()),
            ProbeOutcome::Failed("io".to_string()),
        ];
        let result = aggregate(&outcomes);
        assert_eq!(result.confidence, CatchAllConfidence::Suspected);
        assert_eq!(
            result.diagnostic.as_deref(),
            Some("probes failed to complete")
        );
    }

    #[test]
    fn aggregate_mixed_accept_and_failure_is_suspected() {
        let outcomes = vec![
            ProbeOutcome::Accepted,
            ProbeOutcome::Failed("io".to_string()),
        ];
        let result = aggregate(&outcomes);
        assert_eq!(result.confidence, CatchAllConfidence::Suspected);
        assert_eq!(result.diagnostic.as_deref(), Some("mixed probe outcomes"));
    }

    #[test]
    fn probe_local_parts_are_distinct_and_well_formed() {
        let a = random_probe_local_part();
        let b = random_probe_local_part();
        assert_ne!(a, b);
        for token in [&a, &b] {
            assert!(token.starts_with("probe-"));
            // The random token itself carries no dashes.
            assert_eq!(token.matches('-').count(), 1);
            assert_eq!(token.len(), "probe-".len() + 32);
        }
    }

    #[test]
    fn sentinel_rcpt_code_reads_as_ambiguous() {
        let responses = rcpt_response(NO_RESPONSE_CODE);
        let rcpt = responses
            .iter()
            .find(|r| r.phase == SmtpPhase::RcptTo)
            .unwrap();
        assert!(!rcpt.is_positive_completion());
        assert!(!rcpt.is_permanent_failure());
    }
}
