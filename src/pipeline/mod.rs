//! Fail-fast orchestration of the verification stages.
//!
//! Syntax → DNS → SMTP dialogue → interpretation → catch-all analysis, with
//! each stage either producing input for the next or ending the run with a
//! final status. Interpretation stays conservative throughout: anything the
//! pipeline cannot prove lands in `Unknown` rather than a guess.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::detector::{CacheStats, CatchAllConfidence, CatchAllDetectionResult, CatchAllDetector};
use crate::dns::{DnsResolver, MxDnsResolver};
use crate::smtp::{interpret, SmtpOutcome, SmtpSession, TcpSmtpTransport};
use crate::syntax;

/// Final classification of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    /// Accepted by a server that demonstrably rejects unknown mailboxes.
    Valid,
    /// Accepted, but the server accepts every recipient at the domain.
    CatchAll,
    /// The address cannot receive mail as given.
    Invalid,
    /// The servers would not let the verification conclude.
    Unknown,
}

/// Everything the pipeline learned about one address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub address: String,
    pub status: VerificationStatus,
    pub syntax_valid: bool,
    pub domain_resolvable: bool,
    pub smtp_accepted: bool,
    pub catch_all_confidence: CatchAllConfidence,
    pub diagnostic: Option<String>,
}

impl VerificationResult {
    fn invalid_syntax(address: &str) -> Self {
        VerificationResult {
            address: address.to_string(),
            status: VerificationStatus::Invalid,
            syntax_valid: false,
            domain_resolvable: false,
            smtp_accepted: false,
            catch_all_confidence: CatchAllConfidence::NotDetected,
            diagnostic: Some("Invalid email syntax".to_string()),
        }
    }

    fn unresolvable_domain(address: &str) -> Self {
        VerificationResult {
            address: address.to_string(),
            status: VerificationStatus::Invalid,
            syntax_valid: true,
            domain_resolvable: false,
            smtp_accepted: false,
            catch_all_confidence: CatchAllConfidence::NotDetected,
            diagnostic: Some("Domain has no valid MX/A mail hosts".to_string()),
        }
    }

    fn transport_failure(address: &str, detail: String) -> Self {
        VerificationResult {
            address: address.to_string(),
            status: VerificationStatus::Unknown,
            syntax_valid: true,
            domain_resolvable: true,
            smtp_accepted: false,
            catch_all_confidence: CatchAllConfidence::Indeterminate,
            diagnostic: Some(format!("SMTP transport failure: {detail}")),
        }
    }
}

/// The stage orchestrator. One instance serves any number of concurrent
/// `verify` calls; the detector's cache is the only shared state.
pub struct VerificationPipeline<D: DnsResolver> {
    config: Config,
    dns: D,
    detector: CatchAllDetector,
}

impl VerificationPipeline<MxDnsResolver> {
    /// Builds a pipeline with the system-configured DNS resolver.
    pub fn new(config: Config) -> Self {
        let dns = MxDnsResolver::new(config.dns_timeout());
        Self::with_resolver(config, dns)
    }
}

impl<D: DnsResolver> VerificationPipeline<D> {
    /// Builds a pipeline over a caller-supplied resolver (used by tests).
    pub fn with_resolver(config: Config, dns: D) -> Self {
        let detector = CatchAllDetector::from_config(&config);
        VerificationPipeline {
            config,
            dns,
            detector,
        }
    }

    /// Cache counters of the underlying catch-all detector.
    pub fn cache_stats(&self) -> CacheStats {
        self.detector.cache_stats()
    }

    /// Runs all stages for `address` and returns the fused classification.
    ///
    /// Never fails: every error mode is folded into the returned status.
    pub async fn verify(&self, address: &str) -> VerificationResult {
        info!("Verifying address: {}", address);

        // Stage 1: syntax. A malformed address never touches the network.
        let syntax_result = syntax::validate(address);
        if !syntax_result.valid {
            debug!("Syntax rejected {}: {}", address, syntax_result.message);
            return VerificationResult::invalid_syntax(address);
        }
        let domain = match syntax_result.domain {
            Some(domain) => domain,
            None => return VerificationResult::invalid_syntax(address),
        };

        // Stage 2: DNS.
        let dns_result = self.dns.resolve(&domain).await;
        let mail_host = match dns_result.primary_mail_host() {
            Some(host) => host.to_string(),
            None => {
                debug!(
                    "No mail hosts for {} ({:?}): {:?}",
                    domain, dns_result.status, dns_result.error
                );
                return VerificationResult::unresolvable_domain(address);
            }
        };

        // Stage 3: the SMTP dialogue.
        let transport = match TcpSmtpTransport::connect(
            &mail_host,
            self.config.smtp_port,
            self.config.connect_timeout(),
            self.config.read_timeout(),
        )
        .await
        {
            Ok(transport) => transport,
            Err(e) => return VerificationResult::transport_failure(address, e.to_string()),
        };
        let session = SmtpSession::new(transport, &self.config.helo_domain, &self.config.mail_from);
        let responses = match session.verify(address).await {
            Ok(responses) => responses,
            Err(e) => return VerificationResult::transport_failure(address, e.to_string()),
        };

        // Stage 4: interpretation.
        let interpretation = interpret(&responses);
        debug!(
            "Interpretation for {}: {:?} (decisive: {:?})",
            address, interpretation.outcome, interpretation.decisive_phase
        );

        // Stage 5: behavioral analysis, only after an acceptance.
        let catch_all = match interpretation.outcome {
            SmtpOutcome::Accepted => {
                self.detector
                    .analyze(&responses, &domain, &mail_host)
                    .await
            }
            _ => CatchAllDetectionResult::not_detected("Primary verification rejected"),
        };

        // Stage 6: fuse the signals.
        let result = match (interpretation.outcome, catch_all.confidence) {
            (SmtpOutcome::Accepted, CatchAllConfidence::Confirmed) => VerificationResult {
                address: address.to_string(),
                status: VerificationStatus::CatchAll,
                syntax_valid: true,
                domain_resolvable: true,
                smtp_accepted: true,
                catch_all_confidence: CatchAllConfidence::Confirmed,
                diagnostic: catch_all.diagnostic.or(interpretation.diagnostic),
            },
            (SmtpOutcome::Accepted, confidence) => VerificationResult {
                address: address.to_string(),
                status: VerificationStatus::Valid,
                syntax_valid: true,
                domain_resolvable: true,
                smtp_accepted: true,
                catch_all_confidence: confidence,
                diagnostic: interpretation.diagnostic,
            },
            (SmtpOutcome::Rejected, _) => VerificationResult {
                address: address.to_string(),
                status: VerificationStatus::Invalid,
                syntax_valid: true,
                domain_resolvable: true,
                smtp_accepted: false,
                catch_all_confidence: CatchAllConfidence::NotDetected,
                diagnostic: interpretation.diagnostic,
            },
            (SmtpOutcome::Indeterminate, _) => VerificationResult {
                address: address.to_string(),
                status: VerificationStatus::Unknown,
                syntax_valid: true,
                domain_resolvable: true,
                smtp_accepted: false,
                catch_all_confidence: CatchAllConfidence::Indeterminate,
                diagnostic: interpretation.diagnostic,
            },
        };

        info!("Verification of {} finished: {:?}", address, result.status);
        result
    }
}
