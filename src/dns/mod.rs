//! Resolves the mail hosts responsible for a domain.
//!
//! MX records are preferred; a domain with no MX but a resolvable A/AAAA
//! record falls back to the domain itself, per RFC 5321's implicit MX rule.
//! The resolver is behind a trait so the pipeline can be driven against
//! stub implementations in tests.

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::system_conf::read_system_conf;
use hickory_resolver::TokioAsyncResolver;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a lookup concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DnsStatus {
    /// One or more MX records answered for the domain.
    MxFound,
    /// No MX records, but the domain itself resolves; implicit MX applies.
    FallbackARecord,
    /// The domain does not exist.
    Nxdomain,
    /// The lookup did not complete in time.
    Timeout,
    /// Any other resolution failure.
    Failure,
}

/// Resolution outcome handed to the pipeline.
///
/// `mail_hosts` is non-empty exactly when `status` is `MxFound` or
/// `FallbackARecord`; hosts are ordered by arrival and the pipeline contacts
/// only the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsResolutionResult {
    pub status: DnsStatus,
    pub mail_hosts: Vec<String>,
    pub error: Option<String>,
}

impl DnsResolutionResult {
    pub fn mx_found(mail_hosts: Vec<String>) -> Self {
        DnsResolutionResult {
            status: DnsStatus::MxFound,
            mail_hosts,
            error: None,
        }
    }

    pub fn fallback_a_record(domain: &str) -> Self {
        DnsResolutionResult {
            status: DnsStatus::FallbackARecord,
            mail_hosts: vec![domain.to_string()],
            error: None,
        }
    }

    pub fn nxdomain(domain: &str) -> Self {
        DnsResolutionResult {
            status: DnsStatus::Nxdomain,
            mail_hosts: Vec::new(),
            error: Some(format!("domain {domain} does not exist")),
        }
    }

    pub fn timeout(detail: String) -> Self {
        DnsResolutionResult {
            status: DnsStatus::Timeout,
            mail_hosts: Vec::new(),
            error: Some(detail),
        }
    }

    pub fn failure(detail: String) -> Self {
        DnsResolutionResult {
            status: DnsStatus::Failure,
            mail_hosts: Vec::new(),
            error: Some(detail),
        }
    }

    pub fn has_mail_hosts(&self) -> bool {
        !self.mail_hosts.is_empty()
    }

    /// The host the pipeline contacts: `mail_hosts[0]`.
    pub fn primary_mail_host(&self) -> Option<&str> {
        self.mail_hosts.first().map(String::as_str)
    }
}

/// Interface the pipeline consumes; implemented by [`MxDnsResolver`] and by
/// test stubs.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> DnsResolutionResult;
}

/// MX/A resolution backed by `hickory-resolver` and the system DNS
/// configuration.
pub struct MxDnsResolver {
    resolver: TokioAsyncResolver,
}

impl MxDnsResolver {
    /// Builds a resolver from `/etc/resolv.conf` (falling back to defaults)
    /// with every lookup bounded by `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let (config, mut opts) = read_system_conf().unwrap_or_else(|e| {
            warn!("Could not read system DNS config, using defaults: {}", e);
            (ResolverConfig::default(), ResolverOpts::default())
        });
        opts.timeout = timeout;

        MxDnsResolver {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }

    async fn fallback_to_address_record(&self, domain: &str) -> DnsResolutionResult {
        match self.resolver.lookup_ip(domain).await {
            Ok(lookup) if lookup.iter().next().is_some() => {
                debug!("No MX for {}, using A/AAAA fallback", domain);
                DnsResolutionResult::fallback_a_record(domain)
            }
            Ok(_) => DnsResolutionResult::failure(format!("domain {domain} has no A/AAAA records")),
            Err(e) => classify_error(domain, &e),
        }
    }
}

#[async_trait]
impl DnsResolver for MxDnsResolver {
    async fn resolve(&self, domain: &str) -> DnsResolutionResult {
        match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => {
                // Arrival order; preference-based tie-breaking is not needed
                // since only mail_hosts[0] is contacted.
                let hosts: Vec<String> = lookup
                    .iter()
                    .map(|mx| normalize_host(&mx.exchange().to_utf8()))
                    .collect();
                if hosts.is_empty() {
                    return self.fallback_to_address_record(domain).await;
                }
                trace!("MX records for {}: {:?}", domain, hosts);
                DnsResolutionResult::mx_found(hosts)
            }
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { response_code, .. }
                    if *response_code != ResponseCode::NXDomain =>
                {
                    self.fallback_to_address_record(domain).await
                }
                _ => classify_error(domain, &e),
            },
        }
    }
}

fn classify_error(domain: &str, error: &ResolveError) -> DnsResolutionResult {
    match error.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. }
            if *response_code == ResponseCode::NXDomain =>
        {
            DnsResolutionResult::nxdomain(domain)
        }
        ResolveErrorKind::NoRecordsFound { .. } => {
            DnsResolutionResult::failure(format!("no usable records for {domain}"))
        }
        ResolveErrorKind::Timeout => {
            DnsResolutionResult::timeout(format!("DNS lookup for {domain} timed out"))
        }
        _ => DnsResolutionResult::failure(format!("DNS lookup for {domain} failed: {error}")),
    }
}

/// MX exchange names arrive in FQDN form (`mx1.example.com.`); strip the
/// trailing root dot.
fn normalize_host(host: &str) -> String {
    host.trim_end_matches('.').to_string()
}
