//! Turns a recorded response sequence into a verification outcome.
//!
//! Interpretation is deliberately separated from the session: the dialogue
//! records, this module judges. The RCPT TO response is authoritative;
//! rejections earlier in the dialogue are treated as the server blocking the
//! probe (anti-verification measures), not as evidence about the mailbox.

use serde::{Deserialize, Serialize};

use super::session::{SmtpPhase, SmtpResponse};

/// How the server's responses read, taken together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SmtpOutcome {
    /// The recipient was accepted at RCPT TO.
    Accepted,
    /// The recipient was permanently rejected at RCPT TO.
    Rejected,
    /// Anything else: transient failures, blocks, malformed replies.
    Indeterminate,
}

/// Interpretation of one dialogue, with the phase whose response decided it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpVerificationResult {
    pub outcome: SmtpOutcome,
    pub decisive_phase: Option<SmtpPhase>,
    pub diagnostic: Option<String>,
}

impl SmtpVerificationResult {
    fn new(outcome: SmtpOutcome, decisive_phase: Option<SmtpPhase>, diagnostic: String) -> Self {
        SmtpVerificationResult {
            outcome,
            decisive_phase,
            diagnostic: Some(diagnostic),
        }
    }
}

/// Classifies a response sequence. Pure and deterministic: the same input
/// list always yields the same result.
pub fn interpret(responses: &[SmtpResponse]) -> SmtpVerificationResult {
    if responses.is_empty() {
        return SmtpVerificationResult::new(
            SmtpOutcome::Indeterminate,
            None,
            "Empty response collection".to_string(),
        );
    }

    // RCPT TO is authoritative when present; classify solely by its code.
    if let Some(rcpt) = responses.iter().find(|r| r.phase == SmtpPhase::RcptTo) {
        return match rcpt.code {
            200..=299 => SmtpVerificationResult::new(
                SmtpOutcome::Accepted,
                Some(SmtpPhase::RcptTo),
                format!("Recipient accepted: {} {}", rcpt.code, rcpt.message),
            ),
            400..=499 => SmtpVerificationResult::new(
                SmtpOutcome::Indeterminate,
                Some(SmtpPhase::RcptTo),
                format!(
                    "Transient failure at RCPT_TO: {} {}",
                    rcpt.code, rcpt.message
                ),
            ),
            500..=599 => SmtpVerificationResult::new(
                SmtpOutcome::Rejected,
                Some(SmtpPhase::RcptTo),
                format!("Recipient rejected: {} {}", rcpt.code, rcpt.message),
            ),
            _ => SmtpVerificationResult::new(
                SmtpOutcome::Indeterminate,
                Some(SmtpPhase::RcptTo),
                format!("Unrecognized RCPT_TO response: {}", rcpt.message),
            ),
        };
    }

    // No RCPT TO response: find where the dialogue was cut short. Any code
    // outside [200, 400) at an earlier phase reads as a block.
    for phase in [SmtpPhase::Greeting, SmtpPhase::Helo, SmtpPhase::MailFrom] {
        if let Some(response) = responses.iter().find(|r| r.phase == phase) {
            if !(200..400).contains(&response.code) {
                return SmtpVerificationResult::new(
                    SmtpOutcome::Indeterminate,
                    Some(phase),
                    format!(
                        "Session blocked at {}: {} {}",
                        phase, response.code, response.message
                    ),
                );
            }
        }
    }

    SmtpVerificationResult::new(
        SmtpOutcome::Indeterminate,
        responses.last().map(|r| r.phase),
        "Dialogue ended without a RCPT_TO response".to_string(),
    )
}
