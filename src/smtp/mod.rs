//! Client-side SMTP machinery: transport, dialogue session, and response
//! interpretation.
//!
//! The three layers are strictly separated. The transport speaks lines over
//! one TCP connection, the session walks the fixed verification dialogue and
//! records phase-tagged responses, and the interpreter classifies what was
//! recorded. The pipeline wires them together per verification call.

mod interpreter;
mod session;
mod transport;

pub use interpreter::{interpret, SmtpOutcome, SmtpVerificationResult};
pub(crate) use session::parse_response;
pub use session::{SmtpPhase, SmtpResponse, SmtpSession, NO_RESPONSE_CODE};
pub use transport::{SmtpTransport, TcpSmtpTransport, TransportError};
