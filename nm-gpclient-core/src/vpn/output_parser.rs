//! Pattern-based scanner for gpclient output
//!
//! The tunnel is confirmed by interface discovery, not by output, so these
//! classifications only feed logging and the choice of failure reason.

use regex::Regex;

/// What a single gpclient output line says
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOutput {
    /// The client reports the tunnel as established
    TunnelUp,

    /// The client reports that authentication was rejected
    AuthFailure,

    /// Anything else
    Other,
}

/// Scanner for gpclient stdout/stderr lines
pub struct OutputScanner {
    /// "ESP tunnel connected", "Connected to ...", "Tunnel is up", "VPN connected"
    tunnel_up_pattern: Regex,
    /// Portal/gateway rejecting the login or SAML flow
    auth_failed_pattern: Regex,
}

impl OutputScanner {
    /// Create a new OutputScanner with compiled regex patterns
    pub fn new() -> Self {
        Self {
            tunnel_up_pattern: Regex::new(
                r"ESP tunnel connected|Connected to|Tunnel is up|VPN connected",
            )
            .expect("Failed to compile tunnel_up pattern"),
            auth_failed_pattern: Regex::new(
                r"(?i)authentication failed|failed to authenticate|login failed|invalid (?:username|password|credentials)|saml authentication failed",
            )
            .expect("Failed to compile auth_failed pattern"),
        }
    }

    /// Classify a line of client output
    pub fn scan(&self, line: &str) -> ClientOutput {
        if self.auth_failed_pattern.is_match(line) {
            return ClientOutput::AuthFailure;
        }

        if self.tunnel_up_pattern.is_match(line) {
            return ClientOutput::TunnelUp;
        }

        ClientOutput::Other
    }
}

impl Default for OutputScanner {
    fn default() -> Self {
        Self::new()
    }
}
