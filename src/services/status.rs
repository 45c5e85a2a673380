use std::fmt;

/// What the local terminal says about its upstream market data link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    Connected,
    Unverified,
    Disconnected,
    Error,
    /// Anything outside the documented vocabulary, kept verbatim (truncated).
    Unknown(String),
}

impl TerminalStatus {
    pub fn parse(body: &str) -> Self {
        match body.trim() {
            "CONNECTED" => TerminalStatus::Connected,
            "UNVERIFIED" => TerminalStatus::Unverified,
            "DISCONNECTED" => TerminalStatus::Disconnected,
            "ERROR" => TerminalStatus::Error,
            other => TerminalStatus::Unknown(other.chars().take(100).collect()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, TerminalStatus::Connected)
    }
}

impl fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalStatus::Connected => f.write_str("CONNECTED"),
            TerminalStatus::Unverified => f.write_str("UNVERIFIED"),
            TerminalStatus::Disconnected => f.write_str("DISCONNECTED"),
            TerminalStatus::Error => f.write_str("ERROR"),
            TerminalStatus::Unknown(text) => write!(f, "UNKNOWN ({text})"),
        }
    }
}
