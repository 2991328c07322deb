//! Hardened negotiation state, shared by upload-pack and receive-pack.
//!
//! Every negotiating request threads a context carrying the configured
//! limits and a deadline. Once a limit trips or the deadline passes, the
//! context is aborted and every later call short-circuits.

use std::time::{Duration, Instant};

use strata_hash::ObjectId;

use crate::capability::validate_capability;
use crate::ProtocolError;

/// Per-negotiation limits.
#[derive(Debug, Clone)]
pub struct NegotiationLimits {
    pub max_rounds: u32,
    pub max_wants: usize,
    pub max_haves: usize,
    pub timeout_ms: u64,
    pub max_capabilities: usize,
    pub max_ref_length: usize,
    /// Reject unknown capability names instead of just reporting them.
    pub strict_capabilities: bool,
}

impl Default for NegotiationLimits {
    fn default() -> Self {
        Self {
            max_rounds: 50,
            max_wants: 1000,
            max_haves: 10_000,
            timeout_ms: 120_000,
            max_capabilities: 100,
            max_ref_length: 4096,
            strict_capabilities: false,
        }
    }
}

/// Why a context aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    MaxRounds,
    MaxWants,
    MaxHaves,
    MaxCapabilities,
    Timeout,
}

impl AbortReason {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MaxRounds => "MAX_ROUNDS_EXCEEDED",
            Self::MaxWants => "MAX_WANTS_EXCEEDED",
            Self::MaxHaves => "MAX_HAVES_EXCEEDED",
            Self::MaxCapabilities => "MAX_CAPABILITIES_EXCEEDED",
            Self::Timeout => "NEGOTIATION_TIMEOUT",
        }
    }
}

/// State of one negotiation.
pub struct NegotiationContext {
    limits: NegotiationLimits,
    deadline: Instant,
    rounds: u32,
    wants: Vec<ObjectId>,
    haves: Vec<ObjectId>,
    capabilities: Vec<String>,
    unknown_capabilities: Vec<String>,
    aborted: Option<AbortReason>,
}

impl NegotiationContext {
    pub fn new(limits: NegotiationLimits) -> Self {
        let deadline = Instant::now() + Duration::from_millis(limits.timeout_ms);
        Self {
            limits,
            deadline,
            rounds: 0,
            wants: Vec::new(),
            haves: Vec::new(),
            capabilities: Vec::new(),
            unknown_capabilities: Vec::new(),
            aborted: None,
        }
    }

    pub fn limits(&self) -> &NegotiationLimits {
        &self.limits
    }

    pub fn wants(&self) -> &[ObjectId] {
        &self.wants
    }

    pub fn haves(&self) -> &[ObjectId] {
        &self.haves
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    /// Capability names seen but not understood (lenient mode).
    pub fn unknown_capabilities(&self) -> &[String] {
        &self.unknown_capabilities
    }

    pub fn abort_reason(&self) -> Option<AbortReason> {
        self.aborted
    }

    fn abort(&mut self, reason: AbortReason) -> ProtocolError {
        self.aborted = Some(reason);
        match reason {
            AbortReason::Timeout => ProtocolError::Timeout,
            AbortReason::MaxRounds => ProtocolError::LimitExceeded("MAX_ROUNDS_EXCEEDED"),
            AbortReason::MaxWants => ProtocolError::LimitExceeded("MAX_WANTS_EXCEEDED"),
            AbortReason::MaxHaves => ProtocolError::LimitExceeded("MAX_HAVES_EXCEEDED"),
            AbortReason::MaxCapabilities => {
                ProtocolError::LimitExceeded("MAX_CAPABILITIES_EXCEEDED")
            }
        }
    }

    fn check_live(&mut self) -> Result<(), ProtocolError> {
        if let Some(reason) = self.aborted {
            return Err(match reason {
                AbortReason::Timeout => ProtocolError::Timeout,
                other => ProtocolError::LimitExceeded(other.code()),
            });
        }
        if Instant::now() >= self.deadline {
            return Err(self.abort(AbortReason::Timeout));
        }
        Ok(())
    }

    /// Count one negotiation round.
    pub fn validate_round(&mut self) -> Result<(), ProtocolError> {
        self.check_live()?;
        self.rounds += 1;
        if self.rounds > self.limits.max_rounds {
            return Err(self.abort(AbortReason::MaxRounds));
        }
        Ok(())
    }

    pub fn record_want(&mut self, sha: &str) -> Result<ObjectId, ProtocolError> {
        self.check_live()?;
        if self.wants.len() >= self.limits.max_wants {
            return Err(self.abort(AbortReason::MaxWants));
        }
        let id = parse_wire_sha(sha)?;
        self.wants.push(id);
        Ok(id)
    }

    pub fn record_have(&mut self, sha: &str) -> Result<ObjectId, ProtocolError> {
        self.check_live()?;
        if self.haves.len() >= self.limits.max_haves {
            return Err(self.abort(AbortReason::MaxHaves));
        }
        let id = parse_wire_sha(sha)?;
        self.haves.push(id);
        Ok(id)
    }

    /// Record and validate a capability token.
    pub fn record_capability(&mut self, token: &str) -> Result<(), ProtocolError> {
        self.check_live()?;
        if self.capabilities.len() >= self.limits.max_capabilities {
            return Err(self.abort(AbortReason::MaxCapabilities));
        }
        let known = validate_capability(token, self.limits.strict_capabilities)?;
        if !known {
            let name = token.split('=').next().unwrap_or(token);
            self.unknown_capabilities.push(name.to_string());
        }
        self.capabilities.push(token.to_string());
        Ok(())
    }

    /// Enforce the ref-line length limit on a raw request line.
    pub fn validate_line_length(&mut self, line: &[u8]) -> Result<(), ProtocolError> {
        self.check_live()?;
        if line.len() > self.limits.max_ref_length {
            return Err(ProtocolError::RefLineTooLong(line.len()));
        }
        Ok(())
    }
}

/// A wire object id: exactly 40 or 64 hex digits, any case.
pub fn parse_wire_sha(sha: &str) -> Result<ObjectId, ProtocolError> {
    if sha.len() != 40 && sha.len() != 64 {
        return Err(ProtocolError::InvalidSha(sha.to_string()));
    }
    ObjectId::from_hex(sha).map_err(|_| ProtocolError::InvalidSha(sha.to_string()))
}
