//! # Error Handling
//!
//! Error types shared by every power-domain operation.
//!
//! ## Error Categories
//!
//! | Category  | Retry | Example                                          |
//! |-----------|-------|--------------------------------------------------|
//! | General   | No    | Self-link, duplicate link, unknown domain        |
//! | Retriable | Yes   | Subdomain still active, system transition active |
//! | Resource  | No    | Link or attachment allocation failed             |
//! | Hardware  | Maybe | Domain `power_on` callback failed                |
//! | Probe     | Later | Domain provider not registered yet               |
//! | Internal  | No    | Subdomain counter underflow                      |
//!
//! Retriable errors are never escalated: callers either back off and retry
//! (attach/detach) or wait for the next deferred power-off attempt.

use alloc::string::String;
use core::fmt;

use crate::domain::DomainId;

// =============================================================================
// ERROR KIND
// =============================================================================

/// Classification of power-domain errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorKind {
    // -------------------------------------------------------------------------
    // General Errors (0-99)
    // -------------------------------------------------------------------------
    /// Invalid domain, device, or link argument
    InvalidArgument      = 0,

    /// Object already exists (device already bound to a domain)
    AlreadyExists        = 1,

    /// Lookup failed
    NotFound             = 2,

    /// Device has no firmware node to resolve a domain from
    NoDevice             = 3,

    // -------------------------------------------------------------------------
    // Retriable Errors (100-199)
    // -------------------------------------------------------------------------
    /// A dependent subdomain or device still needs the domain
    Busy                 = 100,

    /// The governor vetoed the power-off for now
    TryLater             = 101,

    /// The domain is in the middle of a system sleep transition
    Unavailable          = 102,

    // -------------------------------------------------------------------------
    // Resource Errors (200-299)
    // -------------------------------------------------------------------------
    /// Allocation failed
    OutOfMemory          = 200,

    // -------------------------------------------------------------------------
    // Hardware Errors (300-399)
    // -------------------------------------------------------------------------
    /// Hardware callback reported a failure
    HardwareError        = 300,

    /// Hardware did not respond in time
    HardwareNotResponding = 301,

    // -------------------------------------------------------------------------
    // Probe Errors (400-499)
    // -------------------------------------------------------------------------
    /// Domain could not be resolved or powered yet; probe again later
    ProbeDefer           = 400,

    // -------------------------------------------------------------------------
    // Internal Errors (800-899)
    // -------------------------------------------------------------------------
    /// Subdomain counter would have gone negative
    CounterUnderflow     = 800,

    /// Internal error (bug)
    InternalError        = 801,
}

impl ErrorKind {
    /// Get the error category name
    pub const fn category(&self) -> &'static str {
        match *self as u32 {
            0..=99 => "General",
            100..=199 => "Retriable",
            200..=299 => "Resource",
            300..=399 => "Hardware",
            400..=499 => "Probe",
            800..=899 => "Internal",
            _ => "Unknown",
        }
    }

    /// Check if the caller is expected to simply try again later
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Busy | ErrorKind::TryLater | ErrorKind::Unavailable
        )
    }

    /// Check if the error points at a bug rather than a runtime condition
    pub const fn is_programming_error(&self) -> bool {
        matches!(self, ErrorKind::CounterUnderflow | ErrorKind::InternalError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// =============================================================================
// DOMAIN ERROR
// =============================================================================

/// Power-domain error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainError {
    /// Error classification
    kind: ErrorKind,

    /// Human-readable message
    message: &'static str,

    /// Optional detailed message (heap allocated)
    details: Option<String>,

    /// Domain the error was raised for
    domain: Option<DomainId>,
}

impl DomainError {
    /// Create new error with kind and message
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self {
            kind,
            message,
            details: None,
            domain: None,
        }
    }

    /// Create error from kind with default message
    pub const fn from_kind(kind: ErrorKind) -> Self {
        Self::new(kind, kind_to_message(kind))
    }

    /// Add details to error
    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }

    /// Add domain to error
    pub fn with_domain(mut self, domain: DomainId) -> Self {
        self.domain = Some(domain);
        self
    }

    /// Get error kind
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get message
    pub fn message(&self) -> &str {
        self.message
    }

    /// Get details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Get domain
    pub fn domain(&self) -> Option<DomainId> {
        self.domain
    }

    /// Check if retriable
    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }
}

impl From<ErrorKind> for DomainError {
    fn from(kind: ErrorKind) -> Self {
        Self::from_kind(kind)
    }
}

impl From<alloc::collections::TryReserveError> for DomainError {
    fn from(_: alloc::collections::TryReserveError) -> Self {
        Self::from_kind(ErrorKind::OutOfMemory)
    }
}

impl fmt::Display for DomainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.category(), self.message)?;

        if let Some(ref details) = self.details {
            write!(f, ": {}", details)?;
        }

        if let Some(domain) = self.domain {
            write!(f, " (domain: {})", domain)?;
        }

        Ok(())
    }
}

/// Get default message for error kind
const fn kind_to_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidArgument => "Invalid argument",
        ErrorKind::AlreadyExists => "Already exists",
        ErrorKind::NotFound => "Not found",
        ErrorKind::NoDevice => "No device node",
        ErrorKind::Busy => "Resource busy",
        ErrorKind::TryLater => "Try again later",
        ErrorKind::Unavailable => "Temporarily unavailable",
        ErrorKind::OutOfMemory => "Out of memory",
        ErrorKind::HardwareError => "Hardware error",
        ErrorKind::HardwareNotResponding => "Hardware not responding",
        ErrorKind::ProbeDefer => "Probe deferred",
        ErrorKind::CounterUnderflow => "Counter underflow",
        ErrorKind::InternalError => "Internal error",
    }
}

// =============================================================================
// RESULT TYPE
// =============================================================================

/// Result type for power-domain operations
pub type DomainResult<T> = Result<T, DomainError>;

// =============================================================================
// TESTS
// =============================================================================
