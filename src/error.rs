//! Error types for the EtherNet/IP and CIP layers.

use std::io;
use thiserror::Error;

/// Result type alias for EtherNet/IP operations.
pub type Result<T> = std::result::Result<T, EnipError>;

/// Errors that can occur during EtherNet/IP communication.
#[derive(Debug, Error)]
pub enum EnipError {
    /// A buffer could not be decoded (too short, bad length, unknown code).
    #[error("Framing error: {reason}")]
    Framing {
        /// Description of the framing problem.
        reason: String,
    },

    /// Non-zero CIP general status returned by the target.
    #[error("CIP error on service 0x{service:02X}: status 0x{status:02X} ({message})")]
    Cip {
        /// Service code of the failing request (without the reply bit).
        service: u8,
        /// General status code (CIP Vol 1, Appendix B).
        status: u8,
        /// Extended status words.
        extended: Vec<u16>,
        /// Human readable description of the general status.
        message: String,
    },

    /// Non-zero encapsulation status returned by the target.
    #[error("Encapsulation error 0x{status:02X}: {message}")]
    Encapsulation {
        /// Encapsulation status code.
        status: u32,
        /// Human readable description.
        message: String,
    },

    /// No reply arrived before the operation's deadline.
    #[error("Timeout while waiting for {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
    },

    /// Invalid parameter provided.
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// Name of the invalid parameter.
        parameter: String,
        /// Description of why the parameter is invalid.
        reason: String,
    },

    /// Tag name rejected by the tag name grammar.
    #[error("Invalid tag name '{name}': {reason}")]
    InvalidTagName {
        /// The rejected tag name.
        name: String,
        /// Why the name was rejected.
        reason: String,
    },

    /// A template member references a type that is not registered.
    #[error("Unresolved type reference '{reference}' in template '{template}'")]
    UnresolvedType {
        /// Template being resolved.
        template: String,
        /// The missing type reference.
        reference: String,
    },

    /// Session or Class 3 connection required but not established.
    #[error("Not connected: {reason}")]
    NotConnected {
        /// What is missing.
        reason: String,
    },

    /// Task queue is at capacity.
    #[error("Task queue full (capacity {capacity})")]
    QueueFull {
        /// Configured capacity of the queue.
        capacity: usize,
    },

    /// The session was closed while a request was pending.
    #[error("Session closed")]
    SessionClosed,

    /// I/O error during communication.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl EnipError {
    /// Creates a new `Framing` error.
    ///
    /// # Example
    ///
    /// ```
    /// use enip_cip::EnipError;
    ///
    /// let err = EnipError::framing("reply too short");
    /// assert_eq!(err.to_string(), "Framing error: reply too short");
    /// ```
    pub fn framing(reason: impl Into<String>) -> Self {
        Self::Framing {
            reason: reason.into(),
        }
    }

    /// Creates a new `Cip` error with the standard description of `status`.
    pub fn cip(service: u8, status: u8, extended: Vec<u16>) -> Self {
        Self::Cip {
            service,
            status,
            extended,
            message: cip_status_description(status).to_string(),
        }
    }

    /// Creates a new `Encapsulation` error.
    pub fn encapsulation(status: u32) -> Self {
        Self::Encapsulation {
            status,
            message: crate::encapsulation::status_description(status),
        }
    }

    /// Creates a new `Timeout` error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates a new `InvalidParameter` error.
    ///
    /// # Example
    ///
    /// ```
    /// use enip_cip::EnipError;
    ///
    /// let err = EnipError::invalid_parameter("rpi", "must be at least 8000us");
    /// ```
    pub fn invalid_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `InvalidTagName` error.
    pub fn invalid_tag_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTagName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new `NotConnected` error.
    pub fn not_connected(reason: impl Into<String>) -> Self {
        Self::NotConnected {
            reason: reason.into(),
        }
    }

    /// Returns whether the caller may simply retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::QueueFull { .. })
    }

    /// Returns the CIP general status if this is a CIP error.
    pub fn cip_status(&self) -> Option<u8> {
        match self {
            Self::Cip { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Returns the description of a CIP general status code (Vol 1, Appendix B).
pub fn cip_status_description(status: u8) -> &'static str {
    match status {
        0x00 => "Success",
        0x01 => "Connection failure",
        0x02 => "Resource unavailable",
        0x03 => "Invalid parameter value",
        0x04 => "Path segment error",
        0x05 => "Path destination unknown",
        0x06 => "Partial transfer",
        0x07 => "Connection lost",
        0x08 => "Service not supported",
        0x09 => "Invalid attribute value",
        0x0A => "Attribute list error",
        0x0B => "Already in requested mode/state",
        0x0C => "Object state conflict",
        0x0D => "Object already exists",
        0x0E => "Attribute not settable",
        0x0F => "Privilege violation",
        0x10 => "Device state conflict",
        0x11 => "Reply data too large",
        0x12 => "Fragmentation of a primitive value",
        0x13 => "Not enough data",
        0x14 => "Attribute not supported",
        0x15 => "Too much data",
        0x16 => "Object does not exist",
        0x17 => "Service fragmentation sequence not in progress",
        0x18 => "No stored attribute data",
        0x19 => "Store operation failure",
        0x1A => "Routing failure, request packet too large",
        0x1B => "Routing failure, response packet too large",
        0x1C => "Missing attribute list entry data",
        0x1D => "Invalid attribute value list",
        0x1E => "Embedded service error",
        0x1F => "Vendor specific error",
        0x20 => "Invalid parameter",
        0x21 => "Write-once value or medium already written",
        0x22 => "Invalid reply received",
        0x25 => "Key failure in path",
        0x26 => "Path size invalid",
        0x27 => "Unexpected attribute in list",
        0x28 => "Invalid member ID",
        0x29 => "Member not settable",
        0x2A => "Group 2 only server general failure",
        0x2B => "Unknown Modbus error",
        _ => "Unknown CIP status",
    }
}
