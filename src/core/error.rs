//! # Core Error Module
//!
//! This module defines the central `NgError` type used throughout the library.
//! It leverages `thiserror` for error message formatting and `serde` for serialization.

use serde::Serialize;
use thiserror::Error;

/// Central error type for the `rs_faas_ng` library.
#[derive(Debug, Error, Serialize)]
pub enum NgError {
    /// Error related to configuration loading, merging or validation.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Error related to internal logic or state.
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Standard HTTP request or network failure.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The credential endpoint refused to issue a token, or issued a body without one.
    #[error("Authentication failed at {endpoint} (HTTP {status}): {details}")]
    AuthError {
        /// The token endpoint URL.
        endpoint: String,
        /// The HTTP status code of the last attempt (0 when no response was received).
        status: u16,
        /// Body snippet or description of what was missing.
        details: String,
    },

    /// The report endpoint refused to create a ticket, or answered without one.
    #[error("Ticket request failed at {endpoint} (HTTP {status}): {details}")]
    TicketError {
        /// The report endpoint URL.
        endpoint: String,
        /// The HTTP status code of the last attempt (0 when no response was received).
        status: u16,
        /// Body snippet or description of what was missing.
        details: String,
    },

    /// Error returned when a response that must be JSON is not.
    #[error("Non-JSON content from {url}. Status: {status}")]
    NonJsonResponse {
        /// The target URL that was requested.
        url: String,
        /// The HTTP status code received.
        status: u16,
        /// A snippet of the response body for diagnostic purposes.
        body_snippet: String,
    },

    /// Error returned when the JSON structure is missing expected mandatory fields.
    #[error("Malformed API response structure at {endpoint}: {details}")]
    MalformedResponse {
        /// The endpoint URL that was called.
        endpoint: String,
        /// Description of why the structure was considered malformed.
        details: String,
    },

    /// A page terminated in the `Failed` state: the server reported an error for the job.
    #[error("Polling failed for ticket {ticket} page {page}: {reason}")]
    PollFailed {
        ticket: String,
        page: u32,
        reason: String,
    },

    /// A page ran out of attempts or wall-clock time without a terminal answer.
    #[error("Polling exhausted for ticket {ticket} page {page} after {attempts} attempts ({elapsed_ms} ms): {last_error}")]
    PollExhausted {
        ticket: String,
        page: u32,
        attempts: u32,
        elapsed_ms: u64,
        last_error: String,
    },

    /// The business date was rejected before any network call.
    #[error("Invalid business date: {0}")]
    InvalidDate(String),

    /// File-system failure while persisting artifacts.
    #[error("I/O error: {0}")]
    IoError(String),

    /// A downloaded archive could not be opened or extracted.
    #[error("Archive error: {0}")]
    ArchiveError(String),
}

impl From<std::io::Error> for NgError {
    fn from(e: std::io::Error) -> Self {
        NgError::IoError(e.to_string())
    }
}

impl From<zip::result::ZipError> for NgError {
    fn from(e: zip::result::ZipError) -> Self {
        NgError::ArchiveError(e.to_string())
    }
}
