//! Error types for configuration and registration surfaces.
//!
//! Emission itself never fails toward the caller. Everything that can go
//! wrong at runtime is absorbed at the sink boundary; the error type below
//! covers configuration loading and the process-wide registries, which do
//! report failures to the caller.

use std::fmt;

/// Errors surfaced by configuration loading and registry setup.
#[derive(Debug)]
pub enum Error {
    /// Severity name not recognized (built-in or registered).
    InvalidSeverity(String),
    /// Severity rank already taken by another named point.
    DuplicateSeverity(String, u8),
    /// Configuration document could not be parsed into the expected shape.
    InvalidConfig(String),
    /// A logger references a stream name that is not defined.
    UnknownStream(String),
    /// A format template names a decorator that is not registered.
    UnknownPlaceholder(String),
    /// A filter expression failed to parse.
    FilterSyntax(String),
    /// A filter expression calls a function that is not registered.
    UnknownFilterFn(String),
    /// Dispatcher or async streams form a reference cycle.
    CyclicDispatch(String),
    /// A user type registration collides with an existing id, or uses id 0.
    InvalidTypeId(u16),
    /// A decorator or filter function name is already registered.
    DuplicateName(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidSeverity(name) => {
                write!(f, "invalid severity: '{}'", name)
            }
            Error::DuplicateSeverity(name, rank) => {
                write!(f, "severity '{}' conflicts with existing rank {}", name, rank)
            }
            Error::InvalidConfig(details) => {
                write!(f, "invalid configuration: {}", details)
            }
            Error::UnknownStream(name) => {
                write!(f, "unknown stream: '{}'", name)
            }
            Error::UnknownPlaceholder(name) => {
                write!(f, "unknown format placeholder: '{{{}}}'", name)
            }
            Error::FilterSyntax(details) => {
                write!(f, "filter syntax error: {}", details)
            }
            Error::UnknownFilterFn(name) => {
                write!(f, "unknown filter function: '{}'", name)
            }
            Error::CyclicDispatch(name) => {
                write!(f, "cyclic dispatch through stream '{}'", name)
            }
            Error::InvalidTypeId(id) => {
                write!(f, "invalid or duplicate user type id: {}", id)
            }
            Error::DuplicateName(name) => {
                write!(f, "name already registered: '{}'", name)
            }
        }
    }
}

impl std::error::Error for Error {}

/// Result alias used throughout the crate's fallible surfaces.
pub type Result<T> = std::result::Result<T, Error>;
