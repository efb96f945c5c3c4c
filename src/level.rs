//! Severity levels.
//!
//! Severities are totally ordered by an integer rank. The built-in points
//! leave gaps between their ranks so configuration can register additional
//! named points between them (for example a `FATAL` above `CRITICAL` or an
//! `AUDIT` between `NOTICE` and `WARNING`).

use ahash::AHashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::fmt;

use crate::error::{Error, Result};

/// A severity level, ordered by integer rank.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Severity(u8);

impl Severity {
    pub const TRACE: Severity = Severity(10);
    pub const DEBUG: Severity = Severity(20);
    pub const INFO: Severity = Severity(30);
    pub const NOTICE: Severity = Severity(40);
    pub const WARNING: Severity = Severity(50);
    pub const ERROR: Severity = Severity(60);
    pub const CRITICAL: Severity = Severity(70);

    /// Build a severity from a raw rank. Useful for decoding frames and for
    /// configuration-registered points.
    #[inline]
    pub const fn from_rank(rank: u8) -> Severity {
        Severity(rank)
    }

    /// The integer rank that defines this severity's position in the order.
    #[inline]
    pub const fn rank(self) -> u8 {
        self.0
    }

    /// Parse a severity name, case-insensitive. Built-in names are checked
    /// first, then configuration-registered points.
    pub fn parse(name: &str) -> Result<Severity> {
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "TRACE" => Ok(Severity::TRACE),
            "DEBUG" => Ok(Severity::DEBUG),
            "INFO" => Ok(Severity::INFO),
            "NOTICE" => Ok(Severity::NOTICE),
            "WARNING" | "WARN" => Ok(Severity::WARNING),
            "ERROR" => Ok(Severity::ERROR),
            "CRITICAL" => Ok(Severity::CRITICAL),
            _ => {
                let table = EXTRA.read();
                table
                    .by_name
                    .get(&upper)
                    .copied()
                    .map(Severity)
                    .ok_or(Error::InvalidSeverity(name.to_string()))
            }
        }
    }

    /// Register an additional named severity point at the given rank.
    ///
    /// Fails if the rank collides with a built-in or already-registered
    /// point under a different name. Re-registering the same name at the
    /// same rank is a no-op.
    pub fn register(name: &str, rank: u8) -> Result<()> {
        let upper = name.to_ascii_uppercase();
        if builtin_name(rank).is_some() {
            return Err(Error::DuplicateSeverity(upper, rank));
        }
        let mut table = EXTRA.write();
        if let Some(existing) = table.by_name.get(&upper) {
            if *existing == rank {
                return Ok(());
            }
            return Err(Error::DuplicateSeverity(upper, *existing));
        }
        if let Some(taken) = table.by_rank.get(&rank) {
            return Err(Error::DuplicateSeverity(taken.clone(), rank));
        }
        table.by_rank.insert(rank, upper.clone());
        table.by_name.insert(upper, rank);
        Ok(())
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = builtin_name(self.0) {
            return f.write_str(name);
        }
        let table = EXTRA.read();
        match table.by_rank.get(&self.0) {
            Some(name) => f.write_str(name),
            None => write!(f, "SEV{}", self.0),
        }
    }
}

fn builtin_name(rank: u8) -> Option<&'static str> {
    match rank {
        10 => Some("TRACE"),
        20 => Some("DEBUG"),
        30 => Some("INFO"),
        40 => Some("NOTICE"),
        50 => Some("WARNING"),
        60 => Some("ERROR"),
        70 => Some("CRITICAL"),
        _ => None,
    }
}

#[derive(Default)]
struct ExtraLevels {
    by_name: AHashMap<String, u8>,
    by_rank: AHashMap<u8, String>,
}

static EXTRA: Lazy<RwLock<ExtraLevels>> = Lazy::new(|| RwLock::new(ExtraLevels::default()));
