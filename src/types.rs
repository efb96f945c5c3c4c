//! Process-wide registry of user-defined component types.
//!
//! Entries map a small integer id to the functions that encode a captured
//! payload onto the wire, decode a wire payload into printable text, and
//! classify it. Registration is append-only: entries are immutable once
//! registered and duplicate ids fail. Id 0 is reserved for "invalid".

use ahash::AHashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Attributes reported by a type's classify function.
#[derive(Clone, Copy, Debug, Default)]
pub struct Attributes {
    /// The decoded form is plain single-line text.
    pub printable: bool,
    /// The payload should be withheld from untrusted outputs.
    pub sensitive: bool,
}

/// A registered user component type.
///
/// `encoded_len` declares how many wire bytes `encode` will produce for a
/// captured payload; `encode` then writes into a slice of exactly that
/// length and returns the count actually written. Writing more than
/// declared is a contract violation: the slice bound truncates it in
/// release builds and a debug assertion fires in debug builds.
#[derive(Clone, Copy)]
pub struct UserType {
    pub id: u16,
    pub name: &'static str,
    pub encoded_len: fn(raw: &[u8]) -> usize,
    pub encode: fn(raw: &[u8], out: &mut [u8]) -> usize,
    pub decode: fn(wire: &[u8]) -> String,
    pub classify: fn(wire: &[u8]) -> Attributes,
}

static REGISTRY: Lazy<RwLock<AHashMap<u16, UserType>>> =
    Lazy::new(|| RwLock::new(AHashMap::new()));

/// Register a user type. Fails on id 0 and on duplicate ids.
pub fn register_type(entry: UserType) -> Result<()> {
    if entry.id == 0 {
        return Err(Error::InvalidTypeId(0));
    }
    let mut table = REGISTRY.write();
    if table.contains_key(&entry.id) {
        return Err(Error::InvalidTypeId(entry.id));
    }
    table.insert(entry.id, entry);
    Ok(())
}

pub(crate) fn lookup(id: u16) -> Option<UserType> {
    REGISTRY.read().get(&id).copied()
}

/// Wire length a user payload will occupy, as declared by its type entry.
/// Unregistered ids fall back to carrying the captured bytes verbatim.
pub(crate) fn wire_len(id: u16, raw: &[u8]) -> usize {
    match lookup(id) {
        Some(entry) => (entry.encoded_len)(raw),
        None => raw.len(),
    }
}

/// Encode a user payload into `out`, which has exactly the declared wire
/// length. Returns the number of bytes written.
pub(crate) fn encode(id: u16, raw: &[u8], out: &mut [u8]) -> usize {
    match lookup(id) {
        Some(entry) => {
            let written = (entry.encode)(raw, out);
            debug_assert!(
                written <= out.len(),
                "user type {} wrote {} bytes into a {} byte reservation",
                id,
                written,
                out.len()
            );
            written.min(out.len())
        }
        None => {
            out.copy_from_slice(raw);
            raw.len()
        }
    }
}

/// Decode a wire payload into printable text.
pub(crate) fn decode(id: u16, wire: &[u8]) -> String {
    match lookup(id) {
        Some(entry) => (entry.decode)(wire),
        None => format!("<type {}: {} bytes>", id, wire.len()),
    }
}

/// Render a user payload for display, honoring its classify attributes:
/// payloads classified sensitive are withheld from formatted output.
pub(crate) fn render(id: u16, wire: &[u8], out: &mut String) {
    if let Some(entry) = lookup(id) {
        if (entry.classify)(wire).sensitive {
            out.push_str("<redacted>");
            return;
        }
    }
    out.push_str(&decode(id, wire));
}
