//! Peer identity strings.
//!
//! Two shapes appear on the wire: `ip:port` for address-derived identities
//! and `<name>:000001` for server-assigned names. The fixed suffix stands
//! in for a port so both shapes can be handled uniformly. Every identity
//! entering the session registry or a wire field goes through
//! [`format_identity`] so lookups and `receiver` routing agree on one
//! canonical spelling.

use crate::config::RESERVED_SERVER_IDENTITY;
use std::net::SocketAddr;

/// Suffix appended to named identities in place of a real port.
pub const NAMED_IDENTITY_SUFFIX: &str = "000001";

/// Normalize an identity for registry keys and wire fields.
///
/// Address-shaped input (`host:port`) passes through unchanged, as does
/// the reserved server identity. Anything else is a bare name and gets
/// the named-identity suffix.
pub fn format_identity(raw: &str) -> String {
    if raw == RESERVED_SERVER_IDENTITY || raw.contains(':') {
        raw.to_string()
    } else {
        format!("{raw}:{NAMED_IDENTITY_SUFFIX}")
    }
}

/// Identity string for a connected socket address.
pub fn address_identity(addr: &SocketAddr) -> String {
    addr.to_string()
}

/// True if the identity is a server-assigned name rather than an address.
pub fn is_named(identity: &str) -> bool {
    identity
        .rsplit_once(':')
        .is_some_and(|(_, port)| port == NAMED_IDENTITY_SUFFIX)
}

/// True for the reserved relay-server identity.
pub fn is_server(identity: &str) -> bool {
    identity == RESERVED_SERVER_IDENTITY
}
