//! Actor (role) translation between the reserved `NEXT` token and its URI.

/// Reserved token for the immediate next processing node.
pub const NEXT: &str = "NEXT";

/// SOAP 1.1 actor URI of the immediate next processing node.
pub const ACTOR_NEXT: &str = "http://schemas.xmlsoap.org/soap/actor/next";

/// Translate a role token into the actor URI written on the wire.
/// Anything but the reserved token passes through unchanged.
pub fn role_uri(role: &str) -> &str {
    if role == NEXT {
        ACTOR_NEXT
    } else {
        role
    }
}

/// Translate an actor URI read from the wire back into a role token.
pub fn role_abbreviation(uri: &str) -> &str {
    if uri == ACTOR_NEXT {
        NEXT
    } else {
        uri
    }
}
