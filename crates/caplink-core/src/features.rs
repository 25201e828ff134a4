//! Well-known protocol feature identifiers.
//!
//! These are the service-discovery namespaces a peer advertises. The
//! built-in capability requirements are expressed in terms of them.

/// Jingle session negotiation.
pub const JINGLE: &str = "urn:xmpp:jingle:1";

/// Jingle RTP sessions.
pub const JINGLE_RTP: &str = "urn:xmpp:jingle:apps:rtp:1";

/// Jingle RTP audio media.
pub const JINGLE_RTP_AUDIO: &str = "urn:xmpp:jingle:apps:rtp:audio";

/// Jingle RTP video media.
pub const JINGLE_RTP_VIDEO: &str = "urn:xmpp:jingle:apps:rtp:video";

/// Chat state notifications (typing indicators).
pub const CHAT_STATES: &str = "http://jabber.org/protocol/chatstates";

/// Last message correction.
pub const MESSAGE_CORRECT: &str = "urn:xmpp:message-correct:0";

/// vCard based contact info.
pub const VCARD: &str = "vcard-temp";
