//! Event type name constants.
//!
//! The relay never looks at these; they exist so clients and views agree
//! on the discriminator strings.

/// All well-known event types.
pub struct EventTypes;

impl EventTypes {
    // ── Emitted locally by the channel client ───────────────────────────
    pub const STATUS: &str = "status";
    pub const RAW_MESSAGE: &str = "raw_message";

    // ── Keep-alive ──────────────────────────────────────────────────────
    pub const PING: &str = "ping";

    // ── Maze / drone ────────────────────────────────────────────────────
    pub const DRONE_POSITION: &str = "drone_position";
    pub const MOVE: &str = "move";
    pub const VERTICAL_MODE_CHANGE: &str = "vertical_mode_change";
    pub const CAPTURE_SEQUENCE_INITIATED: &str = "capture_sequence_initiated";

    // ── Displays ────────────────────────────────────────────────────────
    pub const REFRESH_PAGE: &str = "refresh_page";
}

/// Type alias for event type names.
pub type EventType = &'static str;

/// Whether `kind` is one of the well-known event types.
pub fn is_known_type(kind: &str) -> bool {
    matches!(
        kind,
        EventTypes::STATUS
            | EventTypes::RAW_MESSAGE
            | EventTypes::PING
            | EventTypes::DRONE_POSITION
            | EventTypes::MOVE
            | EventTypes::VERTICAL_MODE_CHANGE
            | EventTypes::CAPTURE_SEQUENCE_INITIATED
            | EventTypes::REFRESH_PAGE
    )
}
