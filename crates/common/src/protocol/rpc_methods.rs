// RPC method name constants for the daemon socket surface.

// ── Daemon-internal ────────────────────────────────────────────────
pub const RPC_PING: &str = "rpc.ping";
pub const DAEMON_SHUTDOWN: &str = "daemon.shutdown";

// ── Directory ──────────────────────────────────────────────────────
pub const JOIN_RESOLVE: &str = "join.resolve";

// ── Controller sessions ────────────────────────────────────────────
pub const SESSION_START: &str = "session.start";
pub const SESSION_END: &str = "session.end";
pub const SESSION_INFO: &str = "session.info";

// ── Live control state (lease-guarded) ─────────────────────────────
pub const LIVE_SET_STATUS: &str = "live.set_status";
pub const LIVE_SET_QUESTION: &str = "live.set_question";
pub const LIVE_START_QUESTION: &str = "live.start_question";
pub const LIVE_RESET_ROUND: &str = "live.reset_round";
pub const LIVE_READ: &str = "live.read";

// ── Participants ───────────────────────────────────────────────────
pub const VOTE_SUBMIT: &str = "vote.submit";
pub const AGG_READ: &str = "agg.read";

/// All methods the daemon currently dispatches.
pub const IMPLEMENTED_METHODS: &[&str] = &[
    RPC_PING,
    DAEMON_SHUTDOWN,
    JOIN_RESOLVE,
    SESSION_START,
    SESSION_END,
    SESSION_INFO,
    LIVE_SET_STATUS,
    LIVE_SET_QUESTION,
    LIVE_START_QUESTION,
    LIVE_RESET_ROUND,
    LIVE_READ,
    VOTE_SUBMIT,
    AGG_READ,
];
