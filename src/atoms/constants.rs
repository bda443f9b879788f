// ── Qualibot Atoms: Constants ──────────────────────────────────────────────
// All named constants for the crate live here.
// Rationale: collecting constants in one place eliminates magic strings,
// makes auditing easier, and keeps every layer's code self-documenting.

use std::time::Duration;

// ── Conversation history window ─────────────────────────────────────────────
// Trailing window handed to the agent runtime: the N most recent non-system
// messages plus a single system preamble. Configurable via `LLM_HISTORY_SIZE`.
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

// ── Qualification lifecycle ──────────────────────────────────────────────────
// A LeadQualification with no user message for this long is abandoned by the
// timeout sweep, regardless of its current stage.
pub const ABANDON_AFTER: Duration = Duration::from_secs(7 * 24 * 3600);

/// Consecutive consent refusals before the lead is abandoned outright.
pub const MAX_CONSENT_REFUSALS: u32 = 2;

// ── Timeout sweep cadence ────────────────────────────────────────────────────
pub const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

// ── Suspension-point deadlines ───────────────────────────────────────────────
pub const CALENDAR_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const MESSAGING_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const AGENT_ADVANCE_TIMEOUT: Duration = Duration::from_secs(60);
pub const WS_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

// ── Calendar slot derivation ─────────────────────────────────────────────────
/// Slot start times are aligned to this boundary within the working window.
pub const SLOT_ALIGNMENT_MINUTES: i64 = 30;

// ── Real-time session protocol ───────────────────────────────────────────────
pub const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const WS_HEARTBEAT_SILENCE_LIMIT: Duration = Duration::from_secs(120);
/// Bounded outbound buffer per connection before non-critical frames are dropped.
pub const WS_OUTBOUND_BUFFER: usize = 256;
/// A saturated outbound buffer is tolerated this long before the connection is closed.
pub const WS_BACKPRESSURE_GRACE: Duration = Duration::from_secs(30);

// ── Messaging client retry policy (reuses engine::http backoff) ─────────────
pub const MESSAGING_MAX_RETRIES: u32 = 3;
pub const MESSAGING_BASE_DELAY_MS: u64 = 1_000;
pub const MESSAGING_MAX_DELAY_MS: u64 = 30_000;

// ── Calendar client retry policy ─────────────────────────────────────────────
/// Base backoff delay; doubles per attempt, capped at 30s, up to 5 attempts.
pub const CALENDAR_MAX_RETRIES: u32 = 5;
pub const CALENDAR_BASE_DELAY_MS: u64 = 500;
pub const CALENDAR_MAX_DELAY_MS: u64 = 30_000;

// ── Circuit breaker ──────────────────────────────────────────────────────────
pub const CIRCUIT_BREAKER_THRESHOLD: u32 = 5;
pub const CIRCUIT_BREAKER_COOLDOWN_SECS: u64 = 60;
