// ── Qualibot Agent Engine ────────────────────────────────────────────────
// Module layout:
//   store         — C1: typed CRUD + migrations over the relational store
//   calendar      — C2: external calendar client + slot derivation
//   messaging     — C3: outbound send + inbound signature verification
//   agent         — C4: LLM-backed agent runtime + tool catalogue
//   qualification — C5: deterministic stage graph
//   orchestrator  — C6: per-conversation serial executor
//   webhook       — C7: provider webhook ingest
//   realtime      — C8: WebSocket session fan-out
//   rest          — legacy REST facade
//   dashboard     — C9: aggregation queries
//   http          — shared retry/backoff/circuit-breaker helpers
//   state         — process-wide dependency container
//   server        — axum router assembly

pub mod agent;
pub mod calendar;
pub mod dashboard;
pub mod http;
pub mod messaging;
pub mod orchestrator;
pub mod qualification;
pub mod realtime;
pub mod rest;
pub mod server;
pub mod state;
pub mod store;
pub mod webhook;
