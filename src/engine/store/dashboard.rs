// Aggregation queries backing the Dashboard/Query Service (C9). All reads
// here are best-effort consistent: callers tolerate counts drifting by a
// single event, so no transaction wraps these reads.

use crate::atoms::error::EngineResult;
use crate::engine::store::Store;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_users: i64,
    pub active_conversations: i64,
    pub meetings_today: i64,
    pub leads_by_stage: HashMap<String, i64>,
}

#[derive(Debug, Serialize)]
pub struct FunnelStageCount {
    pub stage: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct ActivityBucket {
    pub hour: String,
    pub messages: i64,
    pub meetings: i64,
}

#[derive(Debug, Serialize)]
pub struct AbandonedLead {
    pub lead_qualification_id: String,
    pub conversation_id: String,
    pub current_step: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AgentPerformance {
    pub sample_size: i64,
    pub mean_response_latency_ms: f64,
    pub median_response_latency_ms: f64,
    pub tool_call_success_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct ConversionStats {
    pub total_leads: i64,
    pub completed: i64,
    pub abandoned: i64,
    pub completion_rate: f64,
    pub abandonment_rate: f64,
}

/// In-flight conversations and recent delivery-failure rate. `open_sessions`
/// (live WebSocket connections) isn't store state, so the caller composes it
/// in alongside these two fields to build the full `get_real_time_metrics`
/// response.
#[derive(Debug)]
pub struct StoreRealTimeMetrics {
    pub in_flight_conversations: i64,
    pub recent_error_rate: f64,
}

impl Store {
    pub fn get_dashboard_stats(&self) -> EngineResult<DashboardStats> {
        let conn = self.conn.lock();

        let total_users: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
        let active_conversations: i64 =
            conn.query_row("SELECT COUNT(*) FROM conversations WHERE status = 'active'", [], |r| r.get(0))?;
        let meetings_today: i64 = conn.query_row(
            "SELECT COUNT(*) FROM meetings WHERE status != 'cancelled' AND date(start_time) = date('now')",
            [],
            |r| r.get(0),
        )?;

        let mut stmt = conn.prepare("SELECT current_step, COUNT(*) FROM lead_qualification GROUP BY current_step")?;
        let leads_by_stage = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(DashboardStats { total_users, active_conversations, meetings_today, leads_by_stage })
    }

    pub fn get_conversion_funnel(&self) -> EngineResult<Vec<FunnelStageCount>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT current_step, COUNT(*) FROM lead_qualification GROUP BY current_step ORDER BY
             CASE current_step
               WHEN 'start' THEN 0 WHEN 'consent' THEN 1 WHEN 'personal_data' THEN 2
               WHEN 'bant' THEN 3 WHEN 'requirements' THEN 4 WHEN 'meeting' THEN 5
               WHEN 'completed' THEN 6 ELSE 7 END",
        )?;
        let rows = stmt
            .query_map([], |row| Ok(FunnelStageCount { stage: row.get(0)?, count: row.get(1)? }))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn get_activity_timeline(&self, window: Duration) -> EngineResult<Vec<ActivityBucket>> {
        let conn = self.conn.lock();
        let since = Utc::now() - window;

        let mut msg_stmt = conn.prepare(
            "SELECT strftime('%Y-%m-%dT%H:00:00Z', created_at) AS hour, COUNT(*) FROM messages
             WHERE created_at >= ?1 GROUP BY hour",
        )?;
        let mut message_counts: HashMap<String, i64> = msg_stmt
            .query_map(rusqlite::params![since], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let mut meeting_stmt = conn.prepare(
            "SELECT strftime('%Y-%m-%dT%H:00:00Z', start_time) AS hour, COUNT(*) FROM meetings
             WHERE start_time >= ?1 AND status != 'cancelled' GROUP BY hour",
        )?;
        let meeting_counts: HashMap<String, i64> = meeting_stmt
            .query_map(rusqlite::params![since], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let mut hours: Vec<String> = message_counts.keys().chain(meeting_counts.keys()).cloned().collect();
        hours.sort();
        hours.dedup();

        Ok(hours
            .into_iter()
            .map(|hour| ActivityBucket {
                messages: message_counts.remove(&hour).unwrap_or(0),
                meetings: meeting_counts.get(&hour).copied().unwrap_or(0),
                hour,
            })
            .collect())
    }

    pub fn get_abandoned_leads(&self) -> EngineResult<Vec<AbandonedLead>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, current_step, updated_at FROM lead_qualification
             WHERE current_step = 'abandoned' ORDER BY updated_at DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(AbandonedLead {
                    lead_qualification_id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    current_step: row.get(2)?,
                    updated_at: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Leads grouped by stage, same shape as the conversion funnel but
    /// without the stage ordering — a live snapshot of where every
    /// non-terminal lead currently sits.
    pub fn get_lead_pipeline(&self) -> EngineResult<Vec<FunnelStageCount>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT current_step, COUNT(*) FROM lead_qualification
             WHERE current_step NOT IN ('completed', 'abandoned') GROUP BY current_step",
        )?;
        let rows = stmt
            .query_map([], |row| Ok(FunnelStageCount { stage: row.get(0)?, count: row.get(1)? }))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn get_conversion_stats(&self) -> EngineResult<ConversionStats> {
        let conn = self.conn.lock();
        let total_leads: i64 = conn.query_row("SELECT COUNT(*) FROM lead_qualification", [], |r| r.get(0))?;
        let completed: i64 =
            conn.query_row("SELECT COUNT(*) FROM lead_qualification WHERE current_step = 'completed'", [], |r| r.get(0))?;
        let abandoned: i64 =
            conn.query_row("SELECT COUNT(*) FROM lead_qualification WHERE current_step = 'abandoned'", [], |r| r.get(0))?;

        let denom = total_leads.max(1) as f64;
        Ok(ConversionStats {
            total_leads,
            completed,
            abandoned,
            completion_rate: completed as f64 / denom,
            abandonment_rate: abandoned as f64 / denom,
        })
    }

    /// Pairs each user message with the next message in the same
    /// conversation (the agent's reply) to approximate response latency,
    /// and treats C6's rewritten-apology messages (see
    /// `orchestrator::turn::apply_tools`) as tool-call failures.
    pub fn get_agent_performance(&self, window: Duration) -> EngineResult<AgentPerformance> {
        let conn = self.conn.lock();
        let since = Utc::now() - window;

        let mut stmt = conn.prepare(
            "SELECT m1.created_at, m2.created_at, m2.content FROM messages m1
             JOIN messages m2 ON m2.conversation_id = m1.conversation_id
               AND m2.role = 'assistant'
               AND m2.created_at = (
                 SELECT MIN(m3.created_at) FROM messages m3
                 WHERE m3.conversation_id = m1.conversation_id
                   AND m3.role = 'assistant'
                   AND m3.created_at > m1.created_at
               )
             WHERE m1.role = 'user' AND m1.created_at >= ?1",
        )?;

        let mut latencies_ms: Vec<f64> = Vec::new();
        let mut failures = 0i64;
        let rows = stmt.query_map(rusqlite::params![since], |row| {
            let user_at: DateTime<Utc> = row.get(0)?;
            let reply_at: DateTime<Utc> = row.get(1)?;
            let content: String = row.get(2)?;
            Ok(((reply_at - user_at).num_milliseconds() as f64, content.starts_with("I couldn't complete that:")))
        })?;
        for row in rows.filter_map(|r| r.ok()) {
            let (latency, failed) = row;
            latencies_ms.push(latency);
            if failed {
                failures += 1;
            }
        }

        let sample_size = latencies_ms.len() as i64;
        let mean = if sample_size > 0 { latencies_ms.iter().sum::<f64>() / sample_size as f64 } else { 0.0 };
        let median = {
            let mut sorted = latencies_ms.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            match sorted.len() {
                0 => 0.0,
                n if n % 2 == 1 => sorted[n / 2],
                n => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
            }
        };
        let tool_call_success_rate = if sample_size > 0 { 1.0 - (failures as f64 / sample_size as f64) } else { 1.0 };

        Ok(AgentPerformance { sample_size, mean_response_latency_ms: mean, median_response_latency_ms: median, tool_call_success_rate })
    }

    pub fn get_real_time_metrics(&self, window: Duration) -> EngineResult<StoreRealTimeMetrics> {
        let conn = self.conn.lock();
        let since = Utc::now() - window;

        let in_flight_conversations: i64 = conn.query_row(
            "SELECT COUNT(*) FROM conversations WHERE status = 'active' AND agent_enabled = 1",
            [],
            |r| r.get(0),
        )?;

        let total_recent: i64 =
            conn.query_row("SELECT COUNT(*) FROM messages WHERE created_at >= ?1", rusqlite::params![since], |r| r.get(0))?;
        let failed_recent: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE created_at >= ?1 AND delivery_failed = 1",
            rusqlite::params![since],
            |r| r.get(0),
        )?;
        let recent_error_rate = if total_recent > 0 { failed_recent as f64 / total_recent as f64 } else { 0.0 };

        Ok(StoreRealTimeMetrics { in_flight_conversations, recent_error_rate })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::Platform;

    #[test]
    fn dashboard_stats_reflect_seeded_data() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_user_and_open_conversation(Platform::Whatsapp, "party-1", Some("+1555"), None)
            .unwrap();
        let stats = store.get_dashboard_stats().unwrap();
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.active_conversations, 1);
    }
}
