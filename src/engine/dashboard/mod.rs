// Dashboard/Query Service (C9). The aggregation queries themselves live as
// `impl Store` methods in `engine::store::dashboard` — they are just reads
// over C1's tables, not a separate subsystem with its own state. This
// module is the public-facing alias the rest of the engine (realtime, rest)
// imports from.

pub use crate::engine::store::dashboard::{
    AbandonedLead, ActivityBucket, AgentPerformance, ConversionStats, DashboardStats, FunnelStageCount, StoreRealTimeMetrics,
};
