// ==========================================
// 考试排程对账系统 - 引擎层
// ==========================================
// 职责: 匹配 / 去重 / 链接传播规则,不拼 SQL
// 红线: Engine 不做 I/O, 所有"无法匹配"必须输出 reason
// ==========================================

pub mod link_propagator;
pub mod link_sync;
pub mod matcher;
pub mod room_roster;

// 重导出核心引擎
pub use link_propagator::{group_key, LinkPlan, LinkPropagation, LinkPropagator};
pub use link_sync::{compute_pending_link_updates, LinkSyncPlan, PendingLinkUpdate};
pub use matcher::{MatchDecision, MatchPolicy, RecordMatcher, SnapshotIndex};
pub use room_roster::{RoomEntry, RoomFilter, RoomRoster};
