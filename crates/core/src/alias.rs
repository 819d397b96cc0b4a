use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ActorId, AliasId, ResidentId};

/// Learned mapping from a normalized narration fragment to a resident.
///
/// `fragment` is the lowercase key produced by narration normalization and is
/// unique across the table. `version` increases on every write so readers can
/// tell whether the row changed underneath them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidentPaymentAlias {
    pub id: AliasId,
    pub fragment: String,
    pub resident_id: ResidentId,
    pub hit_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub version: i64,
    pub created_by: Option<ActorId>,
    pub created_at: DateTime<Utc>,
}
