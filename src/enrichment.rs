// Enrichment - audit history and attachments for queue rows
//
// Read-only. A failed lookup for one item degrades to an empty list for that
// item; the row itself is always returned.

use rusqlite::Connection;
use serde::Serialize;

use crate::db::{get_approval_history, get_attachments, get_items_for_reimbursement, get_reimbursement};
use crate::models::{ApprovalRecord, Attachment, Reimbursement, ReimbursementItem, Stage};
use crate::queue::QueueItem;

/// Anything that identifies one reimbursement item.
pub trait ItemRow {
    fn item_id(&self) -> i64;
}

impl ItemRow for ReimbursementItem {
    fn item_id(&self) -> i64 {
        self.id
    }
}

impl ItemRow for QueueItem {
    fn item_id(&self) -> i64 {
        self.item.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enriched<T> {
    #[serde(flatten)]
    pub item: T,
    pub approval_history: Vec<ApprovalRecord>,
    pub attachments: Vec<Attachment>,
}

pub fn enrich_items<T: ItemRow>(
    conn: &Connection,
    items: Vec<T>,
    stage: Option<Stage>,
) -> Vec<Enriched<T>> {
    items
        .into_iter()
        .map(|item| {
            let item_id = item.item_id();

            let approval_history = get_approval_history(conn, item_id, stage).unwrap_or_else(|e| {
                tracing::warn!(item_id, error = %e, "approval history lookup failed");
                Vec::new()
            });

            let attachments = get_attachments(conn, item_id).unwrap_or_else(|e| {
                tracing::warn!(item_id, error = %e, "attachment lookup failed");
                Vec::new()
            });

            Enriched {
                item,
                approval_history,
                attachments,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReimbursementDetail {
    #[serde(flatten)]
    pub reimbursement: Reimbursement,
    pub items: Vec<Enriched<ReimbursementItem>>,
}

pub fn load_reimbursement_detail(
    conn: &Connection,
    reimbursement_id: i64,
) -> rusqlite::Result<Option<ReimbursementDetail>> {
    let Some(reimbursement) = get_reimbursement(conn, reimbursement_id)? else {
        return Ok(None);
    };
    let items = get_items_for_reimbursement(conn, reimbursement_id)?;

    Ok(Some(ReimbursementDetail {
        reimbursement,
        items: enrich_items(conn, items, None),
    }))
}
