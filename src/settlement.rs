// Finance Settlement Mutator and reimbursement-level aggregate rules
//
// A reimbursement's status is never set by a caller directly. It is derived
// from the statuses of all its items, read inside the same transaction as the
// item write that triggered the recompute.

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::db::{
    insert_approval_record, sibling_statuses, update_item_status, update_reimbursement_status,
};
use crate::models::{Decision, ItemStatus, ReimbursementStatus, Stage};

// ============================================================================
// AGGREGATE RULES (pure)
// ============================================================================

/// Status after a finance approval: fully approved only when every item has
/// cleared finance (or been paid) and nothing was rejected.
pub fn settlement_status(statuses: &[ItemStatus]) -> ReimbursementStatus {
    let all_cleared = !statuses.is_empty()
        && statuses
            .iter()
            .all(|s| matches!(s, ItemStatus::ApprovedByFinance | ItemStatus::Paid));
    let any_rejected = statuses.iter().any(ItemStatus::is_rejected);

    if all_cleared && !any_rejected {
        ReimbursementStatus::FullyApproved
    } else {
        ReimbursementStatus::PartiallyApproved
    }
}

/// Status while items are still moving through manager/HR review, and after
/// any rejection.
pub fn review_status(statuses: &[ItemStatus]) -> ReimbursementStatus {
    let rejected = statuses.iter().filter(|s| s.is_rejected()).count();

    if !statuses.is_empty() && rejected == statuses.len() {
        ReimbursementStatus::Rejected
    } else if rejected > 0 {
        ReimbursementStatus::PartiallyApproved
    } else {
        ReimbursementStatus::InReview
    }
}

pub fn all_paid(statuses: &[ItemStatus]) -> bool {
    !statuses.is_empty() && statuses.iter().all(|s| *s == ItemStatus::Paid)
}

/// Sibling statuses as they will be once `item_id` moves to `next`.
pub fn projected_statuses(
    conn: &Connection,
    reimbursement_id: i64,
    item_id: i64,
    next: ItemStatus,
) -> rusqlite::Result<Vec<ItemStatus>> {
    let mut stmt = conn.prepare(
        "SELECT CASE WHEN id = ?2 THEN ?3 ELSE status END
         FROM reimbursement_items
         WHERE reimbursement_id = ?1",
    )?;

    let statuses = stmt
        .query_map(params![reimbursement_id, item_id, next], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(statuses)
}

// ============================================================================
// FINANCE APPROVAL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementOutcome {
    pub event_id: String,
    pub reimbursement_status: ReimbursementStatus,
}

/// Record the finance approval, then rescan siblings and settle the
/// reimbursement as fully or partially approved.
pub fn apply_finance_approval(
    conn: &Connection,
    item_id: i64,
    approver_id: i64,
    comments: Option<&str>,
    reimbursement_id: i64,
) -> rusqlite::Result<SettlementOutcome> {
    let updated = update_item_status(conn, item_id, ItemStatus::ApprovedByFinance)?;
    if updated != 1 {
        return Err(rusqlite::Error::QueryReturnedNoRows);
    }

    let event_id = insert_approval_record(
        conn,
        item_id,
        approver_id,
        Stage::Finance,
        Decision::Approved,
        comments,
    )?;

    let statuses = sibling_statuses(conn, reimbursement_id)?;
    let reimbursement_status = settlement_status(&statuses);
    update_reimbursement_status(conn, reimbursement_id, reimbursement_status)?;

    Ok(SettlementOutcome {
        event_id,
        reimbursement_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::*;
    use crate::db::{get_reimbursement, insert_reimbursement, NewItem};
    use ItemStatus::*;

    #[test]
    fn test_settlement_fully_approved() {
        assert_eq!(
            settlement_status(&[ApprovedByFinance, ApprovedByFinance]),
            ReimbursementStatus::FullyApproved
        );
        assert_eq!(
            settlement_status(&[ApprovedByFinance, Paid]),
            ReimbursementStatus::FullyApproved
        );
    }

    #[test]
    fn test_settlement_partially_approved() {
        assert_eq!(
            settlement_status(&[ApprovedByFinance, RejectedByManager]),
            ReimbursementStatus::PartiallyApproved
        );
        assert_eq!(
            settlement_status(&[ApprovedByFinance, ApprovedByHr]),
            ReimbursementStatus::PartiallyApproved
        );
        assert_eq!(settlement_status(&[]), ReimbursementStatus::PartiallyApproved);
    }

    #[test]
    fn test_review_status() {
        assert_eq!(
            review_status(&[ApprovedByManager, Pending]),
            ReimbursementStatus::InReview
        );
        assert_eq!(
            review_status(&[RejectedByHr, Pending]),
            ReimbursementStatus::PartiallyApproved
        );
        assert_eq!(
            review_status(&[RejectedByHr, RejectedByManager]),
            ReimbursementStatus::Rejected
        );
    }

    #[test]
    fn test_all_paid() {
        assert!(all_paid(&[Paid, Paid]));
        assert!(!all_paid(&[Paid, ApprovedByFinance]));
        assert!(!all_paid(&[]));
    }

    #[test]
    fn test_projected_statuses_substitutes_target_item() {
        let conn = memory_db();
        let org = org(&conn);
        let (rid, ids) = insert_reimbursement(
            &conn,
            org.employee,
            &[NewItem::new("a", "a", 1.0), NewItem::new("b", "b", 2.0)],
        )
        .unwrap();

        let mut projected = projected_statuses(&conn, rid, ids[1], RejectedByManager).unwrap();
        projected.sort_by_key(|s| s.as_str());
        assert_eq!(projected, vec![Pending, RejectedByManager]);
    }

    #[test]
    fn test_finance_approval_of_last_item_fully_approves() {
        let conn = memory_db();
        let org = org(&conn);
        let (rid, ids) = insert_reimbursement(
            &conn,
            org.employee,
            &[NewItem::new("a", "a", 1.0), NewItem::new("b", "b", 2.0)],
        )
        .unwrap();
        force_status(&conn, ids[0], ApprovedByFinance);
        force_status(&conn, ids[1], ApprovedByHr);

        let outcome = apply_finance_approval(&conn, ids[1], org.finance, None, rid).unwrap();
        assert_eq!(outcome.reimbursement_status, ReimbursementStatus::FullyApproved);

        let reimbursement = get_reimbursement(&conn, rid).unwrap().unwrap();
        assert_eq!(reimbursement.status, ReimbursementStatus::FullyApproved);
    }

    #[test]
    fn test_finance_approval_with_rejected_sibling_is_partial() {
        let conn = memory_db();
        let org = org(&conn);
        let (rid, ids) = insert_reimbursement(
            &conn,
            org.employee,
            &[NewItem::new("a", "a", 1.0), NewItem::new("b", "b", 2.0)],
        )
        .unwrap();
        force_status(&conn, ids[0], RejectedByManager);
        force_status(&conn, ids[1], ApprovedByHr);

        let outcome = apply_finance_approval(&conn, ids[1], org.finance, Some("fine"), rid).unwrap();
        assert_eq!(
            outcome.reimbursement_status,
            ReimbursementStatus::PartiallyApproved
        );
    }
}
