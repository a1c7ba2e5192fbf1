// Approval/Rejection Mutator - manager and HR stage writes
//
// Exactly three writes, in order: item status, audit record, reimbursement
// status. Atomicity comes from the surrounding transaction.

use rusqlite::Connection;
use serde::Serialize;

use crate::db::{insert_approval_record, update_item_status, update_reimbursement_status};
use crate::models::{Decision, ItemStatus, ReimbursementStatus, Stage};

/// One stage decision, fully resolved before any write happens.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemTransition {
    pub item_id: i64,
    pub approver_id: i64,
    pub stage: Stage,
    pub next_status: ItemStatus,
    pub comments: Option<String>,
    pub reimbursement_id: i64,
    pub reimbursement_status: ReimbursementStatus,
}

pub fn apply_approval(conn: &Connection, transition: &ItemTransition) -> rusqlite::Result<String> {
    debug_assert_eq!(
        transition.stage.next_status(Decision::Approved),
        transition.next_status
    );
    apply(conn, transition, Decision::Approved)
}

/// Comments are checked non-empty by the caller before this runs.
pub fn apply_rejection(conn: &Connection, transition: &ItemTransition) -> rusqlite::Result<String> {
    debug_assert_eq!(
        transition.stage.next_status(Decision::Rejected),
        transition.next_status
    );
    apply(conn, transition, Decision::Rejected)
}

fn apply(
    conn: &Connection,
    transition: &ItemTransition,
    decision: Decision,
) -> rusqlite::Result<String> {
    debug_assert!(
        transition
            .stage
            .required_status()
            .can_transition_to(transition.next_status),
        "{} -> {} is not an edge of the status graph",
        transition.stage.required_status(),
        transition.next_status
    );

    let updated = update_item_status(conn, transition.item_id, transition.next_status)?;
    if updated != 1 {
        return Err(rusqlite::Error::QueryReturnedNoRows);
    }

    let event_id = insert_approval_record(
        conn,
        transition.item_id,
        transition.approver_id,
        transition.stage,
        decision,
        transition.comments.as_deref(),
    )?;

    update_reimbursement_status(
        conn,
        transition.reimbursement_id,
        transition.reimbursement_status,
    )?;

    Ok(event_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::*;
    use crate::db::{
        count_approval_records, get_approval_history, get_item, get_reimbursement,
        insert_reimbursement, NewItem,
    };

    #[test]
    fn test_every_stage_decision_is_a_graph_edge() {
        for stage in [Stage::Manager, Stage::Hr, Stage::Finance] {
            for decision in [Decision::Approved, Decision::Rejected] {
                let from = stage.required_status();
                let to = stage.next_status(decision);
                assert!(from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "not an edge of the status graph")]
    fn test_apply_refuses_off_graph_transition() {
        let conn = memory_db();
        let org = org(&conn);
        let (rid, ids) =
            insert_reimbursement(&conn, org.employee, &[NewItem::new("a", "a", 1.0)]).unwrap();

        let transition = ItemTransition {
            item_id: ids[0],
            approver_id: org.hr,
            stage: Stage::Hr,
            next_status: ItemStatus::Paid,
            comments: None,
            reimbursement_id: rid,
            reimbursement_status: ReimbursementStatus::InReview,
        };
        let _ = apply(&conn, &transition, Decision::Approved);
    }

    #[test]
    fn test_apply_approval_writes_three_rows() {
        let conn = memory_db();
        let org = org(&conn);
        let (rid, ids) =
            insert_reimbursement(&conn, org.employee, &[NewItem::new("travel", "Hotel", 300.0)])
                .unwrap();

        let transition = ItemTransition {
            item_id: ids[0],
            approver_id: org.manager,
            stage: Stage::Manager,
            next_status: ItemStatus::ApprovedByManager,
            comments: Some("ok".to_string()),
            reimbursement_id: rid,
            reimbursement_status: ReimbursementStatus::InReview,
        };
        apply_approval(&conn, &transition).unwrap();

        let item = get_item(&conn, ids[0]).unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::ApprovedByManager);

        let history = get_approval_history(&conn, ids[0], None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].decision, Decision::Approved);
        assert_eq!(history[0].stage, Stage::Manager);
        assert_eq!(history[0].approver_id, org.manager);

        let reimbursement = get_reimbursement(&conn, rid).unwrap().unwrap();
        assert_eq!(reimbursement.status, ReimbursementStatus::InReview);
    }

    #[test]
    fn test_apply_rejection_records_rejected_decision() {
        let conn = memory_db();
        let org = org(&conn);
        let (rid, ids) =
            insert_reimbursement(&conn, org.employee, &[NewItem::new("travel", "Hotel", 300.0)])
                .unwrap();
        force_status(&conn, ids[0], ItemStatus::ApprovedByManager);

        let transition = ItemTransition {
            item_id: ids[0],
            approver_id: org.hr,
            stage: Stage::Hr,
            next_status: ItemStatus::RejectedByHr,
            comments: Some("Not a business expense".to_string()),
            reimbursement_id: rid,
            reimbursement_status: ReimbursementStatus::Rejected,
        };
        apply_rejection(&conn, &transition).unwrap();

        let history = get_approval_history(&conn, ids[0], Some(Stage::Hr)).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].decision, Decision::Rejected);
        assert_eq!(history[0].comments.as_deref(), Some("Not a business expense"));

        let reimbursement = get_reimbursement(&conn, rid).unwrap().unwrap();
        assert_eq!(reimbursement.status, ReimbursementStatus::Rejected);
    }

    #[test]
    fn test_missing_item_writes_nothing() {
        let conn = memory_db();
        let org = org(&conn);
        let (rid, _) =
            insert_reimbursement(&conn, org.employee, &[NewItem::new("travel", "Hotel", 300.0)])
                .unwrap();

        let transition = ItemTransition {
            item_id: 4242,
            approver_id: org.manager,
            stage: Stage::Manager,
            next_status: ItemStatus::ApprovedByManager,
            comments: None,
            reimbursement_id: rid,
            reimbursement_status: ReimbursementStatus::InReview,
        };

        assert!(apply_approval(&conn, &transition).is_err());
        assert_eq!(count_approval_records(&conn).unwrap(), 0);
    }
}
