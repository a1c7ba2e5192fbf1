// Item Validator - precondition check run inside the caller's transaction
//
// Returns the item only when every guard condition holds. Anything else is
// `None`, and the caller answers with the same opaque "not eligible" error
// whatever the reason was.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::db::timestamp_column;
use crate::models::{ItemStatus, ReimbursementItem, ReimbursementStatus, Stage};

/// Everything the validator needs to decide whether one action may proceed.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemGuard {
    pub item_id: i64,
    pub actor_id: i64,
    pub required_status: ItemStatus,
    pub excluded_statuses: Vec<ItemStatus>,
    pub require_manager_match: bool,
}

impl ItemGuard {
    /// Guard for a manager/HR/finance decision.
    pub fn for_stage(stage: Stage, item_id: i64, actor_id: i64) -> Self {
        ItemGuard {
            item_id,
            actor_id,
            required_status: stage.required_status(),
            excluded_statuses: stage.excluded_statuses(),
            require_manager_match: stage.requires_manager_match(),
        }
    }

    /// Guard for the terminal settlement step.
    pub fn for_payment(item_id: i64, actor_id: i64) -> Self {
        ItemGuard {
            item_id,
            actor_id,
            required_status: ItemStatus::ApprovedByFinance,
            excluded_statuses: vec![ItemStatus::Paid],
            require_manager_match: false,
        }
    }
}

/// Item row joined with its parent reimbursement and owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EligibleItem {
    pub item: ReimbursementItem,
    pub reimbursement_status: ReimbursementStatus,
    pub employee_id: i64,
    pub manager_id: Option<i64>,
}

impl EligibleItem {
    pub fn reimbursement_id(&self) -> i64 {
        self.item.reimbursement_id
    }
}

pub fn validate_item_for_action(
    conn: &Connection,
    guard: &ItemGuard,
) -> rusqlite::Result<Option<EligibleItem>> {
    let row = conn
        .query_row(
            "SELECT ri.id, ri.reimbursement_id, ri.category, ri.description, ri.amount,
                    ri.paid_amount, ri.tds_amount, ri.final_amount, ri.status, ri.created_at,
                    r.status, r.employee_id, u.manager_id
             FROM reimbursement_items ri
             JOIN reimbursements r ON r.id = ri.reimbursement_id
             JOIN users u ON u.id = r.employee_id
             WHERE ri.id = ?1",
            params![guard.item_id],
            |row| {
                Ok(EligibleItem {
                    item: ReimbursementItem {
                        id: row.get(0)?,
                        reimbursement_id: row.get(1)?,
                        category: row.get(2)?,
                        description: row.get(3)?,
                        amount: row.get(4)?,
                        paid_amount: row.get(5)?,
                        tds_amount: row.get(6)?,
                        final_amount: row.get(7)?,
                        status: row.get(8)?,
                        created_at: timestamp_column(row, 9)?,
                    },
                    reimbursement_status: row.get(10)?,
                    employee_id: row.get(11)?,
                    manager_id: row.get(12)?,
                })
            },
        )
        .optional()?;

    Ok(row.filter(|candidate| passes(guard, candidate)))
}

fn passes(guard: &ItemGuard, candidate: &EligibleItem) -> bool {
    let status = candidate.item.status;

    if status != guard.required_status {
        tracing::debug!(
            item_id = guard.item_id,
            %status,
            required = %guard.required_status,
            "item not in required status"
        );
        return false;
    }

    if guard.excluded_statuses.contains(&status) {
        return false;
    }

    // Manager-less owners never match here; the queue fallback is view-only.
    if guard.require_manager_match && candidate.manager_id != Some(guard.actor_id) {
        tracing::debug!(
            item_id = guard.item_id,
            actor_id = guard.actor_id,
            "actor is not the owner's manager"
        );
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::*;
    use crate::db::{insert_reimbursement, NewItem};

    #[test]
    fn test_manager_guard_accepts_direct_manager() {
        let conn = memory_db();
        let org = org(&conn);
        let (rid, ids) =
            insert_reimbursement(&conn, org.employee, &[NewItem::new("travel", "Taxi", 40.0)])
                .unwrap();

        let guard = ItemGuard::for_stage(Stage::Manager, ids[0], org.manager);
        let found = validate_item_for_action(&conn, &guard).unwrap().unwrap();

        assert_eq!(found.item.id, ids[0]);
        assert_eq!(found.reimbursement_id(), rid);
        assert_eq!(found.employee_id, org.employee);
        assert_eq!(found.manager_id, Some(org.manager));
    }

    #[test]
    fn test_manager_guard_rejects_other_manager() {
        let conn = memory_db();
        let org = org(&conn);
        let (_, ids) =
            insert_reimbursement(&conn, org.employee, &[NewItem::new("travel", "Taxi", 40.0)])
                .unwrap();

        let guard = ItemGuard::for_stage(Stage::Manager, ids[0], org.other_manager);
        assert!(validate_item_for_action(&conn, &guard).unwrap().is_none());
    }

    #[test]
    fn test_manager_guard_rejects_unmanaged_owner() {
        let conn = memory_db();
        let org = org(&conn);
        let (_, ids) = insert_reimbursement(
            &conn,
            org.unmanaged_employee,
            &[NewItem::new("travel", "Taxi", 40.0)],
        )
        .unwrap();

        let guard = ItemGuard::for_stage(Stage::Manager, ids[0], org.manager);
        assert!(validate_item_for_action(&conn, &guard).unwrap().is_none());
    }

    #[test]
    fn test_wrong_status_is_not_eligible() {
        let conn = memory_db();
        let org = org(&conn);
        let (_, ids) =
            insert_reimbursement(&conn, org.employee, &[NewItem::new("travel", "Taxi", 40.0)])
                .unwrap();
        force_status(&conn, ids[0], ItemStatus::ApprovedByHr);

        let manager = ItemGuard::for_stage(Stage::Manager, ids[0], org.manager);
        assert!(validate_item_for_action(&conn, &manager).unwrap().is_none());

        let hr = ItemGuard::for_stage(Stage::Hr, ids[0], org.hr);
        assert!(validate_item_for_action(&conn, &hr).unwrap().is_none());

        let finance = ItemGuard::for_stage(Stage::Finance, ids[0], org.finance);
        assert!(validate_item_for_action(&conn, &finance).unwrap().is_some());
    }

    #[test]
    fn test_excluded_status_wins_over_required() {
        let conn = memory_db();
        let org = org(&conn);
        let (_, ids) =
            insert_reimbursement(&conn, org.employee, &[NewItem::new("travel", "Taxi", 40.0)])
                .unwrap();

        let guard = ItemGuard {
            item_id: ids[0],
            actor_id: org.hr,
            required_status: ItemStatus::Pending,
            excluded_statuses: vec![ItemStatus::Pending],
            require_manager_match: false,
        };
        assert!(validate_item_for_action(&conn, &guard).unwrap().is_none());
    }

    #[test]
    fn test_missing_item_is_none() {
        let conn = memory_db();
        let org = org(&conn);

        let guard = ItemGuard::for_stage(Stage::Hr, 9999, org.hr);
        assert!(validate_item_for_action(&conn, &guard).unwrap().is_none());
    }

    #[test]
    fn test_payment_guard_requires_finance_approval() {
        let conn = memory_db();
        let org = org(&conn);
        let (_, ids) =
            insert_reimbursement(&conn, org.employee, &[NewItem::new("travel", "Taxi", 40.0)])
                .unwrap();

        let guard = ItemGuard::for_payment(ids[0], org.finance);
        assert!(validate_item_for_action(&conn, &guard).unwrap().is_none());

        force_status(&conn, ids[0], ItemStatus::ApprovedByFinance);
        assert!(validate_item_for_action(&conn, &guard).unwrap().is_some());

        force_status(&conn, ids[0], ItemStatus::Paid);
        assert!(validate_item_for_action(&conn, &guard).unwrap().is_none());
    }
}
