// Payment Reconciler - the terminal "mark paid" step
//
// Formula enforced before anything is written:
//   final_amount = paid_amount - tds_amount   (± tolerance)
//
// paid_amount defaults to the claimed amount, tds_amount to zero.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::db::{sibling_statuses, update_reimbursement_status};
use crate::error::WorkflowError;
use crate::models::{ItemStatus, ReimbursementStatus};
use crate::settlement::all_paid;

// ============================================================================
// REQUEST AND AMOUNTS
// ============================================================================

/// Payload of a mark-paid request as it arrives from the boundary.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub item_id: Option<i64>,
    pub paid_amount: Option<f64>,
    pub tds_amount: Option<f64>,
    pub final_amount: Option<f64>,
}

impl PaymentRequest {
    pub fn new(item_id: i64, paid_amount: Option<f64>, tds_amount: Option<f64>, final_amount: f64) -> Self {
        PaymentRequest {
            item_id: Some(item_id),
            paid_amount,
            tds_amount,
            final_amount: Some(final_amount),
        }
    }

    /// Shape check, run before a transaction is opened.
    pub fn validate(&self) -> Result<(i64, f64), WorkflowError> {
        let item_id = self
            .item_id
            .ok_or_else(|| WorkflowError::InvalidInput("itemId is required".to_string()))?;
        let final_amount = self
            .final_amount
            .ok_or_else(|| WorkflowError::InvalidInput("finalAmount is required".to_string()))?;

        check_amount("finalAmount", Some(final_amount))?;
        check_amount("paidAmount", self.paid_amount)?;
        check_amount("tdsAmount", self.tds_amount)?;

        Ok((item_id, final_amount))
    }
}

fn check_amount(field: &str, value: Option<f64>) -> Result<(), WorkflowError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(WorkflowError::InvalidInput(format!(
            "{} must be a non-negative number",
            field
        ))),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaymentAmounts {
    pub paid_amount: f64,
    pub tds_amount: f64,
    pub final_amount: f64,
}

// ============================================================================
// RECONCILER
// ============================================================================

/// Absorbs binary rounding so a difference of exactly `tolerance` passes.
const ROUNDING_SLACK: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaymentReconciler {
    /// Absolute tolerance for the final-amount check (default: 0.01)
    pub tolerance: f64,
}

impl PaymentReconciler {
    pub fn new() -> Self {
        PaymentReconciler { tolerance: 0.01 }
    }

    pub fn with_tolerance(tolerance: f64) -> Self {
        PaymentReconciler { tolerance }
    }

    /// Resolve defaults against the claimed amount and check the formula.
    ///
    /// ```
    /// use expense_approvals::{PaymentReconciler, PaymentRequest};
    ///
    /// let reconciler = PaymentReconciler::new();
    /// let request = PaymentRequest::new(1, Some(1000.0), Some(100.0), 900.0);
    /// let amounts = reconciler.reconcile(1000.0, &request).unwrap();
    /// assert_eq!(amounts.final_amount, 900.0);
    /// ```
    pub fn reconcile(
        &self,
        claimed_amount: f64,
        request: &PaymentRequest,
    ) -> Result<PaymentAmounts, WorkflowError> {
        let (_, final_amount) = request.validate()?;
        let paid_amount = request.paid_amount.unwrap_or(claimed_amount);
        let tds_amount = request.tds_amount.unwrap_or(0.0);

        let expected = paid_amount - tds_amount;
        if (final_amount - expected).abs() > self.tolerance + ROUNDING_SLACK {
            return Err(WorkflowError::PaymentMismatch {
                paid_amount,
                tds_amount,
                final_amount,
                expected,
            });
        }

        Ok(PaymentAmounts {
            paid_amount,
            tds_amount,
            final_amount,
        })
    }
}

impl Default for PaymentReconciler {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SETTLEMENT WRITE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentOutcome {
    pub item_id: i64,
    pub reimbursement_id: i64,
    pub amounts: PaymentAmounts,
    /// Set when this payment settled the last open item.
    pub reimbursement_status: Option<ReimbursementStatus>,
}

/// Mark the item paid and roll `paid` up to the reimbursement once every
/// sibling is paid. Writes no approval record.
pub fn apply_payment(
    conn: &Connection,
    item_id: i64,
    reimbursement_id: i64,
    amounts: &PaymentAmounts,
) -> rusqlite::Result<PaymentOutcome> {
    debug_assert!(ItemStatus::ApprovedByFinance.can_transition_to(ItemStatus::Paid));

    let updated = conn.execute(
        "UPDATE reimbursement_items
         SET status = ?1, paid_amount = ?2, tds_amount = ?3, final_amount = ?4
         WHERE id = ?5 AND status = ?6",
        params![
            ItemStatus::Paid,
            amounts.paid_amount,
            amounts.tds_amount,
            amounts.final_amount,
            item_id,
            ItemStatus::ApprovedByFinance,
        ],
    )?;
    if updated != 1 {
        return Err(rusqlite::Error::QueryReturnedNoRows);
    }

    let statuses = sibling_statuses(conn, reimbursement_id)?;
    let reimbursement_status = if all_paid(&statuses) {
        update_reimbursement_status(conn, reimbursement_id, ReimbursementStatus::Paid)?;
        Some(ReimbursementStatus::Paid)
    } else {
        None
    };

    Ok(PaymentOutcome {
        item_id,
        reimbursement_id,
        amounts: *amounts,
        reimbursement_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures::*;
    use crate::db::{count_approval_records, get_item, get_reimbursement, insert_reimbursement, NewItem};

    #[test]
    fn test_reconcile_exact() {
        let reconciler = PaymentReconciler::new();
        let request = PaymentRequest::new(1, Some(1000.0), Some(100.0), 900.0);

        let amounts = reconciler.reconcile(1000.0, &request).unwrap();
        assert_eq!(amounts.paid_amount, 1000.0);
        assert_eq!(amounts.tds_amount, 100.0);
        assert_eq!(amounts.final_amount, 900.0);
    }

    #[test]
    fn test_reconcile_mismatch_names_expected() {
        let reconciler = PaymentReconciler::new();
        let request = PaymentRequest::new(1, Some(1000.0), Some(100.0), 800.0);

        let err = reconciler.reconcile(1000.0, &request).unwrap_err();
        assert!(matches!(err, WorkflowError::PaymentMismatch { .. }));
        assert!(err.to_string().contains("900.00"), "{}", err);
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_reconcile_within_tolerance() {
        let reconciler = PaymentReconciler::new();

        let up = PaymentRequest::new(1, Some(1000.0), Some(100.0), 900.01);
        assert!(reconciler.reconcile(1000.0, &up).is_ok());

        let down = PaymentRequest::new(1, Some(1000.0), Some(100.0), 899.99);
        assert!(reconciler.reconcile(1000.0, &down).is_ok());

        let outside = PaymentRequest::new(1, Some(1000.0), Some(100.0), 900.02);
        assert!(reconciler.reconcile(1000.0, &outside).is_err());
    }

    #[test]
    fn test_reconcile_accepts_exact_cent_difference() {
        let reconciler = PaymentReconciler::new();

        // 0.3 - 0.1 is 0.19999999999999998 in f64
        let request = PaymentRequest::new(1, Some(0.3), Some(0.1), 0.21);
        let amounts = reconciler.reconcile(0.3, &request).unwrap();
        assert_eq!(amounts.final_amount, 0.21);

        let below = PaymentRequest::new(1, Some(0.3), Some(0.1), 0.19);
        assert!(reconciler.reconcile(0.3, &below).is_ok());

        let beyond = PaymentRequest::new(1, Some(0.3), Some(0.1), 0.22);
        let err = reconciler.reconcile(0.3, &beyond).unwrap_err();
        assert!(err.to_string().contains("0.20"), "{}", err);
    }

    #[test]
    fn test_reconcile_defaults_to_claimed_amount() {
        let reconciler = PaymentReconciler::new();
        let request = PaymentRequest::new(1, None, None, 250.0);

        let amounts = reconciler.reconcile(250.0, &request).unwrap();
        assert_eq!(amounts.paid_amount, 250.0);
        assert_eq!(amounts.tds_amount, 0.0);

        let wrong = PaymentRequest::new(1, None, Some(25.0), 250.0);
        let err = reconciler.reconcile(250.0, &wrong).unwrap_err();
        assert!(err.to_string().contains("225.00"));
    }

    #[test]
    fn test_request_shape() {
        let missing_final = PaymentRequest {
            item_id: Some(3),
            ..Default::default()
        };
        assert!(matches!(
            missing_final.validate(),
            Err(WorkflowError::InvalidInput(msg)) if msg.contains("finalAmount")
        ));

        let missing_item = PaymentRequest {
            final_amount: Some(10.0),
            ..Default::default()
        };
        assert!(matches!(
            missing_item.validate(),
            Err(WorkflowError::InvalidInput(msg)) if msg.contains("itemId")
        ));

        let negative = PaymentRequest::new(3, Some(-5.0), None, 10.0);
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let request: PaymentRequest = serde_json::from_str(
            r#"{"itemId": 7, "paidAmount": 500, "tdsAmount": 50, "finalAmount": 450}"#,
        )
        .unwrap();
        assert_eq!(request, PaymentRequest::new(7, Some(500.0), Some(50.0), 450.0));
    }

    #[test]
    fn test_apply_payment_rolls_up_when_all_paid() {
        let conn = memory_db();
        let org = org(&conn);
        let (rid, ids) = insert_reimbursement(
            &conn,
            org.employee,
            &[NewItem::new("a", "a", 100.0), NewItem::new("b", "b", 200.0)],
        )
        .unwrap();
        force_status(&conn, ids[0], ItemStatus::ApprovedByFinance);
        force_status(&conn, ids[1], ItemStatus::ApprovedByFinance);

        let first = PaymentAmounts {
            paid_amount: 100.0,
            tds_amount: 0.0,
            final_amount: 100.0,
        };
        let outcome = apply_payment(&conn, ids[0], rid, &first).unwrap();
        assert_eq!(outcome.reimbursement_status, None);
        assert_ne!(
            get_reimbursement(&conn, rid).unwrap().unwrap().status,
            ReimbursementStatus::Paid
        );

        let second = PaymentAmounts {
            paid_amount: 200.0,
            tds_amount: 20.0,
            final_amount: 180.0,
        };
        let outcome = apply_payment(&conn, ids[1], rid, &second).unwrap();
        assert_eq!(outcome.reimbursement_status, Some(ReimbursementStatus::Paid));

        let item = get_item(&conn, ids[1]).unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Paid);
        assert_eq!(item.paid_amount, Some(200.0));
        assert_eq!(item.tds_amount, Some(20.0));
        assert_eq!(item.final_amount, Some(180.0));

        assert_eq!(
            get_reimbursement(&conn, rid).unwrap().unwrap().status,
            ReimbursementStatus::Paid
        );
        assert_eq!(count_approval_records(&conn).unwrap(), 0);
    }

    #[test]
    fn test_apply_payment_requires_finance_approved_row() {
        let conn = memory_db();
        let org = org(&conn);
        let (rid, ids) =
            insert_reimbursement(&conn, org.employee, &[NewItem::new("a", "a", 100.0)]).unwrap();

        let amounts = PaymentAmounts {
            paid_amount: 100.0,
            tds_amount: 0.0,
            final_amount: 100.0,
        };
        assert!(apply_payment(&conn, ids[0], rid, &amounts).is_err());
        assert_eq!(get_item(&conn, ids[0]).unwrap().unwrap().status, ItemStatus::Pending);
    }
}
