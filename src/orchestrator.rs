// Transaction Orchestrator - one request, one connection, one transaction
//
//   checkout → shape check → BEGIN IMMEDIATE → validate → mutate → COMMIT
//
// Any failure after BEGIN rolls back. A failed ROLLBACK is logged and the
// connection still goes back to the pool when the guard drops.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::WorkflowError;
use crate::models::{Actor, Decision, ItemStatus, ReimbursementStatus, Role, Stage};
use crate::mutations::{apply_approval, apply_rejection, ItemTransition};
use crate::payment::{apply_payment, PaymentOutcome, PaymentReconciler, PaymentRequest};
use crate::settlement::{apply_finance_approval, projected_statuses, review_status};
use crate::validator::{validate_item_for_action, ItemGuard};

/// Payload of an approve/reject request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub item_id: Option<i64>,
    pub comments: Option<String>,
}

impl DecisionRequest {
    pub fn new(item_id: i64, comments: Option<&str>) -> Self {
        DecisionRequest {
            item_id: Some(item_id),
            comments: comments.map(str::to_string),
        }
    }

    fn validate(&self, decision: Decision) -> Result<(i64, Option<String>), WorkflowError> {
        let item_id = self
            .item_id
            .ok_or_else(|| WorkflowError::InvalidInput("itemId is required".to_string()))?;

        let comments = self
            .comments
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        if decision == Decision::Rejected && comments.is_none() {
            return Err(WorkflowError::InvalidInput(
                "Comments are required when rejecting an item".to_string(),
            ));
        }

        Ok((item_id, comments))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionOutcome {
    pub item_id: i64,
    pub reimbursement_id: i64,
    pub stage: Stage,
    pub decision: Decision,
    pub previous_status: ItemStatus,
    pub status: ItemStatus,
    pub reimbursement_status: ReimbursementStatus,
    pub event_id: String,
}

/// Entry point for every state-changing request.
#[derive(Clone)]
pub struct ApprovalWorkflow {
    db: Database,
    reconciler: PaymentReconciler,
}

impl ApprovalWorkflow {
    pub fn new(db: Database) -> Self {
        ApprovalWorkflow {
            db,
            reconciler: PaymentReconciler::new(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn approve(
        &self,
        actor: &Actor,
        request: &DecisionRequest,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.decide(actor, Decision::Approved, request)
    }

    pub fn reject(
        &self,
        actor: &Actor,
        request: &DecisionRequest,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.decide(actor, Decision::Rejected, request)
    }

    /// Apply the actor's stage decision to one item.
    pub fn decide(
        &self,
        actor: &Actor,
        decision: Decision,
        request: &DecisionRequest,
    ) -> Result<TransitionOutcome, WorkflowError> {
        let stage = actor.role.stage().ok_or_else(|| WorkflowError::Forbidden {
            role: actor.role.to_string(),
        })?;
        let (item_id, comments) = request.validate(decision)?;

        let mut conn = self.db.checkout()?;
        let outcome = run_in_transaction(&mut conn, "decide", |tx| {
            decide_in_tx(tx, actor.id, stage, decision, item_id, comments)
        })?;

        tracing::info!(
            item_id = outcome.item_id,
            reimbursement_id = outcome.reimbursement_id,
            stage = %outcome.stage,
            decision = outcome.decision.as_str(),
            status = %outcome.status,
            reimbursement_status = %outcome.reimbursement_status,
            actor_id = actor.id,
            "item transition committed"
        );

        Ok(outcome)
    }

    /// Settle a finance-approved item.
    pub fn mark_paid(
        &self,
        actor: &Actor,
        request: &PaymentRequest,
    ) -> Result<PaymentOutcome, WorkflowError> {
        if actor.role != Role::Finance {
            return Err(WorkflowError::Forbidden {
                role: actor.role.to_string(),
            });
        }
        let (item_id, _) = request.validate()?;

        let mut conn = self.db.checkout()?;
        let outcome = run_in_transaction(&mut conn, "mark_paid", |tx| {
            let guard = ItemGuard::for_payment(item_id, actor.id);
            let eligible =
                validate_item_for_action(tx, &guard)?.ok_or_else(WorkflowError::not_payable)?;

            let amounts = self.reconciler.reconcile(eligible.item.amount, request)?;
            Ok(apply_payment(tx, item_id, eligible.reimbursement_id(), &amounts)?)
        })?;

        tracing::info!(
            item_id = outcome.item_id,
            reimbursement_id = outcome.reimbursement_id,
            paid_amount = outcome.amounts.paid_amount,
            tds_amount = outcome.amounts.tds_amount,
            final_amount = outcome.amounts.final_amount,
            reimbursement_paid = outcome.reimbursement_status.is_some(),
            actor_id = actor.id,
            "payment committed"
        );

        Ok(outcome)
    }
}

fn decide_in_tx(
    tx: &Transaction<'_>,
    actor_id: i64,
    stage: Stage,
    decision: Decision,
    item_id: i64,
    comments: Option<String>,
) -> Result<TransitionOutcome, WorkflowError> {
    let guard = ItemGuard::for_stage(stage, item_id, actor_id);
    let eligible = validate_item_for_action(tx, &guard)?.ok_or_else(WorkflowError::not_eligible)?;

    let reimbursement_id = eligible.reimbursement_id();
    let previous_status = eligible.item.status;
    let next_status = stage.next_status(decision);

    let (event_id, reimbursement_status) = match (stage, decision) {
        (Stage::Finance, Decision::Approved) => {
            let settled = apply_finance_approval(
                tx,
                item_id,
                actor_id,
                comments.as_deref(),
                reimbursement_id,
            )?;
            (settled.event_id, settled.reimbursement_status)
        }
        (_, decision) => {
            let projected = projected_statuses(tx, reimbursement_id, item_id, next_status)?;
            let transition = ItemTransition {
                item_id,
                approver_id: actor_id,
                stage,
                next_status,
                comments,
                reimbursement_id,
                reimbursement_status: review_status(&projected),
            };
            let event_id = match decision {
                Decision::Approved => apply_approval(tx, &transition)?,
                Decision::Rejected => apply_rejection(tx, &transition)?,
            };
            (event_id, transition.reimbursement_status)
        }
    };

    Ok(TransitionOutcome {
        item_id,
        reimbursement_id,
        stage,
        decision,
        previous_status,
        status: next_status,
        reimbursement_status,
        event_id,
    })
}

/// Run `body` inside an IMMEDIATE transaction on an already checked-out
/// connection. Commits on `Ok`, rolls back on `Err`.
pub fn run_in_transaction<T, F>(
    conn: &mut Connection,
    action: &str,
    body: F,
) -> Result<T, WorkflowError>
where
    F: FnOnce(&Transaction<'_>) -> Result<T, WorkflowError>,
{
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| {
            tracing::error!(action, error = %e, "failed to begin transaction");
            WorkflowError::Database(e)
        })?;

    match body(&tx) {
        Ok(value) => {
            tx.commit().map_err(|e| {
                tracing::error!(action, error = %e, "commit failed");
                WorkflowError::Database(e)
            })?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                tracing::error!(action, error = %rollback_err, "rollback failed");
            }
            match &err {
                WorkflowError::Database(e) => {
                    tracing::error!(action, error = %e, "transaction rolled back")
                }
                WorkflowError::Unavailable(e) => {
                    tracing::error!(action, error = %e, "transaction rolled back")
                }
                other => tracing::warn!(action, error = %other, "transaction rolled back"),
            }
            Err(err)
        }
    }
}
