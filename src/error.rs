// Workflow error taxonomy
//
// Input errors and payment mismatches carry a message the caller can act on.
// Eligibility errors stay opaque. Database errors are logged in
// full where they happen and surface as a generic failure.

use thiserror::Error;

pub const NOT_ELIGIBLE_MESSAGE: &str = "Item not found or not eligible";
pub const NOT_PAYABLE_MESSAGE: &str = "Item not found or not approved by finance";

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Missing or malformed request fields, detected before any write.
    #[error("{0}")]
    InvalidInput(String),

    /// Role is not allowed to perform the action at all.
    #[error("Role {role} cannot perform this action")]
    Forbidden { role: String },

    /// Item absent, in the wrong status, or not owned by the acting manager.
    /// The message never says which.
    #[error("{0}")]
    NotEligible(&'static str),

    /// final amount does not equal paid minus TDS within tolerance.
    #[error(
        "Final amount {final_amount:.2} does not match paid amount {paid_amount:.2} minus TDS {tds_amount:.2} (expected {expected:.2})"
    )]
    PaymentMismatch {
        paid_amount: f64,
        tds_amount: f64,
        final_amount: f64,
        expected: f64,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection checkout failed (poisoned pool, etc.).
    #[error("Connection unavailable: {0}")]
    Unavailable(String),
}

impl WorkflowError {
    pub fn not_eligible() -> Self {
        WorkflowError::NotEligible(NOT_ELIGIBLE_MESSAGE)
    }

    pub fn not_payable() -> Self {
        WorkflowError::NotEligible(NOT_PAYABLE_MESSAGE)
    }

    /// HTTP-style status used by the request boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            WorkflowError::InvalidInput(_) | WorkflowError::PaymentMismatch { .. } => 400,
            WorkflowError::Forbidden { .. } => 403,
            WorkflowError::NotEligible(_) => 404,
            WorkflowError::Database(_) | WorkflowError::Unavailable(_) => 500,
        }
    }

    /// Message safe to hand back to the caller.
    pub fn public_message(&self) -> String {
        match self {
            WorkflowError::Database(_) | WorkflowError::Unavailable(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}
