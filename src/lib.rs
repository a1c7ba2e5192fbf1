// Expense Approvals - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod models;
pub mod error;
pub mod db;
pub mod validator;   // Eligibility guard, shared by every stage
pub mod mutations;   // Manager/HR decisions and finance rejection
pub mod settlement;  // Finance approval and coarse status rollup
pub mod payment;     // Payment reconciliation and settlement
pub mod orchestrator;
pub mod queue;       // Role-scoped work queues
pub mod enrichment;
pub mod config;

#[cfg(feature = "server")]
pub mod api;

// Re-export commonly used types
pub use models::{
    Actor, ApprovalRecord, Attachment, Decision, ItemStatus, Reimbursement,
    ReimbursementItem, ReimbursementStatus, Role, Stage,
};
pub use error::WorkflowError;
pub use db::{
    setup_database, insert_department, insert_user, insert_reimbursement, insert_attachment,
    get_item, get_reimbursement, get_approval_history, Database, NewItem, NewUser,
};
pub use validator::{validate_item_for_action, EligibleItem, ItemGuard};
pub use mutations::{apply_approval, apply_rejection, ItemTransition};
pub use settlement::{apply_finance_approval, settlement_status, review_status, SettlementOutcome};
pub use payment::{apply_payment, PaymentAmounts, PaymentOutcome, PaymentReconciler, PaymentRequest};
pub use orchestrator::{run_in_transaction, ApprovalWorkflow, DecisionRequest, TransitionOutcome};
pub use queue::{
    build_pending_items_query, build_queue_query, fetch_queue, Predicate, QueueFilter,
    QueueItem, QueueRequest,
};
pub use enrichment::{enrich_items, load_reimbursement_detail, Enriched, ReimbursementDetail};
pub use config::{init_tracing, AppConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
