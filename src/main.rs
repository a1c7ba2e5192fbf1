use anyhow::{bail, Context, Result};
use std::env;

use expense_approvals::{
    build_queue_query, enrich_items, fetch_queue, init_tracing, insert_department,
    insert_reimbursement, insert_user, load_reimbursement_detail, Actor, AppConfig,
    ApprovalWorkflow, Database, DecisionRequest, NewItem, NewUser, PaymentRequest, QueueFilter,
    QueueRequest, Role,
};

fn main() -> Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config);

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("init") => run_init(&config)?,
        Some("queue") => run_queue(&config, &args[2..])?,
        Some("demo") => run_demo()?,
        _ => print_usage(),
    }

    Ok(())
}

fn print_usage() {
    println!("Expense Approvals v{}", expense_approvals::VERSION);
    println!();
    println!("Usage:");
    println!("  expense-approvals init                          Create the database schema");
    println!("  expense-approvals queue <role> <actor-id> [status]");
    println!("                                                  Print a work queue as JSON");
    println!("  expense-approvals demo                          Walk one claim through every stage");
}

fn run_init(config: &AppConfig) -> Result<()> {
    println!("🗄️  Setting up database - SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    Database::open(&config.database_path, config.busy_timeout)?;
    println!("✓ Schema ready at {:?}", config.database_path);

    Ok(())
}

fn run_queue(config: &AppConfig, args: &[String]) -> Result<()> {
    let (role, actor_id) = match args {
        [role, actor_id, ..] => (role, actor_id),
        _ => bail!("queue requires <role> <actor-id>"),
    };
    let role: Role = role.parse()?;
    let actor_id: i64 = actor_id
        .parse()
        .with_context(|| format!("actor id '{}' is not a number", actor_id))?;
    let filter = match args.get(2) {
        Some(status) => status.parse::<QueueFilter>()?,
        None => QueueFilter::Pending,
    };

    let db = Database::open(&config.database_path, config.busy_timeout)?;
    let conn = db.checkout()?;

    let predicate = build_queue_query(&QueueRequest::new(role, Some(actor_id), filter))?;
    let rows = fetch_queue(&conn, &predicate)?;
    let enriched = enrich_items(&conn, rows, None);

    println!("{}", serde_json::to_string_pretty(&enriched)?);
    Ok(())
}

fn run_demo() -> Result<()> {
    println!("🧾 Expense Approvals - end-to-end demo (in-memory)");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let db = Database::open_in_memory()?;

    // 1. Seed org chart
    println!("\n👥 Seeding users...");
    let (manager, hr, finance, employee) = {
        let conn = db.checkout()?;
        let department = insert_department(&conn, "Engineering")?;
        let seed = |name: &str, role: Role, manager_id: Option<i64>| {
            let mut user = NewUser::new(name, role, manager_id);
            user.department_id = Some(department);
            insert_user(&conn, &user)
        };
        let manager = seed("Maya Manager", Role::Manager, None)?;
        let hr = seed("Hana Hr", Role::Hr, None)?;
        let finance = seed("Fred Finance", Role::Finance, None)?;
        let employee = seed("Eve Employee", Role::Employee, Some(manager))?;
        (
            Actor::new(manager, Role::Manager),
            Actor::new(hr, Role::Hr),
            Actor::new(finance, Role::Finance),
            employee,
        )
    };
    println!("✓ Manager, HR, finance and one employee created");

    // 2. Submit a claim
    println!("\n📝 Submitting reimbursement...");
    let (reimbursement_id, item_ids) = {
        let conn = db.checkout()?;
        insert_reimbursement(
            &conn,
            employee,
            &[
                NewItem::new("travel", "Flight to client site", 500.0),
                NewItem::new("meals", "Team dinner", 120.0),
            ],
        )?
    };
    println!("✓ Reimbursement #{} with {} items", reimbursement_id, item_ids.len());

    let (flight, dinner) = match item_ids.as_slice() {
        [flight, dinner] => (*flight, *dinner),
        _ => bail!("expected two items"),
    };

    // 3. Walk the stages
    let workflow = ApprovalWorkflow::new(db.clone());

    println!("\n✅ Stage decisions...");
    for actor in [&manager, &hr] {
        for item in [flight, dinner] {
            let outcome = workflow.approve(actor, &DecisionRequest::new(item, Some("Looks good")))?;
            println!(
                "   {} approved item {} → {} (claim {})",
                actor.role, item, outcome.status, outcome.reimbursement_status
            );
        }
    }

    let outcome = workflow.approve(&finance, &DecisionRequest::new(flight, None))?;
    println!(
        "   finance approved item {} → {} (claim {})",
        flight, outcome.status, outcome.reimbursement_status
    );
    let outcome = workflow.reject(
        &finance,
        &DecisionRequest::new(dinner, Some("Alcohol is not reimbursable")),
    )?;
    println!(
        "   finance rejected item {} → {} (claim {})",
        dinner, outcome.status, outcome.reimbursement_status
    );

    // 4. Pay what cleared
    println!("\n💸 Settling payment...");
    let payment = PaymentRequest::new(flight, Some(500.0), Some(50.0), 450.0);
    let paid = workflow.mark_paid(&finance, &payment)?;
    println!(
        "✓ Item {} paid: {:.2} - TDS {:.2} = {:.2}",
        paid.item_id, paid.amounts.paid_amount, paid.amounts.tds_amount, paid.amounts.final_amount
    );

    // 5. Final state
    println!("\n🔍 Final reimbursement:");
    let conn = db.checkout()?;
    let detail = load_reimbursement_detail(&conn, reimbursement_id)?
        .context("reimbursement vanished")?;
    println!("{}", serde_json::to_string_pretty(&detail)?);

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("🎉 Demo complete: claim is {}", detail.reimbursement.status);

    Ok(())
}
