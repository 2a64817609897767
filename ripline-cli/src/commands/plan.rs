//! The `plan` subcommands: inspect plans and scanned-but-unplanned discs.

use super::context;
use crate::error::CliError;
use clap::Subcommand;
use ripline::config::Settings;
use ripline::plan::DiscId;

#[derive(Subcommand)]
pub enum PlanCommand {
    /// List all plans
    List,
    /// Print one plan as JSON
    Show { disc_id: String },
    /// List discs that have been scanned but not yet planned
    Pending,
}

pub async fn execute(cmd: PlanCommand, settings: &Settings) -> Result<(), CliError> {
    let ctx = context(settings);
    match cmd {
        PlanCommand::List => {
            let plans = ctx.storage.list_plans().await?;
            if plans.is_empty() {
                println!("No plans");
                return Ok(());
            }
            println!(
                "{:<34} {:<6} {:<10} {:>6}",
                "DISC", "TYPE", "STATUS", "TRACKS"
            );
            for plan in plans {
                println!(
                    "{:<34} {:<6} {:<10} {:>6}",
                    plan.disc_id,
                    plan.plan_type.as_str(),
                    plan.status.as_str(),
                    plan.tracks.len()
                );
            }
        }
        PlanCommand::Show { disc_id } => {
            let plan = ctx.storage.read_plan(&DiscId::new(disc_id)).await?;
            // Show exactly what is on disk, pretty-printed.
            println!(
                "{}",
                serde_json::to_string_pretty(&plan).expect("plan serializes")
            );
        }
        PlanCommand::Pending => {
            let pending = ctx.storage.pending_plans().await?;
            if pending.is_empty() {
                println!("No discs waiting for a plan");
            } else {
                for disc in pending {
                    println!("{disc}");
                }
            }
        }
    }
    Ok(())
}
