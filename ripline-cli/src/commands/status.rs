//! The `status` command: per-track pipeline state rollup.

use super::context;
use crate::error::CliError;
use ripline::config::Settings;
use ripline::plan::{BackupPlan, DiscId};
use ripline::queue::QueueEngine;

pub async fn execute(disc_id: Option<String>, settings: &Settings) -> Result<(), CliError> {
    let ctx = context(settings);

    let plans: Vec<BackupPlan> = match disc_id {
        Some(id) => vec![ctx.storage.read_plan(&DiscId::new(id)).await?],
        None => ctx.storage.list_plans().await?,
    };

    if plans.is_empty() {
        println!("No plans");
        return Ok(());
    }

    for plan in &plans {
        print_plan(&ctx.queue, plan).await;
    }
    Ok(())
}

async fn print_plan(queue: &QueueEngine, plan: &BackupPlan) {
    println!(
        "{} ({}, {}, {})",
        plan.title,
        plan.disc_id,
        plan.plan_type.as_str(),
        plan.status.as_str()
    );
    println!(
        "  {:>5} {:<30} {:<11} {:<11} {:<11} {:<11} {}",
        "TRACK", "NAME", "EXTRACT", "TRANSCODE", "REVIEW", "COPY", "STATUS"
    );

    for track in &plan.tracks {
        let state = queue.track_state(plan, track).await;
        println!(
            "  {:>5} {:<30} {:<11} {:<11} {:<11} {:<11} {}",
            track.track_number,
            truncate(&track.name, 30),
            state.extract,
            state.transcode,
            state.review,
            state.copy,
            state.status
        );
    }
    println!();
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}
