//! Console output of the CLI.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::matcher::FieldChange;
use crate::ops::advisor::{Advice, Instruction};
use crate::ops::env::RepoStatus;
use crate::ops::hooks::HookResult;
use crate::ops::status::StatusStats;
use crate::ops::trace::TraceStep;
use crate::ops::validate::ValidationItem;
use crate::ops::Outcome;
use crate::process::RecordState;
use crate::record::{fields, Record};

/// Progress over the records of an operation.
pub fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

fn colored_state(state: RecordState) -> colored::ColoredString {
    let name = state.as_str();
    match state {
        RecordState::RevSynthesized | RecordState::RevIncluded => name.green(),
        RecordState::RevExcluded | RecordState::RevPrescreenExcluded | RecordState::PdfNotAvailable => {
            name.red()
        }
        RecordState::MdNeedsManualPreparation
        | RecordState::PdfNeedsManualRetrieval
        | RecordState::PdfNeedsManualPreparation => name.yellow(),
        _ => name.normal(),
    }
}

pub fn print_status(stats: &StatusStats) {
    println!();
    println!("{}", "Status".bold());
    println!("{}", "=".repeat(50));
    if stats.nr_records == 0 {
        println!("  no records loaded");
        return;
    }
    for state in RecordState::ALL {
        let current = stats.current(state);
        let overall = stats.overall.get(&state).copied().unwrap_or(0);
        if current == 0 && overall == 0 {
            continue;
        }
        println!(
            "  {:<30} {:>6} {}",
            colored_state(state),
            current,
            format!("(overall {overall})").dimmed()
        );
    }
    println!();
    println!(
        "  {} records from {} origins, {} duplicates removed, {} curated",
        stats.nr_records, stats.nr_origins, stats.md_duplicates_removed, stats.nr_curated_records
    );
    println!(
        "  progress: {:.0}% ({}/{} atomic steps)",
        stats.progress(),
        stats.completed_atomic_steps,
        stats.atomic_steps
    );
    println!();
}

fn print_instructions(title: &str, instructions: &[Instruction]) {
    if instructions.is_empty() {
        return;
    }
    println!("{}", title.bold());
    for instruction in instructions {
        let marker = if instruction.priority {
            "!".red().bold()
        } else {
            "-".normal()
        };
        match &instruction.cmd {
            Some(cmd) => println!("  {marker} {}: {}", instruction.msg, cmd.cyan()),
            None => println!("  {marker} {}", instruction.msg),
        }
    }
    println!();
}

pub fn print_advice(advice: &Advice) {
    print_instructions("Next steps", &advice.review);
    print_instructions("Environment", &advice.environment);
    print_instructions("Collaboration", &advice.collaboration);
}

pub fn print_outcome(outcome: &Outcome) {
    for ((from, to), n) in outcome.transitions.counts() {
        println!("  {} -> {}: {n}", colored_state(from), colored_state(to));
    }
    if !outcome.transitions.removed.is_empty() {
        println!("  removed (merged): {}", outcome.transitions.removed.len());
    }
    for message in &outcome.messages {
        println!("  {}", message.yellow());
    }
    match &outcome.commit {
        Some(sha) => println!("{} {}", "Committed".green(), &sha[..sha.len().min(8)]),
        None => println!("{}", "No changes to commit".dimmed()),
    }
}

pub fn print_hook_result(name: &str, result: &HookResult) {
    let verdict = if result.passed { "passed".green() } else { "failed".red().bold() };
    println!("{name}: {verdict}");
    for message in &result.messages {
        println!("  {message}");
    }
}

fn print_change(change: &FieldChange) {
    println!(
        "    {:<12} {} {} {}",
        change.field,
        truncate(change.before.as_deref().unwrap_or("-"), 50).red(),
        "->".dimmed(),
        truncate(change.after.as_deref().unwrap_or("-"), 50).green()
    );
}

pub fn print_validation(items: &[ValidationItem]) {
    if items.is_empty() {
        println!("{}", "No record changes in this commit".dimmed());
        return;
    }
    for item in items {
        let heading = if item.is_merge() {
            format!("[{}] merged with {}", item.id, item.prior_id)
        } else {
            format!("[{}]", item.id)
        };
        println!(
            "{} {} -> {} {}",
            heading.bold(),
            item.status.0,
            item.status.1,
            format!("(title similarity {:.2})", item.similarity).dimmed()
        );
        for change in &item.changes {
            print_change(change);
        }
    }
}

pub fn print_trace(steps: &[TraceStep]) {
    for step in steps {
        println!(
            "{} {} {}",
            step.commit[..step.commit.len().min(8)].yellow(),
            step.date.dimmed(),
            step.message
        );
        println!("    {} {}", step.id, colored_state(step.status));
        for change in &step.changes {
            print_change(change);
        }
    }
}

pub fn print_records(records: &[Record]) {
    for record in records {
        println!(
            "  {} {} {}",
            format!("[{}]", record.id).dimmed(),
            colored_state(record.status),
            truncate(record.get(fields::TITLE).unwrap_or("(no title)"), 70)
        );
    }
    println!("{} records", records.len());
}

pub fn print_repo_statuses(statuses: &[RepoStatus]) {
    for repo in statuses {
        let progress = repo
            .progress
            .map(|p| format!("{p:.0}%"))
            .unwrap_or_else(|| "-".to_string());
        let remote = match repo.remote {
            Some(r) => format!("ahead {}, behind {}", r.ahead, r.behind),
            None => "no remote".to_string(),
        };
        let dirty = if repo.dirty { " (uncommitted changes)".yellow() } else { "".normal() };
        println!("  {:<30} {:>5}  {}{dirty}", repo.name.bold(), progress, remote.dimmed());
        if let Some(error) = &repo.error {
            println!("    {}", error.red());
        }
    }
}
