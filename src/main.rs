use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use colrev::ops::advisor;
use colrev::ops::data::Data;
use colrev::ops::dedupe::Dedupe;
use colrev::ops::explore::{self, Query};
use colrev::ops::hooks::{self, HookResult};
use colrev::ops::load::{self, Load};
use colrev::ops::pdf_get::PdfGet;
use colrev::ops::pdf_get_man::{PdfGetMan, PdfRetrieval};
use colrev::ops::pdf_prep::PdfPrep;
use colrev::ops::pdf_prep_man::PdfPrepMan;
use colrev::ops::prep::Prep;
use colrev::ops::prep_man::{ManualEdit, PrepMan};
use colrev::ops::prescreen::{ManualDecisions, Prescreen};
use colrev::ops::screen::Screen;
use colrev::ops::search::{self, Search};
use colrev::ops::status::StatusStats;
use colrev::ops::{distribute, env, init, remote, settings, trace, validate, Cancellation};
use colrev::{report, ColrevError, Environment, RecordState, Result, ReviewManager};

#[derive(Parser, Debug)]
#[command(name = "colrev")]
#[command(version)]
#[command(about = "Collaborative literature reviews on top of git", long_about = None)]
struct Cli {
    /// Project directory
    #[arg(long, short = 'C', global = true, default_value = ".")]
    path: PathBuf,

    /// Skip the precondition checks
    #[arg(long, short, global = true)]
    force: bool,

    /// Verbose output
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Set up a review project in an empty directory
    Init {
        #[arg(long, default_value = "literature_review")]
        review_type: String,
        #[arg(long)]
        title: Option<String>,
    },
    /// Run the search sources, or add one
    Search {
        /// Add a source: <ENDPOINT> <QUERY>
        #[arg(long, num_args = 2, value_names = ["ENDPOINT", "QUERY"])]
        add: Option<Vec<String>>,
        /// Only run sources whose filename contains this
        selection: Option<String>,
    },
    /// Import search results as records
    Load {
        /// Keep the IDs of the search files
        #[arg(long)]
        keep_ids: bool,
    },
    /// Prepare the metadata of imported records
    Prep,
    /// Fix records that need manual preparation (lists them without an ID)
    PrepMan {
        id: Option<String>,
        /// key=value
        #[arg(long = "set")]
        set: Vec<String>,
        #[arg(long)]
        remove: Vec<String>,
        /// Accept the defects of these fields
        #[arg(long)]
        ignore: Vec<String>,
    },
    /// Merge duplicates
    Dedupe,
    /// Include or exclude records based on their metadata
    Prescreen {
        #[arg(long)]
        include: Vec<String>,
        /// ID or ID=reason
        #[arg(long)]
        exclude: Vec<String>,
        #[arg(long)]
        include_all: bool,
    },
    /// Retrieve PDFs
    PdfGet,
    /// Link PDFs retrieved by hand (lists pending records without an ID)
    PdfGetMan {
        id: Option<String>,
        #[arg(long, conflicts_with = "not_available")]
        file: Option<PathBuf>,
        #[arg(long)]
        not_available: bool,
    },
    /// Check the retrieved PDFs
    PdfPrep,
    /// Mark PDFs fixed by hand as prepared (lists pending records without IDs)
    PdfPrepMan { ids: Vec<String> },
    /// Include or exclude records based on the full text
    Screen {
        #[arg(long)]
        include: Vec<String>,
        /// ID or ID=criterion=out;...
        #[arg(long)]
        exclude: Vec<String>,
        #[arg(long)]
        include_all: bool,
    },
    /// Update the synthesis outputs
    Data,
    /// Show the status and what to do next
    Status,
    /// Show what a commit changed in the records
    Validate {
        #[arg(default_value = "HEAD")]
        revision: String,
    },
    /// Show the history of a record
    Trace { id: String },
    /// Push to the remote
    Push {
        /// Apply pending corrections to curated repositories first
        #[arg(long)]
        corrections: bool,
    },
    /// Pull from the remote and refresh curated records
    Pull,
    /// Copy a file into another registered project
    Distribute { file: PathBuf, target: String },
    /// Manage the local index and the project registry
    Env {
        #[arg(long)]
        index: bool,
        #[arg(long)]
        register: Option<PathBuf>,
        #[arg(long)]
        status: bool,
    },
    /// Print the settings, or change them
    Settings {
        /// /json/pointer=<json>
        #[arg(long = "set")]
        set: Vec<String>,
    },
    /// List records
    Explore {
        #[arg(long)]
        state: Option<String>,
        text: Option<String>,
    },
    /// Git hooks
    Hooks {
        #[command(subcommand)]
        hook: Hook,
    },
}

#[derive(Subcommand, Debug)]
enum Hook {
    Check,
    Format,
    Share,
    Report { message_file: PathBuf },
}

fn manual_decisions(include: Vec<String>, exclude: Vec<String>, include_all: bool) -> ManualDecisions {
    ManualDecisions {
        include,
        exclude: exclude
            .into_iter()
            .map(|e| match e.split_once('=') {
                Some((id, detail)) => (id.to_string(), Some(detail.to_string())),
                None => (e, None),
            })
            .collect(),
        include_all,
    }
}

fn hook_exit(name: &str, result: &HookResult) -> ExitCode {
    report::print_hook_result(name, result);
    if result.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn open_project(cli: &Cli, environment: std::sync::Arc<Environment>) -> Result<ReviewManager> {
    Ok(ReviewManager::open(&cli.path, environment)?
        .with_force(cli.force)
        .with_verbose(cli.verbose)
        .with_command_line(std::env::args()))
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let environment = Environment::open()?;
    let cancellation = Cancellation::new();

    if let Command::Init { review_type, title } = &cli.command {
        let manager = init::init(&cli.path, review_type, title.as_deref(), environment)?;
        println!(
            "{} {} ({review_type})",
            "Initialized".green(),
            manager.paths().root().display()
        );
        return Ok(ExitCode::SUCCESS);
    }
    match &cli.command {
        Command::Distribute { file, target } => {
            let copied = distribute::distribute(&environment, file, target)?;
            println!("{} {}", "Copied to".green(), copied.display());
            return Ok(ExitCode::SUCCESS);
        }
        Command::Env { index, register, status } => {
            if let Some(path) = register {
                let path = env::register(&environment, path)?;
                println!("{} {}", "Registered".green(), path.display());
            }
            if *index {
                let summary = env::index(&environment)?;
                println!(
                    "{} {} inserted, {} amended, {} skipped",
                    "Indexed:".green(),
                    summary.inserted,
                    summary.amended,
                    summary.skipped
                );
            }
            if *status || (!*index && register.is_none()) {
                report::print_repo_statuses(&env::status(&environment).await?);
            }
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let mut manager = open_project(&cli, environment)?;
    match cli.command {
        Command::Init { .. } | Command::Distribute { .. } | Command::Env { .. } => {}
        Command::Search { add, selection } => {
            if let Some(add) = add {
                let source = search::add_source(&mut manager, &add[0], &add[1])?;
                println!("{} {}", "Added source".green(), source.filename.display());
            }
            report::print_outcome(&Search::new(&manager)?.run(selection.as_deref()).await?);
        }
        Command::Load { keep_ids } => {
            let added = load::add_new_sources(&mut manager)?;
            for name in added {
                println!("{} {name}", "New source:".green());
            }
            report::print_outcome(&Load::new(&manager)?.run(keep_ids).await?);
        }
        Command::Prep => {
            cancellation.watch_ctrl_c();
            report::print_outcome(&Prep::new(&manager)?.with_cancellation(cancellation).run().await?);
        }
        Command::PrepMan { id, set, remove, ignore } => {
            let mut prep_man = PrepMan::new(&manager)?;
            let Some(id) = id else {
                for (record, defects) in prep_man.pending()? {
                    let defects: Vec<String> = defects.iter().map(|(f, d)| format!("{f}: {d}")).collect();
                    println!("  {} {}", format!("[{}]", record.id).dimmed(), defects.join(", "));
                }
                return Ok(ExitCode::SUCCESS);
            };
            let mut edit = ManualEdit::parse_assignments(&id, &set)?;
            for key in &remove {
                edit = edit.remove(key);
            }
            for key in &ignore {
                edit = edit.ignore(key);
            }
            report::print_outcome(&prep_man.run(&[edit]).await?);
        }
        Command::Dedupe => report::print_outcome(&Dedupe::new(&manager)?.run().await?),
        Command::Prescreen { include, exclude, include_all } => {
            let manual = manual_decisions(include, exclude, include_all);
            report::print_outcome(&Prescreen::new(&manager)?.run(&manual).await?);
        }
        Command::PdfGet => {
            cancellation.watch_ctrl_c();
            report::print_outcome(&PdfGet::new(&manager)?.with_cancellation(cancellation).run().await?);
        }
        Command::PdfGetMan { id, file, not_available } => {
            let mut pdf_get_man = PdfGetMan::new(&manager)?;
            let Some(id) = id else {
                report::print_records(&pdf_get_man.pending()?);
                return Ok(ExitCode::SUCCESS);
            };
            let retrieval = match (file, not_available) {
                (Some(path), _) => PdfRetrieval::Found { id, path },
                (None, true) => PdfRetrieval::NotAvailable { id },
                (None, false) => {
                    return Err(ColrevError::InvalidInput(
                        "pass --file <PDF> or --not-available".to_string(),
                    ))
                }
            };
            report::print_outcome(&pdf_get_man.run(&[retrieval]).await?);
        }
        Command::PdfPrep => {
            cancellation.watch_ctrl_c();
            report::print_outcome(&PdfPrep::new(&manager)?.with_cancellation(cancellation).run().await?);
        }
        Command::PdfPrepMan { ids } => {
            let mut pdf_prep_man = PdfPrepMan::new(&manager)?;
            if ids.is_empty() {
                report::print_records(&pdf_prep_man.pending()?);
            } else {
                report::print_outcome(&pdf_prep_man.run(&ids).await?);
            }
        }
        Command::Screen { include, exclude, include_all } => {
            let manual = manual_decisions(include, exclude, include_all);
            report::print_outcome(&Screen::new(&manager)?.run(&manual).await?);
        }
        Command::Data => report::print_outcome(&Data::new(&manager)?.run().await?),
        Command::Status => {
            let records = if manager.dataset().records_file_exists() {
                manager.dataset().load_records()?
            } else {
                Default::default()
            };
            report::print_status(&StatusStats::compute(&records));
            report::print_advice(&advisor::advise(&manager).await?);
        }
        Command::Validate { revision } => {
            report::print_validation(&validate::validate(&manager, &revision)?);
        }
        Command::Trace { id } => report::print_trace(&trace::trace(&manager, &id)?),
        Command::Push { corrections } => {
            let summary = remote::push(&manager, corrections)?;
            if summary.corrections_applied > 0 {
                println!("{} corrections applied", summary.corrections_applied);
            }
            if summary.pushed {
                println!("{}", "Pushed".green());
            }
        }
        Command::Pull => report::print_outcome(&remote::pull(&manager)?),
        Command::Settings { set } => {
            if set.is_empty() {
                println!("{}", manager.settings());
            } else if let Some(sha) = settings::set(&mut manager, &set)? {
                println!("{} {}", "Committed".green(), &sha[..sha.len().min(8)]);
            }
        }
        Command::Explore { state, text } => {
            let state = state
                .map(|s| s.parse::<RecordState>())
                .transpose()
                .map_err(|e| ColrevError::InvalidInput(e.to_string()))?;
            report::print_records(&explore::explore(&manager, &Query { state, text })?);
        }
        Command::Hooks { hook } => {
            return Ok(match hook {
                Hook::Check => hook_exit("check", &hooks::check(&manager)?),
                Hook::Format => hook_exit("format", &hooks::format(&manager)?),
                Hook::Share => hook_exit("share", &hooks::share(&manager)?),
                Hook::Report { message_file } => hook_exit("report", &hooks::report(&manager, &message_file)?),
            });
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "colrev=debug" } else { "colrev=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e}", "Error:".red().bold());
            ExitCode::from(e.exit_code())
        }
    }
}
