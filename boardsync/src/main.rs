//! `boardsync` — drive the sync engine from the command line.
//!
//! Loads a board from a JSON file into an in-process authority, fetches it
//! into the replica cache, runs one operation through the same engine,
//! drag controller and name editor a UI would use, prints the board
//! grouped by container and writes the authority's copy back.
//!
//! ```bash
//! # Show the built-in demo board
//! cargo run --bin boardsync
//!
//! # Drag a task onto another section of a board file
//! cargo run --bin boardsync -- --board board.json drag task-2 --over section-done
//!
//! # Rename through the debounced editor, with debug logs
//! BOARDSYNC_LOG=debug cargo run --bin boardsync -- -b board.json rename task-1 "Write docs"
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use boardsync::cache::{BoardView, ReplicaCache};
use boardsync::coalesce::{EditError, EditTarget, NameEditor};
use boardsync::config::{CliArgs, Command, SyncConfig};
use boardsync::drag::{DragController, DragError, DropOutcome};
use boardsync::engine::{EngineEvent, Mutation, MutationEngine, MutationError, Outcome};
use boardsync::poll::{Poller, Refresher};
use boardsync::remote::RemoteError;
use boardsync::remote::memory::InMemoryRemote;
use boardsync_proto::board::{Board, Section, Task};
use boardsync_proto::ids::{BoardId, ContainerRef, IdKind, SectionId, TaskId, UserId};
use boardsync_proto::intent::{MoveIntent, SectionMoveIntent, TaskPatch};

/// Errors that end a `boardsync` run.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to read board file {path}: {source}")]
    ReadBoard {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write board file {path}: {source}")]
    WriteBoard {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid board JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid board: {0}")]
    Integrity(#[from] boardsync_proto::board::IntegrityError),

    #[error("{0}")]
    Usage(String),

    #[error("fetch failed: {0}")]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    #[error(transparent)]
    Drag(#[from] DragError),

    #[error(transparent)]
    Edit(#[from] EditError),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match SyncConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            SyncConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("boardsync starting");

    let code = match run(&cli, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    };
    tracing::info!("boardsync exiting");
    code
}

/// Initialize file-based logging.
///
/// Logs go to a file so stdout carries only the board. Returns a
/// [`WorkerGuard`] that must be held until shutdown to flush buffered
/// entries.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("boardsync.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(cli: &CliArgs, config: &SyncConfig) -> Result<(), CliError> {
    let seed = match &cli.board {
        Some(path) => read_board(path)?,
        None => demo_board(),
    };
    seed.check_integrity()?;
    let key = seed.id.clone();

    let remote = Arc::new(InMemoryRemote::with_board(seed));
    let (cache, refetch_rx) = ReplicaCache::new(config.refetch_buffer);
    let cache = Arc::new(cache);
    let (engine, mut events) = MutationEngine::new(
        Arc::clone(&cache),
        Arc::clone(&remote),
        config.retry(),
        config.event_buffer,
    );
    let engine = Arc::new(engine);
    let refresher = Arc::new(Refresher::new(Arc::clone(&cache), Arc::clone(&remote)));

    refresher.refresh(&key).await?;

    let background = Arc::clone(&refresher);
    let refetch_task = tokio::spawn(async move { background.run(refetch_rx).await });
    let poller = config
        .poll_enabled
        .then(|| Poller::spawn(Arc::clone(&refresher), key.clone(), config.poll_interval));

    let command = cli.command.clone().unwrap_or(Command::Show);
    let result = execute(&engine, &key, command, config).await;

    if let Some(handle) = poller {
        handle.stop();
    }
    refetch_task.abort();
    report_events(&mut events);

    // Show the authority's state, whatever the command did.
    refresher.refresh(&key).await?;
    if let Some(view) = cache.view(&key) {
        print_view(&view);
    }

    if let Some(path) = &cli.board
        && let Some(board) = remote.board(&key)
    {
        write_board(path, &board)?;
    }
    result
}

async fn execute(
    engine: &Arc<MutationEngine<InMemoryRemote>>,
    key: &BoardId,
    command: Command,
    config: &SyncConfig,
) -> Result<(), CliError> {
    let outcome = match command {
        Command::Show => return Ok(()),
        Command::Drag { subject, over } => {
            let mut drag = DragController::new(Arc::clone(engine));
            drag.start(key, &subject)?;
            return match drag.release(over.as_deref()).await? {
                DropOutcome::Dispatched(outcome) => {
                    report_outcome(&outcome);
                    Ok(())
                }
                DropOutcome::NoOp => {
                    println!("dropped in place, nothing sent");
                    Ok(())
                }
                DropOutcome::Restored => {
                    println!("no drop target, board restored");
                    Ok(())
                }
            };
        }
        Command::MoveTask {
            task,
            to,
            before,
            after,
        } => {
            let target = ContainerRef::from_drop_zone(&to)
                .ok_or_else(|| CliError::Usage(format!("not a container id: {to}")))?;
            let intent = MoveIntent {
                subject_id: TaskId::new(task),
                target_container: target.section_id().cloned(),
                before_id: before.map(TaskId::new),
                after_id: after.map(TaskId::new),
            };
            engine.execute(key, Mutation::MoveTask(intent)).await?
        }
        Command::MoveSection {
            section,
            before,
            after,
        } => {
            let intent = SectionMoveIntent {
                subject_id: SectionId::new(section),
                before_id: before.map(SectionId::new),
                after_id: after.map(SectionId::new),
            };
            engine.execute(key, Mutation::MoveSection(intent)).await?
        }
        Command::Rename { id, name } => {
            let target = match IdKind::classify(&id) {
                Some(IdKind::Task) => EditTarget::Task(TaskId::new(id)),
                Some(IdKind::Section) => EditTarget::Section(SectionId::new(id)),
                _ => return Err(CliError::Usage(format!("cannot rename {id}"))),
            };
            let editor = NameEditor::open(Arc::clone(engine), key.clone(), target, config.debounce)?;
            editor.input(name);
            match editor.commit().await? {
                Some(outcome) => outcome,
                None => Outcome::Unchanged,
            }
        }
        Command::SetDone { task, undo } => {
            let mutation = Mutation::PatchTask {
                task: TaskId::new(task),
                patch: TaskPatch::SetStatus(!undo),
            };
            engine.execute(key, mutation).await?
        }
        Command::Assign { task, users } => {
            let mutation = Mutation::PatchTask {
                task: TaskId::new(task),
                patch: TaskPatch::SetAssignees(users.into_iter().map(UserId::new).collect()),
            };
            engine.execute(key, mutation).await?
        }
        Command::AddTask { name, section } => {
            engine
                .execute(key, Mutation::create_task(section.map(SectionId::new), name))
                .await?
        }
        Command::AddSection { name } => {
            engine.execute(key, Mutation::create_section(name)).await?
        }
        Command::Delete { task } => {
            engine
                .execute(key, Mutation::DeleteTask(TaskId::new(task)))
                .await?
        }
    };
    report_outcome(&outcome);
    Ok(())
}

fn report_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::NotFetched => println!("board not loaded, nothing done"),
        Outcome::Unchanged => println!("nothing to change"),
        Outcome::Applied => println!("saved"),
        Outcome::CreatedTask { id, .. } => println!("created {id}"),
        Outcome::CreatedSection { id, .. } => println!("created {id}"),
    }
}

fn report_events(events: &mut mpsc::Receiver<EngineEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            EngineEvent::AccessRevoked { board } => eprintln!("access to {board} was revoked"),
            EngineEvent::ResourceMissing { detail, .. } => eprintln!("missing: {detail}"),
            EngineEvent::RolledBack { cause, .. } => eprintln!("change rolled back ({cause})"),
            other => tracing::debug!(event = ?other, "engine event"),
        }
    }
}

fn print_view(view: &BoardView) {
    for group in view.groups() {
        let title = group.name.as_deref().unwrap_or("(unassigned)");
        println!("== {title} [{}]", group.container);
        for task in view.tasks(group) {
            print_task(task, 1);
        }
    }
}

fn print_task(task: &Task, depth: usize) {
    let mark = if task.done { 'x' } else { ' ' };
    let assignees: Vec<&str> = task
        .assignees
        .iter()
        .map(|a| a.display_name.as_str())
        .collect();
    let indent = "  ".repeat(depth);
    if assignees.is_empty() {
        println!("{indent}[{mark}] {} {}", task.id, task.name);
    } else {
        println!(
            "{indent}[{mark}] {} {} @{}",
            task.id,
            task.name,
            assignees.join(", @")
        );
    }
    for sub in &task.subtasks {
        print_task(sub, depth + 1);
    }
}

fn read_board(path: &Path) -> Result<Board, CliError> {
    let contents = std::fs::read_to_string(path).map_err(|source| CliError::ReadBoard {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&contents)?)
}

fn write_board(path: &Path, board: &Board) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(board)?;
    std::fs::write(path, json).map_err(|source| CliError::WriteBoard {
        path: path.to_path_buf(),
        source,
    })
}

fn demo_board() -> Board {
    let backlog = ContainerRef::Section(SectionId::new("section-backlog"));
    let mut board = Board::new("board-demo");
    board.sections = vec![
        Section::new("section-backlog", "Backlog"),
        Section::new("section-done", "Done"),
    ];
    board.tasks = vec![
        Task::new("task-1", "Sketch the board", backlog.clone()),
        Task::new("task-2", "Wire up drag and drop", backlog.clone()),
        Task::new("task-3", "Write the docs", backlog),
        Task::new("task-4", "Triage inbox", ContainerRef::Unassigned),
    ];
    board
}
