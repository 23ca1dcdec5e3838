mod client;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use client::DaemonClient;
use shared::ipc::{
    Mode, Request, Response, SessionStatus, TimerCommand, TimerState, View, VoiceLogEntry,
};
use shared::routine::NamedRoutine;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "repcue")]
#[command(about = "CLI for the repcue voice-controlled rep timer daemon")]
struct Cli {
    /// Daemon socket (defaults to $XDG_RUNTIME_DIR/repcued.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a repetition
    Start,
    /// Next repetition, or next exercise once the current one is done
    Next,
    /// Run the current repetition again
    Restart,
    /// Mark the current exercise done
    Done,
    /// Back to idle
    Reset,
    /// Clear all progress in the current routine
    ResetRoutine,
    /// Jump to an exercise (1-based)
    Jump { exercise: usize },
    /// Switch to basic mode, optionally setting its duration
    Basic { seconds: Option<u32> },
    /// Switch to a saved routine
    Routine { id: String },
    /// Import routines from a JSON file
    Import { file: PathBuf },
    /// Print a routine as JSON
    Export { id: String },
    /// List saved routines
    Routines,
    /// Tell the daemon which screen is showing
    View { view: ViewArg },
    /// Turn voice control on or off
    Voice { state: Toggle },
    Status,
    /// Show recorded voice chunks
    VoiceLog {
        #[arg(long)]
        clear: bool,
    },
    /// Stop the daemon
    Shutdown,
}

#[derive(Clone, Copy, ValueEnum)]
enum ViewArg {
    Timer,
    Settings,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

/// Most subcommands are one request; `basic` with a duration is two.
fn requests_for(command: Commands) -> Result<Vec<Request>> {
    let requests = match command {
        Commands::Start => vec![Request::Press(TimerCommand::Start)],
        Commands::Next => vec![Request::Press(TimerCommand::Next)],
        Commands::Restart => vec![Request::Press(TimerCommand::Restart)],
        Commands::Done => vec![Request::Press(TimerCommand::Done)],
        Commands::Reset => vec![Request::Press(TimerCommand::Reset)],
        Commands::ResetRoutine => vec![Request::ResetRoutine],
        Commands::Jump { exercise } => {
            let index = exercise
                .checked_sub(1)
                .context("Exercises are numbered from 1")?;
            vec![Request::JumpTo(index)]
        }
        Commands::Basic { seconds } => {
            let mut requests = vec![Request::SelectBasic];
            if let Some(seconds) = seconds {
                requests.push(Request::SetBasicDuration(seconds));
            }
            requests
        }
        Commands::Routine { id } => vec![Request::SelectRoutine(id)],
        Commands::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            vec![Request::ImportRoutines(raw)]
        }
        Commands::Export { id } => vec![Request::ExportRoutine(id)],
        Commands::Routines => vec![Request::ListRoutines],
        Commands::View { view } => vec![Request::SetView(match view {
            ViewArg::Timer => View::Timer,
            ViewArg::Settings => View::Settings,
        })],
        Commands::Voice { state } => vec![Request::SetVoiceControl(matches!(state, Toggle::On))],
        Commands::Status => vec![Request::Status],
        Commands::VoiceLog { clear: true } => vec![Request::ClearVoiceLog],
        Commands::VoiceLog { clear: false } => vec![Request::VoiceLog],
        Commands::Shutdown => vec![Request::Shutdown],
    };
    Ok(requests)
}

fn describe_timer(state: &TimerState) -> String {
    match state {
        TimerState::Idle => "idle".to_string(),
        TimerState::Running { remaining_seconds } => {
            format!("running, {}s left", remaining_seconds)
        }
        TimerState::Completed { rep_count } => format!("completed rep {}", rep_count),
    }
}

fn print_status(status: &SessionStatus) {
    println!("Status:");
    println!("  Timer: {}", describe_timer(&status.timer_state));
    match status.mode {
        Mode::Basic => {
            println!("  Mode: basic ({}s)", status.basic_duration_seconds);
            println!("  Reps: {}", status.rep_count);
        }
        Mode::Custom => {
            println!(
                "  Mode: routine {}",
                status.routine_id.as_deref().unwrap_or("?")
            );
            println!(
                "  Exercise {}/{}: {}",
                status.exercise_index + 1,
                status.exercise_count,
                status.exercise_name.as_deref().unwrap_or("-")
            );
            println!("  Reps: {}/{}", status.rep_count, status.required_repeats);
            let done: Vec<String> = status
                .completed_exercises
                .iter()
                .map(|i| (i + 1).to_string())
                .collect();
            println!("  Completed: [{}]", done.join(", "));
            if status.routine_complete {
                println!("  Routine complete");
            }
        }
    }
    println!("  View: {:?}", status.view);
    println!(
        "  Voice: {} (listening: {})",
        if status.voice_enabled { "on" } else { "off" },
        status.listening
    );
    println!("  Model: {:?}", status.model_state);
    if !status.heard_text.is_empty() {
        println!("  Heard: \"{}\"", status.heard_text);
    }
}

fn print_routines(routines: &[NamedRoutine], current: Option<&str>) {
    if routines.is_empty() {
        println!("No routines");
        return;
    }
    for routine in routines {
        let marker = if Some(routine.id.as_str()) == current {
            "*"
        } else {
            " "
        };
        println!(
            "{} {} - {} ({} exercises)",
            marker,
            routine.id,
            routine.name,
            routine.routine.len()
        );
    }
}

fn print_voice_log(entries: &[VoiceLogEntry]) {
    if entries.is_empty() {
        println!("Voice log is empty");
        return;
    }
    for entry in entries {
        let mode = if entry.is_basic_mode {
            "basic".to_string()
        } else {
            entry.routine_id.clone().unwrap_or_default()
        };
        println!(
            "[{}] {} ({}): {}",
            entry.ended_at,
            entry.trigger,
            mode,
            entry.texts.join(" | ")
        );
    }
}

/// Prints the response; false means it was an error.
fn print_response(response: Response) -> bool {
    match response {
        Response::Ok => println!("Success"),
        Response::Status(status) => print_status(&status),
        Response::Routines { routines, current } => print_routines(&routines, current.as_deref()),
        Response::Imported(count) => println!("Imported {} routine(s)", count),
        Response::Exported(json) => println!("{}", json),
        Response::VoiceLog(entries) => print_voice_log(&entries),
        Response::Error(msg) => {
            eprintln!("Error: {}", msg);
            return false;
        }
    }
    true
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = match cli.socket {
        Some(path) => DaemonClient::with_socket(path),
        None => DaemonClient::new(),
    };

    for request in requests_for(cli.command)? {
        match client.send_request(request).await {
            Ok(response) => {
                if !print_response(response) {
                    std::process::exit(1);
                }
            }
            Err(e) => {
                eprintln!("Failed to connect to repcued: {}", e);
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Vec<Request> {
        let cli = Cli::try_parse_from(std::iter::once("repcue").chain(args.iter().copied()))
            .unwrap();
        requests_for(cli.command).unwrap()
    }

    #[test]
    fn test_press_commands() {
        assert_eq!(parse(&["start"]), vec![Request::Press(TimerCommand::Start)]);
        assert_eq!(parse(&["done"]), vec![Request::Press(TimerCommand::Done)]);
        assert_eq!(parse(&["reset-routine"]), vec![Request::ResetRoutine]);
    }

    #[test]
    fn test_jump_is_one_based() {
        assert_eq!(parse(&["jump", "2"]), vec![Request::JumpTo(1)]);
        let cli = Cli::try_parse_from(["repcue", "jump", "0"]).unwrap();
        tokio_test::assert_err!(requests_for(cli.command));
    }

    #[test]
    fn test_basic_with_duration() {
        assert_eq!(parse(&["basic"]), vec![Request::SelectBasic]);
        assert_eq!(
            parse(&["basic", "45"]),
            vec![Request::SelectBasic, Request::SetBasicDuration(45)]
        );
    }

    #[test]
    fn test_toggles_and_views() {
        assert_eq!(parse(&["voice", "off"]), vec![Request::SetVoiceControl(false)]);
        assert_eq!(parse(&["view", "settings"]), vec![Request::SetView(View::Settings)]);
        assert_eq!(parse(&["voice-log", "--clear"]), vec![Request::ClearVoiceLog]);
        assert!(Cli::try_parse_from(["repcue", "voice", "maybe"]).is_err());
    }

    #[test]
    fn test_socket_override() {
        let cli = Cli::try_parse_from(["repcue", "status", "--socket", "/tmp/x.sock"]).unwrap();
        assert_eq!(cli.socket, Some(PathBuf::from("/tmp/x.sock")));
    }

    #[test]
    fn test_import_missing_file() {
        let cli = Cli::try_parse_from(["repcue", "import", "/nonexistent/routines.json"]).unwrap();
        tokio_test::assert_err!(requests_for(cli.command));
    }
}
