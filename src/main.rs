//! Chat Autopilot - Entry Point
//!
//! Drives an in-memory transcript from stdin:
//! - `customer: ...` / `agent: ...` append chat messages
//! - `/goal`, `/mode`, `/stop`, `/status`, `/preview`, `/quit` control the core
//! - `/feedback` rates the last surfaced suggestions

use std::sync::Arc;
use std::time::Duration;

use chat_autopilot::{
    Config, ControlEvent, Feedback, GoalSpec, GoalType, HttpGenerator, MemorySessionStore, Mode,
    Orchestrator, Role, SessionStore, SqliteSessionStore, TranscriptAdapter,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn print_help() {
    println!("Chat Autopilot v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: chat-autopilot [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --help, -h         Show this help");
    println!();
    println!("Input (one per line on stdin):");
    println!("  customer: <text>                         Customer message");
    println!("  agent: <text>                            Human agent message");
    println!("  /goal <max_turns> <description> [| a,b]  Activate autonomous mode");
    println!("  /mode suggestion|autonomous              Switch mode");
    println!("  /stop                                    Emergency stop");
    println!("  /status                                  Show mode and progress");
    println!("  /preview <ms>                            Set preview delay (0 disables)");
    println!("  /feedback <1-5> used|ignored|modified [text]  Rate the last suggestions");
    println!("  /quit                                    Exit");
    println!();
    println!("Environment variables:");
    println!("  AUTOPILOT_API_URL       Response generator URL (default: http://localhost:8080)");
    println!("  AUTOPILOT_API_KEY       Generator bearer token");
    println!("  AUTOPILOT_DB_PATH       Session database path");
    println!("  AUTOPILOT_LOG_JSON      Log JSON to stderr (1/true)");
    println!("  RUST_LOG                Log filter (default: info)");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    let config = Config::from_env()?;

    let filter = || log_filter(std::env::var("RUST_LOG").ok());

    if config.log_json {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter())
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("Chat Autopilot v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn SessionStore> = match SqliteSessionStore::open(&config.db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("Session store unavailable ({}), state will not persist", e);
            Arc::new(MemorySessionStore::new())
        }
    };

    let generator = Arc::new(HttpGenerator::from_config(&config));
    match generator.health().await {
        Ok(true) => info!("Generator reachable at {}", config.api_url),
        Ok(false) | Err(_) => warn!("Generator at {} failed its health check", config.api_url),
    }

    let adapter = Arc::new(TranscriptAdapter::new(&config.platform));
    let orchestrator = Orchestrator::new(adapter.clone(), generator, store, config.orchestrator());

    let mut events = orchestrator.bus().subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Missed {} events", n)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let running = orchestrator.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = handle_line(line, &orchestrator, &adapter) {
            println!("! {}", e);
        }
    }

    running.shutdown().await;
    printer.abort();
    Ok(())
}

/// `RUST_LOG` directives, falling back to `info` when unset or invalid
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn handle_line(line: &str, orchestrator: &Orchestrator, adapter: &TranscriptAdapter) -> anyhow::Result<()> {
    if let Some(command) = line.strip_prefix('/') {
        let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
        let rest = rest.trim();
        match name {
            "goal" => {
                let goal = parse_goal(rest)?;
                orchestrator.activate_goal(goal, None)?;
            }
            "mode" => {
                let mode = Mode::parse(rest)
                    .ok_or_else(|| anyhow::anyhow!("Unknown mode: {}", rest))?;
                orchestrator.set_mode(mode)?;
            }
            "stop" => orchestrator.emergency_stop(),
            "status" => {
                let status = orchestrator.status();
                println!("mode: {}", status.mode.as_str());
                println!("goal: {}", status.goal.as_deref().unwrap_or("-"));
                println!("progress: {}% ({})", status.progress, status.progress_summary);
                if let Some(safety) = status.safety {
                    for warning in safety.warnings {
                        println!("warning: {}", warning);
                    }
                }
            }
            "preview" => {
                let ms: u64 = rest.parse()?;
                orchestrator.set_preview_delay(Duration::from_millis(ms));
            }
            "feedback" => {
                let request_id = orchestrator
                    .last_request_id()
                    .ok_or_else(|| anyhow::anyhow!("No suggestions to rate yet"))?;
                let feedback = parse_feedback(&request_id, rest)?;
                let feedback_id = orchestrator.submit_feedback(feedback)?;
                println!("feedback recorded: {}", feedback_id);
            }
            other => anyhow::bail!("Unknown command: /{}", other),
        }
        return Ok(());
    }

    let (speaker, text) = line
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("Expected `customer: <text>` or `agent: <text>`"))?;
    let role = Role::parse(speaker).ok_or_else(|| anyhow::anyhow!("Unknown speaker: {}", speaker))?;
    adapter.push(role, text.trim());
    Ok(())
}

/// `<max_turns> <description> [| label,label]`
fn parse_goal(input: &str) -> anyhow::Result<GoalSpec> {
    let (head, labels) = match input.split_once('|') {
        Some((head, labels)) => (head.trim(), Some(labels)),
        None => (input, None),
    };
    let (turns, description) = head
        .split_once(' ')
        .ok_or_else(|| anyhow::anyhow!("Usage: /goal <max_turns> <description> [| label,label]"))?;
    let max_turns: u32 = turns.parse()?;

    let goal = match labels {
        Some(labels) => GoalSpec::new(GoalType::GatherInfo, description.trim(), max_turns)
            .with_required_info(labels.split(',').map(|l| l.trim().to_string())),
        None => GoalSpec::new(GoalType::ResolveIssue, description.trim(), max_turns),
    };
    Ok(goal)
}

/// `<rating> used|ignored|modified [text]`
fn parse_feedback(request_id: &str, input: &str) -> anyhow::Result<Feedback> {
    let usage = || anyhow::anyhow!("Usage: /feedback <1-5> used|ignored|modified [text]");
    let mut parts = input.splitn(3, ' ');
    let rating: u8 = parts.next().filter(|p| !p.is_empty()).ok_or_else(usage)?.parse()?;
    let (used, modified) = match parts.next().ok_or_else(usage)? {
        "used" => (true, false),
        "ignored" => (false, false),
        "modified" => (true, true),
        _ => return Err(usage()),
    };
    let feedback = Feedback::new(request_id, rating, used)?
        .modified(modified)
        .with_text(parts.next().unwrap_or(""));
    Ok(feedback)
}

fn print_event(event: &ControlEvent) {
    match event {
        ControlEvent::ModeChanged { mode, reason } => match reason {
            Some(reason) => println!("[mode] {} ({})", mode.as_str(), reason),
            None => println!("[mode] {}", mode.as_str()),
        },
        ControlEvent::EmergencyStop { .. } => println!("[stop] emergency stop"),
        ControlEvent::ConversationUpdate { messages, .. } => {
            if let Some(sent) = messages.last() {
                println!("[sent] {}", sent.content);
            }
        }
        ControlEvent::Suggestions { suggestions, .. } => {
            for (i, s) in suggestions.iter().enumerate() {
                println!("[suggestion {}] ({:.0}%) {}", i + 1, s.confidence * 100.0, s.content);
            }
        }
        ControlEvent::SuggestionFailed { error } => println!("[suggestion] unavailable: {}", error),
        ControlEvent::Escalated { reason } => println!("[escalated] {}", reason),
        ControlEvent::GoalCompleted { summary } => println!("[complete] {}", summary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_log_filter_directives() {
        assert_eq!(log_filter(None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(
            log_filter(Some("chat_autopilot=debug".into())).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
        assert_eq!(
            log_filter(Some("chat_autopilot=loud".into())).max_level_hint(),
            Some(LevelFilter::INFO)
        );
    }

    #[test]
    fn test_parse_feedback() {
        let feedback = parse_feedback("req-1", "4 modified shortened it a bit").unwrap();
        assert_eq!(feedback.request_id, "req-1");
        assert_eq!(feedback.rating, 4);
        assert!(feedback.suggestion_used);
        assert!(feedback.modified);
        assert_eq!(feedback.feedback_text.as_deref(), Some("shortened it a bit"));

        let ignored = parse_feedback("req-1", "2 ignored").unwrap();
        assert!(!ignored.suggestion_used);
        assert!(ignored.feedback_text.is_none());

        assert!(parse_feedback("req-1", "6 used").is_err());
        assert!(parse_feedback("req-1", "3 maybe").is_err());
        assert!(parse_feedback("req-1", "").is_err());
    }
}
