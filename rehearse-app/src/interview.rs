//! Terminal host for one live interview.
//!
//! Keys (followed by Enter): `m` toggles mute, `q` ends the interview.
//! Ctrl-C also ends it. Transcript lines are printed as they grow.

use std::future::Future;
use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use rehearse_core::{
    AudioBackend, Connector, InterviewBrief, Role, SessionConfig, SessionController, SessionState,
    SessionStatusEvent, TranscriptEvent, TranscriptTurn,
};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    ToggleMute,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    match line.trim().to_ascii_lowercase().as_str() {
        "m" | "mute" => Some(Command::ToggleMute),
        "q" | "quit" | "end" => Some(Command::Quit),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    Interrupted,
    Quit,
    RemoteClosed,
}

/// Handle mute toggles until the user quits, `interrupt` resolves, or the
/// session reports closed. `interrupt` is polled across iterations, so a
/// signal arriving while another branch runs is not lost.
async fn wait_for_end<F: Future>(
    interrupt: F,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    status: &mut broadcast::Receiver<SessionStatusEvent>,
    mut toggle_mute: impl FnMut(),
) -> EndReason {
    tokio::pin!(interrupt);
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = &mut interrupt => return EndReason::Interrupted,
            cmd = commands.recv(), if stdin_open => match cmd {
                Some(Command::ToggleMute) => toggle_mute(),
                Some(Command::Quit) => return EndReason::Quit,
                // Stdin closed (piped input ran out); keep going until interrupted.
                None => stdin_open = false,
            },
            event = status.recv() => match event {
                Ok(event) if event.status == SessionState::Closed => return EndReason::RemoteClosed,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "status receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return EndReason::RemoteClosed,
            },
        }
    }
}

/// Run an interview until the user ends it or the remote side closes.
/// Returns the sealed transcript.
pub async fn run_interview(
    config: SessionConfig,
    audio: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    brief: InterviewBrief,
) -> Result<Vec<TranscriptTurn>> {
    let controller = Arc::new(SessionController::new(config, audio, connector));
    let mut status = controller.subscribe_status();
    let printer = tokio::spawn(print_transcript(controller.subscribe_transcript()));

    eprintln!("Connecting to the interviewer...");
    controller
        .start(&brief)
        .await
        .context("could not start the interview")?;
    eprintln!("Connected. Speak when ready. [m] mute/unmute, [q] end interview");

    let mut commands = spawn_stdin_reader();
    let reason = wait_for_end(tokio::signal::ctrl_c(), &mut commands, &mut status, || {
        let muted = controller.toggle_mute();
        eprintln!("{}", if muted { "[microphone muted]" } else { "[microphone live]" });
    })
    .await;
    match reason {
        EndReason::Interrupted => info!("interrupt received, ending interview"),
        EndReason::RemoteClosed => eprintln!("The interviewer ended the call."),
        EndReason::Quit => {}
    }

    let turns = controller.end().unwrap_or_default();
    printer.abort();
    let diag = controller.diagnostics();
    info!(
        turns = turns.len(),
        frames_sent = diag.frames_sent,
        buffers_scheduled = diag.buffers_scheduled,
        interruptions = diag.interruptions,
        "interview finished"
    );
    Ok(turns)
}

/// Prints the latest turn whenever it changes, overwriting the line in place
/// while the same turn keeps growing.
async fn print_transcript(mut events: broadcast::Receiver<TranscriptEvent>) {
    let mut current_turn = None;
    loop {
        match events.recv().await {
            Ok(event) => {
                let speaker = speaker_label(event.role);
                let mut out = std::io::stdout().lock();
                if current_turn.is_some_and(|idx| idx != event.turn_index) {
                    let _ = writeln!(out);
                }
                let _ = write!(out, "\r{speaker}: {}", event.text);
                let _ = out.flush();
                current_turn = Some(event.turn_index);
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn speaker_label(role: Role) -> &'static str {
    match role {
        Role::Respondent => "Interviewer",
        Role::Caller => "You",
    }
}

fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<Command> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("rehearse-stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if let Some(cmd) = parse_command(&line) {
                    if tx.send(cmd).is_err() || cmd == Command::Quit {
                        break;
                    }
                }
            }
        })
        .map_err(|e| warn!(error = %e, "failed to spawn stdin reader"))
        .ok();
    rx
}

/// Render a finished transcript for the terminal.
pub fn format_transcript(turns: &[TranscriptTurn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", speaker_label(t.role), t.text.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn status(state: SessionState) -> SessionStatusEvent {
        SessionStatusEvent {
            status: state,
            detail: None,
        }
    }

    #[tokio::test]
    async fn interrupt_fires_after_commands_were_handled() {
        let (cmd_tx, mut commands) = mpsc::unbounded_channel();
        let (_status_tx, mut statuses) = broadcast::channel(8);
        let (fire, interrupt) = oneshot::channel::<()>();
        let toggles = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&toggles);
        let waiter = tokio::spawn(async move {
            wait_for_end(interrupt, &mut commands, &mut statuses, || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await
        });
        cmd_tx.send(Command::ToggleMute).unwrap();
        cmd_tx.send(Command::ToggleMute).unwrap();
        while toggles.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }

        fire.send(()).unwrap();
        assert_eq!(waiter.await.unwrap(), EndReason::Interrupted);
    }

    #[tokio::test]
    async fn closed_stdin_waits_for_interrupt() {
        let (cmd_tx, mut commands) = mpsc::unbounded_channel::<Command>();
        let (_status_tx, mut statuses) = broadcast::channel(8);
        let (fire, interrupt) = oneshot::channel::<()>();
        drop(cmd_tx);

        let waiter = tokio::spawn(async move {
            wait_for_end(interrupt, &mut commands, &mut statuses, || {}).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        fire.send(()).unwrap();
        assert_eq!(waiter.await.unwrap(), EndReason::Interrupted);
    }

    #[tokio::test]
    async fn quit_and_remote_close_end_the_wait() {
        let (cmd_tx, mut commands) = mpsc::unbounded_channel();
        let (status_tx, mut statuses) = broadcast::channel(8);
        let pending = std::future::pending::<()>();

        cmd_tx.send(Command::Quit).unwrap();
        let reason = wait_for_end(pending, &mut commands, &mut statuses, || {}).await;
        assert_eq!(reason, EndReason::Quit);

        status_tx.send(status(SessionState::Connected)).unwrap();
        status_tx.send(status(SessionState::Closed)).unwrap();
        let pending = std::future::pending::<()>();
        let reason = wait_for_end(pending, &mut commands, &mut statuses, || {}).await;
        assert_eq!(reason, EndReason::RemoteClosed);
    }

    #[test]
    fn commands_are_case_insensitive() {
        assert_eq!(parse_command("M\n"), Some(Command::ToggleMute));
        assert_eq!(parse_command(" quit "), Some(Command::Quit));
        assert_eq!(parse_command("hello"), None);
    }

    #[test]
    fn transcript_uses_terminal_labels() {
        let turns = vec![
            TranscriptTurn::new(Role::Respondent, "Hi there"),
            TranscriptTurn::new(Role::Caller, "Hello "),
        ];
        assert_eq!(format_transcript(&turns), "Interviewer: Hi there\nYou: Hello");
    }
}
