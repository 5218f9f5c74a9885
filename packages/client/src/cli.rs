//! Interactive terminal session for a room participant.
//!
//! Reads lines from stdin on a dedicated thread (rustyline is synchronous)
//! and feeds them to the connection manager through a channel, while call
//! activity is printed as it arrives. Plain lines become chat messages;
//! lines starting with `/` are commands.

use std::io::Write as _;
use std::sync::Arc;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;

use parley_shared::time::timestamp_to_rfc3339;

use crate::error::ClientError;
use crate::manager::{ConnectionManager, ManagerConfig, ManagerEvent, ManagerState};
use crate::media::StubMediaSource;
use crate::rtc::LocalPeerApi;
use crate::transport::{LoopbackHub, TransportKind};

const HELP: &str = "\
Commands:
  /video on|off   enable or disable the camera track
  /audio on|off   enable or disable the microphone track
  /share          start screen sharing
  /unshare        stop screen sharing
  /who            list connected peers
  /reconnect      tear down and redo the signaling connection
  /quit           leave the room and exit
Anything else is sent as a chat message.
";

enum Command {
    Chat(String),
    Video(bool),
    Audio(bool),
    Share,
    Unshare,
    Who,
    Reconnect,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if !line.starts_with('/') {
        return Some(Command::Chat(line.to_string()));
    }
    let mut words = line.split_whitespace();
    let cmd = words.next().unwrap_or_default();
    let arg = words.next();
    match (cmd, arg) {
        ("/video", Some("on")) => Some(Command::Video(true)),
        ("/video", Some("off")) => Some(Command::Video(false)),
        ("/audio", Some("on")) => Some(Command::Audio(true)),
        ("/audio", Some("off")) => Some(Command::Audio(false)),
        ("/share", _) => Some(Command::Share),
        ("/unshare", _) => Some(Command::Unshare),
        ("/who", _) => Some(Command::Who),
        ("/reconnect", _) => Some(Command::Reconnect),
        ("/help", _) => Some(Command::Help),
        ("/quit", _) => Some(Command::Quit),
        _ => {
            println!("unrecognized command, /help lists what is available");
            None
        }
    }
}

fn redisplay_prompt(user_name: &str) {
    print!("{user_name}> ");
    let _ = std::io::stdout().flush();
}

fn print_event(event: &ManagerEvent, user_name: &str) {
    match event {
        ManagerEvent::StreamAdded {
            peer_id, peer_name, ..
        } => {
            println!("\n+ {peer_name} ({peer_id}) is now on the call");
        }
        ManagerEvent::StreamRemoved { peer_id } => {
            println!("\n- {peer_id} left the call");
        }
        ManagerEvent::PeerStateChanged { peer_id, state } => {
            tracing::debug!(peer = %peer_id, ?state, "peer state changed");
            return;
        }
        ManagerEvent::Chat(msg) => {
            println!(
                "\n[{}] {} ({})",
                msg.sender_name,
                msg.body,
                timestamp_to_rfc3339(msg.timestamp)
            );
        }
        ManagerEvent::SignalingLost => {
            println!("\n! signaling connection lost, type /reconnect to retry");
        }
    }
    redisplay_prompt(user_name);
}

enum Tick {
    Input(Option<String>),
    Event(Option<ManagerEvent>),
    Step(bool),
}

/// Join a room and run the interactive loop until the user quits.
pub async fn run_session(
    room_id: String,
    user_id: String,
    user_name: String,
    server_url: String,
) -> Result<(), ClientError> {
    let mut config = ManagerConfig::new(room_id.clone(), user_id, user_name.clone());
    config.server_url = server_url;

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let mut manager = ConnectionManager::new(
        config,
        Arc::new(StubMediaSource),
        Arc::new(LocalPeerApi),
        LoopbackHub::new(),
        events_tx,
    );

    manager.init_media(true, true).await?;
    manager.connect().await?;

    match manager.transport_kind() {
        Some(TransportKind::Primary) => {
            println!("\nJoined room '{room_id}' as '{user_name}'.");
        }
        _ => {
            println!(
                "\nJoined room '{room_id}' as '{user_name}' in loopback mode \
                 (signaling server unreachable, same-process peers only)."
            );
        }
    }
    println!("Type /help for commands. Ctrl+C or /quit to exit.\n");

    // rustyline blocks, so it lives on its own thread
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();
    let prompt_name = user_name.clone();
    std::thread::spawn(move || {
        let mut editor = match DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                eprintln!("failed to initialize readline: {e}");
                return;
            }
        };
        let prompt = format!("{prompt_name}> ");
        loop {
            match editor.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    editor.add_history_entry(&line).ok();
                    if input_tx.send(line).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(e) => {
                    tracing::error!("readline error: {e}");
                    break;
                }
            }
        }
    });

    loop {
        let online =
            manager.state() == ManagerState::Connected && manager.transport_kind().is_some();
        let tick = tokio::select! {
            line = input_rx.recv() => Tick::Input(line),
            event = events_rx.recv() => Tick::Event(event),
            alive = manager.step(), if online => Tick::Step(alive),
        };
        match tick {
            Tick::Input(None) => {
                manager.leave().await;
                break;
            }
            Tick::Input(Some(line)) => {
                let Some(command) = parse_command(&line) else {
                    continue;
                };
                if !apply_command(&mut manager, command).await {
                    break;
                }
            }
            Tick::Event(Some(event)) => print_event(&event, &user_name),
            Tick::Event(None) => break,
            Tick::Step(_) => {}
        }
    }

    println!("Left room '{room_id}'.");
    Ok(())
}

/// Apply one user command. Returns `false` when the session should end.
async fn apply_command(manager: &mut ConnectionManager, command: Command) -> bool {
    match command {
        Command::Chat(body) => match manager.send_chat(&body).await {
            Ok(_) => {}
            Err(e) => println!("could not send: {e}"),
        },
        Command::Video(enabled) => {
            manager.toggle_video(enabled);
            println!("camera {}", if enabled { "on" } else { "off" });
        }
        Command::Audio(enabled) => {
            manager.toggle_audio(enabled);
            println!("microphone {}", if enabled { "on" } else { "off" });
        }
        Command::Share => match manager.start_screen_share().await {
            Ok(_) => println!("screen sharing started"),
            Err(e) => println!("could not start sharing: {e}"),
        },
        Command::Unshare => {
            manager.stop_screen_share();
            println!("screen sharing stopped");
        }
        Command::Who => {
            let roster = manager.peer_roster();
            if roster.is_empty() {
                println!("(no one else is here)");
            } else {
                for (peer_id, peer_name) in roster {
                    println!("{peer_name} ({peer_id})");
                }
            }
        }
        Command::Reconnect => match manager.reconnect().await {
            Ok(()) => println!("reconnected"),
            Err(e) => println!("reconnect failed: {e}"),
        },
        Command::Help => print!("{HELP}"),
        Command::Quit => {
            manager.leave().await;
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_line_becomes_chat() {
        assert!(matches!(
            parse_command("hello there"),
            Some(Command::Chat(body)) if body == "hello there"
        ));
    }

    #[test]
    fn test_blank_line_is_ignored() {
        assert!(parse_command("   ").is_none());
    }

    #[test]
    fn test_toggle_commands_parse_their_argument() {
        assert!(matches!(parse_command("/video off"), Some(Command::Video(false))));
        assert!(matches!(parse_command("/audio on"), Some(Command::Audio(true))));
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        assert!(parse_command("/dance").is_none());
        assert!(parse_command("/video sideways").is_none());
    }
}
