//! Line-oriented operator console on stdin.

use std::io::BufRead;

use reactor_core::command::HELP;
use reactor_core::{ControlEvent, OperatorCommand};
use tokio::sync::{mpsc, oneshot};

/// Read commands on a plain thread and forward them to the control loop.
/// End of input counts as `quit`.
pub fn spawn(events: mpsc::Sender<ControlEvent>) {
    std::thread::spawn(move || {
        println!("{HELP}");
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            let command = match line.parse::<OperatorCommand>() {
                Ok(c) => c,
                Err(e) => {
                    println!("{e}");
                    continue;
                }
            };
            let quit = command == OperatorCommand::Quit;
            let (tx, rx) = oneshot::channel();
            let event = ControlEvent::Command {
                command,
                reply: Some(tx),
            };
            if events.blocking_send(event).is_err() {
                return;
            }
            if let Ok(reply) = rx.blocking_recv() {
                println!("{reply}");
            }
            if quit {
                return;
            }
        }
        let _ = events.blocking_send(ControlEvent::Command {
            command: OperatorCommand::Quit,
            reply: None,
        });
    });
}
