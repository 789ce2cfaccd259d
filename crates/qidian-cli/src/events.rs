use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug)]
pub enum InputEvent {
    Line(String),
    Interrupt,
    Eof,
}

/// Merges stdin lines and Ctrl-C into one stream of events.
pub struct EventHandler {
    rx: mpsc::UnboundedReceiver<InputEvent>,
    _tx: mpsc::UnboundedSender<InputEvent>,
}

impl EventHandler {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let _tx = tx.clone();

        // Spawn stdin reader task
        let tx_lines = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let event = match lines.next_line().await {
                    Ok(Some(line)) => InputEvent::Line(line),
                    Ok(None) => InputEvent::Eof,
                    Err(err) => {
                        debug!(error = %err, "stdin read failed");
                        InputEvent::Eof
                    }
                };
                let eof = matches!(event, InputEvent::Eof);
                if tx_lines.send(event).is_err() || eof {
                    break;
                }
            }
        });

        // Ctrl-C no longer kills the process once this listener is installed
        let tx_signal = tx.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    break;
                }
                if tx_signal.send(InputEvent::Interrupt).is_err() {
                    break;
                }
            }
        });

        Self { rx, _tx }
    }

    pub async fn next(&mut self) -> Option<InputEvent> {
        self.rx.recv().await
    }
}
