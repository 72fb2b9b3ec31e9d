use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use score_sync::{
    EvaluationSession, FieldKey, FieldStatus, MatrixView, Notice, SubmitControl, SubmitOutcome,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

/// Line-oriented stand-in for the score matrix.
///
/// Fields appear in the order they were first set, which is the order the
/// submit check walks them in.
#[derive(Default)]
pub struct TerminalView {
    values: Mutex<IndexMap<FieldKey, String>>,
    statuses: Mutex<IndexMap<FieldKey, FieldStatus>>,
    confirm: Mutex<Option<oneshot::Sender<bool>>>,
}

impl TerminalView {
    pub fn set_value(&self, key: FieldKey, raw: &str) {
        self.values.lock().insert(key, raw.to_string());
    }

    /// Hands `line` to an open confirmation prompt. Returns false when no
    /// prompt was waiting.
    pub fn answer(&self, line: &str) -> bool {
        let Some(tx) = self.confirm.lock().take() else {
            return false;
        };
        let yes = matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes");
        let _ = tx.send(yes);
        true
    }

    fn print_status(&self) {
        let values = self.values.lock();
        let statuses = self.statuses.lock();
        for (key, raw) in values.iter() {
            let status = statuses.get(key).copied().unwrap_or_default();
            println!("  {key:<12} {raw:<6} {status}");
        }
    }
}

#[async_trait]
impl MatrixView for TerminalView {
    fn rendered_values(&self) -> Vec<(FieldKey, String)> {
        self.values
            .lock()
            .iter()
            .map(|(key, raw)| (*key, raw.clone()))
            .collect()
    }

    fn field_status(&self, key: &FieldKey, status: FieldStatus) {
        self.statuses.lock().insert(*key, status);
        println!("[{key}] {status}");
    }

    fn notice(&self, notice: Notice) {
        match notice {
            Notice::Inline { key, message, .. } => println!("[{key}] {message}"),
            Notice::Alert { message } => println!("!! {message}"),
        }
    }

    fn focus(&self, key: &FieldKey) {
        println!("-> {key}");
    }

    async fn confirm(&self, prompt: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        if let Some(previous) = self.confirm.lock().replace(tx) {
            let _ = previous.send(false);
        }
        println!("{prompt} [y/N]");
        rx.await.unwrap_or(false)
    }

    fn submit_control(&self, state: &SubmitControl) {
        match state {
            SubmitControl::ReadyWithError(error) => println!("<{}> {error}", state.label()),
            _ => println!("<{}>", state.label()),
        }
    }

    fn reload(&self) {
        println!("evaluation submitted, nothing left to edit");
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Set { key: FieldKey, raw: String },
    Submit,
    Status,
    Quit,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("usage: set <question> <vendor> [value]")]
    SetUsage,
}

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let line = line.trim_start();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

    match word.trim_end() {
        "set" => {
            let mut parts = rest.trim_start().splitn(3, char::is_whitespace);
            let question_id = parts.next().and_then(|p| p.parse().ok());
            let vendor_id = parts.next().and_then(|p| p.parse().ok());
            let (Some(question_id), Some(vendor_id)) = (question_id, vendor_id) else {
                return Err(CommandError::SetUsage);
            };
            Ok(Command::Set {
                key: FieldKey::new(question_id, vendor_id),
                raw: parts.next().unwrap_or("").trim().to_string(),
            })
        }
        "submit" => Ok(Command::Submit),
        "status" => Ok(Command::Status),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

/// Reads commands from stdin until `quit` or end of input.
pub async fn run(session: Arc<EvaluationSession>, view: Arc<TerminalView>) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if view.answer(&line) || line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Ok(Command::Set { key, raw }) => {
                view.set_value(key, &raw);
                session.on_change(key, raw);
            }
            Ok(Command::Submit) => {
                // Submitting may wait on a confirmation, which arrives on the
                // next stdin line.
                let session = session.clone();
                tokio::spawn(async move {
                    let outcome = session.submit().await;
                    report(&outcome);
                });
            }
            Ok(Command::Status) => {
                view.print_status();
                println!(
                    "  queued: {}  saving: {}  submit: {}",
                    session.queued(),
                    session.saving(),
                    session.submit_control().label()
                );
            }
            Ok(Command::Quit) => break,
            Err(error) => println!("{error}"),
        }
    }

    session.shutdown();
    Ok(())
}

fn report(outcome: &SubmitOutcome) {
    match outcome {
        SubmitOutcome::Invalid(problems) => {
            tracing::info!(fields = problems.len(), "submit blocked by invalid scores");
        }
        SubmitOutcome::Failed(error) => tracing::error!("{error}"),
        other => tracing::info!(outcome = ?other, "submit finished"),
    }
}
