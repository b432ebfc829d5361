use std::fs;
use std::io::{BufRead, ErrorKind, Write};
use std::path::Path;

use anyhow::{Context, Result};
use copilot_contracts::chat::{parse_intent, ChatIntent, CHAT_HELP_COMMANDS};
use copilot_contracts::messages::UploadedImage;
use copilot_contracts::session::SessionState;
use copilot_engine::{CopilotEngine, CopilotError, NormalizeOptions, TurnOutcome};

use crate::page::render_transcript;

/// Terminal chat over one session. Reads commands from `input` until EOF.
pub fn run_chat<R: BufRead, W: Write>(
    engine: &CopilotEngine,
    initial_image: Option<&Path>,
    mut input: R,
    out: &mut W,
) -> Result<SessionState> {
    let mut state = engine.open_session();
    writeln!(
        out,
        "Chart co-pilot started ({}). Type /help for commands.",
        engine.model()
    )?;
    if let Some(path) = initial_image {
        upload(engine, &mut state, path, out)?;
    }

    let mut line = String::new();
    loop {
        write!(out, "> ")?;
        out.flush()?;

        line.clear();
        let read = match input.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        match parse_intent(line.trim_end_matches(['\n', '\r'])) {
            ChatIntent::Noop => {}
            ChatIntent::Help => writeln!(out, "Commands: {}", CHAT_HELP_COMMANDS.join(" "))?,
            ChatIntent::Upload { path } => upload(engine, &mut state, Path::new(&path), out)?,
            ChatIntent::Ask { question } => {
                let outcome = engine.submit_question(&mut state, &question);
                print_outcome(&state, outcome, out)?;
            }
            ChatIntent::Pick { choice } => {
                let outcome = engine.submit_suggestion(&mut state, choice);
                print_outcome(&state, outcome, out)?;
            }
            ChatIntent::Suggest => match engine.refresh_suggestions(&mut state) {
                Ok(_) => print_suggestions(&state, out)?,
                Err(err) => writeln!(out, "Suggestions failed: {}", err.user_message())?,
            },
            ChatIntent::Reset => {
                engine.reset(&mut state);
                writeln!(out, "Session cleared. Upload a new chart with /upload <path>.")?;
            }
            ChatIntent::History => print_history(&state, out)?,
            ChatIntent::Export { path } => {
                let path = Path::new(&path);
                match export_transcript(&state, &engine.config().normalize, path) {
                    Ok(()) => writeln!(out, "Exported transcript to {}", path.display())?,
                    Err(err) => writeln!(out, "Export failed: {err:#}")?,
                }
            }
            ChatIntent::Invalid { reason, .. } => writeln!(out, "{reason}")?,
            ChatIntent::Unknown { command, .. } => {
                writeln!(out, "Unknown command: /{command}. Type /help for commands.")?
            }
        }
    }
    Ok(state)
}

fn upload<W: Write>(
    engine: &CopilotEngine,
    state: &mut SessionState,
    path: &Path,
    out: &mut W,
) -> Result<()> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            writeln!(out, "Upload failed: cannot read {} ({err})", path.display())?;
            return Ok(());
        }
    };
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let outcome = engine.start_from_upload(state, UploadedImage::new(file_name, bytes));
    print_outcome(state, outcome, out)
}

fn print_outcome<W: Write>(
    state: &SessionState,
    outcome: Result<TurnOutcome, CopilotError>,
    out: &mut W,
) -> Result<()> {
    match outcome {
        Ok(outcome) => {
            writeln!(out, "{}", outcome.reply)?;
            match outcome.suggestion_error {
                Some(err) => writeln!(out, "Suggestions failed: {}", err.user_message())?,
                None => print_suggestions(state, out)?,
            }
        }
        Err(err) => writeln!(out, "Error: {}", err.user_message())?,
    }
    Ok(())
}

fn print_suggestions<W: Write>(state: &SessionState, out: &mut W) -> Result<()> {
    let Some(suggestions) = state.suggestions() else {
        return Ok(());
    };
    writeln!(out, "Suggested questions (/pick <n>):")?;
    for (idx, question) in suggestions.iter().enumerate() {
        writeln!(out, "  {}. {question}", idx + 1)?;
    }
    Ok(())
}

fn print_history<W: Write>(state: &SessionState, out: &mut W) -> Result<()> {
    if state.messages().is_empty() {
        writeln!(out, "No messages yet.")?;
        return Ok(());
    }
    for message in state.messages() {
        writeln!(out, "[{}] {}", message.role, message.content)?;
    }
    Ok(())
}

fn export_transcript(state: &SessionState, options: &NormalizeOptions, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, render_transcript(state, options))
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
