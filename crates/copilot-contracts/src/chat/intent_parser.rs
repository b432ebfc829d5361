use super::command_registry::{find_command, CommandArg};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatIntent {
    Noop,
    Ask { question: String },
    Upload { path: String },
    Suggest,
    /// 1-based, as the suggestions are listed.
    Pick { choice: usize },
    Reset,
    History,
    Export { path: String },
    Help,
    Invalid { command: String, reason: String },
    Unknown { command: String, arg: String },
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    parse_path_args(arg).join(" ")
}

fn invalid(command: &str, reason: impl Into<String>) -> ChatIntent {
    ChatIntent::Invalid {
        command: command.to_string(),
        reason: reason.into(),
    }
}

pub fn parse_intent(text: &str) -> ChatIntent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return ChatIntent::Noop;
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            let Some(spec) = find_command(&command) else {
                return ChatIntent::Unknown {
                    command,
                    arg: arg.to_string(),
                };
            };

            return match spec.arg {
                CommandArg::Path => {
                    let path = parse_single_path_arg(arg);
                    if path.is_empty() {
                        return invalid(&command, format!("/{command} requires a path"));
                    }
                    if command == "upload" {
                        ChatIntent::Upload { path }
                    } else {
                        ChatIntent::Export { path }
                    }
                }
                CommandArg::Choice => match arg.parse::<usize>() {
                    Ok(choice) if choice > 0 => ChatIntent::Pick { choice },
                    _ => invalid(&command, format!("/{command} requires a number from the list")),
                },
                CommandArg::None => match command.as_str() {
                    "suggest" => ChatIntent::Suggest,
                    "reset" => ChatIntent::Reset,
                    "history" => ChatIntent::History,
                    _ => ChatIntent::Help,
                },
            };
        }
    }

    ChatIntent::Ask {
        question: raw_trimmed.to_string(),
    }
}
