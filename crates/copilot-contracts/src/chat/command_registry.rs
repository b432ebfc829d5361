#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CommandArg {
    None,
    Path,
    Choice,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub arg: CommandArg,
}

pub(crate) const CHAT_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "upload",
        arg: CommandArg::Path,
    },
    CommandSpec {
        command: "suggest",
        arg: CommandArg::None,
    },
    CommandSpec {
        command: "pick",
        arg: CommandArg::Choice,
    },
    CommandSpec {
        command: "reset",
        arg: CommandArg::None,
    },
    CommandSpec {
        command: "history",
        arg: CommandArg::None,
    },
    CommandSpec {
        command: "export",
        arg: CommandArg::Path,
    },
    CommandSpec {
        command: "help",
        arg: CommandArg::None,
    },
];

pub(crate) fn find_command(command: &str) -> Option<&'static CommandSpec> {
    CHAT_COMMANDS.iter().find(|spec| spec.command == command)
}

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/upload <path>",
    "/suggest",
    "/pick <n>",
    "/reset",
    "/history",
    "/export <path>",
    "/help",
];
