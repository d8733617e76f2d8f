#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const SLOT_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "front",
        action: "set_slot",
    },
    CommandSpec {
        command: "left",
        action: "set_slot",
    },
    CommandSpec {
        command: "right",
        action: "set_slot",
    },
    CommandSpec {
        command: "back",
        action: "set_slot",
    },
    CommandSpec {
        command: "background",
        action: "set_slot",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "generate",
        action: "generate",
    },
    CommandSpec {
        command: "chain",
        action: "show_chain",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "status",
        action: "show_status",
    },
    CommandSpec {
        command: "discard",
        action: "discard_capture",
    },
    CommandSpec {
        command: "wait",
        action: "wait",
    },
    CommandSpec {
        command: "state",
        action: "show_state",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
];

pub const SESSION_HELP_COMMANDS: &[&str] = &[
    "/front <path>",
    "/left <path>",
    "/right <path>",
    "/back <path>",
    "/background <path>",
    "/remove <slot>",
    "/generate",
    "/capture <frame path> [setting|person|current]",
    "/explore <prompt>",
    "/discard",
    "/chain",
    "/goto <index>",
    "/reset",
    "/status",
    "/wait",
    "/state",
    "/help",
];
