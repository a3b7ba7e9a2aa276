#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose whole tail is free text (prompts, URLs, modes).
pub(crate) const TEXT_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "edit",
        action: "localized_edit",
    },
    CommandSpec {
        command: "filter",
        action: "filter",
    },
    CommandSpec {
        command: "adjust",
        action: "adjustment",
    },
    CommandSpec {
        command: "batch_filter",
        action: "batch_filter",
    },
    CommandSpec {
        command: "batch_adjust",
        action: "batch_adjustment",
    },
    CommandSpec {
        command: "url",
        action: "load_url",
    },
    CommandSpec {
        command: "compare",
        action: "compare",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "open",
        action: "load_image",
    },
    CommandSpec {
        command: "backdrop",
        action: "replace_backdrop",
    },
    CommandSpec {
        command: "save",
        action: "save_current",
    },
    CommandSpec {
        command: "save_batch",
        action: "save_batch",
    },
];

pub(crate) const MULTI_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "batch",
        action: "load_batch",
    },
    CommandSpec {
        command: "composite",
        action: "composite",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "extend",
        action: "extend_backdrop",
    },
    CommandSpec {
        command: "enhance",
        action: "enhance",
    },
    CommandSpec {
        command: "undo",
        action: "undo",
    },
    CommandSpec {
        command: "redo",
        action: "redo",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "dismiss",
        action: "dismiss",
    },
    CommandSpec {
        command: "new",
        action: "start_over",
    },
    CommandSpec {
        command: "presets",
        action: "presets",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
];

pub(crate) const HOTSPOT_COMMAND: CommandSpec = CommandSpec {
    command: "spot",
    action: "select_hotspot",
};

pub const HELP_COMMANDS: &[&str] = &[
    "/open <path>",
    "/url <url>",
    "/spot <x> <y> [<display width> <display height>]",
    "/edit <prompt>",
    "/filter <prompt|preset>",
    "/adjust <prompt|preset>",
    "/extend",
    "/backdrop <path>",
    "/enhance",
    "/composite <subject> <scene> <style>",
    "/undo",
    "/redo",
    "/reset",
    "/compare on|off|<percent>",
    "/batch <paths...>",
    "/batch_filter <prompt|preset>",
    "/batch_adjust <prompt|preset>",
    "/save [dir]",
    "/save_batch [path]",
    "/status",
    "/presets",
    "/dismiss",
    "/new",
    "/help",
];
