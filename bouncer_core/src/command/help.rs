use super::*;

use std::collections::BTreeMap;

/// The commands one user may run, grouped for display.
///
/// Built when a session asks for help, and discarded as soon as the listing
/// has been sent.
#[derive(Default)]
pub struct CommandHelpRegistry {
    commands: BTreeMap<(CommandCategory, &'static str), &'static AdminCommand>,
}

impl CommandHelpRegistry {
    pub fn for_user(is_admin: bool) -> Self {
        let commands = COMMANDS
            .iter()
            .filter(|cmd| is_admin || !cmd.admin_only)
            .map(|cmd| ((cmd.category, cmd.name), cmd))
            .collect();

        Self { commands }
    }

    pub fn get(&self, name: &str) -> Option<&'static AdminCommand> {
        self.commands
            .values()
            .find(|cmd| cmd.name.eq_ignore_ascii_case(name))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// One line per command, `name - description` with names padded to a
    /// common width, under a heading per category.
    pub fn listing(&self) -> Vec<String> {
        let width = self.commands.keys().map(|(_, name)| name.len()).max().unwrap_or(0);

        let mut lines = Vec::new();
        let mut current = None;

        for ((category, name), cmd) in &self.commands {
            if current != Some(*category) {
                if current.is_some() {
                    lines.push("--".to_string());
                }
                lines.push(format!("{} commands", category));
                current = Some(*category);
            }
            lines.push(format!("{:<width$} - {}", name, cmd.description, width = width));
        }

        lines
    }
}

impl std::fmt::Debug for CommandHelpRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.commands.keys().map(|(_, name)| name))
            .finish()
    }
}

/// `help [command]`
pub(super) fn help_command(
    session: &mut ClientSession,
    owner: &Arc<dyn UserIdentity>,
    args: &[String],
    _ctx: &mut CommandContext,
) {
    session.command_help = Some(CommandHelpRegistry::for_user(owner.is_admin()));

    let lines = match (&session.command_help, args.first()) {
        (None, _) => Vec::new(),
        (Some(registry), None) => {
            let mut lines = vec![
                "--The following commands are available to you--".to_string(),
                format!(
                    "--Used as '/{} <command>', or '/msg {} <command>'",
                    BNC_COMMAND.to_ascii_lowercase(),
                    ADMIN_NICK
                ),
            ];
            lines.extend(registry.listing());
            lines.push("End of HELP.".to_string());
            lines
        }
        (Some(registry), Some(name)) => match registry.get(name) {
            Some(cmd) => cmd.help.iter().map(|l| l.to_string()).collect(),
            None => vec!["There is no such command.".to_string()],
        },
    };
    session.command_help = None;

    for line in lines {
        session.bnc_notice(&line);
    }
}
