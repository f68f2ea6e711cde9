use std::path::{Component, Path, PathBuf};

use serde_json::Value;

const FILE_TOOLS: &[&str] = &["Read", "Write", "Edit", "MultiEdit", "NotebookEdit"];
const SHELL_TOOLS: &[&str] = &["Bash"];

const READ_ONLY_COMMANDS: &[&str] = &[
    "cat", "ls", "head", "tail", "less", "more", "which", "whoami", "pwd", "echo", "printf",
    "env", "printenv", "date", "wc", "sort", "uniq", "diff", "file", "stat", "du", "df", "tree",
    "realpath", "dirname", "basename", "grep", "rg",
];

const FS_MODIFYING_COMMANDS: &[&str] = &[
    "mkdir", "touch", "cp", "mv", "rm", "rmdir", "ln", "install", "tee", "cd",
];

const FIND_MUTATING_ACTIONS: &[&str] = &["-delete", "-exec", "-execdir", "-ok", "-okdir"];

const COMMAND_SEPARATORS: &[&str] = &["&&", "||", ";", "|", "&"];

/// Paths under the agent's own config dir that it writes to during normal
/// operation; these stay allowed even outside the approved roots.
const AGENT_INTERNAL_SUBPATHS: &[&str] = &["plans", "todos", "settings.json"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny { message: String },
}

impl PermissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
        }
    }
}

/// Rejects tool invocations that reach outside the approved directory roots.
///
/// File tools are checked on their target path; shell commands are tokenized
/// and each chained command that mutates the filesystem (or changes
/// directory) must keep its path arguments inside the boundary. Commands we
/// cannot parse pass through — the OS sandbox is the backstop, this guard is
/// the early tripwire.
#[derive(Debug, Clone)]
pub struct PermissionGuard {
    working_directory: PathBuf,
    approved_roots: Vec<PathBuf>,
    agent_config_dir: PathBuf,
}

impl PermissionGuard {
    pub fn new(
        working_directory: PathBuf,
        approved_roots: Vec<PathBuf>,
        agent_config_dir: PathBuf,
    ) -> Self {
        Self {
            working_directory,
            approved_roots: approved_roots.into_iter().map(normalize_path).collect(),
            agent_config_dir: normalize_path(agent_config_dir),
        }
    }

    pub fn check(&self, tool_name: &str, tool_input: &Value) -> PermissionDecision {
        if FILE_TOOLS.contains(&tool_name) {
            let target = tool_input
                .get("file_path")
                .or_else(|| tool_input.get("path"))
                .and_then(Value::as_str);
            if let Some(target) = target {
                return self.check_file_path(tool_name, target);
            }
        }

        if SHELL_TOOLS.contains(&tool_name) {
            if let Some(command) = tool_input.get("command").and_then(Value::as_str) {
                return self.check_shell_command(command);
            }
        }

        PermissionDecision::Allow
    }

    fn check_file_path(&self, tool_name: &str, target: &str) -> PermissionDecision {
        let resolved = self.resolve(target);

        if self.is_agent_internal(&resolved) {
            return PermissionDecision::Allow;
        }
        if self.is_within_approved(&resolved) {
            return PermissionDecision::Allow;
        }

        tracing::warn!(
            tool_name,
            target,
            "denied file operation outside approved directories"
        );
        PermissionDecision::deny(format!(
            "{tool_name} targets '{target}' which is outside the approved directory"
        ))
    }

    fn check_shell_command(&self, command: &str) -> PermissionDecision {
        let Some(tokens) = split_shell(command) else {
            return PermissionDecision::Allow;
        };
        if tokens.is_empty() {
            return PermissionDecision::Allow;
        }

        for chain in split_chains(&tokens) {
            let Some(first) = chain.first() else {
                continue;
            };
            let base = Path::new(first)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| first.clone());

            if READ_ONLY_COMMANDS.contains(&base.as_str()) {
                continue;
            }

            let needs_check = if base == "find" {
                chain[1..]
                    .iter()
                    .any(|token| FIND_MUTATING_ACTIONS.contains(&token.as_str()))
            } else {
                FS_MODIFYING_COMMANDS.contains(&base.as_str())
            };
            if !needs_check {
                continue;
            }

            for token in &chain[1..] {
                if token.starts_with('-') {
                    continue;
                }
                let resolved = self.resolve(token);
                if !self.is_within_approved(&resolved) {
                    tracing::warn!(
                        command,
                        base_command = base.as_str(),
                        target = token.as_str(),
                        "denied shell command outside approved directories"
                    );
                    return PermissionDecision::deny(format!(
                        "'{base}' targets '{token}' which is outside all approved directories"
                    ));
                }
            }
        }

        PermissionDecision::Allow
    }

    fn resolve(&self, target: &str) -> PathBuf {
        let path = Path::new(target);
        if path.is_absolute() {
            normalize_path(path.to_path_buf())
        } else {
            normalize_path(self.working_directory.join(path))
        }
    }

    fn is_within_approved(&self, path: &Path) -> bool {
        self.approved_roots.iter().any(|root| path.starts_with(root))
    }

    fn is_agent_internal(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.agent_config_dir) else {
            return false;
        };
        let Some(first) = relative.components().next() else {
            return false;
        };
        AGENT_INTERNAL_SUBPATHS.contains(&first.as_os_str().to_string_lossy().as_ref())
    }
}

/// Lexical normalization: resolve `.` and `..` without touching the
/// filesystem, so traversal like `../../evil` is caught even for paths that
/// do not exist yet.
fn normalize_path(path: PathBuf) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }
    normalized
}

/// Minimal shell tokenizer: whitespace splitting with single/double quote
/// awareness. Returns `None` for commands we cannot parse (unbalanced
/// quotes), which the guard treats as pass-through.
fn split_shell(command: &str) -> Option<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut chars = command.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '\\' if !in_single => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ch if ch.is_whitespace() && !in_single && !in_double => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            ch => current.push(ch),
        }
    }

    if in_single || in_double {
        return None;
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Some(tokens)
}

fn split_chains(tokens: &[String]) -> Vec<Vec<String>> {
    let mut chains = Vec::new();
    let mut current = Vec::new();
    for token in tokens {
        if COMMAND_SEPARATORS.contains(&token.as_str()) {
            if !current.is_empty() {
                chains.push(std::mem::take(&mut current));
            }
        } else {
            current.push(token.clone());
        }
    }
    if !current.is_empty() {
        chains.push(current);
    }
    chains
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn guard() -> PermissionGuard {
        PermissionGuard::new(
            PathBuf::from("/w/p"),
            vec![PathBuf::from("/w")],
            PathBuf::from("/home/user/.agent"),
        )
    }

    #[test]
    fn file_write_inside_boundary_is_allowed() {
        let decision = guard().check("Write", &json!({"file_path": "/w/p/src/main.rs"}));
        assert!(decision.is_allowed());
    }

    #[test]
    fn file_write_outside_boundary_is_denied() {
        let decision = guard().check("Write", &json!({"file_path": "/etc/passwd"}));
        assert!(!decision.is_allowed());
    }

    #[test]
    fn relative_traversal_is_resolved_against_cwd() {
        let decision = guard().check("Edit", &json!({"file_path": "../../etc/passwd"}));
        assert!(!decision.is_allowed());

        let inside = guard().check("Edit", &json!({"file_path": "../p2/file.rs"}));
        assert!(inside.is_allowed());
    }

    #[test]
    fn agent_internal_paths_are_always_allowed() {
        let decision = guard().check(
            "Write",
            &json!({"file_path": "/home/user/.agent/plans/next.md"}),
        );
        assert!(decision.is_allowed());

        let outside_known = guard().check(
            "Write",
            &json!({"file_path": "/home/user/.agent/credentials.json"}),
        );
        assert!(!outside_known.is_allowed());
    }

    #[test]
    fn read_only_shell_commands_pass() {
        let decision = guard().check("Bash", &json!({"command": "cat /etc/hostname"}));
        assert!(decision.is_allowed());
    }

    #[test]
    fn mutating_shell_command_outside_boundary_is_denied() {
        let decision = guard().check("Bash", &json!({"command": "rm -rf /etc/nginx"}));
        let PermissionDecision::Deny { message } = decision else {
            panic!("expected denial");
        };
        assert!(message.contains("rm"));
        assert!(message.contains("/etc/nginx"));
    }

    #[test]
    fn mutating_shell_command_inside_boundary_is_allowed() {
        let decision = guard().check("Bash", &json!({"command": "mkdir -p /w/p/target/tmp"}));
        assert!(decision.is_allowed());
    }

    #[test]
    fn chained_commands_are_checked_individually() {
        let decision = guard().check(
            "Bash",
            &json!({"command": "ls /w/p && rm /etc/hosts"}),
        );
        assert!(!decision.is_allowed());
    }

    #[test]
    fn cd_outside_boundary_is_denied() {
        let decision = guard().check("Bash", &json!({"command": "cd /tmp"}));
        assert!(!decision.is_allowed());
    }

    #[test]
    fn find_is_only_checked_when_it_mutates() {
        let listing = guard().check("Bash", &json!({"command": "find /etc -name '*.conf'"}));
        assert!(listing.is_allowed());

        let deleting = guard().check("Bash", &json!({"command": "find /etc -delete"}));
        assert!(!deleting.is_allowed());
    }

    #[test]
    fn unparseable_commands_pass_through() {
        let decision = guard().check("Bash", &json!({"command": "rm '/etc/unterminated"}));
        assert!(decision.is_allowed());
    }

    #[test]
    fn unrelated_tools_are_allowed() {
        let decision = guard().check("WebSearch", &json!({"query": "rust actors"}));
        assert!(decision.is_allowed());
    }

    #[test]
    fn shell_splitter_honors_quotes() {
        let tokens = split_shell(r#"echo "a b" 'c d' e\ f"#).expect("balanced quotes");
        assert_eq!(tokens, vec!["echo", "a b", "c d", "e f"]);
    }
}
