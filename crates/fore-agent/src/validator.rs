//! Shell-command allowlist evaluator.
//!
//! Answers "would this command line be safe to execute" without executing
//! anything. A line is split into sub-commands on unescaped `|`, `&` and
//! `;`; every sub-command's head token must be on the allowlist, and a few
//! commands get an extra targeted check on top.

use std::collections::HashSet;

use regex::Regex;

use fore_types::error::ForemanError;

/// Commands permitted by default. Anything absent is denied.
const ALLOWED_COMMANDS: &[&str] = &[
    "awk", "cat", "cd", "chmod", "cp", "curl", "cut", "date", "df", "diff", "du", "echo", "env",
    "false", "find", "git", "grep", "gzip", "head", "init.sh", "kill", "lsof", "ls", "mkdir",
    "mv", "node", "npm", "npx", "pip", "pip3", "pkill", "ps", "pwd", "python", "python3", "rm",
    "sed", "sleep", "sort", "tail", "tar", "tee", "test", "touch", "tr", "true", "uniq", "unzip",
    "wc", "which", "xargs", "yarn",
];

/// `pkill` may only target dev-server processes.
const PKILL_TARGETS: &[&str] = &[
    "node",
    "npm",
    "npx",
    "vite",
    "next",
    "webpack",
    "nodemon",
    "react-scripts",
];

/// Octal modes `chmod` may set besides executable-bit grants.
const SAFE_OCTAL_MODES: &[&str] = &["600", "644", "664", "700", "755", "775"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub message: Option<String>,
}

impl ValidationResult {
    fn ok() -> Self {
        Self {
            valid: true,
            message: None,
        }
    }

    fn reject(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
        }
    }
}

pub struct CommandValidator {
    allowed: HashSet<&'static str>,
    head_token: Regex,
    chmod_symbolic: Regex,
    init_invocation: Regex,
}

impl CommandValidator {
    pub fn new() -> Self {
        Self {
            allowed: ALLOWED_COMMANDS.iter().copied().collect(),
            head_token: Regex::new(r"^[a-zA-Z0-9_./-]+").expect("head token pattern"),
            chmod_symbolic: Regex::new(r"^[ugoa]*\+[rwxX]+$").expect("chmod pattern"),
            init_invocation: Regex::new(r"^(?:\./|[A-Za-z0-9_.-][A-Za-z0-9_./-]*/)init\.sh(?:\s|$)")
                .expect("init.sh pattern"),
        }
    }

    /// Decide whether `command` is safe under the fixed policy. Pure: no
    /// process is ever started here.
    pub fn validate(&self, command: &str) -> ValidationResult {
        if command.trim().is_empty() {
            return ValidationResult::reject("empty command");
        }

        for sub in split_subcommands(command) {
            let sub = sub.trim();
            if sub.is_empty() {
                continue;
            }
            let result = self.validate_subcommand(sub);
            if !result.valid {
                return result;
            }
        }
        ValidationResult::ok()
    }

    /// `Result` form of [`validate`](Self::validate) for callers that
    /// propagate errors instead of inspecting the verdict.
    pub fn ensure_allowed(&self, command: &str) -> Result<(), ForemanError> {
        let result = self.validate(command);
        if result.valid {
            Ok(())
        } else {
            Err(ForemanError::Validation(
                result.message.unwrap_or_else(|| "policy violation".into()),
            ))
        }
    }

    fn validate_subcommand(&self, sub: &str) -> ValidationResult {
        let head = match self.head_token.find(sub) {
            Some(m) => m.as_str(),
            None => return ValidationResult::reject(format!("unparseable command: {sub}")),
        };
        // A path invocation is judged by its final segment.
        let name = head.rsplit('/').next().unwrap_or(head);

        if !self.allowed.contains(name) {
            return ValidationResult::reject(format!("command not allowed: {name}"));
        }

        match name {
            "pkill" => self.check_pkill(sub),
            "chmod" => self.check_chmod(sub),
            "init.sh" => self.check_init_script(sub),
            "rm" => self.check_rm(sub),
            _ => ValidationResult::ok(),
        }
    }

    fn check_pkill(&self, sub: &str) -> ValidationResult {
        if PKILL_TARGETS.iter().any(|t| sub.contains(t)) {
            ValidationResult::ok()
        } else {
            ValidationResult::reject(format!(
                "pkill may only target dev-server processes ({})",
                PKILL_TARGETS.join(", ")
            ))
        }
    }

    fn check_chmod(&self, sub: &str) -> ValidationResult {
        let mode = sub
            .split_whitespace()
            .skip(1)
            .find(|tok| !tok.starts_with('-'));
        match mode {
            Some(mode)
                if self.chmod_symbolic.is_match(mode) || SAFE_OCTAL_MODES.contains(&mode) =>
            {
                ValidationResult::ok()
            }
            Some(mode) => ValidationResult::reject(format!("chmod mode not allowed: {mode}")),
            None => ValidationResult::reject("chmod requires a mode"),
        }
    }

    fn check_init_script(&self, sub: &str) -> ValidationResult {
        if self.init_invocation.is_match(sub) {
            ValidationResult::ok()
        } else {
            ValidationResult::reject(
                "init.sh may only be invoked as ./init.sh or <path>/init.sh",
            )
        }
    }

    fn check_rm(&self, sub: &str) -> ValidationResult {
        let mut recursive = false;
        let mut targets_root = false;
        for tok in sub.split_whitespace().skip(1) {
            if tok.starts_with('-') && tok.contains('r') {
                recursive = true;
            } else if tok == "/" || tok == "/*" {
                targets_root = true;
            }
        }
        if recursive && targets_root {
            ValidationResult::reject("recursive delete of filesystem root is not allowed")
        } else {
            ValidationResult::ok()
        }
    }
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a command line on unescaped `|`, `&` and `;`. Separators inside
/// single or double quotes, or preceded by a backslash, are not split
/// points. Chained forms (`&&`, `||`) simply produce an extra empty
/// segment which the caller skips.
fn split_subcommands(command: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;

    for ch in command.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if !in_single => {
                escaped = true;
                current.push(ch);
            }
            '\'' if !in_double => {
                in_single = !in_single;
                current.push(ch);
            }
            '"' if !in_single => {
                in_double = !in_double;
                current.push(ch);
            }
            '|' | '&' | ';' if !in_single && !in_double => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
}
