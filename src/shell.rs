//! Human-readable rendering of job command lines.
//!
//! Jobs are never executed through a shell; these strings only go to logs,
//! the CSV job report and the ledger so a run can be reproduced by hand.

use crate::types::Job;

/// Command line quoted for the shell of the current platform:
/// Command Prompt on Windows, Bash everywhere else.
pub fn escape_for_native_shell(job: &Job) -> String {
    if cfg!(windows) {
        escape_for_cmd_exe(job)
    } else {
        escape_for_bash(job)
    }
}

/// Command and arguments quoted so Bash sees each as one word.
pub fn escape_for_bash(job: &Job) -> String {
    join(job, bash_quote)
}

/// Command and arguments quoted so `CommandLineToArgvW` returns them unchanged.
pub fn escape_for_cmd_exe(job: &Job) -> String {
    join(job, cmd_quote)
}

fn join(job: &Job, quote: fn(&str) -> String) -> String {
    let mut out = quote(&job.command);
    for arg in &job.arguments {
        out.push(' ');
        out.push_str(&quote(arg));
    }
    out
}

fn bash_safe(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Wraps a string in single quotes, escaping internal single quotes as `'\''`.
/// Words made only of `[A-Za-z0-9_-]` are left bare.
pub fn bash_quote(s: &str) -> String {
    if bash_safe(s) {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Quotes one argument following the `CommandLineToArgvW` rules: backslashes
/// are literal unless they precede a `"` or the closing quote, where they
/// are doubled.
pub fn cmd_quote(s: &str) -> String {
    if !s.is_empty() && !s.contains([' ', '\t', '\n', '\u{0B}', '"']) {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');

    let mut backslashes = 0usize;
    for c in s.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                out.push_str(&"\\".repeat(backslashes * 2 + 1));
                out.push('"');
                backslashes = 0;
            }
            _ => {
                out.push_str(&"\\".repeat(backslashes));
                out.push(c);
                backslashes = 0;
            }
        }
    }
    out.push_str(&"\\".repeat(backslashes * 2));

    out.push('"');
    out
}
