//! Check and reload command execution.
//!
//! Commands run through the host shell (`/bin/sh -c`, or `cmd /C` on
//! windows). Output is captured with stderr appended to stdout and is logged
//! at error level when the command fails.

use std::path::Path;
use std::process::Command;

use crate::error::CommandError;

/// Run `command` through the shell and return its combined output.
pub fn run_shell(command: &str) -> Result<String, CommandError> {
    tracing::debug!("running {command}");
    let output = shell(command).output().map_err(|source| CommandError::Spawn {
        command: command.to_string(),
        source,
    })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if !output.status.success() {
        tracing::error!("{combined:?}");
        return Err(CommandError::Failed {
            command: command.to_string(),
            status: output.status.to_string(),
            output: combined,
        });
    }
    tracing::debug!("{combined:?}");
    Ok(combined)
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut c = Command::new("/bin/sh");
    c.arg("-c").arg(command);
    c
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut c = Command::new("cmd");
    c.arg("/C").arg(command);
    c
}

/// Substitute the staged file path for every `{{src}}` in a check command.
///
/// Whitespace inside the braces is allowed. Any other text, including other
/// `{{ ... }}` sequences, passes through verbatim.
pub fn check_command(template: &str, staged: &Path) -> String {
    let src = staged.display().to_string();
    let mut out = String::with_capacity(template.len() + src.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) if after[..close].trim() == "src" => {
                out.push_str(&rest[..open]);
                out.push_str(&src);
                rest = &after[close + 2..];
            }
            _ => {
                out.push_str(&rest[..open + 2]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
