use std::process::{Command, ExitStatus, Stdio};

/// Everything a finished command left behind.
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Run a command to completion, collecting stdout and stderr regardless of its exit status.
///
/// The command line is logged at debug level before it is spawned. Stdin is closed so that
/// nothing can block waiting for input on CI.
pub fn run_command(cmd: &mut Command) -> std::io::Result<CommandOutput> {
    cmd.stdin(Stdio::null());
    tracing::debug!("+ {cmd:?}");
    let out = cmd.output()?;
    let output = CommandOutput {
        status: out.status,
        stdout: String::from_utf8_lossy(&out.stdout).to_string(),
        stderr: String::from_utf8_lossy(&out.stderr).to_string(),
    };
    if !output.success() {
        tracing::debug!(
            "command exited with {:?}: {}",
            output.status.code(),
            output.stderr.trim()
        );
    }
    Ok(output)
}

/// Renders a command as a shell-like string for error messages.
pub fn display_command(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}
