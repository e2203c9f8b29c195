use std::{path::PathBuf, process::Stdio, time::Duration};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::process::Command,
    tracing::{debug, warn},
};

use crate::{capabilities::ProcessRunner, error::CapabilityError};

const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// Outcome of a host command, as handed to the script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs commands through the platform shell with a timeout and output cap.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    pub timeout: Duration,
    pub max_output_bytes: usize,
    pub working_dir: Option<PathBuf>,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_output_bytes: 200 * 1024,
            working_dir: None,
        }
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, command: &str) -> Result<ExecResult, CapabilityError> {
        if command.trim().is_empty() {
            return Err(CapabilityError::invalid("nyanHostExec: command is empty"));
        }
        debug!(
            command,
            timeout_secs = self.timeout.as_secs(),
            "host exec"
        );

        let mut cmd = shell_command(command);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| CapabilityError::Exec(format!("failed to run command: {e}")))?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = cap_output(
                    decode_console_output(&output.stdout, cfg!(windows)),
                    self.max_output_bytes,
                );
                let stderr = cap_output(
                    decode_console_output(&output.stderr, cfg!(windows)),
                    self.max_output_bytes,
                );
                let exit_code = output.status.code().unwrap_or(-1);
                debug!(
                    exit_code,
                    stdout_len = stdout.len(),
                    stderr_len = stderr.len(),
                    "host exec done"
                );
                Ok(ExecResult {
                    success: output.status.success(),
                    exit_code,
                    stdout,
                    stderr,
                })
            },
            Ok(Err(e)) => Err(CapabilityError::Exec(format!("failed to run command: {e}"))),
            Err(_) => {
                warn!(command, "host exec timeout");
                Err(CapabilityError::Exec(format!(
                    "command timed out after {}s",
                    self.timeout.as_secs()
                )))
            },
        }
    }
}

/// Decode console bytes. Valid UTF-8 is taken as is; otherwise legacy
/// Windows consoles are read as Shift-JIS, and everything else lossily.
pub fn decode_console_output(bytes: &[u8], legacy_codepage: bool) -> String {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }
    if legacy_codepage {
        let (decoded, _, _) = encoding_rs::SHIFT_JIS.decode(bytes);
        return decoded.into_owned();
    }
    String::from_utf8_lossy(bytes).into_owned()
}

fn cap_output(mut text: String, max: usize) -> String {
    if text.len() <= max {
        return text;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str(TRUNCATION_MARKER);
    text
}
