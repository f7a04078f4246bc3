// WireGuard Tunnel Manager - Command Runner
// Runs `wg`, `wg-quick` and `networksetup` and captures their output

use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;
use wg_tunnel_common::{StopTarget, TunnelName};

use crate::config::DaemonConfig;

/// An invocation of the external WireGuard tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCommand {
    /// `wg show`
    Show,
    /// `wg-quick up <name>`
    Up(TunnelName),
    /// `wg-quick down <name|interface>`
    Down(StopTarget),
    /// `networksetup -setdnsservers <service> empty`
    ResetDns(String),
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolCommand::Show => write!(f, "wg show"),
            ToolCommand::Up(name) => write!(f, "wg-quick up {}", name),
            ToolCommand::Down(target) => write!(f, "wg-quick down {}", target.as_arg()),
            ToolCommand::ResetDns(service) => {
                write!(f, "networksetup -setdnsservers {} empty", service)
            }
        }
    }
}

/// Captured result of a command; failures are values, never errors
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub failed: bool,
    pub diagnostic: Option<String>,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            failed: false,
            diagnostic: None,
        }
    }

    pub fn failure(diagnostic: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            failed: true,
            diagnostic: Some(diagnostic.into()),
        }
    }

    /// Diagnostic text for a failed command
    pub fn describe_failure(&self) -> String {
        self.diagnostic
            .clone()
            .unwrap_or_else(|| "command failed".to_string())
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &ToolCommand) -> CommandOutput;
}

/// Paths and privilege settings used to build argv
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub wg: String,
    pub wg_quick: String,
    pub networksetup: String,
    pub use_sudo: bool,
}

impl ToolPaths {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            wg: config.wg_path.clone(),
            wg_quick: config.wg_quick_path.clone(),
            networksetup: config.networksetup_path.clone(),
            use_sudo: config.use_sudo,
        }
    }

    /// Full argv for a command; no shell is involved
    pub fn argv(&self, command: &ToolCommand) -> Vec<String> {
        let mut argv = Vec::with_capacity(6);

        if self.use_sudo {
            // -n: fail instead of prompting for a password
            argv.push("sudo".to_string());
            argv.push("-n".to_string());
        }

        match command {
            ToolCommand::Show => {
                argv.push(self.wg.clone());
                argv.push("show".to_string());
            }
            ToolCommand::Up(name) => {
                argv.push(self.wg_quick.clone());
                argv.push("up".to_string());
                argv.push(name.to_string());
            }
            ToolCommand::Down(target) => {
                argv.push(self.wg_quick.clone());
                argv.push("down".to_string());
                argv.push(target.as_arg().to_string());
            }
            ToolCommand::ResetDns(service) => {
                argv.push(self.networksetup.clone());
                argv.push("-setdnsservers".to_string());
                argv.push(service.clone());
                argv.push("empty".to_string());
            }
        }

        argv
    }
}

/// Runs commands as child processes with a timeout
#[derive(Debug, Clone)]
pub struct SystemRunner {
    paths: ToolPaths,
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(paths: ToolPaths, timeout: Duration) -> Self {
        Self { paths, timeout }
    }

    async fn run_argv(&self, argv: &[String]) -> CommandOutput {
        let Some((program, args)) = argv.split_first() else {
            return CommandOutput::failure("empty command line");
        };

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => return CommandOutput::failure(format!("failed to launch {}: {}", program, e)),
        };

        // Dropping the future on timeout kills the child
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return CommandOutput::failure(format!("failed to wait for {}: {}", program, e)),
            Err(_) => {
                return CommandOutput::failure(format!(
                    "{} timed out after {}s",
                    program,
                    self.timeout.as_secs()
                ))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let status = match output.status.code() {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            };
            return CommandOutput::failure(if stderr.is_empty() {
                status
            } else {
                format!("{}: {}", status, stderr)
            });
        }

        match String::from_utf8(output.stdout) {
            Ok(stdout) => CommandOutput::success(stdout),
            Err(_) => CommandOutput::failure("output is not valid UTF-8"),
        }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &ToolCommand) -> CommandOutput {
        let argv = self.paths.argv(command);
        debug!("Running: {}", argv.join(" "));

        let output = self.run_argv(&argv).await;
        if output.failed {
            debug!("{} failed: {}", command, output.describe_failure());
        }
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(use_sudo: bool) -> ToolPaths {
        ToolPaths {
            wg: "wg".to_string(),
            wg_quick: "/usr/local/bin/wg-quick".to_string(),
            networksetup: "/usr/sbin/networksetup".to_string(),
            use_sudo,
        }
    }

    fn strings(argv: &[&str]) -> Vec<String> {
        argv.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_argv() {
        let office = TunnelName::new("office").unwrap();

        assert_eq!(paths(true).argv(&ToolCommand::Show), strings(&["sudo", "-n", "wg", "show"]));
        assert_eq!(
            paths(false).argv(&ToolCommand::Up(office.clone())),
            strings(&["/usr/local/bin/wg-quick", "up", "office"])
        );
        assert_eq!(
            paths(true).argv(&ToolCommand::Down(StopTarget::Tunnel(office))),
            strings(&["sudo", "-n", "/usr/local/bin/wg-quick", "down", "office"])
        );
        assert_eq!(
            paths(false).argv(&ToolCommand::Down(StopTarget::Interface("utun4".to_string()))),
            strings(&["/usr/local/bin/wg-quick", "down", "utun4"])
        );
    }

    #[test]
    fn test_reset_dns_argv() {
        let command = ToolCommand::ResetDns("Wi-Fi".to_string());

        assert_eq!(
            paths(true).argv(&command),
            strings(&["sudo", "-n", "/usr/sbin/networksetup", "-setdnsservers", "Wi-Fi", "empty"])
        );
        assert_eq!(command.to_string(), "networksetup -setdnsservers Wi-Fi empty");
    }

    #[test]
    fn test_from_config() {
        let config = DaemonConfig {
            wg_path: "/opt/homebrew/bin/wg".to_string(),
            use_sudo: false,
            ..Default::default()
        };
        let paths = ToolPaths::from_config(&config);
        assert_eq!(paths.wg, "/opt/homebrew/bin/wg");
        assert_eq!(paths.wg_quick, "wg-quick");
        assert_eq!(paths.networksetup, "networksetup");
        assert!(!paths.use_sudo);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stdout() {
        let runner = SystemRunner::new(paths(false), Duration::from_secs(5));
        let output = runner.run_argv(&strings(&["echo", "interface: wg0"])).await;
        assert!(!output.failed);
        assert_eq!(output.stdout, "interface: wg0\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let runner = SystemRunner::new(paths(false), Duration::from_secs(5));
        let output = runner
            .run_argv(&strings(&["sh", "-c", "echo denied >&2; exit 3"]))
            .await;
        assert!(output.failed);
        assert_eq!(output.diagnostic.as_deref(), Some("exit code 3: denied"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_failure() {
        let runner = SystemRunner::new(paths(false), Duration::from_millis(100));
        let output = runner.run_argv(&strings(&["sleep", "5"])).await;
        assert!(output.failed);
        assert!(output.describe_failure().contains("timed out"));
    }

    #[tokio::test]
    async fn test_missing_program_is_failure() {
        let runner = SystemRunner::new(paths(false), Duration::from_secs(5));
        let output = runner
            .run_argv(&strings(&["/nonexistent/wg-tunnel-test-binary"]))
            .await;
        assert!(output.failed);
        assert!(output.describe_failure().contains("failed to launch"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_is_failure() {
        let runner = SystemRunner::new(paths(false), Duration::from_secs(5));
        let output = runner
            .run_argv(&strings(&["sh", "-c", "printf '\\377\\376'"]))
            .await;
        assert!(output.failed);
        assert_eq!(output.describe_failure(), "output is not valid UTF-8");
    }
}
