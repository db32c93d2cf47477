//! Companion process launched once at startup (`AGENT_COMMAND`).

use relay_core::{RelayError, RelayResult};
use std::process::Stdio;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Spawn `command` through `sh -c` and watch it in the background.
///
/// The child's stdio is discarded. Its exit is logged; it is never restarted
/// and never affects the relay.
pub fn launch(command: &str) -> RelayResult<JoinHandle<()>> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .map_err(|e| RelayError::Other(format!("failed to start agent: {e}")))?;
    info!(pid = child.id(), "agent started");

    Ok(tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => debug!("agent exited"),
            Ok(status) => warn!(status = %status, "agent exited with failure"),
            Err(e) => warn!(error = %e, "failed to wait for agent"),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_command_through_shell() {
        let dir = std::env::temp_dir().join(format!("relay-agent-{}", std::process::id()));
        let marker = dir.with_extension("marker");
        let _ = std::fs::remove_file(&marker);

        let handle = launch(&format!("echo started > '{}'", marker.display())).unwrap();
        handle.await.unwrap();

        assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "started");
        std::fs::remove_file(&marker).unwrap();
    }

    #[tokio::test]
    async fn failing_command_is_not_fatal() {
        let handle = launch("exit 3").unwrap();
        handle.await.unwrap();
    }
}
