//! Thin wrapper around the CLI tools the backends drive.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::ClusterError;

/// Runs `program args...` and returns its stdout, or a `CommandFailed`
/// error carrying stderr when the process exits non-zero.
pub(crate) async fn run(program: &str, args: &[String]) -> Result<String, ClusterError> {
    let label = describe(program, args);
    debug!(command = %label, "Running cluster command");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ClusterError::CommandFailed {
            command: label.clone(),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(ClusterError::CommandFailed {
            command: label,
            message: format!(
                "{}, stderr: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// `program` plus its first non-flag arguments, for error messages.
fn describe(program: &str, args: &[String]) -> String {
    let verbs: Vec<&str> = args
        .iter()
        .take_while(|a| !a.starts_with('-'))
        .take(3)
        .map(String::as_str)
        .collect();
    if verbs.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, verbs.join(" "))
    }
}

/// Converts string literals into owned args.
pub(crate) fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Writes a kubeconfig readable only by the current user.
pub(crate) async fn write_private(path: &Path, content: &[u8]) -> Result<(), ClusterError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}
