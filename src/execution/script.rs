//! Step script file and agent user helpers.

use std::io::Write;
use std::path::Path;

use tempfile::TempPath;
use tokio::process::Command;

/// Header written at the top of every generated step script.
pub const SCRIPT_HEADER: &str = "#! /usr/bin/env bash\n\nset -ex\n\n";

/// Writes `commands` into an executable `commands*.sh` file inside `working_dir`.
///
/// The file is deleted when the returned path is dropped.
pub fn write_script(commands: &[String], working_dir: &Path) -> std::io::Result<TempPath> {
    let mut file = tempfile::Builder::new()
        .prefix("commands")
        .suffix(".sh")
        .tempfile_in(working_dir)?;

    file.write_all(SCRIPT_HEADER.as_bytes())?;
    for command in commands {
        file.write_all(command.as_bytes())?;
        file.write_all(b"\n")?;
    }
    file.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o755))?;
    }

    Ok(file.into_temp_path())
}

/// Translates a host script path into the command run by the container.
///
/// Scripts inside the working directory become `./<relative path>`, which
/// resolves from the container's working directory mount. Other paths are
/// passed through unchanged.
pub fn container_script_path(script: &Path, host_working_dir: &Path) -> String {
    match script.strip_prefix(host_working_dir) {
        Ok(relative) if !relative.as_os_str().is_empty() => {
            format!("./{}", relative.display())
        }
        _ => script.display().to_string(),
    }
}

/// Returns `<uid>:<gid>` of the current process, for running containers as
/// the same user that owns the working directory.
pub async fn agent_user() -> Option<String> {
    let output = Command::new("sh")
        .args(["-c", "printf %d:%d $(id -u) $(id -g)"])
        .output()
        .await
        .map_err(|e| tracing::debug!(error = %e, "Failed to run id"))
        .ok()?;

    if !output.status.success() {
        tracing::debug!(status = %output.status, "id exited unsuccessfully");
        return None;
    }

    let user = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!user.is_empty()).then_some(user)
}
