// Permissions for the daemon's runtime directory and socket

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

/// Set umask 0077 so nothing the daemon creates is readable by others
pub fn set_restrictive_umask() {
    #[cfg(unix)]
    {
        // SAFETY: umask only changes the process file mode mask
        unsafe {
            libc::umask(0o077);
        }
        debug!("Set restrictive umask: 0077");
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    debug!("Set permissions to {:o}: {}", mode, path.display());
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// 0770 with group access, otherwise 0700
pub fn directory_mode(group_access: bool) -> u32 {
    if group_access {
        0o770
    } else {
        0o700
    }
}

/// 0660 with group access, otherwise 0600
pub fn socket_mode(group_access: bool) -> u32 {
    if group_access {
        0o660
    } else {
        0o600
    }
}

pub fn set_socket_permissions(path: &Path, group_access: bool) -> Result<()> {
    set_mode(path, socket_mode(group_access))
}

/// Ensure a directory exists with the configured permissions
pub fn ensure_directory_with_permissions(path: &Path, group_access: bool) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory {}", path.display()))?;
        debug!("Created directory: {}", path.display());
    }

    set_mode(path, directory_mode(group_access))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_directory_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = dir.path().join("runtime");

        ensure_directory_with_permissions(&runtime, false).unwrap();
        let mode = fs::metadata(&runtime).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);

        ensure_directory_with_permissions(&runtime, true).unwrap();
        let mode = fs::metadata(&runtime).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o770);
    }

    #[test]
    fn test_socket_modes() {
        assert_eq!(socket_mode(false), 0o600);
        assert_eq!(socket_mode(true), 0o660);
    }
}
