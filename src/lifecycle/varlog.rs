//! Exposes the user container's log volume to the node's log collector.
//!
//! The collector scans `<internal_volume_path>` for entries named
//! `<namespace>_<pod>_<container>`; each is a relative symlink to the volume
//! the user container writes its logs into.

use std::io;
use std::path::{Path, PathBuf};

use crate::config::VarLogConfig;

/// Create the log link, replacing a stale one.
pub fn create_var_log_link(config: &VarLogConfig, namespace: &str, pod: &str) -> io::Result<PathBuf> {
    let link_name = format!("{}_{}_{}", namespace, pod, config.user_container_name);
    let link = Path::new(&config.internal_volume_path).join(link_name);
    let target = Path::new("..").join(&config.volume_name);

    if link.symlink_metadata().is_ok() {
        std::fs::remove_file(&link)?;
    }
    symlink(&target, &link)?;

    tracing::info!(link = %link.display(), points_to = %target.display(), "Created log volume link");
    Ok(link)
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}
