use anyhow::{Context, Result};
use nb_core::{Settings, SystemGateway};
use std::path::{Path, PathBuf};

pub const INTERFACES_BACKUP: &str = "interfaces";
pub const SYSCTL_BACKUP: &str = "sysctl.conf";
pub const RULES_BACKUP: &str = "iptables.rules";

/// Copies of every artifact the remediator may touch, taken before the
/// first mutation of a run.
#[derive(Debug, Clone)]
pub struct BackupSet {
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
}

pub struct BackupManager<'a, G> {
    gateway: &'a G,
    settings: &'a Settings,
}

impl<'a, G: SystemGateway> BackupManager<'a, G> {
    pub fn new(gateway: &'a G, settings: &'a Settings) -> Self {
        Self { gateway, settings }
    }

    /// Snapshot the interfaces file, the sysctl file and the live rule table
    /// into a fresh timestamped directory. Only failing to create the
    /// directory is fatal.
    pub async fn snapshot(&self) -> Result<BackupSet> {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
        let dir = unique_dir(&self.settings.backup_dir, &stamp);
        std::fs::create_dir_all(&dir)
            .context(format!("Failed to create backup directory {}", dir.display()))?;

        let mut files = Vec::new();
        for (source, name) in [
            (&self.settings.interfaces_file, INTERFACES_BACKUP),
            (&self.settings.sysctl_file, SYSCTL_BACKUP),
        ] {
            if let Some(copy) = copy_file(source, &dir.join(name)) {
                files.push(copy);
            }
        }

        match self.gateway.save_rules().await {
            Ok(rules) => {
                let target = dir.join(RULES_BACKUP);
                match std::fs::write(&target, rules) {
                    Ok(()) => files.push(target),
                    Err(err) => tracing::warn!(error = %err, "could not write rule table backup"),
                }
            }
            Err(err) => tracing::warn!(error = %format!("{err:#}"), "could not snapshot rule table"),
        }

        tracing::info!(dir = %dir.display(), files = files.len(), "backup created");
        Ok(BackupSet { dir, files })
    }
}

/// `<root>/<stamp>`, or `<root>/<stamp>-N` when an earlier run in the same
/// second already used the name.
fn unique_dir(root: &Path, stamp: &str) -> PathBuf {
    let candidate = root.join(stamp);
    if !candidate.exists() {
        return candidate;
    }
    (1..)
        .map(|n| root.join(format!("{stamp}-{n}")))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

fn copy_file(source: &Path, target: &Path) -> Option<PathBuf> {
    if !source.exists() {
        tracing::warn!(path = %source.display(), "nothing to back up, file does not exist");
        return None;
    }
    match std::fs::copy(source, target) {
        Ok(_) => Some(target.to_path_buf()),
        Err(err) => {
            tracing::warn!(path = %source.display(), error = %err, "backup copy failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGateway, HEALTHY_INTERFACES, HEALTHY_SYSCTL, temp_settings};

    #[tokio::test]
    async fn copies_all_three_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let settings = temp_settings(dir.path());
        std::fs::write(&settings.interfaces_file, HEALTHY_INTERFACES).unwrap();
        std::fs::write(&settings.sysctl_file, HEALTHY_SYSCTL).unwrap();
        let gateway = FakeGateway::healthy();

        let backup = BackupManager::new(&gateway, &settings).snapshot().await.unwrap();

        assert_eq!(backup.files.len(), 3);
        assert!(backup.dir.starts_with(&settings.backup_dir));
        let copied = std::fs::read_to_string(backup.dir.join(INTERFACES_BACKUP)).unwrap();
        assert_eq!(copied, HEALTHY_INTERFACES);
        let rules = std::fs::read_to_string(backup.dir.join(RULES_BACKUP)).unwrap();
        assert!(rules.contains("MASQUERADE"));
    }

    #[tokio::test]
    async fn missing_sources_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let settings = temp_settings(dir.path());
        let gateway = FakeGateway::healthy();

        let backup = BackupManager::new(&gateway, &settings).snapshot().await.unwrap();

        assert_eq!(backup.files, vec![backup.dir.join(RULES_BACKUP)]);
    }

    #[tokio::test]
    async fn runs_in_the_same_second_get_distinct_directories() {
        let dir = tempfile::tempdir().unwrap();
        let settings = temp_settings(dir.path());
        let gateway = FakeGateway::healthy();
        let manager = BackupManager::new(&gateway, &settings);

        let first = manager.snapshot().await.unwrap();
        let second = manager.snapshot().await.unwrap();

        assert_ne!(first.dir, second.dir);
    }

    #[tokio::test]
    async fn unusable_backup_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = temp_settings(dir.path());
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        settings.backup_dir = blocker;
        let gateway = FakeGateway::healthy();

        assert!(BackupManager::new(&gateway, &settings).snapshot().await.is_err());
    }
}
