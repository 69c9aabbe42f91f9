use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::authz::store::{PermissionStore, RepositoryTree, User};
use crate::db::Database;

/// Keeps the [`PermissionStore`] in sync with the backing database by
/// polling for rows modified after the store's watermarks.
pub struct Refresher {
    db: Arc<Database>,
    store: Arc<PermissionStore>,

    interval: Duration,
    max_backoff: Duration,

    failures: AtomicU32,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub repos: usize,
    pub removed_repos: usize,
    pub users: usize,
    pub removed_users: usize,
}

impl Refresher {
    pub fn new(
        db: Arc<Database>,
        store: Arc<PermissionStore>,
        interval: Duration,
        max_backoff: Duration,
    ) -> Self {
        Self {
            db,
            store,
            interval,
            max_backoff,
            failures: AtomicU32::new(0),
        }
    }

    /// Spawns the supervised refresh loop. It runs for the lifetime of the
    /// process.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.supervise().await })
    }

    async fn supervise(self: Arc<Self>) {
        info!(
            "Refresh loop starting, interval: {}",
            humantime::format_duration(self.interval)
        );
        loop {
            let worker = self.clone();
            let result = tokio::spawn(async move { worker.main_loop().await }).await;
            match result {
                Ok(Ok(never)) => match never {},
                Ok(Err(e)) => error!("Refresh loop failed: {e:#}"),
                Err(e) => error!("Refresh loop aborted: {e}"),
            }

            let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
            let delay = self.backoff(failures);
            warn!(
                "Restarting refresh loop in {} ({failures} consecutive failures)",
                humantime::format_duration(delay)
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn main_loop(self: Arc<Self>) -> Result<Infallible> {
        let mut intv = interval_at(Instant::now(), self.interval);
        intv.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            intv.tick().await;

            let worker = self.clone();
            let stats = tokio::task::spawn_blocking(move || worker.refresh_once())
                .await
                .context("join refresh cycle")??;
            self.failures.store(0, Ordering::Release);
            self.store.mark_warm();

            if stats == RefreshStats::default() {
                debug!("Refresh done, nothing changed");
            } else {
                info!(
                    "Refresh done: {} repositories updated, {} removed; {} users updated, {} removed; now holding {} repositories, {} users",
                    stats.repos,
                    stats.removed_repos,
                    stats.users,
                    stats.removed_users,
                    self.store.repo_count(),
                    self.store.user_count()
                );
            }
        }
    }

    /// Delay before relaunching the loop after `failures` consecutive faults:
    /// starts at one interval and doubles up to `max_backoff`.
    fn backoff(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.interval
            .saturating_mul(1 << shift)
            .min(self.max_backoff)
    }

    /// Runs one refresh cycle. Entries are published one by one as they are
    /// built; each watermark only moves once its whole phase succeeded, so a
    /// failed cycle is retried from the same point.
    pub fn refresh_once(&self) -> Result<RefreshStats> {
        let mut stats = RefreshStats::default();
        self.refresh_repos(&mut stats).context("refresh repositories")?;
        self.refresh_users(&mut stats).context("refresh users")?;
        Ok(stats)
    }

    fn refresh_repos(&self, stats: &mut RefreshStats) -> Result<()> {
        let since = self.store.last_repo_check();
        let (modified, removed) = self.db.with_transaction(|tx| {
            let modified = tx.modified_repositories(since)?;
            let removed = tx.removed_repositories(since)?;
            Ok((modified, removed))
        })?;

        let mut latest = since;
        for repo in modified {
            info!("Found modified repository '{}' ({})", repo.name, repo.id);
            let paths = self
                .db
                .with_transaction(|tx| tx.repository_paths(repo.id))
                .with_context(|| format!("list paths of repository '{}'", repo.name))?;

            let mut tree = RepositoryTree::new(repo.id, &repo.name);
            for path in paths.iter() {
                debug!(
                    "Add path '{}' ({}) to repository '{}'",
                    path.path, path.pid, repo.name
                );
                tree.insert(&path.path, path.pid);
            }
            self.store.replace_repo(tree);

            latest = latest.max(repo.modify_time);
            stats.repos += 1;
        }

        for repo in removed {
            if self.store.remove_repo(repo.id) {
                info!("Removed repository '{}' ({})", repo.name, repo.id);
                stats.removed_repos += 1;
            }
            latest = latest.max(repo.modify_time);
        }

        self.store.advance_repo_check(latest);
        Ok(())
    }

    fn refresh_users(&self, stats: &mut RefreshStats) -> Result<()> {
        let since = self.store.last_user_check();
        let (modified, removed) = self.db.with_transaction(|tx| {
            let modified = tx.modified_users(since)?;
            let removed = tx.removed_users(since)?;
            Ok((modified, removed))
        })?;

        let mut latest = since;
        for record in modified {
            info!("Found modified user '{}' ({})", record.name, record.id);
            let perms = self
                .db
                .with_transaction(|tx| tx.user_grants(record.id))
                .with_context(|| format!("list grants of user '{}'", record.name))?;

            self.store.replace_user(User {
                uid: record.id,
                name: record.name,
                perms,
            });

            latest = latest.max(record.modify_time);
            stats.users += 1;
        }

        for record in removed {
            if self.store.remove_user(record.id) {
                info!("Removed user '{}' ({})", record.name, record.id);
                stats.removed_users += 1;
            }
            latest = latest.max(record.modify_time);
        }

        self.store.advance_user_check(latest);
        Ok(())
    }
}
