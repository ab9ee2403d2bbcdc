//! Periodic refresh of the ratings cached on user profiles.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    error::{SchedulerError, SchedulerResult},
    model::User,
    repository::Repository,
    types::RatingSystem,
};

const SCAN_PAGE: usize = 100;

/// Failure to look up a rating on an external site.
#[derive(Debug, Error)]
pub enum RatingFetchError {
    /// The account does not exist on the site.
    #[error("{system} account `{account}` not found")]
    UnknownAccount {
        /// Rating site.
        system: RatingSystem,
        /// Account that was looked up.
        account: String,
    },
    /// The site answered with something unusable, or not at all.
    #[error("{system} lookup failed: {reason}")]
    Unavailable {
        /// Rating site.
        system: RatingSystem,
        /// Human readable cause.
        reason: String,
    },
}

/// Source of current ratings.
pub trait RatingFetcher: Send + Sync {
    /// Current rating of `account` on `system`.
    fn fetch(&self, system: RatingSystem, account: &str) -> Result<u32, RatingFetchError>;
}

/// Counters reported by [`refresh_ratings`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Users read.
    pub scanned: usize,
    /// Users written back with a changed rating.
    pub updated: usize,
    /// Lookups that failed; the previous rating was kept.
    pub fetch_failures: usize,
    /// Users whose write-back failed.
    pub write_failures: usize,
}

/// Refreshes every user's ratings from `fetcher`.
///
/// Only users with at least one changed rating are written, `batch_size` at
/// a time. A user deleted or edited while the refresh runs is skipped
/// rather than recreated or overwritten.
pub fn refresh_ratings(
    repo: &Repository,
    fetcher: &dyn RatingFetcher,
    batch_size: usize,
) -> SchedulerResult<RefreshSummary> {
    if batch_size == 0 {
        return Err(SchedulerError::validation("batch size must be positive"));
    }

    let mut summary = RefreshSummary::default();
    let mut pending: Vec<(User, User)> = Vec::with_capacity(batch_size);
    let mut cursor: Option<String> = None;

    loop {
        let (users, next) = repo.scan_users(cursor.as_deref(), SCAN_PAGE)?;
        for read in users {
            summary.scanned += 1;
            let mut user = read.clone();
            if refresh_user(&mut user, fetcher, &mut summary) {
                pending.push((read, user));
                if pending.len() >= batch_size {
                    write_batch(repo, &mut pending, &mut summary);
                }
            }
        }
        match next {
            Some(key) => cursor = Some(key),
            None => break,
        }
    }
    write_batch(repo, &mut pending, &mut summary);

    info!(
        scanned = summary.scanned,
        updated = summary.updated,
        fetch_failures = summary.fetch_failures,
        write_failures = summary.write_failures,
        "rating refresh finished"
    );
    Ok(summary)
}

/// Returns true when any rating changed.
fn refresh_user(user: &mut User, fetcher: &dyn RatingFetcher, summary: &mut RefreshSummary) -> bool {
    let mut changed = false;
    for system in RatingSystem::ALL {
        let Some(account) = user.account(system).map(str::to_owned) else {
            continue;
        };
        match fetcher.fetch(system, &account) {
            Ok(rating) if user.rating(system) != Some(rating) => {
                user.set_rating(system, Some(rating));
                changed = true;
            }
            Ok(_) => {}
            Err(err) => {
                summary.fetch_failures += 1;
                warn!(username = %user.username, %system, error = %err, "keeping previous rating");
            }
        }
    }
    changed
}

/// Each write is conditioned on the user as scanned, so a profile edit made
/// during the refresh wins and the user is counted as a write failure.
fn write_batch(repo: &Repository, pending: &mut Vec<(User, User)>, summary: &mut RefreshSummary) {
    if pending.is_empty() {
        return;
    }
    debug!(size = pending.len(), "writing rating batch");
    for (read, user) in pending.drain(..) {
        match repo.replace_user(&read, &user) {
            Ok(()) => summary.updated += 1,
            Err(err) => {
                summary.write_failures += 1;
                warn!(username = %user.username, error = %err, "rating write failed");
            }
        }
    }
}
