use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use slotbook::{
    config::TableNames,
    core::store::MemoryStore,
    error::ErrorKind,
    model::{User, UserPatch},
    ratings::{RatingFetchError, RatingFetcher, refresh_ratings},
    repository::Repository,
    types::{Cohort, RatingSystem},
};

#[derive(Default)]
struct FakeSites {
    ratings: HashMap<(RatingSystem, String), u32>,
    calls: Mutex<Vec<(RatingSystem, String)>>,
}

impl FakeSites {
    fn with(mut self, system: RatingSystem, account: &str, rating: u32) -> Self {
        self.ratings.insert((system, account.to_string()), rating);
        self
    }
}

impl RatingFetcher for FakeSites {
    fn fetch(&self, system: RatingSystem, account: &str) -> Result<u32, RatingFetchError> {
        self.calls
            .lock()
            .expect("lock")
            .push((system, account.to_string()));
        self.ratings
            .get(&(system, account.to_string()))
            .copied()
            .ok_or_else(|| RatingFetchError::Unavailable {
                system,
                reason: "timed out".to_string(),
            })
    }
}

fn repo() -> Repository {
    Repository::new(Arc::new(MemoryStore::new()), TableNames::for_stage("ratings"))
}

fn user(repo: &Repository, name: &str, patch: UserPatch) -> User {
    repo.create_user(&User::new(name, name, Cohort::from("1500-1600")))
        .expect("create");
    repo.update_user(name, &patch).expect("patch")
}

#[test]
fn refresh_updates_changed_users_and_keeps_old_ratings_on_failure() {
    let repo = repo();
    user(
        &repo,
        "alice",
        UserPatch {
            chesscom_username: Some("alice_c".to_string()),
            fide_id: Some("123".to_string()),
            ..UserPatch::default()
        },
    );
    let mut bob = user(
        &repo,
        "bob",
        UserPatch {
            lichess_username: Some("bob_l".to_string()),
            ..UserPatch::default()
        },
    );
    bob.set_rating(RatingSystem::Lichess, Some(1700));
    repo.set_user(&bob).expect("seed rating");
    let mut carol = user(
        &repo,
        "carol",
        UserPatch {
            uscf_id: Some("555".to_string()),
            ..UserPatch::default()
        },
    );
    carol.set_rating(RatingSystem::Uscf, Some(1400));
    repo.set_user(&carol).expect("seed rating");
    user(&repo, "dave", UserPatch::default());

    let sites = FakeSites::default()
        .with(RatingSystem::Chesscom, "alice_c", 1650)
        .with(RatingSystem::Lichess, "bob_l", 1700);

    let summary = refresh_ratings(&repo, &sites, 25).expect("refresh");

    assert_eq!(summary.scanned, 4);
    assert_eq!(summary.updated, 1);
    // alice's FIDE lookup and carol's USCF lookup.
    assert_eq!(summary.fetch_failures, 2);
    assert_eq!(summary.write_failures, 0);

    let alice = repo.get_user("alice").expect("alice");
    assert_eq!(alice.current_chesscom_rating, Some(1650));
    assert_eq!(alice.current_fide_rating, None);
    assert_eq!(repo.get_user("carol").expect("carol").current_uscf_rating, Some(1400));
    assert_eq!(repo.get_user("bob").expect("bob").current_lichess_rating, Some(1700));

    // dave has no linked accounts and is never looked up.
    let calls = sites.calls.lock().expect("lock");
    assert_eq!(calls.len(), 4);
    assert!(calls.iter().all(|(_, account)| !account.is_empty()));
}

#[test]
fn refresh_spans_scan_pages_and_batches() {
    let repo = repo();
    let mut sites = FakeSites::default();
    for i in 0..130 {
        let name = format!("user{i:03}");
        user(
            &repo,
            &name,
            UserPatch {
                lichess_username: Some(name.clone()),
                ..UserPatch::default()
            },
        );
        sites = sites.with(RatingSystem::Lichess, &name, 1000 + i);
    }

    let summary = refresh_ratings(&repo, &sites, 7).expect("refresh");
    assert_eq!(summary.scanned, 130);
    assert_eq!(summary.updated, 130);
    assert_eq!(repo.get_user("user129").expect("get").current_lichess_rating, Some(1129));
}

#[test]
fn blank_accounts_are_skipped() {
    let repo = repo();
    user(
        &repo,
        "erin",
        UserPatch {
            ecf_id: Some("   ".to_string()),
            ..UserPatch::default()
        },
    );
    let sites = FakeSites::default();

    let summary = refresh_ratings(&repo, &sites, 25).expect("refresh");
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.fetch_failures, 0);
    assert!(sites.calls.lock().expect("lock").is_empty());
}

#[test]
fn zero_batch_size_is_rejected() {
    let err = refresh_ratings(&repo(), &FakeSites::default(), 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

/// Renames the profile while its rating is being looked up.
struct EditsDuringFetch {
    repo: Repository,
}

impl RatingFetcher for EditsDuringFetch {
    fn fetch(&self, _system: RatingSystem, account: &str) -> Result<u32, RatingFetchError> {
        self.repo
            .update_user(
                account,
                &UserPatch {
                    display_name: Some("Renamed".to_string()),
                    ..UserPatch::default()
                },
            )
            .expect("concurrent edit");
        Ok(2100)
    }
}

#[test]
fn profile_edit_during_refresh_is_not_overwritten() {
    let repo = repo();
    user(
        &repo,
        "frank",
        UserPatch {
            lichess_username: Some("frank".to_string()),
            ..UserPatch::default()
        },
    );
    let sites = EditsDuringFetch { repo: repo.clone() };

    let summary = refresh_ratings(&repo, &sites, 25).expect("refresh");
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.write_failures, 1);

    let frank = repo.get_user("frank").expect("frank");
    assert_eq!(frank.display_name, "Renamed");
    assert_eq!(frank.current_lichess_rating, None);
}

#[test]
fn stale_user_replace_is_a_conflict() {
    let repo = repo();
    let read = user(&repo, "gina", UserPatch::default());
    repo.update_user(
        "gina",
        &UserPatch {
            email: Some("gina@example.com".to_string()),
            ..UserPatch::default()
        },
    )
    .expect("edit");

    let mut stale = read.clone();
    stale.set_rating(RatingSystem::Fide, Some(1900));
    let err = repo.replace_user(&read, &stale).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(err.to_string().contains("was modified concurrently"), "{err}");

    let gina = repo.get_user("gina").expect("gina");
    assert_eq!(gina.email.as_deref(), Some("gina@example.com"));
    assert_eq!(gina.current_fide_rating, None);

    let current = gina.clone();
    let mut fresh = gina;
    fresh.set_rating(RatingSystem::Fide, Some(1900));
    repo.replace_user(&current, &fresh).expect("replace");
    assert_eq!(repo.get_user("gina").expect("gina").current_fide_rating, Some(1900));
}
