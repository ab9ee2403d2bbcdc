use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use slotbook::{
    config::{BookingMode, TableNames, Vocabulary},
    core::store::MemoryStore,
    engine::{
        booking::{BookingProtocol, validate_booking},
        stats::StatsRecorder,
    },
    error::{ErrorKind, SchedulerError},
    model::{Availability, MeetingRequest, MeetingStatus, User, UserPatch},
    op::BucketMode,
    repository::Repository,
    types::{Cohort, SlotType},
};

fn availability(owner: &str, id: &str) -> Availability {
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 18, 0, 0).unwrap();
    Availability {
        owner: owner.to_string(),
        id: id.to_string(),
        owner_cohort: Cohort::from("1500-1600"),
        cohorts: [Cohort::from("1400-1500"), Cohort::from("1500-1600")].into(),
        types: [SlotType::from("OPENING"), SlotType::from("CLASSICAL_GAME")].into(),
        start_time: start,
        end_time: start + Duration::hours(1),
        location: Some("lichess.org".to_string()),
        description: None,
    }
}

fn bob_request() -> MeetingRequest {
    MeetingRequest::new("bob", Cohort::from("1400-1500"), SlotType::from("OPENING"))
}

fn setup(mode: BookingMode) -> (BookingProtocol, StatsRecorder, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let repo = Repository::new(store.clone(), TableNames::for_stage("test"));
    let recorder = StatsRecorder::new(&repo, BucketMode::RequireExisting);
    recorder.seed(&Vocabulary::default()).expect("seed");
    let protocol = BookingProtocol::new(repo, Arc::new(recorder.clone()), mode);
    (protocol, recorder, store)
}

#[test]
fn booking_consumes_availability_and_records_stats() {
    let (protocol, stats, _store) = setup(BookingMode::DeleteThenInsert);

    let slot = protocol.create_availability(availability("alice", "a1")).expect("create");
    let meeting = protocol.book_availability(&slot, bob_request()).expect("book");

    assert_eq!(meeting.owner, "alice");
    assert_eq!(meeting.participant, "bob");
    assert_eq!(meeting.availability_id, "a1");
    assert_eq!(meeting.start_time, slot.start_time);
    assert_eq!(meeting.location.as_deref(), Some("lichess.org"));
    assert_eq!(meeting.status, MeetingStatus::Scheduled);

    let repo = protocol.repository();
    let err = repo.get_availability("alice", "a1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(repo.get_meeting(&meeting.id).expect("meeting"), meeting);

    let a = stats.availability_stats().expect("availability stats");
    assert_eq!(a.created, 1);
    assert_eq!(a.booked, 1);
    assert_eq!(a.deleted, 0);
    assert_eq!(a.owner_cohorts["1500-1600"], 1);
    assert_eq!(a.bookable_cohorts["1400-1500"], 1);
    assert_eq!(a.bookable_cohorts["1500-1600"], 1);
    assert_eq!(a.bookable_cohorts["2400+"], 0);
    assert_eq!(a.types["OPENING"], 1);
    assert_eq!(a.types["CLASSICAL_GAME"], 1);

    let m = stats.meeting_stats().expect("meeting stats");
    assert_eq!(m.created, 1);
    assert_eq!(m.owner_cohorts["1500-1600"], 1);
    assert_eq!(m.participant_cohorts["1400-1500"], 1);
    assert_eq!(m.types["OPENING"], 1);
    assert_eq!(m.types["CLASSICAL_GAME"], 0);
}

#[test]
fn second_booking_of_same_slot_is_conflict() {
    let (protocol, stats, store) = setup(BookingMode::DeleteThenInsert);
    let slot = protocol.create_availability(availability("alice", "a1")).expect("create");

    protocol.book_availability(&slot, bob_request()).expect("first");
    let carol = MeetingRequest::new("carol", Cohort::from("1500-1600"), SlotType::from("OPENING"));
    let err = protocol.book_availability(&slot, carol).unwrap_err();

    assert!(err.is_conflict());
    assert!(err.to_string().contains("does not exist or is already booked"));
    // One meeting plus the statistics record.
    assert_eq!(store.len("test-meetings").expect("len"), 2);
    assert_eq!(stats.availability_stats().expect("stats").booked, 1);
    assert_eq!(stats.meeting_stats().expect("stats").created, 1);
}

#[test]
fn deleted_slot_cannot_be_booked_or_deleted_again() {
    let (protocol, stats, _store) = setup(BookingMode::DeleteThenInsert);
    let slot = protocol.create_availability(availability("alice", "a1")).expect("create");
    let cohort = Cohort::from("1500-1600");

    protocol.delete_availability("alice", "a1", &cohort).expect("delete");
    assert!(protocol.delete_availability("alice", "a1", &cohort).unwrap_err().is_conflict());
    assert!(protocol.book_availability(&slot, bob_request()).unwrap_err().is_conflict());

    let a = stats.availability_stats().expect("stats");
    assert_eq!(a.deleted, 1);
    assert_eq!(a.deleter_cohorts["1500-1600"], 1);
    assert_eq!(a.booked, 0);
}

#[test]
fn booked_slot_cannot_be_deleted() {
    let (protocol, _stats, _store) = setup(BookingMode::DeleteThenInsert);
    let slot = protocol.create_availability(availability("alice", "a1")).expect("create");
    protocol.book_availability(&slot, bob_request()).expect("book");

    let err = protocol
        .delete_availability("alice", "a1", &Cohort::from("1500-1600"))
        .unwrap_err();
    assert!(err.is_conflict());
}

#[test]
fn republishing_a_live_id_is_conflict() {
    let (protocol, _stats, _store) = setup(BookingMode::DeleteThenInsert);
    protocol.create_availability(availability("alice", "a1")).expect("create");
    let err = protocol.create_availability(availability("alice", "a1")).unwrap_err();
    assert!(err.is_conflict());
    assert!(err.to_string().contains("already exists"));
}

#[test]
fn transactional_mode_matches_delete_then_insert() {
    let (protocol, stats, store) = setup(BookingMode::Transactional);
    let slot = protocol.create_availability(availability("alice", "a1")).expect("create");

    let meeting = protocol.book_availability(&slot, bob_request()).expect("book");
    assert!(protocol.book_availability(&slot, bob_request()).unwrap_err().is_conflict());

    // Only the statistics record remains in the availability table.
    assert_eq!(store.len("test-availabilities").expect("len"), 1);
    assert_eq!(protocol.repository().get_meeting(&meeting.id).expect("meeting"), meeting);
    assert_eq!(stats.meeting_stats().expect("stats").created, 1);
}

#[test]
fn cancel_meeting_once_by_participant() {
    let (protocol, stats, _store) = setup(BookingMode::DeleteThenInsert);
    let slot = protocol.create_availability(availability("alice", "a1")).expect("create");
    let meeting = protocol.book_availability(&slot, bob_request()).expect("book");
    let cohort = Cohort::from("1400-1500");

    let canceled = protocol.cancel_meeting(&meeting.id, "bob", &cohort).expect("cancel");
    assert_eq!(canceled.status, MeetingStatus::Canceled);
    assert_eq!(
        protocol.repository().get_meeting(&meeting.id).expect("get").status,
        MeetingStatus::Canceled
    );

    let err = protocol.cancel_meeting(&meeting.id, "alice", &cohort).unwrap_err();
    assert!(err.is_conflict());

    let m = stats.meeting_stats().expect("stats");
    assert_eq!(m.canceled, 1);
    assert_eq!(m.canceler_cohorts["1400-1500"], 1);
}

#[test]
fn cancel_by_outsider_or_unknown_meeting_is_rejected() {
    let (protocol, _stats, _store) = setup(BookingMode::DeleteThenInsert);
    let slot = protocol.create_availability(availability("alice", "a1")).expect("create");
    let meeting = protocol.book_availability(&slot, bob_request()).expect("book");
    let cohort = Cohort::from("1400-1500");

    let err = protocol.cancel_meeting(&meeting.id, "mallory", &cohort).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = protocol
        .cancel_meeting(&"missing".to_string(), "bob", &cohort)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn caller_supplied_meeting_id_is_used() {
    let (protocol, _stats, _store) = setup(BookingMode::DeleteThenInsert);
    let slot = protocol.create_availability(availability("alice", "a1")).expect("create");
    let mut request = bob_request();
    request.meeting_id = Some("m-1".to_string());

    let meeting = protocol.book_availability(&slot, request).expect("book");
    assert_eq!(meeting.id, "m-1");
}

#[test]
fn invalid_availabilities_are_rejected_before_writing() {
    let (protocol, stats, store) = setup(BookingMode::DeleteThenInsert);

    let mut no_cohorts = availability("alice", "a1");
    no_cohorts.cohorts.clear();
    let mut no_types = availability("alice", "a2");
    no_types.types.clear();
    let mut backwards = availability("alice", "a3");
    backwards.end_time = backwards.start_time;
    let reserved = availability("STATISTICS", "a4");
    let blank = availability("alice", " ");

    for slot in [no_cohorts, no_types, backwards, reserved, blank] {
        let err = protocol.create_availability(slot).unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)), "{err}");
    }
    assert_eq!(store.len("test-availabilities").expect("len"), 1);
    assert_eq!(stats.availability_stats().expect("stats").created, 0);
}

#[test]
fn booking_eligibility_checks() {
    let slot = availability("alice", "a1");

    assert!(validate_booking(&slot, &bob_request()).is_ok());

    let own = MeetingRequest::new("alice", Cohort::from("1500-1600"), SlotType::from("OPENING"));
    let wrong_type = MeetingRequest::new("bob", Cohort::from("1400-1500"), SlotType::from("GENERAL_REVIEW"));
    let wrong_cohort = MeetingRequest::new("bob", Cohort::from("2400+"), SlotType::from("OPENING"));
    for request in [own, wrong_type, wrong_cohort] {
        assert_eq!(validate_booking(&slot, &request).unwrap_err().kind(), ErrorKind::Validation);
    }
}

#[test]
fn users_are_created_once_and_patched() {
    let (protocol, _stats, _store) = setup(BookingMode::DeleteThenInsert);
    let repo = protocol.repository();
    let user = User::new("alice", "Alice", Cohort::from("1500-1600"));

    repo.create_user(&user).expect("create");
    assert!(repo.create_user(&user).unwrap_err().is_conflict());

    let updated = repo
        .update_user(
            "alice",
            &UserPatch {
                lichess_username: Some("alice_l".to_string()),
                dojo_cohort: Some(Cohort::from("1600-1700")),
                ..UserPatch::default()
            },
        )
        .expect("patch");
    assert_eq!(updated.lichess_username.as_deref(), Some("alice_l"));
    assert_eq!(repo.get_user("alice").expect("get"), updated);

    let err = repo.update_user("nobody", &UserPatch::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn alice_and_bob_scenario_with_unseeded_tags() {
    let store = Arc::new(MemoryStore::new());
    let repo = Repository::new(store, TableNames::for_stage("test"));
    let stats = StatsRecorder::new(&repo, BucketMode::CreateMissing);
    let protocol = BookingProtocol::new(repo, Arc::new(stats.clone()), BookingMode::DeleteThenInsert);

    let mut slot = availability("alice", "42");
    slot.owner_cohort = Cohort::from("1400-1600");
    slot.cohorts = [Cohort::from("1200-1400")].into();
    slot.types = [SlotType::from("ENDGAME")].into();
    let slot = protocol.create_availability(slot).expect("create");

    let request = MeetingRequest::new("bob", Cohort::from("1200-1400"), SlotType::from("ENDGAME"));
    validate_booking(&slot, &request).expect("eligible");
    let meeting = protocol.book_availability(&slot, request).expect("book");
    assert_eq!((meeting.owner.as_str(), meeting.availability_id.as_str()), ("alice", "42"));

    let a = stats.availability_stats().expect("stats");
    assert_eq!(a.bookable_cohorts["1200-1400"], 1);
    assert_eq!(a.booked, 1);
    let m = stats.meeting_stats().expect("stats");
    assert_eq!(m.owner_cohorts["1400-1600"], 1);
    assert_eq!(m.participant_cohorts["1200-1400"], 1);
    assert_eq!(m.types["ENDGAME"], 1);
}

#[test]
fn two_users_racing_for_one_slot() {
    let (protocol, stats, _store) = setup(BookingMode::DeleteThenInsert);
    let slot = protocol.create_availability(availability("alice", "a1")).expect("create");

    let outcomes: Vec<_> = std::thread::scope(|s| {
        let bob = s.spawn(|| protocol.book_availability(&slot, bob_request()));
        let carol = s.spawn(|| {
            let request = MeetingRequest::new("carol", Cohort::from("1500-1600"), SlotType::from("OPENING"));
            protocol.book_availability(&slot, request)
        });
        vec![bob.join().expect("bob"), carol.join().expect("carol")]
    });

    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(outcomes.iter().filter(|r| r.as_ref().is_err_and(SchedulerError::is_conflict)).count(), 1);
    assert_eq!(stats.availability_stats().expect("stats").booked, 1);
}

#[test]
fn reserved_or_blank_meeting_id_leaves_slot_live() {
    for mode in [BookingMode::DeleteThenInsert, BookingMode::Transactional] {
        let (protocol, stats, _store) = setup(mode);
        let slot = protocol.create_availability(availability("alice", "42")).expect("create");

        for bad_id in ["STATISTICS", "  "] {
            let mut request = bob_request();
            request.meeting_id = Some(bad_id.to_string());
            let err = protocol.book_availability(&slot, request).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{mode:?} {bad_id:?}: {err}");
        }

        assert_eq!(protocol.repository().get_availability("alice", "42").expect("still live"), slot);
        assert_eq!(stats.availability_stats().expect("stats").booked, 0);
        protocol.book_availability(&slot, bob_request()).expect("book with generated id");
    }
}

#[test]
fn reused_meeting_id_leaves_second_slot_live() {
    for mode in [BookingMode::DeleteThenInsert, BookingMode::Transactional] {
        let (protocol, stats, _store) = setup(mode);
        let first = protocol.create_availability(availability("alice", "1")).expect("create 1");
        let second = protocol.create_availability(availability("alice", "2")).expect("create 2");

        let mut request = bob_request();
        request.meeting_id = Some("m".to_string());
        protocol.book_availability(&first, request.clone()).expect("first booking");

        let err = protocol.book_availability(&second, request).unwrap_err();
        assert!(err.is_conflict(), "{mode:?}: {err}");
        assert!(err.to_string().contains("meeting m already exists"));

        assert_eq!(protocol.repository().get_availability("alice", "2").expect("still live"), second);
        assert_eq!(protocol.repository().get_meeting(&"m".to_string()).expect("m").availability_id, "1");
        assert_eq!(stats.availability_stats().expect("stats").booked, 1);
    }
}
