use crate::auth::AuthService;
use crate::collection::CollectionService;
use crate::config::{AuthConfig, Config, UploadsConfig};
use crate::db::{Database, User, now_timestamp};
use crate::error::{AppError, Result};
use crate::favorites::{FavoriteService, is_contiguous};
use crate::mail::{Mailer, VerificationMail};
use crate::reviews::{ReviewDraft, ReviewService};
use crate::stats;
use crate::users::{ProfileUpdate, UserService};
use chrono::NaiveDate;
use parking_lot::Mutex;
use std::sync::Arc;

fn test_db() -> Database {
    Database::open_memory().unwrap()
}

fn create_user(db: &Database, id: &str, username: &str) {
    let user = User {
        id: id.to_string(),
        username: username.to_string(),
        email: format!("{}@example.com", username),
        password_hash: "hash".to_string(),
        bio: None,
        avatar_url: None,
        role: "user".to_string(),
        is_verified: true,
        verification_token: None,
        created_at: now_timestamp(),
        last_login: None,
    };
    db.create_user(&user).unwrap();
}

fn books(favorites: &FavoriteService, user: &str) -> Vec<(String, i64)> {
    favorites
        .list(user)
        .unwrap()
        .into_iter()
        .map(|e| (e.book_id, e.position))
        .collect()
}

fn pairs(expected: &[(&str, i64)]) -> Vec<(String, i64)> {
    expected.iter().map(|(b, p)| (b.to_string(), *p)).collect()
}

fn favorites_with(db: &Database, user: &str, list: &[&str]) -> FavoriteService {
    let favorites = FavoriteService::new(db.clone());
    for book in list {
        favorites.add(user, book).unwrap();
    }
    favorites
}

fn review(rating: f64, comment: Option<&str>) -> ReviewDraft {
    ReviewDraft {
        rating,
        comment: comment.map(str::to_string),
        finish_date: None,
    }
}

fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d)
}

// ========== FAVORITES ==========

#[test]
fn test_favorites_append_in_order() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let favorites = favorites_with(&db, "u1", &["A", "B", "C"]);

    assert_eq!(books(&favorites, "u1"), pairs(&[("A", 1), ("B", 2), ("C", 3)]));
    assert_eq!(db.count_favorites("u1").unwrap(), 3);
}

#[test]
fn test_favorites_capacity() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let favorites = favorites_with(&db, "u1", &["A", "B", "C", "D"]);

    let err = favorites.add("u1", "E").unwrap_err();
    assert!(matches!(err, AppError::CapacityExceeded(4)));
    assert_eq!(
        books(&favorites, "u1"),
        pairs(&[("A", 1), ("B", 2), ("C", 3), ("D", 4)])
    );
}

#[test]
fn test_favorites_duplicate() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let favorites = favorites_with(&db, "u1", &["A"]);

    assert!(matches!(
        favorites.add("u1", "A").unwrap_err(),
        AppError::DuplicateEntry(_)
    ));
    assert!(matches!(
        favorites.add("u1", "  ").unwrap_err(),
        AppError::InvalidInput(_)
    ));
}

#[test]
fn test_favorites_remove_compacts() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let favorites = favorites_with(&db, "u1", &["A", "B", "C"]);

    let removed = favorites.remove("u1", "B").unwrap();
    assert_eq!(removed.position, 2);
    assert_eq!(books(&favorites, "u1"), pairs(&[("A", 1), ("C", 2)]));

    assert!(matches!(
        favorites.remove("u1", "B").unwrap_err(),
        AppError::NotFound(_)
    ));
}

#[test]
fn test_favorites_move_to_front() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let favorites = favorites_with(&db, "u1", &["A", "B", "C", "D"]);

    let moved = favorites.move_to("u1", "D", 1).unwrap();
    assert_eq!(moved.position, 1);
    assert_eq!(
        books(&favorites, "u1"),
        pairs(&[("D", 1), ("A", 2), ("B", 3), ("C", 4)])
    );
}

#[test]
fn test_favorites_move_down() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let favorites = favorites_with(&db, "u1", &["A", "B", "C", "D"]);

    favorites.move_to("u1", "A", 3).unwrap();
    assert_eq!(
        books(&favorites, "u1"),
        pairs(&[("B", 1), ("C", 2), ("A", 3), ("D", 4)])
    );
}

#[test]
fn test_favorites_move_same_position_is_noop() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let favorites = favorites_with(&db, "u1", &["A", "B", "C"]);

    let before = favorites.list("u1").unwrap();
    let entry = favorites.move_to("u1", "B", 2).unwrap();
    assert_eq!(entry, before[1]);
    assert_eq!(favorites.list("u1").unwrap(), before);
}

#[test]
fn test_favorites_failed_move_leaves_list_unchanged() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let favorites = favorites_with(&db, "u1", &["A", "B", "C"]);
    let before = favorites.list("u1").unwrap();

    assert!(matches!(
        favorites.move_to("u1", "A", 0).unwrap_err(),
        AppError::InvalidPosition(0)
    ));
    assert!(matches!(
        favorites.move_to("u1", "A", 5).unwrap_err(),
        AppError::InvalidPosition(5)
    ));
    assert!(matches!(
        favorites.move_to("u1", "A", 4).unwrap_err(),
        AppError::InvalidPosition(4)
    ));
    assert!(matches!(
        favorites.move_to("u1", "Z", 1).unwrap_err(),
        AppError::NotFound(_)
    ));

    assert_eq!(favorites.list("u1").unwrap(), before);
}

#[test]
fn test_favorites_move_rolls_back_on_write_failure() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let favorites = favorites_with(&db, "u1", &["A", "B", "C", "D"]);
    let before = favorites.list("u1").unwrap();

    // Earlier rewrites in the same transaction succeed before this one aborts.
    db.execute_batch(
        "CREATE TRIGGER block_slot_two BEFORE UPDATE ON favorite_books
         WHEN NEW.position = 2
         BEGIN SELECT RAISE(ABORT, 'slot two blocked'); END;",
    )
    .unwrap();

    assert!(matches!(
        favorites.move_to("u1", "D", 1).unwrap_err(),
        AppError::Internal(_)
    ));
    assert_eq!(favorites.list("u1").unwrap(), before);

    db.execute_batch("DROP TRIGGER block_slot_two;").unwrap();
    favorites.move_to("u1", "D", 1).unwrap();
    assert_eq!(
        books(&favorites, "u1"),
        pairs(&[("D", 1), ("A", 2), ("B", 3), ("C", 4)])
    );
}

#[test]
fn test_favorites_remove_rolls_back_on_write_failure() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let favorites = favorites_with(&db, "u1", &["A", "B", "C"]);
    let before = favorites.list("u1").unwrap();

    db.execute_batch(
        "CREATE TRIGGER block_slot_two BEFORE UPDATE ON favorite_books
         WHEN NEW.position = 2
         BEGIN SELECT RAISE(ABORT, 'slot two blocked'); END;",
    )
    .unwrap();

    // The delete of B succeeds, then compacting C into slot 2 aborts.
    assert!(matches!(
        favorites.remove("u1", "B").unwrap_err(),
        AppError::Internal(_)
    ));
    assert_eq!(favorites.list("u1").unwrap(), before);
    assert!(is_contiguous(&before));
}

#[test]
fn test_favorites_stay_contiguous_through_mixed_operations() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let favorites = FavoriteService::new(db.clone());

    let steps: &[(&str, &str, i64)] = &[
        ("add", "A", 0),
        ("add", "B", 0),
        ("add", "C", 0),
        ("move", "C", 1),
        ("add", "D", 0),
        ("remove", "A", 0),
        ("move", "B", 3),
        ("add", "E", 0),
        ("move", "E", 1),
        ("remove", "C", 0),
        ("move", "D", 3),
        ("remove", "E", 0),
        ("add", "F", 0),
    ];

    for (op, book, position) in steps {
        match *op {
            "add" => {
                favorites.add("u1", book).unwrap();
            }
            "remove" => {
                favorites.remove("u1", book).unwrap();
            }
            _ => {
                favorites.move_to("u1", book, *position).unwrap();
            }
        }
        let list = favorites.list("u1").unwrap();
        assert!(is_contiguous(&list), "gap after {} {}: {:?}", op, book, list);
    }

    assert_eq!(books(&favorites, "u1"), pairs(&[("B", 1), ("D", 2), ("F", 3)]));
}

#[test]
fn test_favorites_are_per_user() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    create_user(&db, "u2", "bob");
    let favorites = favorites_with(&db, "u1", &["A", "B", "C", "D"]);

    favorites.add("u2", "A").unwrap();
    favorites.move_to("u1", "D", 1).unwrap();

    assert_eq!(books(&favorites, "u2"), pairs(&[("A", 1)]));
    assert_eq!(favorites.list("u1").unwrap().len(), 4);
}

// ========== COLLECTION & REVIEWS ==========

#[test]
fn test_collection_duplicate_and_status() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let collection = CollectionService::new(db.clone());

    collection.add("u1", "book-1", "read", None).unwrap();
    assert!(matches!(
        collection.add("u1", "book-1", "read", None).unwrap_err(),
        AppError::DuplicateEntry(_)
    ));
    assert!(matches!(
        collection.add("u1", "book-2", "wishlist", None).unwrap_err(),
        AppError::InvalidInput(_)
    ));
}

#[test]
fn test_collection_removal_cascades_to_review() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    create_user(&db, "u2", "bob");
    let collection = CollectionService::new(db.clone());
    let reviews = ReviewService::new(db.clone());

    collection.add("u1", "book-1", "read", date(2024, 3, 1)).unwrap();
    reviews.create("u1", "book-1", &review(4.5, Some("Great"))).unwrap();
    reviews.create("u2", "book-1", &review(3.0, None)).unwrap();

    collection.remove("u1", "book-1").unwrap();

    assert!(db.get_collection_entry("u1", "book-1").unwrap().is_none());
    assert!(db.get_user_book_review("u1", "book-1").unwrap().is_none());
    // Other users' reviews of the same book survive.
    assert!(db.get_user_book_review("u2", "book-1").unwrap().is_some());

    assert!(matches!(
        collection.remove("u1", "book-1").unwrap_err(),
        AppError::NotFound(_)
    ));
}

#[test]
fn test_collection_removal_rolls_back_on_write_failure() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let collection = CollectionService::new(db.clone());
    let reviews = ReviewService::new(db.clone());

    let entry = collection.add("u1", "book-1", "read", date(2024, 3, 1)).unwrap();
    let written = reviews.create("u1", "book-1", &review(4.5, Some("Great"))).unwrap();

    // The review delete runs first, then the collection delete aborts.
    db.execute_batch(
        "CREATE TRIGGER keep_collections BEFORE DELETE ON collections
         BEGIN SELECT RAISE(ABORT, 'collections are locked'); END;",
    )
    .unwrap();

    assert!(matches!(
        collection.remove("u1", "book-1").unwrap_err(),
        AppError::Internal(_)
    ));
    assert_eq!(
        db.get_collection_entry("u1", "book-1").unwrap(),
        Some(entry)
    );
    assert_eq!(
        db.get_user_book_review("u1", "book-1").unwrap(),
        Some(written)
    );
}

#[test]
fn test_read_books_with_reviews() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let collection = CollectionService::new(db.clone());
    let reviews = ReviewService::new(db.clone());

    collection.add("u1", "old", "read", date(2023, 1, 10)).unwrap();
    collection.add("u1", "new", "read", date(2024, 6, 2)).unwrap();
    collection.add("u1", "undated", "read", None).unwrap();
    reviews.create("u1", "new", &review(5.0, Some("Loved it"))).unwrap();

    let read = collection.read_books("u1").unwrap();
    let ids: Vec<&str> = read.iter().map(|r| r.entry.book_id.as_str()).collect();
    assert_eq!(ids, vec!["new", "old", "undated"]);
    assert_eq!(read[0].review.as_ref().map(|r| r.rating), Some(5.0));
    assert!(read[1].review.is_none());

    let history = collection.history("u1").unwrap();
    assert_eq!(history[0].book_id, "undated");
}

#[test]
fn test_duplicate_review_keeps_first() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let reviews = ReviewService::new(db.clone());

    let first = reviews.create("u1", "book-1", &review(4.0, Some("First"))).unwrap();
    let err = reviews
        .create("u1", "book-1", &review(1.0, Some("Second")))
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateEntry(_)));

    let stored = db.get_review(first.id).unwrap().unwrap();
    assert_eq!(stored, first);
}

#[test]
fn test_review_author_checks() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    create_user(&db, "u2", "bob");
    let reviews = ReviewService::new(db.clone());

    let original = reviews.create("u1", "book-1", &review(4.0, Some("Mine"))).unwrap();

    assert!(matches!(
        reviews.update("u2", original.id, &review(1.0, None)).unwrap_err(),
        AppError::Forbidden(_)
    ));
    assert!(matches!(
        reviews.delete("u2", original.id).unwrap_err(),
        AppError::Forbidden(_)
    ));
    assert_eq!(db.get_review(original.id).unwrap().unwrap(), original);

    assert!(matches!(
        reviews.update("u1", 9999, &review(1.0, None)).unwrap_err(),
        AppError::NotFound(_)
    ));

    let updated = reviews
        .update("u1", original.id, &review(2.5, Some("  Changed my mind ")))
        .unwrap();
    assert_eq!(updated.rating, 2.5);
    assert_eq!(updated.comment.as_deref(), Some("Changed my mind"));

    reviews.delete("u1", original.id).unwrap();
    assert!(db.get_review(original.id).unwrap().is_none());
}

#[test]
fn test_review_listings_include_author() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    create_user(&db, "u2", "bob");
    let reviews = ReviewService::new(db.clone());

    reviews.create("u1", "book-1", &review(4.0, None)).unwrap();
    reviews.create("u2", "book-1", &review(2.0, None)).unwrap();
    reviews.create("u1", "book-2", &review(3.0, None)).unwrap();

    let for_book = reviews.for_book("book-1").unwrap();
    assert_eq!(for_book.len(), 2);
    assert!(for_book.iter().any(|r| r.username == "bob"));

    assert_eq!(reviews.by_user("u1").unwrap().len(), 2);
    assert_eq!(reviews.history("u1").unwrap()[0].review.book_id, "book-2");
    assert_eq!(reviews.all().unwrap().len(), 3);
}

#[test]
fn test_moderator_delete() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let reviews = ReviewService::new(db.clone());

    let created = reviews.create("u1", "book-1", &review(4.0, None)).unwrap();
    reviews.moderate_delete(created.id).unwrap();
    assert!(matches!(
        reviews.moderate_delete(created.id).unwrap_err(),
        AppError::NotFound(_)
    ));
}

// ========== STATS ==========

#[test]
fn test_user_stats() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let collection = CollectionService::new(db.clone());
    let reviews = ReviewService::new(db.clone());

    let empty = stats::user_stats(&db, "u1", 20).unwrap();
    assert_eq!(empty.books_read, 0);
    assert_eq!(empty.average_rating, 0.0);
    assert_eq!(empty.reading_goal_progress, 0);

    for (book, rating) in [("a", 4.0), ("b", 3.5), ("c", 3.5)] {
        collection.add("u1", book, "read", None).unwrap();
        reviews.create("u1", book, &review(rating, None)).unwrap();
    }
    collection.add("u1", "d", "read", None).unwrap();
    collection.add("u1", "e", "read", None).unwrap();

    let s = stats::user_stats(&db, "u1", 20).unwrap();
    assert_eq!(s.books_read, 5);
    assert_eq!(s.reviews_written, 3);
    assert_eq!(s.average_rating, 3.7);
    assert_eq!(s.reading_goal, 20);
    assert_eq!(s.reading_goal_progress, 25);
}

// ========== AUTH ==========

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<VerificationMail>>,
}

impl Mailer for RecordingMailer {
    fn send_verification(&self, mail: &VerificationMail) -> Result<()> {
        self.sent.lock().push(mail.clone());
        Ok(())
    }
}

struct FailingMailer;

impl Mailer for FailingMailer {
    fn send_verification(&self, _mail: &VerificationMail) -> Result<()> {
        Err(AppError::Internal("smtp down".to_string()))
    }
}

fn auth_with(db: &Database, mailer: Arc<dyn Mailer>) -> AuthService {
    AuthService::new(db.clone(), &AuthConfig::default())
        .with_public_url("https://books.example.com/")
        .with_mailer(mailer)
}

#[test]
fn test_register_verify_login() {
    let db = test_db();
    let mailer = Arc::new(RecordingMailer::default());
    let auth = auth_with(&db, mailer.clone());

    let user = auth.register("alice", "Alice@Example.com", "Secret1!").unwrap();
    assert_eq!(user.email, "alice@example.com");
    assert!(!user.is_verified);

    // Unverified accounts cannot log in.
    assert!(matches!(
        auth.login("alice@example.com", "Secret1!").unwrap_err(),
        AppError::Unauthorized(_)
    ));

    let mail = mailer.sent.lock().pop().unwrap();
    assert_eq!(mail.to, "alice@example.com");
    let token = mail
        .link
        .strip_prefix("https://books.example.com/api/auth/verify-email/")
        .unwrap()
        .to_string();

    let verified = auth.verify_email(&token).unwrap();
    assert!(verified.is_verified);
    assert!(matches!(
        auth.verify_email(&token).unwrap_err(),
        AppError::InvalidInput(_)
    ));

    let (logged_in, session) = auth.login("ALICE@example.com", "Secret1!").unwrap();
    assert_eq!(logged_in.id, user.id);

    let current = auth.validate_token(&session).unwrap().unwrap();
    assert_eq!(current.username, "alice");

    auth.logout(&session).unwrap();
    assert!(auth.validate_token(&session).unwrap().is_none());
}

#[test]
fn test_register_rejects_bad_input() {
    let db = test_db();
    let auth = auth_with(&db, Arc::new(RecordingMailer::default()));

    auth.register("alice", "alice@example.com", "Secret1!").unwrap();

    assert!(matches!(
        auth.register("alice2", "alice@example.com", "Secret1!").unwrap_err(),
        AppError::DuplicateEntry(_)
    ));
    assert!(matches!(
        auth.register("alice", "other@example.com", "Secret1!").unwrap_err(),
        AppError::DuplicateEntry(_)
    ));
    assert!(matches!(
        auth.register("bob", "bob@example.com", "weak").unwrap_err(),
        AppError::InvalidInput(_)
    ));
    assert!(matches!(
        auth.register("bob smith", "bob@example.com", "Secret1!").unwrap_err(),
        AppError::InvalidInput(_)
    ));
    assert!(matches!(
        auth.register("bob", "not-an-email", "Secret1!").unwrap_err(),
        AppError::InvalidInput(_)
    ));
}

#[test]
fn test_registration_survives_mail_failure() {
    let db = test_db();
    let auth = auth_with(&db, Arc::new(FailingMailer));

    let user = auth.register("alice", "alice@example.com", "Secret1!").unwrap();
    assert!(db.get_user_by_id(&user.id).unwrap().is_some());
}

#[test]
fn test_registration_disabled() {
    let db = test_db();
    let config = AuthConfig {
        registration: "disabled".to_string(),
        ..AuthConfig::default()
    };
    let auth = AuthService::new(db, &config);

    assert!(matches!(
        auth.register("alice", "alice@example.com", "Secret1!").unwrap_err(),
        AppError::Forbidden(_)
    ));
}

#[test]
fn test_wrong_password_and_admin_management() {
    let db = test_db();
    let auth = auth_with(&db, Arc::new(RecordingMailer::default()));

    let admin = auth
        .create_user("root", "root@example.com", "Adm1n!pass", "admin")
        .unwrap();
    assert!(admin.is_verified);
    assert!(auth.is_admin(&admin));

    assert!(matches!(
        auth.login("root@example.com", "wrong").unwrap_err(),
        AppError::Unauthorized(_)
    ));
    assert!(matches!(
        auth.login("nobody@example.com", "Adm1n!pass").unwrap_err(),
        AppError::Unauthorized(_)
    ));

    auth.create_user("bob", "bob@example.com", "B0b!pass", "user")
        .unwrap();
    assert!(auth.set_role("bob", "admin").unwrap());
    assert!(!auth.set_role("ghost", "admin").unwrap());
    assert!(auth.set_role("bob", "owner").is_err());

    assert!(auth.change_password("bob", "N3w!password").unwrap());
    assert!(auth.login("bob@example.com", "N3w!password").is_ok());

    assert_eq!(auth.list_users().unwrap().len(), 2);
}

#[test]
fn test_expired_sessions_are_rejected() {
    let db = test_db();
    let config = AuthConfig {
        session_days: 0,
        require_verification: false,
        ..AuthConfig::default()
    };
    let auth = AuthService::new(db.clone(), &config);
    auth.register("alice", "alice@example.com", "Secret1!").unwrap();

    let (_, token) = auth.login("alice@example.com", "Secret1!").unwrap();
    // Sessions expire at the end of the creation second.
    std::thread::sleep(std::time::Duration::from_millis(1100));
    assert!(auth.validate_token(&token).unwrap().is_none());
}

// ========== USERS ==========

fn user_service(db: &Database, dir: &std::path::Path) -> UserService {
    let uploads = UploadsConfig {
        avatars_dir: dir.to_path_buf(),
        max_avatar_bytes: 64,
    };
    UserService::new(db.clone(), &uploads)
}

#[test]
fn test_user_search_and_suggestions() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    create_user(&db, "u2", "bob");
    create_user(&db, "u3", "bobby_tables");
    create_user(&db, "u4", "carol");
    let collection = CollectionService::new(db.clone());
    for book in ["a", "b", "c"] {
        collection.add("u4", book, "read", None).unwrap();
    }
    collection.add("u2", "a", "read", None).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let users = user_service(&db, tmp.path());

    let found = users.search("u1", Some("bob")).unwrap();
    let names: Vec<&str> = found.iter().map(|u| u.username.as_str()).collect();
    assert_eq!(names, vec!["bob", "bobby_tables"]);

    // The caller never finds themselves.
    assert!(users.search("u1", Some("alice")).unwrap().is_empty());
    // Underscores are matched literally.
    assert_eq!(users.search("u1", Some("_")).unwrap().len(), 1);

    assert!(matches!(
        users.search("u1", None).unwrap_err(),
        AppError::InvalidInput(_)
    ));
    assert!(matches!(
        users.search("u1", Some("  ")).unwrap_err(),
        AppError::InvalidInput(_)
    ));

    let suggested = users.suggested("u1", None).unwrap();
    assert_eq!(suggested[0].username, "carol");
    assert_eq!(suggested[0].read_books, 3);
    assert_eq!(suggested[1].username, "bob");
    assert_eq!(suggested.len(), 3);
    assert_eq!(users.suggested("u1", Some(1)).unwrap().len(), 1);
}

#[test]
fn test_profile_update_and_public_profile() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    create_user(&db, "u2", "bob");
    let tmp = tempfile::tempdir().unwrap();
    let users = user_service(&db, tmp.path());

    let update = ProfileUpdate {
        username: None,
        bio: Some("Reads mostly sci-fi".to_string()),
    };
    let updated = users.update_profile("u1", &update).unwrap();
    assert_eq!(updated.username, "alice");
    assert_eq!(updated.bio.as_deref(), Some("Reads mostly sci-fi"));

    let taken = ProfileUpdate {
        username: Some("bob".to_string()),
        bio: None,
    };
    assert!(matches!(
        users.update_profile("u1", &taken).unwrap_err(),
        AppError::DuplicateEntry(_)
    ));

    FavoriteService::new(db.clone()).add("u1", "book-1").unwrap();
    let profile = users.profile("u1").unwrap();
    assert_eq!(profile.favorite_books, 1);
    assert_eq!(profile.read_books, 0);

    assert!(matches!(
        users.profile("nobody").unwrap_err(),
        AppError::NotFound(_)
    ));
}

#[tokio::test]
async fn test_avatar_upload_replaces_previous_file() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let tmp = tempfile::tempdir().unwrap();
    let users = user_service(&db, tmp.path());

    let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    let first = users.upload_avatar("u1", &png).await.unwrap();
    let first_url = first.avatar_url.unwrap();
    let first_file = first_url.strip_prefix("/avatars/").unwrap().to_string();
    assert!(first_file.ends_with(".png"));
    assert!(users.avatar_path(&first_file).unwrap().exists());

    let gif = *b"GIF89a\x01\x00\x01\x00";
    let second = users.upload_avatar("u1", &gif).await.unwrap();
    let second_file = second
        .avatar_url
        .unwrap()
        .strip_prefix("/avatars/")
        .unwrap()
        .to_string();

    assert!(users.avatar_path(&second_file).unwrap().exists());
    assert!(!tmp.path().join(&first_file).exists());
}

#[tokio::test]
async fn test_avatar_upload_rejections() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let tmp = tempfile::tempdir().unwrap();
    let users = user_service(&db, tmp.path());

    let too_big = vec![0xFFu8; 65];
    assert!(matches!(
        users.upload_avatar("u1", &too_big).await.unwrap_err(),
        AppError::PayloadTooLarge(64)
    ));
    assert!(matches!(
        users.upload_avatar("u1", b"plain text").await.unwrap_err(),
        AppError::InvalidInput(_)
    ));
    assert!(users.get("u1").unwrap().avatar_url.is_none());
}

#[tokio::test]
async fn test_account_deletion_removes_avatar_file() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    let tmp = tempfile::tempdir().unwrap();
    let users = user_service(&db, tmp.path());

    let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    let uploaded = users.upload_avatar("u1", &png).await.unwrap();
    let file = uploaded
        .avatar_url
        .unwrap()
        .strip_prefix("/avatars/")
        .unwrap()
        .to_string();
    assert!(tmp.path().join(&file).exists());

    let deleted = users.delete("u1").await.unwrap();
    assert_eq!(deleted.username, "alice");
    assert!(!tmp.path().join(&file).exists());
    assert!(matches!(users.get("u1").unwrap_err(), AppError::NotFound(_)));

    assert!(matches!(
        users.delete("u1").await.unwrap_err(),
        AppError::NotFound(_)
    ));
}

// ========== ADMIN ==========

#[test]
fn test_user_deletion_cascades() {
    let db = test_db();
    create_user(&db, "u1", "alice");
    create_user(&db, "u2", "bob");
    let collection = CollectionService::new(db.clone());
    let reviews = ReviewService::new(db.clone());
    let favorites = favorites_with(&db, "u1", &["A", "B"]);

    collection.add("u1", "A", "read", None).unwrap();
    reviews.create("u1", "A", &review(4.0, None)).unwrap();
    reviews.create("u2", "A", &review(3.0, None)).unwrap();

    let rows = db.admin_list_users().unwrap();
    let alice = rows.iter().find(|r| r.username == "alice").unwrap();
    assert_eq!((alice.reviews, alice.collections), (1, 1));

    assert!(db.delete_user_by_id("u1").unwrap());
    assert!(favorites.list("u1").unwrap().is_empty());
    assert_eq!(db.count_collection("u1").unwrap(), 0);
    assert!(reviews.by_user("u1").unwrap().is_empty());
    assert_eq!(reviews.by_user("u2").unwrap().len(), 1);
    assert!(!db.delete_user_by_id("u1").unwrap());
}

// ========== CONFIG ==========

#[test]
fn test_default_config_parses() {
    let config = Config::parse(&Config::generate_default()).unwrap();
    assert_eq!(config.server.bind.port(), 8080);
    assert!(config.auth.registration_enabled());
    assert!(config.auth.require_verification);
    assert_eq!(config.catalog.cache_ttl_seconds, 300);
    assert_eq!(config.uploads.max_avatar_bytes, 5 * 1024 * 1024);
    assert_eq!(config.stats.reading_goal, 20);
}

#[test]
fn test_partial_config_uses_defaults() {
    let config = Config::parse(
        r#"
[auth]
registration = "disabled"

[catalog]
api_key = "secret"
throttle_ms = 2000

[stats]
reading_goal = 52
"#,
    )
    .unwrap();

    assert!(!config.auth.registration_enabled());
    assert_eq!(config.auth.session_days, 30);
    assert_eq!(config.catalog.api_key.as_deref(), Some("secret"));
    assert_eq!(config.catalog.throttle_ms, 2000);
    assert_eq!(config.catalog.base_url, "https://www.googleapis.com/books/v1");
    assert_eq!(config.stats.reading_goal, 52);

    assert!(matches!(
        Config::parse("[server]\nbind = 12").unwrap_err(),
        AppError::Config(_)
    ));
}

#[test]
fn test_config_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mybook.toml");
    std::fs::write(&path, "[database]\npath = \"/tmp/x.db\"\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.database.path, std::path::PathBuf::from("/tmp/x.db"));

    assert!(Config::load(&dir.path().join("missing.toml")).is_err());
}
