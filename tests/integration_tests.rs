use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::json;
use tower::ServiceExt;

use salon_agent::config::{AgentSettings, AppConfig};
use salon_agent::db::{queries, seed, Document, DocumentStore, SqliteStore, WriteBatch};
use salon_agent::errors::{AgentError, BookingError};
use salon_agent::handlers;
use salon_agent::models::{AgentState, Booking, BookingStatus, Role};
use salon_agent::services::ai::functions::{CREATE_BOOKING, FIND_AVAILABLE_SLOTS, LIST_BUSINESSES};
use salon_agent::services::ai::{guard, ChatRequest, Content, ContentRole, LlmProvider, ModelReply, Part};
use salon_agent::services::auth::{AuthProvider, SessionAuth, UserIdentity};
use salon_agent::services::booking::BookingService;
use salon_agent::services::conversation::ConversationEngine;
use salon_agent::services::directory::DirectoryService;
use salon_agent::state::AppState;

// ── Mock Provider ──

/// Replies from a script, one per call, and records every request it was sent.
struct MockLlm {
    replies: Mutex<VecDeque<ModelReply>>,
    requests: Mutex<Vec<Vec<Content>>>,
}

impl MockLlm {
    fn new(replies: Vec<ModelReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(vec![]),
        })
    }

    fn requests(&self) -> Vec<Vec<Content>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn generate(&self, request: ChatRequest<'_>) -> anyhow::Result<ModelReply> {
        self.requests.lock().unwrap().push(request.contents.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("script exhausted"))
    }
}

/// Never answers within the test timeout.
struct SlowLlm;

#[async_trait]
impl LlmProvider for SlowLlm {
    async fn generate(&self, _request: ChatRequest<'_>) -> anyhow::Result<ModelReply> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(ModelReply::text("too late"))
    }
}

/// Delays every commit, so concurrent bookings overlap between their checks and their writes.
struct SlowCommitStore {
    inner: SqliteStore,
}

#[async_trait]
impl DocumentStore for SlowCommitStore {
    async fn get(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
        self.inner.get(collection, id).await
    }

    async fn set(&self, collection: &str, id: &str, data: &serde_json::Value) -> anyhow::Result<()> {
        self.inner.set(collection, id, data).await
    }

    async fn scan(&self, collection: &str) -> anyhow::Result<Vec<Document>> {
        self.inner.scan(collection).await
    }

    async fn query_eq(
        &self,
        collection: &str,
        filters: &[(&str, serde_json::Value)],
    ) -> anyhow::Result<Vec<Document>> {
        self.inner.query_eq(collection, filters).await
    }

    async fn commit(&self, batch: WriteBatch) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.inner.commit(batch).await
    }

    async fn commit_if(
        &self,
        batch: WriteBatch,
        collection: &str,
        filters: &[(&str, serde_json::Value)],
        accept: &(dyn for<'d> Fn(&'d [Document]) -> bool + Send + Sync),
    ) -> anyhow::Result<bool> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.inner.commit_if(batch, collection, filters, accept).await
    }
}

// ── Helpers ──

const DIRECTORY_JSON: &str = r#"[{
    "id": "biz-1",
    "name": "Test Business",
    "type": "Barber",
    "city": "Dublin",
    "address": "1 Test Street",
    "openingHours": {
        "Monday": "09:00 AM - 06:00 PM",
        "Tuesday": "09:00 AM - 06:00 PM",
        "Wednesday": "09:00 AM - 06:00 PM",
        "Thursday": "09:00 AM - 06:00 PM",
        "Friday": "09:00 AM - 06:00 PM",
        "Saturday": "09:00 AM - 06:00 PM",
        "Sunday": "Closed"
    },
    "services": [
        {"id": "svc-1", "name": "Test Service", "price": 30, "duration": 60, "staffIds": ["staff-1"]}
    ],
    "staff": [
        {"id": "staff-1", "name": "Test Staff", "workingDays": ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday"]}
    ]
}]"#;

const SATURDAY: &str = "2023-04-01";

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        gemini_api_key: String::new(),
        gemini_model: "gemini-2.0-flash".to_string(),
        gemini_temperature: 0.7,
        gemini_safety_threshold: "BLOCK_MEDIUM_AND_ABOVE".to_string(),
        max_guard_retries: 2,
        model_timeout_secs: 30,
        store_timeout_secs: 10,
        session_ttl_secs: 1800,
        seed_file: None,
    }
}

async fn seeded_store() -> Arc<dyn DocumentStore> {
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open(":memory:").unwrap());
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(DIRECTORY_JSON.as_bytes()).unwrap();
    let imported = seed::import_directory(store.as_ref(), file.path()).await.unwrap();
    assert_eq!(imported, 1);
    store
}

fn user() -> UserIdentity {
    UserIdentity {
        user_id: "user-1".to_string(),
        email: Some("user@example.com".to_string()),
    }
}

fn engine(
    store: &Arc<dyn DocumentStore>,
    llm: Arc<dyn LlmProvider>,
    auth: Arc<SessionAuth>,
    settings: AgentSettings,
) -> ConversationEngine {
    ConversationEngine::new(
        llm,
        auth,
        DirectoryService::new(Arc::clone(store)),
        BookingService::new(Arc::clone(store)),
        settings,
    )
}

async fn book_ten_am(bookings: &BookingService) -> Result<Booking, BookingError> {
    bookings
        .create_booking(
            Some(&user()),
            "Test Business",
            "Test Staff",
            "Test Service",
            SATURDAY,
            "10:00",
        )
        .await
        .map(|c| c.booking)
}

fn function_response(contents: &[Content]) -> Option<&serde_json::Value> {
    contents
        .iter()
        .filter(|c| c.role == ContentRole::Function)
        .flat_map(|c| c.parts.iter())
        .find_map(|p| match p {
            Part::FunctionResponse { response, .. } => Some(response),
            _ => None,
        })
}

fn test_app(state: Arc<AppState>) -> Router {
    handlers::router(state)
}

async fn body_json(res: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ── Availability & Booking ──

#[tokio::test]
async fn test_existing_booking_excludes_its_slot() {
    let store = seeded_store().await;
    let bookings = BookingService::new(Arc::clone(&store));
    book_ten_am(&bookings).await.unwrap();

    let slots = bookings
        .find_available_slots("Test Business", "Test Service", SATURDAY, Some("Test Staff"))
        .await
        .unwrap();
    let starts: Vec<&str> = slots.iter().map(|s| s.start_time.as_str()).collect();

    assert!(starts.contains(&"09:00"));
    assert!(!starts.contains(&"10:00"));
    assert!(!starts.contains(&"09:30"));
    assert!(!starts.contains(&"10:30"));
    assert!(starts.contains(&"11:00"));
    assert_eq!(starts.last(), Some(&"17:00"));
    assert!(slots.iter().all(|s| s.staff_name == "Test Staff"));
}

#[tokio::test]
async fn test_slots_without_staff_use_qualified_staff() {
    let store = seeded_store().await;
    let bookings = BookingService::new(store);

    let slots = bookings
        .find_available_slots("Test Business", "Test Service", SATURDAY, None)
        .await
        .unwrap();
    assert_eq!(slots.len(), 17);
    assert_eq!(slots[0].start_time, "09:00");
    assert_eq!(slots[0].end_time, "10:00");

    let sunday = bookings
        .find_available_slots("Test Business", "Test Service", "2023-04-02", None)
        .await
        .unwrap();
    assert!(sunday.is_empty());
}

#[tokio::test]
async fn test_unknown_names_are_not_found() {
    let store = seeded_store().await;
    let bookings = BookingService::new(store);

    let err = bookings
        .find_available_slots("Nowhere", "Test Service", SATURDAY, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "not_found");

    let err = bookings
        .find_available_slots("Test Business", "Test Service", SATURDAY, Some("Ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::NotFound(_)));
}

#[tokio::test]
async fn test_double_booking_is_rejected_without_writes() {
    let store = seeded_store().await;
    let bookings = BookingService::new(Arc::clone(&store));
    book_ten_am(&bookings).await.unwrap();

    let err = book_ten_am(&bookings).await.unwrap_err();
    assert_eq!(
        err,
        BookingError::Conflict {
            staff_name: "Test Staff".to_string(),
            date: SATURDAY.to_string(),
            start_time: "10:00".to_string(),
        }
    );

    let business_copies = store.scan(&queries::business_bookings_path("biz-1")).await.unwrap();
    let user_copies = queries::get_user_bookings(store.as_ref(), "user-1").await.unwrap();
    assert_eq!(business_copies.len(), 1);
    assert_eq!(user_copies.len(), 1);
}

#[tokio::test]
async fn test_overlapping_booking_is_rejected() {
    let store = seeded_store().await;
    let bookings = BookingService::new(Arc::clone(&store));
    book_ten_am(&bookings).await.unwrap();

    let err = bookings
        .create_booking(Some(&user()), "Test Business", "Test Staff", "Test Service", SATURDAY, "10:30")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "slot_taken");
}

#[tokio::test]
async fn test_concurrent_bookings_for_one_slot() {
    let store: Arc<dyn DocumentStore> = Arc::new(SlowCommitStore {
        inner: SqliteStore::open(":memory:").unwrap(),
    });
    let entries = seed::parse_directory(DIRECTORY_JSON).unwrap();
    for entry in &entries {
        let id = &entry.business.id;
        store.set(queries::BUSINESSES, id, &json!(entry.business)).await.unwrap();
        for service in &entry.services {
            store.set(&queries::services_path(id), &service.id, &json!(service)).await.unwrap();
        }
        for staff in &entry.staff {
            store.set(&queries::staff_path(id), &staff.id, &json!(staff)).await.unwrap();
        }
    }

    let bookings = BookingService::new(Arc::clone(&store));
    let alice = UserIdentity {
        user_id: "alice".to_string(),
        email: None,
    };
    let bob = UserIdentity {
        user_id: "bob".to_string(),
        email: None,
    };
    let (a, b) = tokio::join!(
        bookings.create_booking(Some(&alice), "Test Business", "Test Staff", "Test Service", SATURDAY, "10:00"),
        bookings.create_booking(Some(&bob), "Test Business", "Test Staff", "Test Service", SATURDAY, "10:30"),
    );

    assert!(a.is_ok() != b.is_ok(), "exactly one booking should win");
    let loser = a.err().or(b.err()).unwrap();
    assert_eq!(loser.kind(), "slot_taken");

    let business_copies = store.scan(&queries::business_bookings_path("biz-1")).await.unwrap();
    assert_eq!(business_copies.len(), 1);
    let user_copies = queries::get_user_bookings(store.as_ref(), "alice").await.unwrap().len()
        + queries::get_user_bookings(store.as_ref(), "bob").await.unwrap().len();
    assert_eq!(user_copies, 1);
}

#[tokio::test]
async fn test_booking_past_end_of_day_is_invalid() {
    let store = seeded_store().await;
    store
        .set(
            &queries::services_path("biz-1"),
            "svc-long",
            &json!({"id": "svc-long", "name": "Overnight Treatment", "price": 90, "duration": 600, "staffIds": ["staff-1"]}),
        )
        .await
        .unwrap();
    let bookings = BookingService::new(Arc::clone(&store));

    let err = bookings
        .create_booking(Some(&user()), "Test Business", "Test Staff", "Overnight Treatment", SATURDAY, "17:00")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_argument");
    assert!(store.scan(&queries::business_bookings_path("biz-1")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unreadable_hours_do_not_hide_directory() {
    let store = seeded_store().await;
    store
        .set(
            queries::BUSINESSES,
            "biz-2",
            &json!({
                "id": "biz-2",
                "name": "Late Night Cuts",
                "type": "Barber",
                "city": "Dublin",
                "openingHours": {"Monday": "nine to five", "Friday": "06:00 PM - 12:00 AM"}
            }),
        )
        .await
        .unwrap();

    let businesses = DirectoryService::new(Arc::clone(&store))
        .list_businesses_with_details()
        .await
        .unwrap();
    assert_eq!(businesses.len(), 2);

    let state = Arc::new(AppState::new(store, test_config(), MockLlm::new(vec![])));
    let res = test_app(state)
        .oneshot(Request::builder().uri("/api/directory").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json[1]["name"], "Late Night Cuts");
    assert!(json[1]["openingHours"].get("Monday").is_none());
    assert_eq!(json[1]["openingHours"]["Friday"], "06:00 PM - 12:00 AM");
}

#[tokio::test]
async fn test_booking_is_written_twice_with_same_id() {
    let store = seeded_store().await;
    let bookings = BookingService::new(Arc::clone(&store));
    let booking = book_ten_am(&bookings).await.unwrap();

    let business_copy = store
        .get(&queries::business_bookings_path("biz-1"), &booking.id)
        .await
        .unwrap()
        .unwrap();
    let user_copy = store
        .get(&queries::user_bookings_path("user-1"), &booking.id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(business_copy.data, user_copy.data);
    let stored: Booking = user_copy.decode().unwrap();
    assert_eq!(stored, booking);
    assert_eq!(stored.status, BookingStatus::Confirmed);
    assert_eq!(stored.user_email.as_deref(), Some("user@example.com"));
    assert_eq!(stored.duration, 60);
}

#[tokio::test]
async fn test_booking_requires_sign_in() {
    let store = seeded_store().await;
    let bookings = BookingService::new(Arc::clone(&store));

    let err = bookings
        .create_booking(None, "Test Business", "Test Staff", "Test Service", SATURDAY, "10:00")
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::Unauthenticated);
    assert!(store
        .scan(&queries::business_bookings_path("biz-1"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_booking_rejects_malformed_date_and_time() {
    let store = seeded_store().await;
    let bookings = BookingService::new(store);

    let err = bookings
        .create_booking(Some(&user()), "Test Business", "Test Staff", "Test Service", "next Friday", "10:00")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_argument");

    let err = bookings
        .create_booking(Some(&user()), "Test Business", "Test Staff", "Test Service", SATURDAY, "10am")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_argument");
}

// ── Conversation Engine ──

#[tokio::test]
async fn test_list_businesses_falls_back_to_template() {
    let store = seeded_store().await;
    let llm = MockLlm::new(vec![
        ModelReply::call(LIST_BUSINESSES, json!({})),
        ModelReply::text("   "),
    ]);
    let mut engine = engine(&store, llm.clone(), Arc::new(SessionAuth::new()), AgentSettings::default());

    let reply = engine.generate_response("List businesses in Dublin", false).await.unwrap();

    assert!(reply.starts_with("Here are the businesses I found:"));
    assert!(reply.contains("**Test Business** (Barber, Dublin)"));
    assert!(reply.contains("- Test Service: 30.00, 60 min (with Test Staff)"));
    assert_eq!(engine.state(), AgentState::Idle);

    let history = engine.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].role, Role::Model);
    assert_eq!(history[1].content, reply);

    let requests = llm.requests();
    assert_eq!(requests.len(), 2);
    let response = function_response(&requests[1]).unwrap();
    assert_eq!(response["name"], LIST_BUSINESSES);
    assert_eq!(response["content"][0]["name"], "Test Business");
}

#[tokio::test]
async fn test_model_text_is_preferred_over_fallback() {
    let store = seeded_store().await;
    let llm = MockLlm::new(vec![
        ModelReply::call(
            FIND_AVAILABLE_SLOTS,
            json!({"businessName": "Test Business", "serviceName": "Test Service", "date": SATURDAY}),
        ),
        ModelReply::text("Test Staff is free from 09:00."),
    ]);
    let mut engine = engine(&store, llm.clone(), Arc::new(SessionAuth::new()), AgentSettings::default());

    let reply = engine.generate_response("Any times on Saturday?", false).await.unwrap();
    assert_eq!(reply, "Test Staff is free from 09:00.");

    let requests = llm.requests();
    let response = function_response(&requests[1]).unwrap();
    assert_eq!(response["content"][0]["startTime"], "09:00");
}

#[tokio::test]
async fn test_guard_retries_unbacked_booking_claim() {
    let store = seeded_store().await;
    let llm = MockLlm::new(vec![
        ModelReply::text("Great news, I've successfully created your booking!"),
        ModelReply::text("Which time would you like?"),
    ]);
    let mut engine = engine(&store, llm.clone(), Arc::new(SessionAuth::new()), AgentSettings::default());

    let reply = engine.generate_response("Book me in", false).await.unwrap();
    assert_eq!(reply, "Which time would you like?");

    let requests = llm.requests();
    assert_eq!(requests.len(), 2);
    let retried: Vec<String> = requests[1].iter().map(Content::text).collect();
    assert!(retried.iter().any(|t| t == guard::CORRECTION_NOTE));
    assert!(engine.history().iter().all(|t| !t.content.contains("successfully created")));
}

#[tokio::test]
async fn test_guard_gives_up_after_retry_cap() {
    let store = seeded_store().await;
    let claim = || ModelReply::text("Your appointment is confirmed.");
    let llm = MockLlm::new(vec![claim(), claim(), claim()]);
    let settings = AgentSettings {
        max_guard_retries: 2,
        ..AgentSettings::default()
    };
    let mut engine = engine(&store, llm.clone(), Arc::new(SessionAuth::new()), settings);

    let err = engine.generate_response("Book me in", false).await.unwrap_err();
    assert!(matches!(err, AgentError::ProtocolViolation { attempts: 3 }));
    assert_eq!(llm.requests().len(), 3);
    assert_eq!(engine.state(), AgentState::Idle);
}

#[tokio::test]
async fn test_empty_model_reply_is_an_error() {
    let store = seeded_store().await;
    let llm = MockLlm::new(vec![ModelReply::text("")]);
    let mut engine = engine(&store, llm, Arc::new(SessionAuth::new()), AgentSettings::default());

    let err = engine.generate_response("Hello", false).await.unwrap_err();
    assert!(matches!(err, AgentError::EmptyResponse));
}

#[tokio::test]
async fn test_create_booking_through_engine() {
    let store = seeded_store().await;
    let llm = MockLlm::new(vec![
        ModelReply::call(
            CREATE_BOOKING,
            json!({
                "businessName": "Test Business",
                "staffName": "Test Staff",
                "serviceName": "Test Service",
                "date": SATURDAY,
                "startTime": "09:00"
            }),
        ),
        ModelReply::text(""),
    ]);
    let auth = Arc::new(SessionAuth::signed_in(user()));
    let mut engine = engine(&store, llm.clone(), auth, AgentSettings::default());

    let reply = engine.generate_response("Book 9am Saturday with Test Staff", false).await.unwrap();
    assert_eq!(
        reply,
        "Your Test Service appointment at Test Business is confirmed for Saturday, April 1, 2023 at 09:00 with Test Staff."
    );

    let stored = queries::get_user_bookings(store.as_ref(), "user-1").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].start_time, "09:00");
}

#[tokio::test]
async fn test_booking_survives_failed_follow_up() {
    let store = seeded_store().await;
    // Only the function call is scripted; the follow-up request fails
    let llm = MockLlm::new(vec![ModelReply::call(
        CREATE_BOOKING,
        json!({
            "businessName": "Test Business",
            "staffName": "Test Staff",
            "serviceName": "Test Service",
            "date": SATURDAY,
            "startTime": "11:00"
        }),
    )]);
    let auth = Arc::new(SessionAuth::signed_in(user()));
    let mut engine = engine(&store, llm.clone(), auth, AgentSettings::default());

    let reply = engine.generate_response("Book 11am Saturday", false).await.unwrap();
    assert_eq!(
        reply,
        "Your Test Service appointment at Test Business is confirmed for Saturday, April 1, 2023 at 11:00 with Test Staff."
    );
    assert_eq!(llm.requests().len(), 2);
    assert_eq!(engine.history().len(), 2);
    assert_eq!(engine.state(), AgentState::Idle);

    let stored = queries::get_user_bookings(store.as_ref(), "user-1").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].start_time, "11:00");
}

#[tokio::test]
async fn test_create_booking_signed_out_reports_error_kind() {
    let store = seeded_store().await;
    let llm = MockLlm::new(vec![
        ModelReply::call(
            CREATE_BOOKING,
            json!({
                "businessName": "Test Business",
                "staffName": "Test Staff",
                "serviceName": "Test Service",
                "date": SATURDAY,
                "startTime": "09:00"
            }),
        ),
        ModelReply::text(""),
    ]);
    let mut engine = engine(&store, llm.clone(), Arc::new(SessionAuth::new()), AgentSettings::default());

    let reply = engine.generate_response("Book 9am Saturday", false).await.unwrap();
    assert_eq!(reply, "Please sign in before booking an appointment.");

    let requests = llm.requests();
    let response = function_response(&requests[1]).unwrap();
    assert_eq!(response["content"]["error"], "unauthenticated");
}

#[tokio::test]
async fn test_unknown_function_gets_error_response() {
    let store = seeded_store().await;
    let llm = MockLlm::new(vec![
        ModelReply::call("cancel_booking", json!({"id": "x"})),
        ModelReply::text("I can't cancel bookings."),
    ]);
    let mut engine = engine(&store, llm.clone(), Arc::new(SessionAuth::new()), AgentSettings::default());

    let reply = engine.generate_response("Cancel my booking", false).await.unwrap();
    assert_eq!(reply, "I can't cancel bookings.");

    let requests = llm.requests();
    let response = function_response(&requests[1]).unwrap();
    assert_eq!(response["content"]["error"], "invalid_argument");
}

#[tokio::test]
async fn test_reset_starts_from_single_user_turn() {
    let store = seeded_store().await;
    let llm = MockLlm::new(vec![ModelReply::text("Hi there!"), ModelReply::text("Hello again!")]);
    let mut engine = engine(&store, llm.clone(), Arc::new(SessionAuth::new()), AgentSettings::default());

    engine.generate_response("Hello", false).await.unwrap();
    assert_eq!(engine.history().len(), 2);

    engine.reset_chat();
    assert!(engine.history().is_empty());

    engine.generate_response("Hello", false).await.unwrap();
    let requests = llm.requests();
    assert_eq!(requests[1].len(), 1);
    assert_eq!(requests[1][0].role, ContentRole::User);
    assert_eq!(engine.history().len(), 2);
}

#[tokio::test]
async fn test_history_is_replayed_every_turn() {
    let store = seeded_store().await;
    let llm = MockLlm::new(vec![ModelReply::text("Hi!"), ModelReply::text("Sure.")]);
    let mut engine = engine(&store, llm.clone(), Arc::new(SessionAuth::new()), AgentSettings::default());

    engine.generate_response("Hello", false).await.unwrap();
    engine.generate_response("Find me a barber", false).await.unwrap();

    let second: Vec<String> = llm.requests()[1].iter().map(Content::text).collect();
    assert_eq!(second, vec!["Hello", "Hi!", "Find me a barber"]);
}

#[tokio::test]
async fn test_audio_input_is_sent_inline() {
    let store = seeded_store().await;
    let llm = MockLlm::new(vec![ModelReply::text("Got it.")]);
    let mut engine = engine(&store, llm.clone(), Arc::new(SessionAuth::new()), AgentSettings::default());

    let mut clip = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
    clip.write_all(b"RIFF").unwrap();
    let path = clip.path().to_str().unwrap().to_string();

    engine.generate_response(&path, true).await.unwrap();

    let requests = llm.requests();
    let parts = &requests[0][0].parts;
    assert!(parts.iter().any(|p| matches!(
        p,
        Part::InlineData { mime_type, data } if mime_type == "audio/wav" && data == "UklGRg=="
    )));
    assert!(engine.history()[0].content.starts_with("[Voice message]"));
}

#[tokio::test]
async fn test_missing_audio_clip_is_an_error() {
    let store = seeded_store().await;
    let llm = MockLlm::new(vec![]);
    let mut engine = engine(&store, llm, Arc::new(SessionAuth::new()), AgentSettings::default());

    let err = engine.generate_response("/no/such/clip.m4a", true).await.unwrap_err();
    assert!(matches!(err, AgentError::Audio { .. }));
    assert!(engine.history().is_empty());
}

#[tokio::test]
async fn test_model_timeout() {
    let store = seeded_store().await;
    let settings = AgentSettings {
        model_timeout: Duration::from_millis(50),
        ..AgentSettings::default()
    };
    let mut engine = engine(&store, Arc::new(SlowLlm), Arc::new(SessionAuth::new()), settings);

    let err = engine.generate_response("Hello", false).await.unwrap_err();
    assert!(matches!(err, AgentError::Timeout(_)));
    assert_eq!(engine.state(), AgentState::Idle);
}

// ── Chat Gateway ──

#[tokio::test]
async fn test_health() {
    let state = Arc::new(AppState::new(seeded_store().await, test_config(), MockLlm::new(vec![])));
    let res = test_app(state)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_chat_message_and_history() {
    let llm = MockLlm::new(vec![ModelReply::text("Hello! How can I help?")]);
    let state = Arc::new(AppState::new(seeded_store().await, test_config(), llm));

    let res = test_app(state.clone())
        .oneshot(post_json("/api/chat/message", json!({"session_id": "s1", "message": "Hi"})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["reply"], "Hello! How can I help?");

    let res = test_app(state)
        .oneshot(Request::builder().uri("/api/chat/history/s1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["state"], "idle");
    assert_eq!(json["turns"].as_array().unwrap().len(), 2);
    assert_eq!(json["turns"][0]["role"], "user");
}

#[tokio::test]
async fn test_chat_failure_is_reported() {
    let llm = MockLlm::new(vec![ModelReply::text("")]);
    let state = Arc::new(AppState::new(seeded_store().await, test_config(), llm));

    let res = test_app(state)
        .oneshot(post_json("/api/chat/message", json!({"session_id": "s1", "message": "Hi"})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("empty response"));
}

#[tokio::test]
async fn test_chat_signs_in_per_message() {
    let store = seeded_store().await;
    let llm = MockLlm::new(vec![
        ModelReply::call(
            CREATE_BOOKING,
            json!({
                "businessName": "Test Business",
                "staffName": "Test Staff",
                "serviceName": "Test Service",
                "date": SATURDAY,
                "startTime": "12:00"
            }),
        ),
        ModelReply::text("Done, see you then."),
    ]);
    let state = Arc::new(AppState::new(Arc::clone(&store), test_config(), llm));

    let res = test_app(state)
        .oneshot(post_json(
            "/api/chat/message",
            json!({"session_id": "s1", "message": "Book noon", "user_id": "user-9", "user_email": "nine@example.com"}),
        ))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["success"], true);

    let stored = queries::get_user_bookings(store.as_ref(), "user-9").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].user_email.as_deref(), Some("nine@example.com"));
}

#[tokio::test]
async fn test_chat_busy_session_is_rate_limited() {
    let state = Arc::new(AppState::new(seeded_store().await, test_config(), MockLlm::new(vec![])));
    let session = state.session("s1");
    let _turn = session.engine.lock().await;

    let res = test_app(state)
        .oneshot(post_json("/api/chat/message", json!({"session_id": "s1", "message": "Hi"})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_busy_session_keeps_its_identity() {
    let state = Arc::new(AppState::new(seeded_store().await, test_config(), MockLlm::new(vec![])));
    let session = state.session("s1");
    session.auth.sign_in(UserIdentity {
        user_id: "alice".to_string(),
        email: None,
    });
    let turn = session.engine.lock().await;

    let res = test_app(state.clone())
        .oneshot(post_json(
            "/api/chat/message",
            json!({"session_id": "s1", "message": "Book it", "user_id": "mallory"}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(session.auth.current_user().unwrap().user_id, "alice");

    // Once the turn is over, the next message's identity applies
    drop(turn);
    let res = test_app(state)
        .oneshot(post_json(
            "/api/chat/message",
            json!({"session_id": "s1", "message": "Hi", "user_id": "bob"}),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(session.auth.current_user().unwrap().user_id, "bob");
}

#[tokio::test]
async fn test_idle_sessions_expire() {
    let mut config = test_config();
    config.session_ttl_secs = 0;
    let state = Arc::new(AppState::new(seeded_store().await, config, MockLlm::new(vec![])));

    let busy = state.session("busy");
    let _turn = busy.engine.lock().await;
    state.session("idle");
    assert_eq!(state.session_count(), 2);

    state.session("fresh");
    assert!(state.existing_session("idle").is_none());
    assert!(state.existing_session("busy").is_some());
    assert!(state.existing_session("fresh").is_some());
    assert_eq!(state.session_count(), 2);
}

#[tokio::test]
async fn test_sessions_survive_within_ttl() {
    let state = Arc::new(AppState::new(seeded_store().await, test_config(), MockLlm::new(vec![])));
    state.session("a");
    state.session("b");
    assert!(state.existing_session("a").is_some());
    assert_eq!(state.session_count(), 2);
}

#[tokio::test]
async fn test_chat_reset() {
    let llm = MockLlm::new(vec![ModelReply::text("Hi!")]);
    let state = Arc::new(AppState::new(seeded_store().await, test_config(), llm));

    let res = test_app(state.clone())
        .oneshot(post_json("/api/chat/reset", json!({"session_id": "nobody"})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    test_app(state.clone())
        .oneshot(post_json("/api/chat/message", json!({"session_id": "s1", "message": "Hi"})))
        .await
        .unwrap();

    let res = test_app(state.clone())
        .oneshot(post_json("/api/chat/reset", json!({"session_id": "s1"})))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let session = state.existing_session("s1").unwrap();
    assert!(session.engine.lock().await.history().is_empty());
}

#[tokio::test]
async fn test_directory_endpoint() {
    let state = Arc::new(AppState::new(seeded_store().await, test_config(), MockLlm::new(vec![])));

    let res = test_app(state)
        .oneshot(Request::builder().uri("/api/directory").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json[0]["name"], "Test Business");
    assert_eq!(json[0]["openingHours"]["Saturday"], "09:00 AM - 06:00 PM");
    assert_eq!(json[0]["services"][0]["serviceStaffMembers"][0], "Test Staff");
}
