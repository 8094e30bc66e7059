use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use common::{SmsConfig, SmsIntent, SmsStatus};
use gateway::{Balance, FailureClassifier, GatewayConfig, GatewayError, SendReceipt, SmsGateway};
use reqwest::Client;
use reqwest::header::HeaderMap;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    QueryFilter, Set,
};
use serde_json::Value;
use uuid::Uuid;

use server::config::{AppConfig, AuthConfig, CorsConfig, DatabaseConfig, ServerConfig};
use server::entity::{food_parcel, household, outgoing_sms, pickup_location};
use server::sms::QueueProcessor;
use server::state::AppState;

pub const JWT_SECRET: &str = "test-secret-for-integration-tests";
pub const CRON_SECRET: &str = "test-cron-secret";
pub const CALLBACK_SECRET: &str = "test-callback-secret";
pub const PHONE: &str = "+46701234567";

pub mod routes {
    use uuid::Uuid;

    pub const BALANCE: &str = "/api/v1/sms/balance";
    pub const BALANCE_REQUEUE: &str = "/api/v1/sms/balance/requeue";
    pub const FAILURES: &str = "/api/v1/sms/failures";
    pub const FAILURE_STATS: &str = "/api/v1/sms/failures/stats";
    pub const JOB_ENQUEUE: &str = "/api/v1/sms/jobs/enqueue";
    pub const JOB_PROCESS: &str = "/api/v1/sms/jobs/process";
    pub const STATUS_CALLBACK: &str = "/api/v1/sms/callbacks/status";

    pub fn retry(id: Uuid) -> String {
        format!("/api/v1/sms/messages/{id}/retry")
    }

    pub fn dismiss(id: Uuid) -> String {
        format!("/api/v1/sms/messages/{id}/dismiss")
    }

    pub fn enrolment(household_id: Uuid) -> String {
        format!("/api/v1/sms/households/{household_id}/enrolment")
    }
}

/// Scripted SMS provider that records every call.
///
/// Sends succeed unless a result was queued with [`MockGateway::push_send`].
pub struct MockGateway {
    send_results: Mutex<VecDeque<Result<SendReceipt, GatewayError>>>,
    send_delay: Mutex<Option<std::time::Duration>>,
    balance: Mutex<Result<i64, String>>,
    sent: Mutex<Vec<(String, String)>>,
    send_calls: AtomicUsize,
    balance_calls: AtomicUsize,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self {
            send_results: Mutex::new(VecDeque::new()),
            send_delay: Mutex::new(None),
            balance: Mutex::new(Ok(1000)),
            sent: Mutex::new(Vec::new()),
            send_calls: AtomicUsize::new(0),
            balance_calls: AtomicUsize::new(0),
        }
    }
}

impl MockGateway {
    pub fn push_send(&self, result: Result<SendReceipt, GatewayError>) {
        self.send_results.lock().unwrap().push_back(result);
    }

    /// Queue a provider rejection with the given HTTP status.
    pub fn reject_next(&self, status: u16, message: &str) {
        self.push_send(Err(GatewayError::Rejected {
            status,
            message: message.to_string(),
        }));
    }

    /// Make every send hang for `delay` before answering.
    pub fn delay_sends(&self, delay: std::time::Duration) {
        *self.send_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_credits(&self, credits: i64) {
        *self.balance.lock().unwrap() = Ok(credits);
    }

    pub fn fail_balance_check(&self, message: &str) {
        *self.balance.lock().unwrap() = Err(message.to_string());
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.load(Ordering::SeqCst)
    }

    /// Texts handed to the provider, in order.
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl SmsGateway for MockGateway {
    async fn send(&self, to: &str, text: &str) -> Result<SendReceipt, GatewayError> {
        let n = self.send_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.send_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.send_results.lock().unwrap().pop_front();
        let result = scripted.unwrap_or_else(|| {
            Ok(SendReceipt {
                provider_message_id: format!("mock-{n}"),
            })
        });
        if result.is_ok() {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), text.to_string()));
        }
        result
    }

    async fn check_balance(&self) -> Result<Balance, GatewayError> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        match &*self.balance.lock().unwrap() {
            Ok(credits) => Ok(Balance { credits: *credits }),
            Err(message) => Err(GatewayError::Network(message.clone())),
        }
    }
}

/// Current time at whole-second precision, so stored timestamps compare cleanly.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Fresh in-memory database with the full schema.
pub async fn test_db() -> DatabaseConnection {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    // One connection, or every pooled connection would get its own empty database.
    opts.max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(opts)
        .await
        .expect("Failed to open in-memory database");

    server::database::create_schema(&db)
        .await
        .expect("Failed to create schema");
    server::seed::ensure_indexes(&db)
        .await
        .expect("Failed to create indexes");

    db
}

pub fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors: CorsConfig {
                allow_origins: vec![],
                max_age: 3600,
            },
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
        },
        auth: AuthConfig {
            jwt_secret: JWT_SECRET.to_string(),
            cron_secret: CRON_SECRET.to_string(),
            callback_secret: CALLBACK_SECRET.to_string(),
        },
        sms: SmsConfig::default(),
        gateway: GatewayConfig::default(),
    }
}

pub fn processor(gateway: &Arc<MockGateway>) -> QueueProcessor {
    QueueProcessor::new(
        gateway.clone(),
        FailureClassifier::default(),
        &SmsConfig::default(),
    )
}

/// A running test server.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub db: DatabaseConnection,
    pub gateway: Arc<MockGateway>,
}

/// Parsed HTTP response for test assertions.
pub struct TestResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Raw response body as text.
    pub text: String,
    /// Parsed JSON body, or `Null` if the response is not valid JSON.
    pub body: Value,
}

impl TestResponse {
    async fn from_response(res: reqwest::Response) -> Self {
        let status = res.status().as_u16();
        let headers = res.headers().clone();
        let text = res.text().await.expect("Failed to read response body");
        let body = serde_json::from_str(&text).unwrap_or(Value::Null);
        Self {
            status,
            headers,
            text,
            body,
        }
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        let db = test_db().await;
        let gateway = Arc::new(MockGateway::default());

        let state = AppState {
            db: db.clone(),
            config: test_config(),
            gateway: gateway.clone(),
            classifier: FailureClassifier::default(),
        };

        let app = server::build_router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            client: Client::new(),
            db,
            gateway,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Token for an administrator holding the given permissions.
    pub fn token(&self, permissions: &[&str]) -> String {
        server::utils::jwt::sign(JWT_SECRET, 1, "admin", "admin", permissions)
            .expect("Failed to sign token")
    }

    pub fn admin_token(&self) -> String {
        self.token(&["sms:manage"])
    }

    pub async fn get_with_token(&self, path: &str, token: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn get_without_token(&self, path: &str) -> TestResponse {
        let res = self
            .client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET request");

        TestResponse::from_response(res).await
    }

    pub async fn post_with_token(&self, path: &str, body: &Value, token: &str) -> TestResponse {
        let res = self
            .client
            .post(self.url(path))
            .header("Authorization", format!("Bearer {token}"))
            .json(body)
            .send()
            .await
            .expect("Failed to send POST request");

        TestResponse::from_response(res).await
    }

    /// POST authenticated by a shared-secret header (cron jobs, provider callbacks).
    pub async fn post_with_secret(
        &self,
        path: &str,
        body: &Value,
        header: &str,
        secret: Option<&str>,
    ) -> TestResponse {
        let mut req = self.client.post(self.url(path)).json(body);
        if let Some(secret) = secret {
            req = req.header(header, secret);
        }
        let res = req.send().await.expect("Failed to send POST request");

        TestResponse::from_response(res).await
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub async fn create_location(db: &DatabaseConnection, name: &str) -> pickup_location::Model {
    pickup_location::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        street_address: Set("Storgatan 1".to_string()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to create pickup location")
}

pub async fn create_household(db: &DatabaseConnection, first_name: &str) -> household::Model {
    household::ActiveModel {
        id: Set(Uuid::new_v4()),
        first_name: Set(first_name.to_string()),
        phone_number: Set(PHONE.to_string()),
        locale: Set("sv".to_string()),
        anonymized_at: Set(None),
        created_at: Set(Utc::now() - Duration::days(30)),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to create household")
}

pub async fn anonymize(db: &DatabaseConnection, household: &household::Model) {
    let mut am: household::ActiveModel = household.clone().into();
    am.anonymized_at = Set(Some(Utc::now()));
    am.first_name = Set("Anonymized".to_string());
    am.update(db).await.expect("Failed to anonymize household");
}

/// A one-hour pickup window starting at `earliest`.
pub async fn create_parcel(
    db: &DatabaseConnection,
    household: &household::Model,
    location: &pickup_location::Model,
    earliest: DateTime<Utc>,
) -> food_parcel::Model {
    food_parcel::ActiveModel {
        id: Set(Uuid::new_v4()),
        household_id: Set(household.id),
        pickup_location_id: Set(location.id),
        pickup_date_time_earliest: Set(earliest),
        pickup_date_time_latest: Set(earliest + Duration::hours(1)),
        is_picked_up: Set(false),
        picked_up_at: Set(None),
        no_show_at: Set(None),
        deleted_at: Set(None),
        created_at: Set(earliest - Duration::days(7)),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to create parcel")
}

/// A parcel that was collected at `picked_up_at`, with its window just before.
pub async fn create_picked_up_parcel(
    db: &DatabaseConnection,
    household: &household::Model,
    location: &pickup_location::Model,
    picked_up_at: DateTime<Utc>,
) -> food_parcel::Model {
    let parcel = create_parcel(db, household, location, picked_up_at - Duration::minutes(30)).await;
    let mut am: food_parcel::ActiveModel = parcel.into();
    am.is_picked_up = Set(true);
    am.picked_up_at = Set(Some(picked_up_at));
    am.update(db).await.expect("Failed to mark parcel picked up")
}

pub async fn reschedule(
    db: &DatabaseConnection,
    parcel: &food_parcel::Model,
    earliest: DateTime<Utc>,
) -> food_parcel::Model {
    let mut am: food_parcel::ActiveModel = parcel.clone().into();
    am.pickup_date_time_earliest = Set(earliest);
    am.pickup_date_time_latest = Set(earliest + Duration::hours(1));
    am.update(db).await.expect("Failed to reschedule parcel")
}

pub async fn soft_delete(db: &DatabaseConnection, parcel: &food_parcel::Model) {
    let mut am: food_parcel::ActiveModel = parcel.clone().into();
    am.deleted_at = Set(Some(Utc::now()));
    am.update(db).await.expect("Failed to delete parcel");
}

/// Insert a message directly in the given state, bypassing the pipeline.
pub async fn insert_message(
    db: &DatabaseConnection,
    household: &household::Model,
    parcel: Option<&food_parcel::Model>,
    intent: SmsIntent,
    status: SmsStatus,
    created_at: DateTime<Utc>,
) -> outgoing_sms::Model {
    let failed = status == SmsStatus::Failed;
    let sent = status == SmsStatus::Sent;
    let pending = matches!(status, SmsStatus::Queued | SmsStatus::Retrying);
    let attempted = !matches!(status, SmsStatus::Queued | SmsStatus::Cancelled);

    outgoing_sms::ActiveModel {
        id: Set(Uuid::now_v7()),
        household_id: Set(household.id),
        parcel_id: Set(parcel.map(|p| p.id)),
        intent: Set(intent),
        status: Set(status),
        to_phone: Set(household.phone_number.clone()),
        text: Set(format!("Hej {}!", household.first_name)),
        idempotency_key: Set(format!("fixture|{}", Uuid::new_v4())),
        attempt_count: Set(i32::from(attempted)),
        next_attempt_at: Set(pending.then_some(created_at)),
        last_attempt_at: Set(attempted.then_some(created_at)),
        last_error_message: Set(failed.then(|| {
            format!("Provider rejected request (HTTP 400): invalid recipient {PHONE}")
        })),
        balance_failure: Set(false),
        provider_message_id: Set(sent.then(|| format!("provider-{}", Uuid::new_v4()))),
        provider_status: Set(None),
        provider_status_updated_at: Set(None),
        sent_at: Set(sent.then_some(created_at)),
        dismissed_at: Set(None),
        dismissed_by_user_id: Set(None),
        parcel_pickup_at: Set(parcel.map(|p| p.pickup_date_time_earliest)),
        parcel_location_id: Set(parcel.map(|p| p.pickup_location_id)),
        created_at: Set(created_at),
    }
    .insert(db)
    .await
    .expect("Failed to insert message")
}

/// A failed message flagged as a balance failure.
pub async fn insert_balance_failure(
    db: &DatabaseConnection,
    household: &household::Model,
    created_at: DateTime<Utc>,
) -> outgoing_sms::Model {
    let message = insert_message(
        db,
        household,
        None,
        SmsIntent::FoodParcelsEnded,
        SmsStatus::Failed,
        created_at,
    )
    .await;
    let mut am: outgoing_sms::ActiveModel = message.into();
    am.balance_failure = Set(true);
    am.last_error_message = Set(Some(
        "Provider rejected request (HTTP 402): Payment Required".to_string(),
    ));
    am.update(db).await.expect("Failed to flag balance failure")
}

pub async fn get_message(db: &DatabaseConnection, id: Uuid) -> outgoing_sms::Model {
    outgoing_sms::Entity::find_by_id(id)
        .one(db)
        .await
        .expect("Failed to query message")
        .expect("Message not found")
}

pub async fn messages_for_parcel(
    db: &DatabaseConnection,
    parcel_id: Uuid,
    intent: SmsIntent,
) -> Vec<outgoing_sms::Model> {
    outgoing_sms::Entity::find()
        .filter(outgoing_sms::Column::ParcelId.eq(parcel_id))
        .filter(outgoing_sms::Column::Intent.eq(intent))
        .all(db)
        .await
        .expect("Failed to query messages")
}

pub async fn messages_for_household(
    db: &DatabaseConnection,
    household_id: Uuid,
    intent: SmsIntent,
) -> Vec<outgoing_sms::Model> {
    outgoing_sms::Entity::find()
        .filter(outgoing_sms::Column::HouseholdId.eq(household_id))
        .filter(outgoing_sms::Column::Intent.eq(intent))
        .all(db)
        .await
        .expect("Failed to query messages")
}
