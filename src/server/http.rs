use super::database::{AttributeDatabase, AID};
use super::{load_registration, AccessoryServer, Registration};
use crate::error::{Error, ErrorType};
use crate::hap::accessory::Accessory;
use crate::hap::properties::{Permission, Value};
use crate::store::Store;
use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{stream::BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpListener;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Setup code shown to the operator, `XXX-XX-XXX`.
    pub setup_code: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 51826)),
            setup_code: "001-02-003".to_string(),
        }
    }
}

/// Per-characteristic status codes of the attribute protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HapStatus {
    Success = 0,
    ServiceCommunicationFailure = -70402,
    ReadOnly = -70404,
    WriteOnly = -70405,
    NotificationUnsupported = -70406,
    NotFound = -70409,
    InvalidValue = -70410,
}

impl Serialize for HapStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(*self as i32)
    }
}

impl HapStatus {
    fn from_write_error(error: &Error) -> HapStatus {
        match error.error_type() {
            ErrorType::PermissionDenied => HapStatus::ReadOnly,
            ErrorType::FormatMismatch | ErrorType::UnsupportedValue => HapStatus::InvalidValue,
            _ => HapStatus::ServiceCommunicationFailure,
        }
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    db: Arc<AttributeDatabase>,
    // Instance ids with events enabled by a controller.
    subscriptions: Arc<Mutex<HashSet<u64>>>,
    token: CancellationToken,
}

impl AppState {
    pub(crate) fn new(db: AttributeDatabase, token: CancellationToken) -> Self {
        AppState {
            db: Arc::new(db),
            subscriptions: Arc::new(Mutex::new(HashSet::new())),
            token,
        }
    }

    fn is_subscribed(&self, iid: u64) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&iid)
    }

    fn set_subscribed(&self, iid: u64, subscribed: bool) {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if subscribed {
            subscriptions.insert(iid);
        } else {
            subscriptions.remove(&iid);
        }
    }
}

/// Serves the registered accessory over HTTP/1.1.
pub struct HttpServer {
    listener: TcpListener,
    db: AttributeDatabase,
    registration: Registration,
}

impl HttpServer {
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registration(&self) -> &Registration {
        &self.registration
    }
}

#[async_trait]
impl AccessoryServer for HttpServer {
    type Config = ServerConfig;

    async fn register(
        store: Arc<dyn Store>,
        accessory: Accessory,
        config: ServerConfig,
    ) -> Result<Self, Error> {
        let db = AttributeDatabase::new(accessory);
        let registration = load_registration(store.as_ref(), &db).await?;
        let listener = TcpListener::bind(config.bind_addr).await.map_err(|err| {
            Error::from_string(
                format!("cannot listen on {}: {err}", config.bind_addr),
                ErrorType::Server,
            )
        })?;
        log::info!(
            "Registered accessory {:?} as {} (configuration {})",
            db.accessory().info().name,
            registration.device_id,
            registration.configuration_number
        );
        log::info!("Setup code: {}", config.setup_code);
        Ok(HttpServer {
            listener,
            db,
            registration,
        })
    }

    async fn serve(self, token: CancellationToken) -> Result<(), Error> {
        let addr = self.local_addr()?;
        let app = router(AppState::new(self.db, token.clone()));
        log::info!("Accessory server listening on {addr}");

        axum::serve(self.listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
            .map_err(|err| Error::from_string(err.to_string(), ErrorType::Server))?;

        log::info!("Accessory server stopped");
        Ok(())
    }
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/accessories", get(accessories))
        .route("/characteristics", get(read_characteristics).put(write_characteristics))
        .route("/events", get(events))
        .route("/identify", post(identify))
        .with_state(state)
}

#[derive(Debug, Serialize, Default)]
struct CharacteristicItem {
    aid: u64,
    iid: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<HapStatus>,
}

#[derive(Debug, Serialize)]
struct CharacteristicsBody {
    characteristics: Vec<CharacteristicItem>,
}

#[derive(Debug, Deserialize)]
struct WriteItem {
    aid: u64,
    iid: u64,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    ev: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct WriteBody {
    characteristics: Vec<WriteItem>,
}

async fn accessories(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.db.to_json(true))
}

fn parse_ids(ids: &str) -> Option<Vec<(u64, u64)>> {
    ids.split(',')
        .map(|id| {
            let (aid, iid) = id.trim().split_once('.')?;
            Some((aid.parse::<u64>().ok()?, iid.parse::<u64>().ok()?))
        })
        .collect()
}

async fn read_characteristics(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(ids) = params.get("id").and_then(|ids| parse_ids(ids)) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let mut failed = false;
    let mut items: Vec<CharacteristicItem> = ids
        .into_iter()
        .map(|(aid, iid)| {
            let read = match state.db.characteristic(aid, iid) {
                None => Err(HapStatus::NotFound),
                Some(c) => c.remote_read().map_err(|_| HapStatus::WriteOnly),
            };
            match read {
                Ok(value) => CharacteristicItem {
                    aid,
                    iid,
                    value: Some(value),
                    status: None,
                },
                Err(status) => {
                    failed = true;
                    CharacteristicItem {
                        aid,
                        iid,
                        status: Some(status),
                        ..Default::default()
                    }
                }
            }
        })
        .collect();

    if !failed {
        return Json(CharacteristicsBody { characteristics: items }).into_response();
    }
    for item in &mut items {
        item.status.get_or_insert(HapStatus::Success);
    }
    (
        StatusCode::MULTI_STATUS,
        Json(CharacteristicsBody { characteristics: items }),
    )
        .into_response()
}

fn apply_write(state: &AppState, item: &WriteItem) -> HapStatus {
    let Some(c) = state.db.characteristic(item.aid, item.iid) else {
        return HapStatus::NotFound;
    };
    if let Some(ev) = item.ev {
        if !c.has_permission(Permission::Notify) {
            return HapStatus::NotificationUnsupported;
        }
        state.set_subscribed(item.iid, ev);
        log::debug!("Events for {}.{} set to {ev}", item.aid, item.iid);
    }
    if let Some(value) = &item.value {
        if let Err(err) = c.remote_write_json(value) {
            log::debug!("Write to {}.{} rejected: {err}", item.aid, item.iid);
            return HapStatus::from_write_error(&err);
        }
    }
    HapStatus::Success
}

async fn write_characteristics(
    State(state): State<AppState>,
    Json(body): Json<WriteBody>,
) -> Response {
    let items: Vec<CharacteristicItem> = body
        .characteristics
        .iter()
        .map(|item| CharacteristicItem {
            aid: item.aid,
            iid: item.iid,
            status: Some(apply_write(&state, item)),
            ..Default::default()
        })
        .collect();

    if items.iter().all(|i| i.status == Some(HapStatus::Success)) {
        return StatusCode::NO_CONTENT.into_response();
    }
    (
        StatusCode::MULTI_STATUS,
        Json(CharacteristicsBody { characteristics: items }),
    )
        .into_response()
}

async fn identify(State(state): State<AppState>) -> StatusCode {
    match state.db.accessory().identify().remote_write(Value::Bool(true)) {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(err) => {
            log::error!("Identify failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Streams value changes of subscribed characteristics until shutdown.
async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let streams: Vec<BoxStream<'static, Result<Event, Infallible>>> = state
        .db
        .entries()
        .iter()
        .filter(|e| e.characteristic.has_permission(Permission::Notify))
        .map(|e| {
            let iid = e.iid;
            let state = state.clone();
            BroadcastStream::new(e.characteristic.subscribe())
                .filter_map(move |change| {
                    let state = state.clone();
                    async move {
                        // Lagged receivers skip ahead.
                        let change = change.ok()?;
                        if !state.is_subscribed(iid) {
                            return None;
                        }
                        let body = CharacteristicsBody {
                            characteristics: vec![CharacteristicItem {
                                aid: AID,
                                iid,
                                value: Some(change.value),
                                status: None,
                            }],
                        };
                        let data = serde_json::to_string(&body).ok()?;
                        Some(Ok(Event::default().event("characteristic").data(data)))
                    }
                })
                .boxed()
        })
        .collect();

    let stream =
        futures::stream::select_all(streams).take_until(state.token.clone().cancelled_owned());
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hap::accessory::AccessoryInfo;
    use crate::hap::emulator_event::EmulatorEvent;
    use crate::services::{ConfigService, SwitchService};
    use crate::store::MemStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    struct Fixture {
        app: Router,
        state: AppState,
        events: mpsc::UnboundedReceiver<EmulatorEvent>,
    }

    fn fixture() -> Fixture {
        let (tx, events) = mpsc::unbounded_channel();
        let mut accessory = Accessory::new(AccessoryInfo::default()).unwrap();
        accessory.add_service(SwitchService::new().unwrap());
        accessory.add_service(ConfigService::new(tx).unwrap());
        let state = AppState::new(AttributeDatabase::new(accessory), CancellationToken::new());
        Fixture {
            app: router(state.clone()),
            state,
            events,
        }
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let body = match body {
            Some(json) => Body::from(json.to_string()),
            None => Body::empty(),
        };
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn lists_the_attribute_database() {
        let f = fixture();
        let (status, body) = send(&f.app, Method::GET, "/accessories", None).await;
        assert_eq!(status, StatusCode::OK);
        let services = body["accessories"][0]["services"].as_array().unwrap();
        assert_eq!(services.len(), 3);
        assert_eq!(services[2]["hidden"], json!(true));
    }

    #[tokio::test]
    async fn remote_write_reaches_the_handler() {
        let mut f = fixture();
        let write = json!({"characteristics": [{"aid": 1, "iid": 11, "value": "ABC123"}]});
        let (status, _) = send(&f.app, Method::PUT, "/characteristics", Some(write)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(
            f.events.try_recv().unwrap(),
            EmulatorEvent::ConfigIdentifierUpdate {
                identifier: "ABC123".to_string()
            }
        );

        let (status, body) =
            send(&f.app, Method::GET, "/characteristics?id=1.11,1.9", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"characteristics": [
                {"aid": 1, "iid": 11, "value": "ABC123"},
                {"aid": 1, "iid": 9, "value": false}
            ]})
        );
    }

    #[tokio::test]
    async fn failed_reads_report_per_item_status() {
        let f = fixture();
        let (status, body) =
            send(&f.app, Method::GET, "/characteristics?id=1.9,1.2,1.99", None).await;
        assert_eq!(status, StatusCode::MULTI_STATUS);
        assert_eq!(
            body,
            json!({"characteristics": [
                {"aid": 1, "iid": 9, "value": false, "status": 0},
                {"aid": 1, "iid": 2, "status": -70405},
                {"aid": 1, "iid": 99, "status": -70409}
            ]})
        );

        let (status, _) = send(&f.app, Method::GET, "/characteristics?id=nine", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rejected_writes_leave_values_untouched() {
        let f = fixture();
        let write = json!({"characteristics": [
            {"aid": 1, "iid": 5, "value": "Other"},
            {"aid": 1, "iid": 9, "value": "yes"},
            {"aid": 1, "iid": 11, "ev": true},
            {"aid": 1, "iid": 9, "value": 1}
        ]});
        let (status, body) = send(&f.app, Method::PUT, "/characteristics", Some(write)).await;
        assert_eq!(status, StatusCode::MULTI_STATUS);
        let statuses: Vec<_> = body["characteristics"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["status"].as_i64().unwrap())
            .collect();
        assert_eq!(statuses, vec![-70404, -70410, -70406, 0]);
        let on = f.state.db.characteristic(AID, 9).unwrap();
        assert_eq!(on.value(), Value::Bool(true));
    }

    #[tokio::test]
    async fn identify_is_reported() {
        let f = fixture();
        let (tx, mut rx) = mpsc::unbounded_channel();
        f.state
            .db
            .accessory()
            .identify()
            .on_bool_update(move |_| {
                let _ = tx.send(EmulatorEvent::Identify);
            })
            .unwrap();
        let (status, _) = send(&f.app, Method::POST, "/identify", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(rx.try_recv().unwrap(), EmulatorEvent::Identify);
    }

    #[tokio::test]
    async fn subscriptions_follow_ev_flag() {
        let f = fixture();
        let subscribe = json!({"characteristics": [{"aid": 1, "iid": 9, "ev": true}]});
        let (status, _) = send(&f.app, Method::PUT, "/characteristics", Some(subscribe)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(f.state.is_subscribed(9));

        let unsubscribe = json!({"characteristics": [{"aid": 1, "iid": 9, "ev": false}]});
        send(&f.app, Method::PUT, "/characteristics", Some(unsubscribe)).await;
        assert!(!f.state.is_subscribed(9));
    }

    async fn next_frame<S>(body: &mut S, wait: Duration) -> Option<Option<String>>
    where
        S: Stream<Item = Result<axum::body::Bytes, axum::Error>> + Unpin,
    {
        let frame = tokio::time::timeout(wait, body.next()).await.ok()?;
        Some(frame.map(|bytes| String::from_utf8(bytes.unwrap().to_vec()).unwrap()))
    }

    #[tokio::test]
    async fn events_stream_subscribed_changes_until_shutdown() {
        let f = fixture();
        let request = Request::builder().uri("/events").body(Body::empty()).unwrap();
        let response = f.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let mut body = response.into_body().into_data_stream();
        let on = f.state.db.characteristic(AID, 9).unwrap();

        // Not subscribed yet: the change is filtered out.
        on.set_value(true).unwrap();
        assert_eq!(next_frame(&mut body, Duration::from_millis(100)).await, None);

        let subscribe = json!({"characteristics": [{"aid": 1, "iid": 9, "ev": true}]});
        send(&f.app, Method::PUT, "/characteristics", Some(subscribe)).await;
        on.set_value(true).unwrap();
        let frame = next_frame(&mut body, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert!(frame.starts_with("event: characteristic\n"), "{frame:?}");
        assert!(
            frame.contains(r#"data: {"characteristics":[{"aid":1,"iid":9,"value":true}]}"#),
            "{frame:?}"
        );

        f.state.token.cancel();
        assert_eq!(next_frame(&mut body, Duration::from_secs(5)).await, Some(None));
    }

    #[tokio::test]
    async fn register_persists_and_binds() {
        let store: Arc<dyn Store> = Arc::new(MemStore::new());
        let accessory = Accessory::new(AccessoryInfo::default()).unwrap();
        let config = ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        };
        let server = HttpServer::register(store.clone(), accessory, config).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.registration().configuration_number, 1);
        assert!(store.get(super::super::DEVICE_ID_KEY).await.unwrap().is_some());

        let token = CancellationToken::new();
        token.cancel();
        server.serve(token).await.unwrap();
    }
}
