//! In-memory fakes of the ports, shared by the core unit tests.

use crate::domain::model::Event;
use crate::domain::ports::{
    ActuatorResult, ChallengeSolver, Clock, Condition, ElementHandle, Notifier, RemoteActuator,
    RemoteQuery, RemoteResponse,
};
use crate::utils::error::{ActuatorError, ChallengeError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type QueryHandler = Box<dyn Fn(&RemoteQuery) -> ActuatorResult<RemoteResponse> + Send + Sync>;
type WaitHandler = Box<dyn Fn(&Condition) -> ActuatorResult<ElementHandle> + Send + Sync>;

pub struct FakeActuator {
    calls: Mutex<Vec<String>>,
    query: QueryHandler,
    wait: WaitHandler,
    artifact: Option<Vec<u8>>,
}

impl FakeActuator {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            query: Box::new(|_| Ok(RemoteResponse::body(r#"{"rows":[]}"#))),
            wait: Box::new(|condition| Ok(ElementHandle(condition.locator().to_string()))),
            artifact: None,
        }
    }

    pub fn on_query<F>(mut self, handler: F) -> Self
    where
        F: Fn(&RemoteQuery) -> ActuatorResult<RemoteResponse> + Send + Sync + 'static,
    {
        self.query = Box::new(handler);
        self
    }

    pub fn on_wait<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Condition) -> ActuatorResult<ElementHandle> + Send + Sync + 'static,
    {
        self.wait = Box::new(handler);
        self
    }

    pub fn with_artifact(mut self, bytes: Vec<u8>) -> Self {
        self.artifact = Some(bytes);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|call| call.starts_with(prefix)).count()
    }

    pub fn count_exact(&self, call: &str) -> usize {
        self.calls().iter().filter(|recorded| recorded.as_str() == call).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RemoteActuator for FakeActuator {
    async fn navigate(&self, url: &str) -> ActuatorResult<()> {
        self.record(format!("navigate:{url}"));
        Ok(())
    }

    async fn current_url(&self) -> ActuatorResult<String> {
        Ok("https://eq.hsc.gov.ua/".to_string())
    }

    async fn execute_remote_query(&self, query: &RemoteQuery) -> ActuatorResult<RemoteResponse> {
        let key = query
            .get("date_of_admission")
            .or_else(|| query.get("id_chtime"))
            .unwrap_or_default();
        self.record(format!("query:{}:{key}", query.url));
        (self.query)(query)
    }

    async fn wait_until(&self, condition: &Condition, _timeout: Option<std::time::Duration>) -> ActuatorResult<ElementHandle> {
        self.record(format!("wait:{condition}"));
        (self.wait)(condition)
    }

    async fn wait_for_url(&self, url: &str, _timeout: std::time::Duration) -> ActuatorResult<()> {
        self.record(format!("wait_url:{url}"));
        Ok(())
    }

    async fn click(&self, element: &ElementHandle) -> ActuatorResult<()> {
        self.record(format!("click:{}", element.0));
        Ok(())
    }

    async fn send_keys(&self, element: &ElementHandle, text: &str) -> ActuatorResult<()> {
        self.record(format!("keys:{}:{text}", element.0));
        Ok(())
    }

    async fn attribute(&self, element: &ElementHandle, name: &str) -> ActuatorResult<Option<String>> {
        self.record(format!("attr:{}:{name}", element.0));
        Ok(match name {
            "title" => Some("https://id.bank.example/approve/42".to_string()),
            "href" => Some("/site/mpdf?id=7".to_string()),
            _ => None,
        })
    }

    async fn fetch_bytes(&self, url: &str) -> ActuatorResult<Vec<u8>> {
        self.record(format!("fetch:{url}"));
        self.artifact.clone().ok_or_else(|| ActuatorError::Script {
            message: "download failed".to_string(),
        })
    }

    async fn refresh_session(&self) -> ActuatorResult<()> {
        self.record("refresh".to_string());
        Ok(())
    }

    async fn clear_cookies(&self) -> ActuatorResult<()> {
        self.record("clear_cookies".to_string());
        Ok(())
    }
}

type PresenceHandler = Box<dyn Fn(usize) -> Result<bool, ChallengeError> + Send + Sync>;

pub struct FakeSolver {
    probes: AtomicUsize,
    solves: AtomicUsize,
    presence: PresenceHandler,
}

impl FakeSolver {
    pub fn absent() -> Self {
        Self::with_presence(|_| Ok(false))
    }

    /// `presence` 以第幾次探測 (0 起算) 決定是否出現驗證碼
    pub fn with_presence<F>(presence: F) -> Self
    where
        F: Fn(usize) -> Result<bool, ChallengeError> + Send + Sync + 'static,
    {
        Self {
            probes: AtomicUsize::new(0),
            solves: AtomicUsize::new(0),
            presence: Box::new(presence),
        }
    }

    pub fn solves(&self) -> usize {
        self.solves.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChallengeSolver for FakeSolver {
    async fn is_challenge_present(&self) -> Result<bool, ChallengeError> {
        let probe = self.probes.fetch_add(1, Ordering::SeqCst);
        (self.presence)(probe)
    }

    async fn solve(&self) -> Result<(), ChallengeError> {
        self.solves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Event>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(Event::kind).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn emit(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 7, 8, 0, 0).unwrap()
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn not_found(target: &str) -> ActuatorError {
    ActuatorError::ElementNotFound {
        target: target.to_string(),
    }
}
