//! Per-application facade: configuration manager, beacon queue, drainer
//!
//! One [`App`] owns all mutable state for one API key: the merged
//! configuration document, the definition tables, the beacon queue, the
//! page group / A/B bucket / dimension context, the session, and the open
//! timer table. Handles are cheap clones sharing the same state.
//!
//! Lifecycle: creating an app immediately schedules the first
//! configuration fetch. Until a fetch parses successfully the app is not
//! initialized and every measurement is buffered. A successful parse
//! rebuilds the definition tables, flips readiness, arms one
//! self-rescheduling refresh timer, and kicks the queue drainer. The
//! drainer pops events FIFO, one at a time, resolves each against the
//! definition tables and hands the result to [`App::send_beacon`];
//! events whose names have no definition are dropped with a warning.
//!
//! Nothing is ever sent synchronously inline with the triggering call:
//! drains always run on a freshly spawned task.

use crate::registry::AppOptions;
use crate::signer::sign_config_request;
use crate::transport::Transport;
use pulse_core::{
    resolve_event, BeaconParams, BoomerangSession, ConfigDocument, DefinitionTables, EventKind,
    QueuedEvent, SessionState,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Events an app exposes to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeaconEvent {
    /// Fired with the mutable parameter map before serialization;
    /// subscribers may add or modify fields in place.
    BeforeBeacon,
    /// Fired once per beacon actually sent, after construction and
    /// around the network hand-off. Never fired for dropped events.
    Beacon,
}

/// Intervals governing the app's timers.
///
/// Production values follow the collection service contract; tests
/// shrink them so nothing sleeps for real minutes.
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// How long after a successful parse the configuration is re-fetched.
    pub config_refresh: Duration,
    /// How long the drainer waits before re-checking readiness.
    pub queue_wait: Duration,
    /// How long a direct `send_beacon` call waits before re-checking
    /// readiness.
    pub send_wait: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            config_refresh: Duration::from_millis(300_000),
            queue_wait: Duration::from_millis(5_000),
            send_wait: Duration::from_millis(1_000),
        }
    }
}

type Callback = Box<dyn Fn(&mut BeaconParams) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    before_beacon: Vec<Callback>,
    beacon: Vec<Callback>,
}

/// An open timer: started but not yet stopped.
struct OpenTimer {
    started: Instant,
    name: String,
}

struct AppState {
    config: ConfigDocument,
    defs: DefinitionTables,
    initialized: bool,
    /// Whether the next configuration fetch should carry the empty
    /// refresh-crumb parameter. Set after the first successful parse.
    refresh_crumb: bool,
    queue: VecDeque<QueuedEvent>,
    /// Whether a drainer task currently owns the queue. Exactly one task
    /// pops and sends at a time; everyone else returns immediately.
    draining: bool,
    page_group: Option<String>,
    ab_bucket: Option<String>,
    dimensions: BTreeMap<String, String>,
    session: SessionState,
    timers: HashMap<i64, OpenTimer>,
    latest_timer_id: i64,
}

impl AppState {
    fn new() -> Self {
        Self {
            config: ConfigDocument::new(),
            defs: DefinitionTables::default(),
            initialized: false,
            refresh_crumb: false,
            queue: VecDeque::new(),
            draining: false,
            page_group: None,
            ab_bucket: None,
            dimensions: BTreeMap::new(),
            session: SessionState::new(now_ms()),
            timers: HashMap::new(),
            latest_timer_id: -1,
        }
    }
}

struct AppInner {
    api_key: String,
    secret_key: Option<String>,
    config_url: String,
    force_ssl: bool,
    ua: Option<String>,
    timing: TimingConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<AppState>,
    subscribers: Mutex<Subscribers>,
}

/// Handle to one application's measurement state.
///
/// Usually obtained through [`crate::Pulse::init`]. Clones share state.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

impl App {
    /// Create an app and schedule its first configuration fetch.
    ///
    /// Must be called from within a tokio runtime; the fetch and all
    /// later timers run as spawned tasks.
    pub fn new(
        api_key: String,
        secret_key: Option<String>,
        options: AppOptions,
        transport: Arc<dyn Transport>,
        timing: TimingConfig,
    ) -> Self {
        let app = Self {
            inner: Arc::new(AppInner {
                api_key,
                secret_key,
                config_url: options
                    .config_url
                    .unwrap_or_else(|| crate::registry::DEFAULT_CONFIG_URL.to_owned()),
                force_ssl: options.force_ssl,
                ua: options.ua,
                timing,
                transport,
                state: Mutex::new(AppState::new()),
                subscribers: Mutex::new(Subscribers::default()),
            }),
        };

        let fetcher = app.clone();
        tokio::spawn(async move { fetcher.fetch_config().await });

        app
    }

    /// Whether configuration has loaded and beacons can be sent.
    pub async fn is_initialized(&self) -> bool {
        self.inner.state.lock().await.initialized
    }

    //
    // Configuration manager
    //

    /// Fetch the configuration document and route it through
    /// [`App::parse_config`].
    async fn fetch_config(&self) {
        if self.inner.config_url.is_empty() {
            warn!(api_key = %self.inner.api_key, "no configuration URL specified");
            return;
        }

        let url = self.config_request_url().await;
        debug!(url = %url, "fetching configuration");

        match self
            .inner
            .transport
            .fetch(&url, self.inner.ua.as_deref())
            .await
        {
            Ok(body) => self.parse_config(&body).await,
            Err(err) => warn!(error = %err, "configuration fetch failed"),
        }
    }

    /// Build the signed configuration request URL.
    async fn config_request_url(&self) -> String {
        let timestamp = now_ms();

        let mut url = self.inner.config_url.clone();
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&format!("key={}&t={timestamp}", self.inner.api_key));

        if let Some(secret) = &self.inner.secret_key {
            let signature = sign_config_request(&self.inner.api_key, secret, timestamp);
            url.push_str(&format!("&s={signature}"));
        }

        // Every fetch after the first successful parse asks for a crumb
        // refresh only.
        if self.inner.state.lock().await.refresh_crumb {
            url.push_str("&r=");
        }

        ensure_url_prefix(&url, self.inner.force_ssl)
    }

    /// Merge a raw configuration response into the app.
    ///
    /// On success this rebuilds the definition tables, seeds the session
    /// if the caller never started one, flips readiness, arms the next
    /// refresh, and kicks the drainer. A parse failure, a missing beacon
    /// URL, or a rate-limited response leaves the app uninitialized.
    ///
    /// Public so harnesses can feed configuration without a transport.
    pub async fn parse_config(&self, body: &str) {
        let mut state = self.inner.state.lock().await;

        if let Err(err) = state.config.merge(body) {
            warn!(error = %err, "configuration could not be parsed");
            state.initialized = false;
            return;
        }

        if state.config.beacon_url().is_none() || state.config.rate_limited() {
            warn!(
                api_key = %self.inner.api_key,
                "configuration is rate limited or has no beacon URL, beacons withheld"
            );
            state.initialized = false;
            return;
        }

        if state.session.id.is_none() {
            let seed = state.config.session_id().map(str::to_owned);
            state.session.start_session(seed, now_ms());
        }

        state.defs = DefinitionTables::rebuild(&state.config);
        state.initialized = true;
        state.refresh_crumb = true;
        drop(state);

        // One self-rescheduling refresh timer per successful parse.
        tokio::spawn(refresh_after(
            self.clone(),
            self.inner.timing.config_refresh,
        ));

        self.schedule_drain();
    }

    //
    // Beacon queue & drainer
    //

    /// Append a measurement with a snapshot of the current app state.
    async fn enqueue(&self, kind: EventKind, name: &str, value: f64) {
        let mut state = self.inner.state.lock().await;
        let event = QueuedEvent {
            kind,
            name: name.to_owned(),
            value,
            page_group: state.page_group.clone(),
            ab_bucket: state.ab_bucket.clone(),
            dimensions: state.dimensions.clone(),
            enqueued_at: now_ms(),
        };
        state.queue.push_back(event);
        drop(state);

        self.schedule_drain();
    }

    /// Run the drainer on a fresh task, never inline with the caller.
    fn schedule_drain(&self) {
        let app = self.clone();
        tokio::spawn(async move { app.drain().await });
    }

    /// Drain the queue: FIFO, one event at a time, until it is empty.
    ///
    /// At most one drainer task owns the queue at a time; every other
    /// invocation returns immediately, so a send suspended in the
    /// transport can never be overtaken by a later event. While the app
    /// is not initialized the owning task waits and re-checks on a fixed
    /// interval.
    async fn drain(&self) {
        {
            let mut state = self.inner.state.lock().await;
            if state.draining || state.queue.is_empty() {
                return;
            }
            state.draining = true;
        }

        loop {
            let mut state = self.inner.state.lock().await;

            if state.queue.is_empty() {
                state.draining = false;
                return;
            }

            if !state.initialized {
                drop(state);

                debug!(
                    api_key = %self.inner.api_key,
                    wait_ms = self.inner.timing.queue_wait.as_millis() as u64,
                    "not yet initialized, delaying queue drain"
                );
                tokio::time::sleep(self.inner.timing.queue_wait).await;
                continue;
            }

            let Some(event) = state.queue.pop_front() else {
                state.draining = false;
                return;
            };
            let params = resolve_event(&event, &state.defs);
            drop(state);

            if let Some(params) = params {
                self.send_beacon(params).await;
            }
        }
    }

    //
    // Beacon construction
    //

    /// Assemble and send one beacon.
    ///
    /// Direct calls made before the app is initialized wait on a fixed
    /// interval instead of dropping the beacon. The parameter map is
    /// completed with the configuration passthrough fields, session
    /// fields and API markers, offered to `before_beacon` subscribers,
    /// serialized, announced to `beacon` subscribers, and handed to the
    /// transport. The response is not read.
    pub async fn send_beacon(&self, mut params: BeaconParams) {
        loop {
            if self.is_initialized().await {
                break;
            }
            debug!(
                api_key = %self.inner.api_key,
                wait_ms = self.inner.timing.send_wait.as_millis() as u64,
                "not yet initialized, delaying beacon"
            );
            tokio::time::sleep(self.inner.timing.send_wait).await;
        }

        let state = self.inner.state.lock().await;
        params.set_opt("d", state.config.param_value("site_domain"));
        params.set_opt("h.key", state.config.param_value("h.key"));
        params.set_opt("h.d", state.config.param_value("h.d"));
        params.set_opt("h.cr", state.config.param_value("h.cr"));
        params.set_opt("h.t", state.config.param_value("h.t"));
        params.set("http.initiator", "api");
        params.set("rt.start", "api");

        if let Some(id) = &state.session.id {
            params.set("rt.si", id.clone());
            params.set("rt.ss", state.session.start.to_string());
            params.set("rt.sl", state.session.length.to_string());
        }

        params.set("api", "1");
        params.set("api.v", "2");
        params.set("api.l", "rs");
        params.set("api.lv", env!("CARGO_PKG_VERSION"));

        let base = state
            .config
            .beacon_url()
            .map(|url| ensure_url_prefix(url, self.inner.force_ssl));
        drop(state);

        let Some(base) = base else {
            warn!("configuration has no beacon URL, dropping beacon");
            return;
        };

        // Let subscribers add data before serialization.
        self.fire_event(BeaconEvent::BeforeBeacon, &mut params).await;

        let separator = if base.contains('?') { '&' } else { '?' };
        let url = format!("{base}{separator}{}", params.to_query());

        self.fire_event(BeaconEvent::Beacon, &mut params).await;

        debug!(url = %url, "sending beacon");
        let ua = params.ua.clone().or_else(|| self.inner.ua.clone());
        if let Err(err) = self.inner.transport.fetch(&url, ua.as_deref()).await {
            // Fire-and-forget: delivery failures are advisory only.
            debug!(error = %err, "beacon send failed");
        }
    }

    /// Subscribe to a beacon lifecycle event.
    ///
    /// Callbacks run synchronously on the sending task; a panicking
    /// subscriber aborts that beacon's hand-off.
    pub async fn subscribe<F>(&self, event: BeaconEvent, callback: F)
    where
        F: Fn(&mut BeaconParams) + Send + Sync + 'static,
    {
        let mut subscribers = self.inner.subscribers.lock().await;
        match event {
            BeaconEvent::BeforeBeacon => subscribers.before_beacon.push(Box::new(callback)),
            BeaconEvent::Beacon => subscribers.beacon.push(Box::new(callback)),
        }
    }

    async fn fire_event(&self, event: BeaconEvent, params: &mut BeaconParams) {
        let subscribers = self.inner.subscribers.lock().await;
        let callbacks = match event {
            BeaconEvent::BeforeBeacon => &subscribers.before_beacon,
            BeaconEvent::Beacon => &subscribers.beacon,
        };
        for callback in callbacks {
            callback(params);
        }
    }

    //
    // Timers
    //

    /// Start a timer, returning its id, or `-1` for an empty name.
    pub async fn start_timer(&self, name: &str) -> i64 {
        if name.is_empty() {
            return -1;
        }

        let mut state = self.inner.state.lock().await;
        state.latest_timer_id += 1;
        let id = state.latest_timer_id;
        state.timers.insert(
            id,
            OpenTimer {
                started: Instant::now(),
                name: name.to_owned(),
            },
        );
        id
    }

    /// Stop a timer and send its elapsed milliseconds.
    ///
    /// Returns the rounded elapsed time, or `-1` for a negative, unknown
    /// or already-stopped id.
    pub async fn stop_timer(&self, id: i64) -> i64 {
        if id < 0 {
            return -1;
        }

        let timer = self.inner.state.lock().await.timers.remove(&id);
        let Some(timer) = timer else {
            return -1;
        };

        let elapsed = (timer.started.elapsed().as_secs_f64() * 1000.0).round() as i64;
        self.send_timer(&timer.name, elapsed as f64).await;
        elapsed
    }

    /// Enqueue a timer measurement.
    ///
    /// Returns the rounded value, or `-1` for an empty name or a
    /// negative or non-finite value.
    pub async fn send_timer(&self, name: &str, value: f64) -> i64 {
        if name.is_empty() || !value.is_finite() || value < 0.0 {
            return -1;
        }

        let rounded = value.round() as i64;
        self.enqueue(EventKind::Timer, name, rounded as f64).await;
        rounded
    }

    /// Enqueue a metric measurement; the value defaults to 1.
    ///
    /// An empty name or non-finite value is silently ignored.
    pub async fn send_metric(&self, name: &str, value: Option<f64>) {
        if name.is_empty() {
            return;
        }
        let value = match value {
            Some(v) if v.is_finite() => v,
            Some(_) => return,
            None => 1.0,
        };

        self.enqueue(EventKind::Metric, name, value).await;
    }

    //
    // Page groups, A/B buckets, dimensions
    //

    /// Set the page group attached to subsequent beacons.
    pub async fn set_page_group(&self, name: &str) {
        self.inner.state.lock().await.page_group = Some(name.to_owned());
    }

    /// The current page group, if one is set.
    pub async fn get_page_group(&self) -> Option<String> {
        self.inner.state.lock().await.page_group.clone()
    }

    /// Clear the page group.
    pub async fn reset_page_group(&self) {
        self.inner.state.lock().await.page_group = None;
    }

    /// Set the A/B bucket attached to subsequent beacons.
    ///
    /// Bucket names are limited to 25 characters of ASCII alphanumerics,
    /// underscores, spaces and dashes. Returns whether the bucket was
    /// accepted; rejection leaves the previous bucket untouched.
    pub async fn set_ab_test(&self, bucket: &str) -> bool {
        if !pulse_core::is_valid_ab_bucket(bucket) {
            return false;
        }
        self.inner.state.lock().await.ab_bucket = Some(bucket.to_owned());
        true
    }

    /// The current A/B bucket, if one is set.
    pub async fn get_ab_test(&self) -> Option<String> {
        self.inner.state.lock().await.ab_bucket.clone()
    }

    /// Clear the A/B bucket.
    pub async fn reset_ab_test(&self) {
        self.inner.state.lock().await.ab_bucket = None;
    }

    /// Set a dimension; passing `None` resets it instead.
    pub async fn set_dimension(&self, name: &str, value: Option<&str>) {
        let Some(value) = value else {
            self.reset_dimension(name).await;
            return;
        };
        self.inner
            .state
            .lock()
            .await
            .dimensions
            .insert(name.to_owned(), value.to_owned());
    }

    /// Remove a dimension if it is set.
    pub async fn reset_dimension(&self, name: &str) {
        self.inner.state.lock().await.dimensions.remove(name);
    }

    //
    // Sessions
    //

    /// Override the session id. Numbers are accepted and coerced.
    pub async fn set_session_id(&self, id: impl ToString + Send) {
        let id = id.to_string();
        self.inner.state.lock().await.session.id = Some(id);
    }

    /// The current session id, if a session is active.
    pub async fn get_session_id(&self) -> Option<String> {
        self.inner.state.lock().await.session.id.clone()
    }

    /// Start a new session: set or generate the id, reset the length to
    /// zero, stamp the start. Returns the id now in effect.
    pub async fn start_session(&self, id: Option<&str>) -> String {
        self.inner
            .state
            .lock()
            .await
            .session
            .start_session(id.map(str::to_owned), now_ms())
    }

    /// Add one to the session length.
    pub async fn increment_session_length(&self) {
        self.inner.state.lock().await.session.length += 1;
    }

    /// Set the session length.
    pub async fn set_session_length(&self, length: u64) {
        self.inner.state.lock().await.session.length = length;
    }

    /// The current session length.
    pub async fn get_session_length(&self) -> u64 {
        self.inner.state.lock().await.session.length
    }

    /// Set the session start (wall-clock milliseconds).
    pub async fn set_session_start(&self, start_ms: u64) {
        self.inner.state.lock().await.session.start = start_ms;
    }

    /// The session start (wall-clock milliseconds).
    pub async fn get_session_start(&self) -> u64 {
        self.inner.state.lock().await.session.start
    }

    /// Continue a session from a Boomerang instance instead of starting
    /// a fresh one. Returns whether the descriptor was complete enough
    /// to transfer.
    pub async fn transfer_boomerang_session(&self, session: &BoomerangSession) -> bool {
        if !session.is_transferable() {
            return false;
        }

        let mut state = self.inner.state.lock().await;
        state.session.id = Some(session.composite_id());
        state.session.length = session.length;
        state.session.start = session.start;
        true
    }

    /// Whether two handles refer to the same app.
    pub(crate) fn ptr_eq(&self, other: &App) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[cfg(test)]
    pub(crate) async fn queue_len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }
}

/// Re-fetch the configuration after `delay`.
///
/// Boxed so the fetch/parse/refresh cycle does not form an infinitely
/// sized future type.
fn refresh_after(app: App, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        tokio::time::sleep(delay).await;
        app.fetch_config().await;
    })
}

/// Wall-clock milliseconds since the Unix epoch.
fn now_ms() -> u64 {
    SystemTime::UNIX_EPOCH
        .elapsed()
        .unwrap_or_default()
        .as_millis() as u64
}

/// Ensure a URL carries a scheme.
///
/// Absolute URLs pass through; protocol-relative URLs get `https:` under
/// force-SSL and `http:` otherwise.
fn ensure_url_prefix(url: &str, force_ssl: bool) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_owned();
    }
    if force_ssl {
        format!("https:{url}")
    } else {
        format!("http:{url}")
    }
}
