//! App registry: creates, names, and hands out [`App`] instances.

use crate::app::{App, TimingConfig};
use crate::transport::{HttpTransport, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Where configuration is fetched from when no override is given.
/// Protocol-relative; the scheme is chosen by the force-SSL option.
pub const DEFAULT_CONFIG_URL: &str = "//c.go-mpulse.net/api/v2/config.json";

/// Per-app creation options.
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Configuration service URL; defaults to [`DEFAULT_CONFIG_URL`].
    pub config_url: Option<String>,
    /// Force `https:` for protocol-relative configuration and beacon URLs.
    pub force_ssl: bool,
    /// User-Agent sent with configuration fetches and beacons.
    pub ua: Option<String>,
    /// Registry name; named apps can be looked up and re-initialized
    /// idempotently.
    pub name: Option<String>,
}

/// Registry of measurement apps sharing one transport and timing.
///
/// The first app initialized becomes the default. Initializing a name
/// twice returns a handle to the existing app rather than creating a
/// second one.
pub struct Pulse {
    transport: Arc<dyn Transport>,
    timing: TimingConfig,
    apps: Mutex<HashMap<String, App>>,
    default_app: Mutex<Option<App>>,
}

impl Pulse {
    /// A registry backed by the HTTP transport and production timing.
    pub fn new() -> Self {
        Self::with_transport(Arc::new(HttpTransport::new()), TimingConfig::default())
    }

    /// A registry with an explicit transport and timing, for embedding
    /// and for tests.
    pub fn with_transport(transport: Arc<dyn Transport>, timing: TimingConfig) -> Self {
        Self {
            transport,
            timing,
            apps: Mutex::new(HashMap::new()),
            default_app: Mutex::new(None),
        }
    }

    /// Initialize an app for an API key, scheduling its first
    /// configuration fetch. Re-initializing an existing name is a no-op
    /// that returns the existing app.
    pub async fn init(
        &self,
        api_key: &str,
        secret_key: Option<&str>,
        options: AppOptions,
    ) -> App {
        if let Some(name) = &options.name {
            if let Some(existing) = self.apps.lock().await.get(name) {
                return existing.clone();
            }
        }

        let name = options.name.clone();
        let app = App::new(
            api_key.to_owned(),
            secret_key.map(str::to_owned),
            options,
            Arc::clone(&self.transport),
            self.timing.clone(),
        );

        let mut default_app = self.default_app.lock().await;
        if default_app.is_none() {
            *default_app = Some(app.clone());
        }
        drop(default_app);

        if let Some(name) = name {
            self.apps.lock().await.insert(name, app.clone());
        }

        app
    }

    /// Look up a named app.
    pub async fn get_app(&self, name: &str) -> Option<App> {
        self.apps.lock().await.get(name).cloned()
    }

    /// The first app initialized, if any.
    pub async fn default_app(&self) -> Option<App> {
        self.default_app.lock().await.clone()
    }

    /// Drop a named app from the registry.
    ///
    /// Outstanding handles keep working, and timers the app already
    /// armed fire against its orphaned state harmlessly.
    pub async fn stop(&self, name: &str) {
        let removed = self.apps.lock().await.remove(name);

        if let Some(removed) = removed {
            let mut default_app = self.default_app.lock().await;
            if default_app.as_ref().is_some_and(|app| app.ptr_eq(&removed)) {
                *default_app = None;
            }
        }
    }

    /// Forget every app. Meant for test harnesses.
    pub async fn reset(&self) {
        self.apps.lock().await.clear();
        *self.default_app.lock().await = None;
    }
}

impl Default for Pulse {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use std::time::Duration;

    fn quiet() -> (Pulse, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let timing = TimingConfig {
            config_refresh: Duration::from_secs(3600),
            queue_wait: Duration::from_millis(20),
            send_wait: Duration::from_millis(20),
        };
        (
            Pulse::with_transport(transport.clone(), timing),
            transport,
        )
    }

    fn named(name: &str) -> AppOptions {
        AppOptions {
            name: Some(name.to_owned()),
            ..AppOptions::default()
        }
    }

    #[tokio::test]
    async fn init_is_idempotent_by_name() {
        let (pulse, _transport) = quiet();

        let first = pulse.init("KEY", None, named("app")).await;
        first.set_page_group("group").await;

        let second = pulse.init("OTHER-KEY", None, named("app")).await;
        assert_eq!(second.get_page_group().await.as_deref(), Some("group"));
    }

    #[tokio::test]
    async fn first_app_becomes_default() {
        let (pulse, _transport) = quiet();
        assert!(pulse.default_app().await.is_none());

        let first = pulse.init("KEY", None, named("a")).await;
        let _second = pulse.init("KEY2", None, named("b")).await;

        let default_app = pulse.default_app().await.unwrap();
        default_app.set_page_group("from-default").await;
        assert_eq!(
            first.get_page_group().await.as_deref(),
            Some("from-default")
        );
    }

    #[tokio::test]
    async fn unnamed_apps_are_not_registered() {
        let (pulse, _transport) = quiet();

        let _app = pulse.init("KEY", None, AppOptions::default()).await;
        assert!(pulse.get_app("KEY").await.is_none());
        assert!(pulse.default_app().await.is_some());
    }

    #[tokio::test]
    async fn stop_forgets_the_app() {
        let (pulse, _transport) = quiet();

        let app = pulse.init("KEY", None, named("app")).await;
        app.send_metric("orphan", None).await;

        pulse.stop("app").await;
        assert!(pulse.get_app("app").await.is_none());
        assert!(pulse.default_app().await.is_none());

        // The handle and any pending drain keep working harmlessly.
        tokio::time::sleep(Duration::from_millis(60)).await;
        app.send_metric("still-works", None).await;
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let (pulse, _transport) = quiet();

        pulse.init("KEY", None, named("app")).await;
        pulse.reset().await;
        assert!(pulse.get_app("app").await.is_none());
        assert!(pulse.default_app().await.is_none());
    }
}
