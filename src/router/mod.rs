//! Protocol router - resolves `lumen://` URLs to handlers.
//!
//! `lumen://app/...` addresses internal actions, `lumen://ext/<publisher?>/
//! <name>/...` addresses a specific extension's handlers. Each process runs
//! its own router over its own handler tables; after every `route()` call on
//! the host, the normalized URL and the attempt outcome are broadcast so UI
//! routers independently recompute the resolution for their disjoint
//! registrations. Resolution results are never shared as values.

pub mod schema;

pub use schema::{RouteParams, RouteSchema};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::bus::{topic, MessageBus};
use crate::error::Result;
use crate::extensions::loader::ExtensionLoader;

/// The custom URL scheme owned by the app.
pub const SCHEME: &str = "lumen";

/// Host selecting the internal route table.
const HOST_INTERNAL: &str = "app";
/// Host selecting extension routing.
const HOST_EXTENSION: &str = "ext";

/// Why a URL could not be routed. Always caught at the `route()` entry
/// point, logged and broadcast for user-facing notification; never fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("invalid protocol: {url}")]
    InvalidProtocol { url: String },
    #[error("invalid host: {url}")]
    InvalidHost { url: String },
    #[error("invalid pathname: {url}")]
    InvalidPathname { url: String },
    #[error("no handler registered for {url}")]
    NoHandler { url: String },
    #[error("no extension id in {url}")]
    NoExtensionId { url: String },
    #[error("extension {name} is not installed: {url}")]
    MissingExtension { url: String, name: String },
}

/// Outcome broadcast after each routing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteAttempt {
    Matched,
    Missing,
    MissingExtension,
}

/// Handler invoked with the resolved parameters.
pub type RouteHandler = Arc<dyn Fn(RouteParams) + Send + Sync>;

/// Fallback invoked when an addressed extension is not live, typically to
/// trigger an on-demand install. Returning true stops the chain and causes
/// one resolution retry. Callers are expected to bound its runtime.
pub type MissingExtensionHandler = Arc<dyn Fn(String) -> BoxFuture<'static, bool> + Send + Sync>;

/// Ordered collection of compiled schemas and their handlers.
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: Vec<(RouteSchema, RouteHandler)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and add a schema. A malformed schema is rejected without
    /// mutating the table.
    pub fn register(&mut self, raw: &str, handler: RouteHandler) -> Result<()> {
        let schema = RouteSchema::compile(raw)?;
        self.routes.push((schema, handler));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve a path: an exact match wins immediately, otherwise the most
    /// specific partial match. Specificity counts separators in the schema
    /// string, `/` ranking lowest; ties keep the earliest registration.
    fn resolve(&self, path: &str, search: HashMap<String, String>) -> Option<(RouteHandler, RouteParams)> {
        let mut best: Option<(usize, &RouteSchema, &RouteHandler, schema::RouteMatch)> = None;
        for (route_schema, handler) in &self.routes {
            let Some(m) = route_schema.match_path(path) else {
                continue;
            };
            if m.exact {
                return Some((
                    handler.clone(),
                    RouteParams {
                        pathname: m.pathname,
                        search,
                        tail: None,
                    },
                ));
            }
            let rank = route_schema.separator_count();
            if best.as_ref().map(|(r, ..)| rank > *r).unwrap_or(true) {
                best = Some((rank, route_schema, handler, m));
            }
        }
        best.map(|(_, _, handler, m)| {
            (
                handler.clone(),
                RouteParams {
                    pathname: m.pathname,
                    search,
                    tail: m.tail,
                },
            )
        })
    }
}

/// Resolves custom-scheme URLs to exactly one handler and invokes it.
pub struct ProtocolRouter {
    loader: Arc<ExtensionLoader>,
    bus: Arc<dyn MessageBus>,
    internal: RwLock<RouteTable>,
    extension_tables: RwLock<HashMap<String, RouteTable>>,
    missing_handlers: RwLock<Vec<MissingExtensionHandler>>,
}

impl ProtocolRouter {
    pub fn new(loader: Arc<ExtensionLoader>, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            loader,
            bus,
            internal: RwLock::new(RouteTable::new()),
            extension_tables: RwLock::new(HashMap::new()),
            missing_handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an internal (`lumen://app`) route.
    pub fn register_internal(&self, schema: &str, handler: RouteHandler) -> Result<()> {
        self.internal
            .write()
            .expect("route table lock poisoned")
            .register(schema, handler)
    }

    /// Register a route in a specific extension's table.
    pub fn register_extension(
        &self,
        extension_name: &str,
        schema: &str,
        handler: RouteHandler,
    ) -> Result<()> {
        let compiled = RouteSchema::compile(schema)?;
        let mut tables = self
            .extension_tables
            .write()
            .expect("route table lock poisoned");
        tables
            .entry(extension_name.to_string())
            .or_default()
            .routes
            .push((compiled, handler));
        Ok(())
    }

    /// Append a missing-extension fallback. Handlers run in registration
    /// order; the first truthy result stops the chain.
    pub fn add_missing_extension_handler(&self, handler: MissingExtensionHandler) {
        self.missing_handlers
            .write()
            .expect("route table lock poisoned")
            .push(handler);
    }

    /// Route a raw URL. Errors never escape: every `RoutingError` is logged
    /// and broadcast on `protocol-invalid` for user-facing notification.
    pub async fn route(&self, raw_url: &str) {
        if let Err(e) = self.dispatch(raw_url, true).await {
            warn!("failed to route {}: {}", raw_url, e);
            self.bus
                .publish(topic::PROTOCOL_INVALID, json!([e.to_string(), raw_url]));
        }
    }

    /// Mirror routing attempts broadcast by the other process: re-resolve
    /// each URL against this process's own tables, without re-broadcasting.
    pub fn start_mirror(self: &Arc<Self>) {
        for mirror_topic in [topic::PROTOCOL_INTERNAL, topic::PROTOCOL_EXTENSION] {
            let router = Arc::clone(self);
            let mut rx = self.bus.subscribe(mirror_topic);
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(payload) => {
                            let Some(raw) = payload.get(0).and_then(|v| v.as_str()) else {
                                continue;
                            };
                            if let Err(e) = router.dispatch(raw, false).await {
                                debug!("mirror resolution of {} failed: {}", raw, e);
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }
    }

    async fn dispatch(
        &self,
        raw_url: &str,
        announce: bool,
    ) -> std::result::Result<(), RoutingError> {
        let url = Url::parse(raw_url).map_err(|_| RoutingError::InvalidProtocol {
            url: raw_url.to_string(),
        })?;
        if url.scheme() != SCHEME {
            return Err(RoutingError::InvalidProtocol {
                url: raw_url.to_string(),
            });
        }

        let pathname = url.path().to_string();
        if pathname.contains("//") {
            return Err(RoutingError::InvalidPathname {
                url: raw_url.to_string(),
            });
        }
        let search: HashMap<String, String> = url.query_pairs().into_owned().collect();

        // Broadcast the normalized form so every process resolves an
        // identical string.
        let normalized = url.as_str();
        match url.host_str() {
            Some(HOST_INTERNAL) => self.route_internal(normalized, &pathname, search, announce),
            Some(HOST_EXTENSION) => {
                self.route_extension(normalized, &pathname, search, announce)
                    .await
            }
            _ => Err(RoutingError::InvalidHost {
                url: raw_url.to_string(),
            }),
        }
    }

    fn route_internal(
        &self,
        raw_url: &str,
        pathname: &str,
        search: HashMap<String, String>,
        announce: bool,
    ) -> std::result::Result<(), RoutingError> {
        let resolved = self
            .internal
            .read()
            .expect("route table lock poisoned")
            .resolve(pathname, search);
        match resolved {
            Some((handler, params)) => {
                handler(params);
                self.announce(announce, topic::PROTOCOL_INTERNAL, raw_url, RouteAttempt::Matched);
                Ok(())
            }
            None => {
                self.announce(announce, topic::PROTOCOL_INTERNAL, raw_url, RouteAttempt::Missing);
                Err(RoutingError::NoHandler {
                    url: raw_url.to_string(),
                })
            }
        }
    }

    async fn route_extension(
        &self,
        raw_url: &str,
        pathname: &str,
        search: HashMap<String, String>,
        announce: bool,
    ) -> std::result::Result<(), RoutingError> {
        let Some((name, rest)) = parse_extension_target(pathname) else {
            return Err(RoutingError::NoExtensionId {
                url: raw_url.to_string(),
            });
        };

        let mut instance = self.loader.get_by_name(&name).await;
        if instance.is_none() {
            let handlers = self
                .missing_handlers
                .read()
                .expect("route table lock poisoned")
                .clone();
            for handler in handlers {
                if handler(name.clone()).await {
                    break;
                }
            }
            // Retry resolution exactly once after the fallback chain.
            instance = self.loader.get_by_name(&name).await;
        }
        if instance.is_none() {
            self.announce(
                announce,
                topic::PROTOCOL_EXTENSION,
                raw_url,
                RouteAttempt::MissingExtension,
            );
            return Err(RoutingError::MissingExtension {
                url: raw_url.to_string(),
                name,
            });
        }

        let resolved = self
            .extension_tables
            .read()
            .expect("route table lock poisoned")
            .get(&name)
            .and_then(|table| table.resolve(&rest, search));
        match resolved {
            Some((handler, params)) => {
                handler(params);
                self.announce(announce, topic::PROTOCOL_EXTENSION, raw_url, RouteAttempt::Matched);
                Ok(())
            }
            None => {
                self.announce(announce, topic::PROTOCOL_EXTENSION, raw_url, RouteAttempt::Missing);
                Err(RoutingError::NoHandler {
                    url: raw_url.to_string(),
                })
            }
        }
    }

    fn announce(&self, announce: bool, channel: &str, raw_url: &str, attempt: RouteAttempt) {
        if announce {
            self.bus.publish(channel, json!([raw_url, attempt]));
        }
    }
}

/// Split an extension-addressed pathname into the target name and the rest
/// of the path. Scoped names (`@publisher/name`) span two segments.
fn parse_extension_target(pathname: &str) -> Option<(String, String)> {
    let mut segments = pathname.trim_start_matches('/').splitn(3, '/');
    let first = segments.next().filter(|s| !s.is_empty())?;

    let (name, rest_segments): (String, Vec<&str>) = if let Some(publisher) = first.strip_prefix('@')
    {
        if publisher.is_empty() {
            return None;
        }
        let second = segments.next().filter(|s| !s.is_empty())?;
        (format!("{}/{}", first, second), segments.collect())
    } else {
        (first.to_string(), segments.collect())
    };

    let rest = rest_segments.join("/");
    let rest = if rest.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", rest)
    };
    Some((name, rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::config::ExtensionsConfig;
    use crate::extensions::manifest::{ExtensionManifest, InstalledExtension};
    use crate::extensions::module::{ExtensionContext, ExtensionModule, FactoryModuleLoader};
    use crate::extensions::store::MemoryEnablementStore;
    use crate::ProcessKind;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::{timeout, Duration};

    struct NoopModule;

    #[async_trait]
    impl ExtensionModule for NoopModule {
        async fn activate(&self, _ctx: ExtensionContext) -> std::result::Result<(), String> {
            Ok(())
        }
    }

    fn record(name: &str) -> (String, InstalledExtension) {
        let config = ExtensionsConfig::new("/b", "/u", "/p", semver::Version::new(6, 0, 0));
        let manifest = ExtensionManifest {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            main: Some("main.js".to_string()),
            renderer: None,
            engines: Default::default(),
            description: None,
        };
        let ext = InstalledExtension::new(
            &config,
            &Path::new("/u").join(name.replace('/', "-")),
            manifest,
            false,
            true,
        );
        (ext.id.clone(), ext)
    }

    struct Fixture {
        router: Arc<ProtocolRouter>,
        loader: Arc<ExtensionLoader>,
        modules: Arc<FactoryModuleLoader>,
        bus: Arc<LocalBus>,
    }

    fn fixture() -> Fixture {
        let bus = LocalBus::shared();
        let modules = Arc::new(FactoryModuleLoader::new());
        let loader = Arc::new(ExtensionLoader::new(
            ProcessKind::Host,
            bus.clone(),
            Arc::new(MemoryEnablementStore::new()),
            modules.clone(),
        ));
        let router = Arc::new(ProtocolRouter::new(loader.clone(), bus.clone()));
        Fixture {
            router,
            loader,
            modules,
            bus,
        }
    }

    async fn live_extension(fixture: &Fixture, name: &str) {
        fixture.modules.register(name, Arc::new(|| Box::new(NoopModule)));
        fixture
            .loader
            .seed([record(name)].into_iter().collect())
            .await;
        fixture.loader.load_extensions().await;
    }

    fn counting_handler(calls: Arc<Mutex<Vec<RouteParams>>>) -> RouteHandler {
        Arc::new(move |params| calls.lock().unwrap().push(params))
    }

    #[tokio::test]
    async fn test_exact_match_invokes_exactly_one_handler() {
        let fixture = fixture();
        let hits: Arc<Mutex<Vec<RouteParams>>> = Arc::default();
        let other_hits: Arc<Mutex<Vec<RouteParams>>> = Arc::default();
        fixture
            .router
            .register_internal("/cluster/:clusterId", counting_handler(hits.clone()))
            .unwrap();
        fixture
            .router
            .register_internal("/preferences", counting_handler(other_hits.clone()))
            .unwrap();

        fixture.router.route("lumen://app/cluster/c42?tab=nodes").await;

        let calls = hits.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].pathname["clusterId"], "c42");
        assert_eq!(calls[0].search["tab"], "nodes");
        assert!(calls[0].tail.is_none());
        assert!(other_hits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capture_schema_beats_shorter_literal() {
        let fixture = fixture();
        let page: Arc<Mutex<Vec<RouteParams>>> = Arc::default();
        let page_id: Arc<Mutex<Vec<RouteParams>>> = Arc::default();
        fixture
            .router
            .register_internal("/page", counting_handler(page.clone()))
            .unwrap();
        fixture
            .router
            .register_internal("/page/:id", counting_handler(page_id.clone()))
            .unwrap();

        fixture.router.route("lumen://app/page/42").await;

        assert!(page.lock().unwrap().is_empty());
        let calls = page_id.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].pathname["id"], "42");
    }

    #[tokio::test]
    async fn test_most_specific_partial_match_wins_and_sets_tail() {
        let fixture = fixture();
        let mut hits = HashMap::new();
        for schema in ["/", "/page", "/page/foo", "/page/bar"] {
            let calls: Arc<Mutex<Vec<RouteParams>>> = Arc::default();
            hits.insert(schema, calls.clone());
            fixture
                .router
                .register_internal(schema, counting_handler(calls))
                .unwrap();
        }

        fixture.router.route("lumen://app/page/foo/bar/bat").await;

        for (schema, calls) in &hits {
            let calls = calls.lock().unwrap();
            if *schema == "/page/foo" {
                assert_eq!(calls.len(), 1, "expected {} to win", schema);
                assert_eq!(calls[0].tail.as_deref(), Some("/bar/bat"));
            } else {
                assert!(calls.is_empty(), "{} should not fire", schema);
            }
        }
    }

    #[tokio::test]
    async fn test_wrong_scheme_is_invalid_protocol() {
        let fixture = fixture();
        let err = fixture.router.dispatch("https://app/page", true).await.unwrap_err();
        assert!(matches!(err, RoutingError::InvalidProtocol { .. }));
        let err = fixture.router.dispatch("not a url", true).await.unwrap_err();
        assert!(matches!(err, RoutingError::InvalidProtocol { .. }));
    }

    #[tokio::test]
    async fn test_unknown_host_is_invalid_host() {
        let fixture = fixture();
        let err = fixture
            .router
            .dispatch("lumen://somewhere/page", true)
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::InvalidHost { .. }));
    }

    #[tokio::test]
    async fn test_no_handler_is_reported_and_broadcast() {
        let fixture = fixture();
        let mut internal = fixture.bus.subscribe(topic::PROTOCOL_INTERNAL);
        let mut invalid = fixture.bus.subscribe(topic::PROTOCOL_INVALID);

        fixture.router.route("lumen://app/nowhere").await;

        let attempt = timeout(Duration::from_millis(100), internal.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt, json!(["lumen://app/nowhere", "missing"]));
        let notification = timeout(Duration::from_millis(100), invalid.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification[1], json!("lumen://app/nowhere"));
    }

    #[tokio::test]
    async fn test_matched_route_broadcasts_outcome() {
        let fixture = fixture();
        fixture
            .router
            .register_internal("/landing", Arc::new(|_| {}))
            .unwrap();
        let mut internal = fixture.bus.subscribe(topic::PROTOCOL_INTERNAL);

        fixture.router.route("lumen://app/landing").await;

        let attempt = internal.recv().await.unwrap();
        assert_eq!(attempt, json!(["lumen://app/landing", "matched"]));
    }

    #[tokio::test]
    async fn test_broadcasts_carry_the_normalized_url() {
        let fixture = fixture();
        fixture
            .router
            .register_internal("/landing", Arc::new(|_| {}))
            .unwrap();
        let mut internal = fixture.bus.subscribe(topic::PROTOCOL_INTERNAL);

        fixture.router.route("LUMEN://app/landing").await;

        let attempt = internal.recv().await.unwrap();
        assert_eq!(attempt, json!(["lumen://app/landing", "matched"]));
    }

    #[tokio::test]
    async fn test_double_slash_pathname_is_invalid() {
        let fixture = fixture();
        let err = fixture
            .router
            .dispatch("lumen://app/page//detail", true)
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::InvalidPathname { .. }));
    }

    #[tokio::test]
    async fn test_malformed_schema_is_rejected_without_mutation() {
        let fixture = fixture();
        assert!(fixture
            .router
            .register_internal("/bad//schema", Arc::new(|_| {}))
            .unwrap_err()
            .to_string()
            .contains("schema"));
        assert!(fixture.router.internal.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extension_routing_matches_in_the_extension_table() {
        let fixture = fixture();
        live_extension(&fixture, "my-ext").await;
        let hits: Arc<Mutex<Vec<RouteParams>>> = Arc::default();
        fixture
            .router
            .register_extension("my-ext", "/open/:target", counting_handler(hits.clone()))
            .unwrap();

        fixture.router.route("lumen://ext/my-ext/open/dashboard").await;

        let calls = hits.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].pathname["target"], "dashboard");
    }

    #[tokio::test]
    async fn test_scoped_extension_names_span_two_segments() {
        let fixture = fixture();
        live_extension(&fixture, "@acme/tools").await;
        let hits: Arc<Mutex<Vec<RouteParams>>> = Arc::default();
        fixture
            .router
            .register_extension("@acme/tools", "/run", counting_handler(hits.clone()))
            .unwrap();

        fixture.router.route("lumen://ext/@acme/tools/run").await;

        assert_eq!(hits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_extension_path_is_no_extension_id() {
        let fixture = fixture();
        let err = fixture.router.dispatch("lumen://ext", true).await.unwrap_err();
        assert!(matches!(err, RoutingError::NoExtensionId { .. }));
        let err = fixture
            .router
            .dispatch("lumen://ext/@scoped-without-name", true)
            .await
            .unwrap_err();
        assert!(matches!(err, RoutingError::NoExtensionId { .. }));
    }

    #[tokio::test]
    async fn test_fallback_chain_runs_in_order_and_retries_once() {
        let fixture = fixture();
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();

        let order1 = order.clone();
        fixture.router.add_missing_extension_handler(Arc::new(move |_name| {
            let order1 = order1.clone();
            Box::pin(async move {
                order1.lock().unwrap().push("first");
                false
            })
        }));

        // The second handler "installs" the extension, so the single retry
        // resolves it; the third must never run.
        let order2 = order.clone();
        let loader = fixture.loader.clone();
        let modules = fixture.modules.clone();
        fixture.router.add_missing_extension_handler(Arc::new(move |name| {
            let order2 = order2.clone();
            let loader = loader.clone();
            let modules = modules.clone();
            Box::pin(async move {
                order2.lock().unwrap().push("second");
                modules.register(&name, Arc::new(|| Box::new(NoopModule)));
                loader.seed([record(&name)].into_iter().collect()).await;
                loader.load_extensions().await;
                true
            })
        }));

        let order3 = order.clone();
        fixture.router.add_missing_extension_handler(Arc::new(move |_name| {
            let order3 = order3.clone();
            Box::pin(async move {
                order3.lock().unwrap().push("third");
                false
            })
        }));

        let hits: Arc<Mutex<Vec<RouteParams>>> = Arc::default();
        fixture
            .router
            .register_extension("on-demand", "/", counting_handler(hits.clone()))
            .unwrap();

        fixture.router.route("lumen://ext/on-demand").await;

        assert_eq!(&*order.lock().unwrap(), &["first", "second"]);
        assert_eq!(hits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_fallbacks_yield_missing_extension() {
        let fixture = fixture();
        let runs = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let runs = runs.clone();
            fixture.router.add_missing_extension_handler(Arc::new(move |_name| {
                let runs = runs.clone();
                Box::pin(async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    false
                })
            }));
        }

        let err = fixture
            .router
            .dispatch("lumen://ext/ghost/open", true)
            .await
            .unwrap_err();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        match err {
            RoutingError::MissingExtension { name, .. } => assert_eq!(name, "ghost"),
            other => panic!("expected MissingExtension, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mirror_resolves_broadcast_urls_against_local_tables() {
        let fixture = fixture();
        fixture
            .router
            .register_internal("/landing", Arc::new(|_| {}))
            .unwrap();

        // A second router on the same bus with its own disjoint handlers.
        let ui_loader = Arc::new(ExtensionLoader::new(
            ProcessKind::Ui,
            fixture.bus.clone(),
            Arc::new(MemoryEnablementStore::new()),
            Arc::new(FactoryModuleLoader::new()),
        ));
        let ui_router = Arc::new(ProtocolRouter::new(ui_loader, fixture.bus.clone()));
        let ui_hits: Arc<Mutex<Vec<RouteParams>>> = Arc::default();
        ui_router
            .register_internal("/landing", counting_handler(ui_hits.clone()))
            .unwrap();
        ui_router.start_mirror();
        tokio::time::sleep(Duration::from_millis(50)).await;

        fixture.router.route("lumen://app/landing").await;

        timeout(Duration::from_secs(1), async {
            loop {
                if !ui_hits.lock().unwrap().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("mirror never resolved the broadcast URL");
    }
}
