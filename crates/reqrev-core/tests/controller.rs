//! Controller scenarios: injection retry, SPA navigation and self-healing.

use core::time::Duration;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use reqrev_core::{
    Controller, HostPage, InitOutcome, InjectConfig, InjectionStatus, PageIdentity, PanelState,
};
use reqrev_harness::TestHost;
use reqrev_harness::fixtures::{self, HostScript};
use reqrev_host::HostDom;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;

const SETTLE: Duration = Duration::from_millis(300);
const RETRY: Duration = Duration::from_millis(500);
const TICK: Duration = Duration::from_millis(100);

// ============================================================================
// Tracing capture
// ============================================================================

#[derive(Debug, Clone)]
struct CapturedEvent {
    level: tracing::Level,
    fields: HashMap<String, String>,
}

impl CapturedEvent {
    fn message(&self) -> &str {
        self.fields.get("message").map_or("", String::as_str)
    }
}

struct EventCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

struct FieldVisitor(Vec<(String, String)>);

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.push((field.name().to_string(), format!("{value:?}")));
    }
    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
}

impl<S> tracing_subscriber::Layer<S> for EventCapture
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor(Vec::new());
        event.record(&mut visitor);
        self.events.lock().unwrap().push(CapturedEvent {
            level: *event.metadata().level(),
            fields: visitor.0.into_iter().collect(),
        });
    }
}

fn with_captured_events<F, R>(f: F) -> (R, Vec<CapturedEvent>)
where
    F: FnOnce() -> R,
{
    let events = Arc::new(Mutex::new(Vec::new()));
    let layer = EventCapture {
        events: events.clone(),
    };
    let subscriber = tracing_subscriber::registry().with(layer);
    let result = tracing::subscriber::with_default(subscriber, f);
    let captured = events.lock().unwrap().clone();
    (result, captured)
}

// ============================================================================
// Helpers
// ============================================================================

fn started(host: &Rc<TestHost>) -> Rc<Controller<TestHost>> {
    let controller = Controller::new(host.clone(), InjectConfig::default());
    controller.start();
    controller
}

fn extension_tabs(host: &TestHost) -> usize {
    host.dom.query_selector_all("#reqrev-tab").len()
}

fn click_extension_tab(host: &TestHost) {
    let tab = host.dom.element_by_id("reqrev-tab").expect("extension tab");
    host.dom.click(&tab);
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn clicking_the_tab_toggles_the_panel() {
    let host = Rc::new(fixtures::repo_page("orgA", "repoA"));
    let controller = started(&host);
    let panel = controller.panel().unwrap();
    assert_eq!(panel.state(), PanelState::Hidden);

    click_extension_tab(&host);
    host.flush_mutations();
    assert_eq!(panel.state(), PanelState::Visible);
    let config = InjectConfig::default();
    let page = HostPage::new(&host.dom, &config);
    let code = fixtures::host_tab(&host, "Code").unwrap();
    assert!(!page.is_tab_selected(&code));

    click_extension_tab(&host);
    host.flush_mutations();
    assert_eq!(panel.state(), PanelState::Hidden);
    assert!(page.is_tab_selected(&code));
}

#[test]
fn navigating_to_another_repository_rebuilds_the_session() {
    let host = Rc::new(fixtures::repo_page("orgA", "repoA"));
    let controller = started(&host);
    let before = controller.session().unwrap();
    click_extension_tab(&host);

    fixtures::navigate_spa(&host, "/orgB/repoB");
    host.flush_mutations();
    assert!(controller.session().is_none());
    assert!(before.panel().is_removed());
    assert!(host.dom.element_by_id("reqrev-panel").is_none());

    host.advance(SETTLE);
    let after = controller.session().unwrap();
    assert!(!Rc::ptr_eq(&before, &after));
    assert_eq!(after.identity(), &PageIdentity::new("orgB", "repoB"));
    assert_eq!(after.status(), InjectionStatus::Injected);
    assert_eq!(after.panel().state(), PanelState::Hidden);
    assert_eq!(extension_tabs(&host), 1);
    assert_eq!(host.dom.query_selector_all("#reqrev-panel").len(), 1);
}

#[test]
fn sub_page_navigation_keeps_the_session() {
    let host = Rc::new(fixtures::repo_page("orgA", "repoA"));
    let controller = started(&host);
    let before = controller.session().unwrap();
    let panel = before.panel().clone();

    for path in ["/orgA/repoA/issues", "/orgA/repoA/pulls", "/orgA/repoA/tree/main"] {
        fixtures::navigate_spa(&host, path);
        host.advance(SETTLE);
    }

    let after = controller.session().unwrap();
    assert!(Rc::ptr_eq(&before, &after));
    assert!(Rc::ptr_eq(&panel, after.panel()));
    assert!(!panel.is_removed());
    assert_eq!(extension_tabs(&host), 1);
}

#[test]
fn rapid_navigation_initialises_once_for_the_final_page() {
    let host = Rc::new(fixtures::repo_page("orgA", "repoA"));
    let (controller, events) = with_captured_events(|| {
        let controller = started(&host);
        fixtures::navigate_spa(&host, "/orgB/repoB");
        host.advance(Duration::from_millis(100));
        fixtures::navigate_spa(&host, "/orgC/repoC");
        host.advance(SETTLE);
        controller
    });

    assert_eq!(controller.identity(), Some(PageIdentity::new("orgC", "repoC")));
    let sessions: Vec<&CapturedEvent> = events
        .iter()
        .filter(|e| e.message() == "page session started")
        .collect();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[1].fields.get("resource").map(String::as_str), Some("repoC"));
}

#[test]
fn leaving_for_an_unmanaged_page_removes_everything() {
    let host = Rc::new(fixtures::repo_page("orgA", "repoA"));
    let controller = started(&host);

    fixtures::navigate_spa(&host, "/orgA");
    host.advance(SETTLE);
    assert!(controller.session().is_none());
    assert_eq!(extension_tabs(&host), 0);
    assert!(controller.is_watching_navigation());

    fixtures::navigate_spa(&host, "/orgA/repoA");
    host.advance(SETTLE);
    assert_eq!(controller.identity(), Some(PageIdentity::new("orgA", "repoA")));
    assert_eq!(extension_tabs(&host), 1);
}

#[test]
fn late_navigation_widget_is_picked_up_by_the_retry_loop() {
    let host = Rc::new(fixtures::repo_page_without_nav("orgA", "repoA"));
    let controller = started(&host);
    assert_eq!(controller.injection_status(), Some(InjectionStatus::Pending));

    host.advance(RETRY);
    assert_eq!(controller.session().unwrap().attempts(), 2);
    fixtures::render_nav(&host);
    host.advance(RETRY);

    let session = controller.session().unwrap();
    assert_eq!(session.status(), InjectionStatus::Injected);
    assert_eq!(session.attempts(), 3);
    assert!(session.watcher().is_watching());
    assert_eq!(extension_tabs(&host), 1);
    assert_eq!(host.scheduler.pending_timers(), 0);
}

#[test]
fn exhausted_injection_is_logged_as_an_error() {
    let (status, events) = with_captured_events(|| {
        let host = Rc::new(fixtures::repo_page_without_nav("orgA", "repoA"));
        let mut config = InjectConfig::default();
        config.timing.inject_max_attempts = 4;
        let controller = Controller::new(host.clone(), config);
        controller.start();
        host.advance(RETRY * 10);
        controller.injection_status()
    });

    assert_eq!(status, Some(InjectionStatus::Exhausted));
    let failures: Vec<&CapturedEvent> = events
        .iter()
        .filter(|e| e.level == tracing::Level::ERROR)
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].message(), "giving up on injection");
    assert_eq!(failures[0].fields.get("attempts").map(String::as_str), Some("4"));
}

#[test]
fn rerendered_navigation_gets_the_tab_back() {
    let host = Rc::new(fixtures::repo_page("orgA", "repoA"));
    let controller = started(&host);
    let session = controller.session().unwrap();
    click_extension_tab(&host);
    host.flush_mutations();

    HostScript::new(&host).rerender_nav();
    host.flush_mutations();
    assert_eq!(extension_tabs(&host), 1);
    assert_eq!(session.status(), InjectionStatus::Injected);
    assert!(Rc::ptr_eq(&session, &controller.session().unwrap()));

    // The fresh nav arrives with "Code" selected; one tick takes it back.
    host.advance(TICK);
    let config = InjectConfig::default();
    let page = HostPage::new(&host.dom, &config);
    let selected: Vec<_> = page
        .host_tabs()
        .into_iter()
        .filter(|tab| page.is_tab_selected(tab))
        .collect();
    assert!(selected.is_empty());
    assert!(page.is_tab_selected(&page.extension_tab().unwrap()));

    // The watcher follows the new tabs.
    let issues = fixtures::host_tab(&host, "Issues").unwrap();
    HostScript::new(&host).select_host_tab(&issues);
    host.flush_mutations();
    assert!(!page.is_tab_selected(&issues));
    assert!(session.watcher().corrections() >= 1);
}

#[test]
fn two_controllers_on_the_same_resource_are_independent() {
    let first = Rc::new(fixtures::repo_page("orgA", "repoA"));
    let second = Rc::new(fixtures::repo_page("orgA", "repoA"));
    let a = started(&first);
    let b = started(&second);

    click_extension_tab(&first);
    first.flush_mutations();
    assert_eq!(a.panel().unwrap().state(), PanelState::Visible);
    assert_eq!(b.panel().unwrap().state(), PanelState::Hidden);

    a.shutdown();
    assert_eq!(b.injection_status(), Some(InjectionStatus::Injected));
    assert_eq!(extension_tabs(&second), 1);
}

#[test]
fn start_reports_what_it_did() {
    let host = Rc::new(fixtures::repo_page("orgA", "repoA"));
    let controller = Controller::new(host.clone(), InjectConfig::default());
    assert_eq!(
        controller.start(),
        InitOutcome::Started(PageIdentity::new("orgA", "repoA"))
    );
    // A second start rebuilds rather than stacking sessions.
    controller.start();
    assert_eq!(extension_tabs(&host), 1);
    assert_eq!(host.dom.query_selector_all("#reqrev-panel").len(), 1);
}
