//! Store, analysis and panel rendering wired through one controller.

use std::rc::Rc;

use futures::executor::block_on;
use pretty_assertions::assert_eq;
use reqrev_core::store::storage_key;
use reqrev_core::{
    AnalysisClient, AnalyzeRequirementRequest, Controller, ExtensionMessage, InjectConfig,
    InjectError, PageIdentity, Requirement, RequirementStore, render_requirements,
};
use reqrev_harness::TestHost;
use reqrev_harness::fixtures;
use reqrev_host::{HostDom, RuntimeError};
use serde_json::json;

fn analysing_backend(host: &TestHost) {
    host.runtime.respond_with(|raw| {
        let ExtensionMessage::AnalyzeRequirement(request) =
            serde_json::from_str(raw).map_err(|e| RuntimeError::new(e.to_string()))?;
        let smells: Vec<&str> = if request.description.contains("fast") {
            vec!["Vague term", "Non-verifiable"]
        } else {
            Vec::new()
        };
        let explanation = if smells.is_empty() {
            "Looks fine."
        } else {
            "\"fast\" is not measurable."
        };
        Ok(json!({
            "ok": true,
            "status": 200,
            "data": {
                "requirement_id": request.requirement_id,
                "description": request.description,
                "smells": smells,
                "explanation": explanation,
            }
        })
        .to_string())
    });
}

#[test]
fn analysed_requirements_render_in_the_panel() {
    let host = Rc::new(fixtures::repo_page("orgA", "repoA"));
    analysing_backend(&host);
    let controller = Controller::new(host.clone(), InjectConfig::default());
    controller.start();

    let identity = controller.identity().unwrap();
    let store = RequirementStore::new(controller.guard().clone(), identity.clone());
    let client = AnalysisClient::new(controller.guard().clone());

    for description in ["The page shall load fast.", "Exports shall be CSV files."] {
        let id = block_on(store.next_id()).unwrap();
        let mut requirement = Requirement::new(id.clone(), description);
        let request = AnalyzeRequirementRequest::new(id, description);
        let response = block_on(client.analyze(&request)).unwrap().unwrap();
        requirement.apply_analysis(&response);
        assert!(block_on(store.upsert(requirement)).unwrap());
    }

    let stored = block_on(store.load()).unwrap();
    assert_eq!(
        stored.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
        vec!["REQ-1", "REQ-2"]
    );
    assert!(!stored[0].is_clean());
    assert!(stored[1].is_clean());
    assert!(host.runtime.stored(&storage_key(&identity)).is_some());

    let container = host.dom.element_by_id("reqrev-panel").unwrap();
    assert_eq!(render_requirements(&host.dom, &container, &stored), 2);
    let badges = host
        .dom
        .query_selector_all_within(&container, ".reqrev-panel__smell");
    let labels: Vec<String> = badges.iter().map(|b| host.dom.text_content(b)).collect();
    assert_eq!(labels, vec!["Vague term", "Non-verifiable"]);
    let empty = host
        .dom
        .query_selector_all_within(&container, ".reqrev-panel__empty");
    assert_eq!(
        host.dom.style_property(&empty[0], "display").as_deref(),
        Some("none")
    );
}

#[test]
fn requirements_are_scoped_to_their_page() {
    let host = Rc::new(fixtures::repo_page("orgA", "repoA"));
    let controller = Controller::new(host.clone(), InjectConfig::default());
    controller.start();
    let guard = controller.guard().clone();

    let a = RequirementStore::new(guard.clone(), PageIdentity::new("orgA", "repoA"));
    let b = RequirementStore::new(guard, PageIdentity::new("orgB", "repoB"));
    block_on(a.upsert(Requirement::new("REQ-1", "Only in A."))).unwrap();

    assert_eq!(block_on(a.load()).unwrap().len(), 1);
    assert!(block_on(b.load()).unwrap().is_empty());
    assert_eq!(block_on(b.next_id()).unwrap(), "REQ-1");
    assert!(block_on(a.delete("REQ-1")).unwrap());
    assert!(!block_on(a.delete("REQ-1")).unwrap());
}

#[test]
fn one_notice_for_the_whole_page_after_a_reload() {
    let host = Rc::new(fixtures::repo_page("orgA", "repoA"));
    analysing_backend(&host);
    let controller = Controller::new(host.clone(), InjectConfig::default());
    controller.start();
    let client = AnalysisClient::new(controller.guard().clone());
    let store = RequirementStore::new(controller.guard().clone(), controller.identity().unwrap());

    host.runtime.invalidate();
    let request = AnalyzeRequirementRequest::new("REQ-1", "The page shall load fast.");
    assert_eq!(block_on(client.analyze(&request)).unwrap(), None);
    assert!(!block_on(store.save(&[Requirement::new("REQ-1", "x")])).unwrap());
    assert!(block_on(store.load()).unwrap().is_empty());
    assert!(matches!(
        controller.panel().unwrap().toggle(),
        Err(InjectError::ContextInvalidated)
    ));

    assert_eq!(host.runtime.notices().len(), 1);
    assert!(host.runtime.sent_messages().is_empty());
}

#[test]
fn backend_rejection_surfaces_its_status() {
    let host = Rc::new(TestHost::new());
    host.runtime.respond_with(|_| {
        Ok(json!({"ok": false, "status": 400, "error": "description cannot be empty"}).to_string())
    });
    let controller = Controller::new(host.clone(), InjectConfig::default());
    let client = AnalysisClient::new(controller.guard().clone());

    let err = block_on(client.analyze(&AnalyzeRequirementRequest::new("REQ-9", "Fine text.")))
        .unwrap_err();
    assert!(matches!(err, InjectError::Analysis { status: 400, .. }), "{err:?}");

    let invalid = AnalyzeRequirementRequest::new("REQ-9", "   ");
    assert!(matches!(
        block_on(client.analyze(&invalid)),
        Err(InjectError::InvalidRequirement(_))
    ));
    assert_eq!(host.runtime.sent_messages().len(), 1);
}
