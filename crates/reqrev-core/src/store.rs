#![forbid(unsafe_code)]

//! Per-page requirement persistence.
//!
//! A thin wrapper over the extension's key-value storage. Every call goes
//! through the [`ContextGuard`]; an invalidated context reads as an empty
//! list and turns writes into no-ops.

use std::collections::BTreeSet;
use std::rc::Rc;

use reqrev_host::{ExtensionRuntime, Host};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::AnalyzeRequirementResponse;
use crate::error::Result;
use crate::guard::{CONTEXT_INVALIDATED_NOTICE, ContextGuard};
use crate::locator::PageIdentity;

/// Prefix of every storage key the store writes.
pub const STORAGE_KEY_PREFIX: &str = "reqrev:requirements:";

/// One requirement as persisted for a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_points: Option<u8>,
    #[serde(default)]
    pub smells: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Requirement {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            activity_points: None,
            smells: Vec::new(),
            explanation: None,
        }
    }

    /// Replace smells and explanation with an analysis result.
    pub fn apply_analysis(&mut self, response: &AnalyzeRequirementResponse) {
        self.smells = response.smells.clone();
        self.explanation = response.explanation.clone();
    }

    pub fn is_clean(&self) -> bool {
        self.smells.is_empty()
    }
}

/// Storage key for one page's requirements.
#[must_use]
pub fn storage_key(identity: &PageIdentity) -> String {
    format!("{STORAGE_KEY_PREFIX}{}", identity.page_id())
}

pub struct RequirementStore<H: Host> {
    guard: Rc<ContextGuard<H>>,
    identity: PageIdentity,
}

impl<H: Host> RequirementStore<H> {
    pub fn new(guard: Rc<ContextGuard<H>>, identity: PageIdentity) -> Self {
        Self { guard, identity }
    }

    pub fn identity(&self) -> &PageIdentity {
        &self.identity
    }

    /// Requirements stored for this page, empty when none or context gone.
    pub async fn load(&self) -> Result<Vec<Requirement>> {
        let key = storage_key(&self.identity);
        let runtime = self.guard.runtime();
        let stored = self
            .guard
            .guarded_call(|| runtime.storage_get(&key), CONTEXT_INVALIDATED_NOTICE)
            .await?
            .flatten();
        match stored {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Overwrite this page's requirements. Returns whether the write happened.
    pub async fn save(&self, requirements: &[Requirement]) -> Result<bool> {
        let key = storage_key(&self.identity);
        let payload = serde_json::to_string(requirements)?;
        let runtime = self.guard.runtime();
        let written = self
            .guard
            .guarded_call(
                move || runtime.storage_set(&key, payload),
                CONTEXT_INVALIDATED_NOTICE,
            )
            .await?;
        debug!(page = %self.identity, count = requirements.len(), saved = written.is_some(), "requirements saved");
        Ok(written.is_some())
    }

    /// Insert or replace by id.
    pub async fn upsert(&self, requirement: Requirement) -> Result<bool> {
        let mut all = self.load().await?;
        match all.iter_mut().find(|r| r.id == requirement.id) {
            Some(existing) => *existing = requirement,
            None => all.push(requirement),
        }
        self.save(&all).await
    }

    /// Remove by id. Returns whether a requirement was removed and saved.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut all = self.load().await?;
        let before = all.len();
        all.retain(|r| r.id != id);
        if all.len() == before {
            return Ok(false);
        }
        self.save(&all).await
    }

    /// Next free `REQ-<n>` id for this page.
    pub async fn next_id(&self) -> Result<String> {
        Ok(next_requirement_id(&self.load().await?))
    }
}

/// `REQ-<n+1>` where `n` is the highest numbered id present.
///
/// Once `n` is `u64::MAX` the lowest unused number is handed out instead.
#[must_use]
pub fn next_requirement_id(existing: &[Requirement]) -> String {
    let used: BTreeSet<u64> = existing
        .iter()
        .filter_map(|r| requirement_number(&r.id))
        .collect();
    let highest = used.last().copied().unwrap_or(0);
    let next = highest.checked_add(1).unwrap_or_else(|| {
        (1..=used.len() as u64 + 1)
            .find(|n| !used.contains(n))
            .unwrap_or(1)
    });
    format!("REQ-{next}")
}

fn requirement_number(id: &str) -> Option<u64> {
    let digits = id.strip_prefix("REQ-")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use pretty_assertions::assert_eq;
    use reqrev_harness::TestHost;

    fn store(host: &Rc<TestHost>) -> RequirementStore<TestHost> {
        RequirementStore::new(
            Rc::new(ContextGuard::new(host.clone())),
            PageIdentity::new("orgA", "repoA"),
        )
    }

    #[test]
    fn key_is_scoped_to_page() {
        assert_eq!(
            storage_key(&PageIdentity::new("orgA", "repoA")),
            "reqrev:requirements:orgA/repoA"
        );
    }

    #[test]
    fn upsert_then_delete() {
        let host = Rc::new(TestHost::new());
        let store = store(&host);
        assert_eq!(block_on(store.load()).unwrap(), Vec::new());

        block_on(store.upsert(Requirement::new("REQ-1", "Login within 2s"))).unwrap();
        block_on(store.upsert(Requirement::new("REQ-2", "Export as CSV"))).unwrap();
        let mut edited = Requirement::new("REQ-1", "Login within 1s");
        edited.smells = vec!["ambiguity".into()];
        block_on(store.upsert(edited.clone())).unwrap();

        let all = block_on(store.load()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], edited);
        assert_eq!(block_on(store.next_id()).unwrap(), "REQ-3");

        assert!(block_on(store.delete("REQ-2")).unwrap());
        assert!(!block_on(store.delete("REQ-9")).unwrap());
        assert_eq!(block_on(store.load()).unwrap(), vec![edited]);
        assert!(host.runtime.stored("reqrev:requirements:orgA/repoA").is_some());
    }

    #[test]
    fn invalid_context_reads_empty_and_skips_writes() {
        let host = Rc::new(TestHost::new());
        host.runtime.invalidate();
        let store = store(&host);
        assert_eq!(block_on(store.load()).unwrap(), Vec::new());
        assert!(!block_on(store.save(&[Requirement::new("REQ-1", "x")])).unwrap());
        assert_eq!(host.runtime.stored("reqrev:requirements:orgA/repoA"), None);
        assert_eq!(host.runtime.notices().len(), 1);
    }

    #[test]
    fn corrupt_payload_is_an_error() {
        let host = Rc::new(TestHost::new());
        host.runtime.seed_storage("reqrev:requirements:orgA/repoA", "{not json");
        assert!(block_on(store(&host).load()).is_err());
    }

    #[test]
    fn next_id_skips_foreign_ids() {
        let existing = [
            Requirement::new("REQ-7", "a"),
            Requirement::new("custom", "b"),
            Requirement::new("REQ-x", "c"),
        ];
        assert_eq!(next_requirement_id(&existing), "REQ-8");
        assert_eq!(next_requirement_id(&[]), "REQ-1");
        assert_eq!(next_requirement_id(&[Requirement::new("REQ-+5", "d")]), "REQ-1");
    }

    #[test]
    fn next_id_survives_huge_stored_numbers() {
        let past_u32 = [Requirement::new("REQ-4294967295", "a")];
        assert_eq!(next_requirement_id(&past_u32), "REQ-4294967296");

        let at_max = [
            Requirement::new("REQ-1", "a"),
            Requirement::new("REQ-18446744073709551615", "b"),
            Requirement::new("REQ-2", "c"),
        ];
        assert_eq!(next_requirement_id(&at_max), "REQ-3");

        // Beyond u64 is not a number we could have issued.
        let beyond = [Requirement::new("REQ-99999999999999999999999", "a")];
        assert_eq!(next_requirement_id(&beyond), "REQ-1");
    }

    #[test]
    fn analysis_replaces_previous_findings() {
        let mut req = Requirement::new("REQ-1", "fast");
        req.smells = vec!["old".into()];
        req.apply_analysis(&AnalyzeRequirementResponse {
            requirement_id: "REQ-1".into(),
            description: "fast".into(),
            smells: vec![],
            explanation: Some("clear".into()),
            raw_model_output: None,
        });
        assert!(req.is_clean());
        assert_eq!(req.explanation.as_deref(), Some("clear"));
    }
}
