#![no_main]

use libfuzzer_sys::fuzz_target;
use reqrev_harness::fixtures;
use reqrev_harness::selector::SelectorList;
use reqrev_host::HostDom;

fuzz_target!(|data: &[u8]| {
    let Ok(selector) = std::str::from_utf8(data) else {
        return;
    };
    if selector.len() > 512 {
        return;
    }

    let parsed = SelectorList::parse(selector);

    // Queries never panic; a selector that does not parse matches nothing.
    let host = fixtures::repo_page("orgA", "repoA");
    let all = host.dom.query_selector_all(selector);
    let first = host.dom.query_selector(selector);
    if parsed.is_err() {
        assert!(all.is_empty());
        assert!(first.is_none());
    }
    assert_eq!(all.first().cloned(), first);

    if let Some(body) = host.dom.body() {
        let within = host.dom.query_selector_all_within(&body, selector);
        assert!(within.len() <= all.len());
    }
});
