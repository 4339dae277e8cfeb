#![no_main]

use libfuzzer_sys::fuzz_target;
use reqrev_core::Locator;

fuzz_target!(|data: &[u8]| {
    let Ok(path) = std::str::from_utf8(data) else {
        return;
    };
    if path.len() > 2048 {
        return;
    }

    let locator = Locator::default();
    let identity = locator.parse_identity(path);

    // Classification and identity agree.
    assert_eq!(locator.is_managed_page(path), identity.is_some());
    let Some(identity) = identity else {
        assert_eq!(locator.page_id(path), None);
        return;
    };

    assert!(!identity.namespace.is_empty());
    assert!(!identity.resource.is_empty());
    assert!(!identity.namespace.contains('/'));
    assert!(!identity.resource.contains('/'));
    assert_eq!(
        locator.page_id(path),
        Some(format!("{}/{}", identity.namespace, identity.resource))
    );

    // The canonical path of an identity maps back to it.
    let canonical = format!("/{}/{}", identity.namespace, identity.resource);
    assert_eq!(locator.parse_identity(&canonical), Some(identity));
});
