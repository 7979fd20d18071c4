//! Fuzz target for request path routing.
//!
//! Any matched path must split into a prefix and resource path that
//! reassemble to the input, and must never contain a `..` segment.

#![no_main]

use gitway_server::routing::PathRouter;
use libfuzzer_sys::fuzz_target;
use once_cell::sync::Lazy;

static ROUTER: Lazy<PathRouter> = Lazy::new(PathRouter::git_default);

fuzz_target!(|data: &[u8]| {
    let Ok(path) = std::str::from_utf8(data) else {
        return;
    };

    if let Some(matched) = ROUTER.route(path) {
        assert_eq!(
            format!("{}/{}", matched.prefix, matched.resource_path),
            path
        );
        assert!(!path.split('/').any(|segment| segment == ".."));
    }
});
