//! Thread-local cache of bound path variables.
//!
//! Binding is deterministic for a given registry and template, so results are
//! memoised per thread. Cache is capped at 256 entries and cleared when full.

use crate::bind::{bind, BindError, VariableMap};
use crate::path::PathTemplate;
use crate::registry::Registry;
use std::cell::RefCell;
use std::collections::HashMap;

const MAX_CACHE_ENTRIES: usize = 256;

thread_local! {
    // Key is "<registry fingerprint>:<path name>" so layered registries that
    // share path names never collide.
    static BINDING_CACHE: RefCell<HashMap<String, VariableMap>> =
        RefCell::new(HashMap::new());
}

/// Get the bound variables for `template` from cache, or bind and cache them.
pub fn get_or_bind(registry: &Registry, template: &PathTemplate) -> Result<VariableMap, BindError> {
    let cache_key = format!("{:016x}:{}", registry.fingerprint(), template.name());

    if let Some(vars) = BINDING_CACHE.with(|cache| cache.borrow().get(&cache_key).cloned()) {
        return Ok(vars);
    }

    let vars = bind(registry, template)?;
    BINDING_CACHE.with(|cache| {
        let mut cache = cache.borrow_mut();
        if cache.len() >= MAX_CACHE_ENTRIES {
            cache.clear();
        }
        cache.insert(cache_key, vars.clone());
    });
    Ok(vars)
}

/// Clear the binding cache (mainly for testing).
pub fn clear_cache() {
    BINDING_CACHE.with(|cache| cache.borrow_mut().clear());
}

pub fn cache_size() -> usize {
    BINDING_CACHE.with(|cache| cache.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::load_from_str;

    fn registry(selector: &str) -> Registry {
        load_from_str(&format!(
            r#"
[elements]
a = "a"
b = "b"

[paths]
target = "{selector}"
"#
        ))
        .unwrap()
    }

    #[test]
    fn cache_is_keyed_by_fingerprint() {
        clear_cache();
        let first = registry("/a");
        let second = registry("/b");

        let a = get_or_bind(&first, first.path("target").unwrap()).unwrap();
        let again = get_or_bind(&first, first.path("target").unwrap()).unwrap();
        assert_eq!(a, again);
        assert_eq!(cache_size(), 1);

        let b = get_or_bind(&second, second.path("target").unwrap()).unwrap();
        assert_ne!(a, b);
        assert_eq!(cache_size(), 2);

        clear_cache();
        assert_eq!(cache_size(), 0);
    }
}
