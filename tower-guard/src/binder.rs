//! Binds records named by path templates to request properties.
//!
//! A binding such as `"users/{userId}.json"` -> `"user"` reads the record at the expanded path
//! before the handler runs and exposes its value under `"user"`. Placeholders are filled from a
//! request parameter lookup; a placeholder with no matching parameter is left in the path as is.

use guard_store::Backend;
use guard_store::RecordKey;
use guard_store::RecordStore;
use serde_json::Map;
use serde_json::Value;
use tracing::warn;

/// Errors raised while declaring bindings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("Binding for {0} already exists")]
    DuplicatePath(String),

    #[error("Binding to {0} already exists")]
    DuplicateProperty(String),
}

#[derive(Debug, Clone)]
struct Binding {
    template: String,
    container: Option<String>,
    property: String,
}

/// A set of record bindings, declared once and resolved per request.
#[derive(Debug, Clone, Default)]
pub struct RecordBinder {
    bindings: Vec<Binding>,
}

/// Half-built binding returned by [`RecordBinder::bind`]; finish it with [`PropertyBinder::to`].
#[must_use = "a binding is only registered once `to` is called"]
#[derive(Debug)]
pub struct PropertyBinder<'a> {
    binder: &'a mut RecordBinder,
    template: String,
    container: Option<String>,
}

impl PropertyBinder<'_> {
    /// Expose the bound record under `property`.
    pub fn to(self, property: impl Into<String>) -> Result<(), BindError> {
        let property = property.into();
        if self.binder.bindings.iter().any(|b| b.property == property) {
            return Err(BindError::DuplicateProperty(property));
        }
        self.binder.bindings.push(Binding {
            template: self.template,
            container: self.container,
            property,
        });
        Ok(())
    }
}

impl RecordBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start binding the record at `template`, optionally inside `container`.
    pub fn bind(
        &mut self,
        template: impl Into<String>,
        container: Option<&str>,
    ) -> Result<PropertyBinder<'_>, BindError> {
        let template = template.into();
        if self.bindings.iter().any(|b| b.template == template) {
            return Err(BindError::DuplicatePath(template));
        }
        Ok(PropertyBinder {
            binder: self,
            template,
            container: container.map(str::to_string),
        })
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Read every bound record, keyed by property.
    ///
    /// `params` supplies placeholder values; empty values count as missing. A record that cannot
    /// be read is logged and bound as `null`, it never fails the request.
    pub async fn resolve<B, P>(&self, store: &RecordStore<B>, params: P) -> Map<String, Value>
    where
        B: Backend + ?Sized,
        P: Fn(&str) -> Option<String>,
    {
        let mut bound = Map::new();
        for binding in &self.bindings {
            let path = expand(&binding.template, &params);
            let mut key = RecordKey::new(path);
            if let Some(container) = &binding.container {
                key = key.in_container(container.clone());
            }

            let value = match store.read(&key, false).await {
                Ok(value) => value,
                Err(err) => {
                    warn!(%key, property = %binding.property, error = %err, "binding failed");
                    Value::Null
                }
            };
            bound.insert(binding.property.clone(), value);
        }
        bound
    }
}

/// Replace each `{name}` in `template` with `params(name)`.
fn expand<P>(template: &str, params: &P) -> String
where
    P: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let Some(close) = tail.find('}') else {
            rest = tail;
            break;
        };
        let name = &tail[1..close];
        // Not a placeholder: keep the brace literally and scan on from the next character
        if name.is_empty() || name.contains('{') {
            out.push('{');
            rest = &tail[1..];
            continue;
        }
        match params(name).filter(|value| !value.is_empty()) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&tail[..=close]),
        }
        rest = &tail[close + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use guard_store::BoxError;
    use guard_store::MemoryBackend;
    use serde_json::json;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn it_expands_placeholders() {
        let params = lookup(&[("appId", "app1"), ("userId", "42"), ("blank", "")]);

        assert_eq!(expand("apps/{appId}.json", &params), "apps/app1.json");
        assert_eq!(
            expand("{appId}/users/{userId}", &params),
            "app1/users/42"
        );
        assert_eq!(expand("apps/{missing}.json", &params), "apps/{missing}.json");
        assert_eq!(expand("apps/{blank}.json", &params), "apps/{blank}.json");
        assert_eq!(expand("apps/{}.json", &params), "apps/{}.json");
        assert_eq!(expand("apps/{appId", &params), "apps/{appId");
        assert_eq!(expand("apps/{appId}/{", &params), "apps/app1/{");
        assert_eq!(expand("{appId}/{}", &params), "app1/{}");
        assert_eq!(expand("apps/{}/{appId}", &params), "apps/{}/app1");
        assert_eq!(expand("apps/{{appId}}", &params), "apps/{app1}");
        assert_eq!(expand("static.json", &params), "static.json");
    }

    #[test]
    fn it_rejects_duplicate_paths_and_properties() {
        let mut binder = RecordBinder::new();
        binder.bind("apps/{appId}.json", None).unwrap().to("app").unwrap();

        assert_eq!(
            binder.bind("apps/{appId}.json", Some("other")).unwrap_err(),
            BindError::DuplicatePath("apps/{appId}.json".to_string())
        );
        assert_eq!(
            binder
                .bind("settings.json", None)
                .unwrap()
                .to("app")
                .unwrap_err(),
            BindError::DuplicateProperty("app".to_string())
        );
        assert_eq!(binder.len(), 1);
    }

    async fn seeded_store() -> (Arc<MemoryBackend>, RecordStore<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let store = RecordStore::new(Arc::clone(&backend));
        for (key, value) in [
            (RecordKey::new("apps/app1.json"), json!({ "name": "first" })),
            (
                RecordKey::new("settings.json").in_container("config"),
                json!({ "theme": "dark" }),
            ),
        ] {
            store
                .optimistic_update(
                    &key,
                    |_: Value, _| {
                        let value = value.clone();
                        async move { Ok::<_, BoxError>(value) }
                    },
                    Duration::from_secs(5),
                )
                .await
                .unwrap();
        }
        (backend, store)
    }

    #[tokio::test]
    async fn it_resolves_bindings_through_the_store() {
        let (_backend, store) = seeded_store().await;

        let mut binder = RecordBinder::new();
        binder.bind("apps/{appId}.json", None).unwrap().to("app").unwrap();
        binder
            .bind("settings.json", Some("config"))
            .unwrap()
            .to("settings")
            .unwrap();
        binder.bind("users/{userId}.json", None).unwrap().to("user").unwrap();

        let bound = binder
            .resolve(&store, lookup(&[("appId", "app1"), ("userId", "7")]))
            .await;

        assert_eq!(bound["app"], json!({ "name": "first" }));
        assert_eq!(bound["settings"], json!({ "theme": "dark" }));
        assert_eq!(bound["user"], Value::Null);
    }

    #[tokio::test]
    async fn failed_reads_bind_null() {
        let (backend, store) = seeded_store().await;
        let mut binder = RecordBinder::new();
        binder.bind("apps/{appId}.json", None).unwrap().to("app").unwrap();

        backend.set_offline(true);
        let bound = binder.resolve(&store, lookup(&[("appId", "app1")])).await;
        assert_eq!(bound.get("app"), Some(&Value::Null));
    }
}
