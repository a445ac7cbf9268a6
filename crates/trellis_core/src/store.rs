//! Template Store
//!
//! Thread-safe registry of named templates, shared between scenes. External
//! templates are registered with a [`FetchSpec`] and completed by name once
//! the fetch collaborator delivers (or gives up on) their body.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::errors::{Result, SceneError};
use crate::field::FieldDecl;
use crate::template::{FetchSpec, LoadState, Template, TemplateBody};

/// Seam to the resource fetch collaborator.
///
/// `fetch` is called once per external template, when the first scene asks
/// for it. The implementation completes the template later through
/// [`Template::on_resolved`] / [`Template::on_failed`] (or the
/// [`TemplateStore`] equivalents), from any thread.
pub trait TemplateFetcher: Send + Sync {
    fn fetch(&self, template: Arc<Template>);
}

/// Fetcher that only records requests. The application drains it with
/// [`FetchQueue::take`] and performs the fetches on its own schedule.
#[derive(Default)]
pub struct FetchQueue {
    queue: Mutex<Vec<Arc<Template>>>,
}

impl FetchQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes every request recorded so far.
    pub fn take(&self) -> Vec<Arc<Template>> {
        std::mem::take(&mut *self.queue.lock())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl TemplateFetcher for FetchQueue {
    fn fetch(&self, template: Arc<Template>) {
        log::debug!("Queued fetch of {}", template.name());
        self.queue.lock().push(template);
    }
}

/// Thread-safe registry of parsed templates, keyed by name.
#[derive(Default)]
pub struct TemplateStore {
    inner: RwLock<FxHashMap<String, Arc<Template>>>,
}

impl TemplateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// [Write] Registers an inline template. A previous definition with the
    /// same name is replaced; instances already built keep the old one.
    pub fn define_template(
        &self,
        name: &str,
        fields: Vec<FieldDecl>,
        body: TemplateBody,
    ) -> Arc<Template> {
        let template = Template::new(name, fields, body);
        self.insert(Arc::clone(&template));
        template
    }

    /// [Write] Registers an external template in the `Unresolved` state.
    pub fn define_external_template(
        &self,
        name: &str,
        fields: Vec<FieldDecl>,
        fetch: FetchSpec,
    ) -> Arc<Template> {
        let template = Template::external(name, fields, fetch);
        self.insert(Arc::clone(&template));
        template
    }

    /// [Write] Registers an already-built template, returning the one it replaced.
    pub fn insert(&self, template: Arc<Template>) -> Option<Arc<Template>> {
        let name = template.name().to_string();
        let previous = self.inner.write().insert(name, template);
        if let Some(previous) = &previous {
            log::debug!("Template {} redefined", previous.name());
        }
        previous
    }

    /// [Read]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Template>> {
        self.inner.read().get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// External templates currently being fetched.
    #[must_use]
    pub fn loading(&self) -> Vec<Arc<Template>> {
        self.inner
            .read()
            .values()
            .filter(|t| t.load_state() == LoadState::Loading)
            .cloned()
            .collect()
    }

    /// Completes the external template `name` with its fetched body.
    /// Returns `Ok(false)` if it had already completed.
    pub fn on_resolved(&self, name: &str, body: TemplateBody) -> Result<bool> {
        Ok(self.external(name)?.on_resolved(body))
    }

    /// Completes the external template `name` as failed.
    pub fn on_failed(&self, name: &str, reason: &str) -> Result<bool> {
        Ok(self.external(name)?.on_failed(reason))
    }

    fn external(&self, name: &str) -> Result<Arc<Template>> {
        let template = self
            .get(name)
            .ok_or_else(|| SceneError::ExternalResolutionFailure {
                template: name.to_string(),
                reason: "no such template".to_string(),
            })?;
        if !template.is_external() {
            return Err(SceneError::InvalidUse(format!(
                "template {name} is not external"
            )));
        }
        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateNode;

    fn body() -> TemplateBody {
        let mut body = TemplateBody::new();
        body.add_root(TemplateNode::builtin("Sphere"));
        body
    }

    #[test]
    fn test_define_and_get() {
        let store = TemplateStore::new();
        store.define_template("Ball", Vec::new(), body());
        store.define_external_template("Far", Vec::new(), FetchSpec::new(["far.wrl#Far"]));

        assert_eq!(store.names(), vec!["Ball".to_string(), "Far".to_string()]);
        assert!(!store.get("Ball").unwrap().is_external());
        assert_eq!(store.get("Far").unwrap().load_state(), LoadState::Unresolved);
        assert!(store.get("Nope").is_none());
    }

    #[test]
    fn test_redefinition_replaces() {
        let store = TemplateStore::new();
        let first = store.define_template("Ball", Vec::new(), body());
        let second = store.define_template("Ball", Vec::new(), TemplateBody::new());

        assert_eq!(store.len(), 1);
        let current = store.get("Ball").unwrap();
        assert!(Arc::ptr_eq(&current, &second));
        assert!(!Arc::ptr_eq(&current, &first));
    }

    #[test]
    fn test_completion_by_name() {
        let store = TemplateStore::new();
        store.define_template("Ball", Vec::new(), body());
        store.define_external_template("Far", Vec::new(), FetchSpec::new(["far.wrl"]));

        assert!(store.on_failed("Far", "offline").unwrap());
        assert!(!store.on_failed("Far", "again").unwrap());
        assert!(matches!(
            store.on_resolved("Ball", body()),
            Err(SceneError::InvalidUse(_))
        ));
        assert!(matches!(
            store.on_resolved("Missing", body()),
            Err(SceneError::ExternalResolutionFailure { .. })
        ));
    }

    #[test]
    fn test_fetch_queue_drains() {
        let queue = FetchQueue::new();
        let t = Template::external("Far", Vec::new(), FetchSpec::new(["far.wrl"]));
        queue.fetch(Arc::clone(&t));
        assert_eq!(queue.len(), 1);

        let taken = queue.take();
        assert!(Arc::ptr_eq(&taken[0], &t));
        assert!(queue.is_empty());
    }
}
