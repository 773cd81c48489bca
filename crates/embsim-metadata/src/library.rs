//! Registry of object templates, addressable by handle or ID.

use std::collections::BTreeMap;

use tracing::debug;

use crate::attributes::ObjectAttributes;

/// Object templates keyed by handle, with stable integer IDs.
///
/// Lookups hand out copies so instances never alias the registered template.
#[derive(Debug, Default, Clone)]
pub struct TemplateLibrary {
    templates: BTreeMap<String, ObjectAttributes>,
    handles_by_id: BTreeMap<i32, String>,
    next_id: i32,
}

impl TemplateLibrary {
    /// Empty library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template and return its ID.
    ///
    /// Re-registering an existing handle replaces the template and keeps its ID.
    pub fn register(&mut self, mut attributes: ObjectAttributes) -> i32 {
        let id = match self.templates.get(&attributes.handle) {
            Some(existing) => existing.id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        };
        attributes.id = id;
        debug!(handle = %attributes.handle, id, "registered object template");
        self.handles_by_id.insert(id, attributes.handle.clone());
        self.templates.insert(attributes.handle.clone(), attributes);
        id
    }

    /// Copy of the template with this handle.
    pub fn get_copy_by_handle(&self, handle: &str) -> Option<ObjectAttributes> {
        self.templates.get(handle).cloned()
    }

    /// Copy of the template with this ID.
    pub fn get_copy_by_id(&self, id: i32) -> Option<ObjectAttributes> {
        self.handles_by_id
            .get(&id)
            .and_then(|handle| self.get_copy_by_handle(handle))
    }

    /// Remove a template by handle.
    pub fn remove(&mut self, handle: &str) -> Option<ObjectAttributes> {
        let removed = self.templates.remove(handle)?;
        self.handles_by_id.remove(&removed.id);
        Some(removed)
    }

    /// Registered handles in sorted order.
    pub fn handles(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }

    /// Number of templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// True when no templates are registered.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
