//! Template lookup used to validate new requests

use convoy_core::TemplateId;
use std::collections::HashSet;

/// Source of known task templates
pub trait TemplateCatalog: Send + Sync {
    fn contains(&self, id: &TemplateId) -> bool;
}

/// Fixed in-memory set of templates
#[derive(Clone, Debug, Default)]
pub struct StaticTemplates {
    ids: HashSet<TemplateId>,
}

impl StaticTemplates {
    pub fn new<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(|id| TemplateId::new(id)).collect(),
        }
    }

    pub fn insert(&mut self, id: TemplateId) {
        self.ids.insert(id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl TemplateCatalog for StaticTemplates {
    fn contains(&self, id: &TemplateId) -> bool {
        self.ids.contains(id)
    }
}
