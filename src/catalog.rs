use std::collections::HashSet;
use std::sync::Arc;

use crate::error::CatalogError;

/// Process-wide set of valid event names.
///
/// The catalog is loaded once at startup from whatever configuration
/// source the host application uses, then passed explicitly to the
/// [`SubscriptionRegistry`](crate::SubscriptionRegistry) and
/// [`Dispatcher`](crate::Dispatcher). Nothing in this crate reads it
/// from ambient global state, so tests can construct synthetic
/// catalogs freely.
#[derive(Debug, Clone)]
pub struct EventCatalog {
    names: Arc<HashSet<String>>,
}

impl EventCatalog {
    /// Build a catalog from event names, failing fast on an empty or
    /// malformed list.
    pub fn new<I, S>(names: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = HashSet::new();
        for name in names {
            let name = name.into();
            if name.trim().is_empty() {
                return Err(CatalogError::BlankName);
            }
            set.insert(name);
        }

        if set.is_empty() {
            return Err(CatalogError::Empty);
        }

        Ok(Self { names: Arc::new(set) })
    }

    /// Membership check used at subscription creation and dispatch.
    pub fn contains(&self, event: &str) -> bool {
        self.names.contains(event)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_catalog() {
        let names: Vec<String> = Vec::new();
        assert_eq!(EventCatalog::new(names).unwrap_err(), CatalogError::Empty);
    }

    #[test]
    fn rejects_blank_event_name() {
        let err = EventCatalog::new(["order.created", "  "]).unwrap_err();
        assert_eq!(err, CatalogError::BlankName);
    }

    #[test]
    fn membership() {
        let catalog = EventCatalog::new(["order.created", "order.deleted"]).unwrap();
        assert!(catalog.contains("order.created"));
        assert!(!catalog.contains("user.created"));
        assert_eq!(catalog.len(), 2);
    }
}
