use super::service::RemoteService;
use crate::library::helpers::lock;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

struct Entry {
    owner: String,
    methods: Vec<String>,
}

/// Daemon side registry of every published service
///
/// Service names are unique across all owners.
#[derive(Default)]
pub(crate) struct Directory {
    services: Mutex<HashMap<String, Entry>>,
}

impl Directory {
    /// Records a service, returning false if the name is taken by any owner
    pub fn add(&self, owner: &str, service: &str, methods: Vec<String>) -> bool {
        let mut services = lock(&self.services);

        if services.contains_key(service) {
            return false;
        }

        services.insert(
            service.to_owned(),
            Entry {
                owner: owner.to_owned(),
                methods,
            },
        );

        debug!(owner, service, "Published service");

        true
    }

    pub fn get(&self, service: &str) -> Option<RemoteService> {
        lock(&self.services)
            .get(service)
            .map(|entry| RemoteService::new(service, entry.methods.clone(), &entry.owner))
    }

    /// Drops every service of the owner, returning their names
    pub fn purge_owner(&self, owner: &str) -> Vec<String> {
        let mut services = lock(&self.services);
        let mut purged: Vec<String> = services
            .iter()
            .filter(|(_, entry)| entry.owner == owner)
            .map(|(name, _)| name.clone())
            .collect();

        for name in &purged {
            services.remove(name);
        }

        purged.sort();
        purged
    }

    pub fn len(&self) -> usize {
        lock(&self.services).len()
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn reject_names_taken_by_other_owners() {
        let directory = Directory::default();

        assert!(directory.add("a", "svc.sum", vec!["sum".into()]));
        assert!(!directory.add("b", "svc.sum", vec!["other".into()]));
        assert!(!directory.add("a", "svc.sum", vec!["sum".into()]));

        let service = directory.get("svc.sum").unwrap();
        assert_eq!(service.owner(), "a");
        assert_eq!(service.methods(), &["sum".to_owned()]);
    }

    #[test]
    fn purge_everything_of_an_owner() {
        let directory = Directory::default();
        directory.add("a", "svc.sum", vec![]);
        directory.add("a", "svc.diff", vec![]);
        directory.add("b", "svc.mul", vec![]);

        assert_eq!(
            directory.purge_owner("a"),
            vec!["svc.diff".to_owned(), "svc.sum".to_owned()]
        );
        assert!(directory.get("svc.sum").is_none());
        assert!(directory.get("svc.mul").is_some());
        assert_eq!(directory.len(), 1);
    }
}
