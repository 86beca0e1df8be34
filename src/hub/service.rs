use super::error::HubError;
use crate::library::communication::Message;
use crate::library::helpers::lock;
use crate::library::BoxedError;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Function serving one method of a [`LocalService`]
///
/// Receives the request document and produces the response document. Returning an error makes
/// the caller observe a failed call.
pub type MethodHandler = Arc<dyn Fn(&Message) -> Result<Message, BoxedError> + Send + Sync>;

/// Service hosted by the current process
pub struct LocalService {
    name: String,
    owner: String,
    methods: Mutex<HashMap<String, MethodHandler>>,
}

impl LocalService {
    pub(crate) fn new(name: &str, owner: &str) -> Self {
        Self {
            name: name.to_owned(),
            owner: owner.to_owned(),
            methods: Mutex::new(HashMap::new()),
        }
    }

    /// Name under which the service is published
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Client id of the hosting process
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Adds a method, rejecting names that are already taken
    ///
    /// Methods registered after the service has been published are served but not advertised,
    /// callers only learn about the ones present when the service was added.
    pub fn register_method<F>(&self, method: &str, handler: F) -> Result<(), HubError>
    where
        F: Fn(&Message) -> Result<Message, BoxedError> + Send + Sync + 'static,
    {
        let mut methods = lock(&self.methods);

        if methods.contains_key(method) {
            return Err(HubError::DuplicateMethod {
                service: self.name.clone(),
                method: method.to_owned(),
            });
        }

        methods.insert(method.to_owned(), Arc::new(handler));

        Ok(())
    }

    /// Names of all registered methods in lexical order
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.methods).keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn handler(&self, method: &str) -> Option<MethodHandler> {
        lock(&self.methods).get(method).cloned()
    }
}

impl fmt::Debug for LocalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalService")
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("methods", &self.method_names())
            .finish()
    }
}

/// Snapshot of a service hosted by another process, as known to the daemon at lookup time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteService {
    name: String,
    methods: Vec<String>,
    owner: String,
}

impl RemoteService {
    pub(crate) fn new(name: &str, methods: Vec<String>, owner: &str) -> Self {
        Self {
            name: name.to_owned(),
            methods,
            owner: owner.to_owned(),
        }
    }

    /// Name of the service
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Advertised methods
    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    /// Client id of the hosting process
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Whether the method was advertised
    pub fn has_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}
