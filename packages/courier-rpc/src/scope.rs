//! Scope provider boundary and the built-in service container.
//!
//! A scope is one request-scoped lifetime: created by the dispatcher
//! before it touches any service, owned by exactly one worker, and torn
//! down exactly once after the response is produced. The provider owns
//! instance creation and disposal policy; `Drop` impls on service types
//! are the disposal mechanism.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

/// A resolved service instance, shared with the dispatch table's invokers.
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

/// Scope provider misuse or resolution failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("service {0:?} is not registered")]
    NotRegistered(String),
    #[error("scoped service {0:?} resolved without an active scope")]
    NoActiveScope(String),
    /// For providers carrying ambient per-context state; the built-in
    /// provider hands out scope values instead, so it never raises this.
    #[error("a scope is already active on this request context")]
    AlreadyActive,
    #[error("scope teardown failed: {0}")]
    Teardown(String),
}

/// Creates per-request scopes.
pub trait ScopeProvider: Send + Sync {
    /// Begins a new scope.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::AlreadyActive`] from providers that track an
    /// ambient scope per request context.
    fn begin_scope(&self) -> Result<Box<dyn ServiceScope>, ScopeError>;
}

/// One request-scoped lifetime, owned by exactly one worker.
pub trait ServiceScope: Send {
    /// Resolves a live instance for a service id within this scope.
    ///
    /// # Errors
    ///
    /// [`ScopeError::NotRegistered`] when the id has no binding;
    /// [`ScopeError::NoActiveScope`] when a scoped binding is resolved
    /// after [`ServiceScope::end`].
    fn resolve(&mut self, service: &str) -> Result<ServiceInstance, ScopeError>;

    /// Tears the scope down, disposing every scope-created instance.
    /// Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ScopeError::Teardown`] when disposal fails; the caller
    /// must report it separately and never let it replace the response.
    fn end(&mut self) -> Result<(), ScopeError>;
}

type Factory = Arc<dyn Fn() -> ServiceInstance + Send + Sync>;

#[derive(Clone)]
enum Registration {
    Singleton(ServiceInstance),
    Scoped(Factory),
    Transient(Factory),
}

/// Built-in container with singleton, scoped, and transient lifetimes.
///
/// Singletons are shared across all scopes; scoped instances are created
/// once per scope and dropped at teardown; transient instances are
/// created on every resolve.
#[derive(Default)]
pub struct DefaultScopeProvider {
    registrations: Arc<RwLock<HashMap<String, Registration>>>,
}

impl DefaultScopeProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a service id to one shared instance.
    pub fn register_singleton<S: Any + Send + Sync>(&self, service: &str, instance: S) {
        self.registrations.write().insert(
            service.to_string(),
            Registration::Singleton(Arc::new(instance)),
        );
    }

    /// Binds a service id to a factory invoked once per scope.
    pub fn register_scoped<S, F>(&self, service: &str, factory: F)
    where
        S: Any + Send + Sync,
        F: Fn() -> S + Send + Sync + 'static,
    {
        self.registrations.write().insert(
            service.to_string(),
            Registration::Scoped(Arc::new(move || Arc::new(factory()))),
        );
    }

    /// Binds a service id to a factory invoked on every resolve.
    pub fn register_transient<S, F>(&self, service: &str, factory: F)
    where
        S: Any + Send + Sync,
        F: Fn() -> S + Send + Sync + 'static,
    {
        self.registrations.write().insert(
            service.to_string(),
            Registration::Transient(Arc::new(move || Arc::new(factory()))),
        );
    }
}

impl ScopeProvider for DefaultScopeProvider {
    fn begin_scope(&self) -> Result<Box<dyn ServiceScope>, ScopeError> {
        Ok(Box::new(DefaultScope {
            registrations: Arc::clone(&self.registrations),
            cache: Some(HashMap::new()),
        }))
    }
}

struct DefaultScope {
    registrations: Arc<RwLock<HashMap<String, Registration>>>,
    /// `Some` while the scope is active; taken by `end()`.
    cache: Option<HashMap<String, ServiceInstance>>,
}

impl ServiceScope for DefaultScope {
    fn resolve(&mut self, service: &str) -> Result<ServiceInstance, ScopeError> {
        let registration = self
            .registrations
            .read()
            .get(service)
            .cloned()
            .ok_or_else(|| ScopeError::NotRegistered(service.to_string()))?;
        match registration {
            Registration::Singleton(instance) => Ok(instance),
            Registration::Transient(factory) => Ok(factory()),
            Registration::Scoped(factory) => {
                let cache = self
                    .cache
                    .as_mut()
                    .ok_or_else(|| ScopeError::NoActiveScope(service.to_string()))?;
                Ok(Arc::clone(
                    cache.entry(service.to_string()).or_insert_with(|| factory()),
                ))
            }
        }
    }

    fn end(&mut self) -> Result<(), ScopeError> {
        // Dropping the cache drops every scope-created instance exactly
        // once; a second call finds nothing and is a no-op.
        self.cache.take();
        Ok(())
    }
}

impl Drop for DefaultScope {
    fn drop(&mut self) {
        self.cache.take();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct Probe {
        drops: Arc<AtomicU32>,
    }

    impl Drop for Probe {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn as_probe(instance: &ServiceInstance) -> &Probe {
        instance.downcast_ref::<Probe>().unwrap()
    }

    #[test]
    fn singleton_is_shared_across_scopes() {
        let provider = DefaultScopeProvider::new();
        provider.register_singleton("svc", 42u32);

        let mut a = provider.begin_scope().unwrap();
        let mut b = provider.begin_scope().unwrap();
        let ia = a.resolve("svc").unwrap();
        let ib = b.resolve("svc").unwrap();
        assert!(Arc::ptr_eq(&ia, &ib));
    }

    #[test]
    fn scoped_is_cached_per_scope_and_fresh_across_scopes() {
        let provider = DefaultScopeProvider::new();
        let made = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&made);
        provider.register_scoped("svc", move || {
            counter.fetch_add(1, Ordering::SeqCst)
        });

        let mut scope = provider.begin_scope().unwrap();
        let first = scope.resolve("svc").unwrap();
        let second = scope.resolve("svc").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(made.load(Ordering::SeqCst), 1);

        let mut other = provider.begin_scope().unwrap();
        other.resolve("svc").unwrap();
        assert_eq!(made.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn transient_is_fresh_on_every_resolve() {
        let provider = DefaultScopeProvider::new();
        let made = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&made);
        provider.register_transient("svc", move || {
            counter.fetch_add(1, Ordering::SeqCst)
        });

        let mut scope = provider.begin_scope().unwrap();
        scope.resolve("svc").unwrap();
        scope.resolve("svc").unwrap();
        assert_eq!(made.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unregistered_id_is_reported() {
        let provider = DefaultScopeProvider::new();
        let mut scope = provider.begin_scope().unwrap();
        assert!(matches!(
            scope.resolve("missing"),
            Err(ScopeError::NotRegistered(_))
        ));
    }

    #[test]
    fn scoped_resolve_after_end_fails() {
        let provider = DefaultScopeProvider::new();
        provider.register_scoped("svc", || 1u8);
        let mut scope = provider.begin_scope().unwrap();
        scope.end().unwrap();
        assert!(matches!(
            scope.resolve("svc"),
            Err(ScopeError::NoActiveScope(_))
        ));
    }

    #[test]
    fn singleton_resolves_even_after_end() {
        let provider = DefaultScopeProvider::new();
        provider.register_singleton("svc", 7u8);
        let mut scope = provider.begin_scope().unwrap();
        scope.end().unwrap();
        assert!(scope.resolve("svc").is_ok());
    }

    #[test]
    fn end_disposes_scoped_instances_exactly_once() {
        let drops = Arc::new(AtomicU32::new(0));
        let provider = DefaultScopeProvider::new();
        let probe_drops = Arc::clone(&drops);
        provider.register_scoped("svc", move || Probe {
            drops: Arc::clone(&probe_drops),
        });

        let mut scope = provider.begin_scope().unwrap();
        let held = scope.resolve("svc").unwrap();
        assert_eq!(as_probe(&held).drops.load(Ordering::SeqCst), 0);
        drop(held);

        scope.end().unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        // Idempotence: a second end has the same observable effect as one.
        scope.end().unwrap();
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
