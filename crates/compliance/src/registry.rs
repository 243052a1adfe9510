use std::collections::HashMap;
use std::sync::Arc;

use fiscalchain_core::{DomainError, SchemeId};

use crate::handler::ComplianceHandler;

/// Scheme-keyed lookup of compliance handlers.
///
/// Populated explicitly at startup. A scheme reaching the ledger without a
/// registered handler means the deployment is wired wrong, so resolution
/// failures are configuration errors, not bad requests.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<SchemeId, Arc<dyn ComplianceHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own scheme, replacing any previous one.
    pub fn register(&mut self, handler: Arc<dyn ComplianceHandler>) {
        self.handlers.insert(handler.scheme(), handler);
    }

    pub fn resolve(&self, scheme: &SchemeId) -> Result<Arc<dyn ComplianceHandler>, DomainError> {
        self.handlers.get(scheme).cloned().ok_or_else(|| {
            DomainError::configuration(format!(
                "no compliance handler registered for scheme {scheme}"
            ))
        })
    }

    pub fn schemes(&self) -> impl Iterator<Item = &SchemeId> {
        self.handlers.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("schemes", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestChainHandler;

    #[test]
    fn resolves_a_registered_scheme() {
        let scheme = SchemeId::new("verifactu").unwrap();
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(DigestChainHandler::new(scheme.clone())));

        let handler = registry.resolve(&scheme).unwrap();
        assert_eq!(handler.scheme(), scheme);
    }

    #[test]
    fn unknown_scheme_is_a_configuration_error() {
        let registry = HandlerRegistry::new();
        let err = registry
            .resolve(&SchemeId::new("ticketbai").unwrap())
            .unwrap_err();
        assert!(matches!(err, DomainError::Configuration(_)));
    }

    #[test]
    fn schemes_reflect_the_registered_handlers() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.schemes().count(), 0);

        let scheme = SchemeId::new("verifactu").unwrap();
        registry.register(Arc::new(DigestChainHandler::new(scheme.clone())));

        assert!(!registry.is_empty());
        let schemes: Vec<_> = registry.schemes().collect();
        assert_eq!(schemes, vec![&scheme]);
        assert!(format!("{registry:?}").contains("verifactu"));
    }

    #[test]
    fn registering_twice_replaces_the_handler() {
        let scheme = SchemeId::new("verifactu").unwrap();
        let mut registry = HandlerRegistry::new();
        let first = Arc::new(DigestChainHandler::new(scheme.clone()));
        let second = Arc::new(DigestChainHandler::new(scheme.clone()));
        registry.register(first);
        registry.register(second.clone());

        let resolved = registry.resolve(&scheme).unwrap();
        assert!(Arc::ptr_eq(
            &resolved,
            &(second as Arc<dyn ComplianceHandler>)
        ));
    }
}
