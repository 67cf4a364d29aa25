//! Provider registry and `Automatic` resolution.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::adapter::AdapterFactory;
use crate::id::ProviderId;

/// Known adapter factories, probed for availability on demand.
///
/// Availability warnings are emitted once per provider so a pipeline polling
/// the registry every settings update does not flood the log.
pub struct ProviderRegistry {
    factories: Vec<Arc<dyn AdapterFactory>>,
    warned: Mutex<HashSet<ProviderId>>,
}

impl ProviderRegistry {
    /// Registry over an explicit factory set.
    pub fn new(factories: Vec<Arc<dyn AdapterFactory>>) -> Self {
        Self {
            factories,
            warned: Mutex::new(HashSet::new()),
        }
    }

    /// Registry with every built-in provider.
    pub fn with_builtin() -> Self {
        Self::new(vec![Arc::new(crate::background::BackgroundFactory)])
    }

    /// Factory for a concrete provider id.
    pub fn factory(&self, id: ProviderId) -> Option<&Arc<dyn AdapterFactory>> {
        self.factories.iter().find(|f| f.id() == id)
    }

    /// Whether `id` names a registered, currently runnable provider.
    pub fn is_available(&self, id: ProviderId) -> bool {
        self.factory(id).is_some_and(|f| f.is_available())
    }

    /// Resolve a requested id to the concrete provider the pipeline should
    /// run, degrading to [`ProviderId::Invalid`] (pass-through) when nothing
    /// can serve the request.
    pub fn resolve(&self, requested: ProviderId) -> ProviderId {
        match requested {
            ProviderId::Invalid => ProviderId::Invalid,
            ProviderId::Automatic => {
                for id in ProviderId::PRIORITY {
                    if self.is_available(id) {
                        info!(provider = %id, "automatic provider selection");
                        return id;
                    }
                }
                self.warn_once(ProviderId::Automatic, "no matte provider is available");
                ProviderId::Invalid
            }
            concrete => {
                if self.is_available(concrete) {
                    concrete
                } else {
                    self.warn_once(concrete, "requested matte provider is not available");
                    ProviderId::Invalid
                }
            }
        }
    }

    fn warn_once(&self, id: ProviderId, message: &'static str) {
        if self.warned.lock().unwrap().insert(id) {
            warn!(provider = %id, message);
        }
    }
}
