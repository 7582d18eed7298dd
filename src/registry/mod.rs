//! # Service Registration Module
//!
//! Announces the bridge's HTTP configuration interface over mDNS so the
//! bridge can be found on the LAN by name.
//!
//! Registration failure at startup is fatal (a bridge nobody can find or
//! reconfigure is useless); re-registration after a service-name change is
//! logged and retried on the next change, never fatal.

use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::info;

use crate::error::{EmonBridgeError, Result};

/// mDNS service type announced for the configuration interface
const SERVICE_TYPE: &str = "_http._tcp.local.";

/// Port the configuration interface listens on
const HTTP_PORT: u16 = 80;

/// Service-registration collaborator
pub trait ServiceRegistry: Send {
    /// Announce the service under `service_name`, replacing any previous
    /// announcement
    fn register(&mut self, service_name: &str) -> Result<()>;

    /// Withdraw the current announcement; a no-op when none is active
    fn unregister(&mut self) -> Result<()>;
}

/// mDNS-backed service registry
pub struct MdnsRegistry {
    daemon: ServiceDaemon,
    /// Full service name of the active registration, if any
    registered: Option<String>,
}

impl std::fmt::Debug for MdnsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MdnsRegistry")
            .field("registered", &self.registered)
            .finish_non_exhaustive()
    }
}

impl MdnsRegistry {
    /// Start the mDNS responder daemon
    ///
    /// # Errors
    ///
    /// Returns error if the responder cannot bind its sockets.
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| EmonBridgeError::ServiceRegistration(e.to_string()))?;
        Ok(Self {
            daemon,
            registered: None,
        })
    }
}

impl ServiceRegistry for MdnsRegistry {
    fn register(&mut self, service_name: &str) -> Result<()> {
        self.unregister()?;

        let host_name = format!("{}.local.", service_name);
        let service = ServiceInfo::new(
            SERVICE_TYPE,
            service_name,
            &host_name,
            "",
            HTTP_PORT,
            None::<std::collections::HashMap<String, String>>,
        )
        .map_err(|e| EmonBridgeError::ServiceRegistration(e.to_string()))?
        .enable_addr_auto();

        let fullname = service.get_fullname().to_string();
        self.daemon
            .register(service)
            .map_err(|e| EmonBridgeError::ServiceRegistration(e.to_string()))?;

        info!("Registered mDNS service {}", fullname);
        self.registered = Some(fullname);
        Ok(())
    }

    fn unregister(&mut self) -> Result<()> {
        if let Some(fullname) = self.registered.take() {
            self.daemon
                .unregister(&fullname)
                .map_err(|e| EmonBridgeError::ServiceRegistration(e.to_string()))?;
            info!("Unregistered mDNS service {}", fullname);
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Recording registry for tests
    #[derive(Clone, Default)]
    pub struct MockRegistry {
        pub registered_names: Arc<Mutex<Vec<String>>>,
        pub unregisters: Arc<Mutex<usize>>,
        pub fail_register: Arc<Mutex<bool>>,
    }

    impl ServiceRegistry for MockRegistry {
        fn register(&mut self, service_name: &str) -> Result<()> {
            if *self.fail_register.lock().unwrap() {
                return Err(EmonBridgeError::ServiceRegistration(
                    "mock registration failure".into(),
                ));
            }
            self.registered_names
                .lock()
                .unwrap()
                .push(service_name.to_string());
            Ok(())
        }

        fn unregister(&mut self) -> Result<()> {
            *self.unregisters.lock().unwrap() += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::MockRegistry;
    use super::*;

    #[test]
    fn test_mock_registry_records_names() {
        let mut registry = MockRegistry::default();
        registry.register("emond1").unwrap();
        registry.register("emond1-garage").unwrap();
        assert_eq!(
            *registry.registered_names.lock().unwrap(),
            vec!["emond1".to_string(), "emond1-garage".to_string()]
        );
    }

    #[test]
    fn test_mock_registry_failure_switch() {
        let mut registry = MockRegistry::default();
        *registry.fail_register.lock().unwrap() = true;
        assert!(registry.register("emond1").is_err());
    }
}
