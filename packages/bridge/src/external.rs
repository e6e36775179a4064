//! Host objects stored in the engine as external addresses
//!
//! The engine can only hold an integer payload, so the bridge keeps the real
//! object in an [`ExternalRegistry`] and hands the engine the registry key.
//! Each wrap takes one strong claim. The claim is released only by the
//! engine's discard callback, which runs at a collection checkpoint once the
//! address is no longer referenced or retained.
//!
//! # Example
//!
//! ```
//! use clipsrules::Session;
//! use std::rc::Rc;
//!
//! let mut session = Session::new();
//! let addr = session.create_external_address(Rc::new(String::from("payload")));
//! let back: Rc<String> = session.external_object(&addr).unwrap();
//! assert_eq!(back.as_str(), "payload");
//! ```

use crate::config::EXTERNAL_TYPE_NAME;
use crate::native::{ExternalAddressType, NativeEngine};
use crate::value::ExternalAddress;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Arena of host objects keyed by the payload handed to the engine
#[derive(Default)]
pub struct ExternalRegistry {
    next_key: u64,
    claims: HashMap<u64, Rc<dyn Any>>,
}

impl ExternalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a claim on an object, returning its payload key.
    pub fn insert(&mut self, object: Rc<dyn Any>) -> u64 {
        self.next_key += 1;
        let key = self.next_key;
        self.claims.insert(key, object);
        key
    }

    pub fn get(&self, key: u64) -> Option<Rc<dyn Any>> {
        self.claims.get(&key).cloned()
    }

    /// Give up the claim for a key.
    ///
    /// The claim is handed back so the caller can drop it outside any borrow
    /// of the registry.
    pub fn remove(&mut self, key: u64) -> Option<Rc<dyn Any>> {
        self.claims.remove(&key)
    }

    /// Number of objects still claimed
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

impl std::fmt::Debug for ExternalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalRegistry")
            .field("next_key", &self.next_key)
            .field("live", &self.claims.len())
            .finish()
    }
}

/// The registry plus the engine type code it was installed under
#[derive(Debug, Clone)]
pub struct ExternalBridge {
    registry: Rc<RefCell<ExternalRegistry>>,
    type_code: i32,
}

impl ExternalBridge {
    /// Install the external address type with the engine.
    ///
    /// The discard callback removes exactly one claim per call.
    pub fn install(native: &mut dyn NativeEngine) -> Self {
        let registry = Rc::new(RefCell::new(ExternalRegistry::new()));
        let callback_registry = Rc::clone(&registry);
        let type_code = native.install_external_address_type(ExternalAddressType {
            name: EXTERNAL_TYPE_NAME.to_string(),
            discard: Box::new(move |key| {
                let claim = callback_registry.borrow_mut().remove(key);
                match claim {
                    Some(object) => {
                        tracing::debug!(payload = key, "Discarding external object");
                        drop(object);
                        true
                    }
                    None => {
                        tracing::warn!(payload = key, "Discard for unknown external payload");
                        false
                    }
                }
            }),
        });
        tracing::debug!(type_code, "Installed external address type");
        Self {
            registry,
            type_code,
        }
    }

    pub fn type_code(&self) -> i32 {
        self.type_code
    }

    /// Wrap a host object in a new external address.
    pub fn wrap<T: Any>(&self, native: &mut dyn NativeEngine, object: Rc<T>) -> ExternalAddress {
        let key = self.registry.borrow_mut().insert(object);
        let id = native.create_external_address(key, self.type_code);
        ExternalAddress {
            id,
            type_code: self.type_code,
        }
    }

    /// Look up the host object behind an external address.
    ///
    /// `None` if the address belongs to another type, has been discarded, or
    /// wraps an object of a different Rust type. The claim is never touched.
    pub fn object<T: Any>(&self, native: &dyn NativeEngine, addr: &ExternalAddress) -> Option<Rc<T>> {
        let (type_code, key) = native.external_address(addr.id)?;
        if type_code != self.type_code {
            return None;
        }
        let object = self.registry.borrow().get(key)?;
        object.downcast::<T>().ok()
    }

    pub fn retain(&self, native: &mut dyn NativeEngine, addr: &ExternalAddress) {
        native.retain_external(addr.id);
    }

    pub fn release(&self, native: &mut dyn NativeEngine, addr: &ExternalAddress) {
        native.release_external(addr.id);
    }

    /// Number of host objects the registry still holds a claim on
    pub fn live(&self) -> usize {
        self.registry.borrow().len()
    }
}
