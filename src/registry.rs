//! Handle registry for the C ABI: maps integer handles to [`ObjectProxy`]s.
//!
//! Handles are monotonically increasing `isize` values starting from 1.
//! Handle 0 is reserved as the null/error sentinel.
//!
//! Dropping a proxy takes the GIL, so proxies are always dropped after the
//! registry lock is released. A thread holding the GIL may wait on the
//! registry lock but never the other way round.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{BridgeError, Result};
use crate::proxy::ObjectProxy;

/// Global handle registry, initialized by `pyb_init()`.
static REGISTRY: Mutex<Option<HandleRegistry>> = parking_lot::const_mutex(None);

struct HandleRegistry {
    objects: HashMap<isize, ObjectProxy>,
    next_id: isize,
}

impl HandleRegistry {
    fn new() -> Self {
        Self {
            objects: HashMap::new(),
            next_id: 1,
        }
    }
}

fn not_initialized() -> BridgeError {
    BridgeError::Configuration("handle registry not initialized, call pyb_init() first".to_string())
}

/// Initialize the registry. Existing handles survive a repeated call.
pub fn init_registry() {
    let mut guard = REGISTRY.lock();
    if guard.is_none() {
        *guard = Some(HandleRegistry::new());
    }
}

/// Destroy the registry, releasing every registered proxy.
pub fn destroy_registry() {
    let registry = REGISTRY.lock().take();
    drop(registry);
}

/// Register a proxy and return its handle.
pub fn insert(obj: ObjectProxy) -> Result<isize> {
    let mut guard = REGISTRY.lock();
    let reg = guard.as_mut().ok_or_else(not_initialized)?;
    let id = reg.next_id;
    reg.next_id = reg
        .next_id
        .checked_add(1)
        .ok_or_else(|| BridgeError::Configuration("handle counter overflow".to_string()))?;
    reg.objects.insert(id, obj);
    Ok(id)
}

/// The proxy behind `handle`. The handle stays valid.
pub fn get(handle: isize) -> Result<ObjectProxy> {
    let guard = REGISTRY.lock();
    let reg = guard.as_ref().ok_or_else(not_initialized)?;
    reg.objects
        .get(&handle)
        .cloned()
        .ok_or(BridgeError::InvalidHandle(handle))
}

/// Unregister `handle` and hand back its proxy.
pub fn remove(handle: isize) -> Result<ObjectProxy> {
    let mut guard = REGISTRY.lock();
    let reg = guard.as_mut().ok_or_else(not_initialized)?;
    reg.objects
        .remove(&handle)
        .ok_or(BridgeError::InvalidHandle(handle))
}

/// Number of live handles (for diagnostics).
pub fn len() -> Result<usize> {
    let guard = REGISTRY.lock();
    let reg = guard.as_ref().ok_or_else(not_initialized)?;
    Ok(reg.objects.len())
}
