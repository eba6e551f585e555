//! Process-wide component type ids
//!
//! Each concrete component type receives a small integer the first time it is
//! asked for. Ids come from one shared counter that starts at 0 and is never
//! reset, so a type maps to the same id for the whole life of the process no
//! matter which crate asks. Ids differ between runs and must not be persisted.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{OnceLock, PoisonError, RwLock};

static NEXT_ID: AtomicU32 = AtomicU32::new(0);
static IDS: OnceLock<RwLock<HashMap<TypeId, ComponentTypeId>>> = OnceLock::new();

/// Small integer identifying a component type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentTypeId(u32);

impl ComponentTypeId {
    /// Id of `T`, allocating one on first use
    pub fn of<T: ?Sized + 'static>() -> Self {
        TypeRegistry::id_for::<T>()
    }

    /// Raw integer value
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ComponentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Assigns component type ids
pub struct TypeRegistry;

impl TypeRegistry {
    /// Id for `T`
    pub fn id_for<T: ?Sized + 'static>() -> ComponentTypeId {
        let key = TypeId::of::<T>();
        let ids = IDS.get_or_init(|| RwLock::new(HashMap::new()));

        // The map only ever grows, so a poisoned lock still holds valid data.
        if let Some(id) = ids.read().unwrap_or_else(PoisonError::into_inner).get(&key) {
            return *id;
        }

        let mut ids = ids.write().unwrap_or_else(PoisonError::into_inner);
        *ids.entry(key).or_insert_with(|| {
            let id = ComponentTypeId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
            log::trace!("Registered component type {} as {}", std::any::type_name::<T>(), id);
            id
        })
    }

    /// Number of ids handed out so far
    pub fn registered_count() -> u32 {
        NEXT_ID.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Alpha;
    struct Beta;

    #[test]
    fn test_repeated_lookup_is_stable() {
        let first = TypeRegistry::id_for::<Alpha>();
        let second = TypeRegistry::id_for::<Alpha>();
        assert_eq!(first, second);
        assert_eq!(ComponentTypeId::of::<Alpha>(), first);
    }

    #[test]
    fn test_distinct_types_get_distinct_ids() {
        assert_ne!(TypeRegistry::id_for::<Alpha>(), TypeRegistry::id_for::<Beta>());
    }

    #[test]
    fn test_ids_are_below_counter() {
        let id = TypeRegistry::id_for::<Beta>();
        assert!(id.value() < TypeRegistry::registered_count());
    }

    #[test]
    fn test_stable_across_threads() {
        let here = TypeRegistry::id_for::<Alpha>();
        let there = std::thread::spawn(TypeRegistry::id_for::<Alpha>).join().unwrap();
        assert_eq!(here, there);
    }
}
