//! Module Registry
//!
//! The live map from `(kind, capability, discriminator)` to instantiated
//! module; the single source of truth for what is currently loaded.
//!
//! Every mutation is one short critical section, so readers see either the
//! state before or after it. Replacing a module is staged: the new entry is
//! loaded and started next to the old one, and [`ModuleRegistry::commit`]
//! swaps them in one step. A lookup during a reload therefore returns the old
//! or the new instance, never nothing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use adc_core::error::RegistryError;
use adc_core::{
    CapabilityId, EntryStatus, Instance, InstanceId, LifecycleToken, ModuleHandle, ModuleKind,
    SymbolTable, Version,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryKey {
    pub kind: ModuleKind,
    pub capability: CapabilityId,
    pub discriminator: Option<Arc<str>>,
}

impl RegistryKey {
    pub fn new(kind: ModuleKind, capability: CapabilityId, discriminator: Option<&str>) -> Self {
        Self {
            kind,
            capability,
            discriminator: discriminator.map(Arc::from),
        }
    }
}

/// Where an entry's instance came from.
#[derive(Debug, Clone)]
pub struct ModuleOrigin {
    pub version: Version,
    pub language: String,
    pub path: PathBuf,
    pub load_seq: u64,
}

/// Proof of a pending registration, returned by [`ModuleRegistry::reserve`].
#[derive(Debug, Clone)]
pub struct Reservation {
    key: RegistryKey,
    id: InstanceId,
    staged: bool,
}

impl Reservation {
    pub fn key(&self) -> &RegistryKey {
        &self.key
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Whether this reservation replaces an existing entry.
    pub fn is_replacement(&self) -> bool {
        self.staged
    }
}

/// An entry taken out of service by a commit, to be stopped by the caller.
#[derive(Debug)]
pub struct Retired {
    pub id: InstanceId,
    pub handle: Option<ModuleHandle>,
}

struct Entry {
    id: InstanceId,
    seq: u64,
    explicit_default: bool,
    status: EntryStatus,
    handle: Option<ModuleHandle>,
    origin: Option<ModuleOrigin>,
    registered_at: DateTime<Utc>,
}

impl Entry {
    fn retire(self) -> Retired {
        Retired {
            id: self.id,
            handle: self.handle,
        }
    }
}

struct Slot {
    active: Entry,
    staged: Option<Entry>,
}

type DefaultKey = (ModuleKind, CapabilityId);

#[derive(Default)]
struct RegistryState {
    slots: HashMap<RegistryKey, Slot>,
    defaults: HashMap<DefaultKey, Option<Arc<str>>>,
    next_seq: u64,
}

impl RegistryState {
    /// Re-pick the default for a capability after its default entry left.
    fn elect_default(&mut self, pair: DefaultKey) {
        let candidate = self
            .slots
            .iter()
            .filter(|(key, _)| key.kind == pair.0 && key.capability == pair.1)
            .min_by_key(|(_, slot)| (!slot.active.explicit_default, slot.active.seq))
            .map(|(key, _)| key.discriminator.clone());

        match candidate {
            Some(discriminator) => {
                self.defaults.insert(pair, discriminator);
            }
            None => {
                self.defaults.remove(&pair);
            }
        }
    }

    fn remove_slot(&mut self, key: &RegistryKey) -> Option<Slot> {
        let slot = self.slots.remove(key)?;
        let pair = (key.kind, key.capability);
        if self.defaults.get(&pair) == Some(&key.discriminator) {
            self.elect_default(pair);
        }
        Some(slot)
    }
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    pub kind: ModuleKind,
    pub name: String,
    pub discriminator: Option<String>,
    pub status: EntryStatus,
    pub instance_id: String,
    pub is_default: bool,
    pub version: Option<String>,
    pub language: Option<String>,
    pub load_seq: Option<u64>,
    pub registered_at: DateTime<Utc>,
    pub reload_pending: bool,
}

/// The live module registry.
pub struct ModuleRegistry {
    symbols: Arc<SymbolTable>,
    state: RwLock<RegistryState>,
}

impl ModuleRegistry {
    pub fn new(symbols: Arc<SymbolTable>) -> Self {
        Self {
            symbols,
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    /// Build a key, interning `name`.
    pub fn key(&self, kind: ModuleKind, name: &str, discriminator: Option<&str>) -> RegistryKey {
        RegistryKey::new(kind, self.symbols.intern(name), discriminator)
    }

    /// Create a `loading` entry for `key`.
    ///
    /// Fails with `DuplicateRegistration` if an active entry exists, unless
    /// `replace` is set, in which case the new entry is staged beside it.
    pub fn reserve(
        &self,
        key: RegistryKey,
        is_default: bool,
        replace: bool,
    ) -> Result<Reservation, RegistryError> {
        let mut state = self.state.write();
        let seq = state.next_seq;
        state.next_seq += 1;

        let entry = Entry {
            id: InstanceId::new(),
            seq,
            explicit_default: is_default,
            status: EntryStatus::Loading,
            handle: None,
            origin: None,
            registered_at: Utc::now(),
        };
        let id = entry.id;

        if let Some(slot) = state.slots.get_mut(&key) {
            if !replace || slot.staged.is_some() {
                return Err(RegistryError::DuplicateRegistration {
                    kind: key.kind,
                    capability: self.describe(&key),
                });
            }
            slot.staged = Some(entry);
            debug!(capability = %self.describe(&key), "Staged replacement entry");
            return Ok(Reservation {
                key,
                id,
                staged: true,
            });
        }

        let pair = (key.kind, key.capability);
        let explicit_default_exists = state
            .slots
            .iter()
            .any(|(k, slot)| {
                k.kind == key.kind && k.capability == key.capability && slot.active.explicit_default
            });
        if (is_default && !explicit_default_exists) || !state.defaults.contains_key(&pair) {
            state.defaults.insert(pair, key.discriminator.clone());
        }

        state.slots.insert(
            key.clone(),
            Slot {
                active: entry,
                staged: None,
            },
        );

        Ok(Reservation {
            key,
            id,
            staged: false,
        })
    }

    /// Attach the loaded instance to a reservation.
    pub fn attach(&self, reservation: &Reservation, handle: ModuleHandle, origin: ModuleOrigin) {
        let mut state = self.state.write();
        if let Some(entry) = Self::entry_mut(&mut state, reservation) {
            entry.handle = Some(handle);
            entry.origin = Some(origin);
        }
    }

    /// Mark a reservation `ready`.
    ///
    /// For a staged replacement this atomically promotes the new entry and
    /// returns the previous one, which the caller must stop.
    pub fn commit(&self, reservation: &Reservation) -> Result<Option<Retired>, RegistryError> {
        let mut state = self.state.write();
        let slot = state
            .slots
            .get_mut(&reservation.key)
            .ok_or_else(|| self.not_found(&reservation.key))?;

        if !reservation.staged {
            if slot.active.id != reservation.id || slot.active.status != EntryStatus::Loading {
                return Err(self.not_found(&reservation.key));
            }
            slot.active.status = EntryStatus::Ready;
            info!(capability = %self.describe(&reservation.key), kind = %reservation.key.kind, "Registered module");
            return Ok(None);
        }

        if slot.active.status == EntryStatus::Stopping {
            // Being unregistered; the staged entry goes with it.
            return Err(self.not_found(&reservation.key));
        }

        match slot.staged.take() {
            Some(mut staged) if staged.id == reservation.id => {
                staged.status = EntryStatus::Ready;
                staged.explicit_default |= slot.active.explicit_default;
                let mut old = std::mem::replace(&mut slot.active, staged);
                old.status = EntryStatus::Stopping;
                info!(capability = %self.describe(&reservation.key), kind = %reservation.key.kind, "Swapped module instance");
                Ok(Some(old.retire()))
            }
            other => {
                slot.staged = other;
                Err(self.not_found(&reservation.key))
            }
        }
    }

    /// Drop a reservation that failed to load or start.
    ///
    /// A failed replacement leaves the active entry untouched.
    pub fn abandon(&self, reservation: &Reservation) -> Option<Retired> {
        let mut state = self.state.write();

        if reservation.staged {
            let slot = state.slots.get_mut(&reservation.key)?;
            if slot.staged.as_ref().map(|e| e.id) == Some(reservation.id) {
                return slot.staged.take().map(Entry::retire);
            }
            return None;
        }

        let owned = state
            .slots
            .get(&reservation.key)
            .map_or(false, |slot| slot.active.id == reservation.id);
        if !owned {
            return None;
        }
        state
            .remove_slot(&reservation.key)
            .map(|slot| slot.active.retire())
    }

    /// Resolve a lookup to a ready module handle.
    ///
    /// Without a discriminator the capability's default entry is used, then
    /// an undiscriminated one.
    pub fn lookup_handle(
        &self,
        kind: ModuleKind,
        capability: CapabilityId,
        discriminator: Option<&str>,
    ) -> Result<ModuleHandle, RegistryError> {
        let state = self.state.read();
        let key = match discriminator {
            Some(_) => RegistryKey::new(kind, capability, discriminator),
            None => match state.defaults.get(&(kind, capability)) {
                Some(default) => RegistryKey {
                    kind,
                    capability,
                    discriminator: default.clone(),
                },
                None => RegistryKey::new(kind, capability, None),
            },
        };
        self.ready_handle(&state, &key)
    }

    /// Discriminator of the default entry for a capability, if it has entries.
    pub fn default_discriminator(&self, kind: ModuleKind, capability: CapabilityId) -> Option<Option<Arc<str>>> {
        self.state.read().defaults.get(&(kind, capability)).cloned()
    }

    /// Instance of the ready entry at exactly `key`, with no default resolution.
    pub fn lookup_exact(&self, key: &RegistryKey) -> Result<Instance, RegistryError> {
        let handle = self.ready_handle(&self.state.read(), key)?;
        handle.instance().ok_or_else(|| self.not_found(key))
    }

    fn ready_handle(&self, state: &RegistryState, key: &RegistryKey) -> Result<ModuleHandle, RegistryError> {
        let slot = state.slots.get(key).ok_or_else(|| self.not_found(key))?;
        match (&slot.active.status, &slot.active.handle) {
            (EntryStatus::Ready, Some(handle)) => Ok(handle.clone()),
            (status, _) => Err(RegistryError::CapabilityNotReady {
                kind: key.kind,
                capability: self.describe(key),
                status: *status,
            }),
        }
    }

    /// Resolve a lookup to the component's instance.
    pub fn lookup(
        &self,
        kind: ModuleKind,
        capability: CapabilityId,
        discriminator: Option<&str>,
    ) -> Result<Instance, RegistryError> {
        let handle = self.lookup_handle(kind, capability, discriminator)?;
        handle.instance().ok_or_else(|| RegistryError::CapabilityNotFound {
            kind,
            capability: self.symbols.describe(capability),
        })
    }

    /// Stop and remove an entry. Returns `false` if nothing was registered.
    ///
    /// Only a ready entry is stopped here. An entry still loading, or a
    /// staged replacement, belongs to the load in flight: its commit fails
    /// once the slot is gone and the loader stops what it started. Stop
    /// failures and timeouts are logged; the entry is removed regardless.
    pub async fn unregister(&self, key: &RegistryKey, token: &LifecycleToken, timeout: Duration) -> bool {
        let handle = {
            let mut state = self.state.write();
            let Some(slot) = state.slots.get_mut(key) else {
                return false;
            };
            if slot.active.status == EntryStatus::Ready {
                slot.active.status = EntryStatus::Stopping;
                slot.active.handle.clone()
            } else {
                None
            }
        };

        if let Some(handle) = handle {
            let capability = self.describe(key);
            match tokio::time::timeout(timeout, handle.stop(token)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(capability = %capability, error = %e, "Module stop failed"),
                Err(_) => warn!(capability = %capability, "Module stop timed out"),
            }
        }

        let removed = self.state.write().remove_slot(key);
        if let Some(slot) = removed {
            if slot.active.status != EntryStatus::Stopping {
                debug!(instance = %slot.active.id, "Removed entry that was still loading");
            }
            if let Some(staged) = slot.staged {
                debug!(instance = %staged.id, "Removed staged entry of unregistered module");
            }
            info!(capability = %self.describe(key), kind = %key.kind, "Unregistered module");
        }
        true
    }

    pub fn status(&self, key: &RegistryKey) -> Option<EntryStatus> {
        self.state.read().slots.get(key).map(|slot| slot.active.status)
    }

    /// Origin of the active entry at `key`.
    pub fn origin(&self, key: &RegistryKey) -> Option<ModuleOrigin> {
        self.state
            .read()
            .slots
            .get(key)
            .and_then(|slot| slot.active.origin.clone())
    }

    pub fn instance_id(&self, key: &RegistryKey) -> Option<InstanceId> {
        self.state.read().slots.get(key).map(|slot| slot.active.id)
    }

    /// Whether the entry at `key` is the one returned without a discriminator.
    pub fn is_default(&self, key: &RegistryKey) -> bool {
        self.state.read().defaults.get(&(key.kind, key.capability)) == Some(&key.discriminator)
    }

    pub fn contains(&self, key: &RegistryKey) -> bool {
        self.state.read().slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries, in registration order.
    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        let state = self.state.read();
        let mut entries: Vec<(u64, EntrySnapshot)> = state
            .slots
            .iter()
            .map(|(key, slot)| {
                let entry = &slot.active;
                let origin = entry.origin.as_ref();
                let snapshot = EntrySnapshot {
                    kind: key.kind,
                    name: self.describe_capability(key.capability),
                    discriminator: key.discriminator.as_deref().map(str::to_string),
                    status: entry.status,
                    instance_id: entry.id.to_string(),
                    is_default: state.defaults.get(&(key.kind, key.capability)) == Some(&key.discriminator),
                    version: origin.map(|o| o.version.to_string()),
                    language: origin.map(|o| o.language.clone()),
                    load_seq: origin.map(|o| o.load_seq),
                    registered_at: entry.registered_at,
                    reload_pending: slot.staged.is_some(),
                };
                (entry.seq, snapshot)
            })
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, snapshot)| snapshot).collect()
    }

    fn entry_mut<'a>(state: &'a mut RegistryState, reservation: &Reservation) -> Option<&'a mut Entry> {
        let slot = state.slots.get_mut(&reservation.key)?;
        let entry = if reservation.staged {
            slot.staged.as_mut()?
        } else {
            &mut slot.active
        };
        (entry.id == reservation.id).then_some(entry)
    }

    fn describe_capability(&self, capability: CapabilityId) -> String {
        self.symbols.describe(capability)
    }

    fn describe(&self, key: &RegistryKey) -> String {
        let name = self.describe_capability(key.capability);
        match &key.discriminator {
            Some(d) => format!("{}#{}", name, d),
            None => name,
        }
    }

    fn not_found(&self, key: &RegistryKey) -> RegistryError {
        RegistryError::CapabilityNotFound {
            kind: key.kind,
            capability: self.describe(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adc_core::{Component, Lifecycle};

    struct Value(&'static str);

    impl Lifecycle for Value {}

    impl Component for Value {
        fn get_instance(&self) -> Instance {
            Arc::new(self.0)
        }
    }

    fn origin() -> ModuleOrigin {
        ModuleOrigin {
            version: Version::new(1, 0, 0),
            language: "rust".to_string(),
            path: PathBuf::from("/modules/providers/cache/1.0.0-rust"),
            load_seq: 1,
        }
    }

    fn register(
        registry: &ModuleRegistry,
        name: &str,
        discriminator: Option<&str>,
        is_default: bool,
        value: &'static str,
    ) -> Reservation {
        let key = registry.key(ModuleKind::Provider, name, discriminator);
        let reservation = registry.reserve(key, is_default, false).unwrap();
        registry.attach(&reservation, ModuleHandle::component(Value(value)), origin());
        registry.commit(&reservation).unwrap();
        reservation
    }

    fn read(registry: &ModuleRegistry, name: &str, discriminator: Option<&str>) -> &'static str {
        let capability = registry.symbols().intern(name);
        let instance = registry
            .lookup(ModuleKind::Provider, capability, discriminator)
            .unwrap();
        *instance.downcast_ref::<&'static str>().unwrap()
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = ModuleRegistry::new(Arc::new(SymbolTable::new()));
        register(&registry, "storage", None, false, "a");

        let key = registry.key(ModuleKind::Provider, "storage", None);
        let err = registry.reserve(key, false, false).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateRegistration { .. }));
    }

    #[test]
    fn test_loading_entry_is_not_ready() {
        let registry = ModuleRegistry::new(Arc::new(SymbolTable::new()));
        let key = registry.key(ModuleKind::Service, "billing", None);
        let capability = key.capability;
        let reservation = registry.reserve(key, false, false).unwrap();

        let err = registry
            .lookup(ModuleKind::Service, capability, None)
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::CapabilityNotReady {
                status: EntryStatus::Loading,
                ..
            }
        ));

        registry.abandon(&reservation);
        let err = registry
            .lookup(ModuleKind::Service, capability, None)
            .unwrap_err();
        assert!(matches!(err, RegistryError::CapabilityNotFound { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_explicit_default_wins() {
        let registry = ModuleRegistry::new(Arc::new(SymbolTable::new()));
        register(&registry, "cache", Some("memory"), false, "memory");
        register(&registry, "cache", Some("redis"), true, "redis");

        assert_eq!(read(&registry, "cache", None), "redis");
        assert_eq!(read(&registry, "cache", Some("memory")), "memory");
    }

    #[test]
    fn test_first_registered_is_default_and_reelected() {
        let registry = ModuleRegistry::new(Arc::new(SymbolTable::new()));
        let first = register(&registry, "cache", Some("memory"), false, "memory");
        register(&registry, "cache", Some("disk"), false, "disk");
        assert_eq!(read(&registry, "cache", None), "memory");

        let retired = registry.abandon(&first);
        assert!(retired.is_some());
        assert_eq!(read(&registry, "cache", None), "disk");
    }

    #[test]
    fn test_staged_replace_keeps_old_until_commit() {
        let registry = ModuleRegistry::new(Arc::new(SymbolTable::new()));
        let first = register(&registry, "cache", None, false, "v1");

        let key = registry.key(ModuleKind::Provider, "cache", None);
        let staged = registry.reserve(key.clone(), false, true).unwrap();
        assert!(staged.is_replacement());
        registry.attach(&staged, ModuleHandle::component(Value("v2")), origin());

        assert_eq!(read(&registry, "cache", None), "v1");
        assert_eq!(registry.status(&key), Some(EntryStatus::Ready));

        let retired = registry.commit(&staged).unwrap().unwrap();
        assert_eq!(retired.id, first.id());
        assert_eq!(read(&registry, "cache", None), "v2");
        assert_eq!(registry.instance_id(&key), Some(staged.id()));
    }

    #[test]
    fn test_failed_replacement_leaves_active_entry() {
        let registry = ModuleRegistry::new(Arc::new(SymbolTable::new()));
        register(&registry, "cache", None, false, "v1");

        let key = registry.key(ModuleKind::Provider, "cache", None);
        let staged = registry.reserve(key, false, true).unwrap();
        assert!(registry.abandon(&staged).is_some());
        assert_eq!(read(&registry, "cache", None), "v1");
    }

    #[tokio::test]
    async fn test_unregister_tolerates_absence() {
        let registry = ModuleRegistry::new(Arc::new(SymbolTable::new()));
        register(&registry, "queue", None, false, "q");
        let key = registry.key(ModuleKind::Provider, "queue", None);
        let token = LifecycleToken::detached();

        assert_eq!(registry.status(&key), Some(EntryStatus::Ready));
        assert!(registry.unregister(&key, &token, Duration::from_secs(1)).await);
        // Removed once stopped; no entry lingers in a stopped state.
        assert_eq!(registry.status(&key), None);
        assert!(!registry.unregister(&key, &token, Duration::from_secs(1)).await);
        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_commit_fails_once_unregistered() {
        let registry = ModuleRegistry::new(Arc::new(SymbolTable::new()));
        let token = LifecycleToken::detached();
        let key = registry.key(ModuleKind::Provider, "cache", None);

        let loading = registry.reserve(key.clone(), false, false).unwrap();
        registry.attach(&loading, ModuleHandle::component(Value("v1")), origin());
        assert!(registry.unregister(&key, &token, Duration::from_secs(1)).await);
        assert!(matches!(
            registry.commit(&loading),
            Err(RegistryError::CapabilityNotFound { .. })
        ));

        register(&registry, "cache", None, false, "v1");
        let staged = registry.reserve(key.clone(), false, true).unwrap();
        registry.attach(&staged, ModuleHandle::component(Value("v2")), origin());
        assert!(registry.unregister(&key, &token, Duration::from_secs(1)).await);
        assert!(registry.commit(&staged).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_exact_lookup_skips_default() {
        let registry = ModuleRegistry::new(Arc::new(SymbolTable::new()));
        register(&registry, "cache", Some("redis"), true, "redis");
        register(&registry, "cache", None, false, "plain");
        let capability = registry.symbols().intern("cache");

        assert_eq!(
            registry.default_discriminator(ModuleKind::Provider, capability),
            Some(Some(Arc::from("redis")))
        );
        let plain = registry
            .lookup_exact(&registry.key(ModuleKind::Provider, "cache", None))
            .unwrap();
        assert_eq!(*plain.downcast_ref::<&'static str>().unwrap(), "plain");
        assert_eq!(read(&registry, "cache", None), "redis");
    }

    #[test]
    fn test_snapshot_in_registration_order() {
        let registry = ModuleRegistry::new(Arc::new(SymbolTable::new()));
        register(&registry, "b", None, false, "b");
        register(&registry, "a", None, false, "a");

        let names: Vec<_> = registry.snapshot().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
