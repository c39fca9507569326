//! Handle registry and callback function tables.
//!
//! The registry maps the CallId of every non-static outcome this engine has
//! handed out to the live object or function behind it. Function tables hold
//! the callbacks this engine passed along with an outbound call, keyed by that
//! call's id.
//!
//! Both structures use a std mutex; no lock is held across an `.await`, and
//! removed values are dropped after the lock is released since dropping a
//! value may run arbitrary teardown (callback scopes, nested leases).

use crate::config::{EngineConfig, ProtocolConfig};
use crate::error::{Result, RpcError};
use crate::value::{Function, Value};
use crate::wire::{CallId, FunctionId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

struct Entry {
    value: Value,
    last_used: Instant,
}

struct RegistryState {
    entries: HashMap<CallId, Entry>,
    last_reap: Instant,
}

/// Live objects and functions addressable by later calls.
pub(crate) struct HandleRegistry {
    state: Mutex<RegistryState>,
    max_entries: usize,
    idle_timeout: Option<Duration>,
}

impl HandleRegistry {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                entries: HashMap::new(),
                last_reap: Instant::now(),
            }),
            max_entries: config.max_live_handles,
            idle_timeout: config.handle_idle_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_idle(&self, entry: &Entry, now: Instant) -> bool {
        self.idle_timeout
            .is_some_and(|timeout| now.duration_since(entry.last_used) > timeout)
    }

    /// Register `value` under `call_id`, evicting the least recently used
    /// entry when the registry is full.
    pub(crate) fn insert(&self, call_id: CallId, value: Value) {
        let now = Instant::now();
        let mut dropped = Vec::new();
        {
            let mut state = self.lock();

            if self.idle_timeout.is_some()
                && now.duration_since(state.last_reap) >= ProtocolConfig::REAP_INTERVAL
            {
                state.last_reap = now;
                let idle: Vec<CallId> = state
                    .entries
                    .iter()
                    .filter(|(_, entry)| self.is_idle(entry, now))
                    .map(|(id, _)| id.clone())
                    .collect();
                for id in idle {
                    if let Some(entry) = state.entries.remove(&id) {
                        dropped.push(entry.value);
                    }
                }
            }

            if self.max_entries > 0
                && state.entries.len() >= self.max_entries
                && !state.entries.contains_key(&call_id)
            {
                let oldest = state
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.last_used)
                    .map(|(id, _)| id.clone());
                if let Some(oldest) = oldest {
                    warn!(
                        "Handle registry full ({} entries), evicting least recently used {}",
                        self.max_entries, oldest
                    );
                    if let Some(entry) = state.entries.remove(&oldest) {
                        dropped.push(entry.value);
                    }
                }
            }

            if let Some(previous) = state.entries.insert(
                call_id,
                Entry {
                    value,
                    last_used: now,
                },
            ) {
                dropped.push(previous.value);
            }
        }
        if !dropped.is_empty() {
            debug!("Reclaimed {} registry entries", dropped.len());
        }
    }

    /// Look up a live entry, refreshing its last-used time. Entries idle past
    /// the timeout are treated as gone.
    pub(crate) fn get(&self, call_id: &CallId) -> Option<Value> {
        let now = Instant::now();
        let expired;
        {
            let mut state = self.lock();
            let entry = state.entries.get_mut(call_id)?;
            if !self.is_idle(entry, now) {
                entry.last_used = now;
                return Some(entry.value.clone());
            }
            expired = state.entries.remove(call_id);
        }
        debug!("Registry entry {} expired after idling", call_id);
        drop(expired);
        None
    }

    /// Remove an entry, reporting whether it existed.
    pub(crate) fn remove(&self, call_id: &CallId) -> bool {
        let removed = self.lock().entries.remove(call_id);
        removed.is_some()
    }

    /// Drop every entry idle past the timeout. Returns how many were dropped.
    pub(crate) fn reap_idle(&self) -> usize {
        if self.idle_timeout.is_none() {
            return 0;
        }
        let now = Instant::now();
        let reaped: Vec<Entry> = {
            let mut state = self.lock();
            state.last_reap = now;
            let idle: Vec<CallId> = state
                .entries
                .iter()
                .filter(|(_, entry)| self.is_idle(entry, now))
                .map(|(id, _)| id.clone())
                .collect();
            idle.iter()
                .filter_map(|id| state.entries.remove(id))
                .collect()
        };
        reaped.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Drop all entries. Returns how many there were.
    pub(crate) fn clear(&self) -> usize {
        let entries = std::mem::take(&mut self.lock().entries);
        entries.len()
    }
}

/// Callbacks passed with one outbound call.
#[derive(Default)]
pub(crate) struct FunctionTable {
    next_id: u32,
    functions: HashMap<FunctionId, Function>,
}

impl FunctionTable {
    /// Store a callback and assign it the next sequential id.
    pub(crate) fn register(&mut self, function: Function) -> FunctionId {
        let id = FunctionId(self.next_id);
        self.next_id += 1;
        self.functions.insert(id, function);
        id
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Function tables keyed by the CallId of the call that introduced them.
#[derive(Default)]
pub(crate) struct FunctionTables {
    tables: Mutex<HashMap<CallId, FunctionTable>>,
}

impl FunctionTables {
    fn lock(&self) -> MutexGuard<'_, HashMap<CallId, FunctionTable>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, call_id: CallId, table: FunctionTable) {
        self.lock().insert(call_id, table);
    }

    /// Find callback `function_id` of call `call_id`.
    pub(crate) fn get(&self, call_id: &CallId, function_id: FunctionId) -> Result<Function> {
        let tables = self.lock();
        let table = tables
            .get(call_id)
            .ok_or_else(|| RpcError::UnknownFunctionSet {
                call_id: call_id.to_string(),
            })?;
        table
            .functions
            .get(&function_id)
            .cloned()
            .ok_or_else(|| RpcError::UnknownFunction {
                call_id: call_id.to_string(),
                function_id: function_id.0,
            })
    }

    pub(crate) fn remove(&self, call_id: &CallId) -> bool {
        let removed = self.lock().remove(call_id);
        removed.is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn clear(&self) -> usize {
        let tables = std::mem::take(&mut *self.lock());
        tables.len()
    }
}
