//! In-memory directory used by tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use ldap3::{LdapError, Mod, SearchEntry};

use super::{
    ALREADY_EXISTS, Directory, DirectoryError, NO_SUCH_OBJECT, Result,
};
use crate::provisioning::translate::encode_generalized_time;

const OPERATIONS_ERROR: u32 = 1;

/// Directory keeping entries in a map keyed by lowercase DN.
///
/// Maintains `createTimestamp` and `modifyTimestamp` like a server would.
#[derive(Default)]
pub struct MemoryDirectory {
    entries: Mutex<BTreeMap<String, SearchEntry>>,
    offline: AtomicBool,
    reject_writes: AtomicBool,
    hide_reads: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails as if the server were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Every write is refused with an operations error.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Searches find nothing while writes still succeed.
    pub fn set_hide_reads(&self, hide: bool) {
        self.hide_reads.store(hide, Ordering::SeqCst);
    }

    /// Number of successful write calls.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Raw entry lookup, bypassing any provisioning rule.
    pub fn entry(&self, dn: &str) -> Option<SearchEntry> {
        self.entries
            .lock()
            .unwrap()
            .get(&dn.to_ascii_lowercase())
            .cloned()
    }

    /// Store a single-valued entry as is.
    pub fn insert(&self, dn: &str, attrs: &[(&str, &str)]) {
        let entry = SearchEntry {
            dn: dn.to_owned(),
            attrs: attrs
                .iter()
                .map(|(name, value)| (name.to_string(), vec![value.to_string()]))
                .collect(),
            bin_attrs: HashMap::new(),
        };
        self.entries
            .lock()
            .unwrap()
            .insert(dn.to_ascii_lowercase(), entry);
    }

    pub fn insert_binary(&self, dn: &str, name: &str, value: Vec<u8>) {
        if let Some(entry) = self
            .entries
            .lock()
            .unwrap()
            .get_mut(&dn.to_ascii_lowercase())
        {
            entry.bin_attrs.insert(name.to_owned(), vec![value]);
        }
    }

    fn available(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable(LdapError::from(
                std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            )));
        }
        Ok(())
    }

    fn writable(&self) -> Result<()> {
        self.available()?;
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(DirectoryError::Rejected {
                code: OPERATIONS_ERROR,
                message: "writes disabled".into(),
            });
        }
        Ok(())
    }

    fn written(&self) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn no_such_object(dn: &str) -> DirectoryError {
    DirectoryError::Rejected {
        code: NO_SUCH_OBJECT,
        message: format!("no such object: {dn}"),
    }
}

fn now() -> Vec<String> {
    vec![encode_generalized_time(&Utc::now())]
}

fn get_values<'a>(
    entry: &'a SearchEntry,
    name: &str,
) -> Option<&'a Vec<String>> {
    entry
        .attrs
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, values)| values)
}

fn set_values(entry: &mut SearchEntry, name: &str, values: Vec<String>) {
    entry.attrs.retain(|key, _| !key.eq_ignore_ascii_case(name));
    if !values.is_empty() {
        entry.attrs.insert(name.to_owned(), values);
    }
}

/// Undo RFC 4515 `\XX` escapes.
fn unescape_filter(value: &str) -> String {
    let mut bytes = Vec::with_capacity(value.len());
    let raw = value.as_bytes();
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' {
            if let Some(byte) = value
                .get(i + 1..i + 3)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                bytes.push(byte);
                i += 3;
                continue;
            }
        }
        bytes.push(raw[i]);
        i += 1;
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Only equality filters `(attr=value)` are understood.
fn matches(entry: &SearchEntry, filter: &str) -> bool {
    let inner = filter.trim_start_matches('(').trim_end_matches(')');
    let Some((name, value)) = inner.split_once('=') else {
        return false;
    };
    let value = unescape_filter(value);

    get_values(entry, name).is_some_and(|values| {
        values.iter().any(|v| v.eq_ignore_ascii_case(&value))
    })
}

fn is_under(dn: &str, base: &str) -> bool {
    let dn = dn.to_ascii_lowercase();
    let base = base.to_ascii_lowercase();
    dn == base || dn.ends_with(&format!(",{base}"))
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn search(
        &self,
        base: &str,
        filter: &str,
        attributes: &[String],
    ) -> Result<Vec<SearchEntry>> {
        self.available()?;
        if self.hide_reads.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }

        let entries = self.entries.lock().unwrap();
        Ok(entries
            .values()
            .filter(|entry| is_under(&entry.dn, base) && matches(entry, filter))
            .map(|entry| {
                let wanted = |key: &String| {
                    attributes
                        .iter()
                        .any(|a| a == "*" || a.eq_ignore_ascii_case(key))
                };
                SearchEntry {
                    dn: entry.dn.clone(),
                    attrs: entry
                        .attrs
                        .iter()
                        .filter(|(key, _)| wanted(key))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                    bin_attrs: entry
                        .bin_attrs
                        .iter()
                        .filter(|(key, _)| wanted(key))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                }
            })
            .collect())
    }

    async fn add(
        &self,
        dn: &str,
        attributes: Vec<(String, HashSet<String>)>,
    ) -> Result<()> {
        self.writable()?;
        let mut entries = self.entries.lock().unwrap();
        let key = dn.to_ascii_lowercase();
        if entries.contains_key(&key) {
            return Err(DirectoryError::Rejected {
                code: ALREADY_EXISTS,
                message: format!("entry already exists: {dn}"),
            });
        }

        let mut entry = SearchEntry {
            dn: dn.to_owned(),
            attrs: HashMap::new(),
            bin_attrs: HashMap::new(),
        };
        for (name, values) in attributes {
            let mut values: Vec<String> = values.into_iter().collect();
            values.sort();
            set_values(&mut entry, &name, values);
        }
        set_values(&mut entry, "createTimestamp", now());
        set_values(&mut entry, "modifyTimestamp", now());

        entries.insert(key, entry);
        self.written()
    }

    async fn modify(&self, dn: &str, mods: Vec<Mod<String>>) -> Result<()> {
        self.writable()?;
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .get_mut(&dn.to_ascii_lowercase())
            .ok_or_else(|| no_such_object(dn))?;

        for change in mods {
            match change {
                Mod::Replace(name, values) => {
                    let mut values: Vec<String> = values.into_iter().collect();
                    values.sort();
                    set_values(entry, &name, values);
                },
                Mod::Add(name, values) => {
                    let mut current =
                        get_values(entry, &name).cloned().unwrap_or_default();
                    current.extend(values);
                    set_values(entry, &name, current);
                },
                Mod::Delete(name, values) => {
                    let current =
                        get_values(entry, &name).cloned().unwrap_or_default();
                    let kept = if values.is_empty() {
                        Vec::new()
                    } else {
                        current
                            .into_iter()
                            .filter(|v| !values.contains(v))
                            .collect()
                    };
                    set_values(entry, &name, kept);
                },
                Mod::Increment(..) => {},
            }
        }
        set_values(entry, "modifyTimestamp", now());

        self.written()
    }

    async fn rename(&self, dn: &str, new_rdn: &str) -> Result<()> {
        self.writable()?;
        let mut entries = self.entries.lock().unwrap();
        let mut entry = entries
            .remove(&dn.to_ascii_lowercase())
            .ok_or_else(|| no_such_object(dn))?;

        let parent = dn.split_once(',').map(|(_, parent)| parent).unwrap_or("");
        let new_dn = format!("{new_rdn},{parent}");
        if entries.contains_key(&new_dn.to_ascii_lowercase()) {
            entries.insert(dn.to_ascii_lowercase(), entry);
            return Err(DirectoryError::Rejected {
                code: ALREADY_EXISTS,
                message: format!("entry already exists: {new_dn}"),
            });
        }

        if let Some((name, value)) = new_rdn.split_once('=') {
            set_values(&mut entry, name, vec![value.replace('\\', "")]);
        }
        set_values(&mut entry, "modifyTimestamp", now());
        entry.dn = new_dn.clone();
        entries.insert(new_dn.to_ascii_lowercase(), entry);

        self.written()
    }

    async fn delete(&self, dn: &str) -> Result<()> {
        self.writable()?;
        self.entries
            .lock()
            .unwrap()
            .remove(&dn.to_ascii_lowercase())
            .ok_or_else(|| no_such_object(dn))?;
        self.written()
    }
}
