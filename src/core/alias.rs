//! Purpose: Alias table mapping requested keys to canonical keys.
//! Exports: `AliasTable`.
//! Role: Consulted before every value-level block access.
//! Invariants: Every stored pair has key and target of the same shape.
//! Invariants: Clones share the table; `copy` produces an independent one.
#![allow(clippy::result_large_err)]

use crate::core::error::{Error, ErrorKind};
use crate::core::key::Key;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Default)]
pub struct AliasTable {
    map: Rc<RefCell<BTreeMap<Key, Key>>>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `"section"` / `"section<sep>name"` string pairs.
    pub fn from_pairs<I, K, V>(pairs: I, sep: &str) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let table = Self::new();
        for (key, target) in pairs {
            let key = Key::parse(key.as_ref(), sep)?;
            let target = Key::parse(target.as_ref(), sep)?;
            table.set(key, target)?;
        }
        Ok(table)
    }

    pub fn set(&self, key: Key, target: Key) -> Result<(), Error> {
        if !key.same_shape(&target) {
            return Err(Error::new(ErrorKind::TypeMismatch)
                .with_message(format!(
                    "alias {key} and target {target} must both be sections or both be entries"
                ))
                .with_hint("Map a section to a section, or a (section, name) pair to a pair."));
        }
        self.map.borrow_mut().insert(key, target);
        Ok(())
    }

    pub fn get(&self, key: &Key) -> Option<Key> {
        self.map.borrow().get(key).cloned()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.map.borrow().contains_key(key)
    }

    pub fn delete(&self, key: &Key) -> Result<Key, Error> {
        self.map.borrow_mut().remove(key).ok_or_else(|| {
            Error::new(ErrorKind::NotFound).with_message(format!("alias {key} does not exist"))
        })
    }

    pub fn update(&self, other: &AliasTable) -> Result<(), Error> {
        for (key, target) in other.items() {
            self.set(key, target)?;
        }
        Ok(())
    }

    pub fn copy(&self) -> AliasTable {
        let table = AliasTable::new();
        *table.map.borrow_mut() = self.map.borrow().clone();
        table
    }

    pub fn clear(&self) {
        self.map.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.map.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.borrow().is_empty()
    }

    pub fn keys(&self) -> Vec<Key> {
        self.map.borrow().keys().cloned().collect()
    }

    pub fn items(&self) -> Vec<(Key, Key)> {
        self.map
            .borrow()
            .iter()
            .map(|(key, target)| (key.clone(), target.clone()))
            .collect()
    }

    pub fn ptr_eq(&self, other: &AliasTable) -> bool {
        Rc::ptr_eq(&self.map, &other.map)
    }

    /// Entry alias first, then section alias (name kept), then identity.
    pub fn resolve(&self, section: &str, name: &str) -> (String, String) {
        let map = self.map.borrow();
        if let Some(Key::Entry(true_section, true_name)) =
            map.get(&Key::entry(section, name))
        {
            return (true_section.clone(), true_name.clone());
        }
        if let Some(Key::Section(true_section)) = map.get(&Key::section(section)) {
            return (true_section.clone(), name.to_string());
        }
        (section.to_string(), name.to_string())
    }

    pub fn to_strings(&self, sep: &str) -> BTreeMap<String, String> {
        self.map
            .borrow()
            .iter()
            .map(|(key, target)| (key.to_text(sep), target.to_text(sep)))
            .collect()
    }
}

impl fmt::Debug for AliasTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.items()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::AliasTable;
    use crate::core::error::ErrorKind;
    use crate::core::key::Key;

    #[test]
    fn set_rejects_mixed_shapes() {
        let table = AliasTable::new();
        let err = table
            .set(Key::section("a"), Key::entry("b", "c"))
            .expect_err("mixed");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert!(table.is_empty());
    }

    #[test]
    fn resolve_prefers_entry_alias_over_section_alias() {
        let table = AliasTable::new();
        table
            .set(Key::section("old"), Key::section("new"))
            .expect("section alias");
        table
            .set(Key::entry("old", "x"), Key::entry("other", "y"))
            .expect("entry alias");

        assert_eq!(
            table.resolve("old", "x"),
            ("other".to_string(), "y".to_string())
        );
        assert_eq!(
            table.resolve("old", "z"),
            ("new".to_string(), "z".to_string())
        );
        assert_eq!(
            table.resolve("plain", "z"),
            ("plain".to_string(), "z".to_string())
        );
    }

    #[test]
    fn from_pairs_parses_separated_keys() {
        let table = AliasTable::from_pairs([("a.b", "c.d"), ("sec", "other")], ".")
            .expect("pairs");
        assert_eq!(table.get(&Key::entry("a", "b")), Some(Key::entry("c", "d")));
        assert_eq!(table.get(&Key::section("sec")), Some(Key::section("other")));

        let err = AliasTable::from_pairs([("a.b", "c")], ".").expect_err("mixed");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        let err = AliasTable::from_pairs([("a.b.c", "d.e")], ".").expect_err("three");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn copy_is_independent_and_clone_is_shared() {
        let table = AliasTable::from_pairs([("a", "b")], ".").expect("pairs");
        let shared = table.clone();
        let copied = table.copy();
        table
            .set(Key::section("c"), Key::section("d"))
            .expect("set");
        assert_eq!(shared.len(), 2);
        assert_eq!(copied.len(), 1);
        assert!(shared.ptr_eq(&table));
        assert!(!copied.ptr_eq(&table));
    }

    #[test]
    fn delete_missing_alias_is_not_found() {
        let table = AliasTable::new();
        let err = table.delete(&Key::section("a")).expect_err("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
