//! Purpose: `DataBlock`, the handle plugins use to read and write shared data.
//! Exports: `DataBlock`, `SectionView`.
//! Role: Binds one `SectionedStore` to one `AliasTable`; value-level access resolves aliases.
//! Invariants: Clones share store and alias table; `copy` shares only the alias table.
//! Invariants: Writes create the target section on demand; default reads never mutate.
#![allow(clippy::result_large_err)]

use crate::core::alias::AliasTable;
use crate::core::error::{Error, ErrorKind};
use crate::core::key::Key;
use crate::core::section::Section;
use crate::core::store::SectionedStore;
use crate::core::value::Value;
use std::fmt;

#[derive(Clone, Default)]
pub struct DataBlock {
    store: SectionedStore,
    aliases: AliasTable,
}

impl DataBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(store: SectionedStore, aliases: AliasTable) -> Self {
        Self { store, aliases }
    }

    pub fn with_aliases(aliases: AliasTable) -> Self {
        Self::from_parts(SectionedStore::new(), aliases)
    }

    pub fn store(&self) -> &SectionedStore {
        &self.store
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Rebind this handle to another alias table; other handles keep theirs.
    pub fn set_mapping(&mut self, aliases: AliasTable) {
        self.aliases = aliases;
    }

    /// True when both handles address the same store.
    pub fn ptr_eq(&self, other: &DataBlock) -> bool {
        self.store.ptr_eq(&other.store)
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.store.has_section(section)
    }

    pub fn get_section(&self, section: &str) -> Result<Section, Error> {
        self.store.get_section(section)
    }

    pub fn get_section_or(&self, section: &str, default: Section) -> Section {
        self.store.get_section_or(section, default)
    }

    pub fn sections(&self) -> std::vec::IntoIter<String> {
        self.store.sections()
    }

    pub fn set_section(&self, section: &str, source: &Section) {
        self.store.set_section(section, source);
    }

    pub fn delete_section(&self, section: &str) -> Result<Section, Error> {
        self.store.delete_section(section)
    }

    /// Empty one section, or every section when `section` is `None`.
    pub fn clear(&self, section: Option<&str>) -> Result<(), Error> {
        match section {
            Some(section) => self.store.clear_section(section),
            None => {
                self.store.clear_all();
                Ok(())
            }
        }
    }

    pub fn keys(
        &self,
        section: Option<&str>,
    ) -> Result<impl Iterator<Item = (String, String)> + use<>, Error> {
        self.store.keys(section)
    }

    pub fn items(
        &self,
        section: Option<&str>,
    ) -> Result<impl Iterator<Item = ((String, String), Value)> + use<>, Error> {
        self.store.items(section)
    }

    pub fn resolve(&self, section: &str, name: &str) -> (String, String) {
        self.aliases.resolve(section, name)
    }

    pub fn has_value(&self, section: &str, name: &str) -> bool {
        let (section, name) = self.resolve(section, name);
        self.store
            .get_section(&section)
            .map(|target| target.contains(&name))
            .unwrap_or(false)
    }

    pub fn get_value(&self, section: &str, name: &str) -> Result<Value, Error> {
        let (section, name) = self.resolve(section, name);
        let target = self
            .store
            .get_section(&section)
            .map_err(|err| err.with_name(name.as_str()))?;
        target
            .get(&name)
            .ok_or_else(|| Error::not_found(&section, &name))
    }

    pub fn get_value_or(&self, section: &str, name: &str, default: Value) -> Value {
        if !self.has_value(section, name) {
            return default;
        }
        self.get_value(section, name).unwrap_or(default)
    }

    pub fn set_value(&self, section: &str, name: &str, value: impl Into<Value>) {
        let (section, name) = self.resolve(section, name);
        let target = self.store.section_or_create(&section);
        let displaced = target.insert(name, value.into());
        drop(displaced);
    }

    pub fn delete_value(&self, section: &str, name: &str) -> Result<Value, Error> {
        let (section, name) = self.resolve(section, name);
        let target = self
            .store
            .get_section(&section)
            .map_err(|_| Error::not_found(&section, &name))?;
        target
            .remove(&name)
            .ok_or_else(|| Error::not_found(&section, &name))
    }

    /// Store `value` only when absent; returns whatever is stored afterwards.
    pub fn set_default(&self, section: &str, name: &str, value: impl Into<Value>) -> Value {
        if let Ok(existing) = self.get_value(section, name) {
            return existing;
        }
        let value = value.into();
        self.set_value(section, name, value.clone());
        value
    }

    pub fn contains(&self, key: &Key) -> bool {
        match key {
            Key::Section(section) => self.has_section(section),
            Key::Entry(section, name) => self.has_value(section, name),
        }
    }

    pub fn get_item(&self, key: &Key) -> Result<Value, Error> {
        match key {
            Key::Section(section) => self.get_section(section).map(Value::Section),
            Key::Entry(section, name) => self.get_value(section, name),
        }
    }

    pub fn set_item(&self, key: &Key, value: Value) -> Result<(), Error> {
        match key {
            Key::Section(section) => match value {
                Value::Section(source) => {
                    self.set_section(section, &source);
                    Ok(())
                }
                other => Err(Error::new(ErrorKind::TypeMismatch)
                    .with_message(format!(
                        "section {section} can only be set from a section, got {}",
                        other.kind_name()
                    ))
                    .with_section(section.as_str())),
            },
            Key::Entry(section, name) => {
                self.set_value(section, name, value);
                Ok(())
            }
        }
    }

    pub fn delete_item(&self, key: &Key) -> Result<Value, Error> {
        match key {
            Key::Section(section) => self.delete_section(section).map(Value::Section),
            Key::Entry(section, name) => self.delete_value(section, name),
        }
    }

    /// Merge `other`'s sections; the alias table is left untouched.
    pub fn update(&self, other: &DataBlock, no_copy: &[&str]) {
        self.store.update(&other.store, no_copy);
    }

    /// Independent store (except `no_copy` sections) bound to the same alias table.
    pub fn copy(&self, no_copy: &[&str]) -> DataBlock {
        DataBlock {
            store: self.store.copy(no_copy),
            aliases: self.aliases.clone(),
        }
    }

    pub fn section_view(&self, section: impl Into<String>) -> SectionView {
        SectionView {
            block: self.clone(),
            section: section.into(),
        }
    }

    /// Drop every section reference held by the store.
    pub fn release(&self) {
        self.store.release();
    }
}

impl fmt::Debug for DataBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBlock")
            .field("data", &self.store)
            .field("mapping", &self.aliases)
            .finish()
    }
}

/// A block restricted to a single section.
#[derive(Clone, Debug)]
pub struct SectionView {
    block: DataBlock,
    section: String,
}

impl SectionView {
    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn block(&self) -> &DataBlock {
        &self.block
    }

    pub fn has(&self, name: &str) -> bool {
        self.block.has_value(&self.section, name)
    }

    pub fn get(&self, name: &str) -> Result<Value, Error> {
        self.block.get_value(&self.section, name)
    }

    pub fn get_or(&self, name: &str, default: Value) -> Value {
        self.block.get_value_or(&self.section, name, default)
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) {
        self.block.set_value(&self.section, name, value);
    }

    pub fn delete(&self, name: &str) -> Result<Value, Error> {
        self.block.delete_value(&self.section, name)
    }

    pub fn set_default(&self, name: &str, value: impl Into<Value>) -> Value {
        self.block.set_default(&self.section, name, value)
    }

    pub fn names(&self) -> Vec<String> {
        self.block
            .get_section_or(&self.section, Section::new())
            .names()
    }
}

#[cfg(test)]
mod tests {
    use super::DataBlock;
    use crate::core::error::ErrorKind;
    use crate::core::key::Key;
    use crate::core::section::Section;
    use crate::core::value::Value;

    #[test]
    fn set_value_creates_section_and_resolves_aliases() {
        let block = DataBlock::new();
        block
            .aliases()
            .set(Key::section("input"), Key::section("shared"))
            .expect("alias");
        block.set_value("input", "n", 3i64);
        assert!(block.has_section("shared"));
        assert!(!block.has_section("input"));
        assert_eq!(block.get_value("shared", "n").expect("n"), Value::Int(3));
    }

    #[test]
    fn get_value_reports_missing_section_and_name() {
        let block = DataBlock::new();
        let err = block.get_value("nope", "x").expect_err("section");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.name(), Some("x"));

        block.set_value("params", "a", 1i64);
        let err = block.get_value("params", "x").expect_err("name");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn set_item_requires_section_for_section_keys() {
        let block = DataBlock::new();
        let err = block
            .set_item(&Key::section("params"), Value::Int(1))
            .expect_err("scalar");
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);

        let source = Section::from_entries([("a", Value::Int(1))]);
        block
            .set_item(&Key::section("params"), Value::Section(source))
            .expect("section");
        assert!(block.contains(&Key::entry("params", "a")));

        let removed = block.delete_item(&Key::section("params")).expect("delete");
        assert!(matches!(removed, Value::Section(_)));
        assert!(!block.contains(&Key::section("params")));
    }

    #[test]
    fn set_default_keeps_existing_value() {
        let block = DataBlock::new();
        assert_eq!(block.set_default("p", "a", 1i64), Value::Int(1));
        assert_eq!(block.set_default("p", "a", 2i64), Value::Int(1));
    }

    #[test]
    fn clear_without_section_empties_store() {
        let block = DataBlock::new();
        block.set_value("a", "x", 1i64);
        block.set_value("b", "y", 2i64);
        block.clear(Some("a")).expect("clear a");
        assert!(block.get_section("a").expect("a").is_empty());
        block.clear(None).expect("clear all");
        assert_eq!(block.sections().count(), 0);
    }

    #[test]
    fn section_view_reads_and_writes_one_section() {
        let block = DataBlock::new();
        let view = block.section_view("likelihood");
        view.set("chi2", 1.5f64);
        assert!(view.has("chi2"));
        assert_eq!(view.names(), vec!["chi2".to_string()]);
        assert_eq!(
            block.get_value("likelihood", "chi2").expect("chi2"),
            Value::Float(1.5)
        );
        assert_eq!(view.get_or("missing", Value::Int(0)), Value::Int(0));
    }

    #[test]
    fn set_mapping_rebinds_only_this_handle() {
        let mut block = DataBlock::new();
        let other = block.clone();
        let table = crate::core::alias::AliasTable::from_pairs([("a", "b")], ".").expect("table");
        block.set_mapping(table);
        block.set_value("a", "x", 1i64);
        assert!(other.has_value("b", "x"));
        assert!(!other.has_value("a", "x"));
        assert!(block.has_value("a", "x"));
    }
}
