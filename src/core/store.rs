//! Purpose: Two-level store mapping section names to shared `Section`s.
//! Exports: `SectionedStore`.
//! Role: Primary state container behind every `DataBlock`.
//! Invariants: Within one store a section object is reachable through exactly one name.
//! Invariants: Section-level operations never consult alias tables.
//! Notes: Dropping the last handle runs the cycle collector over the store's sections.
#![allow(clippy::result_large_err)]

use crate::core::error::Error;
use crate::core::reclaim;
use crate::core::section::Section;
use crate::core::value::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Default)]
struct StoreInner {
    sections: BTreeMap<String, Section>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let sections = std::mem::take(&mut self.sections);
        if !sections.is_empty() {
            reclaim::collect(sections.into_values().collect());
        }
    }
}

#[derive(Clone, Default)]
pub struct SectionedStore {
    inner: Rc<RefCell<StoreInner>>,
}

impl SectionedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.inner.borrow().sections.contains_key(name)
    }

    pub fn get_section(&self, name: &str) -> Result<Section, Error> {
        self.inner
            .borrow()
            .sections
            .get(name)
            .cloned()
            .ok_or_else(|| Error::section_not_found(name))
    }

    /// Never mutates the store.
    pub fn get_section_or(&self, name: &str, default: Section) -> Section {
        self.inner
            .borrow()
            .sections
            .get(name)
            .cloned()
            .unwrap_or(default)
    }

    /// Snapshot of the section names; call again to restart.
    pub fn sections(&self) -> std::vec::IntoIter<String> {
        self.inner
            .borrow()
            .sections
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
    }

    /// Refill an existing section in place, or store a shallow copy of `source`.
    pub fn set_section(&self, name: &str, source: &Section) {
        let existing = self.inner.borrow().sections.get(name).cloned();
        match existing {
            Some(existing) => existing.refill_from(source),
            None => {
                self.inner
                    .borrow_mut()
                    .sections
                    .insert(name.to_string(), source.shallow_copy());
            }
        }
    }

    /// Install `section` itself under `name`, so both holders see the same entries.
    pub fn share_section(&self, name: &str, section: Section) {
        let displaced = self
            .inner
            .borrow_mut()
            .sections
            .insert(name.to_string(), section);
        drop(displaced);
    }

    pub(crate) fn section_or_create(&self, name: &str) -> Section {
        if let Some(section) = self.inner.borrow().sections.get(name) {
            return section.clone();
        }
        let section = Section::new();
        self.inner
            .borrow_mut()
            .sections
            .insert(name.to_string(), section.clone());
        section
    }

    pub fn delete_section(&self, name: &str) -> Result<Section, Error> {
        let removed = self.inner.borrow_mut().sections.remove(name);
        removed.ok_or_else(|| Error::section_not_found(name))
    }

    pub fn clear_section(&self, name: &str) -> Result<(), Error> {
        self.get_section(name)?.clear();
        Ok(())
    }

    pub fn clear_all(&self) {
        let sections = std::mem::take(&mut self.inner.borrow_mut().sections);
        reclaim::collect(sections.into_values().collect());
    }

    pub fn keys(
        &self,
        section: Option<&str>,
    ) -> Result<impl Iterator<Item = (String, String)> + use<>, Error> {
        let selected = self.selected(section)?;
        let store = self.clone();
        Ok(selected.into_iter().flat_map(move |section| {
            let names = store
                .inner
                .borrow()
                .sections
                .get(&section)
                .map(Section::names)
                .unwrap_or_default();
            names.into_iter().map(move |name| (section.clone(), name))
        }))
    }

    pub fn items(
        &self,
        section: Option<&str>,
    ) -> Result<impl Iterator<Item = ((String, String), Value)> + use<>, Error> {
        let selected = self.selected(section)?;
        let store = self.clone();
        Ok(selected.into_iter().flat_map(move |section| {
            let entries = store
                .inner
                .borrow()
                .sections
                .get(&section)
                .map(Section::entries)
                .unwrap_or_default();
            entries
                .into_iter()
                .map(move |(name, value)| ((section.clone(), name), value))
        }))
    }

    fn selected(&self, section: Option<&str>) -> Result<Vec<String>, Error> {
        match section {
            Some(name) if self.has_section(name) => Ok(vec![name.to_string()]),
            Some(name) => Err(Error::section_not_found(name)),
            None => Ok(self.sections().collect()),
        }
    }

    /// Merge `other` into this store; `no_copy` sections are shared, not copied.
    pub fn update(&self, other: &SectionedStore, no_copy: &[&str]) {
        if self.ptr_eq(other) {
            return;
        }
        let incoming = other
            .inner
            .borrow()
            .sections
            .iter()
            .map(|(name, section)| (name.clone(), section.clone()))
            .collect::<Vec<_>>();
        for (name, section) in incoming {
            if no_copy.contains(&name.as_str()) {
                self.share_section(&name, section);
            } else {
                self.set_section(&name, &section);
            }
        }
    }

    pub fn copy(&self, no_copy: &[&str]) -> SectionedStore {
        let store = SectionedStore::new();
        store.update(self, no_copy);
        store
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().sections.is_empty()
    }

    pub fn ptr_eq(&self, other: &SectionedStore) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Visit every owned section reference.
    pub fn visit_sections(&self, mut visit: impl FnMut(&str, &Section)) {
        for (name, section) in &self.inner.borrow().sections {
            visit(name, section);
        }
    }

    /// Drop every owned section reference.
    pub fn release(&self) {
        self.clear_all();
    }
}

impl fmt::Debug for SectionedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f.debug_map().entries(inner.sections.iter()).finish(),
            Err(_) => f.write_str("SectionedStore(<borrowed>)"),
        }
    }
}
