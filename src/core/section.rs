//! Purpose: A named sub-mapping of a block (name -> value), held by shared reference.
//! Exports: `Section`.
//! Role: Unit of whole-section replace/share semantics in the store.
//! Invariants: Clones alias the same entries; `ptr_eq` is the identity test.
//! Invariants: Entries are never dropped while the entry map is borrowed.
//! Invariants: Equality is structural and terminates on self-referencing sections.

use crate::core::value::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Default)]
pub struct Section {
    entries: Rc<RefCell<BTreeMap<String, Value>>>,
}

impl Section {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(name, value)| (name.into(), value))
            .collect::<BTreeMap<_, _>>();
        Self {
            entries: Rc::new(RefCell::new(map)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.entries.borrow().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    /// Returns the displaced value, if any.
    pub fn insert(&self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.entries.borrow_mut().insert(name.into(), value)
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.entries.borrow_mut().remove(name)
    }

    pub fn clear(&self) {
        let old = std::mem::take(&mut *self.entries.borrow_mut());
        drop(old);
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.borrow().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        self.entries
            .borrow()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    pub fn ptr_eq(&self, other: &Section) -> bool {
        Rc::ptr_eq(&self.entries, &other.entries)
    }

    /// New section holding the same entries; nested values stay shared.
    pub fn shallow_copy(&self) -> Section {
        Section {
            entries: Rc::new(RefCell::new(self.entries.borrow().clone())),
        }
    }

    /// Replace this section's entries with `source`'s, keeping this section's identity.
    pub fn refill_from(&self, source: &Section) {
        if self.ptr_eq(source) {
            return;
        }
        let snapshot = source.entries.borrow().clone();
        let old = std::mem::replace(&mut *self.entries.borrow_mut(), snapshot);
        drop(old);
    }

    /// Visit every section this one owns a reference to.
    /// The visitor must not mutate this section.
    pub fn visit_sections(&self, mut visit: impl FnMut(&Section)) {
        for value in self.entries.borrow().values() {
            if let Value::Section(child) = value {
                visit(child);
            }
        }
    }

    /// Drop every reference this section owns.
    pub fn release(&self) {
        self.clear();
    }

    pub(crate) fn strong_count(&self) -> usize {
        Rc::strong_count(&self.entries)
    }

    pub(crate) fn id(&self) -> usize {
        Rc::as_ptr(&self.entries) as *const () as usize
    }
}

impl PartialEq for Section {
    fn eq(&self, other: &Self) -> bool {
        sections_equal(self, other, &mut Vec::new())
    }
}

// A pair already under comparison counts as equal, so cycles terminate.
fn sections_equal(left: &Section, right: &Section, active: &mut Vec<(usize, usize)>) -> bool {
    if left.ptr_eq(right) {
        return true;
    }
    let pair = (left.id(), right.id());
    if active.contains(&pair) {
        return true;
    }
    let (left_entries, right_entries) = (left.entries.borrow(), right.entries.borrow());
    if left_entries.len() != right_entries.len() {
        return false;
    }
    active.push(pair);
    let equal = left_entries.iter().zip(right_entries.iter()).all(
        |((left_name, left_value), (right_name, right_value))| {
            left_name == right_name
                && match (left_value, right_value) {
                    (Value::Section(a), Value::Section(b)) => sections_equal(a, b, active),
                    _ => left_value == right_value,
                }
        },
    );
    active.pop();
    equal
}

impl fmt::Debug for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entries.try_borrow() {
            Ok(entries) => f
                .debug_tuple("Section")
                .field(&entries.keys().collect::<Vec<_>>())
                .finish(),
            Err(_) => f.write_str("Section(<borrowed>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Section;
    use crate::core::value::Value;

    #[test]
    fn clones_alias_entries() {
        let section = Section::new();
        let alias = section.clone();
        alias.insert("x", Value::Int(3));
        assert_eq!(section.get("x"), Some(Value::Int(3)));
        assert!(section.ptr_eq(&alias));
    }

    #[test]
    fn self_referencing_sections_compare_structurally() {
        let a = Section::new();
        a.insert("me", Value::Section(a.clone()));
        let b = Section::new();
        b.insert("me", Value::Section(b.clone()));
        let c = Section::from_entries([("x", Value::Int(1))]);
        c.insert("me", Value::Section(c.clone()));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(Value::Section(a.clone()), Value::Section(b.clone()));
        for section in [a, b, c] {
            section.release();
        }
    }

    #[test]
    fn shallow_copy_is_independent() {
        let section = Section::from_entries([("a", Value::Int(1))]);
        let copy = section.shallow_copy();
        copy.insert("b", Value::Int(2));
        assert!(!section.contains("b"));
        assert!(!copy.ptr_eq(&section));
    }

    #[test]
    fn refill_keeps_identity() {
        let target = Section::from_entries([("old", Value::Int(1))]);
        let holder = target.clone();
        let source = Section::from_entries([("new", Value::Int(2))]);
        target.refill_from(&source);
        assert_eq!(holder.names(), vec!["new".to_string()]);

        target.refill_from(&holder);
        assert_eq!(target.len(), 1);
    }

    #[test]
    fn release_drops_nested_references() {
        let parent = Section::new();
        let child = Section::new();
        parent.insert("child", Value::Section(child.clone()));
        assert_eq!(child.strong_count(), 2);
        parent.release();
        assert_eq!(child.strong_count(), 1);
        assert!(parent.is_empty());
    }
}
