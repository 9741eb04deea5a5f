// Key shapes shared by alias tables and composite-key block addressing.
#![allow(clippy::result_large_err)]

use crate::core::error::{Error, ErrorKind};
use std::fmt;

/// A whole section (`Section`) or a single value (`Entry`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Section(String),
    Entry(String, String),
}

impl Key {
    pub fn section(section: impl Into<String>) -> Self {
        Key::Section(section.into())
    }

    pub fn entry(section: impl Into<String>, name: impl Into<String>) -> Self {
        Key::Entry(section.into(), name.into())
    }

    pub fn same_shape(&self, other: &Key) -> bool {
        matches!(
            (self, other),
            (Key::Section(_), Key::Section(_)) | (Key::Entry(..), Key::Entry(..))
        )
    }

    pub fn section_name(&self) -> &str {
        match self {
            Key::Section(section) | Key::Entry(section, _) => section,
        }
    }

    /// Parse `section` or `section<sep>name`.
    pub fn parse(text: &str, sep: &str) -> Result<Self, Error> {
        if sep.is_empty() {
            return Err(Error::new(ErrorKind::Usage).with_message("key separator is empty"));
        }
        let parts = text.split(sep).collect::<Vec<_>>();
        match parts.as_slice() {
            [section] => Ok(Key::section(*section)),
            [section, name] => Ok(Key::entry(*section, *name)),
            _ => Err(Error::new(ErrorKind::TypeMismatch)
                .with_message(format!(
                    "key {text:?} splits into {} components; a pair must have exactly two",
                    parts.len()
                ))
                .with_hint(format!("Use `section` or `section{sep}name`."))),
        }
    }

    pub fn to_text(&self, sep: &str) -> String {
        match self {
            Key::Section(section) => section.clone(),
            Key::Entry(section, name) => format!("{section}{sep}{name}"),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Section(section) => write!(f, "{section}"),
            Key::Entry(section, name) => write!(f, "({section}, {name})"),
        }
    }
}

impl From<&str> for Key {
    fn from(section: &str) -> Self {
        Key::section(section)
    }
}

impl From<(&str, &str)> for Key {
    fn from((section, name): (&str, &str)) -> Self {
        Key::entry(section, name)
    }
}
