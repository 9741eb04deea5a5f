//! Purpose: Versioned export table of the block ABI: values, typed accessors, errors, logging.
//! Exports: `dblk_api`, `ApiSlot`, `CAPSULE_NAME`, `ABI_VERSION`, `BLOCK_API`,
//! `CapsuleRegistry`, `ApiImport`, `dblk_capsule_import`.
//! Role: Lets separately compiled modules reach the core without a link-time dependency.
//! Invariants: Slot order is fixed and additive-only; new slots append and bump `slot_count`.
//! Invariants: An `ApiImport` resolves at most once; a failure is cached, never retried.
//! Notes: Hosts inject `BLOCK_API` into plugins via `dblk_plugin_init`; by-name lookup is
//! for modules that link `libdatablock` directly.
#![allow(clippy::result_large_err)]
#![allow(non_camel_case_types)]

use crate::abi::{self, *};
use crate::core::error::{Error, ErrorKind};
use std::collections::HashMap;
use std::ffi::{CStr, c_void};
use std::os::raw::{c_char, c_int};
use std::sync::OnceLock;

pub const CAPSULE_NAME: &str = "org.datablock.block._C_API";
pub const ABI_VERSION: u32 = 1;

pub type Block = *mut dblk_block;
pub type Text = *const c_char;

macro_rules! export_table {
    ($($slot:ident = $index:literal => $field:ident: $ty:ty = $func:path,)+) => {
        #[repr(u32)]
        #[derive(Clone, Copy, Debug, Eq, PartialEq)]
        pub enum ApiSlot {
            $($slot = $index,)+
        }

        impl ApiSlot {
            pub const ALL: &'static [ApiSlot] = &[$(ApiSlot::$slot,)+];

            pub fn index(self) -> usize {
                self as usize
            }
        }

        #[repr(C)]
        #[derive(Debug)]
        pub struct dblk_api {
            pub version: u32,
            pub slot_count: u32,
            $(pub $field: $ty,)+
        }

        pub static BLOCK_API: dblk_api = dblk_api {
            version: ABI_VERSION,
            slot_count: ApiSlot::ALL.len() as u32,
            $($field: $func,)+
        };

        impl dblk_api {
            /// Raw entry by index, for consumers that treat the table as an array.
            pub fn slot(&self, slot: ApiSlot) -> Option<*const c_void> {
                if slot.index() >= self.slot_count as usize {
                    return None;
                }
                let entry = match slot {
                    $(ApiSlot::$slot => self.$field as *const c_void,)+
                };
                Some(entry)
            }
        }
    };
}

export_table! {
    HasValue = 0 => has_value: extern "C" fn(Block, Text, Text) -> c_int = dblk_has_value,
    DelValue = 1 => del_value: extern "C" fn(Block, Text, Text) -> c_int = dblk_del_value,
    SetValue = 2 => set_value:
        extern "C" fn(Block, Text, Text, *const dblk_value) -> c_int = dblk_set_value,
    GetValue = 3 => get_value:
        extern "C" fn(Block, Text, Text, *const dblk_value, *mut *mut dblk_value) -> c_int
        = dblk_get_value,
    ValueFree = 4 => value_free: extern "C" fn(*mut dblk_value) = dblk_value_free,
    ValueNewLong = 5 => value_new_long: extern "C" fn(i64) -> *mut dblk_value
        = dblk_value_new_long,
    ValueNewDouble = 6 => value_new_double: extern "C" fn(f64) -> *mut dblk_value
        = dblk_value_new_double,
    ValueNewString = 7 => value_new_string: extern "C" fn(Text) -> *mut dblk_value
        = dblk_value_new_string,
    ValueNewHandle = 8 => value_new_handle: extern "C" fn(*mut c_void) -> *mut dblk_value
        = dblk_value_new_handle,
    ValueKind = 9 => value_kind: extern "C" fn(*const dblk_value) -> c_int = dblk_value_kind,
    ValueAsLong = 10 => value_as_long: extern "C" fn(*const dblk_value, *mut i64) -> c_int
        = dblk_value_as_long,
    ValueAsDouble = 11 => value_as_double: extern "C" fn(*const dblk_value, *mut f64) -> c_int
        = dblk_value_as_double,
    ValueAsString = 12 => value_as_string:
        extern "C" fn(*const dblk_value, *mut *mut c_char) -> c_int = dblk_value_as_string,
    ValueAsHandle = 13 => value_as_handle:
        extern "C" fn(*const dblk_value, *mut *mut c_void) -> c_int = dblk_value_as_handle,
    ValueBuffer = 14 => value_buffer: extern "C" fn(
        *const dblk_value,
        *mut c_int,
        *mut *mut c_void,
        *mut c_int,
        *mut *const usize,
    ) -> c_int = dblk_value_buffer,
    DuplicateValue = 15 => duplicate_value:
        extern "C" fn(Block, Text, Text, Text, Text) -> c_int = dblk_duplicate_value,
    MoveValue = 16 => move_value: extern "C" fn(Block, Text, Text, Text, Text) -> c_int
        = dblk_move_value,
    GetInt = 17 => get_int: extern "C" fn(Block, Text, Text, *mut c_int) -> c_int = dblk_get_int,
    GetIntDefault = 18 => get_int_default:
        extern "C" fn(Block, Text, Text, *mut c_int, c_int) -> c_int = dblk_get_int_default,
    SetInt = 19 => set_int: extern "C" fn(Block, Text, Text, c_int) -> c_int = dblk_set_int,
    GetLong = 20 => get_long: extern "C" fn(Block, Text, Text, *mut i64) -> c_int = dblk_get_long,
    GetLongDefault = 21 => get_long_default:
        extern "C" fn(Block, Text, Text, *mut i64, i64) -> c_int = dblk_get_long_default,
    SetLong = 22 => set_long: extern "C" fn(Block, Text, Text, i64) -> c_int = dblk_set_long,
    GetFloat = 23 => get_float: extern "C" fn(Block, Text, Text, *mut f32) -> c_int
        = dblk_get_float,
    GetFloatDefault = 24 => get_float_default:
        extern "C" fn(Block, Text, Text, *mut f32, f32) -> c_int = dblk_get_float_default,
    SetFloat = 25 => set_float: extern "C" fn(Block, Text, Text, f32) -> c_int = dblk_set_float,
    GetDouble = 26 => get_double: extern "C" fn(Block, Text, Text, *mut f64) -> c_int
        = dblk_get_double,
    GetDoubleDefault = 27 => get_double_default:
        extern "C" fn(Block, Text, Text, *mut f64, f64) -> c_int = dblk_get_double_default,
    SetDouble = 28 => set_double: extern "C" fn(Block, Text, Text, f64) -> c_int
        = dblk_set_double,
    GetHandle = 29 => get_handle: extern "C" fn(Block, Text, Text, *mut *mut c_void) -> c_int
        = dblk_get_handle,
    GetHandleDefault = 30 => get_handle_default:
        extern "C" fn(Block, Text, Text, *mut *mut c_void, *mut c_void) -> c_int
        = dblk_get_handle_default,
    SetHandle = 31 => set_handle: extern "C" fn(Block, Text, Text, *mut c_void) -> c_int
        = dblk_set_handle,
    GetString = 32 => get_string: extern "C" fn(Block, Text, Text, *mut *mut c_char) -> c_int
        = dblk_get_string,
    GetStringDefault = 33 => get_string_default:
        extern "C" fn(Block, Text, Text, *mut *mut c_char, Text) -> c_int
        = dblk_get_string_default,
    SetString = 34 => set_string: extern "C" fn(Block, Text, Text, Text) -> c_int
        = dblk_set_string,
    GetIntArray = 35 => get_int_array:
        extern "C" fn(Block, Text, Text, *mut *mut i32, *mut c_int, *mut *const usize) -> c_int
        = dblk_get_int_array,
    SetIntArray = 36 => set_int_array:
        extern "C" fn(Block, Text, Text, *mut i32, c_int, *const usize) -> c_int
        = dblk_set_int_array,
    GetLongArray = 37 => get_long_array:
        extern "C" fn(Block, Text, Text, *mut *mut i64, *mut c_int, *mut *const usize) -> c_int
        = dblk_get_long_array,
    SetLongArray = 38 => set_long_array:
        extern "C" fn(Block, Text, Text, *mut i64, c_int, *const usize) -> c_int
        = dblk_set_long_array,
    GetFloatArray = 39 => get_float_array:
        extern "C" fn(Block, Text, Text, *mut *mut f32, *mut c_int, *mut *const usize) -> c_int
        = dblk_get_float_array,
    SetFloatArray = 40 => set_float_array:
        extern "C" fn(Block, Text, Text, *mut f32, c_int, *const usize) -> c_int
        = dblk_set_float_array,
    GetDoubleArray = 41 => get_double_array:
        extern "C" fn(Block, Text, Text, *mut *mut f64, *mut c_int, *mut *const usize) -> c_int
        = dblk_get_double_array,
    SetDoubleArray = 42 => set_double_array:
        extern "C" fn(Block, Text, Text, *mut f64, c_int, *const usize) -> c_int
        = dblk_set_double_array,
    ClearErrors = 43 => clear_errors: extern "C" fn() = dblk_clear_errors,
    ErrorPending = 44 => error_pending: extern "C" fn() -> c_int = dblk_error_pending,
    LastError = 45 => last_error: extern "C" fn(*mut *mut dblk_error) -> c_int = dblk_last_error,
    ErrorFree = 46 => error_free: extern "C" fn(*mut dblk_error) = dblk_error_free,
    StringFree = 47 => string_free: extern "C" fn(*mut c_char) = dblk_string_free,
    LogInfo = 48 => log_info: extern "C" fn(Text, Text) -> c_int = dblk_log_info,
    LogWarning = 49 => log_warning: extern "C" fn(Text, Text) -> c_int = dblk_log_warning,
    LogDebug = 50 => log_debug: extern "C" fn(Text, Text) -> c_int = dblk_log_debug,
    LogError = 51 => log_error: extern "C" fn(Text, Text) -> c_int = dblk_log_error,
}

impl dblk_api {
    pub fn supports(&self, version: u32) -> bool {
        version >= 1 && version <= self.version
    }
}

#[derive(Default)]
pub struct CapsuleRegistry {
    tables: HashMap<String, &'static dblk_api>,
}

impl CapsuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_core() -> Self {
        let mut registry = Self::new();
        registry.publish(CAPSULE_NAME, &BLOCK_API);
        registry
    }

    /// Returns the table previously published under `name`, if any.
    pub fn publish(
        &mut self,
        name: impl Into<String>,
        table: &'static dblk_api,
    ) -> Option<&'static dblk_api> {
        self.tables.insert(name.into(), table)
    }

    pub fn resolve(&self, name: &str, version: u32) -> Result<&'static dblk_api, Error> {
        let table = self.tables.get(name).copied().ok_or_else(|| {
            Error::new(ErrorKind::AbiResolution)
                .with_message(format!("no export table is published as {name}"))
                .with_hint(format!("Expected {CAPSULE_NAME}; is the core library loaded?"))
        })?;
        if !table.supports(version) {
            return Err(Error::new(ErrorKind::AbiResolution).with_message(format!(
                "export table {name} provides version {} but version {version} was requested",
                table.version
            )));
        }
        Ok(table)
    }
}

fn global_registry() -> &'static CapsuleRegistry {
    static REGISTRY: OnceLock<CapsuleRegistry> = OnceLock::new();
    REGISTRY.get_or_init(CapsuleRegistry::with_core)
}

/// A module's one-shot import of an export table.
pub struct ApiImport {
    name: &'static str,
    version: u32,
    resolved: OnceLock<Result<&'static dblk_api, Error>>,
}

impl ApiImport {
    pub const fn new(name: &'static str, version: u32) -> Self {
        Self {
            name,
            version,
            resolved: OnceLock::new(),
        }
    }

    pub fn import(&self, registry: &CapsuleRegistry) -> Result<&'static dblk_api, &Error> {
        self.resolved
            .get_or_init(|| registry.resolve(self.name, self.version))
            .as_ref()
            .copied()
    }

    pub fn import_global(&self) -> Result<&'static dblk_api, &Error> {
        self.import(global_registry())
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }
}

/// Resolve a published table by name. Failures set the pending ABI error.
#[unsafe(no_mangle)]
pub extern "C" fn dblk_capsule_import(
    name: *const c_char,
    version: u32,
    out_api: *mut *const dblk_api,
) -> c_int {
    abi::run(|| {
        if name.is_null() || out_api.is_null() {
            return Err(Error::new(ErrorKind::Usage).with_message("name and out_api are required"));
        }
        let name = unsafe { CStr::from_ptr(name) }.to_str().map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("name is not valid UTF-8")
                .with_source(err)
        })?;
        let table = global_registry().resolve(name, version)?;
        unsafe {
            *out_api = table;
        }
        Ok(0)
    })
}
