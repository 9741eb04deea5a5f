//! Purpose: C ABI bridge for plugins compiled outside Rust (libdatablock).
//! Exports: `dblk_*` block, value, typed accessor, array, error, and logging functions.
//! Role: Stable ABI surface mirroring `BlockAccessExt` for C/C++/Fortran plugins.
//! Invariants: Opaque handles; explicit free functions; 0 on success, -1 on failure.
//! Invariants: Failures set a sticky per-thread pending error; gated calls refuse to run
//! until `dblk_clear_errors`.
//! Invariants: Error kind codes match `to_exit_code`.
//! Notes: Strings handed to C are owned by the caller and released with `dblk_string_free`.
//! Notes: `dblk_set_*_array` takes a `malloc`ed buffer; passing memory obtained from
//! `dblk_get_*_array` frees store-owned memory and is undefined behavior.
#![allow(clippy::result_large_err)]
#![allow(non_camel_case_types)]

use crate::api::{ArrayData, BlockAccessExt, DataBlock, OpaqueHandle, Scalar, Value};
use crate::core::buffer::element_count;
use crate::core::error::{Error, ErrorKind, to_exit_code};
use crate::logging::{self, LogLevel};
use std::cell::RefCell;
use std::ffi::{CStr, CString, c_void};
use std::os::raw::{c_char, c_int};
use std::ptr;

#[repr(C)]
pub struct dblk_block {
    block: DataBlock,
}

#[repr(C)]
pub struct dblk_value {
    value: Value,
}

#[repr(C)]
pub struct dblk_error {
    kind: i32,
    message: *mut c_char,
    section: *mut c_char,
    name: *mut c_char,
}

pub const DBLK_VALUE_INT: c_int = 0;
pub const DBLK_VALUE_FLOAT: c_int = 1;
pub const DBLK_VALUE_STRING: c_int = 2;
pub const DBLK_VALUE_HANDLE: c_int = 3;
pub const DBLK_VALUE_BUFFER: c_int = 4;
pub const DBLK_VALUE_SECTION: c_int = 5;

pub const DBLK_DTYPE_I32: c_int = 0;
pub const DBLK_DTYPE_I64: c_int = 1;
pub const DBLK_DTYPE_F32: c_int = 2;
pub const DBLK_DTYPE_F64: c_int = 3;

thread_local! {
    static PENDING: RefCell<Option<Error>> = const { RefCell::new(None) };
}

/// Owns a heap handle wrapping a clone of `block` for the duration of a foreign call.
pub(crate) struct RawBlock(*mut dblk_block);

impl RawBlock {
    pub(crate) fn new(block: &DataBlock) -> Self {
        Self(Box::into_raw(Box::new(dblk_block {
            block: block.clone(),
        })))
    }

    pub(crate) fn as_ptr(&self) -> *mut dblk_block {
        self.0
    }
}

impl Drop for RawBlock {
    fn drop(&mut self) {
        unsafe {
            drop(Box::from_raw(self.0));
        }
    }
}

pub(crate) fn take_pending_error() -> Option<Error> {
    PENDING.with(|pending| pending.borrow_mut().take())
}

pub(crate) fn pending_error_kind() -> Option<ErrorKind> {
    PENDING.with(|pending| pending.borrow().as_ref().map(Error::kind))
}

fn record(err: Error) -> c_int {
    tracing::debug!(error = %err, "abi call failed");
    PENDING.with(|pending| *pending.borrow_mut() = Some(err));
    -1
}

/// Run a gated entry point: refuse while an error is pending, record failures.
pub(crate) fn run(op: impl FnOnce() -> Result<c_int, Error>) -> c_int {
    if pending_error_kind().is_some() {
        return -1;
    }
    match op() {
        Ok(code) => code,
        Err(err) => record(err),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn dblk_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr().cast()
}

#[unsafe(no_mangle)]
pub extern "C" fn dblk_block_new() -> *mut dblk_block {
    Box::into_raw(Box::new(dblk_block {
        block: DataBlock::new(),
    }))
}

/// Independent store bound to the same alias table; null on failure.
#[unsafe(no_mangle)]
pub extern "C" fn dblk_block_copy(block: *mut dblk_block) -> *mut dblk_block {
    let mut out = ptr::null_mut();
    run(|| {
        let block = borrow_block(block)?;
        out = Box::into_raw(Box::new(dblk_block {
            block: block.block.copy(&[]),
        }));
        Ok(0)
    });
    out
}

#[unsafe(no_mangle)]
pub extern "C" fn dblk_block_free(block: *mut dblk_block) {
    if block.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(block));
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn dblk_clear_errors() {
    take_pending_error();
}

#[unsafe(no_mangle)]
pub extern "C" fn dblk_error_pending() -> c_int {
    if pending_error_kind().is_some() { 1 } else { 0 }
}

/// Copy the pending error into `out_err` without clearing it. Returns 1 if one was pending.
#[unsafe(no_mangle)]
pub extern "C" fn dblk_last_error(out_err: *mut *mut dblk_error) -> c_int {
    if out_err.is_null() {
        return -1;
    }
    let error = PENDING.with(|pending| {
        pending.borrow().as_ref().map(|err| {
            Box::into_raw(Box::new(dblk_error {
                kind: to_exit_code(err.kind()),
                message: to_c_string(&err.to_string()),
                section: err.section().map(to_c_string).unwrap_or(ptr::null_mut()),
                name: err.name().map(to_c_string).unwrap_or(ptr::null_mut()),
            }))
        })
    });
    unsafe {
        *out_err = error.unwrap_or(ptr::null_mut());
    }
    if error.is_some() { 1 } else { 0 }
}

#[unsafe(no_mangle)]
pub extern "C" fn dblk_error_free(err: *mut dblk_error) {
    if err.is_null() {
        return;
    }
    unsafe {
        let err = Box::from_raw(err);
        for text in [err.message, err.section, err.name] {
            if !text.is_null() {
                drop(CString::from_raw(text));
            }
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn dblk_string_free(text: *mut c_char) {
    if text.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(text));
    }
}

/// Returns 1 when present, 0 when absent or on invalid arguments. Never gated.
#[unsafe(no_mangle)]
pub extern "C" fn dblk_has_value(
    block: *mut dblk_block,
    section: *const c_char,
    name: *const c_char,
) -> c_int {
    let Ok(block) = borrow_block(block) else {
        return 0;
    };
    let Ok((section, name)) = key_args(section, name) else {
        return 0;
    };
    if block.block.has_value(section, name) { 1 } else { 0 }
}

#[unsafe(no_mangle)]
pub extern "C" fn dblk_del_value(
    block: *mut dblk_block,
    section: *const c_char,
    name: *const c_char,
) -> c_int {
    run(|| {
        let block = borrow_block(block)?;
        let (section, name) = key_args(section, name)?;
        block.block.delete_value(section, name)?;
        Ok(0)
    })
}

/// Stores a second reference to `value`; the caller keeps ownership of `value`.
#[unsafe(no_mangle)]
pub extern "C" fn dblk_set_value(
    block: *mut dblk_block,
    section: *const c_char,
    name: *const c_char,
    value: *const dblk_value,
) -> c_int {
    run(|| {
        let block = borrow_block(block)?;
        let (section, name) = key_args(section, name)?;
        let value = borrow_value(value)?;
        block.block.set_value(section, name, value.value.clone());
        Ok(0)
    })
}

/// Writes a new value handle to `out_value`. Returns 1 when `default` was used.
#[unsafe(no_mangle)]
pub extern "C" fn dblk_get_value(
    block: *mut dblk_block,
    section: *const c_char,
    name: *const c_char,
    default: *const dblk_value,
    out_value: *mut *mut dblk_value,
) -> c_int {
    run(|| {
        let block = borrow_block(block)?;
        let (section, name) = key_args(section, name)?;
        ensure_out(out_value, "out_value")?;
        let (value, code) = if !default.is_null() && !block.block.has_value(section, name) {
            (borrow_value(default)?.value.clone(), 1)
        } else {
            (block.block.get_value(section, name)?, 0)
        };
        unsafe {
            *out_value = Box::into_raw(Box::new(dblk_value { value }));
        }
        Ok(code)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn dblk_value_free(value: *mut dblk_value) {
    if value.is_null() {
        return;
    }
    unsafe {
        drop(Box::from_raw(value));
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn dblk_value_new_long(value: i64) -> *mut dblk_value {
    new_value(Value::Int(value))
}

#[unsafe(no_mangle)]
pub extern "C" fn dblk_value_new_double(value: f64) -> *mut dblk_value {
    new_value(Value::Float(value))
}

#[unsafe(no_mangle)]
pub extern "C" fn dblk_value_new_handle(value: *mut c_void) -> *mut dblk_value {
    new_value(Value::Handle(OpaqueHandle::new(value)))
}

/// Copies `value`; null when it is null or not UTF-8.
#[unsafe(no_mangle)]
pub extern "C" fn dblk_value_new_string(value: *const c_char) -> *mut dblk_value {
    match read_str(value, "value") {
        Ok(text) => new_value(Value::Str(text.to_string())),
        Err(_) => ptr::null_mut(),
    }
}

/// One of the `DBLK_VALUE_*` codes, or -1 for a null handle.
#[unsafe(no_mangle)]
pub extern "C" fn dblk_value_kind(value: *const dblk_value) -> c_int {
    let Ok(value) = borrow_value(value) else {
        return -1;
    };
    match value.value {
        Value::Int(_) => DBLK_VALUE_INT,
        Value::Float(_) => DBLK_VALUE_FLOAT,
        Value::Str(_) => DBLK_VALUE_STRING,
        Value::Handle(_) => DBLK_VALUE_HANDLE,
        Value::Buffer(_) => DBLK_VALUE_BUFFER,
        Value::Section(_) => DBLK_VALUE_SECTION,
    }
}

macro_rules! value_reader {
    ($name:ident, $c_ty:ty, $rust_ty:ty, $to_c:expr) => {
        /// Reads the payload under the typed accessor's conversion rules.
        #[unsafe(no_mangle)]
        pub extern "C" fn $name(value: *const dblk_value, out: *mut $c_ty) -> c_int {
            run(|| {
                let value = borrow_value(value)?;
                ensure_out(out, "out")?;
                let payload = <$rust_ty>::from_value(&value.value).ok_or_else(|| {
                    value_conversion_error(&value.value, <$rust_ty>::TYPE_NAME)
                })?;
                unsafe {
                    *out = ($to_c)(payload);
                }
                Ok(0)
            })
        }
    };
}

value_reader!(dblk_value_as_long, i64, i64, |payload: i64| payload);
value_reader!(dblk_value_as_double, f64, f64, |payload: f64| payload);
value_reader!(
    dblk_value_as_handle,
    *mut c_void,
    OpaqueHandle,
    |payload: OpaqueHandle| payload.as_ptr()
);

/// Writes a newly allocated copy to `out`; release it with `dblk_string_free`.
#[unsafe(no_mangle)]
pub extern "C" fn dblk_value_as_string(value: *const dblk_value, out: *mut *mut c_char) -> c_int {
    run(|| {
        let value = borrow_value(value)?;
        ensure_out(out, "out")?;
        let text = String::from_value(&value.value)
            .ok_or_else(|| value_conversion_error(&value.value, String::TYPE_NAME))?;
        let text = CString::new(text).map_err(|err| {
            Error::new(ErrorKind::Conversion)
                .with_message("string contains an interior NUL byte")
                .with_source(err)
        })?;
        unsafe {
            *out = text.into_raw();
        }
        Ok(0)
    })
}

/// View of a buffer value. `out_data` and `out_shape` alias memory kept alive by `value`.
#[unsafe(no_mangle)]
pub extern "C" fn dblk_value_buffer(
    value: *const dblk_value,
    out_dtype: *mut c_int,
    out_data: *mut *mut c_void,
    out_ndim: *mut c_int,
    out_shape: *mut *const usize,
) -> c_int {
    run(|| {
        let value = borrow_value(value)?;
        ensure_out(out_dtype, "out_dtype")?;
        ensure_out(out_data, "out_data")?;
        ensure_out(out_ndim, "out_ndim")?;
        ensure_out(out_shape, "out_shape")?;
        let Value::Buffer(buffer) = &value.value else {
            return Err(value_conversion_error(&value.value, "buffer"));
        };
        let ndim = c_int::try_from(buffer.ndim()).map_err(|_| {
            Error::new(ErrorKind::Conversion).with_message("array rank does not fit in int")
        })?;
        let (dtype, data) = match &mut *buffer.data_mut() {
            ArrayData::I32(values) => (DBLK_DTYPE_I32, values.as_mut_ptr().cast::<c_void>()),
            ArrayData::I64(values) => (DBLK_DTYPE_I64, values.as_mut_ptr().cast::<c_void>()),
            ArrayData::F32(values) => (DBLK_DTYPE_F32, values.as_mut_ptr().cast::<c_void>()),
            ArrayData::F64(values) => (DBLK_DTYPE_F64, values.as_mut_ptr().cast::<c_void>()),
        };
        unsafe {
            *out_dtype = dtype;
            *out_data = data;
            *out_ndim = ndim;
            *out_shape = buffer.shape_ptr();
        }
        Ok(0)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn dblk_duplicate_value(
    block: *mut dblk_block,
    src_section: *const c_char,
    src_name: *const c_char,
    dst_section: *const c_char,
    dst_name: *const c_char,
) -> c_int {
    run(|| {
        let block = borrow_block(block)?;
        let (src_section, src_name) = key_args(src_section, src_name)?;
        let (dst_section, dst_name) = key_args(dst_section, dst_name)?;
        block
            .block
            .duplicate(src_section, src_name, dst_section, dst_name)?;
        Ok(0)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn dblk_move_value(
    block: *mut dblk_block,
    src_section: *const c_char,
    src_name: *const c_char,
    dst_section: *const c_char,
    dst_name: *const c_char,
) -> c_int {
    run(|| {
        let block = borrow_block(block)?;
        let (src_section, src_name) = key_args(src_section, src_name)?;
        let (dst_section, dst_name) = key_args(dst_section, dst_name)?;
        block
            .block
            .move_value(src_section, src_name, dst_section, dst_name)?;
        Ok(0)
    })
}

macro_rules! scalar_accessors {
    ($get:ident, $get_default:ident, $set:ident, $c_ty:ty, $rust_ty:ty, $to_c:expr, $from_c:expr) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn $get(
            block: *mut dblk_block,
            section: *const c_char,
            name: *const c_char,
            out: *mut $c_ty,
        ) -> c_int {
            run(|| {
                let block = borrow_block(block)?;
                let (section, name) = key_args(section, name)?;
                ensure_out(out, "out")?;
                let value = block.block.get::<$rust_ty>(section, name)?;
                unsafe {
                    *out = ($to_c)(value);
                }
                Ok(0)
            })
        }

        /// Returns 1 when `default` was written because the key is absent.
        #[unsafe(no_mangle)]
        pub extern "C" fn $get_default(
            block: *mut dblk_block,
            section: *const c_char,
            name: *const c_char,
            out: *mut $c_ty,
            default: $c_ty,
        ) -> c_int {
            run(|| {
                let block = borrow_block(block)?;
                let (section, name) = key_args(section, name)?;
                ensure_out(out, "out")?;
                if !block.block.has_value(section, name) {
                    unsafe {
                        *out = default;
                    }
                    return Ok(1);
                }
                let value = block.block.get::<$rust_ty>(section, name)?;
                unsafe {
                    *out = ($to_c)(value);
                }
                Ok(0)
            })
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn $set(
            block: *mut dblk_block,
            section: *const c_char,
            name: *const c_char,
            value: $c_ty,
        ) -> c_int {
            run(|| {
                let block = borrow_block(block)?;
                let (section, name) = key_args(section, name)?;
                block.block.set::<$rust_ty>(section, name, ($from_c)(value));
                Ok(0)
            })
        }
    };
}

scalar_accessors!(
    dblk_get_int,
    dblk_get_int_default,
    dblk_set_int,
    c_int,
    i32,
    |value: i32| value,
    |value: c_int| value
);
scalar_accessors!(
    dblk_get_long,
    dblk_get_long_default,
    dblk_set_long,
    i64,
    i64,
    |value: i64| value,
    |value: i64| value
);
scalar_accessors!(
    dblk_get_float,
    dblk_get_float_default,
    dblk_set_float,
    f32,
    f32,
    |value: f32| value,
    |value: f32| value
);
scalar_accessors!(
    dblk_get_double,
    dblk_get_double_default,
    dblk_set_double,
    f64,
    f64,
    |value: f64| value,
    |value: f64| value
);
scalar_accessors!(
    dblk_get_handle,
    dblk_get_handle_default,
    dblk_set_handle,
    *mut c_void,
    OpaqueHandle,
    |value: OpaqueHandle| value.as_ptr(),
    OpaqueHandle::new
);

/// Writes a newly allocated copy to `out`; release it with `dblk_string_free`.
#[unsafe(no_mangle)]
pub extern "C" fn dblk_get_string(
    block: *mut dblk_block,
    section: *const c_char,
    name: *const c_char,
    out: *mut *mut c_char,
) -> c_int {
    run(|| {
        let block = borrow_block(block)?;
        let (section, name) = key_args(section, name)?;
        ensure_out(out, "out")?;
        let text = block.block.get::<String>(section, name)?;
        let text = owned_c_string(text, section, name)?;
        unsafe {
            *out = text;
        }
        Ok(0)
    })
}

/// Like `dblk_get_string`, but copies `default` (and returns 1) when the key is absent.
#[unsafe(no_mangle)]
pub extern "C" fn dblk_get_string_default(
    block: *mut dblk_block,
    section: *const c_char,
    name: *const c_char,
    out: *mut *mut c_char,
    default: *const c_char,
) -> c_int {
    run(|| {
        let block = borrow_block(block)?;
        let (section, name) = key_args(section, name)?;
        ensure_out(out, "out")?;
        let (text, code) = if block.block.has_value(section, name) {
            (block.block.get::<String>(section, name)?, 0)
        } else {
            (read_str(default, "default")?.to_string(), 1)
        };
        let text = owned_c_string(text, section, name)?;
        unsafe {
            *out = text;
        }
        Ok(code)
    })
}

/// Stores a copy of `value`.
#[unsafe(no_mangle)]
pub extern "C" fn dblk_set_string(
    block: *mut dblk_block,
    section: *const c_char,
    name: *const c_char,
    value: *const c_char,
) -> c_int {
    run(|| {
        let block = borrow_block(block)?;
        let (section, name) = key_args(section, name)?;
        let value = read_str(value, "value")?;
        block.block.set(section, name, value.to_string());
        Ok(0)
    })
}

macro_rules! array_accessors {
    ($get:ident, $set:ident, $ty:ty) => {
        /// `out_data` and `out_shape` alias store-owned memory; do not free them.
        #[unsafe(no_mangle)]
        pub extern "C" fn $get(
            block: *mut dblk_block,
            section: *const c_char,
            name: *const c_char,
            out_data: *mut *mut $ty,
            out_ndim: *mut c_int,
            out_shape: *mut *const usize,
        ) -> c_int {
            run(|| {
                let block = borrow_block(block)?;
                let (section, name) = key_args(section, name)?;
                ensure_out(out_data, "out_data")?;
                ensure_out(out_ndim, "out_ndim")?;
                ensure_out(out_shape, "out_shape")?;
                let array = block.block.get_array::<$ty>(section, name)?;
                let ndim = c_int::try_from(array.ndim()).map_err(|_| {
                    Error::new(ErrorKind::Conversion)
                        .with_message("array rank does not fit in int")
                        .with_section(section)
                        .with_name(name)
                })?;
                unsafe {
                    *out_data = array.as_mut_ptr();
                    *out_ndim = ndim;
                    *out_shape = array.buffer().shape_ptr();
                }
                Ok(0)
            })
        }

        /// On success the store owns `data` (allocated with `malloc`); `shape` is copied.
        #[unsafe(no_mangle)]
        pub extern "C" fn $set(
            block: *mut dblk_block,
            section: *const c_char,
            name: *const c_char,
            data: *mut $ty,
            ndim: c_int,
            shape: *const usize,
        ) -> c_int {
            run(|| {
                let block = borrow_block(block)?;
                let (section, name) = key_args(section, name)?;
                let shape = read_shape(ndim, shape)?;
                let len = element_count(&shape)?;
                if len.checked_mul(size_of::<$ty>()).is_none_or(|bytes| bytes > isize::MAX as usize) {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message(format!("shape {shape:?} exceeds the addressable size")));
                }
                if data.is_null() && len > 0 {
                    return Err(Error::new(ErrorKind::Usage).with_message("data is null"));
                }
                let values = if data.is_null() {
                    Vec::new()
                } else {
                    unsafe { std::slice::from_raw_parts(data, len) }.to_vec()
                };
                block.block.set_array(section, name, values, &shape)?;
                unsafe {
                    libc::free(data.cast());
                }
                Ok(0)
            })
        }
    };
}

array_accessors!(dblk_get_int_array, dblk_set_int_array, i32);
array_accessors!(dblk_get_long_array, dblk_set_long_array, i64);
array_accessors!(dblk_get_float_array, dblk_set_float_array, f32);
array_accessors!(dblk_get_double_array, dblk_set_double_array, f64);

#[unsafe(no_mangle)]
pub extern "C" fn dblk_log_info(logger: *const c_char, message: *const c_char) -> c_int {
    log_with(LogLevel::Info, logger, message)
}

#[unsafe(no_mangle)]
pub extern "C" fn dblk_log_warning(logger: *const c_char, message: *const c_char) -> c_int {
    log_with(LogLevel::Warning, logger, message)
}

#[unsafe(no_mangle)]
pub extern "C" fn dblk_log_debug(logger: *const c_char, message: *const c_char) -> c_int {
    log_with(LogLevel::Debug, logger, message)
}

#[unsafe(no_mangle)]
pub extern "C" fn dblk_log_error(logger: *const c_char, message: *const c_char) -> c_int {
    log_with(LogLevel::Error, logger, message)
}

// Not gated, and never sets the pending error.
fn log_with(level: LogLevel, logger: *const c_char, message: *const c_char) -> c_int {
    let Ok(logger) = read_str(logger, "logger") else {
        return -1;
    };
    let Ok(message) = read_str(message, "message") else {
        return -1;
    };
    logging::log(level, logger, message);
    0
}

fn new_value(value: Value) -> *mut dblk_value {
    Box::into_raw(Box::new(dblk_value { value }))
}

fn borrow_block<'a>(block: *mut dblk_block) -> Result<&'a dblk_block, Error> {
    if block.is_null() {
        return Err(Error::new(ErrorKind::Usage).with_message("block is null"));
    }
    unsafe { Ok(&*block) }
}

fn borrow_value<'a>(value: *const dblk_value) -> Result<&'a dblk_value, Error> {
    if value.is_null() {
        return Err(Error::new(ErrorKind::Usage).with_message("value is null"));
    }
    unsafe { Ok(&*value) }
}

fn ensure_out<T>(out: *mut T, label: &str) -> Result<(), Error> {
    if out.is_null() {
        return Err(Error::new(ErrorKind::Usage).with_message(format!("{label} is null")));
    }
    Ok(())
}

fn read_str<'a>(input: *const c_char, label: &str) -> Result<&'a str, Error> {
    if input.is_null() {
        return Err(Error::new(ErrorKind::Usage).with_message(format!("{label} is null")));
    }
    unsafe { CStr::from_ptr(input) }.to_str().map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("{label} is not valid UTF-8"))
            .with_source(err)
    })
}

fn key_args<'a>(
    section: *const c_char,
    name: *const c_char,
) -> Result<(&'a str, &'a str), Error> {
    Ok((read_str(section, "section")?, read_str(name, "name")?))
}

fn read_shape(ndim: c_int, shape: *const usize) -> Result<Vec<usize>, Error> {
    let ndim = usize::try_from(ndim)
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("ndim is negative"))?;
    if ndim == 0 {
        return Ok(Vec::new());
    }
    if shape.is_null() {
        return Err(Error::new(ErrorKind::Usage).with_message("shape is null"));
    }
    Ok(unsafe { std::slice::from_raw_parts(shape, ndim) }.to_vec())
}

fn value_conversion_error(value: &Value, target: &str) -> Error {
    Error::new(ErrorKind::Conversion).with_message(format!(
        "{} value cannot be read as {target}",
        value.kind_name()
    ))
}

fn owned_c_string(text: String, section: &str, name: &str) -> Result<*mut c_char, Error> {
    CString::new(text)
        .map(CString::into_raw)
        .map_err(|err| {
            Error::new(ErrorKind::Conversion)
                .with_message("string contains an interior NUL byte")
                .with_section(section)
                .with_name(name)
                .with_source(err)
        })
}

fn to_c_string(input: &str) -> *mut c_char {
    CString::new(input)
        .map(|s| s.into_raw())
        .unwrap_or(ptr::null_mut())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(text: &str) -> CString {
        CString::new(text).expect("cstring")
    }

    #[test]
    fn pending_error_is_sticky_until_cleared() {
        dblk_clear_errors();
        let block = dblk_block_new();
        let (section, name) = (c("params"), c("x"));

        assert_eq!(dblk_set_long(block, section.as_ptr(), name.as_ptr(), 5), 0);
        assert_eq!(dblk_del_value(block, section.as_ptr(), name.as_ptr()), 0);
        assert_eq!(dblk_del_value(block, section.as_ptr(), name.as_ptr()), -1);
        assert_eq!(dblk_error_pending(), 1);
        assert_eq!(pending_error_kind(), Some(ErrorKind::NotFound));

        assert_eq!(dblk_set_long(block, section.as_ptr(), name.as_ptr(), 6), -1);
        assert_eq!(dblk_has_value(block, section.as_ptr(), name.as_ptr()), 0);

        dblk_clear_errors();
        assert_eq!(dblk_set_long(block, section.as_ptr(), name.as_ptr(), 6), 0);
        let mut out = 0i64;
        assert_eq!(dblk_get_long(block, section.as_ptr(), name.as_ptr(), &mut out), 0);
        assert_eq!(out, 6);
        dblk_block_free(block);
    }

    #[test]
    fn last_error_reports_kind_and_key() {
        dblk_clear_errors();
        let block = dblk_block_new();
        let (section, name) = (c("params"), c("missing"));
        let mut out = 0.0f64;
        assert_eq!(
            dblk_get_double(block, section.as_ptr(), name.as_ptr(), &mut out),
            -1
        );

        let mut err: *mut dblk_error = ptr::null_mut();
        assert_eq!(dblk_last_error(&mut err), 1);
        assert!(!err.is_null());
        unsafe {
            assert_eq!((*err).kind, 3);
            assert!(!(*err).message.is_null());
        }
        dblk_error_free(err);
        dblk_clear_errors();
        assert_eq!(dblk_last_error(&mut err), 0);
        assert!(err.is_null());
        dblk_block_free(block);
    }

    #[test]
    fn default_getters_report_default_use() {
        dblk_clear_errors();
        let block = dblk_block_new();
        let (section, name) = (c("params"), c("n"));
        let mut out = 0;
        assert_eq!(
            dblk_get_int_default(block, section.as_ptr(), name.as_ptr(), &mut out, 42),
            1
        );
        assert_eq!(out, 42);
        assert_eq!(dblk_has_value(block, section.as_ptr(), name.as_ptr()), 0);

        assert_eq!(dblk_set_int(block, section.as_ptr(), name.as_ptr(), 7), 0);
        assert_eq!(
            dblk_get_int_default(block, section.as_ptr(), name.as_ptr(), &mut out, 42),
            0
        );
        assert_eq!(out, 7);
        dblk_block_free(block);
    }

    #[test]
    fn strings_are_copied_both_ways() {
        dblk_clear_errors();
        let block = dblk_block_new();
        let (section, name, value) = (c("params"), c("label"), c("planck"));
        assert_eq!(
            dblk_set_string(block, section.as_ptr(), name.as_ptr(), value.as_ptr()),
            0
        );
        drop(value);

        let mut out: *mut c_char = ptr::null_mut();
        assert_eq!(
            dblk_get_string(block, section.as_ptr(), name.as_ptr(), &mut out),
            0
        );
        let text = unsafe { CStr::from_ptr(out) }.to_str().expect("utf8").to_string();
        assert_eq!(text, "planck");
        dblk_string_free(out);
        dblk_block_free(block);
    }

    #[test]
    fn set_array_takes_malloced_buffer() {
        dblk_clear_errors();
        let block = dblk_block_new();
        let (section, name) = (c("params"), c("grid"));
        let shape = [2usize, 2];
        let data = unsafe { libc::malloc(4 * std::mem::size_of::<f64>()) } as *mut f64;
        assert!(!data.is_null());
        for i in 0..4 {
            unsafe { *data.add(i) = i as f64 };
        }
        assert_eq!(
            dblk_set_double_array(block, section.as_ptr(), name.as_ptr(), data, 2, shape.as_ptr()),
            0
        );

        let mut out_data: *mut f64 = ptr::null_mut();
        let mut out_ndim: c_int = 0;
        let mut out_shape: *const usize = ptr::null();
        assert_eq!(
            dblk_get_double_array(
                block,
                section.as_ptr(),
                name.as_ptr(),
                &mut out_data,
                &mut out_ndim,
                &mut out_shape,
            ),
            0
        );
        assert_eq!(out_ndim, 2);
        unsafe {
            assert_eq!(*out_shape.add(1), 2);
            assert_eq!(*out_data.add(3), 3.0);
            *out_data.add(3) = 30.0;
        }
        let stored = unsafe { &*block }
            .block
            .get_array::<f64>("params", "grid")
            .expect("grid")
            .to_vec();
        assert_eq!(stored, vec![0.0, 1.0, 2.0, 30.0]);
        dblk_block_free(block);
    }

    #[test]
    fn get_value_with_default_leaves_store_untouched() {
        dblk_clear_errors();
        let block = dblk_block_new();
        let (section, name) = (c("params"), c("n"));
        let default = dblk_value_new_long(9);
        let mut out: *mut dblk_value = ptr::null_mut();
        assert_eq!(
            dblk_get_value(block, section.as_ptr(), name.as_ptr(), default, &mut out),
            1
        );
        assert_eq!(dblk_value_kind(out), DBLK_VALUE_INT);
        assert_eq!(dblk_has_value(block, section.as_ptr(), name.as_ptr()), 0);
        dblk_value_free(out);
        dblk_value_free(default);
        dblk_block_free(block);
    }

    #[test]
    fn overflowing_shape_is_rejected_and_caller_keeps_data() {
        dblk_clear_errors();
        let block = dblk_block_new();
        let (section, name) = (c("params"), c("grid"));
        let data = unsafe { libc::malloc(std::mem::size_of::<i32>()) } as *mut i32;
        assert!(!data.is_null());

        let shape = [usize::MAX / 2, 3];
        assert_eq!(
            dblk_set_int_array(block, section.as_ptr(), name.as_ptr(), data, 2, shape.as_ptr()),
            -1
        );
        assert_eq!(pending_error_kind(), Some(ErrorKind::Usage));
        dblk_clear_errors();

        let shape = [usize::MAX / 4];
        assert_eq!(
            dblk_set_int_array(block, section.as_ptr(), name.as_ptr(), data, 1, shape.as_ptr()),
            -1
        );
        assert_eq!(pending_error_kind(), Some(ErrorKind::Usage));
        assert_eq!(dblk_has_value(block, section.as_ptr(), name.as_ptr()), 0);
        dblk_clear_errors();
        // Rejected calls leave `data` with the caller.
        unsafe { libc::free(data.cast()) };
        dblk_block_free(block);
    }

    #[test]
    fn value_readers_follow_accessor_conversions() {
        dblk_clear_errors();
        let long = dblk_value_new_long(12);
        let mut as_double = 0.0f64;
        assert_eq!(dblk_value_as_double(long, &mut as_double), 0);
        assert_eq!(as_double, 12.0);

        let label = c("lcdm");
        let text = dblk_value_new_string(label.as_ptr());
        let mut out: *mut c_char = ptr::null_mut();
        assert_eq!(dblk_value_as_string(text, &mut out), 0);
        assert_eq!(unsafe { CStr::from_ptr(out) }.to_str().expect("utf8"), "lcdm");
        dblk_string_free(out);

        let mut as_long = 0i64;
        assert_eq!(dblk_value_as_long(text, &mut as_long), -1);
        assert_eq!(pending_error_kind(), Some(ErrorKind::Conversion));
        dblk_clear_errors();

        let mut marker = 5u8;
        let handle = dblk_value_new_handle((&mut marker as *mut u8).cast());
        let mut raw: *mut c_void = ptr::null_mut();
        assert_eq!(dblk_value_as_handle(handle, &mut raw), 0);
        assert_eq!(raw, (&mut marker as *mut u8).cast::<c_void>());

        for value in [long, text, handle] {
            dblk_value_free(value);
        }
    }

    #[test]
    fn buffer_view_aliases_stored_array() {
        dblk_clear_errors();
        let block = dblk_block_new();
        unsafe { &*block }
            .block
            .set_array("params", "grid", vec![1i64, 2, 3], &[3])
            .expect("grid");
        let (section, name) = (c("params"), c("grid"));
        let mut value: *mut dblk_value = ptr::null_mut();
        assert_eq!(
            dblk_get_value(block, section.as_ptr(), name.as_ptr(), ptr::null(), &mut value),
            0
        );

        let mut dtype = -1;
        let mut data: *mut c_void = ptr::null_mut();
        let mut ndim = 0;
        let mut shape: *const usize = ptr::null();
        assert_eq!(dblk_value_buffer(value, &mut dtype, &mut data, &mut ndim, &mut shape), 0);
        assert_eq!(dtype, DBLK_DTYPE_I64);
        assert_eq!(ndim, 1);
        unsafe {
            assert_eq!(*shape, 3);
            *data.cast::<i64>().add(2) = 30;
        }
        dblk_value_free(value);
        let stored = unsafe { &*block }
            .block
            .get_array::<i64>("params", "grid")
            .expect("grid")
            .to_vec();
        assert_eq!(stored, vec![1, 2, 30]);

        let scalar = dblk_value_new_long(1);
        assert_eq!(dblk_value_buffer(scalar, &mut dtype, &mut data, &mut ndim, &mut shape), -1);
        dblk_clear_errors();
        dblk_value_free(scalar);
        dblk_block_free(block);
    }

    #[test]
    fn block_copy_is_independent_and_version_is_set() {
        dblk_clear_errors();
        let version = unsafe { CStr::from_ptr(dblk_version()) };
        assert_eq!(version.to_str().expect("utf8"), env!("CARGO_PKG_VERSION"));

        let block = dblk_block_new();
        let (section, name) = (c("params"), c("n"));
        assert_eq!(dblk_set_long(block, section.as_ptr(), name.as_ptr(), 1), 0);
        let copy = dblk_block_copy(block);
        assert!(!copy.is_null());
        assert_eq!(dblk_set_long(copy, section.as_ptr(), name.as_ptr(), 2), 0);

        let mut out = 0i64;
        assert_eq!(dblk_get_long(block, section.as_ptr(), name.as_ptr(), &mut out), 0);
        assert_eq!(out, 1);
        assert_eq!(dblk_get_long(copy, section.as_ptr(), name.as_ptr(), &mut out), 0);
        assert_eq!(out, 2);

        assert!(dblk_block_copy(ptr::null_mut()).is_null());
        assert_eq!(pending_error_kind(), Some(ErrorKind::Usage));
        dblk_clear_errors();
        dblk_block_free(copy);
        dblk_block_free(block);
    }

    #[test]
    fn log_bridge_rejects_null_without_poisoning() {
        dblk_clear_errors();
        let logger = c("module");
        assert_eq!(dblk_log_info(logger.as_ptr(), ptr::null()), -1);
        assert_eq!(dblk_error_pending(), 0);
        let message = c("hello");
        assert_eq!(dblk_log_debug(logger.as_ptr(), message.as_ptr()), 0);
    }
}
