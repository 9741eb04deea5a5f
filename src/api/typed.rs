//! Purpose: Typed scalar/array accessors and ownership-transfer helpers on `DataBlock`.
//! Exports: `BlockAccessExt`, `Scalar`, `ArrayRef`.
//! Role: What plugins call instead of matching on `Value` themselves.
//! Invariants: Reading an array as a wider type replaces the stored value with the converted copy.
//! Invariants: `ArrayRef` aliases stored memory; writes through it need no write-back.
//! Notes: An `ArrayRef` taken before a type reinterpretation keeps its old storage alive,
//! detached from the block.
#![allow(clippy::result_large_err)]

use crate::api::block::DataBlock;
use crate::core::buffer::{Buffer, Element};
use crate::core::error::{Error, ErrorKind};
use crate::core::value::{OpaqueHandle, Value};
use std::cell::{Ref, RefMut};
use std::marker::PhantomData;

/// Scalar types with a typed accessor.
pub trait Scalar: Sized {
    const TYPE_NAME: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
    fn into_value(self) -> Value;
}

impl Scalar for i64 {
    const TYPE_NAME: &'static str = "long";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(*v),
            Value::Buffer(buffer) => buffer.scalar_i64(),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Int(self)
    }
}

impl Scalar for i32 {
    const TYPE_NAME: &'static str = "int";

    fn from_value(value: &Value) -> Option<Self> {
        i64::from_value(value).and_then(|v| i32::try_from(v).ok())
    }

    fn into_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl Scalar for f64 {
    const TYPE_NAME: &'static str = "double";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Buffer(buffer) => buffer.scalar_f64(),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl Scalar for f32 {
    const TYPE_NAME: &'static str = "float";

    fn from_value(value: &Value) -> Option<Self> {
        f64::from_value(value).map(|v| v as f32)
    }

    fn into_value(self) -> Value {
        Value::Float(f64::from(self))
    }
}

impl Scalar for String {
    const TYPE_NAME: &'static str = "string";

    fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(str::to_string)
    }

    fn into_value(self) -> Value {
        Value::Str(self)
    }
}

impl Scalar for OpaqueHandle {
    const TYPE_NAME: &'static str = "handle";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Handle(handle) => Some(*handle),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Handle(self)
    }
}

/// Typed view of a stored buffer.
#[derive(Clone, Debug)]
pub struct ArrayRef<T: Element> {
    buffer: Buffer,
    _marker: PhantomData<T>,
}

impl<T: Element> ArrayRef<T> {
    fn new(buffer: Buffer) -> Self {
        Self {
            buffer,
            _marker: PhantomData,
        }
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn shape(&self) -> &[usize] {
        self.buffer.shape()
    }

    pub fn ndim(&self) -> usize {
        self.buffer.ndim()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn borrow(&self) -> Ref<'_, [T]> {
        Ref::map(self.buffer.data(), |data| T::slice(data).unwrap_or_default())
    }

    pub fn borrow_mut(&self) -> RefMut<'_, [T]> {
        RefMut::map(self.buffer.data_mut(), |data| {
            T::slice_mut(data).unwrap_or_default()
        })
    }

    pub fn as_mut_ptr(&self) -> *mut T {
        self.buffer
            .as_mut_ptr::<T>()
            .unwrap_or(std::ptr::null_mut())
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.borrow().to_vec()
    }
}

pub trait BlockAccessExt {
    fn get<T: Scalar>(&self, section: &str, name: &str) -> Result<T, Error>;

    /// `default` when the key is absent; a present value of the wrong type still fails.
    fn get_or<T: Scalar>(&self, section: &str, name: &str, default: T) -> Result<T, Error>;

    fn set<T: Scalar>(&self, section: &str, name: &str, value: T);

    fn get_array<T: Element>(&self, section: &str, name: &str) -> Result<ArrayRef<T>, Error>;

    /// The block takes ownership of `values`.
    fn set_array<T: Element>(
        &self,
        section: &str,
        name: &str,
        values: Vec<T>,
        shape: &[usize],
    ) -> Result<(), Error>;

    fn duplicate(
        &self,
        src_section: &str,
        src_name: &str,
        dst_section: &str,
        dst_name: &str,
    ) -> Result<(), Error>;

    fn move_value(
        &self,
        src_section: &str,
        src_name: &str,
        dst_section: &str,
        dst_name: &str,
    ) -> Result<(), Error>;
}

impl BlockAccessExt for DataBlock {
    fn get<T: Scalar>(&self, section: &str, name: &str) -> Result<T, Error> {
        let value = self.get_value(section, name)?;
        T::from_value(&value).ok_or_else(|| conversion_error(section, name, &value, T::TYPE_NAME))
    }

    fn get_or<T: Scalar>(&self, section: &str, name: &str, default: T) -> Result<T, Error> {
        if !self.has_value(section, name) {
            return Ok(default);
        }
        self.get(section, name)
    }

    fn set<T: Scalar>(&self, section: &str, name: &str, value: T) {
        self.set_value(section, name, value.into_value());
    }

    fn get_array<T: Element>(&self, section: &str, name: &str) -> Result<ArrayRef<T>, Error> {
        let value = self.get_value(section, name)?;
        let Value::Buffer(buffer) = &value else {
            return Err(conversion_error(section, name, &value, T::DTYPE.name()));
        };
        if buffer.dtype() == T::DTYPE {
            return Ok(ArrayRef::new(buffer.clone()));
        }
        let converted = buffer
            .cast(T::DTYPE)
            .map_err(|err| err.with_section(section).with_name(name))?;
        tracing::debug!(
            section,
            name,
            from = %buffer.dtype(),
            to = %T::DTYPE,
            "replaced stored array with converted copy"
        );
        self.set_value(section, name, Value::Buffer(converted.clone()));
        Ok(ArrayRef::new(converted))
    }

    fn set_array<T: Element>(
        &self,
        section: &str,
        name: &str,
        values: Vec<T>,
        shape: &[usize],
    ) -> Result<(), Error> {
        let buffer = Buffer::new(values, shape)
            .map_err(|err| err.with_section(section).with_name(name))?;
        self.set_value(section, name, Value::Buffer(buffer));
        Ok(())
    }

    fn duplicate(
        &self,
        src_section: &str,
        src_name: &str,
        dst_section: &str,
        dst_name: &str,
    ) -> Result<(), Error> {
        let value = self.get_value(src_section, src_name)?;
        self.set_value(dst_section, dst_name, value);
        Ok(())
    }

    fn move_value(
        &self,
        src_section: &str,
        src_name: &str,
        dst_section: &str,
        dst_name: &str,
    ) -> Result<(), Error> {
        let value = self.get_value(src_section, src_name)?;
        self.delete_value(src_section, src_name)?;
        self.set_value(dst_section, dst_name, value);
        Ok(())
    }
}

fn conversion_error(section: &str, name: &str, value: &Value, target: &str) -> Error {
    Error::new(ErrorKind::Conversion)
        .with_message(format!(
            "stored {} cannot be read as {target}",
            value.kind_name()
        ))
        .with_section(section)
        .with_name(name)
}
