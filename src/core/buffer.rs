//! Purpose: Shared n-dimensional numeric buffers held as block values.
//! Exports: `Buffer`, `ArrayData`, `DType`, `Element`, `element_count`.
//! Role: Backing store for array values; cloning a `Buffer` shares its storage.
//! Invariants: Element count always equals the product of the shape extents.
//! Invariants: Casting only follows the safe (widening) table in `DType::can_cast_to`.
#![allow(clippy::result_large_err)]

use crate::core::error::{Error, ErrorKind};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DType {
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    pub fn name(self) -> &'static str {
        match self {
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "i32" | "int" => Some(DType::I32),
            "i64" | "long" => Some(DType::I64),
            "f32" | "float" => Some(DType::F32),
            "f64" | "double" => Some(DType::F64),
            _ => None,
        }
    }

    pub fn can_cast_to(self, target: DType) -> bool {
        self == target
            || matches!(
                (self, target),
                (DType::I32, DType::I64)
                    | (DType::I32, DType::F64)
                    | (DType::I64, DType::F64)
                    | (DType::F32, DType::F64)
            )
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ArrayData {
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl ArrayData {
    pub fn dtype(&self) -> DType {
        match self {
            ArrayData::I32(_) => DType::I32,
            ArrayData::I64(_) => DType::I64,
            ArrayData::F32(_) => DType::F32,
            ArrayData::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayData::I32(values) => values.len(),
            ArrayData::I64(values) => values.len(),
            ArrayData::F32(values) => values.len(),
            ArrayData::F64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cast(&self, target: DType) -> Option<ArrayData> {
        if self.dtype() == target {
            return Some(self.clone());
        }
        match (self, target) {
            (ArrayData::I32(values), DType::I64) => {
                Some(ArrayData::I64(values.iter().map(|&v| i64::from(v)).collect()))
            }
            (ArrayData::I32(values), DType::F64) => {
                Some(ArrayData::F64(values.iter().map(|&v| f64::from(v)).collect()))
            }
            (ArrayData::I64(values), DType::F64) => {
                Some(ArrayData::F64(values.iter().map(|&v| v as f64).collect()))
            }
            (ArrayData::F32(values), DType::F64) => {
                Some(ArrayData::F64(values.iter().map(|&v| f64::from(v)).collect()))
            }
            _ => None,
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Element types a `Buffer` can hold.
pub trait Element: Copy + PartialEq + fmt::Debug + sealed::Sealed + 'static {
    const DTYPE: DType;

    fn wrap(values: Vec<Self>) -> ArrayData;
    fn slice(data: &ArrayData) -> Option<&[Self]>;
    fn slice_mut(data: &mut ArrayData) -> Option<&mut [Self]>;
}

macro_rules! element {
    ($ty:ty, $variant:ident) => {
        impl sealed::Sealed for $ty {}

        impl Element for $ty {
            const DTYPE: DType = DType::$variant;

            fn wrap(values: Vec<Self>) -> ArrayData {
                ArrayData::$variant(values)
            }

            fn slice(data: &ArrayData) -> Option<&[Self]> {
                match data {
                    ArrayData::$variant(values) => Some(values),
                    _ => None,
                }
            }

            fn slice_mut(data: &mut ArrayData) -> Option<&mut [Self]> {
                match data {
                    ArrayData::$variant(values) => Some(values),
                    _ => None,
                }
            }
        }
    };
}

element!(i32, I32);
element!(i64, I64);
element!(f32, F32);
element!(f64, F64);

/// Product of the shape extents, or a Usage error when it overflows `usize`.
pub fn element_count(shape: &[usize]) -> Result<usize, Error> {
    shape
        .iter()
        .try_fold(1usize, |count, &extent| count.checked_mul(extent))
        .ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("shape {shape:?} overflows the addressable element count"))
        })
}

struct BufferInner {
    data: RefCell<ArrayData>,
    shape: Vec<usize>,
}

#[derive(Clone)]
pub struct Buffer {
    inner: Rc<BufferInner>,
}

impl Buffer {
    pub fn new<T: Element>(values: Vec<T>, shape: &[usize]) -> Result<Self, Error> {
        Self::from_data(T::wrap(values), shape)
    }

    pub fn from_data(data: ArrayData, shape: &[usize]) -> Result<Self, Error> {
        let expected = element_count(shape)?;
        if expected != data.len() {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "shape {shape:?} describes {expected} elements but {} were supplied",
                data.len()
            )));
        }
        Ok(Self::from_parts(data, shape.to_vec()))
    }

    /// One-dimensional buffer over `values`.
    pub fn vector<T: Element>(values: Vec<T>) -> Self {
        let shape = vec![values.len()];
        Self::from_parts(T::wrap(values), shape)
    }

    fn from_parts(data: ArrayData, shape: Vec<usize>) -> Self {
        Self {
            inner: Rc::new(BufferInner {
                data: RefCell::new(data),
                shape,
            }),
        }
    }

    pub fn dtype(&self) -> DType {
        self.inner.data.borrow().dtype()
    }

    pub fn shape(&self) -> &[usize] {
        &self.inner.shape
    }

    pub fn ndim(&self) -> usize {
        self.inner.shape.len()
    }

    pub fn len(&self) -> usize {
        self.inner.data.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn data(&self) -> Ref<'_, ArrayData> {
        self.inner.data.borrow()
    }

    pub fn data_mut(&self) -> RefMut<'_, ArrayData> {
        self.inner.data.borrow_mut()
    }

    pub fn view<T: Element>(&self) -> Option<Ref<'_, [T]>> {
        Ref::filter_map(self.inner.data.borrow(), T::slice).ok()
    }

    pub fn view_mut<T: Element>(&self) -> Option<RefMut<'_, [T]>> {
        RefMut::filter_map(self.inner.data.borrow_mut(), T::slice_mut).ok()
    }

    /// Raw pointer to the first element; stays valid while this storage is alive.
    pub fn as_mut_ptr<T: Element>(&self) -> Option<*mut T> {
        let mut data = self.inner.data.borrow_mut();
        T::slice_mut(&mut data).map(|values| values.as_mut_ptr())
    }

    pub fn shape_ptr(&self) -> *const usize {
        self.inner.shape.as_ptr()
    }

    pub fn to_vec<T: Element>(&self) -> Option<Vec<T>> {
        self.view::<T>().map(|values| values.to_vec())
    }

    /// Same storage when `target` matches, otherwise a widened copy.
    pub fn cast(&self, target: DType) -> Result<Buffer, Error> {
        let source = self.dtype();
        if source == target {
            return Ok(self.clone());
        }
        let data = self.inner.data.borrow().cast(target).ok_or_else(|| {
            Error::new(ErrorKind::Conversion).with_message(format!(
                "cannot cast array from {source} to {target} under safe casting rules"
            ))
        })?;
        Ok(Self::from_parts(data, self.inner.shape.clone()))
    }

    pub fn scalar_i64(&self) -> Option<i64> {
        let data = self.inner.data.borrow();
        if data.len() != 1 {
            return None;
        }
        match &*data {
            ArrayData::I32(values) => values.first().map(|&v| i64::from(v)),
            ArrayData::I64(values) => values.first().copied(),
            ArrayData::F32(_) | ArrayData::F64(_) => None,
        }
    }

    pub fn scalar_f64(&self) -> Option<f64> {
        let data = self.inner.data.borrow();
        if data.len() != 1 {
            return None;
        }
        match &*data {
            ArrayData::I32(values) => values.first().map(|&v| f64::from(v)),
            ArrayData::I64(values) => values.first().map(|&v| v as f64),
            ArrayData::F32(values) => values.first().map(|&v| f64::from(v)),
            ArrayData::F64(values) => values.first().copied(),
        }
    }
}

impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        self.inner.shape == other.inner.shape && *self.data() == *other.data()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("dtype", &self.dtype())
            .field("shape", &self.inner.shape)
            .finish()
    }
}
