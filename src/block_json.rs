//! Purpose: Convert JSON documents to and from data blocks and alias tables.
//! Exports: `block_from_json`, `block_to_json`, `value_to_json`, `aliases_from_json`,
//! `aliases_to_json`.
//! Role: Input/output bridge for the CLI; the library itself never parses JSON.
//! Invariants: Output is deterministic (sections and names come out sorted).
//! Invariants: Self-referencing sections render as `{"$cycle": true}` instead of recursing.
//! Invariants: Typed arrays are objects carrying `$dtype`; any other object is a section.
#![allow(clippy::result_large_err)]

use datablock::api::{
    AliasTable, ArrayData, Buffer, DType, DataBlock, Error, ErrorKind, Section, Value,
};
use serde_json::{Map, Number, Value as JsonValue, json};

const DTYPE_MARKER: &str = "$dtype";

/// Build a block from `{"section": {"name": value, ...}, ...}`.
pub fn block_from_json(document: &JsonValue, aliases: AliasTable) -> Result<DataBlock, Error> {
    let sections = document.as_object().ok_or_else(|| {
        Error::new(ErrorKind::Usage)
            .with_message("a block document must be a JSON object of sections")
            .with_hint("Use {\"section\": {\"name\": value}}.")
    })?;
    let block = DataBlock::with_aliases(aliases);
    for (section, entries) in sections {
        let entries = entries.as_object().ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message("each section must be a JSON object")
                .with_section(section)
        })?;
        block.set_section(section, &section_from_json(section, entries)?);
    }
    Ok(block)
}

fn section_from_json(section: &str, entries: &Map<String, JsonValue>) -> Result<Section, Error> {
    let mut values = Vec::with_capacity(entries.len());
    for (name, value) in entries {
        let value = value_from_json(value)
            .map_err(|err| err.with_section(section).with_name(name))?;
        values.push((name.clone(), value));
    }
    Ok(Section::from_entries(values))
}

fn value_from_json(value: &JsonValue) -> Result<Value, Error> {
    match value {
        JsonValue::Null => Err(Error::new(ErrorKind::Usage)
            .with_message("null is not a storable value")
            .with_hint("Omit the entry instead of setting it to null.")),
        JsonValue::Bool(flag) => Ok(Value::Int(i64::from(*flag))),
        JsonValue::Number(number) => Ok(number_value(number)),
        JsonValue::String(text) => Ok(Value::Str(text.clone())),
        JsonValue::Array(_) => Ok(Value::Buffer(inferred_buffer(value)?)),
        JsonValue::Object(map) if map.contains_key(DTYPE_MARKER) => {
            Ok(Value::Buffer(typed_buffer(map)?))
        }
        JsonValue::Object(map) => Ok(Value::Section(section_from_json("", map)?)),
    }
}

fn number_value(number: &Number) -> Value {
    match number.as_i64() {
        Some(value) => Value::Int(value),
        None => Value::Float(number.as_f64().unwrap_or(f64::NAN)),
    }
}

fn ragged() -> Error {
    Error::new(ErrorKind::Usage)
        .with_message("nested arrays must be rectangular")
        .with_hint("Every row at the same depth needs the same length.")
}

fn collect_numbers<'a>(
    value: &'a JsonValue,
    depth: usize,
    shape: &mut Vec<usize>,
    out: &mut Vec<&'a Number>,
) -> Result<(), Error> {
    match value {
        JsonValue::Array(items) => {
            if depth == shape.len() {
                if !out.is_empty() {
                    return Err(ragged());
                }
                shape.push(items.len());
            } else if shape[depth] != items.len() {
                return Err(ragged());
            }
            for item in items {
                collect_numbers(item, depth + 1, shape, out)?;
            }
            Ok(())
        }
        JsonValue::Number(number) => {
            if depth != shape.len() {
                return Err(ragged());
            }
            out.push(number);
            Ok(())
        }
        _ => Err(Error::new(ErrorKind::Usage).with_message("arrays may only hold numbers")),
    }
}

fn inferred_buffer(value: &JsonValue) -> Result<Buffer, Error> {
    let mut shape = Vec::new();
    let mut numbers = Vec::new();
    collect_numbers(value, 0, &mut shape, &mut numbers)?;
    let dtype = if !numbers.is_empty() && numbers.iter().all(|number| number.is_i64()) {
        DType::I64
    } else {
        DType::F64
    };
    Buffer::from_data(array_data(&numbers, dtype)?, &shape)
}

fn typed_buffer(map: &Map<String, JsonValue>) -> Result<Buffer, Error> {
    let dtype = map
        .get(DTYPE_MARKER)
        .and_then(JsonValue::as_str)
        .and_then(DType::parse)
        .ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message("$dtype must be one of i32, i64, f32, f64")
        })?;
    let data = map.get("data").ok_or_else(|| {
        Error::new(ErrorKind::Usage).with_message("typed arrays need a `data` list")
    })?;
    let mut natural_shape = Vec::new();
    let mut numbers = Vec::new();
    collect_numbers(data, 0, &mut natural_shape, &mut numbers)?;
    let shape = match map.get("shape") {
        None => natural_shape,
        Some(JsonValue::Array(extents)) => extents
            .iter()
            .map(|extent| {
                extent
                    .as_u64()
                    .and_then(|extent| usize::try_from(extent).ok())
                    .ok_or_else(|| {
                        Error::new(ErrorKind::Usage)
                            .with_message("shape extents must be non-negative integers")
                    })
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(Error::new(ErrorKind::Usage).with_message("shape must be a list"));
        }
    };
    Buffer::from_data(array_data(&numbers, dtype)?, &shape)
}

fn array_data(numbers: &[&Number], dtype: DType) -> Result<ArrayData, Error> {
    let out_of_range = || {
        Error::new(ErrorKind::Conversion)
            .with_message(format!("array element does not fit in {dtype}"))
    };
    let integers = || {
        numbers
            .iter()
            .map(|number| number.as_i64().ok_or_else(out_of_range))
            .collect::<Result<Vec<_>, _>>()
    };
    let floats = numbers
        .iter()
        .map(|number| number.as_f64().unwrap_or(f64::NAN));
    Ok(match dtype {
        DType::I32 => ArrayData::I32(
            integers()?
                .into_iter()
                .map(|value| i32::try_from(value).map_err(|_| out_of_range()))
                .collect::<Result<Vec<_>, _>>()?,
        ),
        DType::I64 => ArrayData::I64(integers()?),
        DType::F32 => ArrayData::F32(floats.map(|value| value as f32).collect()),
        DType::F64 => ArrayData::F64(floats.collect()),
    })
}

/// Parse `{"alias": "target"}` where keys are `section` or `section<sep>name`.
pub fn aliases_from_json(document: &JsonValue, sep: &str) -> Result<AliasTable, Error> {
    let pairs = document.as_object().ok_or_else(|| {
        Error::new(ErrorKind::Usage)
            .with_message("a mapping document must be a JSON object")
            .with_hint(format!("Use {{\"old{sep}x\": \"new{sep}y\", \"old\": \"new\"}}."))
    })?;
    let mut strings = Vec::with_capacity(pairs.len());
    for (alias, target) in pairs {
        let target = target.as_str().ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("mapping target for {alias} must be a string"))
        })?;
        strings.push((alias.as_str(), target));
    }
    AliasTable::from_pairs(strings, sep)
}

pub fn aliases_to_json(aliases: &AliasTable, sep: &str) -> JsonValue {
    let map = aliases
        .to_strings(sep)
        .into_iter()
        .map(|(alias, target)| (alias, JsonValue::String(target)))
        .collect::<Map<_, _>>();
    JsonValue::Object(map)
}

pub fn block_to_json(block: &DataBlock) -> JsonValue {
    let mut out = Map::new();
    let mut stack = Vec::new();
    for name in block.sections() {
        if let Ok(section) = block.get_section(&name) {
            out.insert(name, section_to_json(&section, &mut stack));
        }
    }
    JsonValue::Object(out)
}

pub fn value_to_json(value: &Value) -> JsonValue {
    value_json(value, &mut Vec::new())
}

fn section_to_json(section: &Section, stack: &mut Vec<Section>) -> JsonValue {
    if stack.iter().any(|open| open.ptr_eq(section)) {
        return json!({ "$cycle": true });
    }
    stack.push(section.clone());
    let map = section
        .entries()
        .into_iter()
        .map(|(name, value)| (name, value_json(&value, stack)))
        .collect::<Map<_, _>>();
    stack.pop();
    JsonValue::Object(map)
}

fn value_json(value: &Value, stack: &mut Vec<Section>) -> JsonValue {
    match value {
        Value::Int(value) => json!(value),
        Value::Float(value) => json!(value),
        Value::Str(text) => json!(text),
        Value::Handle(handle) => json!({ "$handle": format!("{:p}", handle.as_ptr()) }),
        Value::Buffer(buffer) => buffer_json(buffer),
        Value::Section(section) => section_to_json(section, stack),
    }
}

fn buffer_json(buffer: &Buffer) -> JsonValue {
    let data = match &*buffer.data() {
        ArrayData::I32(values) => json!(values),
        ArrayData::I64(values) => json!(values),
        ArrayData::F32(values) => json!(values),
        ArrayData::F64(values) => json!(values),
    };
    json!({
        DTYPE_MARKER: buffer.dtype().name(),
        "shape": buffer.shape(),
        "data": data,
    })
}
