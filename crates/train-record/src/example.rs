use std::collections::BTreeMap;

use crate::{Error, Result};

// Message layout: an example holds features (field 1), features hold map
// entries (field 1) of name (field 1) and feature (field 2), a float feature
// holds a float list (field 2) with packed values (field 1).
const EXAMPLE_FEATURES: u32 = 1;
const FEATURES_ENTRY: u32 = 1;
const ENTRY_NAME: u32 = 1;
const ENTRY_FEATURE: u32 = 2;
const FEATURE_BYTES_LIST: u32 = 1;
const FEATURE_FLOAT_LIST: u32 = 2;
const FEATURE_INT64_LIST: u32 = 3;
const FLOAT_LIST_VALUE: u32 = 1;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LENGTH_DELIMITED: u8 = 2;
const WIRE_FIXED32: u8 = 5;

/// Decoded example message, features keyed by name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureRecord {
    features: BTreeMap<String, Vec<f32>>,
}

impl FeatureRecord {
    pub fn float_feature(&self, name: &str) -> Option<&[f32]> {
        self.features.get(name).map(Vec::as_slice)
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Serialize named float features as an example message.
pub fn encode_example(features: &[(&str, &[f32])]) -> Vec<u8> {
    let mut feature_map = Vec::new();
    for (name, values) in features {
        let mut packed = Vec::with_capacity(values.len() * 4);
        for value in *values {
            packed.extend_from_slice(&value.to_le_bytes());
        }

        let mut float_list = Vec::new();
        write_field(&mut float_list, FLOAT_LIST_VALUE, &packed);

        let mut feature = Vec::new();
        write_field(&mut feature, FEATURE_FLOAT_LIST, &float_list);

        let mut entry = Vec::new();
        write_field(&mut entry, ENTRY_NAME, name.as_bytes());
        write_field(&mut entry, ENTRY_FEATURE, &feature);

        write_field(&mut feature_map, FEATURES_ENTRY, &entry);
    }

    let mut example = Vec::new();
    write_field(&mut example, EXAMPLE_FEATURES, &feature_map);
    example
}

/// Parse an example message, collecting every float feature.
///
/// Unknown fields are skipped, a bytes or int64 feature is rejected since
/// readers of these datasets expect float payloads throughout.
pub fn decode_example(data: &[u8]) -> Result<FeatureRecord> {
    let mut features = BTreeMap::new();

    let mut reader = WireReader::new(data);
    while !reader.done() {
        let (field, wire_type) = reader.tag()?;
        if field == EXAMPLE_FEATURES && wire_type == WIRE_LENGTH_DELIMITED {
            decode_features(reader.length_delimited()?, &mut features)?;
        } else {
            reader.skip(wire_type)?;
        }
    }

    Ok(FeatureRecord { features })
}

fn decode_features(data: &[u8], features: &mut BTreeMap<String, Vec<f32>>) -> Result {
    let mut reader = WireReader::new(data);
    while !reader.done() {
        let (field, wire_type) = reader.tag()?;
        if field == FEATURES_ENTRY && wire_type == WIRE_LENGTH_DELIMITED {
            decode_entry(reader.length_delimited()?, features)?;
        } else {
            reader.skip(wire_type)?;
        }
    }

    Ok(())
}

fn decode_entry(data: &[u8], features: &mut BTreeMap<String, Vec<f32>>) -> Result {
    let mut name = String::new();
    let mut values = Vec::new();

    let mut reader = WireReader::new(data);
    while !reader.done() {
        let (field, wire_type) = reader.tag()?;
        match (field, wire_type) {
            (ENTRY_NAME, WIRE_LENGTH_DELIMITED) => {
                name = String::from_utf8(reader.length_delimited()?.to_vec())
                    .map_err(|_| malformed("feature name is not valid utf-8"))?;
            }
            (ENTRY_FEATURE, WIRE_LENGTH_DELIMITED) => {
                decode_feature(reader.length_delimited()?, &mut values)?;
            }
            _ => reader.skip(wire_type)?,
        }
    }

    features.insert(name, values);
    Ok(())
}

fn decode_feature(data: &[u8], values: &mut Vec<f32>) -> Result {
    let mut reader = WireReader::new(data);
    while !reader.done() {
        let (field, wire_type) = reader.tag()?;
        match field {
            FEATURE_FLOAT_LIST if wire_type == WIRE_LENGTH_DELIMITED => {
                decode_float_list(reader.length_delimited()?, values)?;
            }
            FEATURE_BYTES_LIST => {
                return Err(Error::UnsupportedFeature("bytes_list".to_string()));
            }
            FEATURE_INT64_LIST => {
                return Err(Error::UnsupportedFeature("int64_list".to_string()));
            }
            _ => reader.skip(wire_type)?,
        }
    }

    Ok(())
}

fn decode_float_list(data: &[u8], values: &mut Vec<f32>) -> Result {
    let mut reader = WireReader::new(data);
    while !reader.done() {
        let (field, wire_type) = reader.tag()?;
        match (field, wire_type) {
            (FLOAT_LIST_VALUE, WIRE_LENGTH_DELIMITED) => {
                let packed = reader.length_delimited()?;
                if packed.len() % 4 != 0 {
                    return Err(malformed("packed float run is not a whole number of floats"));
                }
                values.reserve(packed.len() / 4);
                for chunk in packed.chunks_exact(4) {
                    values.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
                }
            }
            (FLOAT_LIST_VALUE, WIRE_FIXED32) => {
                let raw = reader.bytes(4)?;
                values.push(f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]));
            }
            _ => reader.skip(wire_type)?,
        }
    }

    Ok(())
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn write_field(out: &mut Vec<u8>, field: u32, payload: &[u8]) {
    write_varint(out, u64::from(field) << 3 | u64::from(WIRE_LENGTH_DELIMITED));
    write_varint(out, payload.len() as u64);
    out.extend_from_slice(payload);
}

fn malformed(message: &str) -> Error {
    Error::MalformedMessage(message.to_string())
}

struct WireReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> WireReader<'a> {
    fn new(data: &'a [u8]) -> WireReader<'a> {
        WireReader { data, offset: 0 }
    }

    fn done(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = *self
                .data
                .get(self.offset)
                .ok_or_else(|| malformed("varint runs past the end of the message"))?;
            self.offset += 1;

            if shift >= 64 {
                return Err(malformed("varint does not fit in 64 bits"));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn tag(&mut self) -> Result<(u32, u8)> {
        let tag = self.varint()?;
        Ok(((tag >> 3) as u32, (tag & 7) as u8))
    }

    fn bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(length)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| malformed("field runs past the end of the message"))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn length_delimited(&mut self) -> Result<&'a [u8]> {
        let length = self.varint()? as usize;
        self.bytes(length)
    }

    fn skip(&mut self, wire_type: u8) -> Result {
        match wire_type {
            WIRE_VARINT => {
                self.varint()?;
            }
            WIRE_FIXED64 => {
                self.bytes(8)?;
            }
            WIRE_LENGTH_DELIMITED => {
                self.length_delimited()?;
            }
            WIRE_FIXED32 => {
                self.bytes(4)?;
            }
            other => return Err(malformed(&format!("unsupported wire type {}", other))),
        }

        Ok(())
    }
}
