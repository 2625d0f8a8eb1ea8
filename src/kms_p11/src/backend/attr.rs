// Copyright 2020-2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::ck;
use crate::{Error, Result};

/// A typed attribute value. The wire encodings are part of the contract
/// with callers and are bit-exact:
/// - booleans are exactly one byte, 0x00 or 0x01;
/// - unsigned longs are native-order `CK_ULONG` (64-bit, see `ck`);
/// - ulong lists serialise as an element count followed by the elements;
/// - big numbers are minimal unsigned big-endian, no leading zero.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttrValue {
    Bytes(Vec<u8>),
    Bool(bool),
    Ulong(ck::CK_ULONG),
    UlongList(Vec<ck::CK_ULONG>),
    BigNum(Vec<u8>),
    /// The attribute exists but its value is not disclosable. Reads fail
    /// with "attribute sensitive" and report no length.
    Sensitive,
}

impl AttrValue {
    /// Wire encoding, or None for the sensitive marker.
    pub fn encoded(&self) -> Option<Vec<u8>> {
        match self {
            Self::Bytes(v) => Some(v.clone()),
            Self::Bool(v) => Some(vec![*v as u8]),
            Self::Ulong(v) => Some(v.to_ne_bytes().to_vec()),
            Self::UlongList(list) => {
                let mut out = (list.len() as ck::CK_ULONG).to_ne_bytes().to_vec();
                for v in list {
                    out.extend_from_slice(&v.to_ne_bytes());
                }
                Some(out)
            }
            Self::BigNum(v) => Some(v.clone()),
            Self::Sensitive => None,
        }
    }
}

/// Ordered association from attribute code to typed value, codes unique.
/// `put` against an existing code replaces it in place, which makes
/// repeated writes of the same attribute idempotent.
#[derive(Clone, Debug, Default)]
pub struct AttributeMap {
    entries: Vec<(ck::CK_ATTRIBUTE_TYPE, AttrValue)>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&mut self, code: ck::CK_ATTRIBUTE_TYPE, value: AttrValue) {
        match self.entries.iter_mut().find(|(c, _)| *c == code) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((code, value)),
        }
    }

    pub fn put_bytes(&mut self, code: ck::CK_ATTRIBUTE_TYPE, value: Vec<u8>) {
        self.put(code, AttrValue::Bytes(value));
    }

    pub fn put_str(&mut self, code: ck::CK_ATTRIBUTE_TYPE, value: &str) {
        self.put(code, AttrValue::Bytes(value.as_bytes().to_vec()));
    }

    pub fn put_bool(&mut self, code: ck::CK_ATTRIBUTE_TYPE, value: bool) {
        self.put(code, AttrValue::Bool(value));
    }

    pub fn put_ulong(&mut self, code: ck::CK_ATTRIBUTE_TYPE, value: ck::CK_ULONG) {
        self.put(code, AttrValue::Ulong(value));
    }

    pub fn put_ulong_list(&mut self, code: ck::CK_ATTRIBUTE_TYPE, value: Vec<ck::CK_ULONG>) {
        self.put(code, AttrValue::UlongList(value));
    }

    /// Store an unsigned big-endian integer, normalised to its minimal
    /// encoding.
    pub fn put_bignum(&mut self, code: ck::CK_ATTRIBUTE_TYPE, value: Vec<u8>) {
        let first = value.iter().position(|&b| b != 0).unwrap_or(value.len());
        self.put(code, AttrValue::BigNum(value[first..].to_vec()));
    }

    pub fn put_sensitive(&mut self, code: ck::CK_ATTRIBUTE_TYPE) {
        self.put(code, AttrValue::Sensitive);
    }

    /// Raw lookup; callers that must distinguish "absent" from "sensitive"
    /// (template fill) use this instead of `get`.
    pub fn entry(&self, code: ck::CK_ATTRIBUTE_TYPE) -> Option<&AttrValue> {
        self.entries
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, v)| v)
    }

    pub fn get(&self, code: ck::CK_ATTRIBUTE_TYPE) -> Result<&AttrValue> {
        match self.entry(code) {
            None => Err(Error::AttributeTypeInvalid),
            Some(AttrValue::Sensitive) => Err(Error::AttributeSensitive),
            Some(value) => Ok(value),
        }
    }

    /// Encoded value bytes for a readable attribute.
    pub fn value_bytes(&self, code: ck::CK_ATTRIBUTE_TYPE) -> Result<Vec<u8>> {
        // get() has already rejected the sensitive marker.
        Ok(self.get(code)?.encoded().unwrap_or_default())
    }
}

/// A search template: attribute codes with expected encoded values.
/// Matching is byte-exact; sensitive-marked attributes never match.
#[derive(Clone, Debug, Default)]
pub struct SearchTemplate {
    entries: Vec<(ck::CK_ATTRIBUTE_TYPE, Vec<u8>)>,
}

impl SearchTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bytes(mut self, code: ck::CK_ATTRIBUTE_TYPE, value: &[u8]) -> Self {
        self.entries.push((code, value.to_vec()));
        self
    }

    pub fn with_str(self, code: ck::CK_ATTRIBUTE_TYPE, value: &str) -> Self {
        self.with_bytes(code, value.as_bytes())
    }

    pub fn with_ulong(mut self, code: ck::CK_ATTRIBUTE_TYPE, value: ck::CK_ULONG) -> Self {
        self.entries.push((code, value.to_ne_bytes().to_vec()));
        self
    }

    pub fn with_bool(mut self, code: ck::CK_ATTRIBUTE_TYPE, value: bool) -> Self {
        self.entries.push((code, vec![value as u8]));
        self
    }

    pub fn entries(&self) -> &[(ck::CK_ATTRIBUTE_TYPE, Vec<u8>)] {
        &self.entries
    }
}

/// One entry of a GetAttributeValue template: the caller either probes the
/// length (`value: None`) or supplies an output buffer. `value_len` is set
/// by the call, to the attribute length or `CK_UNAVAILABLE_INFORMATION`.
#[derive(Clone, Debug)]
pub struct Attribute {
    pub attribute_type: ck::CK_ATTRIBUTE_TYPE,
    pub value: Option<Vec<u8>>,
    pub value_len: ck::CK_ULONG,
}

impl Attribute {
    pub fn probe(attribute_type: ck::CK_ATTRIBUTE_TYPE) -> Self {
        Self {
            attribute_type,
            value: None,
            value_len: 0,
        }
    }

    pub fn with_capacity(attribute_type: ck::CK_ATTRIBUTE_TYPE, capacity: usize) -> Self {
        Self {
            attribute_type,
            value: Some(vec![0u8; capacity]),
            value_len: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_encodes_one_byte() {
        let mut map = AttributeMap::new();
        map.put_bool(ck::CKA_TOKEN, true);
        map.put_bool(ck::CKA_PRIVATE, false);
        assert_eq!(map.value_bytes(ck::CKA_TOKEN).unwrap(), vec![0x01]);
        assert_eq!(map.value_bytes(ck::CKA_PRIVATE).unwrap(), vec![0x00]);
    }

    #[test]
    fn ulong_is_native_width() {
        let mut map = AttributeMap::new();
        map.put_ulong(ck::CKA_CLASS, ck::CKO_PRIVATE_KEY);
        let bytes = map.value_bytes(ck::CKA_CLASS).unwrap();
        assert_eq!(bytes.len(), std::mem::size_of::<ck::CK_ULONG>());
        assert_eq!(bytes, ck::CKO_PRIVATE_KEY.to_ne_bytes().to_vec());
    }

    #[test]
    fn ulong_list_is_count_prefixed() {
        let mut map = AttributeMap::new();
        map.put_ulong_list(ck::CKA_ALLOWED_MECHANISMS, vec![ck::CKM_RSA_PKCS_PSS]);
        let bytes = map.value_bytes(ck::CKA_ALLOWED_MECHANISMS).unwrap();
        assert_eq!(bytes.len(), 2 * std::mem::size_of::<ck::CK_ULONG>());
        assert_eq!(&bytes[..8], &1u64.to_ne_bytes());
    }

    #[test]
    fn bignum_drops_leading_zeros() {
        let mut map = AttributeMap::new();
        map.put_bignum(ck::CKA_PUBLIC_EXPONENT, vec![0x00, 0x01, 0x00, 0x01]);
        assert_eq!(
            map.value_bytes(ck::CKA_PUBLIC_EXPONENT).unwrap(),
            vec![0x01, 0x00, 0x01]
        );
    }

    #[test]
    fn missing_attribute_is_type_invalid() {
        let map = AttributeMap::new();
        assert_eq!(map.get(ck::CKA_LABEL), Err(Error::AttributeTypeInvalid));
    }

    #[test]
    fn sensitive_read_fails_without_length() {
        let mut map = AttributeMap::new();
        map.put_sensitive(ck::CKA_PRIVATE_EXPONENT);
        assert_eq!(
            map.get(ck::CKA_PRIVATE_EXPONENT),
            Err(Error::AttributeSensitive)
        );
        assert!(map.entry(ck::CKA_PRIVATE_EXPONENT).unwrap().encoded().is_none());
    }

    #[test]
    fn put_replaces_existing_code() {
        let mut map = AttributeMap::new();
        map.put_bool(ck::CKA_UNWRAP, true);
        map.put_bool(ck::CKA_UNWRAP, false);
        assert_eq!(map.value_bytes(ck::CKA_UNWRAP).unwrap(), vec![0x00]);
        assert_eq!(
            map.entries.iter().filter(|(c, _)| *c == ck::CKA_UNWRAP).count(),
            1
        );
    }
}
