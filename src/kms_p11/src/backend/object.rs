// Copyright 2020-2021 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use der::asn1::{ObjectIdentifier, OctetStringRef};
use der::Encode;
use kms_rpc::api::{CryptoKeyVersion, KeyPurpose};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::pkcs8::DecodePublicKey;
use rsa::pkcs8::EncodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;

use super::algorithm::{self, AlgorithmDetails, EcCurve};
use super::attr::{AttrValue, Attribute, AttributeMap, SearchTemplate};
use crate::ck;
use crate::{Error, Result};

const P256_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");
const P384_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.132.0.34");

/// Parsed public-key material cached on each object for local
/// verification and encryption.
#[derive(Clone)]
pub enum PublicKeyMaterial {
    Rsa(RsaPublicKey),
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
}

/// An immutable token object backed by one remote key version. A key
/// version materialises as two objects, the public and private halves,
/// sharing the resource name and algorithm. Once an object has been
/// handed a handle, neither its attributes nor its class change; a slot
/// refresh produces new objects.
pub struct Object {
    kms_key_name: String,
    class: ck::CK_OBJECT_CLASS,
    algorithm: &'static AlgorithmDetails,
    attrs: AttributeMap,
    public_key: PublicKeyMaterial,
}

/// Extract the key id from a full CryptoKeyVersion resource name.
fn key_id_from_version_name(name: &str) -> Result<&str> {
    let parts: Vec<&str> = name.split('/').collect();
    if parts.len() != 10
        || parts[0] != "projects"
        || parts[2] != "locations"
        || parts[4] != "keyRings"
        || parts[6] != "cryptoKeys"
        || parts[8] != "cryptoKeyVersions"
    {
        error!("invalid CryptoKeyVersion name: {}", name);
        return Err(Error::GeneralError);
    }
    Ok(parts[7])
}

// 4.4 Storage objects
fn add_storage_attributes(attrs: &mut AttributeMap, key_id: &str) {
    attrs.put_bool(ck::CKA_TOKEN, true);
    attrs.put_bool(ck::CKA_PRIVATE, false);
    attrs.put_bool(ck::CKA_MODIFIABLE, false);
    attrs.put_str(ck::CKA_LABEL, key_id);
    attrs.put_bool(ck::CKA_COPYABLE, false);
    attrs.put_bool(ck::CKA_DESTROYABLE, false);
}

// 4.7 Key objects
fn add_key_attributes(
    attrs: &mut AttributeMap,
    ckv: &CryptoKeyVersion,
    details: &'static AlgorithmDetails,
) {
    let local = ckv.import_job.is_empty();
    attrs.put_ulong(ck::CKA_KEY_TYPE, details.key_type);
    attrs.put_str(ck::CKA_ID, &ckv.name);
    attrs.put_bytes(ck::CKA_START_DATE, Vec::new());
    attrs.put_bytes(ck::CKA_END_DATE, Vec::new());
    attrs.put_bool(ck::CKA_DERIVE, false);
    attrs.put_bool(ck::CKA_LOCAL, local);
    attrs.put_ulong(
        ck::CKA_KEY_GEN_MECHANISM,
        if local {
            details.key_gen_mechanism
        } else {
            ck::CK_UNAVAILABLE_INFORMATION
        },
    );
    attrs.put_ulong_list(ck::CKA_ALLOWED_MECHANISMS, details.allowed_mechanisms.to_vec());
}

// 4.8 Public key objects
fn add_public_key_attributes(
    attrs: &mut AttributeMap,
    details: &'static AlgorithmDetails,
    public_key_der: &[u8],
) {
    attrs.put_bytes(ck::CKA_SUBJECT, Vec::new());
    attrs.put_bool(
        ck::CKA_ENCRYPT,
        details.purpose == KeyPurpose::AsymmetricDecrypt,
    );
    attrs.put_bool(
        ck::CKA_VERIFY,
        details.purpose == KeyPurpose::AsymmetricSign,
    );
    attrs.put_bool(ck::CKA_VERIFY_RECOVER, false);
    attrs.put_bool(ck::CKA_WRAP, false);
    attrs.put_bool(ck::CKA_TRUSTED, false);
    attrs.put_bytes(ck::CKA_WRAP_TEMPLATE, Vec::new());
    attrs.put_bytes(ck::CKA_PUBLIC_KEY_INFO, public_key_der.to_vec());
}

// 4.9 Private key objects
fn add_private_key_attributes(
    attrs: &mut AttributeMap,
    ckv: &CryptoKeyVersion,
    details: &'static AlgorithmDetails,
    public_key_der: &[u8],
) {
    let local = ckv.import_job.is_empty();
    attrs.put_bytes(ck::CKA_SUBJECT, Vec::new());
    attrs.put_bool(ck::CKA_SENSITIVE, true);
    attrs.put_bool(
        ck::CKA_DECRYPT,
        details.purpose == KeyPurpose::AsymmetricDecrypt,
    );
    attrs.put_bool(ck::CKA_SIGN, details.purpose == KeyPurpose::AsymmetricSign);
    attrs.put_bool(ck::CKA_SIGN_RECOVER, false);
    attrs.put_bool(ck::CKA_UNWRAP, false);
    attrs.put_bool(ck::CKA_EXTRACTABLE, false);
    attrs.put_bool(ck::CKA_ALWAYS_SENSITIVE, local);
    attrs.put_bool(ck::CKA_NEVER_EXTRACTABLE, local);
    attrs.put_bool(ck::CKA_WRAP_WITH_TRUSTED, false);
    attrs.put_bytes(ck::CKA_UNWRAP_TEMPLATE, Vec::new());
    attrs.put_bool(ck::CKA_ALWAYS_AUTHENTICATE, false);
    attrs.put_bytes(ck::CKA_PUBLIC_KEY_INFO, public_key_der.to_vec());
}

// 2.1.2 RSA public key objects
fn add_rsa_public_key_attributes(attrs: &mut AttributeMap, key: &RsaPublicKey) {
    attrs.put_bignum(ck::CKA_MODULUS, key.n().to_bytes_be());
    attrs.put_ulong(ck::CKA_MODULUS_BITS, key.n().bits() as ck::CK_ULONG);
    attrs.put_bignum(ck::CKA_PUBLIC_EXPONENT, key.e().to_bytes_be());
}

// 2.1.3 RSA private key objects
fn add_rsa_private_key_attributes(attrs: &mut AttributeMap, key: &RsaPublicKey) {
    attrs.put_bignum(ck::CKA_MODULUS, key.n().to_bytes_be());
    attrs.put_ulong(ck::CKA_MODULUS_BITS, key.n().bits() as ck::CK_ULONG);
    attrs.put_sensitive(ck::CKA_PRIVATE_EXPONENT);
    attrs.put_sensitive(ck::CKA_PRIME_1);
    attrs.put_sensitive(ck::CKA_PRIME_2);
    attrs.put_sensitive(ck::CKA_EXPONENT_1);
    attrs.put_sensitive(ck::CKA_EXPONENT_2);
    attrs.put_sensitive(ck::CKA_COEFFICIENT);
    // Not required by the standard, but existing clients expect it.
    attrs.put_bignum(ck::CKA_PUBLIC_EXPONENT, key.e().to_bytes_be());
}

fn ec_params_der(curve: EcCurve) -> Result<Vec<u8>> {
    let oid = match curve {
        EcCurve::P256 => P256_OID,
        EcCurve::P384 => P384_OID,
    };
    oid.to_der().map_err(|_| Error::GeneralError)
}

/// DER OCTET STRING wrapping the uncompressed SEC1 point.
fn ec_point_der(point: &[u8]) -> Result<Vec<u8>> {
    OctetStringRef::new(point)
        .and_then(|octets| octets.to_der())
        .map_err(|_| Error::GeneralError)
}

impl Object {
    /// Materialise the (public, private) object pair for one enabled key
    /// version and its PEM-encoded public key.
    pub fn new_key_pair(ckv: &CryptoKeyVersion, public_key_pem: &str) -> Result<(Object, Object)> {
        let details = algorithm::details(ckv.algorithm)?;
        let key_id = key_id_from_version_name(&ckv.name)?;

        let mut pub_attrs = AttributeMap::new();
        pub_attrs.put_ulong(ck::CKA_CLASS, ck::CKO_PUBLIC_KEY);
        add_storage_attributes(&mut pub_attrs, key_id);
        add_key_attributes(&mut pub_attrs, ckv, details);

        let mut prv_attrs = AttributeMap::new();
        prv_attrs.put_ulong(ck::CKA_CLASS, ck::CKO_PRIVATE_KEY);
        add_storage_attributes(&mut prv_attrs, key_id);
        add_key_attributes(&mut prv_attrs, ckv, details);

        let material = match details.key_type {
            ck::CKK_RSA => {
                let key = RsaPublicKey::from_public_key_pem(public_key_pem).map_err(|e| {
                    error!("unparseable RSA public key for {}: {:?}", ckv.name, e);
                    Error::DeviceError
                })?;
                let der = key
                    .to_public_key_der()
                    .map_err(|_| Error::GeneralError)?
                    .into_vec();
                add_public_key_attributes(&mut pub_attrs, details, &der);
                add_private_key_attributes(&mut prv_attrs, ckv, details, &der);
                add_rsa_public_key_attributes(&mut pub_attrs, &key);
                add_rsa_private_key_attributes(&mut prv_attrs, &key);
                PublicKeyMaterial::Rsa(key)
            }
            ck::CKK_EC => {
                let curve = details.curve.ok_or(Error::GeneralError)?;
                let (material, der, point) = match curve {
                    EcCurve::P256 => {
                        let key = p256::PublicKey::from_public_key_pem(public_key_pem)
                            .map_err(|e| {
                                error!("unparseable EC public key for {}: {:?}", ckv.name, e);
                                Error::DeviceError
                            })?;
                        let der = key
                            .to_public_key_der()
                            .map_err(|_| Error::GeneralError)?
                            .into_vec();
                        let point = key.to_encoded_point(false).as_bytes().to_vec();
                        (
                            PublicKeyMaterial::P256(p256::ecdsa::VerifyingKey::from(key)),
                            der,
                            point,
                        )
                    }
                    EcCurve::P384 => {
                        let key = p384::PublicKey::from_public_key_pem(public_key_pem)
                            .map_err(|e| {
                                error!("unparseable EC public key for {}: {:?}", ckv.name, e);
                                Error::DeviceError
                            })?;
                        let der = key
                            .to_public_key_der()
                            .map_err(|_| Error::GeneralError)?
                            .into_vec();
                        let point = key.to_encoded_point(false).as_bytes().to_vec();
                        (
                            PublicKeyMaterial::P384(p384::ecdsa::VerifyingKey::from(key)),
                            der,
                            point,
                        )
                    }
                };
                let params_der = ec_params_der(curve)?;
                let point_der = ec_point_der(&point)?;
                add_public_key_attributes(&mut pub_attrs, details, &der);
                add_private_key_attributes(&mut prv_attrs, ckv, details, &der);
                // 2.3.3 ECDSA public key objects
                pub_attrs.put_bytes(ck::CKA_EC_PARAMS, params_der.clone());
                pub_attrs.put_bytes(ck::CKA_EC_POINT, point_der.clone());
                // 2.3.4 Elliptic curve private key objects. The point is
                // not required here, but some clients expect it.
                prv_attrs.put_bytes(ck::CKA_EC_PARAMS, params_der);
                prv_attrs.put_sensitive(ck::CKA_VALUE);
                prv_attrs.put_bytes(ck::CKA_EC_POINT, point_der);
                material
            }
            _ => return Err(Error::GeneralError),
        };

        Ok((
            Object {
                kms_key_name: ckv.name.clone(),
                class: ck::CKO_PUBLIC_KEY,
                algorithm: details,
                attrs: pub_attrs,
                public_key: material.clone(),
            },
            Object {
                kms_key_name: ckv.name.clone(),
                class: ck::CKO_PRIVATE_KEY,
                algorithm: details,
                attrs: prv_attrs,
                public_key: material,
            },
        ))
    }

    pub fn kms_key_name(&self) -> &str {
        &self.kms_key_name
    }

    pub fn class(&self) -> ck::CK_OBJECT_CLASS {
        self.class
    }

    pub fn algorithm(&self) -> &'static AlgorithmDetails {
        self.algorithm
    }

    pub fn public_key(&self) -> &PublicKeyMaterial {
        &self.public_key
    }

    pub fn attr(&self, code: ck::CK_ATTRIBUTE_TYPE) -> Option<&AttrValue> {
        self.attrs.entry(code)
    }

    pub fn attrs(&self) -> &AttributeMap {
        &self.attrs
    }

    pub fn is_private(&self) -> bool {
        self.class == ck::CKO_PRIVATE_KEY
    }

    /// Byte-exact template match. Sensitive-marked attributes never match.
    pub fn match_attr_template(&self, template: &SearchTemplate) -> bool {
        template.entries().iter().all(|(code, want)| {
            match self.attrs.entry(*code).and_then(|v| v.encoded()) {
                Some(got) => got == *want,
                None => false,
            }
        })
    }

    /// Fill a GetAttributeValue template in place. Per the standard the
    /// whole template is processed even after a failure, and the returned
    /// code reflects the last failing entry.
    pub fn fill_attr_template(&self, template: &mut [Attribute]) -> Result<()> {
        let mut rcode = Ok(());
        for entry in template.iter_mut() {
            match self.attrs.entry(entry.attribute_type) {
                None => {
                    rcode = Err(Error::AttributeTypeInvalid);
                    entry.value_len = ck::CK_UNAVAILABLE_INFORMATION;
                }
                Some(AttrValue::Sensitive) => {
                    rcode = Err(Error::AttributeSensitive);
                    entry.value_len = ck::CK_UNAVAILABLE_INFORMATION;
                }
                Some(value) => {
                    let bytes = value.encoded().unwrap_or_default();
                    match entry.value.as_mut() {
                        None => entry.value_len = bytes.len() as ck::CK_ULONG,
                        Some(buf) if buf.len() < bytes.len() => {
                            rcode = Err(Error::BufferTooSmall);
                            entry.value_len = ck::CK_UNAVAILABLE_INFORMATION;
                        }
                        Some(buf) => {
                            buf[..bytes.len()].copy_from_slice(&bytes);
                            entry.value_len = bytes.len() as ck::CK_ULONG;
                        }
                    }
                }
            }
        }
        rcode
    }
}

/// An immutable snapshot of a slot's objects, in materialisation order.
/// Readers hold an `Arc` to the snapshot; a slot refresh swaps in a whole
/// new set without disturbing them.
pub struct ObjectSet {
    entries: Vec<(ck::CK_OBJECT_HANDLE, Arc<Object>)>,
}

impl ObjectSet {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn new(entries: Vec<(ck::CK_OBJECT_HANDLE, Arc<Object>)>) -> Self {
        Self { entries }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (ck::CK_OBJECT_HANDLE, Arc<Object>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kms_rpc::api::{Algorithm, KeyVersionState};
    use rsa::pkcs8::LineEnding;

    const VERSION_NAME: &str =
        "projects/p/locations/us/keyRings/ring/cryptoKeys/mykey/cryptoKeyVersions/1";

    fn version(algorithm: Algorithm) -> CryptoKeyVersion {
        CryptoKeyVersion {
            name: VERSION_NAME.to_string(),
            algorithm,
            state: KeyVersionState::Enabled,
            import_job: String::new(),
        }
    }

    fn p256_pem() -> String {
        let key = p256::SecretKey::random(&mut rand::rngs::OsRng);
        key.public_key().to_public_key_pem(LineEnding::LF).unwrap()
    }

    #[test]
    fn rejects_malformed_version_names() {
        for name in [
            "projects/p/locations/us/keyRings/ring/cryptoKeys/mykey",
            "projects/p/locations/us/keyRings/ring/cryptoKeys/mykey/cryptoKeyVersions/1/x",
            "foo/p/locations/us/keyRings/ring/cryptoKeys/mykey/cryptoKeyVersions/1",
        ] {
            assert_eq!(key_id_from_version_name(name), Err(Error::GeneralError));
        }
        assert_eq!(key_id_from_version_name(VERSION_NAME).unwrap(), "mykey");
    }

    #[test]
    fn ec_pair_has_expected_attributes() {
        let ckv = version(Algorithm::EcSignP256Sha256);
        let (pub_obj, prv_obj) = Object::new_key_pair(&ckv, &p256_pem()).unwrap();

        assert_eq!(pub_obj.class(), ck::CKO_PUBLIC_KEY);
        assert_eq!(prv_obj.class(), ck::CKO_PRIVATE_KEY);
        assert!(prv_obj.is_private());

        assert_eq!(
            pub_obj.attrs().value_bytes(ck::CKA_LABEL).unwrap(),
            b"mykey".to_vec()
        );
        assert_eq!(
            prv_obj.attrs().value_bytes(ck::CKA_ID).unwrap(),
            VERSION_NAME.as_bytes().to_vec()
        );

        // CKA_VERIFY / CKA_SIGN reflect the signing purpose.
        assert_eq!(
            pub_obj.attrs().value_bytes(ck::CKA_VERIFY).unwrap(),
            vec![0x01]
        );
        assert_eq!(
            prv_obj.attrs().value_bytes(ck::CKA_SIGN).unwrap(),
            vec![0x01]
        );
        assert_eq!(
            pub_obj.attrs().value_bytes(ck::CKA_ENCRYPT).unwrap(),
            vec![0x00]
        );

        // Named-curve parameters: DER OID for P-256.
        assert_eq!(
            pub_obj.attrs().value_bytes(ck::CKA_EC_PARAMS).unwrap(),
            vec![0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07]
        );

        // Uncompressed point, DER-wrapped: 04 41 04 || x || y.
        let point = pub_obj.attrs().value_bytes(ck::CKA_EC_POINT).unwrap();
        assert_eq!(point.len(), 2 + 65);
        assert_eq!(&point[..3], &[0x04, 0x41, 0x04]);

        // The private half hides its scalar.
        assert_eq!(
            prv_obj.attrs().get(ck::CKA_VALUE),
            Err(Error::AttributeSensitive)
        );
    }

    #[test]
    fn rsa_pair_modulus_matches_key() {
        let key = rsa::RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap();
        let public = RsaPublicKey::from(&key);
        let pem = public.to_public_key_pem(LineEnding::LF).unwrap();

        let ckv = version(Algorithm::RsaSignPss2048Sha256);
        let (pub_obj, prv_obj) = Object::new_key_pair(&ckv, &pem).unwrap();

        assert_eq!(
            pub_obj.attrs().value_bytes(ck::CKA_MODULUS).unwrap(),
            public.n().to_bytes_be()
        );
        assert_eq!(
            pub_obj.attrs().value_bytes(ck::CKA_MODULUS_BITS).unwrap(),
            2048u64.to_ne_bytes().to_vec()
        );
        assert_eq!(
            prv_obj.attrs().get(ck::CKA_PRIVATE_EXPONENT),
            Err(Error::AttributeSensitive)
        );
        // Public exponent is mirrored on the private half.
        assert_eq!(
            prv_obj.attrs().value_bytes(ck::CKA_PUBLIC_EXPONENT).unwrap(),
            public.e().to_bytes_be()
        );
    }

    #[test]
    fn template_matching_is_byte_exact() {
        let ckv = version(Algorithm::EcSignP256Sha256);
        let (pub_obj, prv_obj) = Object::new_key_pair(&ckv, &p256_pem()).unwrap();

        let tpl = SearchTemplate::new()
            .with_ulong(ck::CKA_CLASS, ck::CKO_PRIVATE_KEY)
            .with_str(ck::CKA_LABEL, "mykey");
        assert!(prv_obj.match_attr_template(&tpl));
        assert!(!pub_obj.match_attr_template(&tpl));

        // Sensitive attributes never match, even with an empty expectation.
        let tpl = SearchTemplate::new().with_bytes(ck::CKA_VALUE, &[]);
        assert!(!prv_obj.match_attr_template(&tpl));
    }
}
