//! Encrypted-fields schema for queryable encryption.
//!
//! An [`EncryptedCollection`] is validated and serialized exactly once. The resulting
//! `encryptedFields` document is what gets passed to `create_collection`, to `drop`, and to the
//! automatic-encryption client's `encrypted_fields_map`, and the explicit-encryption options are
//! derived from the same query descriptors. The server builds its range index from the first
//! copy and the client encrypts from the second, so they must never diverge.

use std::collections::HashSet;

use mongodb::{
    bson::{self, spec::BinarySubtype, Binary, Bson, Document},
    client_encryption::RangeOptions,
    mongocrypt::ctx::Algorithm,
    Namespace,
};
use serde::Serialize;
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::error::{Error, Result};

/// BSON types that may back a range-indexed field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum FieldType {
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    Double,
    Decimal,
    Date,
}

impl FieldType {
    /// Whether `value` has this BSON type.
    pub fn matches(&self, value: &Bson) -> bool {
        matches!(
            (self, value),
            (Self::Int, Bson::Int32(_))
                | (Self::Long, Bson::Int64(_))
                | (Self::Double, Bson::Double(_))
                | (Self::Decimal, Bson::Decimal128(_))
                | (Self::Date, Bson::DateTime(_))
        )
    }

    fn supports_precision(&self) -> bool {
        matches!(self, Self::Double | Self::Decimal)
    }
}

/// The query types an encrypted field can support.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum QueryType {
    Range,
}

/// A range query descriptor for one encrypted field.
#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Serialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct RangeQuery {
    #[builder(setter(skip), default = QueryType::Range)]
    query_type: QueryType,

    /// Contention factor. Higher values spread writes of the same value across more index
    /// entries at the cost of query work; 0 adds no contention.
    pub contention: i64,

    /// Sparsity of the range index. When omitted, libmongocrypt picks a default.
    pub sparsity: Option<i64>,

    /// Lower bound of the indexed domain. Must be set if `precision` is set.
    pub min: Option<Bson>,

    /// Upper bound of the indexed domain. Must be set if `precision` is set.
    pub max: Option<Bson>,

    pub trim_factor: Option<i32>,

    /// Significant digits after the decimal point. Only valid for double and decimal fields.
    pub precision: Option<i32>,
}

impl RangeQuery {
    /// The query type this descriptor declares.
    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    /// Whether `value` lies within `[min, max]`. `None` if the bounds are unset or the types
    /// cannot be compared here.
    pub fn contains(&self, value: &Bson) -> Option<bool> {
        let min = self.min.as_ref()?;
        let max = self.max.as_ref()?;
        Some(less_or_equal(min, value)? && less_or_equal(value, max)?)
    }

    /// The driver's explicit-encryption range options with the same bounds and tuning as this
    /// descriptor.
    pub fn range_options(&self) -> RangeOptions {
        RangeOptions::builder()
            .min(self.min.clone())
            .max(self.max.clone())
            .sparsity(self.sparsity)
            .trim_factor(self.trim_factor)
            .precision(self.precision)
            .build()
    }

    fn validate(&self, path: &str, bson_type: FieldType) -> Result<()> {
        let invalid = |message: String| Error::invalid_schema(format!("{}: {}", path, message));

        if self.contention < 0 {
            return Err(invalid(format!(
                "contention must be non-negative, got {}",
                self.contention
            )));
        }
        if let Some(sparsity) = self.sparsity {
            if sparsity < 1 {
                return Err(invalid(format!("sparsity must be at least 1, got {}", sparsity)));
            }
        }
        if let Some(trim_factor) = self.trim_factor {
            if trim_factor < 0 {
                return Err(invalid(format!(
                    "trimFactor must be non-negative, got {}",
                    trim_factor
                )));
            }
        }
        if let Some(precision) = self.precision {
            if !bson_type.supports_precision() {
                return Err(invalid(format!(
                    "precision is only valid for double and decimal fields, not {:?}",
                    bson_type
                )));
            }
            if precision < 0 {
                return Err(invalid(format!(
                    "precision must be non-negative, got {}",
                    precision
                )));
            }
            if self.min.is_none() || self.max.is_none() {
                return Err(invalid("min and max must be set when precision is set".into()));
            }
        }

        match (&self.min, &self.max) {
            (Some(min), Some(max)) => {
                for (name, bound) in [("min", min), ("max", max)] {
                    if !bson_type.matches(bound) {
                        return Err(invalid(format!(
                            "{} has type {:?} but the field is declared {:?}",
                            name,
                            bound.element_type(),
                            bson_type
                        )));
                    }
                }
                if less_than(min, max) == Some(false) {
                    return Err(invalid(format!(
                        "min ({}) must be less than max ({})",
                        min, max
                    )));
                }
            }
            (None, None) => {}
            _ => return Err(invalid("min and max must be set together".into())),
        }

        Ok(())
    }
}

fn less_than(a: &Bson, b: &Bson) -> Option<bool> {
    match (a, b) {
        (Bson::Int32(a), Bson::Int32(b)) => Some(a < b),
        (Bson::Int64(a), Bson::Int64(b)) => Some(a < b),
        (Bson::Double(a), Bson::Double(b)) => Some(a < b),
        (Bson::DateTime(a), Bson::DateTime(b)) => Some(a < b),
        _ => None,
    }
}

fn less_or_equal(a: &Bson, b: &Bson) -> Option<bool> {
    match (a, b) {
        (Bson::Int32(a), Bson::Int32(b)) => Some(a <= b),
        (Bson::Int64(a), Bson::Int64(b)) => Some(a <= b),
        (Bson::Double(a), Bson::Double(b)) => Some(a <= b),
        (Bson::DateTime(a), Bson::DateTime(b)) => Some(a <= b),
        _ => None,
    }
}

/// One protected field of a collection.
#[derive(Clone, Debug, PartialEq, Serialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct EncryptedField {
    /// The data key that encrypts this field.
    pub key_id: Binary,

    /// Dotted path of the field.
    #[builder(setter(into))]
    pub path: String,

    pub bson_type: FieldType,

    /// Query capabilities. Empty for a field that is encrypted but not queryable.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[builder(default)]
    pub queries: Vec<RangeQuery>,
}

impl EncryptedField {
    /// The range query declared for this field, if any.
    pub fn range_query(&self) -> Option<&RangeQuery> {
        self.queries.first()
    }

    fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::invalid_schema("field path must not be empty"));
        }
        if self.path.starts_with('$') || self.path.split('.').any(str::is_empty) {
            return Err(Error::invalid_schema(format!(
                "invalid field path {:?}",
                self.path
            )));
        }
        if self.key_id.subtype != BinarySubtype::Uuid || self.key_id.bytes.len() != 16 {
            return Err(Error::invalid_schema(format!(
                "{}: keyId must be a UUID (binary subtype 4)",
                self.path
            )));
        }
        if self.queries.len() > 1 {
            return Err(Error::invalid_schema(format!(
                "{}: at most one query descriptor is supported per field",
                self.path
            )));
        }
        for query in &self.queries {
            query.validate(&self.path, self.bson_type)?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct EncryptedFields<'a> {
    fields: &'a [EncryptedField],
}

/// How to explicitly encrypt a value so it matches a field's declared schema.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ExplicitEncryption {
    pub key_id: Binary,
    pub algorithm: Algorithm,
    pub contention_factor: Option<i64>,
    pub range_options: Option<RangeOptions>,
}

/// A collection together with its validated, frozen encrypted-fields schema.
#[derive(Clone, Debug)]
pub struct EncryptedCollection {
    namespace: Namespace,
    fields: Vec<EncryptedField>,
    encrypted_fields: Document,
}

impl EncryptedCollection {
    /// Validates `fields` and serializes them into the `encryptedFields` document.
    pub fn new(namespace: Namespace, fields: Vec<EncryptedField>) -> Result<Self> {
        if namespace.db.is_empty() || namespace.coll.is_empty() {
            return Err(Error::invalid_schema(format!(
                "invalid namespace {:?}",
                namespace.to_string()
            )));
        }
        if fields.is_empty() {
            return Err(Error::invalid_schema("at least one encrypted field is required"));
        }
        let mut seen = HashSet::new();
        for field in &fields {
            field.validate()?;
            if !seen.insert(field.path.as_str()) {
                return Err(Error::invalid_schema(format!(
                    "field {:?} is declared more than once",
                    field.path
                )));
            }
        }
        let encrypted_fields = bson::to_document(&EncryptedFields { fields: &fields })?;
        Ok(Self {
            namespace,
            fields,
            encrypted_fields,
        })
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn fields(&self) -> &[EncryptedField] {
        &self.fields
    }

    /// The `encryptedFields` document for collection creation and drop.
    pub fn encrypted_fields(&self) -> &Document {
        &self.encrypted_fields
    }

    /// The namespace → `encryptedFields` entry for an automatic-encryption client.
    pub fn encrypted_fields_map(&self) -> Vec<(String, Document)> {
        vec![(self.namespace.to_string(), self.encrypted_fields.clone())]
    }

    /// Looks up a declared field by path.
    pub fn field(&self, path: &str) -> Option<&EncryptedField> {
        self.fields.iter().find(|f| f.path == path)
    }

    /// The explicit-encryption settings for `path`: the range algorithm with the declared bounds
    /// for range-queryable fields, and the unindexed algorithm otherwise.
    pub fn explicit_encryption(&self, path: &str) -> Result<ExplicitEncryption> {
        let field = self.field(path).ok_or_else(|| {
            Error::invalid_argument(format!(
                "{} is not an encrypted field of {}",
                path, self.namespace
            ))
        })?;
        Ok(match field.range_query() {
            Some(query) => ExplicitEncryption {
                key_id: field.key_id.clone(),
                algorithm: Algorithm::Range,
                contention_factor: Some(query.contention),
                range_options: Some(query.range_options()),
            },
            None => ExplicitEncryption {
                key_id: field.key_id.clone(),
                algorithm: Algorithm::Unindexed,
                contention_factor: None,
                range_options: None,
            },
        })
    }
}
