//! Identifier coercion and generation.

use bson::Bson;
use bson::oid::ObjectId;

use crate::error::{VeneerError, VeneerResult};

/// Name of the identifier field in every document.
pub const ID_FIELD: &str = "_id";

/// Generates identifiers for documents inserted without one.
pub type IdGenerator = fn() -> Bson;

/// Generate a fresh ObjectId.
pub fn new_object_id() -> Bson {
    Bson::ObjectId(ObjectId::new())
}

/// A key shared by identifiers the server considers equal.
///
/// Numbers compare by value, so `1`, `1_i64` and `1.0` share a key.
pub fn id_key(id: &Bson) -> String {
    match id {
        Bson::Int32(n) => format!("n:{}", n),
        Bson::Int64(n) => format!("n:{}", n),
        Bson::Double(d) if d.fract() == 0.0 && d.abs() < 9.0e15 => format!("n:{}", *d as i64),
        Bson::Double(d) => format!("n:{}", d),
        other => other.to_string(),
    }
}

/// The type every identifier of a resource is coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdType {
    /// ObjectIds, accepting 24 character hex strings as input.
    #[default]
    ObjectId,
    /// Strings. ObjectIds are converted to their hex form.
    String,
    /// 64-bit integers, accepting numeric strings.
    Int,
    /// No coercion.
    Raw,
}

impl IdType {
    /// Coerce an identifier to this type.
    pub fn coerce(self, id: Bson) -> VeneerResult<Bson> {
        match (self, id) {
            (Self::Raw, id) => Ok(id),

            (Self::ObjectId, Bson::ObjectId(oid)) => Ok(Bson::ObjectId(oid)),
            (Self::ObjectId, Bson::String(s)) => Ok(Bson::ObjectId(ObjectId::parse_str(&s)?)),

            (Self::String, Bson::String(s)) => Ok(Bson::String(s)),
            (Self::String, Bson::ObjectId(oid)) => Ok(Bson::String(oid.to_hex())),
            (Self::String, Bson::Int32(i)) => Ok(Bson::String(i.to_string())),
            (Self::String, Bson::Int64(i)) => Ok(Bson::String(i.to_string())),

            (Self::Int, Bson::Int32(i)) => Ok(Bson::Int64(i64::from(i))),
            (Self::Int, Bson::Int64(i)) => Ok(Bson::Int64(i)),
            (Self::Int, Bson::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Bson::Int64)
                .map_err(|e| VeneerError::invalid_identifier(format!("'{}': {}", s, e))),

            (ty, other) => Err(VeneerError::invalid_identifier(format!(
                "cannot coerce {} to {:?}",
                other, ty
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_coercion() {
        let oid = ObjectId::new();
        assert_eq!(
            IdType::ObjectId.coerce(Bson::String(oid.to_hex())).unwrap(),
            Bson::ObjectId(oid)
        );
        assert_eq!(
            IdType::ObjectId.coerce(Bson::ObjectId(oid)).unwrap(),
            Bson::ObjectId(oid)
        );
        assert!(IdType::ObjectId.coerce(Bson::String("nope".into())).is_err());
        assert!(IdType::ObjectId.coerce(Bson::Boolean(true)).is_err());
    }

    #[test]
    fn test_string_and_int_coercion() {
        assert_eq!(
            IdType::String.coerce(Bson::Int32(7)).unwrap(),
            Bson::String("7".into())
        );
        assert_eq!(
            IdType::Int.coerce(Bson::String(" 12 ".into())).unwrap(),
            Bson::Int64(12)
        );
        assert!(IdType::Int.coerce(Bson::String("twelve".into())).is_err());
    }

    #[test]
    fn test_raw_passes_through() {
        assert_eq!(IdType::Raw.coerce(Bson::Double(1.5)).unwrap(), Bson::Double(1.5));
    }

    #[test]
    fn test_generated_ids_are_object_ids() {
        assert!(matches!(new_object_id(), Bson::ObjectId(_)));
        assert_ne!(new_object_id(), new_object_id());
    }

    #[test]
    fn test_id_key_compares_numbers_by_value() {
        assert_eq!(id_key(&Bson::Int32(1)), id_key(&Bson::Double(1.0)));
        assert_eq!(id_key(&Bson::Int32(1)), id_key(&Bson::Int64(1)));
        assert_ne!(id_key(&Bson::Int32(1)), id_key(&Bson::Double(1.5)));
        assert_ne!(id_key(&Bson::Int32(1)), id_key(&Bson::String("1".into())));
    }
}
