//! Query specification building.
//!
//! A query spec is built in three pure steps: coerce the id, merge the extra
//! filter fields, then attach the shard label.

use bson::{Bson, Document, doc};
use tracing::warn;

use crate::error::VeneerResult;
use crate::id::{ID_FIELD, IdType};
use crate::shard::ShardSpec;

/// Build the filter for a single-document operation.
///
/// A null `id` is left out, so the filter is made of `extra` alone.
pub fn make_spec(
    id_type: IdType,
    shard: Option<&ShardSpec>,
    id: Bson,
    extra: Option<Document>,
) -> VeneerResult<Document> {
    let spec = with_id(id_type, id)?;
    let spec = merge(spec, extra);
    Ok(add_shard(shard, spec))
}

/// Build the filter matching any of `ids`.
pub fn make_in_spec<I>(id_type: IdType, ids: I) -> VeneerResult<Document>
where
    I: IntoIterator<Item = Bson>,
{
    let ids = coerce_all(id_type, ids)?;
    Ok(doc! { ID_FIELD: { "$in": ids } })
}

/// Coerce every id to `id_type`.
pub fn coerce_all<I>(id_type: IdType, ids: I) -> VeneerResult<Vec<Bson>>
where
    I: IntoIterator<Item = Bson>,
{
    ids.into_iter().map(|id| id_type.coerce(id)).collect()
}

fn with_id(id_type: IdType, id: Bson) -> VeneerResult<Document> {
    let mut spec = Document::new();
    if id != Bson::Null {
        spec.insert(ID_FIELD, id_type.coerce(id)?);
    }
    Ok(spec)
}

fn merge(mut spec: Document, extra: Option<Document>) -> Document {
    if let Some(extra) = extra {
        spec.extend(extra);
    }
    spec
}

/// Store the shard label in `spec`, when one can be computed.
///
/// Failing to compute a label never fails the caller's operation: the error is
/// logged and the document goes out without its shard field.
pub fn add_shard(shard: Option<&ShardSpec>, mut spec: Document) -> Document {
    let Some(shard) = shard else {
        return spec;
    };
    match shard.compute(&spec) {
        Ok(Some(label)) => {
            spec.insert(shard.field(), label);
        }
        Ok(None) => {}
        Err(err) => {
            warn!(spec = %spec, error = %err, "Can't compute shard value");
        }
    }
    spec
}
