//! Update document transforms applied before an update is sent.

use bson::{Document, doc};

/// Transforms the caller's update document into the one sent to the driver.
pub type Updater = fn(Document) -> Document;

/// Pass the update document through unchanged.
///
/// Use this when the caller already supplies a full modifier expression
/// such as `{ "$inc": { "count": 1 } }`.
pub fn raw_updater(update: Document) -> Document {
    update
}

/// Wrap a plain document in `$set`.
///
/// Embedded documents are replaced wholesale, not merged.
pub fn set_updater(update: Document) -> Document {
    doc! { "$set": update }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_updater_is_identity() {
        let update = doc! { "$inc": { "count": 1 } };
        assert_eq!(raw_updater(update.clone()), update);
    }

    #[test]
    fn test_set_updater_wraps() {
        let update = set_updater(doc! { "name": "Alice" });
        assert_eq!(update, doc! { "$set": { "name": "Alice" } });
    }
}
