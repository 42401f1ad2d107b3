//! The CES equivalence predicate (§4.3).
//!
//! Ported from `MemeSHARK._compare_djangoobjects`, which walks a Django/
//! mongoengine document's declared field list and compares every field not
//! in an exclusion set. Here the document is already a `bson::Document`, so
//! the "declared field list" is simply the key union of the two documents.

use bson::{Bson, Document};

/// The identity/link fields the core always excludes from comparison: their
/// equality would be tautological (they're `commit_id`-scoped or the
/// document's own id) or would defeat deduplication entirely (`ce_parent_id`
/// is precisely the field the merge algorithm may need to change).
pub const EXCLUDED_FIELDS: &[&str] = &["id", "s_key", "commit_id", "ce_parent_id", "cg_ids"];

/// Whether two CES attribute documents represent the same entity-version.
///
/// For every key present on either side that isn't in `excluded`: if both
/// values are documents, recurse; otherwise compare by value, treating
/// `NaN == NaN` as equal for floating-point attributes (an attribute that's
/// `NaN` on one side and not `NaN`, or not a number at all, on the other
/// counts as a mismatch). A key missing from one document but present on
/// the other counts as inequality (`EquivalenceIndeterminate`-style
/// conservatism in spirit, though an outright type clash here is simply
/// "not equal" rather than a distinct error case).
pub fn equivalent(a: &Document, b: &Document, excluded: &[&str]) -> bool {
    documents_equivalent(a, b, excluded)
}

fn documents_equivalent(a: &Document, b: &Document, excluded: &[&str]) -> bool {
    let keys: std::collections::BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    for key in keys {
        if excluded.iter().any(|excl| excl == key) {
            continue;
        }
        match (a.get(key), b.get(key)) {
            (Some(va), Some(vb)) => {
                if !bson_equivalent(va, vb) {
                    return false;
                }
            }
            // Present on one side only: treat as inequality (§4.3).
            _ => return false,
        }
    }
    true
}

fn bson_equivalent(a: &Bson, b: &Bson) -> bool {
    match (a, b) {
        (Bson::Double(x), Bson::Double(y)) => {
            if x.is_nan() && y.is_nan() {
                true
            } else {
                x == y
            }
        }
        (Bson::Document(da), Bson::Document(db)) => documents_equivalent(da, db, &[]),
        (Bson::Array(xa), Bson::Array(xb)) => {
            xa.len() == xb.len()
                && xa
                    .iter()
                    .zip(xb.iter())
                    .all(|(x, y)| bson_equivalent(x, y))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(pairs: &[(&str, Bson)]) -> Document {
        let mut d = Document::new();
        for (k, v) in pairs {
            d.insert(*k, v.clone());
        }
        d
    }

    #[test]
    fn identical_documents_are_equivalent() {
        let a = doc(&[("name", Bson::String("Foo".into())), ("loc", Bson::Int32(10))]);
        let b = a.clone();
        assert!(equivalent(&a, &b, EXCLUDED_FIELDS));
    }

    #[test]
    fn excluded_fields_ignored() {
        let a = doc(&[
            ("name", Bson::String("Foo".into())),
            ("commit_id", Bson::String("c1".into())),
        ]);
        let b = doc(&[
            ("name", Bson::String("Foo".into())),
            ("commit_id", Bson::String("c2".into())),
        ]);
        assert!(equivalent(&a, &b, EXCLUDED_FIELDS));
    }

    #[test]
    fn changed_attribute_not_equivalent() {
        let a = doc(&[("loc", Bson::Int32(10))]);
        let b = doc(&[("loc", Bson::Int32(11))]);
        assert!(!equivalent(&a, &b, EXCLUDED_FIELDS));
    }

    #[test]
    fn nan_equals_nan() {
        let a = doc(&[("complexity", Bson::Double(f64::NAN))]);
        let b = doc(&[("complexity", Bson::Double(f64::NAN))]);
        assert!(equivalent(&a, &b, EXCLUDED_FIELDS));
    }

    #[test]
    fn missing_key_on_one_side_is_not_equivalent() {
        let a = doc(&[("name", Bson::String("Foo".into()))]);
        let b = Document::new();
        assert!(!equivalent(&a, &b, EXCLUDED_FIELDS));
    }

    #[test]
    fn nested_documents_compared_recursively() {
        let a = doc(&[(
            "metrics",
            Bson::Document(doc(&[("cc", Bson::Int32(3))])),
        )]);
        let b = doc(&[(
            "metrics",
            Bson::Document(doc(&[("cc", Bson::Int32(4))])),
        )]);
        assert!(!equivalent(&a, &b, EXCLUDED_FIELDS));
    }
}
