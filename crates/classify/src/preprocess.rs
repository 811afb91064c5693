//! Turning submitted form fields into the text the categorizer reads.

use jobrelay_core::JobArgs;

/// Form field names accepted for the two known product fields.
const FIELD_ALIASES: [(&str, &str); 2] = [("item_a", "product_name"), ("item_b", "product_brand")];

/// Known fields, in the order they appear in the preprocessed text.
const FIELD_ORDER: [&str; 2] = ["product_name", "product_brand"];

/// Canonical `(field, value)` pairs: aliases renamed, values trimmed and
/// lowercased, known fields first, the rest sorted by name.
///
/// A canonical name wins over its alias when both are present.
pub fn normalize_fields(args: &JobArgs) -> Vec<(String, String)> {
    let mut fields: Vec<(String, String)> = Vec::with_capacity(args.len());
    for (key, value) in args.iter() {
        let name = canonical_name(key);
        let value = value.trim().to_lowercase();
        match fields.iter_mut().find(|(existing, _)| existing == name) {
            Some(slot) if name == key => slot.1 = value,
            Some(_) => {}
            None => fields.push((name.to_string(), value)),
        }
    }

    fields.sort_by_key(|(name, _)| {
        let rank = FIELD_ORDER.iter().position(|known| *known == name.as_str()).unwrap_or(FIELD_ORDER.len());
        (rank, name.clone())
    });
    fields
}

fn canonical_name(key: &str) -> &str {
    FIELD_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map_or(key, |(_, name)| *name)
}

/// `key=value` pairs joined by single spaces, e.g.
/// `product_name=whole wheat bread product_brand=acme`.
pub fn preprocess(args: &JobArgs) -> String {
    normalize_fields(args)
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}
