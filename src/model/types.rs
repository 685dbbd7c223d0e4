//! The cross-backend type converter.
//!
//! A per-pair `(source_backend, target_backend, source_type) -> target_type`
//! table with a widening fallback when no exact entry exists. The converter
//! never fails: an unresolvable type falls back to the target's generic
//! text/blob representation and is flagged lossy.

use std::collections::HashMap;

use once_cell::sync::Lazy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeConversion {
    pub target_type: String,
    pub lossy: bool,
    pub note: Option<String>,
}

impl TypeConversion {
    fn exact(target_type: impl Into<String>) -> Self {
        TypeConversion {
            target_type: target_type.into(),
            lossy: false,
            note: None,
        }
    }

    fn lossy(target_type: impl Into<String>, note: impl Into<String>) -> Self {
        TypeConversion {
            target_type: target_type.into(),
            lossy: true,
            note: Some(note.into()),
        }
    }
}

type PairKey = (&'static str, &'static str, &'static str);

/// Explicit per-pair entries, keyed by lowercased source type name. Entries
/// are authoritative; anything absent here falls through to
/// `widen_within_paradigm` / `generic_fallback`.
static EXPLICIT: Lazy<HashMap<PairKey, TypeConversion>> = Lazy::new(|| {
    let mut m: HashMap<PairKey, TypeConversion> = HashMap::new();
    // Relational <-> relational.
    m.insert(("postgres", "mysql", "varchar"), TypeConversion::exact("varchar"));
    m.insert(("postgres", "mysql", "text"), TypeConversion::exact("text"));
    m.insert(("postgres", "mysql", "integer"), TypeConversion::exact("int"));
    m.insert(("postgres", "mysql", "bigint"), TypeConversion::exact("bigint"));
    m.insert(("postgres", "mysql", "boolean"), TypeConversion::exact("tinyint(1)"));
    m.insert(("postgres", "mysql", "uuid"), TypeConversion::lossy("varchar(36)", "no native UUID type in MySQL"));
    m.insert(("postgres", "mysql", "jsonb"), TypeConversion::exact("json"));
    m.insert(("mysql", "postgres", "int"), TypeConversion::exact("integer"));
    m.insert(("mysql", "postgres", "tinyint(1)"), TypeConversion::exact("boolean"));
    m.insert(("mysql", "postgres", "datetime"), TypeConversion::exact("timestamp"));
    m.insert(("mysql", "postgres", "json"), TypeConversion::exact("jsonb"));
    m.insert(
        ("postgres", "sqlite", "integer"),
        TypeConversion::exact("integer"),
    );
    m.insert(("postgres", "sqlite", "numeric"), TypeConversion::lossy("numeric", "SQLite has no fixed-precision decimal type"));
    // Relational -> document scalar mapping used by Denormalization.
    m.insert(("postgres", "mongodb", "integer"), TypeConversion::exact("int"));
    m.insert(("postgres", "mongodb", "bigint"), TypeConversion::exact("long"));
    m.insert(("postgres", "mongodb", "varchar"), TypeConversion::exact("string"));
    m.insert(("postgres", "mongodb", "text"), TypeConversion::exact("string"));
    m.insert(("postgres", "mongodb", "boolean"), TypeConversion::exact("bool"));
    m.insert(("postgres", "mongodb", "timestamp"), TypeConversion::exact("date"));
    m.insert(
        ("postgres", "mongodb", "numeric"),
        TypeConversion::lossy("double", "arbitrary-precision decimal narrowed to IEEE-754 double"),
    );
    m.insert(("postgres", "mongodb", "jsonb"), TypeConversion::exact("object"));
    // Document -> relational scalar mapping used by Normalization.
    m.insert(("mongodb", "postgres", "string"), TypeConversion::exact("text"));
    m.insert(("mongodb", "postgres", "int"), TypeConversion::exact("integer"));
    m.insert(("mongodb", "postgres", "long"), TypeConversion::exact("bigint"));
    m.insert(("mongodb", "postgres", "double"), TypeConversion::exact("double precision"));
    m.insert(("mongodb", "postgres", "bool"), TypeConversion::exact("boolean"));
    m.insert(("mongodb", "postgres", "date"), TypeConversion::exact("timestamp"));
    m.insert(("mongodb", "postgres", "object"), TypeConversion::lossy("jsonb", "nested object flattened into a child table by the normalization strategy"));
    m
});

fn normalize(type_name: &str) -> String {
    type_name.trim().to_lowercase()
}

fn strip_params(type_name: &str) -> &str {
    type_name.split('(').next().unwrap_or(type_name).trim()
}

/// Backends with a native fixed-precision decimal/numeric type. A
/// decimal(p,s) moving between two of these loses nothing, so it bypasses
/// `widen_generic`'s binary-float narrowing entirely.
const FIXED_PRECISION_DECIMAL_BACKENDS: &[&str] = &["postgres", "mysql"];

/// Preserves `decimal`/`numeric` precision across backends that both have a
/// native fixed-precision type, returning the same `(p,s)` suffix verbatim.
fn decimal_passthrough(source_backend: &str, target_backend: &str, source_type: &str) -> Option<TypeConversion> {
    let normalized_source_type = normalize(source_type);
    let key_type = strip_params(&normalized_source_type);
    if key_type != "decimal" && key_type != "numeric" {
        return None;
    }
    if !FIXED_PRECISION_DECIMAL_BACKENDS.contains(&source_backend) || !FIXED_PRECISION_DECIMAL_BACKENDS.contains(&target_backend) {
        return None;
    }
    let suffix = source_type.find('(').map(|i| &source_type[i..]).unwrap_or("");
    Some(TypeConversion::exact(format!("decimal{}", suffix)))
}

/// Widens a type within the same paradigm when no explicit pair entry
/// exists (e.g. `varchar(N)` -> `text` is non-lossy, arbitrary-precision
/// decimal -> `double precision` is lossy).
fn widen_generic(source_type: &str) -> TypeConversion {
    let normalized_source_type = normalize(source_type);
    let base = strip_params(&normalized_source_type);
    match base {
        "varchar" | "char" | "text" | "string" | "clob" => TypeConversion::exact("text"),
        "int" | "integer" | "int4" | "smallint" | "bigint" | "int8" => {
            TypeConversion::exact(base.to_string())
        }
        "decimal" | "numeric" => {
            TypeConversion::lossy("double precision", "arbitrary-precision decimal narrowed to a binary float")
        }
        "float" | "double" | "double precision" | "real" => TypeConversion::exact(base.to_string()),
        "boolean" | "bool" => TypeConversion::exact("boolean"),
        "timestamp" | "datetime" | "date" | "time" => TypeConversion::exact(base.to_string()),
        "uuid" => TypeConversion::exact("uuid"),
        "json" | "jsonb" => TypeConversion::exact("json"),
        "blob" | "bytea" | "binary" | "varbinary" => TypeConversion::exact("blob"),
        _ => TypeConversion::lossy("text", format!("no mapping known for source type {:?}", source_type)),
    }
}

/// Converts `source_type` from `source_backend` into the representation
/// `target_backend` should use. Never fails.
pub fn convert(source_backend: &str, target_backend: &str, source_type: &str) -> TypeConversion {
    if source_backend == target_backend {
        return TypeConversion::exact(source_type.to_string());
    }

    if let Some(conv) = decimal_passthrough(source_backend, target_backend, source_type) {
        return conv;
    }

    let normalized_source_type = normalize(source_type);
    let key_type = strip_params(&normalized_source_type);
    // `EXPLICIT` keys are 'static str; match by value instead of borrowing.
    for ((src, tgt, ty), conv) in EXPLICIT.iter() {
        if *src == source_backend && *tgt == target_backend && *ty == key_type {
            return conv.clone();
        }
    }

    // No backend-pair-specific entry: fall back to the generic paradigm
    // widening table, which always produces *something* plausible for the
    // target, flagged lossy whenever the widening loses information.
    widen_generic(source_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_pair_is_never_lossy() {
        let c = convert("postgres", "postgres", "numeric(10,2)");
        assert!(!c.lossy);
        assert_eq!(c.target_type, "numeric(10,2)");
    }

    #[test]
    fn decimal_precision_is_preserved_between_fixed_precision_backends() {
        let c = convert("postgres", "mysql", "decimal(10,2)");
        assert!(!c.lossy);
        assert_eq!(c.target_type, "decimal(10,2)");
    }

    #[test]
    fn decimal_without_precision_still_widens_when_no_fixed_precision_backend_is_involved() {
        let c = convert("postgres", "sqlite", "numeric");
        assert!(c.lossy);
    }

    #[test]
    fn unknown_type_falls_back_to_text_and_is_lossy() {
        let c = convert("postgres", "mysql", "some_custom_enum_type");
        assert_eq!(c.target_type, "text");
        assert!(c.lossy);
    }

    #[test]
    fn varchar_to_text_is_not_lossy() {
        let c = convert("mysql", "sqlite", "varchar(255)");
        assert_eq!(c.target_type, "text");
        assert!(!c.lossy);
    }

    #[test]
    fn postgres_integer_to_mongodb_int_is_exact() {
        let c = convert("postgres", "mongodb", "integer");
        assert_eq!(c.target_type, "int");
        assert!(!c.lossy);
    }
}
