//! Store documents to wire JSON.
//!
//! Identifiers always leave as strings, dates as canonical RFC 3339 text and
//! string-stored coordinates as numbers when they parse.

use bson::{Bson, Document};
use serde_json::{Map, Number, Value};
use sightings_contracts::fields;

use crate::dates;

pub fn normalize_document(document: Document) -> Value {
    normalize_object("", document)
}

fn normalize_object(prefix: &str, document: Document) -> Value {
    let mut object = Map::with_capacity(document.len());
    for (key, value) in document {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        object.insert(key, normalize_at(&path, value));
    }
    Value::Object(object)
}

fn normalize_at(path: &str, value: Bson) -> Value {
    match path {
        fields::ID => Value::String(identifier(&value)),
        fields::OBSERVED_AT => match dates::normalize_stored(&value) {
            Some(text) => Value::String(text),
            None => normalize_value(path, value),
        },
        fields::LATITUDE | fields::LONGITUDE => match value {
            Bson::String(text) => match text.trim().parse::<f64>().ok().and_then(Number::from_f64) {
                Some(number) => Value::Number(number),
                None => Value::String(text),
            },
            other => normalize_value(path, other),
        },
        _ => normalize_value(path, value),
    }
}

fn normalize_value(path: &str, value: Bson) -> Value {
    match value {
        Bson::Null | Bson::Undefined => Value::Null,
        Bson::Boolean(flag) => Value::Bool(flag),
        Bson::Int32(n) => Value::from(n),
        Bson::Int64(n) => Value::from(n),
        Bson::Double(n) => Number::from_f64(n).map_or(Value::Null, Value::Number),
        Bson::String(text) => Value::String(text),
        Bson::ObjectId(oid) => Value::String(oid.to_hex()),
        Bson::DateTime(stored) => Value::String(match dates::from_bson(stored) {
            Some(instant) => dates::to_canonical(instant),
            None => stored.to_string(),
        }),
        Bson::Document(inner) => normalize_object(path, inner),
        Bson::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| normalize_value(path, item))
                .collect(),
        ),
        other => other.into_relaxed_extjson(),
    }
}

fn identifier(value: &Bson) -> String {
    match value {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(text) => text.clone(),
        Bson::Int32(n) => n.to_string(),
        Bson::Int64(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Wire form of a group key. Null stays `None` rather than becoming text.
pub fn normalize_key(value: &Bson) -> Option<String> {
    match value {
        Bson::Null | Bson::Undefined => None,
        Bson::DateTime(_) => dates::normalize_stored(value),
        Bson::Double(n) => Some(n.to_string()),
        Bson::Boolean(flag) => Some(flag.to_string()),
        other => Some(identifier(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use bson::oid::ObjectId;

    #[test]
    fn object_ids_and_dates_become_strings() {
        let oid = ObjectId::new();
        let value = normalize_document(doc! {
            "_id": oid,
            "FechaEvento": bson::DateTime::from_millis(1_710_460_800_000),
            "NombreCientifico": "Felis catus",
        });
        assert_eq!(value["_id"], oid.to_hex());
        assert_eq!(value["FechaEvento"], "2024-03-15T00:00:00Z");
        assert_eq!(value["NombreCientifico"], "Felis catus");
    }

    #[test]
    fn string_dates_are_canonicalized_when_they_parse() {
        let value = normalize_document(doc! { "FechaEvento": "15/03/2024" });
        assert_eq!(value["FechaEvento"], "2024-03-15T00:00:00Z");
        let value = normalize_document(doc! { "FechaEvento": "unknown" });
        assert_eq!(value["FechaEvento"], "unknown");
    }

    #[test]
    fn string_coordinates_become_numbers() {
        let value = normalize_document(doc! {
            "Ubicacion": {
                "Pais": "Peru",
                "Geolocalizacion": { "Latitud": "10.6", "Longitud": "west" },
            },
        });
        let geo = &value["Ubicacion"]["Geolocalizacion"];
        assert_eq!(geo["Latitud"], 10.6);
        assert_eq!(geo["Longitud"], "west");
        assert_eq!(value["Ubicacion"]["Pais"], "Peru");
    }

    #[test]
    fn non_object_id_identifiers_are_stringified() {
        let value = normalize_document(doc! { "_id": 42 });
        assert_eq!(value["_id"], "42");
        let value = normalize_document(doc! { "_id": "abc" });
        assert_eq!(value["_id"], "abc");
    }

    #[test]
    fn null_keys_stay_null() {
        assert_eq!(normalize_key(&Bson::Null), None);
        assert_eq!(normalize_key(&Bson::from("leo")).as_deref(), Some("leo"));
        assert_eq!(normalize_key(&Bson::Int32(7)).as_deref(), Some("7"));
        let oid = ObjectId::new();
        assert_eq!(normalize_key(&Bson::ObjectId(oid)), Some(oid.to_hex()));
    }
}
