use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod fields;

/// Opaque store-assigned identifier, always surfaced as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SightingId(String);

impl fmt::Display for SightingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ranks absent from a record read back as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Taxonomy {
    #[serde(rename = "Reino")]
    pub kingdom: String,
    #[serde(rename = "Filo")]
    pub phylum: String,
    #[serde(rename = "Clase")]
    pub class: String,
    #[serde(rename = "Orden")]
    pub order: String,
    #[serde(rename = "Familia")]
    pub family: String,
    #[serde(rename = "Genero")]
    pub genus: String,
    #[serde(rename = "Especie")]
    pub species: String,
}

impl Taxonomy {
    pub fn rank(&self, rank: TaxonomicRank) -> &str {
        match rank {
            TaxonomicRank::Kingdom => &self.kingdom,
            TaxonomicRank::Phylum => &self.phylum,
            TaxonomicRank::Class => &self.class,
            TaxonomicRank::Order => &self.order,
            TaxonomicRank::Family => &self.family,
            TaxonomicRank::Genus => &self.genus,
            TaxonomicRank::Species => &self.species,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geolocation {
    #[serde(rename = "Latitud")]
    pub latitude: f64,
    #[serde(rename = "Longitud")]
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "Pais")]
    pub country: String,
    #[serde(rename = "Geolocalizacion")]
    pub geolocation: Geolocation,
}

/// One observation record, laid out with the persisted field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sighting {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SightingId>,
    #[serde(rename = "Taxonomia")]
    pub taxonomy: Taxonomy,
    #[serde(rename = "Ubicacion")]
    pub location: Location,
    #[serde(rename = "FechaEvento")]
    pub observed_at: DateTime<Utc>,
    #[serde(rename = "NombreCientifico")]
    pub scientific_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomicRank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl TaxonomicRank {
    pub const ALL: [TaxonomicRank; 7] = [
        TaxonomicRank::Kingdom,
        TaxonomicRank::Phylum,
        TaxonomicRank::Class,
        TaxonomicRank::Order,
        TaxonomicRank::Family,
        TaxonomicRank::Genus,
        TaxonomicRank::Species,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaxonomicRank::Kingdom => "kingdom",
            TaxonomicRank::Phylum => "phylum",
            TaxonomicRank::Class => "class",
            TaxonomicRank::Order => "order",
            TaxonomicRank::Family => "family",
            TaxonomicRank::Genus => "genus",
            TaxonomicRank::Species => "species",
        }
    }

    /// Accepts English and Spanish rank names, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "kingdom" | "reino" => Some(TaxonomicRank::Kingdom),
            "phylum" | "filo" => Some(TaxonomicRank::Phylum),
            "class" | "clase" => Some(TaxonomicRank::Class),
            "order" | "orden" => Some(TaxonomicRank::Order),
            "family" | "familia" => Some(TaxonomicRank::Family),
            "genus" | "genero" => Some(TaxonomicRank::Genus),
            "species" | "especie" => Some(TaxonomicRank::Species),
            _ => None,
        }
    }

    pub fn field_path(self) -> &'static str {
        match self {
            TaxonomicRank::Kingdom => fields::KINGDOM,
            TaxonomicRank::Phylum => fields::PHYLUM,
            TaxonomicRank::Class => fields::CLASS,
            TaxonomicRank::Order => fields::ORDER,
            TaxonomicRank::Family => fields::FAMILY,
            TaxonomicRank::Genus => fields::GENUS,
            TaxonomicRank::Species => fields::SPECIES,
        }
    }
}

impl fmt::Display for TaxonomicRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of a grouped aggregation. A null key stays null on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCount {
    pub key: Option<String>,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Sighting {
        Sighting {
            id: None,
            taxonomy: Taxonomy {
                kingdom: "Animalia".to_string(),
                phylum: "Chordata".to_string(),
                class: "Mammalia".to_string(),
                order: "Carnivora".to_string(),
                family: "Felidae".to_string(),
                genus: "Panthera".to_string(),
                species: "leo".to_string(),
            },
            location: Location {
                country: "Colombia".to_string(),
                geolocation: Geolocation {
                    latitude: 10.5,
                    longitude: -74.2,
                },
            },
            observed_at: Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap(),
            scientific_name: "Panthera leo".to_string(),
        }
    }

    #[test]
    fn rank_parse_accepts_both_vocabularies() {
        assert_eq!(TaxonomicRank::parse("Especie"), Some(TaxonomicRank::Species));
        assert_eq!(TaxonomicRank::parse("species"), Some(TaxonomicRank::Species));
        assert_eq!(TaxonomicRank::parse(" FILO "), Some(TaxonomicRank::Phylum));
        assert_eq!(TaxonomicRank::parse("tribe"), None);
    }

    #[test]
    fn every_rank_maps_to_a_taxonomy_path() {
        for rank in TaxonomicRank::ALL {
            assert!(rank.field_path().starts_with("Taxonomia."));
            assert_eq!(TaxonomicRank::parse(rank.as_str()), Some(rank));
        }
    }

    #[test]
    fn sighting_serializes_with_persisted_names() {
        let value = serde_json::to_value(sample()).unwrap();
        assert!(value.get("_id").is_none());
        assert_eq!(value["Taxonomia"]["Especie"], "leo");
        assert_eq!(value["Ubicacion"]["Geolocalizacion"]["Latitud"], 10.5);
        assert_eq!(value["NombreCientifico"], "Panthera leo");
    }

    #[test]
    fn stored_records_read_back_with_partial_taxonomy() {
        let sighting: Sighting = serde_json::from_value(serde_json::json!({
            "_id": "65f0c0ffee",
            "Taxonomia": { "Reino": "Animalia", "Especie": "catus" },
            "Ubicacion": {
                "Pais": "Colombia",
                "Geolocalizacion": { "Latitud": 10.5, "Longitud": -74.0 },
            },
            "FechaEvento": "2024-03-15T10:30:00Z",
            "NombreCientifico": "Felis catus",
            "Observador": "extra fields are ignored",
        }))
        .unwrap();
        assert_eq!(sighting.id.unwrap().to_string(), "65f0c0ffee");
        assert_eq!(sighting.taxonomy.rank(TaxonomicRank::Species), "catus");
        assert_eq!(sighting.taxonomy.rank(TaxonomicRank::Family), "");
        assert_eq!(
            sighting.observed_at,
            Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap()
        );
    }

    #[test]
    fn group_count_keeps_null_key() {
        let row = GroupCount {
            key: None,
            count: 3,
        };
        let value = serde_json::to_value(row).unwrap();
        assert!(value["key"].is_null());
        assert_eq!(value["count"], 3);
    }
}
