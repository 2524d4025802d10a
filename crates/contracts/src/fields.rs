//! Persisted document paths.

pub const ID: &str = "_id";
pub const SCIENTIFIC_NAME: &str = "NombreCientifico";
pub const OBSERVED_AT: &str = "FechaEvento";
pub const COUNTRY: &str = "Ubicacion.Pais";
pub const LATITUDE: &str = "Ubicacion.Geolocalizacion.Latitud";
pub const LONGITUDE: &str = "Ubicacion.Geolocalizacion.Longitud";

pub const KINGDOM: &str = "Taxonomia.Reino";
pub const PHYLUM: &str = "Taxonomia.Filo";
pub const CLASS: &str = "Taxonomia.Clase";
pub const ORDER: &str = "Taxonomia.Orden";
pub const FAMILY: &str = "Taxonomia.Familia";
pub const GENUS: &str = "Taxonomia.Genero";
pub const SPECIES: &str = "Taxonomia.Especie";

/// Top-level keys every loaded record must carry.
pub const REQUIRED_TOP_LEVEL: [&str; 4] =
    ["Taxonomia", "Ubicacion", "FechaEvento", "NombreCientifico"];

/// Paths indexed at startup.
pub const INDEXED: [&str; 12] = [
    SCIENTIFIC_NAME,
    OBSERVED_AT,
    COUNTRY,
    LATITUDE,
    LONGITUDE,
    KINGDOM,
    PHYLUM,
    CLASS,
    ORDER,
    FAMILY,
    GENUS,
    SPECIES,
];
