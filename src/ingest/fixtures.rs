//! Representative GBFS payloads for the normalization tests.
//!
//! Shapes follow the GBFS 2.x feeds:
//!   station_information.data.stations[]
//!     .station_id, .name, .lat, .lon, .capacity, .region_id
//!   station_status.data.stations[]
//!     .station_id, .num_bikes_available
//!   system_regions.data.regions[]
//!     .region_id, .name
//!
//! Real feeds are not tidy: ids arrive as numbers or strings, capacity can
//! be missing or a string, coordinates can be empty strings.

/// Four stations in the target city, one outside it.
///
/// - 100: region "Wrocław", name without the city
/// - 101: no region, city in the name (diacritics)
/// - 102: numeric id, capacity as string, coordinates empty
/// - 103: region elsewhere, name elsewhere (filtered out)
/// - 104: in the city by name but no status entry (skipped)
pub(crate) fn fixture_station_information_json() -> &'static str {
    r#"{
      "last_updated": 1757518741,
      "ttl": 60,
      "data": {
        "stations": [
          { "station_id": "100", "name": "Plac Grunwaldzki", "lat": 51.1117, "lon": 17.0606,
            "capacity": 15, "region_id": "1" },
          { "station_id": "101", "name": "Wrocław Stadion, stacja kolejowa", "lat": "51.13673",
            "lon": 16.94133, "capacity": "twelve" },
          { "station_id": 102, "station_name": "WROCLAW Rynek", "lat": "", "lon": null,
            "capacity": "20" },
          { "station_id": "103", "name": "Poznań Główny", "lat": 52.40, "lon": 16.91,
            "capacity": 10, "region_id": "2" },
          { "station_id": "104", "name": "Wrocław Nadodrze", "lat": 51.12, "lon": 17.03,
            "capacity": 8 }
        ]
      }
    }"#
}

pub(crate) fn fixture_station_status_json() -> &'static str {
    r#"{
      "last_updated": 1757518741,
      "ttl": 60,
      "data": {
        "stations": [
          { "station_id": "100", "num_bikes_available": 4, "num_docks_available": 11 },
          { "station_id": "101", "num_bikes_available": 7 },
          { "station_id": "102", "num_docks_available": 20 },
          { "station_id": "103", "num_bikes_available": 2 }
        ]
      }
    }"#
}

pub(crate) fn fixture_system_regions_json() -> &'static str {
    r#"{
      "data": {
        "regions": [
          { "region_id": "1", "name": "Wrocław" },
          { "region_id": "2", "name": "Poznań" }
        ]
      }
    }"#
}

/// GBFS 3.0 publishes names as localized strings.
pub(crate) fn fixture_localized_names_json() -> &'static str {
    r#"{
      "data": {
        "stations": [
          { "station_id": "200", "name": [ { "text": "Wrocław Dworzec Główny", "language": "pl" } ],
            "lat": 51.098, "lon": 17.036, "capacity": 30 }
        ]
      }
    }"#
}
