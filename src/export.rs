// src/export.rs
//! Export of stored finds and routes to common GPS formats

use crate::error::{Result, TrackError};
use crate::store::{FindRecord, RouteRecord};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Gpx,
    Geojson,
    Kml,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &str {
        match self {
            ExportFormat::Gpx => "gpx",
            ExportFormat::Geojson => "geojson",
            ExportFormat::Kml => "kml",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            ExportFormat::Gpx => "GPX (GPS Exchange)",
            ExportFormat::Geojson => "GeoJSON",
            ExportFormat::Kml => "KML (Keyhole)",
            ExportFormat::Csv => "CSV",
        }
    }
}

/// Finds become points, routes become tracks
#[derive(Default)]
pub struct Exporter<'a> {
    finds: Vec<&'a FindRecord>,
    routes: Vec<&'a RouteRecord>,
}

impl<'a> Exporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_find(&mut self, find: &'a FindRecord) {
        self.finds.push(find);
    }

    pub fn add_route(&mut self, route: &'a RouteRecord) {
        self.routes.push(route);
    }

    pub fn is_empty(&self) -> bool {
        self.finds.is_empty() && self.routes.is_empty()
    }

    pub fn render(&self, format: ExportFormat) -> Result<String> {
        if self.is_empty() {
            return Err(TrackError::Validation("Nothing to export".to_string()));
        }

        match format {
            ExportFormat::Gpx => Ok(self.to_gpx()),
            ExportFormat::Geojson => self.to_geojson(),
            ExportFormat::Kml => Ok(self.to_kml()),
            ExportFormat::Csv => Ok(self.to_csv()),
        }
    }

    pub fn export_to_file(&self, path: &Path, format: ExportFormat) -> Result<()> {
        let content = self.render(format)?;
        std::fs::write(path, content)?;
        tracing::info!(
            path = %path.display(),
            finds = self.finds.len(),
            routes = self.routes.len(),
            format = format.extension(),
            "Export written"
        );
        Ok(())
    }

    fn to_gpx(&self) -> String {
        let mut gpx = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="dtracked" xmlns="http://www.topografix.com/GPX/1/1">
"#,
        );

        for find in &self.finds {
            gpx.push_str(&format!(
                "  <wpt lat=\"{}\" lon=\"{}\">\n    <name>{}</name>\n    <time>{}</time>\n",
                find.location.latitude(),
                find.location.longitude(),
                escape_xml(&find.name),
                find.created_at.to_rfc3339()
            ));
            if let Some(desc) = find_description(find) {
                gpx.push_str(&format!("    <desc>{}</desc>\n", escape_xml(&desc)));
            }
            if let Some(site_type) = &find.site_type {
                gpx.push_str(&format!(
                    "    <type>{}</type>\n",
                    escape_xml(&site_type.to_string())
                ));
            }
            gpx.push_str("  </wpt>\n");
        }

        for route in &self.routes {
            gpx.push_str(&format!(
                "  <trk>\n    <name>{}</name>\n",
                escape_xml(&route.name)
            ));
            if let Some(desc) = &route.description {
                gpx.push_str(&format!("    <desc>{}</desc>\n", escape_xml(desc)));
            }
            gpx.push_str("    <trkseg>\n");
            for point in &route.path {
                gpx.push_str(&format!(
                    "      <trkpt lat=\"{}\" lon=\"{}\"/>\n",
                    point.latitude(),
                    point.longitude()
                ));
            }
            gpx.push_str("    </trkseg>\n  </trk>\n");
        }

        gpx.push_str("</gpx>\n");
        gpx
    }

    fn to_geojson(&self) -> Result<String> {
        let mut features: Vec<serde_json::Value> = self
            .finds
            .iter()
            .map(|find| {
                let mut properties = serde_json::json!({
                    "kind": "find",
                    "id": find.id,
                    "name": find.name,
                    "created_at": find.created_at.to_rfc3339(),
                });
                if let Some(desc) = &find.description {
                    properties["description"] = serde_json::json!(desc);
                }
                if let Some(site_name) = &find.site_name {
                    properties["site_name"] = serde_json::json!(site_name);
                }
                if let Some(site_type) = &find.site_type {
                    properties["site_type"] = serde_json::json!(site_type.to_string());
                }

                serde_json::json!({
                    "type": "Feature",
                    "geometry": {
                        "type": "Point",
                        "coordinates": [find.location.longitude(), find.location.latitude()]
                    },
                    "properties": properties
                })
            })
            .collect();

        features.extend(self.routes.iter().map(|route| {
            let coordinates: Vec<[f64; 2]> = route
                .path
                .iter()
                .map(|p| [p.longitude(), p.latitude()])
                .collect();
            let mut properties = serde_json::json!({
                "kind": "route",
                "id": route.id,
                "name": route.name,
                "distance_km": route.distance_km,
                "created_at": route.created_at.to_rfc3339(),
            });
            if let Some(desc) = &route.description {
                properties["description"] = serde_json::json!(desc);
            }

            serde_json::json!({
                "type": "Feature",
                "geometry": { "type": "LineString", "coordinates": coordinates },
                "properties": properties
            })
        }));

        let collection = serde_json::json!({
            "type": "FeatureCollection",
            "features": features
        });

        Ok(serde_json::to_string_pretty(&collection)?)
    }

    fn to_kml(&self) -> String {
        let mut kml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <name>dtracked export</name>
"#,
        );

        for find in &self.finds {
            kml.push_str(&format!(
                "    <Placemark>\n      <name>{}</name>\n",
                escape_xml(&find.name)
            ));
            if let Some(desc) = find_description(find) {
                kml.push_str(&format!(
                    "      <description>{}</description>\n",
                    escape_xml(&desc)
                ));
            }
            kml.push_str(&format!(
                "      <TimeStamp><when>{}</when></TimeStamp>\n      <Point>\n        <coordinates>{},{}</coordinates>\n      </Point>\n    </Placemark>\n",
                find.created_at.to_rfc3339(),
                find.location.longitude(),
                find.location.latitude()
            ));
        }

        for route in &self.routes {
            let coordinates: Vec<String> = route
                .path
                .iter()
                .map(|p| format!("{},{}", p.longitude(), p.latitude()))
                .collect();
            kml.push_str(&format!(
                "    <Placemark>\n      <name>{}</name>\n",
                escape_xml(&route.name)
            ));
            if let Some(desc) = &route.description {
                kml.push_str(&format!(
                    "      <description>{}</description>\n",
                    escape_xml(desc)
                ));
            }
            kml.push_str(&format!(
                "      <LineString>\n        <coordinates>{}</coordinates>\n      </LineString>\n    </Placemark>\n",
                coordinates.join(" ")
            ));
        }

        kml.push_str("  </Document>\n</kml>\n");
        kml
    }

    /// One row per find and one per route point
    fn to_csv(&self) -> String {
        let mut csv = String::from("kind,id,name,seq,latitude,longitude,timestamp,description\n");

        for find in &self.finds {
            csv.push_str(&format!(
                "find,{},{},,{},{},{},{}\n",
                find.id,
                escape_csv(&find.name),
                find.location.latitude(),
                find.location.longitude(),
                find.created_at.to_rfc3339(),
                find_description(find).map_or(String::new(), |d| escape_csv(&d))
            ));
        }

        for route in &self.routes {
            let description = route
                .description
                .as_deref()
                .map_or(String::new(), escape_csv);
            for (seq, point) in route.path.iter().enumerate() {
                csv.push_str(&format!(
                    "route,{},{},{},{},{},{},{}\n",
                    route.id,
                    escape_csv(&route.name),
                    seq,
                    point.latitude(),
                    point.longitude(),
                    route.created_at.to_rfc3339(),
                    description
                ));
            }
        }

        csv
    }
}

fn find_description(find: &FindRecord) -> Option<String> {
    match (&find.description, &find.site_name) {
        (Some(desc), Some(site)) => Some(format!("{} ({})", desc, site)),
        (Some(desc), None) => Some(desc.clone()),
        (None, Some(site)) => Some(site.clone()),
        (None, None) => None,
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
