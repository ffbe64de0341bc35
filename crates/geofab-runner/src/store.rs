//! Loading input documents.
//!
//! Vector inputs are JSON documents of the serialised `geo` and domain
//! types. The background raster is a GeoTIFF already in the output CRS.

use crate::{Result, RunnerError};
use geo::{MultiPolygon, Polygon};
use geofab_channel::{FlowEntry, FlowTable, Reach, ReachNetwork};
use geofab_dem::{
    BathymetryContours, DemError, DepthContour, LidarPoint, PointCloudTile, RiverBathymetryPoints, TileSource,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::borrow::Cow;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Read and parse a JSON document.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let input_error = |reason: String| RunnerError::Input {
        path: path.to_path_buf(),
        reason,
    };
    let file = File::open(path).map_err(|e| input_error(e.to_string()))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| input_error(e.to_string()))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Area {
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

/// A polygon or multipolygon boundary.
pub fn load_area(path: &Path) -> Result<MultiPolygon<f64>> {
    let area = match read_json::<Area>(path)? {
        Area::Polygon(polygon) => MultiPolygon::from(polygon),
        Area::MultiPolygon(multi) => multi,
    };
    debug!(path = %path.display(), polygons = area.0.len(), "Loaded area");
    Ok(area)
}

/// Depth contours, with depth in the named attribute or the geometry Z.
pub fn load_contours(path: &Path, z_label: Option<String>) -> Result<BathymetryContours> {
    let contours: Vec<DepthContour> = read_json(path)?;
    Ok(BathymetryContours::new(contours, z_label))
}

/// The river network.
pub fn load_network(path: &Path) -> Result<ReachNetwork> {
    let reaches: Vec<Reach> = read_json(path)?;
    Ok(ReachNetwork::new(reaches))
}

/// The flow and roughness table.
pub fn load_flow_table(path: &Path) -> Result<FlowTable> {
    let rows: Vec<FlowEntry> = read_json(path)?;
    Ok(FlowTable::new(rows))
}

/// Merge river bathymetry documents into one set of points and polygons.
pub fn load_river_bathymetry(paths: &[PathBuf]) -> Result<RiverBathymetryPoints> {
    let mut merged = RiverBathymetryPoints::default();
    for path in paths {
        let river: RiverBathymetryPoints = read_json(path)?;
        merged.points.extend(river.points);
        merged.polygons.extend(river.polygons);
    }
    Ok(merged)
}

/// A point-cloud tile stored as a JSON document, read on demand.
#[derive(Debug, Clone)]
pub struct JsonTile {
    name: String,
    path: PathBuf,
}

impl JsonTile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.display().to_string(),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TileSource for JsonTile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_points(&self) -> geofab_dem::Result<Cow<'_, [LidarPoint]>> {
        let tile: PointCloudTile = read_json(&self.path).map_err(|e| DemError::TileRead {
            tile: self.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Cow::Owned(tile.points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, Rect};
    use geofab_dem::GROUND;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("geofab-store-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("dir");
        dir
    }

    #[test]
    fn test_area_accepts_polygon_or_multipolygon() {
        let dir = temp_dir("area");
        let square = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 }).to_polygon();

        let single = dir.join("single.json");
        std::fs::write(&single, serde_json::to_string(&square).expect("json")).expect("write");
        assert_eq!(load_area(&single).expect("polygon").0.len(), 1);

        let multi = dir.join("multi.json");
        let two = MultiPolygon::new(vec![square.clone(), square]);
        std::fs::write(&multi, serde_json::to_string(&two).expect("json")).expect("write");
        assert_eq!(load_area(&multi).expect("multipolygon").0.len(), 2);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_flow_table_accepts_column_aliases() {
        let dir = temp_dir("flows");
        let path = dir.join("flows.json");
        std::fs::write(&path, r#"[{"nzsegment": 3, "flow": 12.5, "n": 0.03}]"#).expect("write");
        let table = load_flow_table(&path).expect("flows");
        assert_eq!(table.get(3).expect("entry").mannings_n, 0.03);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_json_tile_reads_lazily() {
        let dir = temp_dir("tile");
        let path = dir.join("tile.json");
        let tile = PointCloudTile {
            name: "t".into(),
            points: vec![LidarPoint {
                x: 1.0,
                y: 2.0,
                z: 3.0,
                classification: GROUND,
            }],
        };
        std::fs::write(&path, serde_json::to_string(&tile).expect("json")).expect("write");

        let source = JsonTile::new(&path);
        assert_eq!(source.read_points().expect("points").len(), 1);

        let missing = JsonTile::new(dir.join("missing.json"));
        assert!(matches!(missing.read_points(), Err(DemError::TileRead { .. })));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_input_names_path() {
        let err = load_network(Path::new("/nonexistent/rec.json")).expect_err("missing");
        assert!(err.to_string().contains("/nonexistent/rec.json"));
    }
}
