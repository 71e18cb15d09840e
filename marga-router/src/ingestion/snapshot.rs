//! Diagnostic SVG snapshot of the active costmap.
//!
//! Renders the map bounds and every obstacle cell. Written after each
//! costmap build; a failed write is logged by the caller and never affects
//! routing.

use std::fmt::Write;
use std::path::{Path, PathBuf};

use marga_grid::MapMetadata;

use crate::error::{Result, RouterError};

const OBSTACLE_COLOR: &str = "#333333";
const FREE_COLOR: &str = "#FFFFFF";
const PADDING: f64 = 10.0;

/// Writes costmap snapshots to a fixed path.
#[derive(Clone, Debug)]
pub struct SnapshotWriter {
    path: PathBuf,
    /// Pixels per meter
    scale: f64,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>, scale: f64) -> Self {
        Self {
            path: path.into(),
            scale,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render `meta` as SVG markup.
    pub fn render(&self, meta: &MapMetadata) -> Result<String> {
        let cell = meta.resolution * self.scale;
        let map_w = meta.width as f64 * cell;
        let map_h = meta.height as f64 * cell;
        let width = map_w + 2.0 * PADDING;
        let height = map_h + 2.0 * PADDING;

        let mut svg = String::new();
        render_into(&mut svg, meta, cell, map_h, width, height)
            .map_err(|e| RouterError::Encode(format!("snapshot render: {}", e)))?;
        Ok(svg)
    }

    /// Render and save, creating the parent directory if needed.
    pub fn write(&self, meta: &MapMetadata) -> Result<()> {
        let svg = self.render(meta)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, svg)?;
        Ok(())
    }
}

fn render_into(
    svg: &mut String,
    meta: &MapMetadata,
    cell: f64,
    map_h: f64,
    width: f64,
    height: f64,
) -> std::fmt::Result {
    writeln!(svg, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
    writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{:.0}" height="{:.0}" viewBox="0 0 {:.0} {:.0}">"#,
        width, height, width, height
    )?;
    writeln!(
        svg,
        r#"  <g id="costmap" transform="translate({:.0}, {:.0})">"#,
        PADDING, PADDING
    )?;
    writeln!(
        svg,
        r#"    <rect width="{:.1}" height="{:.1}" fill="{}" stroke="{}"/>"#,
        meta.width as f64 * cell,
        map_h,
        FREE_COLOR,
        OBSTACLE_COLOR
    )?;

    for (x, y) in meta.obstacle_cells() {
        // SVG Y-axis points down
        let px_x = x as f64 * cell;
        let px_y = map_h - (y + 1) as f64 * cell;
        writeln!(
            svg,
            r#"    <rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"/>"#,
            px_x, px_y, cell, cell, OBSTACLE_COLOR
        )?;
    }

    writeln!(svg, "  </g>")?;
    writeln!(svg, "</svg>")
}
