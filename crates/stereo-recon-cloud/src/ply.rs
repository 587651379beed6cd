//! ASCII PLY export.

use crate::{CloudError, PointCloud};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write `cloud` as ASCII PLY: float `x y z` and uchar `red green blue`
/// per vertex, in cloud order.
pub fn write_ply_to<W: Write>(mut out: W, cloud: &PointCloud) -> std::io::Result<()> {
    writeln!(out, "ply")?;
    writeln!(out, "format ascii 1.0")?;
    writeln!(out, "element vertex {}", cloud.len())?;
    for axis in ["x", "y", "z"] {
        writeln!(out, "property float {axis}")?;
    }
    for channel in ["red", "green", "blue"] {
        writeln!(out, "property uchar {channel}")?;
    }
    writeln!(out, "end_header")?;
    for p in &cloud.points {
        let [r, g, b] = p.color;
        writeln!(
            out,
            "{:.6} {:.6} {:.6} {r} {g} {b}",
            p.position.x, p.position.y, p.position.z
        )?;
    }
    out.flush()
}

pub fn write_ply(path: impl AsRef<Path>, cloud: &PointCloud) -> Result<(), CloudError> {
    let path = path.as_ref();
    let file = File::create(path)?;
    write_ply_to(BufWriter::new(file), cloud)?;
    log::info!("wrote {} vertices to {}", cloud.len(), path.display());
    Ok(())
}
