use std::{fs::File, io::BufReader, path::Path};

use anyhow::{bail, Context, Result};
use pcd_rs::{DynReader, DynRecord, Field};

use crate::compressed;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointXYZ {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl PointXYZ {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Axis aligned bounding box over the finite points of a cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Aabb {
    pub fn center(&self) -> [f32; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// Length of the longest side.
    pub fn extent(&self) -> f32 {
        (0..3)
            .map(|i| self.max[i] - self.min[i])
            .fold(0.0, f32::max)
    }
}

/// Ordered buffer of XYZ points. Loads append to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    points: Vec<PointXYZ>,
}

impl PointCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[PointXYZ] {
        &self.points
    }

    pub fn push(&mut self, point: PointXYZ) {
        self.points.push(point);
    }

    pub fn extend(&mut self, points: impl IntoIterator<Item = PointXYZ>) {
        self.points.extend(points);
    }

    /// `None` when the cloud holds no finite point.
    pub fn bounds(&self) -> Option<Aabb> {
        let mut finite = self.points.iter().filter(|p| p.is_finite());
        let first = finite.next()?;

        let mut aabb = Aabb {
            min: [first.x, first.y, first.z],
            max: [first.x, first.y, first.z],
        };

        for point in finite {
            for (i, value) in [point.x, point.y, point.z].into_iter().enumerate() {
                aabb.min[i] = aabb.min[i].min(value);
                aabb.max[i] = aabb.max[i].max(value);
            }
        }

        Some(aabb)
    }
}

/// Reads the PCD file at `path` and appends its points to `cloud`.
///
/// Only the `x`, `y` and `z` fields are used; any other field is ignored. The
/// file is read completely before anything is appended, so on error `cloud`
/// is left untouched. Returns the number of appended points.
pub fn load_pcd_file(path: impl AsRef<Path>, cloud: &mut PointCloud) -> Result<usize> {
    let path = path.as_ref();

    let points = read_points(path)?;
    let count = points.len();
    cloud.extend(points);

    Ok(count)
}

fn read_points(path: &Path) -> Result<Vec<PointXYZ>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);

    // pcd-rs has no binary_compressed support
    if let Ok(header) = compressed::read_header(&mut reader) {
        if header.is_compressed() {
            return compressed::read_points(&mut reader, &header)
                .with_context(|| format!("failed to read points from {}", path.display()));
        }
    }
    drop(reader);

    let reader =
        DynReader::open(path).with_context(|| format!("failed to open {}", path.display()))?;

    let names: Vec<String> = reader
        .meta()
        .field_defs
        .iter()
        .map(|def| def.name.clone())
        .collect();
    let indices = xyz_indices(&names).with_context(|| format!("in {}", path.display()))?;

    let records = reader
        .collect::<Result<Vec<DynRecord>, _>>()
        .with_context(|| format!("failed to read points from {}", path.display()))?;

    records
        .iter()
        .map(|record| to_point(record, indices))
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("malformed record in {}", path.display()))
}

fn xyz_indices(names: &[String]) -> Result<[usize; 3]> {
    let mut indices = [0; 3];

    for (slot, axis) in indices.iter_mut().zip(["x", "y", "z"]) {
        *slot = match names.iter().position(|name| *name == axis) {
            Some(index) => index,
            None => bail!("no `{}` field (fields: {})", axis, names.join(" ")),
        };
    }

    Ok(indices)
}

fn to_point(record: &DynRecord, [x, y, z]: [usize; 3]) -> Result<PointXYZ> {
    Ok(PointXYZ {
        x: scalar(record, x)?,
        y: scalar(record, y)?,
        z: scalar(record, z)?,
    })
}

fn scalar(record: &DynRecord, index: usize) -> Result<f32> {
    let value = match record.0.get(index) {
        Some(Field::I8(values)) => values.first().map(|&v| v as f32),
        Some(Field::I16(values)) => values.first().map(|&v| v as f32),
        Some(Field::I32(values)) => values.first().map(|&v| v as f32),
        Some(Field::U8(values)) => values.first().map(|&v| v as f32),
        Some(Field::U16(values)) => values.first().map(|&v| v as f32),
        Some(Field::U32(values)) => values.first().map(|&v| v as f32),
        Some(Field::F32(values)) => values.first().copied(),
        Some(Field::F64(values)) => values.first().map(|&v| v as f32),
        None => None,
    };

    value.with_context(|| format!("field #{} is missing", index))
}
