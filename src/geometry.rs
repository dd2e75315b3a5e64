//! Geometry loading from model files.
//!
//! Currently supports STL (binary and ASCII). Loaded geometry can be
//! recentered, normalized and re-oriented before it becomes a [`MeshData`]:
//!
//! ```no_run
//! use penumbra::{GeometryLoader, Material, Mesh};
//!
//! let data = GeometryLoader::from_file("bunny.stl")
//!     .centered()
//!     .normalized()
//!     .smooth_normals()
//!     .build()?;
//! let bunny = Mesh::new(data, Material::default());
//! # Ok::<(), penumbra::GeometryError>(())
//! ```

use std::path::Path;

use glam::{Quat, Vec3};

use crate::mesh::{MeshData, Vertex3d};

/// Errors that can occur when loading geometry.
#[derive(thiserror::Error, Debug)]
pub enum GeometryError {
    /// File could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// File format could not be determined from extension.
    #[error("Unknown geometry format: '{0}'")]
    UnknownFormat(String),
    /// The geometry data was invalid or corrupt.
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Mutable geometry before it is frozen into a [`MeshData`].
#[derive(Clone, Debug, Default)]
pub struct RawGeometry {
    pub vertices: Vec<Vertex3d>,
    pub indices: Vec<u32>,
}

impl RawGeometry {
    pub fn new(vertices: Vec<Vertex3d>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Axis-aligned bounds as `(min, max)`.
    pub fn bounds(&self) -> (Vec3, Vec3) {
        self.vertices.iter().fold(
            (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
            |(min, max), v| {
                let p = Vec3::from(v.position);
                (min.min(p), max.max(p))
            },
        )
    }

    pub fn center(&self) -> Vec3 {
        let (min, max) = self.bounds();
        (min + max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        let (min, max) = self.bounds();
        max - min
    }

    pub fn translate(&mut self, offset: Vec3) {
        for v in &mut self.vertices {
            v.position = (Vec3::from(v.position) + offset).into();
        }
    }

    pub fn scale(&mut self, factor: f32) {
        for v in &mut self.vertices {
            v.position = (Vec3::from(v.position) * factor).into();
        }
    }

    /// Rotates positions and normals.
    pub fn rotate(&mut self, rotation: Quat) {
        for v in &mut self.vertices {
            v.position = (rotation * Vec3::from(v.position)).into();
            v.normal = (rotation * Vec3::from(v.normal)).into();
        }
    }

    /// Moves the bounding box center to the origin.
    pub fn recenter(&mut self) {
        let center = self.center();
        self.translate(-center);
    }

    /// Scales uniformly so the largest extent is 1.
    pub fn normalize(&mut self) {
        let size = self.size();
        let max_dim = size.x.max(size.y).max(size.z);
        if max_dim > 0.0 {
            self.scale(1.0 / max_dim);
        }
    }

    /// Recomputes smooth normals by area-weighted averaging of face normals.
    pub fn recalculate_normals(&mut self) {
        let mut accum = vec![Vec3::ZERO; self.vertices.len()];

        for tri in self.indices.chunks_exact(3) {
            let [i0, i1, i2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let p0 = Vec3::from(self.vertices[i0].position);
            let p1 = Vec3::from(self.vertices[i1].position);
            let p2 = Vec3::from(self.vertices[i2].position);
            let face_normal = (p1 - p0).cross(p2 - p0);
            for i in [i0, i1, i2] {
                accum[i] += face_normal;
            }
        }

        for (v, n) in self.vertices.iter_mut().zip(accum) {
            v.normal = n.normalize_or_zero().into();
        }
    }

    /// Freezes the geometry, assigning it a fresh mesh id.
    pub fn into_mesh_data(self) -> MeshData {
        MeshData::new(self.vertices, self.indices)
    }
}

/// One post-processing step of a [`GeometryLoader`].
#[derive(Clone, Copy, Debug, PartialEq)]
enum Step {
    Center,
    Normalize,
    Scale(f32),
    Rotate(Quat),
    Translate(Vec3),
    SmoothNormals,
}

/// Fluent loader. Post-processing steps run in the order they are chained.
#[derive(Debug)]
pub struct GeometryLoader {
    source: Result<RawGeometry, GeometryError>,
    steps: Vec<Step>,
}

impl GeometryLoader {
    fn with_source(source: Result<RawGeometry, GeometryError>) -> Self {
        Self {
            source,
            steps: Vec::new(),
        }
    }

    fn then(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Loads geometry from a file, detecting the format from its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        Self::with_source(load_file(path.as_ref()))
    }

    /// Loads an STL file regardless of extension.
    pub fn from_stl(path: impl AsRef<Path>) -> Self {
        Self::with_source(load_stl_file(path.as_ref()))
    }

    /// Parses STL geometry from memory.
    pub fn from_stl_bytes(bytes: &[u8]) -> Self {
        Self::with_source(parse_stl(&mut std::io::Cursor::new(bytes)))
    }

    pub fn from_raw(geometry: RawGeometry) -> Self {
        Self::with_source(Ok(geometry))
    }

    pub fn centered(self) -> Self {
        self.then(Step::Center)
    }

    /// Largest extent becomes 1.
    pub fn normalized(self) -> Self {
        self.then(Step::Normalize)
    }

    pub fn smooth_normals(self) -> Self {
        self.then(Step::SmoothNormals)
    }

    pub fn scaled(self, factor: f32) -> Self {
        self.then(Step::Scale(factor))
    }

    pub fn translated(self, offset: Vec3) -> Self {
        self.then(Step::Translate(offset))
    }

    pub fn rotated_by(self, rotation: Quat) -> Self {
        self.then(Step::Rotate(rotation))
    }

    /// Reorients Z-up models to Y-up.
    pub fn upright(self) -> Self {
        self.rotated_by(Quat::from_rotation_x(-std::f32::consts::FRAC_PI_2))
    }

    /// Runs the chained steps and returns the processed geometry.
    pub fn build_raw(self) -> Result<RawGeometry, GeometryError> {
        let mut geometry = self.source?;
        if geometry.indices.len() % 3 != 0 {
            return Err(GeometryError::Parse(format!(
                "{} indices do not form whole triangles",
                geometry.indices.len()
            )));
        }
        let vertex_count = geometry.vertices.len();
        if let Some(index) = geometry
            .indices
            .iter()
            .find(|&&i| i as usize >= vertex_count)
        {
            return Err(GeometryError::Parse(format!(
                "index {index} out of range for {vertex_count} vertices"
            )));
        }

        for step in self.steps {
            match step {
                Step::Center => geometry.recenter(),
                Step::Normalize => geometry.normalize(),
                Step::Scale(factor) => geometry.scale(factor),
                Step::Rotate(rotation) => geometry.rotate(rotation),
                Step::Translate(offset) => geometry.translate(offset),
                Step::SmoothNormals => geometry.recalculate_normals(),
            }
        }
        Ok(geometry)
    }

    /// Runs the chained steps and freezes the result.
    pub fn build(self) -> Result<MeshData, GeometryError> {
        self.build_raw().map(RawGeometry::into_mesh_data)
    }
}

fn load_file(path: &Path) -> Result<RawGeometry, GeometryError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "stl" => load_stl_file(path),
        _ => Err(GeometryError::UnknownFormat(ext)),
    }
}

fn load_stl_file(path: &Path) -> Result<RawGeometry, GeometryError> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let geometry = parse_stl(&mut reader)?;
    log::debug!(
        "loaded {} ({} triangles)",
        path.display(),
        geometry.indices.len() / 3
    );
    Ok(geometry)
}

fn parse_stl<R: std::io::Read + std::io::Seek>(
    reader: &mut R,
) -> Result<RawGeometry, GeometryError> {
    let stl = stl_io::read_stl(reader).map_err(|e| GeometryError::Parse(e.to_string()))?;

    let mut vertices = Vec::with_capacity(stl.faces.len() * 3);
    let mut indices = Vec::with_capacity(stl.faces.len() * 3);

    // Faces are unwelded so each keeps its flat normal.
    for (i, face) in stl.faces.iter().enumerate() {
        let normal: [f32; 3] = face.normal.into();
        for &vertex_idx in &face.vertices {
            let vertex = stl.vertices.get(vertex_idx).ok_or_else(|| {
                GeometryError::Parse(format!("face {i} references missing vertex {vertex_idx}"))
            })?;
            vertices.push(Vertex3d::new((*vertex).into(), normal, [0.0, 0.0]));
        }
        let base = (i * 3) as u32;
        indices.extend_from_slice(&[base, base + 1, base + 2]);
    }

    Ok(RawGeometry::new(vertices, indices))
}
