//! Mesh geometry, materials, and spatial transforms.
//!
//! A drawable node carries a [`Mesh`]: shared, immutable [`MeshData`] plus
//! its own [`Material`]. Vertex data is uploaded lazily by the device, keyed
//! by the geometry's [`MeshId`].
//!
//! # Creating Meshes
//!
//! ```
//! use penumbra::{Material, Mesh, MeshData, Vec3};
//!
//! let floor = Mesh::new(MeshData::plane(20.0), Material::default());
//! let ball = Mesh::new(
//!     MeshData::sphere(32, 16),
//!     Material::default().albedo(Vec3::new(0.8, 0.2, 0.2)),
//! );
//! assert_ne!(floor.data().id(), ball.data().id());
//! ```
//!
//! # Vertex Layout
//!
//! 32 bytes per vertex: position (`Float32x3`, location 0), normal
//! (`Float32x3`, location 1), uv (`Float32x2`, location 2).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::{Mat4, Quat, Vec3};

/// Position, normal and texture coordinates of one vertex.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex3d {
    pub position: [f32; 3],
    /// Unit length for correct lighting.
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex3d {
    const ATTRS: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        0 => Float32x3, // position
        1 => Float32x3, // normal
        2 => Float32x2  // uv
    ];

    /// Vertex buffer layout shared by the lit and shadow programs.
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex3d>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &Self::ATTRS,
    };

    pub fn new(position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }
}

/// Process-unique identifier of a [`MeshData`].
///
/// Devices key their uploaded vertex/index buffers by this id, so geometry
/// shared between several drawables is uploaded once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(u64);

impl MeshId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Immutable CPU-side triangle geometry.
///
/// Geometry never changes after construction; to edit vertices, build a new
/// `MeshData` (it receives a fresh [`MeshId`]).
///
/// # Winding Order
///
/// All built-in primitives use counter-clockwise (CCW) winding for front
/// faces. Custom geometry should follow the same convention, since both the
/// lit pass and the shadow pass cull by winding.
#[derive(Debug)]
pub struct MeshData {
    id: MeshId,
    vertices: Vec<Vertex3d>,
    indices: Vec<u32>,
}

impl MeshData {
    /// Creates geometry from raw vertex and index data.
    ///
    /// # Example
    ///
    /// ```
    /// use penumbra::{MeshData, Vertex3d};
    ///
    /// let triangle = MeshData::new(
    ///     vec![
    ///         Vertex3d::new([0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [0.5, 0.0]),
    ///         Vertex3d::new([-1.0, -1.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0]),
    ///         Vertex3d::new([1.0, -1.0, 0.0], [0.0, 0.0, 1.0], [1.0, 1.0]),
    ///     ],
    ///     vec![0, 1, 2],
    /// );
    /// assert_eq!(triangle.index_count(), 3);
    /// ```
    pub fn new(vertices: Vec<Vertex3d>, indices: Vec<u32>) -> Self {
        Self {
            id: MeshId::next(),
            vertices,
            indices,
        }
    }

    pub fn id(&self) -> MeshId {
        self.id
    }

    pub fn vertices(&self) -> &[Vertex3d] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Creates a unit cube centered at the origin.
    ///
    /// Each face has its own four vertices so normals stay flat.
    pub fn cube() -> Self {
        // (normal, u, v) with u x v == normal, so corners listed in u/v order
        // wind counter-clockwise seen from outside.
        const FACES: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        ];
        const CORNERS: [(f32, f32); 4] = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, u, v) in FACES {
            let base = vertices.len() as u32;
            for (s, t) in CORNERS {
                let position = (normal + u * (2.0 * s - 1.0) + v * (2.0 * t - 1.0)) * 0.5;
                vertices.push(Vertex3d::new(position.into(), normal.into(), [s, t]));
            }
            indices.extend([0, 1, 2, 2, 3, 0].map(|i| base + i));
        }

        Self::new(vertices, indices)
    }

    /// Creates a UV sphere of radius 0.5 centered at the origin.
    ///
    /// `segments` divides the sphere around the equator, `rings` from pole to
    /// pole. 32×16 is a reasonable middle ground.
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut vertices = Vec::with_capacity(((segments + 1) * (rings + 1)) as usize);
        let mut indices = Vec::with_capacity((segments * rings * 6) as usize);

        for ring in 0..=rings {
            let phi = std::f32::consts::PI * ring as f32 / rings as f32;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for seg in 0..=segments {
                let theta = 2.0 * std::f32::consts::PI * seg as f32 / segments as f32;
                let x = ring_radius * theta.cos();
                let z = ring_radius * theta.sin();

                vertices.push(Vertex3d::new(
                    [x * 0.5, y * 0.5, z * 0.5],
                    [x, y, z],
                    [seg as f32 / segments as f32, ring as f32 / rings as f32],
                ));
            }
        }

        for ring in 0..rings {
            for seg in 0..segments {
                let current = ring * (segments + 1) + seg;
                let next = current + segments + 1;

                indices.extend_from_slice(&[current, current + 1, next]);
                indices.extend_from_slice(&[current + 1, next + 1, next]);
            }
        }

        Self::new(vertices, indices)
    }

    /// Creates a square plane on the XZ axis facing +Y.
    pub fn plane(size: f32) -> Self {
        let half = size * 0.5;
        let vertices = vec![
            Vertex3d::new([-half, 0.0, -half], [0.0, 1.0, 0.0], [0.0, 0.0]),
            Vertex3d::new([half, 0.0, -half], [0.0, 1.0, 0.0], [1.0, 0.0]),
            Vertex3d::new([half, 0.0, half], [0.0, 1.0, 0.0], [1.0, 1.0]),
            Vertex3d::new([-half, 0.0, half], [0.0, 1.0, 0.0], [0.0, 1.0]),
        ];

        Self::new(vertices, vec![0, 2, 1, 0, 3, 2])
    }
}

/// Surface parameters for the lit pass.
///
/// `roughness` weights the diffuse term and `1 - roughness` the specular
/// term. `emission` is added once per frame regardless of light count.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub albedo: Vec3,
    pub emission: Vec3,
    pub roughness: f32,
    pub metalness: f32,
    pub opacity: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo: Vec3::splat(0.8),
            emission: Vec3::ZERO,
            roughness: 0.6,
            metalness: 0.0,
            opacity: 1.0,
        }
    }
}

impl Material {
    pub fn albedo(mut self, albedo: Vec3) -> Self {
        self.albedo = albedo;
        self
    }

    pub fn emission(mut self, emission: Vec3) -> Self {
        self.emission = emission;
        self
    }

    /// Sets roughness, clamped to `[0, 1]`.
    pub fn roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness.clamp(0.0, 1.0);
        self
    }

    /// Sets metalness, clamped to `[0, 1]`.
    pub fn metalness(mut self, metalness: f32) -> Self {
        self.metalness = metalness.clamp(0.0, 1.0);
        self
    }
}

/// Shared geometry plus the material it is drawn with.
///
/// Cloning a `Mesh` shares the geometry; several drawables can reference the
/// same [`MeshData`] with different materials.
#[derive(Clone, Debug)]
pub struct Mesh {
    data: Arc<MeshData>,
    material: Material,
}

impl Mesh {
    pub fn new(data: MeshData, material: Material) -> Self {
        Self::shared(Arc::new(data), material)
    }

    pub fn shared(data: Arc<MeshData>, material: Material) -> Self {
        Self { data, material }
    }

    pub fn data(&self) -> &Arc<MeshData> {
        &self.data
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    pub fn material_mut(&mut self) -> &mut Material {
        &mut self.material
    }
}

/// A 3D transformation representing position, rotation, and scale.
///
/// Converted to a matrix in **Scale → Rotate → Translate** order.
///
/// ```
/// use penumbra::{Transform, Vec3, Quat};
///
/// let transform = Transform::new()
///     .position(Vec3::new(0.0, 5.0, -10.0))
///     .rotation(Quat::from_rotation_y(std::f32::consts::PI / 4.0))
///     .uniform_scale(2.0);
/// let matrix = transform.matrix();
/// assert_eq!(matrix.w_axis.truncate(), Vec3::new(0.0, 5.0, -10.0));
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    /// Translation relative to the parent.
    pub position: Vec3,
    /// Rotation as a unit quaternion.
    pub rotation: Quat,
    /// Scale factors for each axis.
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Creates a new identity transform.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transform positioned at the given location.
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    /// Converts this transform to a 4×4 matrix (SRT order).
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}
