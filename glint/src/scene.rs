use glam::{DAffine3, Vec3, Vec4};

/// Everything glint renders; owned by the application and handed over to
/// the engine by reference each frame.
///
/// The engine only ever mutates previous transforms (committed after each
/// frame) and, through [`crate::Animator`], transforms of animated
/// instances.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    /// Object-space vertex positions of all meshes.
    pub positions: Vec<Vec3>,

    /// Triangle indices of all meshes, relative to each mesh's first vertex.
    pub indices: Vec<u32>,

    pub meshes: Vec<Mesh>,
    pub mesh_instances: Vec<MeshInstance>,
    pub materials: Vec<Material>,
    pub instances: Vec<Instance>,
}

impl Scene {
    pub fn add_mesh(&mut self, positions: &[Vec3], indices: &[u32]) -> u32 {
        assert!(
            indices.len() % 3 == 0,
            "mesh indices don't form triangles: {}",
            indices.len()
        );

        assert!(
            indices.iter().all(|&idx| (idx as usize) < positions.len()),
            "mesh index out of bounds"
        );

        let mesh = Mesh {
            vertex_offset: self.positions.len() as u32,
            vertex_count: positions.len() as u32,
            index_offset: self.indices.len() as u32,
            index_count: indices.len() as u32,
        };

        self.positions.extend_from_slice(positions);
        self.indices.extend_from_slice(indices);
        self.meshes.push(mesh);

        self.meshes.len() as u32 - 1
    }

    pub fn add_mesh_instance(&mut self, mesh: u32) -> u32 {
        assert!((mesh as usize) < self.meshes.len(), "unknown mesh: {mesh}");

        self.mesh_instances.push(MeshInstance {
            mesh,
            blas_index: None,
        });

        self.mesh_instances.len() as u32 - 1
    }

    pub fn add_material(&mut self, material: Material) -> u32 {
        self.materials.push(material);
        self.materials.len() as u32 - 1
    }

    pub fn add_instance(&mut self, instance: Instance) -> u32 {
        assert!(
            (instance.mesh_instance as usize) < self.mesh_instances.len(),
            "unknown mesh instance: {}",
            instance.mesh_instance
        );

        assert!(
            (instance.material as usize) < self.materials.len(),
            "unknown material: {}",
            instance.material
        );

        self.instances.push(instance);
        self.instances.len() as u32 - 1
    }

    pub fn material_of(&self, instance: &Instance) -> &Material {
        &self.materials[instance.material as usize]
    }

    pub fn mesh_instance_of(&self, instance: &Instance) -> &MeshInstance {
        &self.mesh_instances[instance.mesh_instance as usize]
    }

    pub fn mesh_of(&self, instance: &Instance) -> &Mesh {
        &self.meshes[self.mesh_instance_of(instance).mesh as usize]
    }

    pub fn mesh_positions(&self, mesh: &Mesh) -> &[Vec3] {
        let start = mesh.vertex_offset as usize;

        &self.positions[start..start + mesh.vertex_count as usize]
    }

    pub fn mesh_indices(&self, mesh: &Mesh) -> &[u32] {
        let start = mesh.index_offset as usize;

        &self.indices[start..start + mesh.index_count as usize]
    }
}

/// Immutable range of vertices and indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mesh {
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    pub index_count: u32,
}

impl Mesh {
    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshInstance {
    pub mesh: u32,

    /// Index of the dynamic BLAS built for this mesh instance; assigned by
    /// [`crate::AccelStructs::build()`], stays `None` for static geometry.
    pub blas_index: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Instance {
    pub mesh_instance: u32,
    pub material: u32,
    pub transform: DAffine3,
    pub prev_transform: DAffine3,
    pub scale: f32,

    /// Whether the transform may change after classification (dynamic
    /// instance, with its own BLAS) or not (merged into a static BLAS).
    pub allow_update: bool,

    /// Proxy instances exist only to carry data (e.g. light proxies) and
    /// are never traced.
    pub proxy: bool,
}

impl Instance {
    pub fn new(mesh_instance: u32, material: u32, transform: DAffine3) -> Self {
        Self {
            mesh_instance,
            material,
            transform,
            prev_transform: transform,
            scale: transform.matrix3.determinant().abs().cbrt() as f32,
            allow_update: false,
            proxy: false,
        }
    }

    pub fn with_allow_update(mut self, allow_update: bool) -> Self {
        self.allow_update = allow_update;
        self
    }

    pub fn with_proxy(mut self, proxy: bool) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Moves the instance; previous transform is left as-is, so that motion
    /// gets picked up by the next frame.
    pub fn set_transform(&mut self, transform: DAffine3) {
        self.transform = transform;
    }

    pub fn is_left_handed(&self) -> bool {
        self.transform.matrix3.determinant() < 0.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AlphaMode {
    #[default]
    Opaque,

    /// Alpha-tested: texels below the cutoff are discarded.
    Mask,

    Blend,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    /// Linear RGB + alpha.
    pub base_color: Vec4,
    pub metalness: f32,
    pub roughness: f32,
    pub emission: Vec3,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,

    /// Alpha channel of the base color texture; used for baking opacity
    /// micromaps of alpha-tested geometry.
    pub alpha_mask: Option<AlphaMask>,

    /// Disabled materials are not rendered at all.
    pub off: bool,
}

impl Material {
    pub fn with_base_color(mut self, base_color: Vec4) -> Self {
        self.base_color = base_color;
        self
    }

    pub fn with_metalness(mut self, metalness: f32) -> Self {
        self.metalness = metalness;
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness;
        self
    }

    pub fn with_emission(mut self, emission: Vec3) -> Self {
        self.emission = emission;
        self
    }

    pub fn with_alpha_mode(mut self, alpha_mode: AlphaMode) -> Self {
        self.alpha_mode = alpha_mode;
        self
    }

    pub fn with_alpha_mask(mut self, alpha_mask: AlphaMask) -> Self {
        self.alpha_mask = Some(alpha_mask);
        self
    }

    pub fn with_off(mut self, off: bool) -> Self {
        self.off = off;
        self
    }

    /// Blended geometry; traced in the transparent pass.
    pub fn is_transparent(&self) -> bool {
        self.alpha_mode == AlphaMode::Blend
    }

    /// Alpha-tested geometry; traced with opaque geometry, but needs any-hit
    /// (or a micromap) to discard cut-out texels.
    pub fn is_alpha_tested(&self) -> bool {
        self.alpha_mode == AlphaMode::Mask
    }

    /// Whether hits can be accepted without running any-hit.
    pub fn is_opaque(&self) -> bool {
        self.alpha_mode == AlphaMode::Opaque
    }

    pub fn is_emissive(&self) -> bool {
        self.emission.max_element() > 0.0
    }
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            metalness: 0.0,
            roughness: 0.5,
            emission: Vec3::ZERO,
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            alpha_mask: None,
            off: false,
        }
    }
}

/// 8-bit alpha texture, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlphaMask {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use glam::{dvec3, vec3};

    use super::*;

    fn triangle() -> [Vec3; 3] {
        [vec3(0.0, 0.0, 0.0), vec3(1.0, 0.0, 0.0), vec3(0.0, 1.0, 0.0)]
    }

    #[test]
    fn meshes_are_laid_out_back_to_back() {
        let mut target = Scene::default();

        let a = target.add_mesh(&triangle(), &[0, 1, 2]);
        let b = target.add_mesh(&triangle(), &[0, 1, 2, 2, 1, 0]);

        let b = target.meshes[b as usize];

        assert_eq!(0, a);
        assert_eq!(3, b.vertex_offset);
        assert_eq!(3, b.index_offset);
        assert_eq!(2, b.triangle_count());
        assert_eq!(&[0, 1, 2, 2, 1, 0], target.mesh_indices(&b));
    }

    #[test]
    #[should_panic(expected = "mesh index out of bounds")]
    fn rejects_out_of_bounds_indices() {
        Scene::default().add_mesh(&triangle(), &[0, 1, 3]);
    }

    #[test]
    fn instance_scale_and_handedness() {
        let target = Instance::new(
            0,
            0,
            DAffine3::from_scale(dvec3(-2.0, 2.0, 2.0)),
        );

        assert!((target.scale - 2.0).abs() < 1e-5);
        assert!(target.is_left_handed());
        assert_eq!(target.transform, target.prev_transform);
    }

    #[test]
    fn material_classification() {
        let target = Material::default();

        assert!(target.is_opaque());
        assert!(!target.is_transparent());
        assert!(!target.is_emissive());

        let target = target
            .with_alpha_mode(AlphaMode::Mask)
            .with_emission(vec3(0.0, 2.0, 0.0));

        assert!(!target.is_opaque());
        assert!(!target.is_transparent());
        assert!(target.is_alpha_tested());
        assert!(target.is_emissive());

        let target = target.with_alpha_mode(AlphaMode::Blend);

        assert!(!target.is_opaque());
        assert!(target.is_transparent());
        assert!(!target.is_alpha_tested());
    }
}
