use std::f64::consts::TAU;
use std::time::Duration;

use glam::{dvec3, DVec2, DVec3};

use crate::{Scene, Settings};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrbitPlane {
    Xy,
    Xz,
    Yz,
}

/// Moves a dynamic instance along an axis-aligned ellipse.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnimatedInstance {
    pub instance: u32,
    pub center: DVec3,
    pub radii: DVec2,
    pub plane: OrbitPlane,

    /// Radians per second.
    pub angular_speed: f64,

    /// Current angle, in radians.
    pub phase: f64,

    pub clockwise: bool,
}

impl AnimatedInstance {
    pub fn new(instance: u32, center: DVec3, radii: DVec2) -> Self {
        Self {
            instance,
            center,
            radii,
            plane: OrbitPlane::Xz,
            angular_speed: 1.0,
            phase: 0.0,
            clockwise: false,
        }
    }

    pub fn with_plane(mut self, plane: OrbitPlane) -> Self {
        self.plane = plane;
        self
    }

    pub fn with_angular_speed(mut self, angular_speed: f64) -> Self {
        self.angular_speed = angular_speed;
        self
    }

    pub fn with_phase(mut self, phase: f64) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_clockwise(mut self, clockwise: bool) -> Self {
        self.clockwise = clockwise;
        self
    }

    pub fn position(&self) -> DVec3 {
        let a = self.radii.x * self.phase.cos();
        let b = self.radii.y * self.phase.sin();

        let offset = match self.plane {
            OrbitPlane::Xy => dvec3(a, b, 0.0),
            OrbitPlane::Xz => dvec3(a, 0.0, b),
            OrbitPlane::Yz => dvec3(0.0, a, b),
        };

        self.center + offset
    }

    fn advance(&mut self, dt: f64) {
        let direction = if self.clockwise { -1.0 } else { 1.0 };

        self.phase = (self.phase + direction * self.angular_speed * dt)
            .rem_euclid(TAU);
    }
}

/// Drives all animated instances by wall-clock time, so that the motion
/// doesn't depend on the frame rate.
#[derive(Clone, Debug, Default)]
pub struct Animator {
    instances: Vec<AnimatedInstance>,
}

impl Animator {
    pub fn add(&mut self, scene: &Scene, animated: AnimatedInstance) {
        let instance = scene
            .instances
            .get(animated.instance as usize)
            .unwrap_or_else(|| panic!("unknown instance: {}", animated.instance));

        assert!(
            instance.allow_update,
            "animated instance must be dynamic: {}",
            animated.instance
        );

        self.instances.push(animated);
    }

    pub fn instances(&self) -> &[AnimatedInstance] {
        &self.instances
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn update(
        &mut self,
        scene: &mut Scene,
        elapsed: Duration,
        settings: &Settings,
    ) {
        if !settings.animate_objects {
            return;
        }

        let dt = elapsed.as_secs_f64() * settings.animation_speed as f64;

        for animated in &mut self.instances {
            animated.advance(dt);

            let instance = &mut scene.instances[animated.instance as usize];
            let mut transform = instance.transform;

            transform.translation = animated.position();
            instance.set_transform(transform);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::FRAC_PI_2;

    use approx::assert_relative_eq;
    use glam::{dvec2, DAffine3, Vec3};

    use super::*;
    use crate::Instance;

    fn scene() -> Scene {
        let mut scene = Scene::default();
        let mesh = scene.add_mesh(&[Vec3::ZERO, Vec3::X, Vec3::Y], &[0, 1, 2]);
        let mi = scene.add_mesh_instance(mesh);
        let material = scene.add_material(Default::default());

        scene.add_instance(
            Instance::new(mi, material, DAffine3::IDENTITY).with_allow_update(true),
        );

        scene.add_instance(Instance::new(mi, material, DAffine3::IDENTITY));

        scene
    }

    fn settings(animate_objects: bool) -> Settings {
        Settings {
            animate_objects,
            animation_speed: 2.0,
            ..Default::default()
        }
    }

    #[test]
    fn follows_ellipse_by_wall_time() {
        let mut scene = scene();
        let mut target = Animator::default();

        target.add(
            &scene,
            AnimatedInstance::new(0, dvec3(10.0, 0.0, 0.0), dvec2(2.0, 1.0))
                .with_angular_speed(FRAC_PI_2),
        );

        // 0.5s at 2x speed = quarter of a turn
        target.update(&mut scene, Duration::from_millis(500), &settings(true));

        let translation = scene.instances[0].transform.translation;

        assert_relative_eq!(translation.x, 10.0, epsilon = 1e-9);
        assert_relative_eq!(translation.z, 1.0, epsilon = 1e-9);

        // Motion is left for the gatherer to pick up
        assert_eq!(DAffine3::IDENTITY, scene.instances[0].prev_transform);
    }

    #[test]
    fn paused_when_disabled() {
        let mut scene = scene();
        let mut target = Animator::default();

        target.add(
            &scene,
            AnimatedInstance::new(0, DVec3::ZERO, dvec2(1.0, 1.0)),
        );

        target.update(&mut scene, Duration::from_secs(1), &settings(false));

        assert_eq!(DAffine3::IDENTITY, scene.instances[0].transform);
        assert_eq!(0.0, target.instances()[0].phase);
    }

    #[test]
    fn phases_are_independent() {
        let mut scene = scene();
        let mut target = Animator::default();

        target.add(
            &scene,
            AnimatedInstance::new(0, DVec3::ZERO, dvec2(1.0, 1.0))
                .with_phase(1.0)
                .with_clockwise(true),
        );

        target.update(&mut scene, Duration::from_millis(250), &settings(true));

        assert_relative_eq!(target.instances()[0].phase, 0.5, epsilon = 1e-9);
    }

    #[test]
    #[should_panic(expected = "animated instance must be dynamic")]
    fn rejects_static_instances() {
        let scene = scene();

        Animator::default().add(
            &scene,
            AnimatedInstance::new(1, DVec3::ZERO, dvec2(1.0, 1.0)),
        );
    }
}
