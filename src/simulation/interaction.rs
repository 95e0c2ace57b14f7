use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::{floating_type_mod::FT, simulation_parameters::SimulationParams, V2};

/// Pointer position and strength; `strength > 0` pulls, `strength < 0` pushes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InteractionSample {
    pub point: V2,
    pub strength: FT,
}

impl Default for InteractionSample {
    fn default() -> Self {
        InteractionSample {
            point: V2::zeros(),
            strength: 0.,
        }
    }
}

/**
 * Last-write-wins slot written by the input side and read once per frame by the
 * solver. Writers never wait for the solver and nothing is queued.
 */
#[derive(Debug, Default)]
pub struct InteractionInput {
    current: Mutex<InteractionSample>,
}

impl InteractionInput {
    pub fn new() -> InteractionInput {
        InteractionInput::default()
    }

    pub fn set(&self, point: V2, strength: FT) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = InteractionSample { point, strength };
    }

    pub fn snapshot(&self) -> InteractionSample {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/**
 * Acceleration on a particle: gravity, blended inside the interaction radius
 * with a radial pull/push towards the pointer and a velocity damping term.
 * Both fall off linearly from the pointer to the edge of the radius.
 */
pub fn external_acceleration(
    position: V2,
    velocity: V2,
    interaction: InteractionSample,
    simulation_params: &SimulationParams,
) -> V2 {
    let gravity_accel = simulation_params.gravity_vector();

    if interaction.strength == 0. {
        return gravity_accel;
    }

    let radius = simulation_params.interaction_radius;
    let offset = interaction.point - position;
    let sqr_dst = offset.norm_squared();
    if sqr_dst >= radius * radius {
        return gravity_accel;
    }

    let dst = sqr_dst.sqrt();
    let centre_t = 1. - dst / radius;
    let dir_to_centre = if dst > 0. { offset / dst } else { V2::zeros() };

    let gravity_weight =
        1. - centre_t * (interaction.strength / simulation_params.interaction_strength_scale).clamp(0., 1.);

    gravity_accel * gravity_weight + dir_to_centre * (centre_t * interaction.strength) - velocity * centre_t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vec2f;
    use std::sync::Arc;

    #[test]
    fn zero_strength_is_pure_gravity() {
        let params = SimulationParams::default();
        let sample = InteractionSample {
            point: vec2f(400., 300.),
            strength: 0.,
        };
        let accel = external_acceleration(vec2f(401., 300.), vec2f(5., 5.), sample, &params);
        assert_eq!(accel, params.gravity_vector());
    }

    #[test]
    fn outside_radius_is_pure_gravity() {
        let params = SimulationParams::default();
        let sample = InteractionSample {
            point: vec2f(400., 300.),
            strength: 100.,
        };
        let position = vec2f(400. + params.interaction_radius + 1., 300.);
        let accel = external_acceleration(position, V2::zeros(), sample, &params);
        assert_eq!(accel, params.gravity_vector());
    }

    #[test]
    fn positive_strength_pulls_towards_point() {
        let params = SimulationParams::default();
        let point = vec2f(430., 320.);
        let position = vec2f(400., 300.);
        let sample = InteractionSample { point, strength: 100. };

        let to_point = (point - position).normalize();
        let baseline = params.gravity_vector().dot(&to_point);
        let accel = external_acceleration(position, V2::zeros(), sample, &params);

        assert!(accel.dot(&to_point) > baseline);
        assert!(accel.dot(&to_point) > 0.);
    }

    #[test]
    fn negative_strength_pushes_away_and_keeps_gravity() {
        let params = SimulationParams::default();
        let point = vec2f(430., 300.);
        let position = vec2f(400., 300.);
        let sample = InteractionSample { point, strength: -100. };

        let accel = external_acceleration(position, V2::zeros(), sample, &params);

        assert!(accel.x < 0.);
        crate::assert_ft_approx_eq(accel.y, -params.gravity, 1e-4, || "gravity is not blended out".to_string());
    }

    #[test]
    fn velocity_is_damped_near_pointer() {
        let params = SimulationParams::default();
        let position = vec2f(400., 300.);
        let sample = InteractionSample {
            point: position + vec2f(0., 10.),
            strength: 1.,
        };
        let still = external_acceleration(position, V2::zeros(), sample, &params);
        let moving = external_acceleration(position, vec2f(20., 0.), sample, &params);
        assert!(moving.x < still.x);
    }

    #[test]
    fn pointer_on_particle_stays_finite() {
        let params = SimulationParams::default();
        let position = vec2f(400., 300.);
        let sample = InteractionSample {
            point: position,
            strength: 100.,
        };
        let accel = external_acceleration(position, V2::zeros(), sample, &params);
        assert!(accel.x.is_finite() && accel.y.is_finite());
    }

    #[test]
    fn last_write_wins_across_threads() {
        let input = Arc::new(InteractionInput::new());
        assert_eq!(input.snapshot(), InteractionSample::default());

        let writer = {
            let input = input.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    input.set(vec2f(i as FT, 0.), i as FT);
                }
            })
        };
        writer.join().unwrap();

        let sample = input.snapshot();
        assert_eq!(sample.point, vec2f(99., 0.));
        assert_eq!(sample.strength, 99.);
    }
}
