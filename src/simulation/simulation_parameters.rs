use crate::{floating_type_mod::FT, vec2f, V2};
use serde::{Deserialize, Serialize};

/**
 * Startup configuration of the solver. It is read once when the simulation is
 * constructed and never changes afterwards.
 *
 * Positions live in a frame where the domain spans
 * `[margin_x, margin_x + domain_width] x [margin_y, margin_y + domain_height]`
 * and gravity points towards negative y.
 */
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationParams {
    pub num_particles: usize,

    pub domain_width: FT,
    pub domain_height: FT,
    pub margin_x: FT,
    pub margin_y: FT,
    // initial placement keeps this distance to the domain walls
    pub spawn_margin: FT,

    // kernel support radius, also the edge length of a spatial index cell
    pub influence_radius: FT,
    pub rest_density: FT,
    pub particle_mass: FT,
    // only used for visualization
    pub particle_radius: FT,

    pub worker_count: usize,
    pub constraint_iterations: usize,

    pub timestep: FT,
    pub gravity: FT,
    // decay of the external force accumulator per frame, < 1
    pub external_force_damping: FT,
    // spring constant of the soft wall response
    pub collision_penalty: FT,

    // XSPH viscosity coefficient
    pub viscosity: FT,
    pub vorticity_epsilon: FT,

    // regularizes the lambda denominator (CFM)
    pub relaxation: FT,

    // s_corr = -k * (W(d) / W(reference_distance))^n
    pub tensile_instability_k: FT,
    pub tensile_instability_n: i32,
    pub tensile_reference_distance: FT,

    pub interaction_radius: FT,
    // strength at which the interaction fully replaces gravity at the pointer
    pub interaction_strength_scale: FT,

    // clamp the density constraint to max(C, 0)
    pub unilateral_density_constraint: bool,

    // verify the spatial index after every frame (slow)
    pub check_spatial_index: bool,

    // fixed seed for the initial particle placement
    pub seed: Option<u64>,
}

impl Default for SimulationParams {
    fn default() -> Self {
        let window_width = 1080.;
        let window_height = 720.;
        let domain_width = 400.;
        let domain_height = 200.;
        let influence_radius = 16.;

        SimulationParams {
            num_particles: 500,
            domain_width,
            domain_height,
            margin_x: (window_width - domain_width) / 2.,
            margin_y: (window_height - domain_height) / 2.,
            spawn_margin: 2.,
            influence_radius,
            // 2D density of a square lattice with spacing 9 (mass 1, radius 16)
            rest_density: 0.0073,
            particle_mass: 1.,
            particle_radius: 4.,
            worker_count: 40,
            constraint_iterations: 20,
            timestep: 0.1,
            gravity: 30.,
            external_force_damping: 0.9,
            collision_penalty: 0.01,
            viscosity: 0.04,
            vorticity_epsilon: 0.01,
            relaxation: 3e-6,
            tensile_instability_k: 0.1,
            tensile_instability_n: 4,
            tensile_reference_distance: 0.03,
            interaction_radius: 5. * influence_radius,
            interaction_strength_scale: 10.,
            unilateral_density_constraint: false,
            check_spatial_index: false,
            seed: None,
        }
    }
}

impl SimulationParams {
    pub fn domain_min(&self) -> V2 {
        vec2f(self.margin_x, self.margin_y)
    }

    pub fn domain_max(&self) -> V2 {
        vec2f(self.margin_x + self.domain_width, self.margin_y + self.domain_height)
    }

    pub fn domain_extent(&self) -> V2 {
        vec2f(self.domain_width, self.domain_height)
    }

    pub fn gravity_vector(&self) -> V2 {
        vec2f(0., -self.gravity)
    }
}

#[test]
fn partial_yaml_falls_back_to_defaults() {
    let params: SimulationParams = serde_yaml::from_str("num_particles: 64\nworker_count: 2\nseed: 5\n").unwrap();
    assert_eq!(params.num_particles, 64);
    assert_eq!(params.worker_count, 2);
    assert_eq!(params.seed, Some(5));
    assert_eq!(params.constraint_iterations, 20);
    assert_eq!(params.domain_min(), vec2f(340., 260.));
    assert_eq!(params.domain_max(), vec2f(740., 460.));
}

#[test]
fn default_params_roundtrip_through_yaml() {
    let params = SimulationParams::default();
    let yaml = serde_yaml::to_string(&params).unwrap();
    let parsed: SimulationParams = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(params, parsed);
}
