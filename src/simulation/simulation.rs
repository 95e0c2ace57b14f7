use std::fmt::Display;
use std::fmt::Write;
use std::mem;
use std::sync::Arc;

use log::{debug, info, log_enabled, trace, warn, Level};
use num_traits::Float;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::iter::ParallelIterator;
use rayon::ThreadPoolBuildError;
use thiserror::Error;

use crate::{
    boundary_handler::DomainBoundary,
    concurrency::{into_par_iter, par_iter_mut1, par_iter_mut2, par_iter_mut3, WorkerPool},
    floating_type_mod::FT,
    interaction::{external_acceleration, InteractionInput, InteractionSample},
    neighborhood_search::{GridLayout, SpatialIndex},
    particles::ParticleVec,
    performance_counters::{write_counters, PerformanceCounters, ValueCounters},
    simulation_parameters::SimulationParams,
    sph_kernels::SmoothingKernels,
    vec2f, V2,
};

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("failed to start the worker pool: {0}")]
    WorkerPool(#[from] ThreadPoolBuildError),
}

/// z-component of the 3D cross product of two in-plane vectors
#[inline(always)]
fn cross2(a: V2, b: V2) -> FT {
    a.x * b.y - a.y * b.x
}

/**
 * Position-Based Fluids solver.
 *
 * Every frame is a fixed sequence of fork-join phases on the worker pool:
 * force integration, `constraint_iterations` times lambda + correction, and
 * the velocity update. Between two frames the spatial index holds every
 * particle in the cell of its `position`; inside a frame it follows `predicted`.
 */
pub struct FluidSimulation {
    particles: ParticleVec,
    index: SpatialIndex,
    kernels: SmoothingKernels,
    boundary: DomainBoundary,
    interaction: Arc<InteractionInput>,
    pool: Arc<WorkerPool>,

    // W(tensile_reference_distance), zero disables s_corr
    tensile_reference_density: FT,

    params: SimulationParams,
    time: FT,
    frame_number: usize,

    pub pcounters: PerformanceCounters,
    pub vcounters: ValueCounters,
}

impl FluidSimulation {
    /// Random placement of `num_particles` inside the domain, `spawn_margin` away from the walls.
    pub fn new(simulation_params: SimulationParams) -> Result<FluidSimulation, SimulationError> {
        let mut rng = match simulation_params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let spawn_margin = vec2f(simulation_params.spawn_margin, simulation_params.spawn_margin);
        let spawn_min = simulation_params.domain_min() + spawn_margin;
        let spawn_extent = simulation_params.domain_max() - spawn_margin - spawn_min;

        let positions = (0..simulation_params.num_particles)
            .map(|_| spawn_min + vec2f(rng.gen::<FT>() * spawn_extent.x, rng.gen::<FT>() * spawn_extent.y))
            .collect();

        Self::from_positions(simulation_params, positions)
    }

    pub fn from_positions(
        mut simulation_params: SimulationParams,
        positions: Vec<V2>,
    ) -> Result<FluidSimulation, SimulationError> {
        simulation_params.num_particles = positions.len();

        let pool = WorkerPool::new(simulation_params.worker_count)?;
        let kernels = SmoothingKernels::new(simulation_params.influence_radius);
        let boundary = DomainBoundary::from_params(&simulation_params);

        let outside = positions.iter().filter(|p| !boundary.contains(**p)).count();
        if outside > 0 {
            warn!("{} of {} initial positions are outside of the domain", outside, positions.len());
        }

        let layout = GridLayout::new(
            simulation_params.domain_min(),
            simulation_params.domain_extent(),
            simulation_params.influence_radius,
        );
        let mut index = SpatialIndex::new(layout, positions.len());
        index.place_all(&positions);

        info!(
            "initialized {} particles on a {}x{} grid (cell size {}), {} workers, {} constraint iterations",
            positions.len(),
            layout.cells_x(),
            layout.cells_y(),
            layout.cell_size(),
            pool.num_workers(),
            simulation_params.constraint_iterations
        );

        Ok(FluidSimulation {
            particles: ParticleVec::with_positions(positions),
            index,
            kernels,
            boundary,
            interaction: Arc::new(InteractionInput::new()),
            pool: Arc::new(pool),
            tensile_reference_density: kernels.density(simulation_params.tensile_reference_distance),
            params: simulation_params,
            time: 0.,
            frame_number: 0,
            pcounters: PerformanceCounters::new(true),
            vcounters: ValueCounters::new(true),
        })
    }

    pub fn num_particles(&self) -> usize {
        self.particles.len()
    }

    pub fn positions(&self) -> &[V2] {
        &self.particles.position
    }

    pub fn velocities(&self) -> &[V2] {
        &self.particles.velocity
    }

    /// Multipliers of the last constraint iteration.
    pub fn lambdas(&self) -> &[FT] {
        &self.particles.lambda
    }

    /// Densities of the last constraint iteration.
    pub fn densities(&self) -> &[FT] {
        &self.particles.density
    }

    pub fn frame_number(&self) -> usize {
        self.frame_number
    }

    pub fn time(&self) -> FT {
        self.time
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    pub fn spatial_index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn interaction_input(&self) -> Arc<InteractionInput> {
        self.interaction.clone()
    }

    pub fn set_interaction_input(&self, point: V2, strength: FT) {
        self.interaction.set(point, strength);
    }

    /// Mean of `|density / rest_density - 1|` over all particles.
    pub fn average_density_error(&self) -> FT {
        if self.particles.is_empty() {
            return 0.;
        }
        let rest_density = self.params.rest_density;
        let density = &self.particles.density;
        let sum: FT = self.pool.install(|| {
            into_par_iter(0..density.len())
                .map(|i| (density[i] / rest_density - 1.).abs())
                .sum()
        });
        sum / self.particles.len() as FT
    }

    fn max_abs_lambda(&self) -> FT {
        let lambda = &self.particles.lambda;
        self.pool.install(|| {
            into_par_iter(0..lambda.len())
                .map(|i| lambda[i].abs())
                .reduce(|| 0., FT::max)
        })
    }

    pub fn single_step(&mut self) {
        self.pcounters.begin("simulation-step");

        let interaction = self.interaction.snapshot();
        let pool = self.pool.clone();
        pool.install(|| self.run_phases(interaction));

        if self.params.check_spatial_index {
            self.index.check_membership(&self.particles.position);
        }

        self.time += self.params.timestep;
        self.frame_number += 1;

        self.pcounters.end("simulation-step");

        // only computed when recorded or logged
        if self.vcounters.is_enabled() || log_enabled!(Level::Debug) {
            let density_error = self.average_density_error();
            let max_lambda = self.max_abs_lambda();
            self.vcounters.add_value("density-error", density_error);
            self.vcounters.add_value("max-lambda", max_lambda);

            debug!(
                "frame {}: density error {:.5}, max |lambda| {:.4}",
                self.frame_number, density_error, max_lambda
            );
        }
    }

    fn run_phases(&mut self, interaction: InteractionSample) {
        self.pcounters.begin("force-integration");
        self.integrate_forces(interaction);
        self.pcounters.end("force-integration");

        for iteration in 0..self.params.constraint_iterations {
            self.pcounters.begin("lambda");
            self.compute_lambdas();
            self.end_iteration_counter("lambda", iteration);

            self.pcounters.begin("correction");
            self.compute_position_corrections();
            self.apply_position_corrections();
            self.end_iteration_counter("correction", iteration);
        }

        self.pcounters.begin("velocity-update");
        self.update_velocities();
        self.pcounters.end("velocity-update");

        trace!(
            "frame {} phases: force-integration {:?}, lambda {:?}, correction {:?}, velocity-update {:?}",
            self.frame_number,
            self.pcounters.get("force-integration").map(|c| c.avg()),
            self.pcounters.get("lambda").map(|c| c.avg()),
            self.pcounters.get("correction").map(|c| c.avg()),
            self.pcounters.get("velocity-update").map(|c| c.avg()),
        );
    }

    fn end_iteration_counter(&mut self, id: &str, iteration: usize) {
        if iteration == 0 {
            self.pcounters.end(id);
        } else {
            self.pcounters.end_add_to_last(id);
        }
    }

    fn integrate_forces(&mut self, interaction: InteractionSample) {
        let simulation_params = &self.params;
        let dt = simulation_params.timestep;
        let damping = simulation_params.external_force_damping;
        let boundary = &self.boundary;
        let index = &self.index;
        let position = &self.particles.position;

        par_iter_mut3(
            &mut self.particles.velocity,
            &mut self.particles.external,
            &mut self.particles.predicted,
            |i, velocity, external, predicted| {
                *external *= damping;

                let accel = external_acceleration(position[i], *velocity, interaction, simulation_params);
                *velocity += accel * dt + *external;

                let mut delta = *velocity * dt;
                *predicted = position[i];
                boundary.collision_handler(predicted, external, &mut delta);
                *predicted += delta;

                index.update_membership(i, index.cell_of(position[i]), index.cell_of(*predicted));
            },
        );
    }

    fn compute_lambdas(&mut self) {
        let kernels = &self.kernels;
        let index = &self.index;
        let predicted = &self.particles.predicted;
        let mass = self.params.particle_mass;
        let rest_density = self.params.rest_density;
        let relaxation = self.params.relaxation;
        let unilateral = self.params.unilateral_density_constraint;

        par_iter_mut2(
            &mut self.particles.lambda,
            &mut self.particles.density,
            |i, lambda, density| {
                let pi = predicted[i];

                let mut rho: FT = 0.;
                let mut grad_sum = V2::zeros();
                let mut grad_sq_sum: FT = 0.;

                for j in index.neighbors(index.cell_of(pi)) {
                    if j == i {
                        continue;
                    }
                    let xij = pi - predicted[j];
                    let dist = xij.norm();
                    rho += mass * kernels.density(dist);

                    let grad = vec2f(
                        kernels.density_derivative(dist, xij.x),
                        kernels.density_derivative(dist, xij.y),
                    );
                    grad_sum += grad;
                    grad_sq_sum += grad.norm_squared();
                }

                *density = rho;

                let mut constraint = rho / rest_density - 1.;
                if unilateral {
                    constraint = constraint.max(0.);
                }

                *lambda = -constraint * rest_density / (relaxation + grad_sq_sum + grad_sum.norm_squared());
            },
        );
    }

    fn compute_position_corrections(&mut self) {
        let kernels = &self.kernels;
        let index = &self.index;
        let predicted = &self.particles.predicted;
        let lambda = &self.particles.lambda;
        let tensile_k = self.params.tensile_instability_k;
        let tensile_n = self.params.tensile_instability_n;
        let reference_density = self.tensile_reference_density;

        par_iter_mut1(&mut self.particles.delta, |i, delta| {
            let pi = predicted[i];
            let lambda_i = lambda[i];

            let mut sum = V2::zeros();
            for j in index.neighbors(index.cell_of(pi)) {
                if j == i {
                    continue;
                }
                let xij = pi - predicted[j];
                let dist = xij.norm();

                let s_corr = if reference_density > 0. {
                    -tensile_k * (kernels.density(dist) / reference_density).powi(tensile_n)
                } else {
                    0.
                };

                sum += kernels.density_gradient(xij) * (lambda_i + lambda[j] + s_corr);
            }

            *delta = sum;
        });
    }

    fn apply_position_corrections(&mut self) {
        let boundary = &self.boundary;
        let index = &self.index;

        par_iter_mut3(
            &mut self.particles.predicted,
            &mut self.particles.delta,
            &mut self.particles.external,
            |i, predicted, delta, external| {
                let old_cell = index.cell_of(*predicted);
                boundary.collision_handler(predicted, external, delta);
                *predicted += *delta;
                index.update_membership(i, old_cell, index.cell_of(*predicted));
            },
        );
    }

    fn update_velocities(&mut self) {
        let kernels = &self.kernels;
        let index = &self.index;
        let dt = self.params.timestep;
        let viscosity = self.params.viscosity;
        let vorticity_epsilon = self.params.vorticity_epsilon;

        {
            let position = &self.particles.position;
            let predicted = &self.particles.predicted;
            par_iter_mut1(&mut self.particles.velocity, |i, velocity| {
                *velocity = (predicted[i] - position[i]) / dt;
            });
        }

        {
            let predicted = &self.particles.predicted;
            let velocity = &self.particles.velocity;
            par_iter_mut1(&mut self.particles.curl, |i, curl| {
                let pi = predicted[i];
                let vi = velocity[i];
                *curl = index
                    .neighbors(index.cell_of(pi))
                    .filter(|&j| j != i)
                    // (v_j - v_i) x grad_j W_ij, positive for counter-clockwise rotation
                    .map(|j| cross2(velocity[j] - vi, kernels.density_gradient(predicted[j] - pi)))
                    .sum();
            });
        }

        {
            let predicted = &self.particles.predicted;
            let velocity = &self.particles.velocity;
            let curl = &self.particles.curl;
            par_iter_mut1(&mut self.particles.velocity_temp, |i, velocity_next| {
                let pi = predicted[i];
                let vi = velocity[i];
                let curl_i = curl[i];

                let mut velocity_diffusion = V2::zeros();
                let mut eta = V2::zeros();
                for j in index.neighbors(index.cell_of(pi)) {
                    if j == i {
                        continue;
                    }
                    let xij = pi - predicted[j];
                    velocity_diffusion += (velocity[j] - vi) * kernels.viscosity(xij.norm());
                    eta += kernels.density_gradient(xij) * (curl[j].abs() - curl_i.abs());
                }

                let mut vorticity_force = V2::zeros();
                let eta_len = eta.norm();
                if eta_len > FT::EPSILON {
                    let n = eta / eta_len;
                    vorticity_force = vec2f(n.y * curl_i, -n.x * curl_i) * vorticity_epsilon;
                }

                *velocity_next = vi + velocity_diffusion * viscosity + vorticity_force * dt;
            });
        }

        mem::swap(&mut self.particles.velocity, &mut self.particles.velocity_temp);

        let predicted = &self.particles.predicted;
        par_iter_mut1(&mut self.particles.position, |i, position| {
            *position = predicted[i];
        });
    }
}

pub fn write_statistics(fluid_simulation: &FluidSimulation) -> String {
    let mut s = String::new();

    let _ = writeln!(
        s,
        "particles: {}, frames: {}, simulated time: {:.3}",
        fluid_simulation.num_particles(),
        fluid_simulation.frame_number(),
        fluid_simulation.time()
    );
    let _ = writeln!(s);

    s.push_str(&write_counters(&fluid_simulation.pcounters, &fluid_simulation.vcounters));
    s
}

pub fn is_ft_approx_eq<FT: Float>(a: FT, b: FT, tolerance: FT) -> bool {
    assert!(!a.is_nan());
    assert!(!b.is_nan());
    b <= a + tolerance && b >= a - tolerance
}

pub fn assert_ft_approx_eq<FT: Float + Display>(a: FT, b: FT, tolerance: FT, s: impl FnOnce() -> String) {
    if !is_ft_approx_eq(a, b, tolerance) {
        panic!(
            "{} value not equal with a tolerance of {}:\n\ta={}\n\tb={}\n",
            s(),
            tolerance,
            a,
            b
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> SimulationParams {
        SimulationParams {
            worker_count: 4,
            seed: Some(42),
            ..SimulationParams::default()
        }
    }

    /// `cols x rows` square lattice with its lower left particle at `origin`.
    fn lattice(origin: V2, spacing: FT, cols: usize, rows: usize) -> Vec<V2> {
        (0..rows)
            .flat_map(|row| (0..cols).map(move |col| origin + vec2f(col as FT, row as FT) * spacing))
            .collect()
    }

    fn lattice_density(kernels: &SmoothingKernels, positions: &[V2], i: usize, mass: FT) -> FT {
        positions
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, p)| mass * kernels.density((positions[i] - p).norm()))
            .sum()
    }

    #[test]
    fn particles_stay_inside_domain() {
        let params = SimulationParams {
            num_particles: 400,
            check_spatial_index: true,
            ..test_params()
        };
        let mut simulation = FluidSimulation::new(params).unwrap();

        let min = params.domain_min();
        let max = params.domain_max();

        for frame in 0..120 {
            // pull the fluid into the lower left corner for a while
            if frame == 30 {
                simulation.set_interaction_input(min + vec2f(20., 20.), 100.);
            } else if frame == 80 {
                simulation.set_interaction_input(V2::zeros(), 0.);
            }

            simulation.single_step();

            for (i, p) in simulation.positions().iter().enumerate() {
                assert!(
                    p.x >= min.x && p.x <= max.x && p.y >= min.y && p.y <= max.y,
                    "frame {}: particle {} escaped to {:?}",
                    frame,
                    i,
                    p
                );
            }
        }

        assert_eq!(simulation.frame_number(), 120);
        simulation.spatial_index().check_membership(simulation.positions());
    }

    #[test]
    fn single_particle_falls_freely() {
        let params = test_params();
        let start = vec2f(540., 440.);
        let mut simulation = FluidSimulation::from_positions(params, vec![start]).unwrap();

        let frames = 10;
        for _ in 0..frames {
            simulation.single_step();
        }

        let velocity = simulation.velocities()[0];
        let expected = -params.gravity * frames as FT * params.timestep;
        assert_ft_approx_eq(velocity.y, expected, 0.05, || "vertical velocity".to_string());
        assert!(velocity.x.abs() < 1e-6);
        assert!(simulation.positions()[0].y < start.y);
        assert_ft_approx_eq(simulation.time(), frames as FT * params.timestep, 1e-4, || {
            "simulated time".to_string()
        });
    }

    #[test]
    fn lattice_at_rest_density_has_vanishing_lambdas() {
        let cols = 21;
        let rows = 11;
        let spacing = 9.;
        let mut params = test_params();
        let positions = lattice(params.domain_min() + vec2f(100., 50.), spacing, cols, rows);

        let kernels = SmoothingKernels::new(params.influence_radius);
        let centre = (rows / 2) * cols + cols / 2;
        params.rest_density = lattice_density(&kernels, &positions, centre, params.particle_mass);

        let mut simulation = FluidSimulation::from_positions(params, positions).unwrap();
        simulation.compute_lambdas();

        // two lattice spacings exceed the influence radius
        for row in 2..rows - 2 {
            for col in 2..cols - 2 {
                let i = row * cols + col;
                assert!(
                    simulation.lambdas()[i].abs() < 0.05,
                    "lambda[{}] = {} at rest density",
                    i,
                    simulation.lambdas()[i]
                );
                assert_ft_approx_eq(simulation.densities()[i], params.rest_density, params.rest_density * 1e-4, || {
                    format!("density[{}]", i)
                });
            }
        }
    }

    #[test]
    fn compressed_lattice_is_pushed_apart() {
        let cols = 21;
        let rows = 11;
        let mut params = test_params();
        let kernels = SmoothingKernels::new(params.influence_radius);

        let rest = lattice(params.domain_min() + vec2f(100., 50.), 9., cols, rows);
        let centre = (rows / 2) * cols + cols / 2;
        params.rest_density = lattice_density(&kernels, &rest, centre, params.particle_mass);

        let compressed = lattice(params.domain_min() + vec2f(100., 50.), 8., cols, rows);
        let mut simulation = FluidSimulation::from_positions(params, compressed.clone()).unwrap();
        simulation.compute_lambdas();
        assert!(simulation.lambdas()[centre] < -1.);

        simulation.compute_position_corrections();
        simulation.apply_position_corrections();

        // interior corrections cancel by symmetry, the surface layer is pushed outwards
        let left_edge = (rows / 2) * cols;
        let right_edge = left_edge + cols - 1;
        assert!(simulation.particles.predicted[right_edge].x > compressed[right_edge].x);
        assert!(simulation.particles.predicted[left_edge].x < compressed[left_edge].x);
        simulation.spatial_index().check_membership(&simulation.particles.predicted);
    }

    #[test]
    fn unilateral_constraint_ignores_sparse_regions() {
        let cols = 11;
        let rows = 7;
        let mut params = test_params();
        params.rest_density = 0.0073;
        let positions = lattice(params.domain_min() + vec2f(100., 50.), 12., cols, rows);
        let centre = (rows / 2) * cols + cols / 2;

        let mut bilateral = FluidSimulation::from_positions(params, positions.clone()).unwrap();
        bilateral.compute_lambdas();
        assert!(bilateral.lambdas()[centre] > 0.);

        params.unilateral_density_constraint = true;
        let mut unilateral = FluidSimulation::from_positions(params, positions).unwrap();
        unilateral.compute_lambdas();
        assert!(unilateral.lambdas().iter().all(|lambda| *lambda == 0.));
    }

    #[test]
    fn interaction_pulls_particle_towards_pointer() {
        let params = test_params();
        let start = vec2f(540., 400.);

        let mut pulled = FluidSimulation::from_positions(params, vec![start]).unwrap();
        pulled.set_interaction_input(start + vec2f(30., 0.), 100.);
        let mut free = FluidSimulation::from_positions(params, vec![start]).unwrap();

        for _ in 0..5 {
            pulled.single_step();
            free.single_step();
        }

        assert!(pulled.positions()[0].x > start.x + 1.);
        assert!((free.positions()[0].x - start.x).abs() < 1e-3);
        // the pull partly replaces gravity
        assert!(pulled.positions()[0].y > free.positions()[0].y);
    }

    fn velocity_update_params(viscosity: FT, vorticity_epsilon: FT) -> SimulationParams {
        SimulationParams {
            gravity: 0.,
            constraint_iterations: 0,
            viscosity,
            vorticity_epsilon,
            ..test_params()
        }
    }

    /// Two particles side by side, moving vertically in opposite directions.
    fn shearing_pair(viscosity: FT) -> FluidSimulation {
        let params = velocity_update_params(viscosity, 0.);
        let mut simulation = FluidSimulation::from_positions(params, vec![vec2f(540., 360.), vec2f(548., 360.)]).unwrap();
        simulation.particles.velocity[0] = vec2f(0., 5.);
        simulation.particles.velocity[1] = vec2f(0., -5.);
        simulation
    }

    #[test]
    fn viscosity_reduces_relative_velocity() {
        let mut inviscid = shearing_pair(0.);
        let mut viscous = shearing_pair(100.);
        inviscid.single_step();
        viscous.single_step();

        let relative = |simulation: &FluidSimulation| simulation.velocities()[0].y - simulation.velocities()[1].y;
        assert_ft_approx_eq(relative(&inviscid), 10., 1e-2, || "relative velocity without viscosity".to_string());
        assert!(relative(&viscous) < 9.5, "relative velocity {}", relative(&viscous));
        // no overshoot: the pair still shears in the same direction
        assert!(viscous.velocities()[0].y > 0. && viscous.velocities()[1].y < 0.);
        // symmetric exchange keeps the momentum
        assert!((viscous.velocities()[0] + viscous.velocities()[1]).norm() < 1e-3);
        assert!(viscous.velocities()[0].x.abs() < 1e-3);
    }

    const RING_CENTRE: [FT; 2] = [540., 360.];

    /// Centre particle plus eight particles on a circle of radius 8, in rigid rotation with `omega`.
    fn rotating_ring(vorticity_epsilon: FT, omega: FT) -> FluidSimulation {
        let centre = vec2f(RING_CENTRE[0], RING_CENTRE[1]);
        let mut positions = vec![centre];
        positions.extend((0..8).map(|k| {
            let angle = k as FT * crate::floating_type_mod::PI / 4.;
            centre + vec2f(angle.cos(), angle.sin()) * 8.
        }));

        let params = velocity_update_params(0., vorticity_epsilon);
        let mut simulation = FluidSimulation::from_positions(params, positions).unwrap();
        for i in 0..simulation.num_particles() {
            let r = simulation.particles.position[i] - centre;
            simulation.particles.velocity[i] = vec2f(-r.y, r.x) * omega;
        }
        simulation
    }

    #[test]
    fn curl_follows_rotation_direction() {
        for omega in [1., -1.] {
            let mut simulation = rotating_ring(0., omega);
            simulation.single_step();

            let curl = &simulation.particles.curl;
            for (i, c) in curl.iter().enumerate() {
                assert!(c * omega > 0., "omega {}: curl[{}] = {}", omega, i, c);
            }
            // the centre sees the rotation from all sides
            assert!(curl[0].abs() > curl[1].abs());
        }
    }

    #[test]
    fn vorticity_confinement_spins_up_rotation() {
        let centre = vec2f(RING_CENTRE[0], RING_CENTRE[1]);
        let initial = rotating_ring(0., 1.);
        let initial_positions = initial.positions().to_vec();
        let initial_velocities = initial.velocities().to_vec();

        let mut unconfined = rotating_ring(0., 1.);
        let mut confined = rotating_ring(100., 1.);
        unconfined.single_step();
        confined.single_step();

        for i in 0..initial_positions.len() {
            assert!(
                (unconfined.velocities()[i] - initial_velocities[i]).norm() < 1e-2,
                "velocity of particle {} changed without confinement",
                i
            );
        }

        for i in 1..initial_positions.len() {
            let r = initial_positions[i] - centre;
            let tangent = vec2f(-r.y, r.x).normalize();
            let gained = confined.velocities()[i].dot(&tangent) - unconfined.velocities()[i].dot(&tangent);
            assert!(gained > 0.05, "particle {} gained {} tangential speed", i, gained);
        }
    }

    #[test]
    fn interaction_handle_is_shared() {
        let simulation = FluidSimulation::from_positions(test_params(), vec![vec2f(500., 300.)]).unwrap();
        let handle = simulation.interaction_input();
        handle.set(vec2f(1., 2.), -10.);
        let sample = simulation.interaction_input().snapshot();
        assert_eq!(sample.point, vec2f(1., 2.));
        assert_eq!(sample.strength, -10.);
    }

    #[test]
    fn statistics_cover_all_phases() {
        let params = SimulationParams {
            num_particles: 200,
            constraint_iterations: 3,
            ..test_params()
        };
        let mut simulation = FluidSimulation::new(params).unwrap();
        for _ in 0..3 {
            simulation.single_step();
        }

        for phase in ["force-integration", "lambda", "correction", "velocity-update", "simulation-step"] {
            assert_eq!(simulation.pcounters.get(phase).map(|c| c.len()), Some(3), "{}", phase);
        }
        assert_eq!(simulation.vcounters.get("density-error").map(|c| c.len()), Some(3));

        let report = write_statistics(&simulation);
        assert!(report.contains("particles: 200, frames: 3"));
        assert!(report.contains("lambda: avg:"));
        assert!(report.contains("max-lambda: min:"));
    }

    #[test]
    fn disabled_counters_stay_empty() {
        let params = SimulationParams {
            num_particles: 50,
            ..test_params()
        };
        let mut simulation = FluidSimulation::new(params).unwrap();
        simulation.pcounters = PerformanceCounters::new(false);
        simulation.vcounters = ValueCounters::new(false);
        simulation.single_step();

        assert_eq!(simulation.frame_number(), 1);
        assert!(simulation.pcounters.get("simulation-step").is_none());
        assert!(simulation.vcounters.get("density-error").is_none());
        assert!(simulation.vcounters.get("max-lambda").is_none());
    }

    #[test]
    fn seeded_placement_is_reproducible() {
        let params = SimulationParams {
            num_particles: 100,
            ..test_params()
        };
        let a = FluidSimulation::new(params).unwrap();
        let b = FluidSimulation::new(params).unwrap();
        assert_eq!(a.positions(), b.positions());

        let margin = params.spawn_margin;
        for p in a.positions() {
            assert!(p.x >= params.domain_min().x + margin && p.x <= params.domain_max().x - margin);
            assert!(p.y >= params.domain_min().y + margin && p.y <= params.domain_max().y - margin);
        }
    }
}
