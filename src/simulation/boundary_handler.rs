use crate::{floating_type_mod::FT, simulation_parameters::SimulationParams, V2};

/**
 * Axis-aligned box that contains all particles.
 *
 * Two mechanisms work together: a soft spring-like response that feeds into the
 * external force accumulator (and therefore acts from the next frame on), and a
 * hard clamp of the predicted position that guarantees containment.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainBoundary {
    min: V2,
    max: V2,
    penalty: FT,
}

impl DomainBoundary {
    pub fn new(min: V2, max: V2, penalty: FT) -> DomainBoundary {
        DomainBoundary { min, max, penalty }
    }

    pub fn from_params(simulation_params: &SimulationParams) -> DomainBoundary {
        DomainBoundary::new(
            simulation_params.domain_min(),
            simulation_params.domain_max(),
            simulation_params.collision_penalty,
        )
    }

    pub fn min(&self) -> V2 {
        self.min
    }

    pub fn max(&self) -> V2 {
        self.max
    }

    pub fn contains(&self, position: V2) -> bool {
        (0..2).all(|d| position[d] >= self.min[d] && position[d] <= self.max[d])
    }

    /// Push `external` back towards the domain proportionally to the penetration of `proposed`.
    pub fn collision_response(&self, proposed: V2, external: &mut V2) {
        for d in 0..2 {
            if proposed[d] <= self.min[d] {
                external[d] += self.penalty * (self.min[d] - proposed[d]);
            } else if proposed[d] >= self.max[d] {
                external[d] += self.penalty * (self.max[d] - proposed[d]);
            }
        }
    }

    /**
     * Clamp `predicted` onto the wall on every axis where `predicted + delta` would
     * leave the domain, and drop that axis of `delta`.
     */
    pub fn boundary_condition(&self, predicted: &mut V2, delta: &mut V2) {
        for d in 0..2 {
            let proposed = predicted[d] + delta[d];
            if proposed <= self.min[d] {
                delta[d] = 0.;
                predicted[d] = self.min[d];
            } else if proposed >= self.max[d] {
                delta[d] = 0.;
                predicted[d] = self.max[d];
            }
        }
    }

    /// Soft response followed by the hard clamp; `predicted + delta` is inside afterwards.
    pub fn collision_handler(&self, predicted: &mut V2, external: &mut V2, delta: &mut V2) {
        self.collision_response(*predicted + *delta, external);
        self.boundary_condition(predicted, delta);
    }
}
