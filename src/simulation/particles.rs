use crate::{floating_type_mod::FT, V2};
use nalgebra::zero;

macro_rules! decl_particle_vec {
    (pub struct $struct_name:ident { $(pub $field_name:ident: Vec<$field_type:ty> | $default_value:expr),*$(,)?  }) => {
        /// Structure-of-arrays particle storage; every field has one entry per particle.
        pub struct $struct_name {
            $(
                pub $field_name : Vec<$field_type>,
            )*
        }

        impl $struct_name {
            pub fn default(len: usize) -> Self {
                Self {
                    $(
                        $field_name: (0..len).map(|_| $default_value).collect::<Vec<$field_type>>(),
                    )*
                }
            }
        }
    }
}

decl_particle_vec! {
    pub struct ParticleVec {
        pub position: Vec<V2> | zero(),
        pub velocity: Vec<V2> | zero(),

        // scratch, only valid during a frame
        pub predicted: Vec<V2> | zero(),

        // decays from frame to frame, collects wall responses
        pub external: Vec<V2> | zero(),

        // scratch of the constraint solve
        pub lambda: Vec<FT> | 0.,
        pub density: Vec<FT> | 0.,
        pub delta: Vec<V2> | zero(),

        // scratch of the velocity update
        pub curl: Vec<FT> | 0.,
        pub velocity_temp: Vec<V2> | zero(),
    }
}

impl ParticleVec {
    pub fn with_positions(positions: Vec<V2>) -> Self {
        let mut particles = ParticleVec::default(positions.len());
        particles.predicted = positions.clone();
        particles.position = positions;
        particles
    }

    pub fn len(&self) -> usize {
        self.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }
}
