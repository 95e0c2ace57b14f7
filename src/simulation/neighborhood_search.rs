use std::sync::{
    atomic::{AtomicU32, Ordering},
    Mutex, PoisonError,
};

use crate::{floating_type_mod::FT, V2};

pub type CellId = usize;

const NO_PARTICLE: u32 = u32::MAX;

/**
 * Uniform partition of the simulation domain into square cells.
 *
 * Cell ids are row-major: `id = y * cells_x + x`.
 */
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    origin: V2,
    cell_size: FT,
    cells_x: usize,
    cells_y: usize,
}

impl GridLayout {
    pub fn new(origin: V2, extent: V2, cell_size: FT) -> GridLayout {
        let cells_x = ((extent.x / cell_size).ceil() as usize).max(1);
        let cells_y = ((extent.y / cell_size).ceil() as usize).max(1);
        GridLayout {
            origin,
            cell_size,
            cells_x,
            cells_y,
        }
    }

    pub fn num_cells(&self) -> usize {
        self.cells_x * self.cells_y
    }

    pub fn cells_x(&self) -> usize {
        self.cells_x
    }

    pub fn cells_y(&self) -> usize {
        self.cells_y
    }

    pub fn cell_size(&self) -> FT {
        self.cell_size
    }

    /// Positions on the upper domain edge are mapped into the last row/column.
    pub fn cell_of(&self, position: V2) -> CellId {
        fn axis(value: FT, origin: FT, cell_size: FT, num_cells: usize) -> usize {
            let cell = ((value - origin) / cell_size).floor() as isize;
            cell.clamp(0, num_cells as isize - 1) as usize
        }

        let x = axis(position.x, self.origin.x, self.cell_size, self.cells_x);
        let y = axis(position.y, self.origin.y, self.cell_size, self.cells_y);
        y * self.cells_x + x
    }

    /**
     * The 3x3 block around `cell` (including `cell` itself).
     *
     * Shift `k` addresses row offset `k / 3 - 1` and column offset `k % 3 - 1`,
     * so index 4 is always `cell`. Offsets outside of the grid are `None`.
     */
    pub fn neighbor_cells(&self, cell: CellId) -> [Option<CellId>; 9] {
        let cx = (cell % self.cells_x) as isize;
        let cy = (cell / self.cells_x) as isize;

        let mut cells = [None; 9];
        for (shift, slot) in cells.iter_mut().enumerate() {
            let x = cx + (shift % 3) as isize - 1;
            let y = cy + (shift / 3) as isize - 1;
            if x < 0 || y < 0 || x >= self.cells_x as isize || y >= self.cells_y as isize {
                continue;
            }
            *slot = Some(y as usize * self.cells_x + x as usize);
        }
        cells
    }
}

struct BucketLink {
    next: AtomicU32,
    prev: AtomicU32,
}

impl BucketLink {
    fn unlinked() -> BucketLink {
        BucketLink {
            next: AtomicU32::new(NO_PARTICLE),
            prev: AtomicU32::new(NO_PARTICLE),
        }
    }
}

/**
 * Grid of intrusive doubly-linked particle lists.
 *
 * The list nodes live in one arena (`links[particle_id]`) and every cell stores
 * the id of its first particle. Moving a particle between cells is O(1).
 *
 * Mutations are serialized through `mutation_lock` and may come from any number
 * of workers at once. Traversals take no lock: they must only run in phases that
 * are separated from all mutations by a fork-join barrier, which is also what
 * makes relaxed atomic accesses sufficient.
 */
pub struct SpatialIndex {
    layout: GridLayout,
    heads: Vec<AtomicU32>,
    links: Vec<BucketLink>,
    mutation_lock: Mutex<()>,
}

impl SpatialIndex {
    pub fn new(layout: GridLayout, num_particles: usize) -> SpatialIndex {
        assert!(num_particles < NO_PARTICLE as usize, "too many particles for the spatial index");
        SpatialIndex {
            layout,
            heads: (0..layout.num_cells()).map(|_| AtomicU32::new(NO_PARTICLE)).collect(),
            links: (0..num_particles).map(|_| BucketLink::unlinked()).collect(),
            mutation_lock: Mutex::new(()),
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn num_particles(&self) -> usize {
        self.links.len()
    }

    pub fn cell_of(&self, position: V2) -> CellId {
        self.layout.cell_of(position)
    }

    pub fn neighbor_cells(&self, cell: CellId) -> [Option<CellId>; 9] {
        self.layout.neighbor_cells(cell)
    }

    /// Initial placement of every particle; previous memberships are discarded.
    pub fn place_all(&mut self, positions: &[V2]) {
        assert_eq!(positions.len(), self.links.len());

        for head in &mut self.heads {
            *head.get_mut() = NO_PARTICLE;
        }

        for (particle_id, position) in positions.iter().enumerate() {
            let cell = self.layout.cell_of(*position);
            let head = *self.heads[cell].get_mut();

            let link = &mut self.links[particle_id];
            *link.next.get_mut() = head;
            *link.prev.get_mut() = NO_PARTICLE;

            if head != NO_PARTICLE {
                *self.links[head as usize].prev.get_mut() = particle_id as u32;
            }
            *self.heads[cell].get_mut() = particle_id as u32;
        }
    }

    /**
     * Move `particle_id` from the list of `old_cell` to the front of the list of
     * `new_cell`. `old_cell` has to be the cell the particle is currently linked into.
     */
    pub fn update_membership(&self, particle_id: usize, old_cell: CellId, new_cell: CellId) {
        if old_cell == new_cell {
            return;
        }

        let _guard = self.mutation_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let link = &self.links[particle_id];
        let next = link.next.load(Ordering::Relaxed);
        let prev = link.prev.load(Ordering::Relaxed);

        if next != NO_PARTICLE {
            self.links[next as usize].prev.store(prev, Ordering::Relaxed);
        }
        if prev != NO_PARTICLE {
            self.links[prev as usize].next.store(next, Ordering::Relaxed);
        } else {
            debug_assert_eq!(self.heads[old_cell].load(Ordering::Relaxed), particle_id as u32);
            self.heads[old_cell].store(next, Ordering::Relaxed);
        }

        let head = self.heads[new_cell].load(Ordering::Relaxed);
        link.next.store(head, Ordering::Relaxed);
        link.prev.store(NO_PARTICLE, Ordering::Relaxed);
        if head != NO_PARTICLE {
            self.links[head as usize].prev.store(particle_id as u32, Ordering::Relaxed);
        }
        self.heads[new_cell].store(particle_id as u32, Ordering::Relaxed);
    }

    /// Particle ids linked into `cell`, most recently inserted first.
    pub fn bucket(&self, cell: CellId) -> impl Iterator<Item = usize> + '_ {
        let first = self.heads[cell].load(Ordering::Relaxed);
        std::iter::successors((first != NO_PARTICLE).then(|| first), move |&particle_id| {
            let next = self.links[particle_id as usize].next.load(Ordering::Relaxed);
            (next != NO_PARTICLE).then(|| next)
        })
        .map(|particle_id| particle_id as usize)
    }

    /// All particles in the 3x3 block around `cell` (the queried particle included).
    pub fn neighbors(&self, cell: CellId) -> impl Iterator<Item = usize> + '_ {
        self.layout
            .neighbor_cells(cell)
            .into_iter()
            .flatten()
            .flat_map(move |neighbor_cell| self.bucket(neighbor_cell))
    }

    /**
     * Slow consistency check: every particle is linked exactly once, into the cell
     * of its authoritative position. Panics with a description of the first violation.
     */
    pub fn check_membership(&self, positions: &[V2]) {
        assert_eq!(positions.len(), self.links.len());

        let mut seen = vec![false; positions.len()];
        for cell in 0..self.layout.num_cells() {
            let mut prev = NO_PARTICLE;
            for particle_id in self.bucket(cell) {
                assert!(
                    !seen[particle_id],
                    "spatial index bug: particle {} linked more than once",
                    particle_id
                );
                seen[particle_id] = true;

                let expected_cell = self.layout.cell_of(positions[particle_id]);
                assert_eq!(
                    expected_cell, cell,
                    "spatial index bug: particle {} at {:?} is linked into cell {} instead of {}",
                    particle_id, positions[particle_id], cell, expected_cell
                );

                assert_eq!(
                    self.links[particle_id].prev.load(Ordering::Relaxed),
                    prev,
                    "spatial index bug: broken back link at particle {}",
                    particle_id
                );
                prev = particle_id as u32;
            }
        }

        if let Some(missing) = seen.iter().position(|&s| !s) {
            panic!("spatial index bug: particle {} is not linked into any cell", missing);
        }
    }
}
