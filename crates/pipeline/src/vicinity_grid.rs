//! Concurrent spatial hash of live actors.
//!
//! Maps actor ids to 10 m cells and back. Reads take the shared lock;
//! an actor changing cell upgrades to the exclusive lock, so concurrent
//! callers never lose writes.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use contracts::{ActorId, Location};

type CellKey = (i32, i32);

#[derive(Default)]
struct GridState {
    actor_to_cell: HashMap<ActorId, CellKey>,
    cell_to_actors: HashMap<CellKey, HashSet<ActorId>>,
}

pub struct VicinityGrid {
    cell_size: f32,
    state: RwLock<GridState>,
}

impl VicinityGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            state: RwLock::new(GridState::default()),
        }
    }

    fn cell_of(&self, location: Location) -> CellKey {
        (
            (location.x / self.cell_size).floor() as i32,
            (location.y / self.cell_size).floor() as i32,
        )
    }

    /// Record the actor's current cell, migrating it when it moved.
    /// Returns the cell it now occupies.
    pub fn update_grid(&self, actor_id: ActorId, location: Location) -> CellKey {
        let new_cell = self.cell_of(location);

        let known_cell = {
            let state = self.state.read().expect("vicinity grid lock poisoned");
            state.actor_to_cell.get(&actor_id).copied()
        };

        match known_cell {
            Some(old_cell) if old_cell == new_cell => {}
            Some(old_cell) => {
                let mut state = self.state.write().expect("vicinity grid lock poisoned");
                if let Some(occupants) = state.cell_to_actors.get_mut(&old_cell) {
                    occupants.remove(&actor_id);
                }
                state.actor_to_cell.insert(actor_id, new_cell);
                state
                    .cell_to_actors
                    .entry(new_cell)
                    .or_default()
                    .insert(actor_id);
            }
            None => {
                let mut state = self.state.write().expect("vicinity grid lock poisoned");
                state.actor_to_cell.insert(actor_id, new_cell);
                state
                    .cell_to_actors
                    .entry(new_cell)
                    .or_default()
                    .insert(actor_id);
            }
        }

        new_cell
    }

    /// Actor ids in the 3x3 neighbourhood of the actor's current cell,
    /// updating its cell first.
    pub fn actors_around(&self, actor_id: ActorId, location: Location) -> HashSet<ActorId> {
        let (cx, cy) = self.update_grid(actor_id, location);

        let state = self.state.read().expect("vicinity grid lock poisoned");
        let mut actors = HashSet::new();
        for i in -1..=1 {
            for j in -1..=1 {
                if let Some(occupants) = state.cell_to_actors.get(&(cx + i, cy + j)) {
                    actors.extend(occupants.iter().copied());
                }
            }
        }
        actors
    }

    /// Remove an actor from both maps.
    pub fn erase_actor(&self, actor_id: ActorId) {
        let mut state = self.state.write().expect("vicinity grid lock poisoned");
        if let Some(cell) = state.actor_to_cell.remove(&actor_id) {
            if let Some(occupants) = state.cell_to_actors.get_mut(&cell) {
                occupants.remove(&actor_id);
            }
        }
    }

    /// Number of tracked actors.
    pub fn len(&self) -> usize {
        self.state
            .read()
            .expect("vicinity grid lock poisoned")
            .actor_to_cell
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
