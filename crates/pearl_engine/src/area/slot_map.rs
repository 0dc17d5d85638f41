//! Bijective room ↔ cache slot mapping

/// Partial one-to-one map between room ids and texture cache slots
///
/// Both directions are kept in one structure so they cannot drift apart.
/// Each slot also carries a use stamp for least-recently-used eviction.
#[derive(Debug, Clone)]
pub struct RoomSlotMap {
    room_to_slot: Vec<Option<usize>>,
    slot_to_room: Vec<Option<usize>>,
    last_used: Vec<u64>,
    clock: u64,
}

impl RoomSlotMap {
    /// Empty map for `room_count` rooms and `slot_count` slots
    pub fn new(room_count: usize, slot_count: usize) -> Self {
        Self {
            room_to_slot: vec![None; room_count],
            slot_to_room: vec![None; slot_count],
            last_used: vec![0; slot_count],
            clock: 0,
        }
    }

    /// Number of cache slots
    pub fn slot_count(&self) -> usize {
        self.slot_to_room.len()
    }

    /// Number of rooms tracked
    pub fn room_count(&self) -> usize {
        self.room_to_slot.len()
    }

    /// Slot holding `room`, if any
    pub fn slot_of(&self, room: usize) -> Option<usize> {
        self.room_to_slot.get(room).copied().flatten()
    }

    /// Room held in `slot`, if any
    pub fn room_in(&self, slot: usize) -> Option<usize> {
        self.slot_to_room.get(slot).copied().flatten()
    }

    /// Map `room` to `slot`, dropping any previous occupant of the slot and
    /// any previous slot of the room. Returns the evicted room.
    pub fn insert(&mut self, room: usize, slot: usize) -> Option<usize> {
        if room >= self.room_count() || slot >= self.slot_count() {
            log::error!("Slot map insert out of range: room {} slot {}", room, slot);
            return None;
        }
        let evicted = self.remove_slot(slot);
        if let Some(old_slot) = self.room_to_slot[room] {
            self.slot_to_room[old_slot] = None;
        }
        self.room_to_slot[room] = Some(slot);
        self.slot_to_room[slot] = Some(room);
        self.touch(slot);
        self.debug_check();
        evicted
    }

    /// Clear `slot`, returning the room it held
    pub fn remove_slot(&mut self, slot: usize) -> Option<usize> {
        let room = self.slot_to_room.get_mut(slot)?.take()?;
        self.room_to_slot[room] = None;
        self.debug_check();
        Some(room)
    }

    /// Mark `slot` as just used
    pub fn touch(&mut self, slot: usize) {
        if let Some(stamp) = self.last_used.get_mut(slot) {
            self.clock += 1;
            *stamp = self.clock;
        }
    }

    /// Slot to fill next: an empty one if available, else the least recently
    /// used, never one of `pinned`
    pub fn eviction_candidate(&self, pinned: &[usize]) -> Option<usize> {
        let candidates = || (0..self.slot_count()).filter(|slot| !pinned.contains(slot));
        candidates()
            .find(|&slot| self.slot_to_room[slot].is_none())
            .or_else(|| candidates().min_by_key(|&slot| self.last_used[slot]))
    }

    /// Iterate `(slot, room)` pairs currently mapped
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.slot_to_room
            .iter()
            .enumerate()
            .filter_map(|(slot, room)| room.map(|room| (slot, room)))
    }

    /// Whether both directions agree
    pub fn is_consistent(&self) -> bool {
        let forward = self
            .room_to_slot
            .iter()
            .enumerate()
            .all(|(room, slot)| slot.map_or(true, |slot| self.slot_to_room.get(slot) == Some(&Some(room))));
        let backward = self
            .slot_to_room
            .iter()
            .enumerate()
            .all(|(slot, room)| room.map_or(true, |room| self.room_to_slot.get(room) == Some(&Some(slot))));
        forward && backward
    }

    fn debug_check(&self) {
        debug_assert!(self.is_consistent(), "room/slot map out of sync: {:?}", self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_evicts_previous_occupant() {
        let mut map = RoomSlotMap::new(4, 2);
        assert_eq!(map.insert(0, 0), None);
        assert_eq!(map.insert(2, 0), Some(0));
        assert_eq!(map.slot_of(0), None);
        assert_eq!(map.room_in(0), Some(2));
        assert!(map.is_consistent());
    }

    #[test]
    fn test_moving_room_frees_old_slot() {
        let mut map = RoomSlotMap::new(4, 3);
        map.insert(1, 0);
        map.insert(1, 2);
        assert_eq!(map.room_in(0), None);
        assert_eq!(map.slot_of(1), Some(2));
        assert_eq!(map.iter().count(), 1);
    }

    #[test]
    fn test_eviction_prefers_empty_then_oldest() {
        let mut map = RoomSlotMap::new(8, 3);
        map.insert(0, 0);
        assert_eq!(map.eviction_candidate(&[0]), Some(1));
        map.insert(1, 1);
        map.insert(2, 2);
        map.touch(0);
        assert_eq!(map.eviction_candidate(&[2]), Some(1));
        assert_eq!(map.eviction_candidate(&[0, 1, 2]), None);
    }

    #[test]
    fn test_out_of_range_insert_ignored() {
        let mut map = RoomSlotMap::new(2, 2);
        assert_eq!(map.insert(5, 0), None);
        assert_eq!(map.room_in(0), None);
    }
}
