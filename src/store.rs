use glam::Vec2;

use crate::ffi::BoidRecord;

/// Per-scenario extras carried alongside a boid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Payload {
    pub target: Vec2,
    pub group: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Boid {
    pub pos: Vec2,
    pub vel: Vec2,
    pub team: u32,
    pub payload: Option<Payload>,
}

impl Boid {
    pub fn new(pos: Vec2, vel: Vec2, team: u32) -> Self {
        Self { pos, vel, team, payload: None }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn to_record(&self, status: u32) -> BoidRecord {
        BoidRecord {
            pos: self.pos.to_array(),
            vel: self.vel.to_array(),
            team: self.team,
            status,
        }
    }
}

impl From<&BoidRecord> for Boid {
    fn from(r: &BoidRecord) -> Self {
        Boid::new(Vec2::from_array(r.pos), Vec2::from_array(r.vel), r.team)
    }
}

/// Ping-pong boid buffers.
///
/// The force pass reads [`EntityStore::front`] and writes the other buffer;
/// [`EntityStore::swap`] flips the roles once that pass has returned.
#[derive(Debug, Clone)]
pub struct EntityStore {
    buffers: [Vec<Boid>; 2],
    front: usize,
}

impl EntityStore {
    pub fn new(boids: Vec<Boid>) -> Self {
        let back = boids.clone();
        Self {
            buffers: [boids, back],
            front: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffers[0].len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn front(&self) -> &[Boid] {
        &self.buffers[self.front]
    }

    /// Current state (read) and the buffer the next state goes into (write).
    pub fn split(&mut self) -> (&[Boid], &mut [Boid]) {
        let [a, b] = &mut self.buffers;
        if self.front == 0 {
            (a.as_slice(), b.as_mut_slice())
        } else {
            (b.as_slice(), a.as_mut_slice())
        }
    }

    #[inline]
    pub fn swap(&mut self) {
        self.front ^= 1;
    }

    /// Which physical buffer is current; exposed for tests and diagnostics.
    #[inline]
    pub fn front_slot(&self) -> usize {
        self.front
    }
}
