//! The real-only extension of an entity.

use meridian_shared::{Address, GameTime, Vec3};

use crate::witness::Witness;

/// State only the authoritative copy of an entity carries.
#[derive(Debug)]
pub struct RealEntity {
    velocity: Vec3,
    top_speed: f32,
    sample_position: Vec3,
    sample_time: GameTime,
    /// Cells holding a ghost of this entity.
    haunts: Vec<Address>,
    pub(crate) witness: Option<Witness>,
}

impl RealEntity {
    /// Creates the extension for an entity standing at `position`.
    #[must_use]
    pub fn new(position: Vec3, now: GameTime) -> Self {
        Self {
            velocity: Vec3::ZERO,
            top_speed: 0.0,
            sample_position: position,
            sample_time: now,
            haunts: Vec::new(),
            witness: None,
        }
    }

    /// Restores the extension on the onload side.
    #[must_use]
    pub fn restored(
        position: Vec3,
        now: GameTime,
        velocity: Vec3,
        top_speed: f32,
        haunts: Vec<Address>,
    ) -> Self {
        Self {
            velocity,
            top_speed,
            sample_position: position,
            sample_time: now,
            haunts,
            witness: None,
        }
    }

    /// Sampled velocity in units per tick.
    #[inline]
    #[must_use]
    pub const fn velocity(&self) -> Vec3 {
        self.velocity
    }

    /// Top speed in units per tick, 0 if unlimited.
    #[inline]
    #[must_use]
    pub const fn top_speed(&self) -> f32 {
        self.top_speed
    }

    /// Sets the top speed.
    pub fn set_top_speed(&mut self, top_speed: f32) {
        self.top_speed = top_speed.max(0.0);
    }

    /// Re-samples the velocity once `period` ticks have passed since the
    /// last sample.
    ///
    /// # Returns
    ///
    /// True if a new sample was taken.
    pub fn sample_velocity(&mut self, position: Vec3, now: GameTime, period: GameTime) -> bool {
        let elapsed = now.saturating_sub(self.sample_time);
        if elapsed < period.max(1) {
            return false;
        }
        #[allow(clippy::cast_precision_loss)]
        let ticks = elapsed as f32;
        self.velocity = (position - self.sample_position) * (1.0 / ticks);
        self.sample_position = position;
        self.sample_time = now;
        true
    }

    /// Cells holding a ghost.
    #[inline]
    #[must_use]
    pub fn haunts(&self) -> &[Address] {
        &self.haunts
    }

    /// Returns true if `address` holds a ghost.
    #[must_use]
    pub fn has_haunt(&self, address: Address) -> bool {
        self.haunts.contains(&address)
    }

    /// Records a ghost. Returns false if it was already recorded.
    pub fn add_haunt(&mut self, address: Address) -> bool {
        if self.has_haunt(address) {
            return false;
        }
        self.haunts.push(address);
        true
    }

    /// Forgets a ghost. Returns false if it was not recorded.
    pub fn remove_haunt(&mut self, address: Address) -> bool {
        let before = self.haunts.len();
        self.haunts.retain(|h| *h != address);
        self.haunts.len() != before
    }

    /// The witness, if enabled.
    #[inline]
    #[must_use]
    pub const fn witness(&self) -> Option<&Witness> {
        self.witness.as_ref()
    }

    /// The witness, mutable.
    #[inline]
    pub fn witness_mut(&mut self) -> Option<&mut Witness> {
        self.witness.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_velocity_sampling() {
        let mut real = RealEntity::new(Vec3::ZERO, 100);
        assert!(!real.sample_velocity(Vec3::new(1.0, 0.0, 0.0), 102, 5));
        assert!(real.sample_velocity(Vec3::new(10.0, 0.0, 5.0), 105, 5));

        let velocity = real.velocity();
        assert!((velocity.x - 2.0).abs() < 1e-6);
        assert!((velocity.z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_haunts() {
        let mut real = RealEntity::new(Vec3::ZERO, 0);
        assert!(real.add_haunt(Address::local(1)));
        assert!(!real.add_haunt(Address::local(1)));
        assert!(real.has_haunt(Address::local(1)));
        assert!(real.remove_haunt(Address::local(1)));
        assert!(!real.remove_haunt(Address::local(1)));
        assert!(real.haunts().is_empty());
    }
}
