use anyhow::bail;
use std::collections::VecDeque;
use std::fmt::{Display, Formatter};

/// A position in meters
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Vector3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl Display for Vector3 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Hands out positions from a fixed list, in order
#[derive(Clone, Debug, Default)]
pub struct ListPositionAllocator {
    positions: VecDeque<Vector3>,
}

impl ListPositionAllocator {
    pub fn new(positions: impl IntoIterator<Item = Vector3>) -> Self {
        Self {
            positions: positions.into_iter().collect(),
        }
    }

    pub fn add(&mut self, position: Vector3) {
        self.positions.push_back(position);
    }

    pub fn next_position(&mut self) -> anyhow::Result<Vector3> {
        let Some(position) = self.positions.pop_front() else {
            bail!("position allocator ran out of positions");
        };

        Ok(position)
    }
}

/// A node that stays where it was put
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ConstantPositionModel {
    position: Vector3,
}

impl ConstantPositionModel {
    pub fn new(position: Vector3) -> Self {
        Self { position }
    }

    pub fn position(&self) -> Vector3 {
        self.position
    }

    /// Propagation delay towards another node at the speed of light
    pub fn propagation_delay(&self, other: &ConstantPositionModel) -> std::time::Duration {
        const SPEED_OF_LIGHT: f64 = 299_792_458.0;
        let seconds = self.position.distance(&other.position) / SPEED_OF_LIGHT;
        std::time::Duration::from_nanos((seconds * 1e9).round() as u64)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_list_allocator_hands_out_in_order() {
        let mut allocator =
            ListPositionAllocator::new([Vector3::new(0.0, 0.0, 0.0), Vector3::new(10.0, 0.0, 0.0)]);
        allocator.add(Vector3::new(-10.0, 0.0, 0.0));

        assert_eq!(allocator.next_position().unwrap(), Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(allocator.next_position().unwrap(), Vector3::new(10.0, 0.0, 0.0));
        assert_eq!(allocator.next_position().unwrap(), Vector3::new(-10.0, 0.0, 0.0));
        assert!(allocator.next_position().is_err());
    }

    #[test]
    fn test_distance_and_delay() {
        let a = ConstantPositionModel::new(Vector3::new(0.0, 0.0, 0.0));
        let b = ConstantPositionModel::new(Vector3::new(3.0, 4.0, 0.0));
        assert_eq!(a.position().distance(&b.position()), 5.0);

        // 5 m at the speed of light is just under 17 ns
        assert_eq!(a.propagation_delay(&b).as_nanos(), 17);
    }
}
