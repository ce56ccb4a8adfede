//! Bitset fingerprints.
//!
//! `AsciiFlags` is a single 32-bit category mask learned by bitwise OR.
//! `FlagSlice` is the same idea element-wise over a growable list of masks,
//! used for sparse spaces such as Unicode blocks.

use serde::{Deserialize, Serialize};

use crate::decision::{Decision, DecisionBuilder};
use crate::profile::{Criteria, Pile};

/// One observed 32-bit category bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsciiFlagsProfile(pub u32);

/// OR-accumulated mask of every observed category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsciiFlagsPile {
    mask: u32,
}

impl Pile for AsciiFlagsPile {
    type Profile = AsciiFlagsProfile;

    fn add(&mut self, profile: &AsciiFlagsProfile) {
        self.mask |= profile.0;
    }

    fn merge(&mut self, other: Self) {
        self.mask |= other.mask;
    }

    fn clear(&mut self) {
        self.mask = 0;
    }
}

/// Allowed category mask; a profile must not set a bit absent from it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsciiFlagsCriteria {
    mask: u32,
}

impl Criteria for AsciiFlagsCriteria {
    type Profile = AsciiFlagsProfile;
    type Pile = AsciiFlagsPile;

    fn learn(&mut self, pile: &AsciiFlagsPile) {
        self.mask = pile.mask;
    }

    fn fuse(&mut self, other: &Self) {
        self.mask |= other.mask;
    }

    fn decide(&self, profile: &AsciiFlagsProfile) -> Option<Decision> {
        let unexpected = profile.0 & !self.mask;
        if unexpected == 0 {
            return None;
        }
        let mut builder = DecisionBuilder::new();
        builder.reason(
            unexpected.count_ones(),
            format!("unexpected category flags {unexpected:#010x}"),
        );
        builder.build()
    }
}

/// Variable-length list of 32-bit masks from one observation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSliceProfile(pub Vec<u32>);

impl FlagSliceProfile {
    /// Set a single bit, growing the slice as needed.
    pub fn set_bit(&mut self, bit: usize) {
        let index = bit / 32;
        if self.0.len() <= index {
            self.0.resize(index + 1, 0);
        }
        self.0[index] |= 1 << (bit % 32);
    }
}

/// Element-wise OR accumulator, auto-growing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSlicePile {
    masks: Vec<u32>,
}

impl Pile for FlagSlicePile {
    type Profile = FlagSliceProfile;

    fn add(&mut self, profile: &FlagSliceProfile) {
        if self.masks.len() < profile.0.len() {
            self.masks.resize(profile.0.len(), 0);
        }
        for (slot, bits) in self.masks.iter_mut().zip(profile.0.iter()) {
            *slot |= bits;
        }
    }

    fn merge(&mut self, other: Self) {
        if self.masks.len() < other.masks.len() {
            self.masks.resize(other.masks.len(), 0);
        }
        for (slot, bits) in self.masks.iter_mut().zip(other.masks.iter()) {
            *slot |= bits;
        }
    }

    fn clear(&mut self) {
        self.masks.clear();
    }
}

/// Allowed masks per element. Elements beyond the learned length must be
/// zero in the profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSliceCriteria {
    masks: Vec<u32>,
}

impl Criteria for FlagSliceCriteria {
    type Profile = FlagSliceProfile;
    type Pile = FlagSlicePile;

    fn learn(&mut self, pile: &FlagSlicePile) {
        self.masks = pile.masks.clone();
    }

    fn fuse(&mut self, other: &Self) {
        if self.masks.len() < other.masks.len() {
            self.masks.resize(other.masks.len(), 0);
        }
        for (slot, bits) in self.masks.iter_mut().zip(other.masks.iter()) {
            *slot |= bits;
        }
    }

    fn decide(&self, profile: &FlagSliceProfile) -> Option<Decision> {
        let mut builder = DecisionBuilder::new();
        for (index, bits) in profile.0.iter().enumerate() {
            let allowed = self.masks.get(index).copied().unwrap_or(0);
            let unexpected = bits & !allowed;
            if unexpected != 0 {
                builder.reason(
                    unexpected.count_ones(),
                    format!("unexpected flags {unexpected:#010x} at element {index}"),
                );
            }
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_flags_subset_passes() {
        let mut pile = AsciiFlagsPile::default();
        pile.add(&AsciiFlagsProfile(0b1010));
        let mut criteria = AsciiFlagsCriteria::default();
        criteria.learn(&pile);

        assert!(criteria.decide(&AsciiFlagsProfile(0b1000)).is_none());
        assert!(criteria.decide(&AsciiFlagsProfile(0b0100)).is_some());
    }

    #[test]
    fn test_flag_slice_excess_elements_must_be_zero() {
        let mut pile = FlagSlicePile::default();
        pile.add(&FlagSliceProfile(vec![0xff]));
        let mut criteria = FlagSliceCriteria::default();
        criteria.learn(&pile);

        // Longer profile with zero tail is fine.
        assert!(criteria
            .decide(&FlagSliceProfile(vec![0x0f, 0x00]))
            .is_none());
        // Nonzero beyond the learned length fails.
        assert!(criteria
            .decide(&FlagSliceProfile(vec![0x0f, 0x01]))
            .is_some());
    }

    #[test]
    fn test_flag_slice_set_bit_grows() {
        let mut profile = FlagSliceProfile::default();
        profile.set_bit(70);
        assert_eq!(profile.0.len(), 3);
        assert_eq!(profile.0[2], 1 << 6);
    }

    #[test]
    fn test_pile_merge_order_independent() {
        let mut a = FlagSlicePile::default();
        a.add(&FlagSliceProfile(vec![0b01]));
        let mut b = FlagSlicePile::default();
        b.add(&FlagSliceProfile(vec![0b10, 0b1]));

        let mut ab = a.clone();
        ab.merge(b.clone());
        let mut ba = b;
        ba.merge(a);
        assert_eq!(ab, ba);
    }
}
