//! The value triad framework: Profile, Pile, Criteria.
//!
//! Every value kind the gate can screen implements the same three-part
//! contract. A *profile* is the ephemeral fingerprint of one observation. A
//! *pile* accumulates profiles across a population of requests. *Criteria*
//! are the learned-or-configured boundary a profile is judged against.
//!
//! All operations are pure, non-blocking, deterministic transforms. Dispatch
//! is static: the schema layer composes the concrete types per node, there is
//! no runtime type inspection.

pub mod count;
pub mod flags;
pub mod ip_set;
pub mod key_val;
pub mod limit;
pub mod set;
pub mod simple_val;
pub mod structured;

pub use count::{CountCriteria, CountPile, CountProfile};
pub use flags::{AsciiFlagsCriteria, AsciiFlagsPile, AsciiFlagsProfile};
pub use flags::{FlagSliceCriteria, FlagSlicePile, FlagSliceProfile};
pub use ip_set::{IpSetCriteria, IpSetPile, IpSetProfile};
pub use key_val::{KeyValCriteria, KeyValPile, KeyValProfile};
pub use limit::{LimitCriteria, LimitPile, LimitProfile};
pub use set::{SetCriteria, SetPile, SetProfile};
pub use simple_val::{SimpleValCriteria, SimpleValPile, SimpleValProfile, SimpleValScanner};
pub use structured::{StructuredCriteria, StructuredKind, StructuredPile, StructuredProfile};

use crate::decision::Decision;

/// Accumulator for a population of profiles of one value kind.
///
/// `add` and `merge` must be commutative and associative so that concurrent
/// sessions can fold piles in any interleaving without changing what is later
/// learned. `clear` releases any lazily built dedup index along with the data.
pub trait Pile: Default + Clone {
    type Profile;

    fn add(&mut self, profile: &Self::Profile);
    fn merge(&mut self, other: Self);
    fn clear(&mut self);
}

/// Boundary for one value kind.
///
/// `learn` is destructive: it discards prior state and rebuilds the boundary
/// from the pile. `fuse` unions another boundary into this one. `decide` is
/// read-only and side-effect-free; it returns `None` when the profile is
/// inside the boundary.
pub trait Criteria: Default + Clone {
    type Profile;
    type Pile;

    fn learn(&mut self, pile: &Self::Pile);
    fn fuse(&mut self, other: &Self);
    fn decide(&self, profile: &Self::Profile) -> Option<Decision>;
}
