//! The fixed HTTP-exchange schema tree.
//!
//! One document per exchange: client request, response, both bodies, the
//! timing envelope, and the pod's network peers. Each child implements the
//! value triad independently; the root delegates and aggregates Decisions
//! under the child's name.

pub mod body;
pub mod envelop;
pub mod pod;
pub mod req;
pub mod resp;
pub mod session_data;

pub use body::{BodyCriteria, BodyPile, BodyProfile};
pub use envelop::{EnvelopCriteria, EnvelopPile, EnvelopProfile};
pub use pod::{PodCriteria, PodPile, PodProfile};
pub use req::{ReqCriteria, ReqFacts, ReqPile, ReqProfile};
pub use resp::{RespCriteria, RespFacts, RespPile, RespProfile};
pub use session_data::{SessionDataCriteria, SessionDataPile, SessionDataProfile};
