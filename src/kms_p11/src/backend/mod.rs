pub mod algorithm;
pub mod attr;
pub mod handle;
pub mod mech;
pub mod object;
pub mod provider;
pub mod session;
pub mod slot;

pub use attr::{AttrValue, Attribute, AttributeMap, SearchTemplate};
pub use mech::{MechDigest, Mechanism, OaepParams, PssParams};
pub use object::{Object, ObjectSet};
pub use provider::Provider;
pub use session::Session;
pub use slot::Slot;
