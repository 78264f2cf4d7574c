pub mod circle;
pub mod profile;
pub mod timeline_event;

pub use circle::{Circle, CircleEntry, CircleId};
pub use profile::{Profile, ProfileDocument, ProfileStatus, Verification};
pub use timeline_event::ValidatedEvent;
