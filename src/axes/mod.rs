//! Axis algebra: typed metadata channels and their combine rules.
//!
//! Every message carries one value per axis. An axis value is either unset
//! ("no opinion") or a typed payload. Each axis defines how concurrent values
//! are aggregated and when two values are equal; `MessageAxis::local_value`
//! is the rule a derived feed uses to inherit its parent's axes while
//! applying local overrides.

mod axis;
mod value;

pub use axis::{AxisSet, MessageAxis};
pub use value::{AxisPayload, MessageAxisUpdate, MessageAxisValue};
