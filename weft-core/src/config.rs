use serde::{Deserialize, Serialize};

/// Knobs that tune a session's dispatch behaviour.
///
/// All fields carry defaults so hosts can adopt individual settings without
/// supplying a full configuration payload.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Capacity of the shared output channel. Producers await capacity when
    /// the consumer falls behind; a larger buffer trades memory for slack
    /// under bursty fan-out.
    pub output_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            output_capacity: 256,
        }
    }
}
