//! Route path definitions shared between the server and its tests.
//!
//! The API group is mounted both at the root and under the version prefix,
//! so the paths here are root-relative. A known limitation inherited from
//! the routing layer: paths must not contain the `+` character.

pub mod v1 {
    pub const PREFIX: &str = "/v1";

    pub const TOPICS: &str = "/topics";
    pub const TOPIC: &str = "/topics/{topic}";
    pub const TASKS: &str = "/topics/{topic}/tasks";
    pub const TASK: &str = "/topics/{topic}/tasks/{id}";
    pub const PROMISES: &str = "/topics/{topic}/promises";
    pub const PROMISE: &str = "/topics/{topic}/promises/{id}";

    pub const LIVEZ: &str = "/livez";
    pub const HEALTHZ: &str = "/healthz";
    pub const READYZ: &str = "/readyz";
    pub const METRICS: &str = "/metrics";
}
