//! Domain layer: flow definitions, run instances, events and the
//! repository seams the engine executes against.

/// Flow definitions and validation
pub mod flow;

/// Run instances and scheduled wakes
pub mod run;

/// Domain events emitted by run transitions
pub mod events;

/// Repository traits
pub mod repository;
