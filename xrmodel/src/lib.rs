pub mod backend;
pub mod codec;
pub mod entity;
pub mod problem;
pub mod projector;
pub mod time;

pub use backend::{Backend, BackendConfig, BackendTable, Secret, default_backends, load_backends_from_json};
pub use problem::{Problem, ProblemKind};
pub use projector::{VersionDoc, project_version};
