pub mod appreciation;
pub mod content;
pub mod error;
pub mod executor;
pub mod llm;
pub mod model;
pub mod pairing;
pub mod patch;
pub mod policy;
pub mod profile;
pub mod prompt;
pub mod sandbox;
pub mod session;
pub mod store;

pub use error::{ApiError, ErrorKind, TutorError};
pub use pairing::{PairingEvent, PairingOutcome, TutorEngine};
pub use patch::PatchPipeline;
pub use session::SessionManager;
