pub mod consumer;
pub mod qi;
pub mod router;
pub mod state;

pub use consumer::spawn_consumer;
pub use qi::run_qi;
pub use router::{Disposition, MessageRouter};
pub use state::{PipelineState, StateSnapshot};
