pub mod session;

pub use session::{
    DocumentSession, DocumentSessionActor, DocumentSessionArguments, GuardDecision, SaveError,
    SessionMsg,
};
