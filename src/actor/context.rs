use std::any::Any;

/// Inheritable per-actor context: a logging tag plus whatever state the
/// embedder wants every descendant actor to see. An actor created during
/// event execution starts with its creator's context.
pub trait ActorContext: Any + Send + Sync {
    fn tag(&self) -> &str {
        ""
    }
}
