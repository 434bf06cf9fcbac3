/// Immutable request-scoped caller identity, threaded as a parameter into
/// every mutating operation and recorded on each audit entry.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub actor_id: String,
    pub actor_name: String,
}

impl RequestContext {
    pub fn new(actor_id: impl Into<String>, actor_name: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            actor_name: actor_name.into(),
        }
    }

    /// Identity used for self-service flows and internal work where no
    /// authenticated caller exists yet.
    pub fn system() -> Self {
        Self::new("system", "system")
    }

    /// Re-scope to another identity for a nested call. Returns a new value;
    /// the original context is untouched.
    pub fn with_actor(&self, actor_id: impl Into<String>, actor_name: impl Into<String>) -> Self {
        Self::new(actor_id, actor_name)
    }
}
