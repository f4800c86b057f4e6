/// Failure reported by a remote provider call or handle acquisition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyFault {
    /// The provider went away; retrying with a fresh handle may succeed.
    #[error("provider unavailable: {0}")]
    Transient(String),
    /// The provider answered with an error; retrying will not help.
    #[error("provider call failed: {0}")]
    Terminal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    #[error("Remote provider still unavailable after {attempts} attempt(s): {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("Remote provider call failed: {0}")]
    Terminal(String),
}
