use std::fmt;

#[derive(Debug)]
pub enum BalancerError {
    /// Cluster configuration rejected at construction time.
    Config(String),
}

impl fmt::Display for BalancerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalancerError::Config(msg) => write!(f, "config error: {}", msg),
        }
    }
}

impl std::error::Error for BalancerError {}
