use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown environment '{0}', expected one of: staging, production")]
    Unknown(String),
}

/// Deployment environment, selected by the stack name.
///
/// Exactly one environment is primary: it owns the container registry,
/// every other environment references the primary one's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Environment {
    Staging,
    Production,
}

impl Environment {
    pub const PRIMARY: Environment = Environment::Staging;

    pub fn is_primary(&self) -> bool {
        match self {
            Environment::Staging => true,
            Environment::Production => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            other => Err(Error::Unknown(other.to_string())),
        }
    }
}
