use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A collection setting failed validation or a log filter did not parse.
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cannot install logging: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, Error>;
