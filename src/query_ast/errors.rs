pub type Result<T, E = SlqError> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(thiserror::Error, Debug)]
pub enum SlqError {
    #[error("parse error: {0}")] Parse(String),
    #[error("structure error: {0}")] Structure(String),
    #[error("driver error: {context}: {source}")]
    Driver {
        context: String,
        #[source]
        source: BoxError,
    },
    #[error("render error: {0}")] Render(String),
    #[error("config error: {0}")] Config(String),
}

impl SlqError {
    /// Wraps a source-specific failure, keeping it reachable through `Error::source`.
    pub fn driver(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        SlqError::Driver { context: context.into(), source: source.into() }
    }

    pub fn is_structure(&self) -> bool { matches!(self, SlqError::Structure(_)) }
    pub fn is_parse(&self) -> bool { matches!(self, SlqError::Parse(_)) }
    pub fn is_driver(&self) -> bool { matches!(self, SlqError::Driver { .. }) }
    pub fn is_render(&self) -> bool { matches!(self, SlqError::Render(_)) }
}

impl From<sqlx::Error> for SlqError { fn from(e: sqlx::Error) -> Self { SlqError::driver("sql", e) } }
impl From<csv::Error> for SlqError { fn from(e: csv::Error) -> Self { SlqError::driver("csv", e) } }
impl From<std::io::Error> for SlqError { fn from(e: std::io::Error) -> Self { SlqError::driver("io", e) } }
impl From<serde_json::Error> for SlqError { fn from(e: serde_json::Error) -> Self { SlqError::Config(e.to_string()) } }
