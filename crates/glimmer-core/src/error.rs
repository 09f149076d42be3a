#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Catalog resolution failed: {0}")]
    Catalog(String),

    #[error("Template invalid: {0}")]
    Template(String),

    #[error("Bind failed: {0}")]
    Bind(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
