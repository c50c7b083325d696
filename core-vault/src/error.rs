use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {id}")]
    NotFound { id: String },

    #[error("File too large: {size} bytes exceeds limit of {max} bytes")]
    FileTooLarge { size: u64, max: u64 },

    #[error("File type not allowed: .{0}")]
    ExtensionNotAllowed(String),

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Invalid file ID: {0}")]
    InvalidId(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;
