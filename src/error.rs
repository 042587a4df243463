use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conversion failed: {0}")]
    Conversion(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ConvertError>;

impl From<zip::result::ZipError> for ConvertError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => ConvertError::Storage(io),
            other => ConvertError::Storage(std::io::Error::new(std::io::ErrorKind::Other, other)),
        }
    }
}

impl From<crate::tdms::TdmsError> for ConvertError {
    fn from(err: crate::tdms::TdmsError) -> Self {
        ConvertError::Conversion(err.to_string())
    }
}
