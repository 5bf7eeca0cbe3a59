use thiserror::Error;

#[derive(Debug, Error)]
pub enum BedlamError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, BedlamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_category_and_detail() {
        let err = BedlamError::Config("missing endpoint".to_string());
        assert_eq!(format!("{err}"), "configuration error: missing endpoint");

        let err = BedlamError::Validation("cardId `x`".to_string());
        assert!(format!("{err}").starts_with("validation error"));
    }
}
