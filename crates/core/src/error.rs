#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid configuration value for {key}: {value}")]
    InvalidConfig { key: &'static str, value: String },
}
