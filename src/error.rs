//! Error types for the renderer

use thiserror::Error;

use crate::options::RenderOption;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("invalid value for {option:?}: {reason}")]
    InvalidOption { option: RenderOption, reason: String },

    #[error("{option:?} expects a {expected} value")]
    OptionType {
        option: RenderOption,
        expected: &'static str,
    },

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("failed to start render thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RenderError>;
