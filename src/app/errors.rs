use std::fmt;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    BadAppName { app_name: String },
    NoOptions,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadAppName { app_name } => {
                write!(f, "Illegal App name: '{app_name}'")
            }
            AppError::NoOptions => write!(f, "Need to provide at least one Firebase option."),
        }
    }
}

impl std::error::Error for AppError {}
