use crate::app::constants::DEFAULT_ENTRY_NAME;
use crate::app::errors::{AppError, AppResult};
use crate::app::types::{FirebaseApp, FirebaseAppSettings, FirebaseOptions};

/// Validates `options` and wraps them in an app handle.
///
/// Apps are plain values; nothing is registered globally, so two calls with the same
/// name produce two independent handles.
pub fn initialize_app(
    options: FirebaseOptions,
    settings: Option<FirebaseAppSettings>,
) -> AppResult<FirebaseApp> {
    let settings = settings.unwrap_or_default();
    let name = normalize_name(&settings)?;
    if options.is_empty() {
        return Err(AppError::NoOptions);
    }
    log::debug!("initialised app '{name}'");
    Ok(FirebaseApp::new(name, options))
}

fn normalize_name(settings: &FirebaseAppSettings) -> AppResult<String> {
    match settings.name.as_deref() {
        None => Ok(DEFAULT_ENTRY_NAME.to_string()),
        Some(name) => {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                Err(AppError::BadAppName {
                    app_name: name.to_string(),
                })
            } else {
                Ok(trimmed.to_string())
            }
        }
    }
}
