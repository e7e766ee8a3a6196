use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::{
        extension::ExtensionError, render::PipelineError, repos::RepoError,
        sampler::SamplerError,
    },
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Flattened error chain for logging at the binary boundary.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    pub fn from_message(source: &'static str, message: impl Into<String>) -> Self {
        Self {
            source,
            messages: vec![message.into()],
        }
    }

    /// Messages joined outermost first.
    pub fn chain(&self) -> String {
        self.messages.join(": ")
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Sampler(#[from] SamplerError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Extension(#[from] ExtensionError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Short description suitable for a terminal, without internals.
    pub fn presentation_message(&self) -> &'static str {
        match self {
            AppError::Domain(DomainError::Validation { .. })
            | AppError::Extension(ExtensionError::InvalidArgument { .. })
            | AppError::Extension(ExtensionError::InvalidCapabilityInvocation { .. }) => {
                "Request could not be processed"
            }
            AppError::Infra(InfraError::Database { .. })
            | AppError::Repo(_)
            | AppError::Sampler(SamplerError::StoreUnavailable(_))
            | AppError::Pipeline(PipelineError::StoreUnavailable(_)) => {
                "Node store temporarily unavailable"
            }
            AppError::Infra(InfraError::Migration(_)) => "Database migration failed",
            AppError::Infra(InfraError::Configuration { .. }) => "Service misconfigured",
            AppError::Infra(InfraError::Telemetry(_)) => "Logging subsystem could not start",
            AppError::Pipeline(PipelineError::Render(_)) => "Rendering failed",
            AppError::Extension(ExtensionError::Pipeline(_)) | AppError::Unexpected(_) => {
                "Unexpected error occurred"
            }
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_walks_the_source_chain() {
        let error = AppError::from(SamplerError::StoreUnavailable(RepoError::from_persistence(
            "connection reset",
        )));

        let report = error.report();
        assert_eq!(report.source, "application::error::AppError");
        assert_eq!(
            report.messages,
            vec![
                "node store unavailable: persistence error: connection reset".to_string(),
                "persistence error: connection reset".to_string(),
            ]
        );
        assert_eq!(error.presentation_message(), "Node store temporarily unavailable");
    }

    #[test]
    fn validation_errors_are_user_facing() {
        let error = AppError::from(DomainError::validation("count must be numeric"));
        assert_eq!(error.presentation_message(), "Request could not be processed");
        assert_eq!(
            ErrorReport::from_message("cli", "boom").chain(),
            "boom".to_string()
        );
    }
}
