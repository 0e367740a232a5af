//! Error-to-status mapping for route handlers

use axum::http::StatusCode;
use std::fmt::Display;

use crate::analysis::AnalysisError;

/// Logs a failed result under a context tag and turns it into a status.
///
/// Server errors are logged at error level, client errors at warn.
pub trait LogErr<T, E> {
    fn log_500(self, context: &str) -> Result<T, StatusCode>;

    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode>;

    /// Pick the status from the error itself
    fn log_with(
        self,
        context: &str,
        status_of: impl FnOnce(&E) -> StatusCode,
    ) -> Result<T, StatusCode>;
}

impl<T, E: Display> LogErr<T, E> for Result<T, E> {
    fn log_500(self, context: &str) -> Result<T, StatusCode> {
        self.log_with(context, |_| StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode> {
        self.log_with(context, |_| status)
    }

    fn log_with(
        self,
        context: &str,
        status_of: impl FnOnce(&E) -> StatusCode,
    ) -> Result<T, StatusCode> {
        self.map_err(|e| {
            let status = status_of(&e);
            if status.is_server_error() {
                log::error!("{} ({}): {}", context, status.as_u16(), e);
            } else {
                log::warn!("{} ({}): {}", context, status.as_u16(), e);
            }
            status
        })
    }
}

/// HTTP status for a failed analysis run
pub fn analysis_status(err: &AnalysisError) -> StatusCode {
    match err {
        AnalysisError::NoInput => StatusCode::BAD_REQUEST,
        AnalysisError::Busy | AnalysisError::Cancelled => StatusCode::CONFLICT,
        AnalysisError::ClassifierUnavailable(_) => StatusCode::BAD_GATEWAY,
        AnalysisError::FrameExtraction(_) | AnalysisError::InsufficientSamples(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        AnalysisError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierError;
    use crate::frames::FrameExtractionError;
    use crate::verdict::InsufficientSamplesError;

    #[test]
    fn fixed_statuses() {
        let err: Result<(), &str> = Err("boom");
        assert_eq!(err.log_500("ctx"), Err(StatusCode::INTERNAL_SERVER_ERROR));

        let err: Result<(), &str> = Err("missing");
        assert_eq!(
            err.log_status("ctx", StatusCode::BAD_REQUEST),
            Err(StatusCode::BAD_REQUEST)
        );

        let ok: Result<u8, &str> = Ok(3);
        assert_eq!(ok.log_500("ctx"), Ok(3));
    }

    #[test]
    fn status_chosen_from_the_error() {
        let failed: Result<(), AnalysisError> = Err(AnalysisError::ClassifierUnavailable(
            ClassifierError::Decode("bad body".into()),
        ));
        assert_eq!(
            failed.log_with("[analyze] Analysis failed", analysis_status),
            Err(StatusCode::BAD_GATEWAY)
        );
    }

    #[test]
    fn analysis_errors_map_to_statuses() {
        assert_eq!(analysis_status(&AnalysisError::NoInput), StatusCode::BAD_REQUEST);
        assert_eq!(analysis_status(&AnalysisError::Busy), StatusCode::CONFLICT);
        assert_eq!(analysis_status(&AnalysisError::Cancelled), StatusCode::CONFLICT);
        assert_eq!(
            analysis_status(&AnalysisError::FrameExtraction(
                FrameExtractionError::Unreadable("no duration".into())
            )),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            analysis_status(&AnalysisError::InsufficientSamples(InsufficientSamplesError)),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            analysis_status(&AnalysisError::Task("panicked".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
