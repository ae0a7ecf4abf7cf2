use crate::error::{Error, ErrorCode};

/// Diagnostics record delivered to asynchronous completion callbacks.
///
/// Carries the stable code, the primary message, and optional supplemental
/// text attached at the failure site (the batch loader uses the supplement to
/// name the file, block and statement position of the first failure).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    code: ErrorCode,
    message: String,
    supplemental_text: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            supplemental_text: String::new(),
        }
    }

    /// Attach supplemental context, replacing any previous supplement.
    pub fn with_supplement(mut self, text: impl Into<String>) -> Self {
        self.supplemental_text = text.into();
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn supplemental_text(&self) -> &str {
        &self.supplemental_text
    }

    /// Rebuild an [`Error`] carrying this record's code and message.
    /// Synchronous wrappers around async entry points use this to surface
    /// callback diagnostics through `Result`.
    pub fn into_error(self) -> Error {
        let message = if self.supplemental_text.is_empty() {
            self.message
        } else {
            format!("{} ({})", self.message, self.supplemental_text)
        };
        match self.code {
            ErrorCode::IoError => Error::io_message(message),
            ErrorCode::InvalidArgument => Error::InvalidArgument(message),
            ErrorCode::InvalidState => Error::InvalidState(message),
            ErrorCode::NotFound => Error::NotFound(message),
            ErrorCode::TimeOut => Error::TimedOut(message),
            ErrorCode::StatementNotFoundException => Error::StatementNotFound(message),
            ErrorCode::TargetNotFoundException => Error::TargetNotFound(message),
            ErrorCode::TargetAlreadyExistsException => Error::TargetAlreadyExists(message),
            ErrorCode::InactiveTransactionException => Error::InactiveTransaction(message),
            ErrorCode::TransactionExceededLimitException => {
                Error::TransactionExceededLimit(message)
            }
            ErrorCode::SqlExecutionException => Error::SqlExecution(message),
            ErrorCode::SqlServiceException => Error::SqlService(message),
            ErrorCode::CcException => Error::CcError(message),
            ErrorCode::ConflictOnWritePreserveException => Error::ConflictOnWritePreserve(message),
            ErrorCode::InconsistentStatementException => Error::InconsistentStatement(message),
            ErrorCode::LoadFileException => Error::LoadFile(message),
            ErrorCode::UniqueConstraintViolationException => {
                Error::UniqueConstraintViolation(message)
            }
            ErrorCode::ValueEvaluationException => Error::ValueEvaluation(message),
            ErrorCode::ValueTooLongException => Error::ValueTooLong(message),
            ErrorCode::PermissionError => Error::PermissionError(message),
            ErrorCode::RestrictedOperationException => Error::RestrictedOperation(message),
            ErrorCode::IllegalOperation => Error::IllegalOperation(message),
            ErrorCode::Canceled => Error::Canceled(message),
            ErrorCode::Internal => Error::Internal(message),
        }
    }
}

impl From<&Error> for ErrorInfo {
    fn from(err: &Error) -> Self {
        ErrorInfo::new(err.code(), err.to_string())
    }
}

impl From<Error> for ErrorInfo {
    fn from(err: Error) -> Self {
        ErrorInfo::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supplement_round_trip() {
        let info = ErrorInfo::from(Error::LoadFile("open failed".into()))
            .with_supplement("file:a.arrow block:0 statement:3 status:io_error");
        assert_eq!(info.code(), ErrorCode::LoadFileException);
        assert!(info.message().contains("open failed"));
        assert!(info.supplemental_text().starts_with("file:a.arrow"));
    }
}
