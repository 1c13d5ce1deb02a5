use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use crate::library::BoxedError;

/// Type erased, serializable error which retains the error chain information
///
/// Used to carry the reason for a failed delivery across a queue boundary, e.g. when a
/// message is forwarded to a dead-letter topic and later archived. The receiving side
/// does not know the original error types but can still render the full chain.
///
/// When the Error from which this is created contains another BlackboxError in its
/// source chain, it will be consumed and integrated into one flat list of causes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct BlackboxError {
    causes: Vec<String>,
}

impl BlackboxError {
    /// Creates a new instance from any error type
    ///
    /// Due to std providing default implementations for the `From<T> where T: T` trait,
    /// we can't both implement `Error` and `From<Error>` and have to decide on one.
    pub fn new<E: Error + 'static>(e: E) -> Self {
        (&e as &(dyn Error + 'static)).into()
    }

    /// Creates a new instance from a boxed error type
    pub fn from_boxed(e: BoxedError) -> Self {
        (e.as_ref() as &(dyn Error + 'static)).into()
    }

    /// Creates an instance with a single cause
    pub fn from_message<S: Into<String>>(message: S) -> Self {
        Self {
            causes: vec![message.into()],
        }
    }

    /// Ordered list of causes, outermost first
    pub fn causes(&self) -> &[String] {
        &self.causes
    }

    /// Single line rendering of the whole chain
    pub fn summary(&self) -> String {
        if self.causes.is_empty() {
            "Unknown error".into()
        } else {
            self.causes.join(": ")
        }
    }
}

impl Error for BlackboxError {}

impl Display for BlackboxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(first) = self.causes.first() {
            writeln!(f, "Error: {}", first)?;
        } else {
            writeln!(f, "Unknown error")?;
            return Ok(());
        }

        if self.causes.len() > 1 {
            writeln!(f, "\nCaused by:")?;
            for (index, cause) in self.causes.iter().skip(1).enumerate() {
                writeln!(f, "    {}: {}", index, cause)?;
            }
        }

        Ok(())
    }
}

impl From<&(dyn Error + 'static)> for BlackboxError {
    fn from(e: &(dyn Error + 'static)) -> Self {
        let mut source: Option<&(dyn Error + 'static)> = Some(e);
        let mut causes: Vec<String> = Vec::new();

        while let Some(error) = source {
            if let Some(blackbox_error) = error.downcast_ref::<BlackboxError>() {
                causes.extend(blackbox_error.causes.iter().cloned());
            } else {
                causes.push(error.to_string());
            }

            source = error.source();
        }

        Self { causes }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use thiserror::Error;

    #[derive(Error, Debug)]
    enum DeliveryTestError {
        #[error("endpoint rejected notification")]
        Rejected(#[from] BlackboxError),
    }

    #[test]
    fn handle_no_cause() {
        let error = BlackboxError::default();
        assert_eq!(error.to_string(), "Unknown error\n");
        assert_eq!(error.summary(), "Unknown error");
    }

    #[test]
    fn flatten_nested_chains() {
        let lower = BlackboxError {
            causes: vec!["status 500".into(), "connection reset".into()],
        };
        let middle = DeliveryTestError::from(lower);
        let upper = BlackboxError::from(&middle as &(dyn Error + 'static));

        assert_eq!(
            upper.causes(),
            &["endpoint rejected notification", "status 500", "connection reset"]
        );
        assert_eq!(
            upper.summary(),
            "endpoint rejected notification: status 500: connection reset"
        );
    }

    #[test]
    fn format_correctly() {
        let formatted = BlackboxError {
            causes: vec!["cause1".into(), "cause2".into(), "cause3".into()],
        }
        .to_string();

        assert_eq!(
            formatted,
            r#"Error: cause1

Caused by:
    0: cause2
    1: cause3
"#
        )
    }

    #[test]
    fn survive_serialization() {
        let error = BlackboxError::from_message("timed out");
        let json = serde_json::to_string(&error).unwrap();
        let parsed: BlackboxError = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, error);
    }
}
