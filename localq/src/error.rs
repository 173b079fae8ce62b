use thiserror::Error;

/// Convenience alias for results carrying the typed [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Outcomes the engine needs to tell apart.
///
/// Storage and user handler code report plain [`anyhow::Error`]s; this
/// enum only names the cases that change control flow.
#[derive(Debug, Error)]
pub enum Error {
    /// Two or more pipelines were registered for the same command type.
    /// Raised once at startup; the runtime refuses to build.
    #[error("Handlers must not contain duplicates. Duplicates: {}", .0.join(","))]
    DuplicateHandlers(Vec<String>),

    /// The shutdown token fired. Never logged as a failure.
    #[error("operation cancelled")]
    Cancelled,

    /// A stored payload could not be decoded into its command type.
    #[error("failed to decode payload of {command_type}: {cause}")]
    Decode {
        /// Routing key of the record.
        command_type: String,
        /// Codec failure.
        cause: anyhow::Error,
    },

    /// Configuration rejected by `validate()`.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failure reported by the backing store.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl Error {
    /// Returns true when `err` represents cancellation rather than failure.
    pub fn is_cancellation(err: &anyhow::Error) -> bool {
        matches!(err.downcast_ref::<Error>(), Some(Error::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_message_lists_types_in_order() {
        let err = Error::DuplicateHandlers(vec!["b::Cmd".into(), "a::Cmd".into()]);
        assert_eq!(
            err.to_string(),
            "Handlers must not contain duplicates. Duplicates: b::Cmd,a::Cmd"
        );
    }

    #[test]
    fn cancellation_survives_anyhow_round_trip() {
        let err: anyhow::Error = Error::Cancelled.into();
        assert!(Error::is_cancellation(&err));
        assert!(!Error::is_cancellation(&anyhow::anyhow!("boom")));
    }

    #[test]
    fn decode_error_names_command_type() {
        let err = Error::Decode {
            command_type: "orders.Ship".into(),
            cause: anyhow::anyhow!("expected value"),
        };
        assert_eq!(
            err.to_string(),
            "failed to decode payload of orders.Ship: expected value"
        );
    }
}
