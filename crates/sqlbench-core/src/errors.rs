use thiserror::Error;

/// Configuration problems detected before any question is processed.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ConfigError(pub String);

/// What went wrong while talking to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationFault {
    Transport,
    Auth,
    Timeout,
    MalformedResponse,
    UnknownModel,
}

impl InvocationFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationFault::Transport => "transport",
            InvocationFault::Auth => "auth",
            InvocationFault::Timeout => "timeout",
            InvocationFault::MalformedResponse => "malformed_response",
            InvocationFault::UnknownModel => "unknown_model",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum BenchError {
    #[error("unknown schema '{schema_id}'{}", suggestion_suffix(.suggestion))]
    UnknownSchema {
        schema_id: String,
        suggestion: Option<String>,
    },

    #[error("schema introspection failed for '{schema_id}': {message}")]
    SchemaIntrospection { schema_id: String, message: String },

    #[error("model invocation failed for '{model_id}' ({}): {message}", .fault.as_str())]
    ModelInvocation {
        model_id: String,
        fault: InvocationFault,
        message: String,
    },

    #[error("backend connection failed for schema '{schema_id}': {message}")]
    BackendConnection { schema_id: String, message: String },

    #[error("statement execution failed: {message}")]
    StatementExecution { message: String },

    #[error("question deadline of {millis} ms exceeded")]
    DeadlineExceeded { millis: u64 },
}

fn suggestion_suffix(s: &Option<String>) -> String {
    match s {
        Some(name) => format!(" (did you mean '{}'?)", name),
        None => String::new(),
    }
}

impl BenchError {
    /// Stable identifier used in logs, reports and the run store.
    pub fn kind(&self) -> &'static str {
        match self {
            BenchError::UnknownSchema { .. } => "unknown_schema",
            BenchError::SchemaIntrospection { .. } => "schema_introspection",
            BenchError::ModelInvocation { .. } => "model_invocation",
            BenchError::BackendConnection { .. } => "backend_connection",
            BenchError::StatementExecution { .. } => "statement_execution",
            BenchError::DeadlineExceeded { .. } => "deadline_exceeded",
        }
    }

    pub fn invocation(model_id: &str, fault: InvocationFault, message: impl Into<String>) -> Self {
        BenchError::ModelInvocation {
            model_id: model_id.to_string(),
            fault,
            message: message.into(),
        }
    }

    pub fn connection(schema_id: &str, message: impl Into<String>) -> Self {
        BenchError::BackendConnection {
            schema_id: schema_id.to_string(),
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BenchError::StatementExecution {
            message: message.into(),
        }
    }

    /// An unrecognised model id can never succeed on retry.
    pub fn is_config_fatal(&self) -> bool {
        matches!(
            self,
            BenchError::ModelInvocation {
                fault: InvocationFault::UnknownModel,
                ..
            }
        )
    }
}
