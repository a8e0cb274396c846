use thiserror::Error;

pub mod codes;

pub use codes::{describe_error_code, ErrorCode};

/// Errors raised while normalizing, combining or materializing node states
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Configuration {
        code: u16,
        message: String,
        node: Option<String>,
    },

    #[error("[E{code:04}] Reference error: {message}")]
    Reference {
        code: u16,
        message: String,
        upstream: String,
    },

    #[error("[E{code:04}] Shape mismatch error: {message}")]
    ShapeMismatch { code: u16, message: String },

    #[error("[E{code:04}] Order error: {message}")]
    Order {
        code: u16,
        message: String,
        field: Option<String>,
    },

    #[error("[E{code:04}] Structure error: {message}")]
    Structure { code: u16, message: String },

    #[error("[E{code:04}] Input error: {message}")]
    Input {
        code: u16,
        message: String,
        field: Option<String>,
    },
}

impl StateError {
    /// Create a configuration error with default code
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::configuration_with_code(ErrorCode::CONFIG_GENERIC, message)
    }

    /// Create a configuration error with specific code
    pub fn configuration_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Configuration {
            code,
            message: message.into(),
            node: None,
        }
    }

    /// Create a reference error for an escape marker naming `upstream`
    pub fn reference(upstream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Reference {
            code: ErrorCode::REFERENCE_UNCONNECTED,
            message: message.into(),
            upstream: upstream.into(),
        }
    }

    pub fn shape_mismatch(code: u16, message: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            code,
            message: message.into(),
        }
    }

    /// Create an order error for a combiner field
    pub fn order(field: Option<String>, message: impl Into<String>) -> Self {
        Self::Order {
            code: ErrorCode::ORDER_COMBINE_INNER_FIRST,
            message: message.into(),
            field,
        }
    }

    pub fn structure(code: u16, message: impl Into<String>) -> Self {
        Self::Structure {
            code,
            message: message.into(),
        }
    }

    /// Create an input error for the field `field`
    pub fn input(code: u16, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Input {
            code,
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Attach the owning node to a configuration error
    pub fn with_node(mut self, name: impl Into<String>) -> Self {
        if let Self::Configuration { node, .. } = &mut self {
            if node.is_none() {
                *node = Some(name.into());
            }
        }
        self
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Configuration { code, .. }
            | Self::Reference { code, .. }
            | Self::ShapeMismatch { code, .. }
            | Self::Order { code, .. }
            | Self::Structure { code, .. }
            | Self::Input { code, .. } => *code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Configuration { message, .. }
            | Self::Reference { message, .. }
            | Self::ShapeMismatch { message, .. }
            | Self::Order { message, .. }
            | Self::Structure { message, .. }
            | Self::Input { message, .. } => message,
        }
    }

    /// Short category name, used by the CLI when reporting failures
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::Reference { .. } => "reference",
            Self::ShapeMismatch { .. } => "shape-mismatch",
            Self::Order { .. } => "order",
            Self::Structure { .. } => "structure",
            Self::Input { .. } => "input",
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration {
                message,
                node: Some(node),
                ..
            } => format!("Node '{}' is misconfigured: {}", node, message),
            Self::Configuration { message, .. } => format!("Configuration problem: {}", message),
            Self::Reference {
                message, upstream, ..
            } => format!("Unknown upstream '{}': {}", upstream, message),
            Self::Input {
                message,
                field: Some(field),
                ..
            } => format!("Bad value for '{}': {}", field, message),
            other => format!("{}: {}", describe_error_code(other.code()), other.message()),
        }
    }
}

/// Type alias for Results using StateError
pub type Result<T> = std::result::Result<T, StateError>;
