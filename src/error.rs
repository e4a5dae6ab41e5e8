use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Cache key or configuration variable involved (e.g., "session:u-42", "PREP_CACHE_TTL_SESSION")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected shape, underlying cause)
    pub details: Option<String>,
    /// Component that raised the error (e.g., "memory_store", "rate_limiter")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the cache layer.
///
/// `StoreUnavailable` and `Decode` never reach callers of
/// [`CacheService::get_or_compute`](crate::cache::CacheService::get_or_compute);
/// they are downgraded to a miss there. `RateLimitExceeded` is always surfaced.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Store unavailable: {message}{}", format_context(.context))]
    StoreUnavailable {
        message: String,
        context: ErrorContext,
    },

    #[error("Decode failure: {message}{}", format_context(.context))]
    Decode {
        message: String,
        context: ErrorContext,
    },

    #[error("Rate limit exceeded for {route} ({limit} per window), retry after {retry_after_secs}s")]
    RateLimitExceeded {
        route: String,
        identifier: String,
        limit: u32,
        retry_after_secs: u64,
    },

    #[error("Compute failure: {message}{}", format_context(.context))]
    Compute {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn store_unavailable(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::StoreUnavailable {
            message: msg.into(),
            context,
        }
    }

    pub fn decode(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Decode {
            message: msg.into(),
            context,
        }
    }

    pub fn compute(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Compute {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn validation(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::StoreUnavailable { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimitExceeded { .. })
    }

    /// HTTP status a request rejected with this error is reported as.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::RateLimitExceeded { .. } => 429,
            Error::Validation { .. } => 400,
            Error::StoreUnavailable { .. } => 503,
            Error::Decode { .. }
            | Error::Compute { .. }
            | Error::Configuration { .. }
            | Error::Serialization(_) => 500,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::StoreUnavailable { context, .. }
            | Error::Decode { context, .. }
            | Error::Compute { context, .. }
            | Error::Configuration { context, .. }
            | Error::Validation { context, .. } => Some(context),
            _ => None,
        }
    }
}
