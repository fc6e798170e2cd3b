//! Shared helpers for the MCP tools

use rmcp::ErrorData as McpError;

use crate::error::Error;

/// Create an internal error
pub fn internal_error(msg: impl Into<String>) -> McpError {
    McpError::internal_error(msg.into(), None)
}

/// Caller mistakes become invalid-params, everything else is internal
pub fn mcp_error(e: Error) -> McpError {
    match e {
        Error::EmptyLog | Error::InvalidInput(_) => {
            McpError::invalid_params(e.to_string(), None)
        }
        other => {
            tracing::error!("Tool failed: {}", other);
            internal_error(other.to_string())
        }
    }
}

/// Render grams the way the log displays them
pub fn format_grams(grams: f64) -> String {
    if grams >= 1000.0 {
        format!("{:.2} kg", grams / 1000.0)
    } else {
        format!("{:.1} g", grams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_grams() {
        assert_eq!(format_grams(152.34), "152.3 g");
        assert_eq!(format_grams(0.0), "0.0 g");
        assert_eq!(format_grams(1250.0), "1.25 kg");
    }

    #[test]
    fn test_mcp_error_kinds() {
        let err = mcp_error(Error::EmptyLog);
        assert_eq!(err.code, rmcp::model::ErrorCode::INVALID_PARAMS);

        let err = mcp_error(Error::Llm("down".to_string()));
        assert_eq!(err.code, rmcp::model::ErrorCode::INTERNAL_ERROR);
    }
}
