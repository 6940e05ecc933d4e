use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use std::fmt;

use crate::adapters::AdapterError;
use crate::blockchain::TransportError;

#[derive(Debug, Clone)]
pub enum AppError {
    NotFound(String),
    ValidationError(String),
    ProtocolNotSupported(String),
    BlockchainError(String),
    ExternalServiceError(String),
    ConfigError(String),
    InternalError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ProtocolNotSupported(msg) => write!(f, "Protocol not supported: {}", msg),
            AppError::BlockchainError(msg) => write!(f, "Blockchain error: {}", msg),
            AppError::ExternalServiceError(msg) => write!(f, "External service error: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ValidationError(_) | AppError::ProtocolNotSupported(_) => StatusCode::BAD_REQUEST,
            AppError::BlockchainError(_) | AppError::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            AppError::ConfigError(_) | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<AdapterError> for AppError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::MarketNotFound(id) => AppError::NotFound(format!("market {}", id)),
            AdapterError::UnsupportedProtocol(protocol) => AppError::ProtocolNotSupported(protocol),
            AdapterError::UnsupportedAction { .. }
            | AdapterError::UnsupportedChain(_)
            | AdapterError::InvalidData(_)
            | AdapterError::InvalidAmount(_) => {
                AppError::ValidationError(err.to_string())
            }
            AdapterError::ContractError(_) | AdapterError::RpcError(_) | AdapterError::Timeout(_) => {
                AppError::BlockchainError(err.to_string())
            }
            AdapterError::CalculationError(msg) => AppError::InternalError(msg),
        }
    }
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        AppError::BlockchainError(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalServiceError(format!("HTTP request error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalError(format!("JSON serialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionKind, Protocol};

    #[test]
    fn test_adapter_errors_map_to_statuses() {
        let not_found: AppError = AdapterError::MarketNotFound("aave_v3:1:0x00".to_string()).into();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let unsupported: AppError = AdapterError::UnsupportedProtocol("spark".to_string()).into();
        assert_eq!(unsupported.status(), StatusCode::BAD_REQUEST);

        let action: AppError = AdapterError::UnsupportedAction {
            protocol: Protocol::CompoundV3,
            action: ActionKind::EnableCollateral,
            market_id: "compound_v3:1:0x01:0x02".to_string(),
        }
        .into();
        assert_eq!(action.status(), StatusCode::BAD_REQUEST);

        let amount: AppError = AdapterError::InvalidAmount("no position to withdraw".to_string()).into();
        assert_eq!(amount.status(), StatusCode::BAD_REQUEST);

        let rpc: AppError = AdapterError::RpcError("connection reset".to_string()).into();
        assert_eq!(rpc.status(), StatusCode::BAD_GATEWAY);
    }
}
