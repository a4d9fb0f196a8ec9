use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use berth_scheduler::SchedulerError;
use berth_sslcert::CertError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub code: String,
    pub request_id: String,
    pub retryable: bool,
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("https://berth.dev/problems/{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            instance: None,
            code,
            request_id: "unknown".to_string(),
            retryable: false,
        }
    }

    fn set_request_id(&mut self, request_id: impl Into<String>) {
        let request_id = request_id.into();
        self.request_id = request_id.clone();
        if self.instance.is_none() {
            self.instance = Some(request_id);
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
}

impl ApiError {
    fn with_status(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, code, message)
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::CONFLICT, code, message)
    }

    pub fn unprocessable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::UNPROCESSABLE_ENTITY, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    pub fn not_implemented(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::NOT_IMPLEMENTED, code, message)
    }

    pub fn bad_gateway(code: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::with_status(StatusCode::BAD_GATEWAY, code, message);
        err.problem.retryable = true;
        err
    }

    pub fn gateway_timeout(code: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::with_status(StatusCode::GATEWAY_TIMEOUT, code, message);
        err.problem.retryable = true;
        err
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.problem.set_request_id(request_id);
        self
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        let message = err.to_string();
        match err {
            SchedulerError::AppNotFound(_) => Self::not_found("app_not_found", message),
            SchedulerError::InstanceNotFound(_) => Self::not_found("instance_not_found", message),
            SchedulerError::InvalidApp(_) => Self::bad_request("invalid_app", message),
            SchedulerError::UnsupportedExposure(_) => Self::bad_request("unsupported_exposure", message),
            SchedulerError::ExitStatus(_) => Self::unprocessable("process_failed", message),
            SchedulerError::Deployment(_) => Self::unprocessable("deployment_failed", message),
            SchedulerError::Unsupported(_) => Self::not_implemented("unsupported_operation", message),
            SchedulerError::Infrastructure(_) => Self::bad_gateway("scheduler_unavailable", message),
            SchedulerError::Cancelled | SchedulerError::DeadlineExceeded => {
                Self::gateway_timeout("scheduler_timeout", message)
            }
            SchedulerError::Io(_) | SchedulerError::Serialization(_) => {
                Self::internal("internal_error", message)
            }
        }
    }
}

impl From<CertError> for ApiError {
    fn from(err: CertError) -> Self {
        let message = err.to_string();
        match err {
            CertError::NotFound(_) => Self::not_found("certificate_not_found", message),
            CertError::AlreadyExists(_) => Self::conflict("certificate_exists", message),
            CertError::InvalidCertificate(_) => Self::bad_request("invalid_certificate", message),
            CertError::Provider(_) => Self::bad_gateway("certificate_provider_error", message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}
