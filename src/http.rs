//! Wire shapes for the HTTP service that fronts a [RequestPipeline].
//!
//! No web framework lives here: these are the JSON bodies, the query parameters of `POST /remove`, and the mapping
//! from [ErrorKind] to status codes, so any server can stay a thin adapter.
use std::convert::TryFrom;

use serde::{Deserialize, Serialize};

use crate::*;

pub const PNG_CONTENT_TYPE: &str = "image/png";

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
}

impl HealthResponse {
    pub fn ok() -> HealthResponse {
        HealthResponse { ok: true }
    }
}

/// Body of `GET /models`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
    pub default: String,
}

impl ModelsResponse {
    pub fn from_catalog(catalog: &Catalog) -> ModelsResponse {
        ModelsResponse {
            models: catalog.iter().map(str::to_string).collect(),
            default: catalog.default_name().to_string(),
        }
    }
}

/// Body of any failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// Query string of `POST /remove`, as received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RemoveQuery {
    pub model: Option<String>,
    pub upscale: Option<u8>,
}

impl RemoveQuery {
    /// Check the upscale factor; a missing one takes the default.
    pub fn params(&self) -> Result<TransformParams, ErrorResponse> {
        let upscale = match self.upscale {
            Some(u) => Upscale::try_from(u).map_err(|detail| ErrorResponse { detail })?,
            None => Upscale::default(),
        };
        Ok(TransformParams { upscale })
    }
}

impl ErrorKind {
    pub fn status_code(self) -> u16 {
        if self.is_client_error() {
            400
        } else {
            500
        }
    }
}

impl<FE, TE> PipelineError<FE, TE>
where
    FE: std::error::Error + 'static,
    TE: std::error::Error + 'static,
{
    /// Status code and JSON body to answer with.
    pub fn to_response(&self) -> (u16, ErrorResponse) {
        (
            self.kind().status_code(),
            ErrorResponse {
                detail: self.to_string(),
            },
        )
    }
}

/// Name for the `Content-Disposition` header of a successful response.
pub fn output_filename(upload_name: Option<&str>) -> String {
    let stem = match upload_name.map(str::trim) {
        Some(n) if !n.is_empty() => n,
        _ => "output",
    };
    format!("{}.png", stem)
}

/// `Content-Disposition` header value for a successful response.
pub fn content_disposition(upload_name: Option<&str>) -> String {
    format!("inline; filename=\"{}\"", output_filename(upload_name))
}

/// Headers for a successful `POST /remove` response.
pub fn png_headers(upload_name: Option<&str>) -> [(&'static str, String); 2] {
    [
        ("Content-Type", PNG_CONTENT_TYPE.to_string()),
        ("Content-Disposition", content_disposition(upload_name)),
    ]
}
