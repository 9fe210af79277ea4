//! The per-request path: pick a session, run the transform, hand back bytes.
use std::convert::TryFrom;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::*;

/// How much to enlarge the output image.  1 means unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upscale(u8);

impl Upscale {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 4;

    pub fn factor(self) -> u8 {
        self.0
    }
}

impl Default for Upscale {
    fn default() -> Upscale {
        Upscale(2)
    }
}

impl TryFrom<u8> for Upscale {
    type Error = String;

    fn try_from(value: u8) -> Result<Upscale, String> {
        if (Upscale::MIN..=Upscale::MAX).contains(&value) {
            Ok(Upscale(value))
        } else {
            Err(format!(
                "upscale must be between {} and {}, got {}",
                Upscale::MIN,
                Upscale::MAX,
                value
            ))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformParams {
    pub upscale: Upscale,
}

/// Broad classes of failure, for deciding how to answer a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidName,
    InvalidInput,
    CreationFailed,
    TransformFailed,
}

impl ErrorKind {
    /// Whether the caller, rather than the service, is at fault.
    pub fn is_client_error(self) -> bool {
        matches!(self, ErrorKind::InvalidName | ErrorKind::InvalidInput)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError<FactoryError, TransformError> {
    #[error("{0}")]
    InvalidInput(String),
    #[error(transparent)]
    Session(#[from] SessionError<FactoryError>),
    #[error("Background removal failed with model '{name}': {source}")]
    TransformFailed {
        name: String,
        #[source]
        source: TransformError,
    },
}

impl<FE, TE> PipelineError<FE, TE> {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidInput(_) => ErrorKind::InvalidInput,
            PipelineError::Session(SessionError::InvalidName { .. }) => ErrorKind::InvalidName,
            PipelineError::Session(SessionError::CreationFailed { .. }) => {
                ErrorKind::CreationFailed
            }
            PipelineError::TransformFailed { .. } => ErrorKind::TransformFailed,
        }
    }
}

pub type PipelineResult<F, T> = Result<
    Vec<u8>,
    PipelineError<
        <F as SessionFactory>::Error,
        <T as Transform<<F as SessionFactory>::Handle>>::Error,
    >,
>;

/// Glue between a shared [SessionCache] and a [Transform].
///
/// Nothing here retries: failures go back to the caller as they happened, and any session created along the way stays
/// cached for next time.
pub struct RequestPipeline<F: SessionFactory, T> {
    cache: Arc<SessionCache<F>>,
    transform: T,
}

impl<F, T> RequestPipeline<F, T>
where
    F: SessionFactory,
    T: Transform<F::Handle, Params = TransformParams>,
{
    pub fn new(cache: Arc<SessionCache<F>>, transform: T) -> RequestPipeline<F, T> {
        RequestPipeline { cache, transform }
    }

    pub fn cache(&self) -> &Arc<SessionCache<F>> {
        &self.cache
    }

    /// Run the transform for one request.  `None` for the name means the catalog's default model.
    pub fn process(
        &self,
        name: Option<&str>,
        input: &[u8],
        params: &TransformParams,
    ) -> PipelineResult<F, T> {
        if input.is_empty() {
            return Err(PipelineError::InvalidInput("Empty upload".to_string()));
        }

        let name = name.unwrap_or_else(|| self.cache.catalog().default_name());
        let session = self.cache.get_or_create(name)?;

        debug!(
            model = name,
            bytes = input.len(),
            upscale = params.upscale.factor(),
            "Running transform"
        );
        self.transform.apply(&session, input, params).map_err(|source| {
            warn!(model = name, error = %source, "Transform failed");
            PipelineError::TransformFailed {
                name: name.to_string(),
                source,
            }
        })
    }
}
