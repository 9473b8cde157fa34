use crate::chroma::Chroma;

/// Failure to obtain CPU-side resources for the frame pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("failed to allocate {len} byte staging buffer")]
    Buffer { len: usize },
    #[error("failed to wrap staging buffer into a picture")]
    Picture,
    #[error("failed to assemble picture pool")]
    Pool,
}

/// The graphics context could not be made current for this call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("graphics context lost")]
    Lost,
    #[error("graphics context unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error("context unavailable: {0}")]
    ContextUnavailable(#[from] ContextError),
    #[error("invalid video format: {0}")]
    InvalidFormat(String),
    #[error("chroma {0} has no description")]
    UnknownChroma(Chroma),
    #[error("picture does not fit the texture: {0}")]
    InvalidPicture(String),
    #[error("picture is not bound to a texture unit of this backend")]
    UnboundPicture,
    #[error("no textures exist yet, request the picture pool first")]
    NoTextures,
}

impl BackendError {
    pub(crate) fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }

    pub(crate) fn invalid_picture(msg: impl Into<String>) -> Self {
        Self::InvalidPicture(msg.into())
    }
}
