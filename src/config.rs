use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Resident collection limit used by [`PolicyConfig::backed`].
pub const DEFAULT_RESIDENCY_LIMIT: usize = 100_000;

/// Maximum number of collections a policy keeps in memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResidencyThreshold {
    /// Collections are never swapped out and no backing store is opened.
    #[default]
    Unbounded,
    Limit(NonZeroUsize),
}

impl ResidencyThreshold {
    pub fn limit(&self) -> Option<usize> {
        match self {
            Self::Unbounded => None,
            Self::Limit(limit) => Some(limit.get()),
        }
    }

    pub fn is_exceeded_by(&self, resident: usize) -> bool {
        self.limit().is_some_and(|limit| resident > limit)
    }
}

/// `0` disables swapping.
impl From<usize> for ResidencyThreshold {
    fn from(limit: usize) -> Self {
        NonZeroUsize::new(limit).map_or(Self::Unbounded, Self::Limit)
    }
}

/// Configuration of a [`CachePolicy`](crate::cache::CachePolicy).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PolicyConfig {
    // backing file, an anonymous temporary file is used when unset
    pub backing_path: Option<PathBuf>,
    pub residency_threshold: ResidencyThreshold,
}

impl PolicyConfig {
    /// Swapping to `path`, with [`DEFAULT_RESIDENCY_LIMIT`] resident collections.
    pub fn backed<P: AsRef<Path>>(path: P) -> Self {
        Self {
            backing_path: Some(path.as_ref().to_path_buf()),
            residency_threshold: ResidencyThreshold::from(DEFAULT_RESIDENCY_LIMIT),
        }
    }

    pub fn with_backing_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.backing_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_residency_threshold(mut self, threshold: impl Into<ResidencyThreshold>) -> Self {
        self.residency_threshold = threshold.into();
        self
    }

    pub fn is_swapping_enabled(&self) -> bool {
        self.residency_threshold != ResidencyThreshold::Unbounded
    }
}
