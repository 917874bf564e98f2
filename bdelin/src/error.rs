use std::path::PathBuf;
use thiserror::Error;

/// Error taxonomy of the delineation pipeline.
///
/// `Input` and `Classifier` errors stop the stage they occur in.
/// `Geometry` and `Data` errors are raised per feature and are counted by
/// the caller instead of aborting a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Geometry,
    Data,
    Classifier,
}

#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error("file {0:?} does not exist")]
    InputNotFound(PathBuf),

    #[error("unable to read {path:?}: {message}")]
    InvalidInput { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("external command failed: {0}")]
    Command(String),

    #[error("degenerate geometry (feature {id:?}): {reason}")]
    Geometry { id: Option<i64>, reason: String },

    #[error("data error: {0}")]
    Data(String),

    #[error("classifier '{0}' not found")]
    ClassifierNotFound(String),

    #[error("classifier error: {0}")]
    Classifier(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    GeoJson(#[from] Box<geojson::Error>),

    #[error(transparent)]
    Tiff(#[from] tiff::TiffError),

    #[cfg(feature = "gdal")]
    #[error(transparent)]
    Gdal(#[from] gdal::errors::GdalError),

    #[error(transparent)]
    Geos(#[from] geos::Error),

    #[cfg(feature = "reqwest")]
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl From<geojson::Error> for BoundaryError {
    fn from(err: geojson::Error) -> Self {
        BoundaryError::GeoJson(Box::new(err))
    }
}

impl BoundaryError {
    pub fn geometry(id: Option<i64>, reason: impl Into<String>) -> Self {
        BoundaryError::Geometry {
            id,
            reason: reason.into(),
        }
    }

    pub fn invalid_input(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        BoundaryError::InvalidInput {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Where this error sits in the taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BoundaryError::Geometry { .. } | BoundaryError::Geos(_) => ErrorKind::Geometry,
            BoundaryError::Data(_) => ErrorKind::Data,
            BoundaryError::ClassifierNotFound(_) | BoundaryError::Classifier(_) => {
                ErrorKind::Classifier
            }
            _ => ErrorKind::Input,
        }
    }

    /// Per-feature errors never abort a batch.
    pub fn is_feature_level(&self) -> bool {
        matches!(self.kind(), ErrorKind::Geometry | ErrorKind::Data)
    }
}

pub type Result<T> = std::result::Result<T, BoundaryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            BoundaryError::ClassifierNotFound("x".into()).kind(),
            ErrorKind::Classifier
        );
        assert_eq!(BoundaryError::geometry(Some(3), "one point").kind(), ErrorKind::Geometry);
        assert_eq!(
            BoundaryError::InputNotFound(PathBuf::from("a.tif")).kind(),
            ErrorKind::Input
        );
        assert!(BoundaryError::Data("nan".into()).is_feature_level());
        assert!(!BoundaryError::Config("distance".into()).is_feature_level());
    }

    #[test]
    fn test_classifier_not_found_message() {
        let err = BoundaryError::ClassifierNotFound("missing-model".into());
        assert_eq!(err.to_string(), "classifier 'missing-model' not found");
    }
}
