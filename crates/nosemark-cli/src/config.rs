use nosemark_core::annotator::{DEFAULT_MARKER_COLOR, DEFAULT_OUTLINE_COLOR, DEFAULT_OUTLINE_THICKNESS};
use nosemark_core::{AnnotatorSettings, DetectParams, FaceOutline, Rgba, Rotation, Size};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const FACE_CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";
const NOSE_CASCADE_FILE: &str = "haarcascade_mcs_nose.xml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Overrides for one detection pass. Unset fields keep the pass defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PassConfig {
    pub scale_factor: Option<f64>,
    pub min_neighbors: Option<u32>,
    /// `[width, height]`.
    pub min_size: Option<[u32; 2]>,
    /// `[width, height]`; `[0, 0]` searches up to the image extent.
    pub max_size: Option<[u32; 2]>,
}

impl PassConfig {
    fn resolve(&self, mut params: DetectParams) -> DetectParams {
        if let Some(scale_factor) = self.scale_factor {
            params.scale_factor = scale_factor;
        }
        if let Some(min_neighbors) = self.min_neighbors {
            params.min_neighbors = min_neighbors;
        }
        if let Some([w, h]) = self.min_size {
            params.min_size = Size::new(w, h);
        }
        if let Some([w, h]) = self.max_size {
            params.max_size = (w != 0 && h != 0).then_some(Size::new(w, h));
        }
        params
    }
}

/// Annotator configuration: TOML file, then `NOSEMARK_*` environment
/// overrides, with every field defaulted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory holding the cascade files. Unset uses the XDG data dir.
    pub model_dir: Option<PathBuf>,
    /// Face cascade, relative to `model_dir` unless absolute.
    pub face_cascade: PathBuf,
    /// Nose cascade, relative to `model_dir` unless absolute.
    pub nose_cascade: PathBuf,
    /// Degrees, a multiple of 90.
    pub rotation: Rotation,
    pub face: PassConfig,
    pub nose: PassConfig,
    pub marker_color: Rgba,
    /// Draw a rectangle around each detected face.
    pub face_outline: bool,
    pub outline_color: Rgba,
    pub outline_thickness: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: None,
            face_cascade: PathBuf::from(FACE_CASCADE_FILE),
            nose_cascade: PathBuf::from(NOSE_CASCADE_FILE),
            rotation: Rotation::default(),
            face: PassConfig::default(),
            nose: PassConfig::default(),
            marker_color: DEFAULT_MARKER_COLOR,
            face_outline: false,
            outline_color: DEFAULT_OUTLINE_COLOR,
            outline_thickness: DEFAULT_OUTLINE_THICKNESS,
        }
    }
}

impl Config {
    /// Load from `path`, or from `NOSEMARK_CONFIG` when no path is given,
    /// or defaults when neither is set. Environment overrides apply last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("NOSEMARK_CONFIG").ok().map(PathBuf::from));

        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Read { path: path.clone(), source })?;
                tracing::debug!(path = %path.display(), "config file read");
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `NOSEMARK_MODEL_DIR`, `NOSEMARK_ROTATION` and
    /// `NOSEMARK_FACE_OUTLINE` from `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(dir) = lookup("NOSEMARK_MODEL_DIR") {
            self.model_dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = lookup("NOSEMARK_ROTATION") {
            let degrees: u32 = value.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("NOSEMARK_ROTATION is not a number: {value:?}"))
            })?;
            self.rotation = Rotation::try_from(degrees).map_err(ConfigError::Invalid)?;
        }
        if let Some(value) = lookup("NOSEMARK_FACE_OUTLINE") {
            self.face_outline = value != "0";
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.face_params()
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("face: {e}")))?;
        self.nose_params()
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("nose: {e}")))?;
        Ok(())
    }

    pub fn model_dir(&self) -> PathBuf {
        self.model_dir
            .clone()
            .unwrap_or_else(|| default_model_dir(|key| std::env::var(key).ok()))
    }

    pub fn face_cascade_path(&self) -> PathBuf {
        self.model_dir().join(&self.face_cascade)
    }

    pub fn nose_cascade_path(&self) -> PathBuf {
        self.model_dir().join(&self.nose_cascade)
    }

    pub fn face_params(&self) -> DetectParams {
        self.face.resolve(DetectParams::face_default())
    }

    pub fn nose_params(&self) -> DetectParams {
        self.nose.resolve(DetectParams::nose_default())
    }

    pub fn annotator_settings(&self) -> AnnotatorSettings {
        AnnotatorSettings {
            rotation: self.rotation,
            face: self.face_params(),
            nose: self.nose_params(),
            marker_color: self.marker_color,
            face_outline: self.face_outline.then(|| FaceOutline {
                color: self.outline_color,
                thickness: self.outline_thickness,
            }),
        }
    }
}

/// `$XDG_DATA_HOME/nosemark/cascades`, falling back to `~/.local/share`.
fn default_model_dir(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("nosemark")
        .join("cascades")
}
