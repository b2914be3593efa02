use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tracing::debug;

use crate::{Result, VisualizerError};

/// Future returned by [`AssetSource`] loads.
pub type AssetFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a>>;

/// Asynchronous provider of text resources such as shader templates.
///
/// Loads are awaited by the component that needs the result; a rejected load
/// is returned to that component rather than reported out of band.
pub trait AssetSource {
    fn load_text<'a>(&'a self, path: &'a str) -> AssetFuture<'a, String>;
}

/// In-memory registry of text assets keyed by path.
#[derive(Debug, Default, Clone)]
pub struct AssetStore {
    text_assets: HashMap<String, String>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self {
            text_assets: HashMap::new(),
        }
    }

    /// Store pre-populated with the assets bundled in the crate.
    pub fn with_builtin() -> Self {
        let mut store = Self::new();
        store.register_text(
            crate::DEFAULT_TEMPLATE_PATH,
            crate::render::DEFAULT_COMPOSITION_TEMPLATE,
        );
        store
    }

    pub fn register_text(&mut self, path: impl Into<String>, contents: impl Into<String>) {
        self.text_assets.insert(path.into(), contents.into());
    }

    pub fn text(&self, path: &str) -> Option<&str> {
        self.text_assets.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.text_assets.contains_key(path)
    }
}

impl AssetSource for AssetStore {
    fn load_text<'a>(&'a self, path: &'a str) -> AssetFuture<'a, String> {
        Box::pin(async move {
            self.text(path)
                .map(str::to_owned)
                .ok_or_else(|| VisualizerError::AssetLoad {
                    path: path.to_string(),
                    reason: "unknown asset".to_string(),
                })
        })
    }
}

/// Loads assets from a directory on disk.
#[derive(Debug, Clone)]
pub struct FileAssetSource {
    root: PathBuf,
}

impl FileAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

impl AssetSource for FileAssetSource {
    fn load_text<'a>(&'a self, path: &'a str) -> AssetFuture<'a, String> {
        Box::pin(async move {
            let full = self.root.join(path);
            debug!(path = %full.display(), "loading text asset");
            std::fs::read_to_string(&full).map_err(|err| VisualizerError::AssetLoad {
                path: full.display().to_string(),
                reason: err.to_string(),
            })
        })
    }
}
