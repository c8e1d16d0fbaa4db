use std::path::PathBuf;
use std::sync::Arc;

use url::Url;

use super::access_list::AccessList;
use crate::async_op::wait_for;
use crate::backend::{BackendObject, MediaBackend};
use crate::error::{PlaybackError, Result};

/// URL scheme naming a file through the access list.
pub const FILE_ACCESS_SCHEME: &str = "file-access";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    /// Local file granted through the access list.
    LocalFile { token: String, path: PathBuf },
    /// Adaptive-streaming manifest (HLS, DASH, Smooth Streaming).
    AdaptiveManifest,
    /// Any other URI, opened directly by the backend.
    Uri,
}

/// A playable media source.
///
/// Each resolve produces a fresh instance. A source instance feeds one consumer.
#[derive(Debug, Clone)]
pub struct MediaSource {
    uri: String,
    origin: SourceOrigin,
    object: BackendObject,
    adaptive: Option<BackendObject>,
}

impl MediaSource {
    pub fn new(
        uri: impl Into<String>,
        origin: SourceOrigin,
        object: BackendObject,
        adaptive: Option<BackendObject>,
    ) -> Self {
        Self {
            uri: uri.into(),
            origin,
            object,
            adaptive,
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn origin(&self) -> &SourceOrigin {
        &self.origin
    }

    pub fn object(&self) -> &BackendObject {
        &self.object
    }

    /// The negotiated adaptive source, kept alive as long as this source.
    pub fn adaptive(&self) -> Option<&BackendObject> {
        self.adaptive.as_ref()
    }

    pub fn is_adaptive(&self) -> bool {
        self.adaptive.is_some()
    }
}

/// Turns a URL into a backend media source.
pub struct MediaSourceResolver {
    backend: Arc<dyn MediaBackend>,
    access_list: Arc<dyn AccessList>,
}

impl MediaSourceResolver {
    pub fn new(backend: Arc<dyn MediaBackend>, access_list: Arc<dyn AccessList>) -> Self {
        Self {
            backend,
            access_list,
        }
    }

    /// Resolve `url`, blocking until any backend negotiation completes.
    pub fn resolve(&self, url: &str) -> Result<MediaSource> {
        let parsed = Url::parse(url).map_err(|e| PlaybackError::InvalidUrl(format!("{url}: {e}")))?;
        if parsed.scheme() == FILE_ACCESS_SCHEME {
            self.open_local(url, &parsed)
        } else {
            self.open_remote(url)
        }
    }

    fn open_local(&self, url: &str, parsed: &Url) -> Result<MediaSource> {
        let path = parsed.path();
        let token = path
            .strip_prefix('/')
            .or_else(|| path.strip_prefix('\\'))
            .unwrap_or(path);

        if !self.access_list.contains_item(token) {
            log::warn!("No access granted for '{token}'");
            return Err(PlaybackError::NotFound(token.to_string()));
        }

        let file = wait_for(self.access_list.get_file(token), "file permission lookup")??;
        let object = self.backend.source_from_file(&file)?;
        log::info!("Opened local file {}", file.path.display());
        Ok(MediaSource::new(
            url,
            SourceOrigin::LocalFile {
                token: file.token,
                path: file.path,
            },
            object,
            None,
        ))
    }

    fn open_remote(&self, url: &str) -> Result<MediaSource> {
        match wait_for(
            self.backend.create_adaptive_source(url),
            "adaptive manifest negotiation",
        )
        .map(|result| result.into_value())
        {
            Ok(Ok(adaptive)) => match self.backend.source_from_adaptive(&adaptive) {
                Ok(object) => {
                    log::info!("Opened adaptive stream {url}");
                    return Ok(MediaSource::new(
                        url,
                        SourceOrigin::AdaptiveManifest,
                        object,
                        Some(adaptive),
                    ));
                }
                Err(e) => log::debug!("Adaptive source unusable for {url}: {e}"),
            },
            Ok(Err(status)) => log::debug!("{url} is not an adaptive manifest: {status:?}"),
            Err(e) => log::debug!("Adaptive negotiation for {url} failed: {e}"),
        }

        let object = self.backend.source_from_uri(url)?;
        log::info!("Opened {url}");
        Ok(MediaSource::new(url, SourceOrigin::Uri, object, None))
    }
}
