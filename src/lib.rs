//! Recorder/tagger core for a streaming-music client (§2 SYSTEM OVERVIEW).
//!
//! This crate has no concept of playback, a UI, or a command dispatcher: it
//! is the collection of pure/blocking components a host player drives
//! per-song through [`recorder::Recorder`] (§6 External Interfaces).

pub mod config;
pub mod error;
pub mod fetcher;
pub mod id3_writer;
pub mod mp4;
pub mod path_builder;
pub mod recorder;
pub mod scraper;
pub mod sink;

use std::path::Path;
use std::sync::OnceLock;

use fetcher::{Fetcher, ReqwestFetcher};

static FETCHER: OnceLock<ReqwestFetcher> = OnceLock::new();

/// Process-wide startup (§6 `init(settings)`): builds the shared Fetcher
/// handle and ensures the recording root exists. Call once before any
/// `Recorder::open`.
pub fn init(settings: &config::RecorderSettings) -> Result<(), error::RecorderError> {
    let fetcher = ReqwestFetcher::new(settings.proxy.as_deref())
        .map_err(error::RecorderError::from)?;
    let _ = FETCHER.set(fetcher);

    let root = Path::new(&settings.audio_file_dir);
    std::fs::create_dir_all(root).map_err(|e| {
        error::RecorderError::from(error::SinkError::Io {
            path: root.to_path_buf(),
            source: e,
        })
    })
}

/// Process-wide shutdown (§6 `finalize()`). The Fetcher handle has no
/// explicit teardown beyond being dropped; this exists as the symmetric
/// counterpart to `init` for hosts that expect a lifecycle pair.
pub fn finalize() {}

/// Accessor for the shared Fetcher handle initialized by [`init`] (§5
/// "exactly one process-wide resource").
pub fn shared_fetcher() -> &'static dyn Fetcher {
    FETCHER.get().expect("init() must run before shared_fetcher()")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_recording_root() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("music/root");
        let settings = config::RecorderSettings {
            audio_file_dir: nested.to_string_lossy().into_owned(),
            ..Default::default()
        };
        init(&settings).unwrap();
        assert!(nested.is_dir());
    }
}
