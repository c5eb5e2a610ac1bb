//! Per-song state machine tying the other components together (§4.7, C7).

use std::path::{Path, PathBuf};

use log::{debug, error};

use crate::config::{ContainerFormat, DerivedMetadata, RecorderSettings, SongContext};
use crate::error::RecorderError;
use crate::fetcher::Fetcher;
use crate::id3_writer::{self, CoverImage, Id3Tag};
use crate::mp4::{self, Mp4Metadata};
use crate::path_builder;
use crate::scraper;
use crate::sink::{self, Handle};

/// Mirrors the §4.7 state diagram. `NotRecordingExist` and `NotRecording`
/// both imply `completed == true`; `completed` on `Recording` is always
/// `false` by construction, kept as an explicit field only on the states
/// that need it so `tag`/`close` don't have to special-case the variant.
#[derive(Debug)]
enum State {
    Recording { handle: Handle, meta: DerivedMetadata },
    NotRecordingExist,
    NotRecording,
    Deleting,
    Tagging,
}

/// One song's recording/tagging lifecycle. Not `Send`/`Sync`: the §5
/// concurrency model is single-threaded, one `Recorder` in flight at a time.
pub struct Recorder {
    song: SongContext,
    settings: RecorderSettings,
    output_path: PathBuf,
    state: State,
    completed: bool,
}

impl Recorder {
    /// Resolves the output path, best-effort scrapes year/cover/track/disc
    /// from the album pages, then creates the sink. `AlreadyExists` is not
    /// an error from the caller's point of view: it's a completed recorder
    /// that happens to already have its file (§4.7, §7 `FileAlreadyExists`).
    pub fn open(
        song: SongContext,
        settings: RecorderSettings,
        fetcher: &dyn Fetcher,
    ) -> Result<Recorder, RecorderError> {
        let mut meta = DerivedMetadata::default();
        scrape_album_detail(&song, fetcher, &mut meta);
        scrape_album_explorer(&song, fetcher, &mut meta);

        let output_path = path_builder::render(
            &song,
            &meta,
            &settings.audio_file_name,
            settings.use_spaces,
        );

        match sink::open_new(&output_path) {
            Ok(handle) => Ok(Recorder {
                song,
                settings,
                output_path,
                state: State::Recording { handle, meta },
                completed: false,
            }),
            Err(crate::error::SinkError::AlreadyExists(_)) => {
                debug!("recorder: {} already exists, not recording", output_path.display());
                Ok(Recorder {
                    song,
                    settings,
                    output_path,
                    state: State::NotRecordingExist,
                    completed: true,
                })
            }
            Err(e) => {
                error!("recorder: failed to open sink for {}: {e}", output_path.display());
                Ok(Recorder {
                    song,
                    settings,
                    output_path,
                    state: State::NotRecording,
                    completed: false,
                })
            }
        }
    }

    /// No-op once `completed`; otherwise forwards to the sink.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), RecorderError> {
        if self.completed {
            return Ok(());
        }
        match &mut self.state {
            State::Recording { handle, .. } => {
                sink::append(handle, bytes).map_err(|e| {
                    error!("recorder: write failed for {}: {e}", self.output_path.display());
                    RecorderError::from(e)
                })
            }
            _ => Ok(()),
        }
    }

    /// Closes the write handle, optionally fetches cover bytes, then
    /// dispatches to the container-specific writer. Always sets `completed`
    /// so neither a retry nor a `close` cleanup happens afterward (§4.7).
    pub fn tag(&mut self, fetcher: &dyn Fetcher) -> Result<(), RecorderError> {
        let (handle, mut meta) = match std::mem::replace(&mut self.state, State::Tagging) {
            State::Recording { handle, meta } => (handle, meta),
            other => {
                self.state = other;
                return Ok(());
            }
        };

        let path = handle.path().to_path_buf();
        if let Err(e) = sink::close(handle) {
            error!("recorder: failed to close sink for {}: {e}", path.display());
        }

        let cover = if self.settings.embed_cover {
            fetch_cover(&mut meta, fetcher)
        } else {
            None
        };

        let result = write_tag(&self.song, &meta, cover, &path);
        self.completed = true;
        if let Err(e) = &result {
            error!("recorder: tag write failed for {}: {e}", path.display());
        }
        result
    }

    /// Deletes the partial file (and now-empty parent directories) when the
    /// song was aborted before `tag` ran. A no-op if already completed.
    pub fn close(&mut self) -> Result<(), RecorderError> {
        if self.completed {
            return Ok(());
        }
        self.state = State::Deleting;
        let root = Path::new(&self.settings.audio_file_dir);
        let result = sink::delete_with_empty_parents(&self.output_path, root);
        self.completed = true;
        result.map_err(|e| {
            error!("recorder: cleanup failed for {}: {e}", self.output_path.display());
            RecorderError::from(e)
        })
    }

    /// One of the five §6 status strings.
    pub fn status_string(&self) -> &'static str {
        match self.state {
            State::Recording { .. } => "Recording",
            State::NotRecording => "Not Recording",
            State::NotRecordingExist => "Not Recording (file exists)",
            State::Deleting => "Deleting (partial file)",
            State::Tagging => "Tagging",
        }
    }
}

fn scrape_album_detail(song: &SongContext, fetcher: &dyn Fetcher, meta: &mut DerivedMetadata) {
    let Some(url) = &song.album_detail_url else {
        return;
    };
    let html = match fetcher.fetch(url) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            debug!("recorder: album detail fetch failed: {e}");
            return;
        }
    };

    match scraper::extract_year(&html) {
        Ok(year) => meta.year = year,
        Err(e) => debug!("recorder: year scrape miss: {e}"),
    }
    match scraper::extract_cover_url(&html) {
        Ok(url) => meta.cover_url = Some(url),
        Err(e) => debug!("recorder: cover url scrape miss: {e}"),
    }
}

fn scrape_album_explorer(song: &SongContext, fetcher: &dyn Fetcher, meta: &mut DerivedMetadata) {
    let Some(url) = &song.album_explorer_url else {
        return;
    };
    let xml = match fetcher.fetch(url) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            debug!("recorder: album explorer fetch failed: {e}");
            return;
        }
    };

    match scraper::extract_track_disc(&song.title, &xml) {
        Ok((track, disc)) => {
            meta.track = track;
            meta.disc = disc;
        }
        Err(e) => debug!("recorder: track/disc scrape miss: {e}"),
    }
}

fn fetch_cover(meta: &mut DerivedMetadata, fetcher: &dyn Fetcher) -> Option<Vec<u8>> {
    let url = meta.cover_url.take()?;
    match fetcher.fetch(&url) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            debug!("recorder: cover fetch failed: {e}");
            None
        }
    }
}

fn write_tag(
    song: &SongContext,
    meta: &DerivedMetadata,
    cover: Option<Vec<u8>>,
    path: &Path,
) -> Result<(), RecorderError> {
    match song.format {
        ContainerFormat::Mp3 | ContainerFormat::Mp3Hi => {
            let tag = Id3Tag {
                artist: song.artist.clone(),
                album: song.album.clone(),
                title: song.title.clone(),
                year: meta.year,
                track: meta.track,
                disc: meta.disc,
                cover: cover.map(|data| CoverImage { data }),
            };
            id3_writer::write_to(&tag, path).map_err(RecorderError::from)
        }
        ContainerFormat::Aac => {
            let fields = Mp4Metadata {
                artist: song.artist.clone(),
                album: song.album.clone(),
                title: song.title.clone(),
                year: meta.year,
                track: meta.track,
                disc: meta.disc,
                cover,
            };
            mp4::write_tag(path, &fields).map_err(RecorderError::from)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct MapFetcher(RefCell<std::collections::HashMap<String, Vec<u8>>>);
    impl MapFetcher {
        fn new() -> Self {
            MapFetcher(RefCell::new(std::collections::HashMap::new()))
        }
        fn set(&self, url: &str, body: &[u8]) {
            self.0.borrow_mut().insert(url.to_string(), body.to_vec());
        }
    }
    impl Fetcher for MapFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, crate::error::FetchError> {
            self.0
                .borrow()
                .get(url)
                .cloned()
                .ok_or(crate::error::FetchError::Status(404))
        }
    }

    fn settings(dir: &Path) -> RecorderSettings {
        RecorderSettings {
            audio_file_dir: dir.to_string_lossy().into_owned(),
            audio_file_name: "%artist/%album/%02track-%title".into(),
            use_spaces: false,
            embed_cover: true,
            proxy: None,
            control_proxy: None,
        }
    }

    fn song(format: ContainerFormat) -> SongContext {
        SongContext {
            artist: "Artist".into(),
            album: "Album".into(),
            title: "Title".into(),
            format,
            album_detail_url: None,
            album_explorer_url: None,
        }
    }

    #[test]
    fn open_write_tag_mp3_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = MapFetcher::new();
        let mut rec = Recorder::open(song(ContainerFormat::Mp3), settings(tmp.path()), &fetcher)
            .unwrap();
        assert_eq!(rec.status_string(), "Recording");

        rec.write_bytes(b"FAKE-MPEG").unwrap();
        rec.tag(&fetcher).unwrap();
        assert_eq!(rec.status_string(), "Tagging");

        let bytes = std::fs::read(&rec.output_path).unwrap();
        assert!(bytes.starts_with(b"ID3"));
        assert!(bytes.ends_with(b"FAKE-MPEG"));
    }

    #[test]
    fn open_twice_enters_not_recording_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = MapFetcher::new();
        let first = Recorder::open(song(ContainerFormat::Mp3), settings(tmp.path()), &fetcher)
            .unwrap();
        first.state_is_recording_for_test();

        let second = Recorder::open(song(ContainerFormat::Mp3), settings(tmp.path()), &fetcher)
            .unwrap();
        assert_eq!(second.status_string(), "Not Recording (file exists)");
    }

    #[test]
    fn write_bytes_is_noop_after_completed() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = MapFetcher::new();
        let mut rec = Recorder::open(song(ContainerFormat::Mp3), settings(tmp.path()), &fetcher)
            .unwrap();
        rec.tag(&fetcher).unwrap();
        // Completed: further writes must not touch the already-tagged file.
        rec.write_bytes(b"more").unwrap();
        let bytes = std::fs::read(&rec.output_path).unwrap();
        assert!(!bytes.ends_with(b"more"));
    }

    #[test]
    fn close_before_tag_deletes_partial_file() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = MapFetcher::new();
        let mut rec = Recorder::open(song(ContainerFormat::Mp3), settings(tmp.path()), &fetcher)
            .unwrap();
        let path = rec.output_path.clone();
        rec.write_bytes(b"partial").unwrap();
        rec.close().unwrap();
        assert!(!path.exists());
        assert_eq!(rec.status_string(), "Deleting (partial file)");
    }

    #[test]
    fn close_twice_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = MapFetcher::new();
        let mut rec = Recorder::open(song(ContainerFormat::Mp3), settings(tmp.path()), &fetcher)
            .unwrap();
        rec.close().unwrap();
        rec.close().unwrap();
    }

    #[test]
    fn cover_fetch_failure_downgrades_without_aborting_tag() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = MapFetcher::new();
        let mut song = song(ContainerFormat::Mp3);
        song.album_detail_url = Some("http://x/album".into());
        fetcher.set("http://x/album", br#"id = "album_art" "http://x/cover.jpg""#);

        let mut rec = Recorder::open(song, settings(tmp.path()), &fetcher).unwrap();
        rec.write_bytes(b"FAKE").unwrap();
        // Cover URL was scraped but never populated in the fetcher map, so the
        // fetch for it 404s; tagging must still succeed, just without a cover.
        rec.tag(&fetcher).unwrap();
        let bytes = std::fs::read(&rec.output_path).unwrap();
        assert!(bytes.starts_with(b"ID3"));
    }

    impl Recorder {
        fn state_is_recording_for_test(&self) {
            assert_eq!(self.status_string(), "Recording");
        }
    }
}
