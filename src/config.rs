use serde::{Deserialize, Serialize};

/// Container format the player has negotiated for one song (§3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerFormat {
    Mp3,
    Mp3Hi,
    Aac,
}

impl ContainerFormat {
    /// File extension used by [`crate::path_builder::render`] (§4.1).
    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Aac => "m4a",
            ContainerFormat::Mp3 | ContainerFormat::Mp3Hi => "mp3",
        }
    }

    pub fn is_mp4(self) -> bool {
        matches!(self, ContainerFormat::Aac)
    }
}

/// Immutable per-song context supplied by the player (§3).
#[derive(Clone, Debug)]
pub struct SongContext {
    pub artist: String,
    pub album: String,
    pub title: String,
    pub format: ContainerFormat,
    pub album_detail_url: Option<String>,
    pub album_explorer_url: Option<String>,
}

/// Metadata populated best-effort during `open` (§3). Every field is independently optional.
#[derive(Clone, Debug, Default)]
pub struct DerivedMetadata {
    /// 0 means unknown.
    pub year: u16,
    /// 0 means unknown.
    pub track: u16,
    /// 0 means unknown.
    pub disc: u16,
    pub cover_url: Option<String>,
}

/// Settings consumed from the host (§6). Parsing a config file into this
/// struct is the host's job; the core only ever reads the fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecorderSettings {
    /// Recording root. Every rendered path is relative to this directory.
    pub audio_file_dir: String,
    /// Path template consumed by `PathBuilder::render` (§4.1).
    pub audio_file_name: String,
    pub use_spaces: bool,
    pub embed_cover: bool,
    pub proxy: Option<String>,
    pub control_proxy: Option<String>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            audio_file_dir: String::from("."),
            audio_file_name: String::from("%artist/%album/%02track-%title"),
            use_spaces: false,
            embed_cover: true,
            proxy: None,
            control_proxy: None,
        }
    }
}
