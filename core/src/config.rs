use std::path::PathBuf;

/// Whether committed snapshots are written to the local document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentPersistence {
    #[default]
    SaveAll,
    None,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the conversation document and related state,
    /// `~/.colloquy` by default.
    pub home: PathBuf,
    pub persistence: DocumentPersistence,
    /// Model whose profile prices token counts for the store.
    pub model: String,
}

pub const DEFAULT_MODEL: &str = "gpt-4o";

impl Config {
    pub fn load_default() -> std::io::Result<Self> {
        let home = match std::env::var_os("COLLOQUY_HOME") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .ok_or_else(|| std::io::Error::other("could not resolve home directory"))?
                .join(".colloquy"),
        };
        Ok(Self {
            home,
            persistence: DocumentPersistence::SaveAll,
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            persistence: DocumentPersistence::SaveAll,
            model: DEFAULT_MODEL.to_string(),
        }
    }
}
