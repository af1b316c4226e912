//! Serialization shared by every persisted type. YAML and JSON work for all
//! of them; tabular types opt in to CSV.

use std::io::{Read, Write};

use crate::imports::*;

/// Data formats understood by [`SerdeAPI`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
    Csv,
}

impl Format {
    /// Parse a format name or file extension, with or without a leading dot
    pub fn parse(format: &str) -> anyhow::Result<Self> {
        match format.trim_start_matches('.').to_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            _ => bail!("Unsupported format {format:?}, must be one of yaml, json or csv"),
        }
    }
}

/// Extension of `filepath`, checked to name a known [`Format`]
fn file_format(filepath: &Path) -> anyhow::Result<&str> {
    let extension = filepath
        .extension()
        .and_then(OsStr::to_str)
        .with_context(|| format!("File extension could not be parsed: {filepath:?}"))?;
    Format::parse(extension)?;
    Ok(extension)
}

pub trait SerdeAPI: Serialize + for<'a> Deserialize<'a> {
    /// Validate and fill in derived state; runs after every read
    fn init(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Write as CSV rows. Unsupported unless the type overrides it.
    fn write_csv<W: Write>(&self, _wtr: W) -> anyhow::Result<()> {
        bail!("{} cannot be written as CSV", std::any::type_name::<Self>())
    }

    /// Read from CSV rows, before [`SerdeAPI::init`] runs. Unsupported unless
    /// the type overrides it.
    fn read_csv<R: Read>(_rdr: R) -> anyhow::Result<Self> {
        bail!("{} cannot be read from CSV", std::any::type_name::<Self>())
    }

    /// Serialize into `wtr` in the named `format`
    fn to_writer<W: Write>(&self, wtr: W, format: &str) -> anyhow::Result<()> {
        match Format::parse(format)? {
            Format::Yaml => serde_yaml::to_writer(wtr, self)?,
            Format::Json => serde_json::to_writer(wtr, self)?,
            Format::Csv => self.write_csv(wtr)?,
        }
        Ok(())
    }

    /// Deserialize from `rdr` in the named `format`, then run [`SerdeAPI::init`]
    fn from_reader<R: Read>(rdr: R, format: &str) -> anyhow::Result<Self> {
        let mut deserialized: Self = match Format::parse(format)? {
            Format::Yaml => serde_yaml::from_reader(rdr)?,
            Format::Json => serde_json::from_reader(rdr)?,
            Format::Csv => Self::read_csv(rdr)?,
        };
        deserialized.init()?;
        Ok(deserialized)
    }

    /// Write to `filepath`, in the format named by its extension. Creates the
    /// file or truncates an existing one.
    fn to_file<P: AsRef<Path>>(&self, filepath: P) -> anyhow::Result<()> {
        let filepath = filepath.as_ref();
        let format = file_format(filepath)?;
        let file = File::create(filepath)
            .with_context(|| format!("Could not create file: {filepath:?}"))?;
        self.to_writer(file, format)
    }

    /// Read from `filepath`, in the format named by its extension
    fn from_file<P: AsRef<Path>>(filepath: P) -> anyhow::Result<Self> {
        let filepath = filepath.as_ref();
        let format = file_format(filepath)?;
        let file = File::open(filepath).with_context(|| {
            if filepath.exists() {
                format!("Could not open file: {filepath:?}")
            } else {
                format!("File not found: {filepath:?}")
            }
        })?;
        Self::from_reader(file, format)
    }

    fn to_str(&self, format: &str) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        self.to_writer(&mut buf, format)?;
        Ok(String::from_utf8(buf)?)
    }

    fn from_str<S: AsRef<str>>(contents: S, format: &str) -> anyhow::Result<Self> {
        Self::from_reader(contents.as_ref().as_bytes(), format)
    }

    fn to_json(&self) -> anyhow::Result<String> {
        self.to_str("json")
    }

    fn from_json<S: AsRef<str>>(json_str: S) -> anyhow::Result<Self> {
        Self::from_str(json_str, "json")
    }

    fn to_yaml(&self) -> anyhow::Result<String> {
        self.to_str("yaml")
    }

    fn from_yaml<S: AsRef<str>>(yaml_str: S) -> anyhow::Result<Self> {
        Self::from_str(yaml_str, "yaml")
    }
}
