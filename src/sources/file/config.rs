// SPDX-License-Identifier: Apache-2.0

//! Configuration for the file source.
//!
//! The source is configured from a flat string map using the option names listed
//! below, so the CLI, embedding hosts and tests all share one validation path.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};
use url::Url;

use crate::sources::file::error::{Error, Result};
use crate::sources::file::framer::Framer;

pub const OPT_SOURCE_ID: &str = "source.id";
pub const OPT_URI: &str = "uri";
pub const OPT_MODE: &str = "mode";
pub const OPT_TAILING: &str = "tailing";
pub const OPT_ACTION_AFTER_PROCESS: &str = "action.after.process";
pub const OPT_MOVE_AFTER_PROCESS: &str = "move.after.process";
pub const OPT_BEGIN_REGEX: &str = "begin.regex";
pub const OPT_END_REGEX: &str = "end.regex";
pub const OPT_REGEX_INCLUSIVE: &str = "regex.inclusive";
pub const OPT_TAIL_POLL_INTERVAL_MS: &str = "tail.poll.interval.ms";
pub const OPT_DISCOVERY_INTERVAL_MS: &str = "discovery.interval.ms";
pub const OPT_READ_CHUNK_SIZE: &str = "read.chunk.size";
pub const OPT_MAX_RECORD_SIZE: &str = "max.record.size";

const KNOWN_OPTIONS: &[&str] = &[
    OPT_SOURCE_ID,
    OPT_URI,
    OPT_MODE,
    OPT_TAILING,
    OPT_ACTION_AFTER_PROCESS,
    OPT_MOVE_AFTER_PROCESS,
    OPT_BEGIN_REGEX,
    OPT_END_REGEX,
    OPT_REGEX_INCLUSIVE,
    OPT_TAIL_POLL_INTERVAL_MS,
    OPT_DISCOVERY_INTERVAL_MS,
    OPT_READ_CHUNK_SIZE,
    OPT_MAX_RECORD_SIZE,
];

/// Directory name used for consumed files when MOVE has no explicit target.
pub const DEFAULT_MOVE_DIR_NAME: &str = "read";

pub const DEFAULT_SOURCE_ID: &str = "file-source";

/// How file content is divided into records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// One record per newline-terminated line
    #[default]
    Line,
    /// Records bounded by begin/end regular expressions
    Regex,
    /// Whole file as a single text record
    TextFull,
    /// Whole file as a single binary record
    BinaryFull,
}

impl Mode {
    /// Full modes consume the entire file in one record and can never be tailed.
    pub fn is_full(&self) -> bool {
        matches!(self, Mode::TextFull | Mode::BinaryFull)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Line => "line",
            Mode::Regex => "regex",
            Mode::TextFull => "text.full",
            Mode::BinaryFull => "binary.full",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "line" => Ok(Mode::Line),
            "regex" => Ok(Mode::Regex),
            "text.full" => Ok(Mode::TextFull),
            "binary.full" => Ok(Mode::BinaryFull),
            _ => Err(format!(
                "Invalid mode '{}'. Valid options: line, regex, text.full, binary.full",
                s
            )),
        }
    }
}

/// What to do with a file once every record in it has been delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionAfterProcess {
    Delete,
    Move { target: PathBuf },
}

impl ActionAfterProcess {
    pub fn name(&self) -> &'static str {
        match self {
            ActionAfterProcess::Delete => "DELETE",
            ActionAfterProcess::Move { .. } => "MOVE",
        }
    }
}

/// Read granularity and record size cap of a file cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadLimits {
    pub chunk_size: usize,
    pub max_record_size: usize,
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            max_record_size: 1024 * 1024,
        }
    }
}

/// Configuration for a single file source instance
#[derive(Debug, Clone)]
pub struct FileSourceConfig {
    /// Name used in logs and error messages
    pub source_id: String,
    /// Directory being watched
    pub root: PathBuf,
    /// Record framing mode
    pub mode: Mode,
    /// Whether the first discovered file is tailed
    pub tailing: bool,
    /// Post-processing applied to fully consumed files
    pub action_after_process: Option<ActionAfterProcess>,
    /// Pattern that opens a record (regex mode)
    pub begin_regex: Option<String>,
    /// Pattern that closes a record (regex mode)
    pub end_regex: Option<String>,
    /// Keep the matched begin/end text inside emitted records
    pub regex_inclusive: bool,
    /// How often a tailed file is checked for new bytes
    pub tail_poll_interval: Duration,
    /// How often the directory is scanned
    pub discovery_interval: Duration,
    /// Bytes read from disk per fill of the cursor buffer
    pub read_chunk_size: usize,
    /// Longest line or regex record kept in memory. Longer records are cut.
    pub max_record_size: usize,
}

impl Default for FileSourceConfig {
    fn default() -> Self {
        Self {
            source_id: DEFAULT_SOURCE_ID.to_string(),
            root: PathBuf::new(),
            mode: Mode::Line,
            tailing: true,
            action_after_process: None,
            begin_regex: None,
            end_regex: None,
            regex_inclusive: false,
            tail_poll_interval: Duration::from_millis(1000),
            discovery_interval: Duration::from_millis(1000),
            read_chunk_size: 64 * 1024,
            max_record_size: 1024 * 1024,
        }
    }
}

impl FileSourceConfig {
    /// Build and validate a configuration from named options.
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self> {
        let source_id = options
            .get(OPT_SOURCE_ID)
            .cloned()
            .unwrap_or_else(|| DEFAULT_SOURCE_ID.to_string());
        let config_error = |msg: String| Error::Config(format!("source '{}': {}", source_id, msg));

        for key in options.keys() {
            if !KNOWN_OPTIONS.contains(&key.as_str()) {
                warn!(source_id = %source_id, option = %key, "Ignoring unrecognized option");
            }
        }

        let uri = options.get(OPT_URI).ok_or_else(|| {
            config_error(format!(
                "'{}' is a mandatory parameter and has not been provided",
                OPT_URI
            ))
        })?;
        let root = parse_uri(uri).map_err(config_error)?;

        let mode: Mode = options
            .get(OPT_MODE)
            .ok_or_else(|| {
                config_error(format!(
                    "'{}' is a mandatory parameter and has not been provided",
                    OPT_MODE
                ))
            })?
            .parse()
            .map_err(config_error)?;

        let tailing = match options.get(OPT_TAILING) {
            Some(v) => parse_bool(OPT_TAILING, v).map_err(config_error)?,
            None => !mode.is_full(),
        };

        let action_after_process = match options.get(OPT_ACTION_AFTER_PROCESS) {
            None => None,
            Some(v) => match v.to_uppercase().as_str() {
                "DELETE" => Some(ActionAfterProcess::Delete),
                "MOVE" => {
                    let target = match options.get(OPT_MOVE_AFTER_PROCESS) {
                        Some(t) => parse_uri(t).map_err(config_error)?,
                        None => default_move_target(&root).ok_or_else(|| {
                            config_error(format!(
                                "'{}' is mandatory when '{}' is MOVE and no default exists for {:?}",
                                OPT_MOVE_AFTER_PROCESS, OPT_ACTION_AFTER_PROCESS, root
                            ))
                        })?,
                    };
                    Some(ActionAfterProcess::Move { target })
                }
                other => {
                    return Err(config_error(format!(
                        "invalid value '{}' for '{}', expected DELETE or MOVE",
                        other, OPT_ACTION_AFTER_PROCESS
                    )));
                }
            },
        };

        if options.contains_key(OPT_MOVE_AFTER_PROCESS)
            && !matches!(action_after_process, Some(ActionAfterProcess::Move { .. }))
        {
            warn!(
                source_id = %source_id,
                "'{}' is ignored unless '{}' is MOVE",
                OPT_MOVE_AFTER_PROCESS,
                OPT_ACTION_AFTER_PROCESS
            );
        }

        let defaults = Self::default();
        let mut config = Self {
            root,
            mode,
            tailing,
            action_after_process,
            begin_regex: options.get(OPT_BEGIN_REGEX).cloned(),
            end_regex: options.get(OPT_END_REGEX).cloned(),
            regex_inclusive: match options.get(OPT_REGEX_INCLUSIVE) {
                Some(v) => parse_bool(OPT_REGEX_INCLUSIVE, v).map_err(config_error)?,
                None => defaults.regex_inclusive,
            },
            tail_poll_interval: match options.get(OPT_TAIL_POLL_INTERVAL_MS) {
                Some(v) => Duration::from_millis(
                    parse_number(OPT_TAIL_POLL_INTERVAL_MS, v).map_err(config_error)?,
                ),
                None => defaults.tail_poll_interval,
            },
            discovery_interval: match options.get(OPT_DISCOVERY_INTERVAL_MS) {
                Some(v) => Duration::from_millis(
                    parse_number(OPT_DISCOVERY_INTERVAL_MS, v).map_err(config_error)?,
                ),
                None => defaults.discovery_interval,
            },
            read_chunk_size: match options.get(OPT_READ_CHUNK_SIZE) {
                Some(v) => parse_number(OPT_READ_CHUNK_SIZE, v).map_err(config_error)? as usize,
                None => defaults.read_chunk_size,
            },
            max_record_size: match options.get(OPT_MAX_RECORD_SIZE) {
                Some(v) => parse_number(OPT_MAX_RECORD_SIZE, v).map_err(config_error)? as usize,
                None => defaults.max_record_size,
            },
            source_id,
        };

        let effective = config.effective_mode();
        if effective != config.mode {
            info!(
                source_id = %config.source_id,
                "No '{}' or '{}' provided, falling back to '{}' mode",
                OPT_BEGIN_REGEX,
                OPT_END_REGEX,
                effective
            );
            config.mode = effective;
        }

        config.validate()?;
        Ok(config)
    }

    /// The framing mode actually used: regex without any pattern degrades to line.
    pub fn effective_mode(&self) -> Mode {
        if self.mode == Mode::Regex && self.begin_regex.is_none() && self.end_regex.is_none() {
            Mode::Line
        } else {
            self.mode
        }
    }

    /// Buffer sizes handed to every file cursor
    pub fn read_limits(&self) -> ReadLimits {
        ReadLimits {
            chunk_size: self.read_chunk_size,
            max_record_size: self.max_record_size,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(self.config_error(format!(
                "'{}' is a mandatory parameter and has not been provided",
                OPT_URI
            )));
        }

        if self.tailing && self.mode.is_full() {
            return Err(self.config_error(format!(
                "Tailing can't be enabled in '{}' mode",
                self.mode
            )));
        }

        match &self.action_after_process {
            None if !self.tailing => {
                return Err(self.config_error(format!(
                    "'{}' is mandatory when tailing is not enabled",
                    OPT_ACTION_AFTER_PROCESS
                )));
            }
            Some(ActionAfterProcess::Move { target }) => {
                if target.as_os_str().is_empty() {
                    return Err(self.config_error(format!(
                        "'{}' is mandatory when '{}' is MOVE",
                        OPT_MOVE_AFTER_PROCESS, OPT_ACTION_AFTER_PROCESS
                    )));
                }
                if target == &self.root {
                    return Err(self.config_error(format!(
                        "'{}' must not be the watched directory itself",
                        OPT_MOVE_AFTER_PROCESS
                    )));
                }
            }
            _ => {}
        }

        if self.tail_poll_interval.is_zero() {
            return Err(self.config_error(format!("'{}' must be > 0", OPT_TAIL_POLL_INTERVAL_MS)));
        }
        if self.discovery_interval.is_zero() {
            return Err(self.config_error(format!("'{}' must be > 0", OPT_DISCOVERY_INTERVAL_MS)));
        }
        if self.read_chunk_size == 0 {
            return Err(self.config_error(format!("'{}' must be > 0", OPT_READ_CHUNK_SIZE)));
        }
        if self.max_record_size == 0 {
            return Err(self.config_error(format!("'{}' must be > 0", OPT_MAX_RECORD_SIZE)));
        }

        // Compiling the framer surfaces bad patterns before anything starts
        Framer::from_config(self)?;

        Ok(())
    }

    fn config_error(&self, msg: String) -> Error {
        Error::Config(format!("source '{}': {}", self.source_id, msg))
    }
}

/// Resolve a `uri` option into a local path. Accepts plain paths and `file:` URLs.
fn parse_uri(uri: &str) -> std::result::Result<PathBuf, String> {
    if uri.trim().is_empty() {
        return Err("uri must not be empty".to_string());
    }

    if uri.starts_with("file:") {
        let url = Url::parse(uri).map_err(|e| format!("invalid uri '{}': {}", uri, e))?;
        return url
            .to_file_path()
            .map_err(|_| format!("uri '{}' does not name a local path", uri));
    }

    if let Some((scheme, _)) = uri.split_once("://") {
        return Err(format!(
            "unsupported uri scheme '{}' in '{}', only local paths are supported",
            scheme, uri
        ));
    }

    Ok(PathBuf::from(uri))
}

/// Sibling `read` directory of the watch root.
fn default_move_target(root: &Path) -> Option<PathBuf> {
    match root.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Some(PathBuf::from(DEFAULT_MOVE_DIR_NAME)),
        Some(parent) => Some(parent.join(DEFAULT_MOVE_DIR_NAME)),
        None => None,
    }
}

fn parse_bool(name: &str, val: &str) -> std::result::Result<bool, String> {
    match val.to_lowercase().as_str() {
        "0" | "false" => Ok(false),
        "1" | "true" => Ok(true),
        _ => Err(format!("unable to parse bool value '{}' for '{}'", val, name)),
    }
}

fn parse_number(name: &str, val: &str) -> std::result::Result<u64, String> {
    val.trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid value '{}' for '{}': {}", val, name, e))
}
