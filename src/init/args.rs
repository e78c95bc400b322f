// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::sources::file::checkpoint_committer::CheckpointCommitterConfig;
use crate::sources::file::config::{
    self, FileSourceConfig, Mode, OPT_ACTION_AFTER_PROCESS, OPT_BEGIN_REGEX,
    OPT_DISCOVERY_INTERVAL_MS, OPT_END_REGEX, OPT_MAX_RECORD_SIZE, OPT_MODE,
    OPT_MOVE_AFTER_PROCESS, OPT_READ_CHUNK_SIZE, OPT_REGEX_INCLUSIVE, OPT_SOURCE_ID,
    OPT_TAIL_POLL_INTERVAL_MS, OPT_TAILING, OPT_URI,
};
use crate::sources::file::error::Result;

/// Record framing mode
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum ModeArg {
    /// One record per line
    #[default]
    Line,
    /// Records delimited by --begin-regex / --end-regex
    Regex,
    /// Whole file as one text record
    #[value(name = "text.full")]
    TextFull,
    /// Whole file as one binary record
    #[value(name = "binary.full")]
    BinaryFull,
}

impl From<ModeArg> for Mode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Line => Mode::Line,
            ModeArg::Regex => Mode::Regex,
            ModeArg::TextFull => Mode::TextFull,
            ModeArg::BinaryFull => Mode::BinaryFull,
        }
    }
}

/// What to do with fully consumed files
#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "UPPER")]
pub enum ActionArg {
    Delete,
    Move,
}

impl ActionArg {
    fn as_option(&self) -> &'static str {
        match self {
            ActionArg::Delete => "DELETE",
            ActionArg::Move => "MOVE",
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct FileSourceArgs {
    /// Directory to watch, as a path or file:// URI
    #[arg(long, env = "FILESOURCE_URI")]
    pub uri: String,

    /// Framing mode: line, regex, text.full, binary.full
    #[arg(value_enum, long, env = "FILESOURCE_MODE", default_value = "line")]
    pub mode: ModeArg,

    /// Tail the first discovered file. Defaults to true for line/regex and false for full modes
    #[arg(long, env = "FILESOURCE_TAILING")]
    pub tailing: Option<bool>,

    /// Action applied to fully consumed files: DELETE or MOVE
    #[arg(value_enum, long, env = "FILESOURCE_ACTION_AFTER_PROCESS", ignore_case = true)]
    pub action_after_process: Option<ActionArg>,

    /// Target directory for MOVE. Defaults to a "read" directory next to the watched one
    #[arg(long, env = "FILESOURCE_MOVE_AFTER_PROCESS")]
    pub move_after_process: Option<String>,

    /// Pattern that starts a record (regex mode)
    #[arg(long, env = "FILESOURCE_BEGIN_REGEX")]
    pub begin_regex: Option<String>,

    /// Pattern that ends a record (regex mode)
    #[arg(long, env = "FILESOURCE_END_REGEX")]
    pub end_regex: Option<String>,

    /// Keep the matched begin/end text in regex records
    #[arg(long, env = "FILESOURCE_REGEX_INCLUSIVE", default_value = "false")]
    pub regex_inclusive: bool,

    /// Interval in milliseconds between checks of the tailed file
    #[arg(long, env = "FILESOURCE_TAIL_POLL_INTERVAL_MS", default_value = "1000")]
    pub tail_poll_interval_ms: u64,

    /// Interval in milliseconds between directory scans
    #[arg(long, env = "FILESOURCE_DISCOVERY_INTERVAL_MS", default_value = "1000")]
    pub discovery_interval_ms: u64,

    /// Bytes read from disk at a time
    #[arg(long, env = "FILESOURCE_READ_CHUNK_SIZE", default_value = "65536")]
    pub read_chunk_size: usize,

    /// Longest record emitted in line and regex modes, longer ones are truncated
    #[arg(long, env = "FILESOURCE_MAX_RECORD_SIZE", default_value = "1048576")]
    pub max_record_size: usize,

    /// Name of this source in logs and in the checkpoint file
    #[arg(long, env = "FILESOURCE_SOURCE_ID", default_value = config::DEFAULT_SOURCE_ID)]
    pub source_id: String,

    /// Path of the checkpoint file used to resume across restarts
    #[arg(
        long,
        env = "FILESOURCE_CHECKPOINT_PATH",
        default_value = "/var/lib/filesource/checkpoints.json"
    )]
    pub checkpoint_path: PathBuf,

    /// Interval in milliseconds between checkpoint writes
    #[arg(long, env = "FILESOURCE_CHECKPOINT_INTERVAL_MS", default_value = "1000")]
    pub checkpoint_interval_ms: u64,

    /// Maximum duration in milliseconds of consecutive checkpoint failures before exiting
    #[arg(
        long,
        env = "FILESOURCE_MAX_CHECKPOINT_FAILURE_DURATION_MS",
        default_value = "60000"
    )]
    pub max_checkpoint_failure_duration_ms: u64,

    /// Records buffered between the source and the output writer
    #[arg(long, env = "FILESOURCE_OUTPUT_QUEUE_SIZE", default_value = "1000")]
    pub output_queue_size: usize,
}

impl FileSourceArgs {
    /// Named options understood by [`FileSourceConfig::from_options`]
    pub fn build_options(&self) -> HashMap<String, String> {
        let mut options = HashMap::new();
        let mut set = |key: &str, value: String| {
            options.insert(key.to_string(), value);
        };

        set(OPT_SOURCE_ID, self.source_id.clone());
        set(OPT_URI, self.uri.clone());
        set(OPT_MODE, Mode::from(self.mode).as_str().to_string());
        if let Some(tailing) = self.tailing {
            set(OPT_TAILING, tailing.to_string());
        }
        if let Some(action) = self.action_after_process {
            set(OPT_ACTION_AFTER_PROCESS, action.as_option().to_string());
        }
        if let Some(target) = &self.move_after_process {
            set(OPT_MOVE_AFTER_PROCESS, target.clone());
        }
        if let Some(begin) = &self.begin_regex {
            set(OPT_BEGIN_REGEX, begin.clone());
        }
        if let Some(end) = &self.end_regex {
            set(OPT_END_REGEX, end.clone());
        }
        set(OPT_REGEX_INCLUSIVE, self.regex_inclusive.to_string());
        set(
            OPT_TAIL_POLL_INTERVAL_MS,
            self.tail_poll_interval_ms.to_string(),
        );
        set(
            OPT_DISCOVERY_INTERVAL_MS,
            self.discovery_interval_ms.to_string(),
        );
        set(OPT_READ_CHUNK_SIZE, self.read_chunk_size.to_string());
        set(OPT_MAX_RECORD_SIZE, self.max_record_size.to_string());

        options
    }

    /// Build and validate the source config from command line args
    pub fn build_config(&self) -> Result<FileSourceConfig> {
        FileSourceConfig::from_options(&self.build_options())
    }

    pub fn committer_config(&self) -> CheckpointCommitterConfig {
        CheckpointCommitterConfig {
            checkpoint_interval: Duration::from_millis(self.checkpoint_interval_ms),
            max_checkpoint_failure_duration: Duration::from_millis(
                self.max_checkpoint_failure_duration_ms,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::file::config::ActionAfterProcess;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct TestCli {
        #[command(flatten)]
        args: FileSourceArgs,
    }

    fn parse(argv: &[&str]) -> FileSourceArgs {
        let mut full = vec!["filesource"];
        full.extend_from_slice(argv);
        TestCli::try_parse_from(full).unwrap().args
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["--uri", "/data/in"]);

        assert_eq!(args.mode, ModeArg::Line);
        assert_eq!(args.tailing, None);
        assert_eq!(args.source_id, "file-source");

        let config = args.build_config().unwrap();
        assert!(config.tailing);
        assert_eq!(config.tail_poll_interval, Duration::from_millis(1000));
        assert_eq!(config.read_chunk_size, 65536);
        assert_eq!(config.max_record_size, 1024 * 1024);
    }

    #[test]
    fn test_full_mode_with_move() {
        let args = parse(&[
            "--uri",
            "/data/in",
            "--mode",
            "text.full",
            "--action-after-process",
            "move",
        ]);

        let options = args.build_options();
        assert_eq!(options.get(OPT_MODE).map(String::as_str), Some("text.full"));
        assert_eq!(
            options.get(OPT_ACTION_AFTER_PROCESS).map(String::as_str),
            Some("MOVE")
        );
        assert!(!options.contains_key(OPT_TAILING));

        let config = args.build_config().unwrap();
        assert_eq!(config.mode, Mode::TextFull);
        assert!(!config.tailing);
        assert_eq!(
            config.action_after_process,
            Some(ActionAfterProcess::Move {
                target: PathBuf::from("/data/read")
            })
        );
    }

    #[test]
    fn test_invalid_combination_fails_validation() {
        let args = parse(&[
            "--uri",
            "/data/in",
            "--mode",
            "binary.full",
            "--tailing",
            "true",
            "--action-after-process",
            "DELETE",
        ]);

        assert!(args.build_config().is_err());
    }

    #[test]
    fn test_committer_config() {
        let args = parse(&[
            "--uri",
            "/data/in",
            "--checkpoint-interval-ms",
            "250",
            "--max-checkpoint-failure-duration-ms",
            "5000",
        ]);

        let committer = args.committer_config();
        assert_eq!(committer.checkpoint_interval, Duration::from_millis(250));
        assert_eq!(
            committer.max_checkpoint_failure_duration,
            Duration::from_secs(5)
        );
    }
}
