//! Command-line interface definitions for Scholar Atlas.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Credentials can be provided via command-line flags or environment
//! variables (which a `.env` file can supply).

use clap::Parser;

/// Command-line arguments for the Scholar Atlas harvester.
///
/// # Examples
///
/// ```sh
/// # Harvest every journal in the list
/// scholar_atlas -l ./journals.csv -o ./archives
///
/// # One journal, no translation, with render debugging
/// scholar_atlas -l ./journals.csv -o ./archives \
///     --journal journal-of-monetary-economics \
///     --skip-translation --debug-dir ./debug
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the journal list CSV (name,rss_url,source_type,notes)
    #[arg(short = 'l', long, default_value = "journals.csv")]
    pub journal_list: String,

    /// Output directory for per-journal JSON archives
    #[arg(short, long, default_value = "archives")]
    pub output_dir: String,

    /// Path to the crawl progress file
    #[arg(long, default_value = "archives/.progress.json")]
    pub progress_file: String,

    /// Directory for browser-render debug captures (screenshot + metadata)
    #[arg(long)]
    pub debug_dir: Option<String>,

    /// Only process journals with these slugs (repeatable)
    #[arg(long = "journal")]
    pub journals: Vec<String>,

    /// Only process journals of these source types (repeatable)
    #[arg(long = "source")]
    pub sources: Vec<String>,

    /// Skip abstract translation entirely
    #[arg(long)]
    pub skip_translation: bool,

    /// Seconds to pause after each entry that called the translator
    #[arg(long, default_value_t = 0.5)]
    pub throttle_secs: f64,

    /// DeepSeek API key for abstract translation
    #[arg(long, env = "DEEPSEEK_API_KEY")]
    pub deepseek_api_key: Option<String>,

    /// Elsevier API key for the ScienceDirect Article Retrieval API
    #[arg(long, env = "ELSEVIER_API_KEY")]
    pub elsevier_api_key: Option<String>,

    /// Elsevier institutional token, if your key needs one
    #[arg(long, env = "ELSEVIER_INST_TOKEN")]
    pub elsevier_inst_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["scholar_atlas"]);
        assert_eq!(cli.journal_list, "journals.csv");
        assert_eq!(cli.output_dir, "archives");
        assert_eq!(cli.progress_file, "archives/.progress.json");
        assert!(cli.journals.is_empty());
        assert!(!cli.skip_translation);
        assert_eq!(cli.throttle_secs, 0.5);
    }

    #[test]
    fn test_cli_filters_repeat() {
        let cli = Cli::parse_from([
            "scholar_atlas",
            "-l",
            "/tmp/journals.csv",
            "--journal",
            "a-journal",
            "--journal",
            "b-journal",
            "--source",
            "sciencedirect",
            "--skip-translation",
        ]);
        assert_eq!(cli.journal_list, "/tmp/journals.csv");
        assert_eq!(cli.journals, vec!["a-journal", "b-journal"]);
        assert_eq!(cli.sources, vec!["sciencedirect"]);
        assert!(cli.skip_translation);
    }
}
