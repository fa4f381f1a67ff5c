//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// bum - a personal media server
#[derive(Debug, Parser)]
#[command(name = "bum")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "BUM_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_parser = ["pretty", "compact", "json"])]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scan the library and serve it over HTTP
    Serve(ServeArgs),

    /// Run the HTTP front on the channel passed as standard input
    #[command(hide = true)]
    Front {
        /// Address to listen on
        #[arg(long)]
        listen: String,

        /// Transcode format, for the stream content type
        #[arg(long, default_value = "webm")]
        format: String,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Options of `bum serve`; each overrides the configuration file.
#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    /// Root of the music library
    #[arg(env = "BUM_MEDIA")]
    pub media_root: Option<PathBuf>,

    /// Address the HTTP front listens on
    #[arg(long, env = "BUM_LISTEN")]
    pub listen: Option<String>,

    /// Transcoder executable
    #[arg(long, env = "BUM_TRANSCODER")]
    pub transcoder: Option<PathBuf>,

    /// Directory of the web client
    #[arg(long, env = "STATIC_ROOT")]
    pub static_root: Option<PathBuf>,

    /// Transcode output format
    #[arg(long, value_parser = ["webm", "ogg"])]
    pub format: Option<String>,

    /// Skip filling the thumbnail cache after the scan
    #[arg(long)]
    pub no_warm_thumbnails: bool,
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_takes_library_and_overrides() {
        let cli = Cli::try_parse_from(["bum", "serve", "/music", "--listen", "0.0.0.0:9000", "--format", "ogg"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.media_root, Some(PathBuf::from("/music")));
        assert_eq!(args.listen.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(args.format.as_deref(), Some("ogg"));
        assert!(!args.no_warm_thumbnails);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["bum", "front", "--listen", "127.0.0.1:1", "-v", "--log-format", "json"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.log_format.as_deref(), Some("json"));
        assert!(matches!(cli.command, Command::Front { ref format, .. } if format == "webm"));
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(Cli::try_parse_from(["bum", "serve", "--format", "mp3"]).is_err());
    }
}
