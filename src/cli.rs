use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Preset;
use crate::notify::ChannelKind;
use crate::supervisor::IoMode;

const WRAP_HELP: &str = "\
Presets:
  local       strict detection; bell, sound, popup and dock bounce
  simple      standard detection under a PTY (default)
  visual      popup, dock bounce, bell and banner; no sound
  teams       Teams card with the detected options
  teams-lite  minimal Teams card
  mobile      Pushover, falling back to Telegram
  secure      signed webhook relay, then Teams
  remote      Teams and SMS, with replies through an ngrok tunnel

Run `promptwatch setup` for the credentials each channel needs.";

#[derive(Parser, Debug)]
#[command(
    name = "promptwatch",
    about = "Wrap an interactive CLI assistant and get notified when it is waiting for you",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the assistant and notify when it waits for input
    #[command(after_long_help = WRAP_HELP)]
    Wrap {
        /// Notification preset
        #[arg(long, value_enum)]
        preset: Option<Preset>,

        /// How the child's terminal is attached
        #[arg(long, value_enum)]
        mode: Option<IoMode>,

        /// Program to wrap instead of `claude`
        #[arg(long)]
        program: Option<String>,

        /// Replace the preset's channels (repeatable)
        #[arg(long = "channel", value_enum)]
        channels: Vec<ChannelKind>,

        /// Send one sample notification through the channels and exit
        #[arg(long)]
        test: bool,

        /// Arguments passed to the wrapped program unchanged
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Print setup instructions for the remote channels
    Setup,

    /// Serve a directory over HTTP with gzip and CORS headers
    Serve {
        /// Directory to serve
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Address to bind
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Try every sound output method and report the results
    SoundCheck {
        /// Also raise the output volume to 100 and play a louder sound
        #[arg(long)]
        loud: bool,
    },

    /// Show the effective configuration
    Config {
        /// Emit machine-readable JSON output
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_passes_trailing_args_through() {
        let cli = Cli::parse_from([
            "promptwatch",
            "wrap",
            "--preset",
            "teams-lite",
            "--",
            "--model",
            "opus",
            "-p",
        ]);
        match cli.command {
            Command::Wrap { preset, args, test, .. } => {
                assert_eq!(preset, Some(Preset::TeamsLite));
                assert_eq!(args, vec!["--model", "opus", "-p"]);
                assert!(!test);
            }
            other => panic!("expected wrap, got {other:?}"),
        }
    }

    #[test]
    fn wrap_accepts_repeated_channels() {
        let cli = Cli::parse_from([
            "promptwatch",
            "wrap",
            "--channel",
            "bell",
            "--channel",
            "desktop",
            "--mode",
            "pipe",
        ]);
        match cli.command {
            Command::Wrap { channels, mode, .. } => {
                assert_eq!(channels, vec![ChannelKind::Bell, ChannelKind::Desktop]);
                assert_eq!(mode, Some(IoMode::Pipe));
            }
            other => panic!("expected wrap, got {other:?}"),
        }
    }

    #[test]
    fn verbosity_is_global() {
        let cli = Cli::parse_from(["promptwatch", "config", "-vv", "--json"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Config { json: true }));
    }

    #[test]
    fn serve_and_sound_check_flags() {
        let cli = Cli::parse_from(["promptwatch", "serve", "--port", "9000", "--dir", "public"]);
        match cli.command {
            Command::Serve { dir, port, bind } => {
                assert_eq!(dir, Some(PathBuf::from("public")));
                assert_eq!(port, Some(9000));
                assert_eq!(bind, None);
            }
            other => panic!("expected serve, got {other:?}"),
        }
        let cli = Cli::parse_from(["promptwatch", "sound-check", "--loud"]);
        assert!(matches!(cli.command, Command::SoundCheck { loud: true }));
    }

    #[test]
    fn unknown_preset_is_rejected() {
        assert!(Cli::try_parse_from(["promptwatch", "wrap", "--preset", "pager"]).is_err());
    }

    #[test]
    fn command_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
