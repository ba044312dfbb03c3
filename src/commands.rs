//! Command-line argument parsing for the `memchat` binary.

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Chat with language models that remember your past conversations", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Model alias or canonical name (defaults to the configured model)
        model: Option<String>,
    },
    /// List saved conversations, or continue one
    Saved {
        /// Continue the n-th saved conversation
        #[arg(short = 'c', long = "continue", value_name = "N")]
        continue_chat: Option<usize>,
    },
    /// List supported models
    Models,
    /// Write a default config file
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_with_optional_model() {
        let cli = Cli::try_parse_from(["memchat", "chat", "claude-3.5"]).unwrap();
        assert!(matches!(cli.command, Commands::Chat { model: Some(m) } if m == "claude-3.5"));

        let cli = Cli::try_parse_from(["memchat", "chat"]).unwrap();
        assert!(matches!(cli.command, Commands::Chat { model: None }));
    }

    #[test]
    fn parses_saved_continue_flag() {
        let cli = Cli::try_parse_from(["memchat", "saved", "-c", "2"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Saved { continue_chat: Some(2) }
        ));

        let cli = Cli::try_parse_from(["memchat", "saved"]).unwrap();
        assert!(matches!(cli.command, Commands::Saved { continue_chat: None }));
    }

    #[test]
    fn rejects_unknown_subcommands() {
        assert!(Cli::try_parse_from(["memchat", "frobnicate"]).is_err());
    }
}
