use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, builder::{Styles, styling::{AnsiColor, Effects}}, crate_description, crate_name, crate_version};
use clap_complete::Shell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListingLayoutCli {
    PerFunction,
    Single,
}

#[derive(Parser)]
#[command(name = crate_name!(),
    version = crate_version!(),
    about = crate_description!(),
    styles = Styles::styled()
        .header(AnsiColor::BrightGreen.on_default() | Effects::BOLD | Effects::UNDERLINE)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default()))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<TopLevel>,
}

#[derive(Subcommand)]
pub enum TopLevel {
    /// Exports every section and a per-function listing of a CSX image
    Export {
        /// Path to the CSX image
        input: PathBuf,

        /// Output directory (created if missing)
        output: PathBuf,

        /// Maximum number of functions decompiled at once
        #[arg(short, long, default_value_t = 3)]
        jobs: usize,

        /// Listing layout
        #[arg(long, value_enum, default_value_t = ListingLayoutCli::PerFunction)]
        layout: ListingLayoutCli,

        /// Do not write raw section payloads
        #[arg(long, default_value_t = false)]
        no_sections: bool,

        /// Exit with an error if any function failed to decompile
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Prints the decoded tables of a CSX image
    Info {
        /// Path to the CSX image
        input: PathBuf,

        /// Print the function table
        #[arg(long, default_value_t = false)]
        functions: bool,

        /// Print the constant string table
        #[arg(long, default_value_t = false)]
        strings: bool,

        /// Print the global variable table
        #[arg(long, default_value_t = false)]
        globals: bool,

        /// Print the link table
        #[arg(long, default_value_t = false)]
        links: bool,
    },
    /// Generate shell completion
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
}
